//! # Pipeline - ordered chain of handlers attached to one connection
//!
//! A pipeline routes events through its [`Handler`]s in both directions:
//!
//! - **Inbound** (`handle_read` and friends): head → tail
//! - **Outbound** (`poll_write`): tail → head
//!
//! ```text
//!                               | write()
//!   +---------------------------+------------+
//!   |  Pipeline                \|/           |
//!   |   +---------------------------------+  |
//!   |   |   LastHandler (reserved tail)   |  |
//!   |   +---------------------------------+  |
//!   |        /|\                 |           |
//!   |   +---------------------------------+  |
//!   |   |        HttpResponseHandler      |  |
//!   |   +---------------------------------+  |
//!   |        /|\                 |           |
//!   |   +---------------------------------+  |
//!   |   |         HttpClientCodec         |  |
//!   |   +---------------------------------+  |
//!   |        /|\                 |           |
//!   |   +---------------------------------+  |
//!   |   |           TlsHandler            |  |
//!   |   +---------------------------------+  |
//!   |        /|\                \|/          |
//!   +---------+------------------+-----------+
//!             |                  |
//!      handle_read()        poll_write()
//! ```
//!
//! ## Example
//!
//! ```rust
//! use chanio::{Context, Handler, InboundPipeline, OutboundPipeline, Pipeline};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     type Rin = String;
//!     type Rout = String;
//!     type Win = String;
//!     type Wout = String;
//!
//!     fn name(&self) -> &str {
//!         "Echo"
//!     }
//!
//!     fn handle_read(&mut self, _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>, _msg: Self::Rin) {}
//!
//!     fn poll_write(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) -> Option<Self::Wout> {
//!         ctx.fire_poll_write()
//!     }
//! }
//!
//! let pipeline: Pipeline<String, String> = Pipeline::new();
//! pipeline.add_last(Echo).unwrap();
//! let pipeline = pipeline.finalize();
//!
//! pipeline.write("hello".to_string());
//! assert_eq!(pipeline.poll_write(), Some("hello".to_string()));
//! ```
//!
//! ## Mutation
//!
//! Handlers are keyed by [`Handler::name`]. Insertion and removal may happen at
//! any time on the thread that owns the pipeline, including from inside a
//! handler callback. While an event is being dispatched, a mutation is
//! validated and recorded in the name index at once, but the chain itself is
//! only relinked when the outermost dispatch returns, so an in-flight traversal
//! always sees the chain it started with.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use crate::error::{BoxError, Error};
use crate::handler::Handler;
use crate::pipeline_internal::{self, ContextRef, HandlerRef, Mutation, PipelineInternal};
use crate::{NotifyCallback, RESERVED_PIPELINE_HANDLE_NAME};

/// Inbound operations for a pipeline, driven by the transport.
///
/// # Type Parameters
///
/// - `R`: what the transport hands in at the head and takes back from `poll_write`
pub trait InboundPipeline<R> {
    /// Notifies the pipeline that the transport is active (connected).
    fn transport_active(&self);

    /// Notifies the pipeline that the transport is inactive (disconnected).
    fn transport_inactive(&self);

    /// Pushes an incoming message into the head of the pipeline.
    fn handle_read(&self, msg: R);

    /// Signals that the messages of the current socket read were all delivered.
    fn handle_read_complete(&self);

    /// Pulls the next outgoing message out of the head of the pipeline.
    fn poll_write(&self) -> Option<R>;

    /// Handles a timeout event.
    fn handle_timeout(&self, now: Instant);

    /// Lowers `eto` to the earliest deadline any handler needs.
    fn poll_timeout(&self, eto: &mut Instant);

    /// Handles end of stream from the peer.
    fn handle_eof(&self);

    /// Handles a transport error.
    fn handle_error(&self, err: BoxError);

    /// Announces a local close to every handler, head to tail.
    fn handle_close(&self);

    #[doc(hidden)]
    fn set_write_notify(&self, notify: NotifyCallback);

    #[doc(hidden)]
    fn take_close_request(&self) -> bool;

    #[doc(hidden)]
    fn has_pending_write(&self) -> bool;
}

/// Outbound operations for a pipeline, driven by the application.
///
/// # Type Parameters
///
/// - `W`: the message type accepted at the tail of the pipeline
pub trait OutboundPipeline<W> {
    /// Queues a message at the tail; it leaves through `poll_write`.
    fn write(&self, msg: W);

    /// Asks the owning connection to close.
    fn close(&self);
}

/// A pipeline of handlers for one connection.
///
/// # Type Parameters
///
/// - `R`: message type at the transport side (usually `ByteBuffer`)
/// - `W`: message type the application writes
///
/// A pipeline is `!Send`: it lives on the event loop thread of its connection.
pub struct Pipeline<R, W> {
    internal: RefCell<PipelineInternal<R, W>>,
    names: RefCell<Vec<String>>,
    dispatching: Cell<usize>,
    deferred: RefCell<Vec<Mutation>>,
}

impl<R: 'static, W: 'static> Default for Pipeline<R, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: 'static, W: 'static> Pipeline<R, W> {
    /// Creates a pipeline holding only the reserved tail.
    pub fn new() -> Self {
        Self {
            internal: RefCell::new(PipelineInternal::new()),
            names: RefCell::new(vec![]),
            dispatching: Cell::new(0),
            deferred: RefCell::new(vec![]),
        }
    }

    /// Inserts a handler at the head.
    pub fn add_first(&self, handler: impl Handler + 'static) -> Result<&Self, Error> {
        self.insert_with(handler, |_| Ok(0))
    }

    /// Inserts a handler just before the reserved tail.
    pub fn add_last(&self, handler: impl Handler + 'static) -> Result<&Self, Error> {
        self.insert_with(handler, |names| Ok(names.len()))
    }

    /// Inserts a handler immediately after the handler named `base`.
    pub fn add_after(&self, base: &str, handler: impl Handler + 'static) -> Result<&Self, Error> {
        self.insert_with(handler, |names| position(names, base).map(|index| index + 1))
    }

    /// Inserts a handler immediately before the handler named `base`.
    pub fn add_before(&self, base: &str, handler: impl Handler + 'static) -> Result<&Self, Error> {
        self.insert_with(handler, |names| position(names, base))
    }

    /// Removes the handler named `name`.
    pub fn remove(&self, name: &str) -> Result<&Self, Error> {
        if name == RESERVED_PIPELINE_HANDLE_NAME {
            return Err(Error::ReservedName(name.to_string()));
        }
        let index = position(&self.names.borrow(), name)?;
        self.remove_at(index);
        Ok(self)
    }

    /// Removes the handler at the head.
    pub fn remove_first(&self) -> Result<&Self, Error> {
        if self.names.borrow().is_empty() {
            return Err(Error::NotFound("<first>".to_string()));
        }
        self.remove_at(0);
        Ok(self)
    }

    /// Removes the handler just before the reserved tail.
    pub fn remove_last(&self) -> Result<&Self, Error> {
        let len = self.names.borrow().len();
        if len == 0 {
            return Err(Error::NotFound("<last>".to_string()));
        }
        self.remove_at(len - 1);
        Ok(self)
    }

    /// Handler names in inbound traversal order; outbound order is the reverse.
    pub fn names(&self) -> Vec<String> {
        self.names.borrow().clone()
    }

    /// Whether a handler named `name` is installed.
    pub fn contains(&self, name: &str) -> bool {
        self.names.borrow().iter().any(|n| n == name)
    }

    /// Number of user handlers, the reserved tail excluded.
    pub fn len(&self) -> usize {
        self.names.borrow().len()
    }

    /// Whether the pipeline holds no user handler.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Links the chain and moves the pipeline behind an `Rc` for the driver.
    pub fn finalize(self) -> Rc<Self> {
        self.internal.borrow_mut().link();
        Rc::new(self)
    }

    fn insert_with(
        &self,
        handler: impl Handler + 'static,
        locate: impl FnOnce(&[String]) -> Result<usize, Error>,
    ) -> Result<&Self, Error> {
        let (name, handler, context) = handler.into_stage();
        if name == RESERVED_PIPELINE_HANDLE_NAME {
            return Err(Error::ReservedName(name));
        }

        let mut names = self.names.borrow_mut();
        if names.contains(&name) {
            return Err(Error::DuplicateName(name));
        }
        let index = locate(names.as_slice())?;
        names.insert(index, name);
        drop(names);

        self.mutate(Mutation::Insert {
            index,
            handler,
            context,
        });
        Ok(self)
    }

    fn remove_at(&self, index: usize) {
        self.names.borrow_mut().remove(index);
        self.mutate(Mutation::Remove { index });
    }

    fn mutate(&self, mutation: Mutation) {
        if self.dispatching.get() > 0 {
            self.deferred.borrow_mut().push(mutation);
        } else {
            let mut internal = self.internal.borrow_mut();
            internal.apply(mutation);
            internal.link();
        }
    }

    fn dispatch<T>(
        &self,
        f: impl FnOnce(&(HandlerRef, ContextRef)) -> T,
    ) -> T {
        let head = self.internal.borrow().head();
        self.dispatching.set(self.dispatching.get() + 1);
        let out = f(&head);
        let depth = self.dispatching.get() - 1;
        self.dispatching.set(depth);
        if depth == 0 {
            self.apply_deferred();
        }
        out
    }

    fn apply_deferred(&self) {
        let deferred: Vec<Mutation> = self.deferred.borrow_mut().drain(..).collect();
        if deferred.is_empty() {
            return;
        }
        let mut internal = self.internal.borrow_mut();
        for mutation in deferred {
            internal.apply(mutation);
        }
        internal.link();
    }
}

fn position(names: &[String], name: &str) -> Result<usize, Error> {
    names
        .iter()
        .position(|n| n == name)
        .ok_or_else(|| Error::NotFound(name.to_string()))
}

impl<R: 'static, W: 'static> InboundPipeline<R> for Pipeline<R, W> {
    fn transport_active(&self) {
        self.dispatch(pipeline_internal::transport_active);
    }

    fn transport_inactive(&self) {
        self.dispatch(pipeline_internal::transport_inactive);
    }

    fn handle_read(&self, msg: R) {
        self.dispatch(|head| pipeline_internal::handle_read(head, msg));
    }

    fn handle_read_complete(&self) {
        self.dispatch(pipeline_internal::handle_read_complete);
    }

    fn poll_write(&self) -> Option<R> {
        self.dispatch(pipeline_internal::poll_write::<R>)
    }

    fn handle_timeout(&self, now: Instant) {
        self.dispatch(|head| pipeline_internal::handle_timeout(head, now));
    }

    fn poll_timeout(&self, eto: &mut Instant) {
        self.dispatch(|head| pipeline_internal::poll_timeout(head, eto));
    }

    fn handle_eof(&self) {
        self.dispatch(pipeline_internal::handle_eof);
    }

    fn handle_error(&self, err: BoxError) {
        self.dispatch(|head| pipeline_internal::handle_error(head, err));
    }

    fn handle_close(&self) {
        self.dispatch(pipeline_internal::handle_close);
    }

    fn set_write_notify(&self, notify: NotifyCallback) {
        self.internal.borrow().signals().set_write_notify(notify);
    }

    fn take_close_request(&self) -> bool {
        self.internal.borrow().signals().take_close_request()
    }

    fn has_pending_write(&self) -> bool {
        self.internal.borrow().has_pending_write()
    }
}

impl<R: 'static, W: 'static> OutboundPipeline<W> for Pipeline<R, W> {
    fn write(&self, msg: W) {
        self.internal.borrow().write(msg);
    }

    fn close(&self) {
        self.internal.borrow().signals().request_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use std::io;
    use std::rc::Weak;

    struct Tagger {
        name: String,
    }

    impl Tagger {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    impl Handler for Tagger {
        type Rin = String;
        type Rout = String;
        type Win = String;
        type Wout = String;

        fn name(&self) -> &str {
            &self.name
        }

        fn handle_read(
            &mut self,
            ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
            msg: Self::Rin,
        ) {
            ctx.fire_handle_read(format!("{}>{}", msg, self.name));
        }

        fn poll_write(
            &mut self,
            ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        ) -> Option<Self::Wout> {
            ctx.fire_poll_write()
                .map(|msg| format!("{}>{}", msg, self.name))
        }
    }

    #[derive(Default)]
    struct Sink {
        reads: Rc<RefCell<Vec<String>>>,
        errors: Rc<RefCell<Vec<String>>>,
    }

    impl Handler for Sink {
        type Rin = String;
        type Rout = String;
        type Win = String;
        type Wout = String;

        fn name(&self) -> &str {
            "Sink"
        }

        fn handle_read(
            &mut self,
            _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
            msg: Self::Rin,
        ) {
            self.reads.borrow_mut().push(msg);
        }

        fn poll_write(
            &mut self,
            ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        ) -> Option<Self::Wout> {
            ctx.fire_poll_write()
        }

        fn handle_error(
            &mut self,
            _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
            err: BoxError,
        ) {
            self.errors.borrow_mut().push(err.to_string());
        }
    }

    #[test]
    fn test_inbound_and_outbound_traversal_order() {
        let sink = Sink::default();
        let reads = Rc::clone(&sink.reads);

        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline
            .add_last(Tagger::new("A"))
            .unwrap()
            .add_last(Tagger::new("B"))
            .unwrap()
            .add_last(Tagger::new("C"))
            .unwrap()
            .add_last(sink)
            .unwrap();
        let pipeline = pipeline.finalize();

        assert_eq!(pipeline.names(), vec!["A", "B", "C", "Sink"]);

        pipeline.handle_read("x".to_string());
        assert_eq!(*reads.borrow(), vec!["x>A>B>C".to_string()]);

        pipeline.write("x".to_string());
        assert_eq!(pipeline.poll_write(), Some("x>C>B>A".to_string()));
        assert_eq!(pipeline.poll_write(), None);
    }

    #[test]
    fn test_positional_insert() {
        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline
            .add_last(Tagger::new("B"))
            .unwrap()
            .add_first(Tagger::new("A"))
            .unwrap()
            .add_after("B", Tagger::new("D"))
            .unwrap()
            .add_before("D", Tagger::new("C"))
            .unwrap();

        assert_eq!(pipeline.names(), vec!["A", "B", "C", "D"]);
        let pipeline = pipeline.finalize();
        pipeline.write("x".to_string());
        assert_eq!(pipeline.poll_write(), Some("x>D>C>B>A".to_string()));
    }

    #[test]
    fn test_duplicate_name_leaves_pipeline_unchanged() {
        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline.add_last(Tagger::new("A")).unwrap();

        let err = pipeline.add_last(Tagger::new("A")).err().unwrap();
        assert!(matches!(err, Error::DuplicateName(name) if name == "A"));
        assert_eq!(pipeline.names(), vec!["A"]);

        let err = pipeline.add_first(Tagger::new("A")).err().unwrap();
        assert!(matches!(err, Error::DuplicateName(_)));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_missing_base_and_reserved_name() {
        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline.add_last(Tagger::new("A")).unwrap();

        assert!(matches!(
            pipeline.add_after("Z", Tagger::new("B")),
            Err(Error::NotFound(name)) if name == "Z"
        ));
        assert!(matches!(
            pipeline.add_last(Tagger::new(RESERVED_PIPELINE_HANDLE_NAME)),
            Err(Error::ReservedName(_))
        ));
        assert!(matches!(
            pipeline.remove(RESERVED_PIPELINE_HANDLE_NAME),
            Err(Error::ReservedName(_))
        ));
        assert!(matches!(pipeline.remove("B"), Err(Error::NotFound(_))));
        assert_eq!(pipeline.names(), vec!["A"]);
    }

    #[test]
    fn test_remove() {
        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline
            .add_last(Tagger::new("A"))
            .unwrap()
            .add_last(Tagger::new("B"))
            .unwrap()
            .add_last(Tagger::new("C"))
            .unwrap();
        let pipeline = pipeline.finalize();

        pipeline.remove("B").unwrap();
        pipeline.write("x".to_string());
        assert_eq!(pipeline.poll_write(), Some("x>C>A".to_string()));

        pipeline.remove_first().unwrap().remove_last().unwrap();
        assert!(pipeline.is_empty());
        assert!(matches!(pipeline.remove_first(), Err(Error::NotFound(_))));

        pipeline.write("x".to_string());
        assert_eq!(pipeline.poll_write(), Some("x".to_string()));
    }

    struct Installer {
        pipeline: Rc<RefCell<Weak<Pipeline<String, String>>>>,
        installed: bool,
    }

    impl Handler for Installer {
        type Rin = String;
        type Rout = String;
        type Win = String;
        type Wout = String;

        fn name(&self) -> &str {
            "Installer"
        }

        fn handle_read(
            &mut self,
            ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
            msg: Self::Rin,
        ) {
            if !self.installed {
                self.installed = true;
                if let Some(pipeline) = self.pipeline.borrow().upgrade() {
                    pipeline
                        .add_after("Installer", Tagger::new("Late"))
                        .unwrap();
                    assert!(pipeline.contains("Late"));
                    assert!(matches!(
                        pipeline.add_last(Tagger::new("Late")),
                        Err(Error::DuplicateName(_))
                    ));
                }
            }
            ctx.fire_handle_read(msg);
        }

        fn poll_write(
            &mut self,
            ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        ) -> Option<Self::Wout> {
            ctx.fire_poll_write()
        }
    }

    #[test]
    fn test_mutation_during_dispatch_is_deferred() {
        let slot = Rc::new(RefCell::new(Weak::new()));
        let sink = Sink::default();
        let reads = Rc::clone(&sink.reads);

        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline
            .add_last(Installer {
                pipeline: Rc::clone(&slot),
                installed: false,
            })
            .unwrap()
            .add_last(sink)
            .unwrap();
        let pipeline = pipeline.finalize();
        *slot.borrow_mut() = Rc::downgrade(&pipeline);

        pipeline.handle_read("first".to_string());
        pipeline.handle_read("second".to_string());

        assert_eq!(
            *reads.borrow(),
            vec!["first".to_string(), "second>Late".to_string()]
        );
        assert_eq!(pipeline.names(), vec!["Installer", "Late", "Sink"]);
    }

    #[test]
    fn test_unhandled_error_requests_close() {
        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline.add_last(Tagger::new("A")).unwrap();
        let pipeline = pipeline.finalize();

        assert!(!pipeline.take_close_request());
        pipeline.handle_error(Box::new(io::Error::new(io::ErrorKind::Other, "boom")));
        assert!(pipeline.take_close_request());
        assert!(!pipeline.take_close_request());
    }

    #[test]
    fn test_handled_error_stops_at_handler() {
        let sink = Sink::default();
        let errors = Rc::clone(&sink.errors);

        let pipeline: Pipeline<String, String> = Pipeline::new();
        pipeline.add_last(sink).unwrap();
        let pipeline = pipeline.finalize();

        pipeline.handle_error(Box::new(Error::PrematureClose));
        assert_eq!(errors.borrow().len(), 1);
        assert!(!pipeline.take_close_request());
    }

    #[test]
    fn test_write_and_close_notify() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let pipeline: Pipeline<String, String> = Pipeline::new();
        let pipeline = pipeline.finalize();

        let count = Arc::new(AtomicUsize::new(0));
        let notified = Arc::clone(&count);
        pipeline.set_write_notify(Arc::new(move || {
            notified.fetch_add(1, Ordering::SeqCst);
        }));

        pipeline.write("x".to_string());
        assert!(pipeline.has_pending_write());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        pipeline.close();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(pipeline.take_close_request());

        assert_eq!(pipeline.poll_write(), Some("x".to_string()));
        assert!(!pipeline.has_pending_write());
    }
}
