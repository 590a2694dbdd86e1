use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Instant;

use log::{trace, warn};

use crate::error::BoxError;
use crate::handler::Context;
use crate::handler_internal::{ContextInternal, HandlerInternal};
use crate::{NotifyCallback, RESERVED_PIPELINE_HANDLE_NAME};

#[doc(hidden)]
pub type HandlerRef = Rc<RefCell<dyn HandlerInternal>>;
#[doc(hidden)]
pub type ContextRef = Rc<RefCell<dyn ContextInternal>>;

/// Flags shared by every context of one pipeline and the connection driver.
///
/// This is the only path from a handler back to its connection. It never owns
/// the connection: it records a request and wakes the driver.
#[doc(hidden)]
#[derive(Default)]
pub struct PipelineSignals {
    close_requested: Cell<bool>,
    write_notify: RefCell<Option<NotifyCallback>>,
}

impl PipelineSignals {
    pub(crate) fn request_close(&self) {
        if !self.close_requested.replace(true) {
            trace!("pipeline close requested");
        }
        self.notify();
    }

    pub(crate) fn take_close_request(&self) -> bool {
        self.close_requested.replace(false)
    }

    pub(crate) fn set_write_notify(&self, notify: NotifyCallback) {
        *self.write_notify.borrow_mut() = Some(notify);
    }

    pub(crate) fn notify(&self) {
        if let Some(notify) = self.write_notify.borrow().as_ref() {
            notify();
        }
    }
}

/// A structural change recorded while an event was being dispatched.
///
/// Indices are positions among the user handlers at the time the change was
/// validated; replaying the changes in order reproduces the same chain.
pub(crate) enum Mutation {
    Insert {
        index: usize,
        handler: HandlerRef,
        context: ContextRef,
    },
    Remove {
        index: usize,
    },
}

/// The linked handler chain of one pipeline.
///
/// ```text
/// handlers: [ user 0 ] [ user 1 ] ... [ user n-1 ] [ LastHandler<W> ]
/// contexts: [ ctx 0  ] [ ctx 1  ] ... [ ctx n-1  ] [ ctx (reserved) ]
///                 \________/ \___ ...        \________/
///              next_handler / next_context links, rebuilt by link()
/// ```
///
/// The tail is always a [`LastHandler`], which owns no user state: it hands
/// out queued outbound messages and absorbs anything inbound that nobody
/// consumed.
pub(crate) struct PipelineInternal<R, W> {
    handlers: Vec<HandlerRef>,
    contexts: Vec<ContextRef>,
    transmits: Rc<RefCell<VecDeque<W>>>,
    signals: Rc<PipelineSignals>,
    phantom: PhantomData<R>,
}

impl<R: 'static, W: 'static> PipelineInternal<R, W> {
    pub(crate) fn new() -> Self {
        let transmits = Rc::new(RefCell::new(VecDeque::new()));
        let last_handler: HandlerRef =
            Rc::new(RefCell::new(LastHandler::new(Rc::clone(&transmits))));
        let last_context: ContextRef = Rc::new(RefCell::new(Context::<W, W, W, W>::new(
            RESERVED_PIPELINE_HANDLE_NAME,
        )));

        let mut internal = Self {
            handlers: vec![last_handler],
            contexts: vec![last_context],
            transmits,
            signals: Rc::new(PipelineSignals::default()),
            phantom: PhantomData,
        };
        internal.link();
        internal
    }

    pub(crate) fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Insert {
                index,
                handler,
                context,
            } => {
                self.handlers.insert(index, handler);
                self.contexts.insert(index, context);
            }
            Mutation::Remove { index } => {
                self.handlers.remove(index);
                self.contexts.remove(index);
            }
        }
    }

    /// Rebuilds the next-stage links of every context.
    ///
    /// Must not run while any handler is borrowed, i.e. only between dispatches.
    pub(crate) fn link(&mut self) {
        let len = self.contexts.len();
        for j in 0..len {
            let next = (j + 1 < len).then(|| {
                (
                    Rc::clone(&self.handlers[j + 1]),
                    Rc::clone(&self.contexts[j + 1]),
                )
            });
            self.contexts[j]
                .borrow_mut()
                .link(next, Rc::clone(&self.signals));
        }
    }

    pub(crate) fn head(&self) -> (HandlerRef, ContextRef) {
        (Rc::clone(&self.handlers[0]), Rc::clone(&self.contexts[0]))
    }

    pub(crate) fn signals(&self) -> &Rc<PipelineSignals> {
        &self.signals
    }

    pub(crate) fn write(&self, msg: W) {
        self.transmits.borrow_mut().push_back(msg);
        self.signals.notify();
    }

    pub(crate) fn has_pending_write(&self) -> bool {
        self.handlers
            .iter()
            .any(|handler| handler.borrow().has_pending_write_internal())
    }
}

pub(crate) fn transport_active(head: &(HandlerRef, ContextRef)) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .transport_active_internal(&*context.borrow());
}

pub(crate) fn transport_inactive(head: &(HandlerRef, ContextRef)) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .transport_inactive_internal(&*context.borrow());
}

pub(crate) fn handle_read<R: 'static>(head: &(HandlerRef, ContextRef), msg: R) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .handle_read_internal(&*context.borrow(), Box::new(msg));
}

pub(crate) fn handle_read_complete(head: &(HandlerRef, ContextRef)) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .handle_read_complete_internal(&*context.borrow());
}

pub(crate) fn poll_write<R: 'static>(head: &(HandlerRef, ContextRef)) -> Option<R> {
    let (handler, context) = head;
    let context = context.borrow();
    let msg = handler.borrow_mut().poll_write_internal(&*context)?;
    if let Ok(msg) = msg.downcast::<R>() {
        Some(*msg)
    } else {
        panic!("msg can't downcast::<R> in {} handler", context.name());
    }
}

pub(crate) fn handle_timeout(head: &(HandlerRef, ContextRef), now: Instant) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .handle_timeout_internal(&*context.borrow(), now);
}

pub(crate) fn poll_timeout(head: &(HandlerRef, ContextRef), eto: &mut Instant) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .poll_timeout_internal(&*context.borrow(), eto);
}

pub(crate) fn handle_eof(head: &(HandlerRef, ContextRef)) {
    let (handler, context) = head;
    handler.borrow_mut().handle_eof_internal(&*context.borrow());
}

pub(crate) fn handle_error(head: &(HandlerRef, ContextRef), err: BoxError) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .handle_error_internal(&*context.borrow(), err);
}

pub(crate) fn handle_close(head: &(HandlerRef, ContextRef)) {
    let (handler, context) = head;
    handler
        .borrow_mut()
        .handle_close_internal(&*context.borrow());
}

/// The reserved tail of every pipeline.
///
/// Outbound, it hands the queue filled by `OutboundPipeline::write` to the
/// stage above it. Inbound, it is where unconsumed events end: messages are
/// dropped with a warning and an unhandled error closes the connection.
pub(crate) struct LastHandler<W> {
    transmits: Rc<RefCell<VecDeque<W>>>,
}

impl<W> LastHandler<W> {
    pub(crate) fn new(transmits: Rc<RefCell<VecDeque<W>>>) -> Self {
        Self { transmits }
    }
}

impl<W: 'static> HandlerInternal for LastHandler<W> {
    fn transport_active_internal(&mut self, _ctx: &dyn ContextInternal) {}
    fn transport_inactive_internal(&mut self, _ctx: &dyn ContextInternal) {}

    fn handle_read_internal(&mut self, _ctx: &dyn ContextInternal, _msg: Box<dyn Any>) {
        warn!("inbound message reached end of pipeline and was dropped");
    }
    fn handle_read_complete_internal(&mut self, _ctx: &dyn ContextInternal) {}
    fn poll_write_internal(&mut self, _ctx: &dyn ContextInternal) -> Option<Box<dyn Any>> {
        self.transmits
            .borrow_mut()
            .pop_front()
            .map(|msg| Box::new(msg) as Box<dyn Any>)
    }
    fn has_pending_write_internal(&self) -> bool {
        !self.transmits.borrow().is_empty()
    }

    fn handle_timeout_internal(&mut self, _ctx: &dyn ContextInternal, _now: Instant) {}
    fn poll_timeout_internal(&mut self, _ctx: &dyn ContextInternal, _eto: &mut Instant) {}

    fn handle_eof_internal(&mut self, _ctx: &dyn ContextInternal) {
        trace!("eof reached end of pipeline");
    }
    fn handle_error_internal(&mut self, ctx: &dyn ContextInternal, err: BoxError) {
        warn!("unhandled error reached end of pipeline, closing: {}", err);
        ctx.request_close_internal();
    }
    fn handle_close_internal(&mut self, _ctx: &dyn ContextInternal) {}
}
