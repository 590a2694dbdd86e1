//! Pipeline stages and the context they dispatch through.
//!
//! Each [`Handler`] turns `Rin` into `Rout` on the way up and `Win` into
//! `Wout` on the way down. Adjacent stages must agree: a stage's `Rout` is
//! the `Rin` of the stage above it, and its `Win` is the `Wout` of that stage.
//!
//! ```text
//!   socket                                         application
//!     |  ByteBuffer      ByteBuffer      HttpPart     |
//!     +---> [ tls ] ---> [ http codec ] ---> [ response ] (inbound)
//!     <---- [ tls ] <--- [ http codec ] <--- [ response ] (poll_write)
//! ```
//!
//! A handler either forwards an event with one of the `ctx.fire_*` calls or
//! stops it there, for example while it buffers a partial record. Every
//! default implementation forwards.
//!
//! ## Example: upper-casing stage
//!
//! ```rust
//! use chanio::{Context, Handler};
//!
//! struct ToUpper;
//!
//! impl Handler for ToUpper {
//!     type Rin = String;
//!     type Rout = String;
//!     type Win = String;
//!     type Wout = String;
//!
//!     fn name(&self) -> &str {
//!         "ToUpper"
//!     }
//!
//!     fn handle_read(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>, msg: Self::Rin) {
//!         ctx.fire_handle_read(msg.to_uppercase());
//!     }
//!
//!     fn poll_write(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) -> Option<Self::Wout> {
//!         ctx.fire_poll_write()
//!     }
//! }
//! ```
//!
//! ## Events
//!
//! - **`transport_active`** / **`transport_inactive`**: connection opened / closed
//! - **`handle_read`**: one inbound message
//! - **`handle_read_complete`**: the current socket read batch is fully dispatched
//! - **`poll_write`**: the stage below asks for the next outbound message
//! - **`handle_timeout`** / **`poll_timeout`**: timer handling
//! - **`handle_eof`**: the peer closed its side
//! - **`handle_error`**: a stage below reported an error
//! - **`handle_close`**: the connection is about to be closed locally

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Instant;

use log::{trace, warn};

use crate::error::BoxError;
use crate::handler_internal::{ContextInternal, HandlerInternal};
use crate::pipeline_internal::{ContextRef, HandlerRef, PipelineSignals};

/// One stage of a [`Pipeline`](crate::Pipeline).
///
/// A handler instance belongs to exactly one pipeline, hence to one
/// connection. Its state is never shared with another connection.
pub trait Handler {
    /// Inbound message accepted from the stage below.
    type Rin: 'static;
    /// Inbound message passed to the stage above.
    type Rout: 'static;
    /// Outbound message pulled from the stage above.
    type Win: 'static;
    /// Outbound message handed to the stage below.
    type Wout: 'static;

    /// Unique name of the stage within its pipeline.
    ///
    /// The name is the key used by the pipeline for positional insertion and
    /// removal, so it must be unique within one pipeline.
    fn name(&self) -> &str;

    #[doc(hidden)]
    fn into_stage(self) -> (String, HandlerRef, ContextRef)
    where
        Self: Sized + 'static,
    {
        let name = self.name().to_owned();
        let context = Context::<Self::Rin, Self::Rout, Self::Win, Self::Wout>::new(&name);
        let erased: Box<
            dyn Handler<Rin = Self::Rin, Rout = Self::Rout, Win = Self::Win, Wout = Self::Wout>,
        > = Box::new(self);
        (
            name,
            Rc::new(RefCell::new(erased)) as HandlerRef,
            Rc::new(RefCell::new(context)) as ContextRef,
        )
    }

    /// The connection is established.
    fn transport_active(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_transport_active();
    }

    /// The connection is gone. This is the last event a pipeline ever sees.
    fn transport_inactive(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_transport_inactive();
    }

    /// One inbound message. Not calling `ctx.fire_handle_read` stops it here.
    fn handle_read(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    );

    /// Called after every message of one socket read has been dispatched.
    fn handle_read_complete(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) {
        ctx.fire_handle_read_complete();
    }

    /// Next outbound message for the stage below, `None` when nothing is ready.
    ///
    /// Most stages pull from above with `ctx.fire_poll_write()` and transform
    /// what they get.
    fn poll_write(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout>;

    /// Whether this handler still holds outbound data it has not handed down.
    ///
    /// A write is only reported as flushed once no handler holds anything back.
    fn has_pending_write(&self) -> bool {
        false
    }

    /// A deadline reported through `poll_timeout` has passed.
    fn handle_timeout(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        now: Instant,
    ) {
        ctx.fire_handle_timeout(now);
    }

    /// Lowers `eto` to the earliest instant this handler needs a timeout at.
    fn poll_timeout(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        eto: &mut Instant,
    ) {
        ctx.fire_poll_timeout(eto);
    }

    /// The peer closed its side.
    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_handle_eof();
    }

    /// A stage below failed. Stages that cannot resolve the error forward it.
    fn handle_error(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        err: BoxError,
    ) {
        ctx.fire_handle_error(err);
    }

    /// The connection is being closed locally; last chance to queue output.
    fn handle_close(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        ctx.fire_handle_close();
    }
}

impl<Rin: 'static, Rout: 'static, Win: 'static, Wout: 'static> HandlerInternal
    for Box<dyn Handler<Rin = Rin, Rout = Rout, Win = Win, Wout = Wout>>
{
    fn transport_active_internal(&mut self, ctx: &dyn ContextInternal) {
        self.transport_active(typed(ctx));
    }
    fn transport_inactive_internal(&mut self, ctx: &dyn ContextInternal) {
        self.transport_inactive(typed(ctx));
    }

    fn handle_read_internal(&mut self, ctx: &dyn ContextInternal, msg: Box<dyn Any>) {
        let ctx = typed::<Rin, Rout, Win, Wout>(ctx);
        match msg.downcast::<Rin>() {
            Ok(msg) => self.handle_read(ctx, *msg),
            Err(_) => panic!("{} got an inbound message of the wrong type", ctx.name()),
        }
    }
    fn handle_read_complete_internal(&mut self, ctx: &dyn ContextInternal) {
        self.handle_read_complete(typed(ctx));
    }
    fn poll_write_internal(&mut self, ctx: &dyn ContextInternal) -> Option<Box<dyn Any>> {
        let msg = self.poll_write(typed::<Rin, Rout, Win, Wout>(ctx))?;
        Some(Box::new(msg))
    }
    fn has_pending_write_internal(&self) -> bool {
        self.has_pending_write()
    }

    fn handle_timeout_internal(&mut self, ctx: &dyn ContextInternal, now: Instant) {
        self.handle_timeout(typed(ctx), now);
    }
    fn poll_timeout_internal(&mut self, ctx: &dyn ContextInternal, eto: &mut Instant) {
        self.poll_timeout(typed(ctx), eto);
    }

    fn handle_eof_internal(&mut self, ctx: &dyn ContextInternal) {
        self.handle_eof(typed(ctx));
    }
    fn handle_error_internal(&mut self, ctx: &dyn ContextInternal, err: BoxError) {
        self.handle_error(typed(ctx), err);
    }
    fn handle_close_internal(&mut self, ctx: &dyn ContextInternal) {
        self.handle_close(typed(ctx));
    }
}

/// Recovers the typed context a handler was registered with.
fn typed<Rin: 'static, Rout: 'static, Win: 'static, Wout: 'static>(
    ctx: &dyn ContextInternal,
) -> &Context<Rin, Rout, Win, Wout> {
    match ctx.as_any().downcast_ref::<Context<Rin, Rout, Win, Wout>>() {
        Some(typed) => typed,
        None => panic!("context of {} does not match its handler's types", ctx.name()),
    }
}

/// A handler's view of its pipeline.
///
/// Links the handler to the stage above it and to the owning connection. The
/// connection link is a lookup handle, not an owner: [`Context::request_close`]
/// only raises a flag that the connection driver acts on once the current
/// dispatch returns.
pub struct Context<Rin, Rout, Win, Wout> {
    name: String,
    next: Option<(HandlerRef, ContextRef)>,
    signals: Option<Rc<PipelineSignals>>,
    phantom: PhantomData<(Rin, Rout, Win, Wout)>,
}

impl<Rin: 'static, Rout: 'static, Win: 'static, Wout: 'static> Context<Rin, Rout, Win, Wout> {
    /// Creates an unlinked context. The pipeline links it when the handler is added.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            next: None,
            signals: None,
            phantom: PhantomData,
        }
    }

    /// Name of the handler this context belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` on the stage above, or returns `None` at the end of the chain.
    fn dispatch<T>(
        &self,
        f: impl FnOnce(&mut dyn HandlerInternal, &dyn ContextInternal) -> T,
    ) -> Option<T> {
        let (handler, context) = self.next.as_ref()?;
        let mut handler = handler.borrow_mut();
        let context = context.borrow();
        Some(f(&mut *handler, &*context))
    }

    /// Passes `transport_active` up.
    pub fn fire_transport_active(&self) {
        self.dispatch(|next, ctx| next.transport_active_internal(ctx));
    }

    /// Passes `transport_inactive` up.
    pub fn fire_transport_inactive(&self) {
        self.dispatch(|next, ctx| next.transport_inactive_internal(ctx));
    }

    /// Passes an inbound message up.
    pub fn fire_handle_read(&self, msg: Rout) {
        if self
            .dispatch(|next, ctx| next.handle_read_internal(ctx, Box::new(msg)))
            .is_none()
        {
            warn!("inbound message dropped after {}", self.name);
        }
    }

    /// Passes the end of the current read batch up.
    pub fn fire_handle_read_complete(&self) {
        self.dispatch(|next, ctx| next.handle_read_complete_internal(ctx));
    }

    /// Pulls the next outbound message from the stage above.
    pub fn fire_poll_write(&self) -> Option<Win> {
        let Some(msg) = self.dispatch(|next, ctx| next.poll_write_internal(ctx)) else {
            warn!("nothing above {} to poll for writes", self.name);
            return None;
        };
        match msg?.downcast::<Win>() {
            Ok(msg) => Some(*msg),
            Err(_) => panic!("{} pulled an outbound message of the wrong type", self.name),
        }
    }

    /// Passes a timeout up.
    pub fn fire_handle_timeout(&self, now: Instant) {
        self.dispatch(|next, ctx| next.handle_timeout_internal(ctx, now));
    }

    /// Lets the stages above lower the next deadline.
    pub fn fire_poll_timeout(&self, eto: &mut Instant) {
        if self
            .dispatch(|next, ctx| next.poll_timeout_internal(ctx, eto))
            .is_none()
        {
            trace!("poll_timeout stops at {}", self.name);
        }
    }

    /// Passes EOF up.
    pub fn fire_handle_eof(&self) {
        if self
            .dispatch(|next, ctx| next.handle_eof_internal(ctx))
            .is_none()
        {
            warn!("eof dropped after {}", self.name);
        }
    }

    /// Passes an error up.
    pub fn fire_handle_error(&self, err: BoxError) {
        let Some((handler, context)) = self.next.as_ref() else {
            warn!("error dropped after {}: {}", self.name, err);
            return;
        };
        handler
            .borrow_mut()
            .handle_error_internal(&*context.borrow(), err);
    }

    /// Passes `handle_close` up.
    pub fn fire_handle_close(&self) {
        self.dispatch(|next, ctx| next.handle_close_internal(ctx));
    }

    /// Asks the owning connection to close once the current dispatch returns.
    ///
    /// Requesting close more than once is harmless.
    pub fn request_close(&self) {
        match &self.signals {
            Some(signals) => signals.request_close(),
            None => warn!("{} requested close outside of a pipeline", self.name),
        }
    }
}

impl<Rin: 'static, Rout: 'static, Win: 'static, Wout: 'static> ContextInternal
    for Context<Rin, Rout, Win, Wout>
{
    fn request_close_internal(&self) {
        self.request_close();
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn link(&mut self, next: Option<(HandlerRef, ContextRef)>, signals: Rc<PipelineSignals>) {
        self.next = next;
        self.signals = Some(signals);
    }
}
