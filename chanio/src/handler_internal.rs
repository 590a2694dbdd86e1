use std::any::Any;
use std::rc::Rc;
use std::time::Instant;

use crate::error::BoxError;
use crate::pipeline_internal::{ContextRef, HandlerRef, PipelineSignals};

/// Type-erased [`Handler`](crate::Handler) as stored in a pipeline.
#[doc(hidden)]
pub trait HandlerInternal {
    fn transport_active_internal(&mut self, ctx: &dyn ContextInternal);
    fn transport_inactive_internal(&mut self, ctx: &dyn ContextInternal);

    fn handle_read_internal(&mut self, ctx: &dyn ContextInternal, msg: Box<dyn Any>);
    fn handle_read_complete_internal(&mut self, ctx: &dyn ContextInternal);
    fn poll_write_internal(&mut self, ctx: &dyn ContextInternal) -> Option<Box<dyn Any>>;
    fn has_pending_write_internal(&self) -> bool;

    fn handle_timeout_internal(&mut self, ctx: &dyn ContextInternal, now: Instant);
    fn poll_timeout_internal(&mut self, ctx: &dyn ContextInternal, eto: &mut Instant);

    fn handle_eof_internal(&mut self, ctx: &dyn ContextInternal);
    fn handle_error_internal(&mut self, ctx: &dyn ContextInternal, err: BoxError);
    fn handle_close_internal(&mut self, ctx: &dyn ContextInternal);
}

/// Type-erased [`Context`](crate::Context).
#[doc(hidden)]
pub trait ContextInternal {
    fn request_close_internal(&self);

    fn name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;

    /// Points the context at the stage above it (`None` for the last stage).
    fn link(&mut self, next: Option<(HandlerRef, ContextRef)>, signals: Rc<PipelineSignals>);
}
