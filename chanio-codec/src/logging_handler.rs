use std::fmt::Debug;
use std::marker::PhantomData;

use chanio::{BoxError, Context, Handler};
use log::debug;

/// Pass-through stage that logs what crosses it at `debug!`.
///
/// `R` is the inbound message type and `W` the outbound one. Every event is
/// forwarded unchanged, so the stage can sit anywhere in a pipeline. Give each
/// instance its own name when a pipeline carries more than one.
pub struct LoggingHandler<R, W> {
    name: String,
    phantom: PhantomData<(R, W)>,
}

impl<R, W> LoggingHandler<R, W> {
    /// Creates a logging stage named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phantom: PhantomData,
        }
    }
}

impl<R: Debug + 'static, W: Debug + 'static> Handler for LoggingHandler<R, W> {
    type Rin = R;
    type Rout = R;
    type Win = W;
    type Wout = W;

    fn name(&self) -> &str {
        &self.name
    }

    fn transport_active(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        debug!("[{}] transport active", self.name);
        ctx.fire_transport_active();
    }

    fn transport_inactive(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        debug!("[{}] transport inactive", self.name);
        ctx.fire_transport_inactive();
    }

    fn handle_read(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) {
        debug!("[{}] read {:?}", self.name, msg);
        ctx.fire_handle_read(msg);
    }

    fn poll_write(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        let msg = ctx.fire_poll_write();
        if let Some(msg) = &msg {
            debug!("[{}] write {:?}", self.name, msg);
        }
        msg
    }

    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        debug!("[{}] eof", self.name);
        ctx.fire_handle_eof();
    }

    fn handle_error(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        err: BoxError,
    ) {
        debug!("[{}] error {}", self.name, err);
        ctx.fire_handle_error(err);
    }

    fn handle_close(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        debug!("[{}] close", self.name);
        ctx.fire_handle_close();
    }
}
