use chanio::{Context, Error, Handler};
use chanio_transport::ByteBuffer;

/// UTF-8 codec between [`ByteBuffer`] and [`String`].
///
/// Each inbound buffer becomes one string; invalid UTF-8 fires
/// [`Error::CodecDecode`] instead.
#[derive(Default)]
pub struct StringCodec;

impl StringCodec {
    /// Creates a new string codec.
    pub fn new() -> Self {
        Self
    }
}

impl Handler for StringCodec {
    type Rin = ByteBuffer;
    type Rout = String;
    type Win = String;
    type Wout = ByteBuffer;

    fn name(&self) -> &str {
        "StringCodec"
    }

    fn handle_read(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) {
        match String::from_utf8(msg.into_bytes().to_vec()) {
            Ok(message) => ctx.fire_handle_read(message),
            Err(err) => ctx.fire_handle_error(Box::new(Error::CodecDecode(err.to_string()))),
        }
    }

    fn poll_write(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        ctx.fire_poll_write().map(ByteBuffer::from)
    }
}
