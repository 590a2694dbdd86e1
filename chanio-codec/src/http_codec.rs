use bytes::BytesMut;
use chanio::{Context, Handler};
use chanio_transport::ByteBuffer;
use log::{trace, warn};
use tokio_util::codec::{Decoder, Encoder};

use crate::http_decoder::ResponseDecoder;
use crate::http_encoder::RequestEncoder;
use crate::http_message::{HttpClientRequestPart, HttpClientResponsePart, HttpPart};

/// HTTP/1.1 client codec stage.
///
/// Inbound it turns bytes into [`HttpClientResponsePart`]s; outbound it turns
/// [`HttpClientRequestPart`]s into bytes. A malformed response fires
/// [`Error::CodecDecode`](chanio::Error::CodecDecode) and the stage ignores
/// the rest of the stream. End of stream inside a framed body fires
/// [`Error::PrematureClose`](chanio::Error::PrematureClose).
pub struct HttpClientCodec {
    decoder: ResponseDecoder,
    encoder: RequestEncoder,
    inbound: BytesMut,
}

impl Default for HttpClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientCodec {
    /// Creates a codec with no request in flight.
    pub fn new() -> Self {
        Self {
            decoder: ResponseDecoder::new(),
            encoder: RequestEncoder::new(),
            inbound: BytesMut::new(),
        }
    }

    fn fire_decoded(
        &mut self,
        ctx: &Context<ByteBuffer, HttpClientResponsePart, HttpClientRequestPart, ByteBuffer>,
        eof: bool,
    ) {
        loop {
            let res = if eof {
                self.decoder.decode_eof(&mut self.inbound)
            } else {
                self.decoder.decode(&mut self.inbound)
            };
            match res {
                Ok(Some(part)) => ctx.fire_handle_read(part),
                Ok(None) => break,
                Err(err) => {
                    ctx.fire_handle_error(Box::new(err));
                    break;
                }
            }
        }
    }
}

impl Handler for HttpClientCodec {
    type Rin = ByteBuffer;
    type Rout = HttpClientResponsePart;
    type Win = HttpClientRequestPart;
    type Wout = ByteBuffer;

    fn name(&self) -> &str {
        "HttpClientCodec"
    }

    fn handle_read(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) {
        if self.decoder.is_failed() {
            trace!("dropping {} bytes after a decode error", msg.readable_bytes());
            return;
        }
        self.inbound.extend_from_slice(msg.readable());
        self.fire_decoded(ctx, false);
    }

    fn poll_write(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        let mut dst = BytesMut::new();
        while let Some(part) = ctx.fire_poll_write() {
            if let HttpPart::Head(head) = &part {
                self.decoder.expect_response(head.method.clone());
            }
            if let Err(err) = self.encoder.encode(part, &mut dst) {
                warn!("failed to encode request: {}", err);
                ctx.fire_handle_error(Box::new(err));
            }
        }

        if dst.is_empty() {
            None
        } else {
            Some(ByteBuffer::from(dst))
        }
    }

    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        self.fire_decoded(ctx, true);
        ctx.fire_handle_eof();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanio::{BoxError, InboundPipeline, OutboundPipeline, Pipeline};
    use http::{Method, StatusCode};
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::http_message::HttpRequestHead;

    #[derive(Default)]
    struct Recorder {
        parts: Rc<RefCell<Vec<HttpClientResponsePart>>>,
        errors: Rc<RefCell<Vec<BoxError>>>,
    }

    impl Handler for Recorder {
        type Rin = HttpClientResponsePart;
        type Rout = HttpClientResponsePart;
        type Win = HttpClientRequestPart;
        type Wout = HttpClientRequestPart;

        fn name(&self) -> &str {
            "Recorder"
        }

        fn handle_read(
            &mut self,
            _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
            msg: Self::Rin,
        ) {
            self.parts.borrow_mut().push(msg);
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
            self.errors.borrow_mut().push(err);
        }
    }

    fn pipeline(
        recorder: Recorder,
    ) -> Rc<Pipeline<ByteBuffer, HttpClientRequestPart>> {
        let pipeline: Pipeline<ByteBuffer, HttpClientRequestPart> = Pipeline::new();
        pipeline.add_last(HttpClientCodec::new()).unwrap();
        pipeline.add_last(recorder).unwrap();
        pipeline.finalize()
    }

    #[test]
    fn test_request_then_response() {
        let recorder = Recorder::default();
        let parts = Rc::clone(&recorder.parts);
        let pipeline = pipeline(recorder);

        pipeline.write(HttpPart::Head(HttpRequestHead::new(Method::HEAD, "/")));
        pipeline.write(HttpPart::End(None));
        let out = pipeline.poll_write().unwrap();
        assert_eq!(out.readable(), b"HEAD / HTTP/1.1\r\n\r\n");
        assert!(pipeline.poll_write().is_none());

        pipeline.handle_read(ByteBuffer::from("HTTP/1.1 200 OK\r\nContent-"));
        assert!(parts.borrow().is_empty());
        pipeline.handle_read(ByteBuffer::from("Length: 42\r\n\r\n"));

        let parts = parts.borrow();
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            HttpPart::Head(head) => assert_eq!(head.status, StatusCode::OK),
            part => panic!("expected head, got {:?}", part),
        }
        assert_eq!(parts[1], HttpPart::End(None));
    }

    #[test]
    fn test_eof_mid_body_fires_premature_close() {
        let recorder = Recorder::default();
        let errors = Rc::clone(&recorder.errors);
        let pipeline = pipeline(recorder);

        pipeline.write(HttpPart::Head(HttpRequestHead::new(Method::GET, "/")));
        pipeline.write(HttpPart::End(None));
        pipeline.poll_write();

        pipeline.handle_read(ByteBuffer::from(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhe",
        ));
        pipeline.handle_eof();

        let errors = errors.borrow();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].downcast_ref::<chanio::Error>(),
            Some(chanio::Error::PrematureClose)
        ));
    }

    #[test]
    fn test_malformed_response_fires_codec_error_once() {
        let recorder = Recorder::default();
        let errors = Rc::clone(&recorder.errors);
        let parts = Rc::clone(&recorder.parts);
        let pipeline = pipeline(recorder);

        pipeline.handle_read(ByteBuffer::from("NOT HTTP AT ALL\r\n\r\n"));
        pipeline.handle_read(ByteBuffer::from("HTTP/1.1 200 OK\r\n\r\n"));
        pipeline.handle_eof();

        assert!(parts.borrow().is_empty());
        let errors = errors.borrow();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].downcast_ref::<chanio::Error>(),
            Some(chanio::Error::CodecDecode(_))
        ));
    }
}
