use std::time::{Duration, Instant};

use bytes::BytesMut;
use chanio::{BoxError, Context, Error, Handler};
use chanio_codec::{HttpClientRequestPart, HttpClientResponsePart, HttpPart, HttpResponseHead};
use chanio_executor::GateSignal;
use log::{debug, trace, warn};

use crate::response::HttpResponse;

/// Terminal stage of an HTTP client pipeline.
///
/// Collects one response and hands it to the caller blocked on the matching
/// [`SyncGate`](chanio_executor::SyncGate). The gate is released exactly once:
/// with the response on `End`, or with the first failure (an inbound error,
/// a protocol violation, the connection ending early, or the response
/// timeout). Either way the stage then asks the connection to close.
pub struct HttpResponseHandler {
    signal: Option<GateSignal<HttpResponse>>,
    head: Option<HttpResponseHead>,
    body: BytesMut,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl HttpResponseHandler {
    /// Creates a handler that releases `signal` when the exchange finishes.
    pub fn new(signal: GateSignal<HttpResponse>) -> Self {
        Self {
            signal: Some(signal),
            head: None,
            body: BytesMut::new(),
            timeout: None,
            deadline: None,
        }
    }

    /// Fails the exchange with [`Error::Timeout`] if no complete response
    /// arrives within `timeout` of the connection becoming active.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn release(
        &mut self,
        ctx: &Context<HttpClientResponsePart, HttpClientResponsePart, HttpClientRequestPart, HttpClientRequestPart>,
        outcome: Result<HttpResponse, Error>,
    ) {
        match self.signal.take() {
            Some(signal) => {
                match &outcome {
                    Ok(response) => trace!("response complete: {}", response.status),
                    Err(err) => debug!("response failed: {}", err),
                }
                signal.release(outcome);
            }
            None => {
                if let Err(err) = outcome {
                    debug!("ignoring {} after the response was released", err);
                }
            }
        }
        self.deadline = None;
        ctx.request_close();
    }

    fn is_released(&self) -> bool {
        self.signal.is_none()
    }
}

impl Handler for HttpResponseHandler {
    type Rin = HttpClientResponsePart;
    type Rout = HttpClientResponsePart;
    type Win = HttpClientRequestPart;
    type Wout = HttpClientRequestPart;

    fn name(&self) -> &str {
        "HttpResponseHandler"
    }

    fn transport_active(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        if let Some(timeout) = self.timeout {
            self.deadline = Some(Instant::now() + timeout);
        }
        ctx.fire_transport_active();
    }

    fn transport_inactive(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        if !self.is_released() {
            self.release(ctx, Err(Error::PrematureClose));
        }
        ctx.fire_transport_inactive();
    }

    fn handle_read(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) {
        if self.is_released() {
            warn!("dropping response part after the exchange finished");
            return;
        }

        match msg {
            HttpPart::Head(head) => {
                if self.head.is_some() {
                    self.release(
                        ctx,
                        Err(Error::CodecDecode("second response head before end".to_string())),
                    );
                    return;
                }
                trace!("response head {} {:?}", head.status, head.version);
                self.head = Some(head);
            }
            HttpPart::Body(buf) => {
                if self.head.is_none() {
                    self.release(
                        ctx,
                        Err(Error::CodecDecode("response body before head".to_string())),
                    );
                    return;
                }
                self.body.extend_from_slice(buf.readable());
            }
            HttpPart::End(trailers) => match self.head.take() {
                Some(head) if head.status.is_informational() => {
                    // interim response, the final one follows on the same connection
                    trace!("skipping interim response {}", head.status);
                    self.body.clear();
                }
                Some(HttpResponseHead {
                    status,
                    version,
                    mut headers,
                }) => {
                    if let Some(trailers) = trailers {
                        for (name, value) in trailers.iter() {
                            headers.append(name.clone(), value.clone());
                        }
                    }
                    let body = std::mem::take(&mut self.body).freeze();
                    let response = HttpResponse::new(status, version, headers, body);
                    self.release(ctx, Ok(response));
                }
                None => {
                    self.release(
                        ctx,
                        Err(Error::CodecDecode("response end before head".to_string())),
                    );
                }
            },
        }
    }

    fn poll_write(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        ctx.fire_poll_write()
    }

    fn handle_timeout(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        now: Instant,
    ) {
        if let Some(deadline) = self.deadline {
            if deadline <= now && !self.is_released() {
                self.release(ctx, Err(Error::Timeout));
            }
        }
        ctx.fire_handle_timeout(now);
    }

    fn poll_timeout(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        eto: &mut Instant,
    ) {
        if let Some(deadline) = self.deadline {
            if deadline < *eto {
                *eto = deadline;
            }
        }
        ctx.fire_poll_timeout(eto);
    }

    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        if !self.is_released() {
            self.release(ctx, Err(Error::PrematureClose));
        }
        ctx.fire_handle_eof();
    }

    fn handle_error(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        err: BoxError,
    ) {
        self.release(ctx, Err(Error::from_boxed(err)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanio::{InboundPipeline, Pipeline};
    use chanio_executor::{sync_gate, SyncGate};
    use chanio_transport::ByteBuffer;
    use http::{HeaderMap, StatusCode, Version};
    use std::rc::Rc;

    fn pipeline(
        handler: HttpResponseHandler,
    ) -> Rc<Pipeline<HttpClientResponsePart, HttpClientRequestPart>> {
        let pipeline: Pipeline<HttpClientResponsePart, HttpClientRequestPart> = Pipeline::new();
        pipeline.add_last(handler).unwrap();
        pipeline.finalize()
    }

    fn handler() -> (HttpResponseHandler, SyncGate<HttpResponse>) {
        let (signal, gate) = sync_gate();
        (HttpResponseHandler::new(signal), gate)
    }

    fn head(status: StatusCode) -> HttpClientResponsePart {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        HttpPart::Head(HttpResponseHead {
            status,
            version: Version::HTTP_11,
            headers,
        })
    }

    #[test]
    fn test_complete_response() {
        let (handler, gate) = handler();
        let pipeline = pipeline(handler);

        pipeline.transport_active();
        pipeline.handle_read(head(StatusCode::OK));
        pipeline.handle_read(HttpPart::Body(ByteBuffer::from("hello ")));
        pipeline.handle_read(HttpPart::Body(ByteBuffer::from("world")));
        pipeline.handle_read(HttpPart::End(None));
        assert!(pipeline.take_close_request());

        // the connection going away afterwards changes nothing
        pipeline.handle_eof();
        pipeline.transport_inactive();

        let response = gate.wait().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_text(), Some("hello world"));
    }

    #[test]
    fn test_trailers_are_merged() {
        let (handler, gate) = handler();
        let pipeline = pipeline(handler);

        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc".parse().unwrap());
        pipeline.handle_read(head(StatusCode::OK));
        pipeline.handle_read(HttpPart::End(Some(trailers)));

        let response = gate.wait().unwrap();
        assert_eq!(response.headers.get("x-checksum").unwrap(), "abc");
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_interim_response_is_skipped() {
        let (handler, gate) = handler();
        let pipeline = pipeline(handler);

        pipeline.handle_read(head(StatusCode::CONTINUE));
        pipeline.handle_read(HttpPart::End(None));
        assert!(!pipeline.take_close_request());

        pipeline.handle_read(head(StatusCode::OK));
        pipeline.handle_read(HttpPart::Body(ByteBuffer::from("done")));
        pipeline.handle_read(HttpPart::End(None));
        assert!(pipeline.take_close_request());

        let response = gate.wait().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_text(), Some("done"));
    }

    #[test]
    fn test_eof_before_end_is_premature_close() {
        let (handler, gate) = handler();
        let pipeline = pipeline(handler);

        pipeline.handle_read(head(StatusCode::OK));
        pipeline.handle_eof();

        assert!(matches!(gate.wait(), Err(Error::PrematureClose)));
        assert!(pipeline.take_close_request());
    }

    #[test]
    fn test_inactive_before_any_part_is_premature_close() {
        let (handler, gate) = handler();
        let pipeline = pipeline(handler);

        pipeline.transport_active();
        pipeline.transport_inactive();

        assert!(matches!(gate.wait(), Err(Error::PrematureClose)));
    }

    #[test]
    fn test_error_is_released_with_its_kind() {
        let (handler, gate) = handler();
        let pipeline = pipeline(handler);

        pipeline.handle_error(Box::new(Error::TlsHandshake("bad certificate".to_string())));
        pipeline.handle_read(head(StatusCode::OK));

        assert!(matches!(gate.wait(), Err(Error::TlsHandshake(_))));
    }

    #[test]
    fn test_protocol_violations() {
        let (handler, gate) = handler();
        let pipeline = pipeline(handler);
        pipeline.handle_read(HttpPart::Body(ByteBuffer::from("orphan")));
        assert!(matches!(gate.wait(), Err(Error::CodecDecode(_))));

        let (handler, gate) = handler();
        let pipeline = pipeline(handler);
        pipeline.handle_read(head(StatusCode::OK));
        pipeline.handle_read(head(StatusCode::OK));
        assert!(matches!(gate.wait(), Err(Error::CodecDecode(_))));
    }

    #[test]
    fn test_response_timeout() {
        let (signal, gate) = sync_gate();
        let pipeline = pipeline(
            HttpResponseHandler::new(signal).with_timeout(Duration::from_millis(50)),
        );

        let now = Instant::now();
        pipeline.transport_active();
        let mut eto = now + Duration::from_secs(3600);
        pipeline.poll_timeout(&mut eto);
        assert!(eto <= now + Duration::from_secs(1));

        pipeline.handle_timeout(now);
        assert!(!pipeline.take_close_request());

        pipeline.handle_timeout(eto);
        assert!(matches!(gate.wait(), Err(Error::Timeout)));
        assert!(pipeline.take_close_request());
    }
}
