//! Ordered request pipeline.
//!
//! A [`Pipeline`] is a list of [`Handler`]s run in order for each inbound
//! request. Each handler either passes the request on ([`Flow::Continue`])
//! or claims it ([`Flow::Handled`]). Handlers declare the capabilities they
//! provide and require; [`PipelineBuilder::build`] rejects a chain in which a
//! requirement is not provided by an earlier handler.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::response::ResponseStream;
use crate::core::{CancelSource, CancelToken, GatewayError, Result};
use crate::transport::{Code, Endpoint, Message};

/// Capabilities a handler can provide to, or require from, earlier stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Confirmable requests are acknowledged automatically.
    AutoAck,
    /// Observe requests are registered with a publisher.
    Observe,
    /// Well-known discovery resources are served.
    WellKnown,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::AutoAck => "auto-ack",
            Capability::Observe => "observe",
            Capability::WellKnown => "well-known",
        };
        f.write_str(name)
    }
}

/// What the dispatcher does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next handler.
    Continue,
    /// Stop; the request has been handled.
    Handled,
}

/// One pipeline stage.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Name used in logs and configuration errors.
    fn name(&self) -> &'static str;

    /// Capabilities this handler adds for later stages.
    fn provides(&self) -> &[Capability] {
        &[]
    }

    /// Capabilities an earlier stage must provide.
    fn requires(&self) -> &[Capability] {
        &[]
    }

    /// Process a request.
    async fn invoke(&self, ctx: Arc<RequestContext>) -> Result<Flow>;
}

/// Per-request state handed to every handler.
pub struct RequestContext {
    endpoint: Arc<Endpoint>,
    request: Message,
    peer: SocketAddr,
    response: Arc<ResponseStream>,
    cancel: CancelSource,
    held: AtomicBool,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("peer", &self.peer)
            .field("path", &self.request.path)
            .field("held", &self.is_held())
            .finish()
    }
}

impl RequestContext {
    /// Create the context for `request` received from `peer`.
    pub fn new(endpoint: Arc<Endpoint>, request: Message, peer: SocketAddr) -> Self {
        let response = Arc::new(ResponseStream::new(Arc::clone(&endpoint), &request, peer));
        Self {
            endpoint,
            request,
            peer,
            response,
            cancel: CancelSource::new(),
            held: AtomicBool::new(false),
        }
    }

    /// The endpoint the request arrived on.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The request.
    pub fn request(&self) -> &Message {
        &self.request
    }

    /// The remote peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The response stream.
    pub fn response(&self) -> &Arc<ResponseStream> {
        &self.response
    }

    /// Cancellation source of this request.
    pub fn cancel_source(&self) -> &CancelSource {
        &self.cancel
    }

    /// Token that fires when the request is cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.token()
    }

    /// Keep the request open after the chain finishes, until it is cancelled.
    pub fn hold_open(&self) {
        self.held.store(true, Ordering::Release);
    }

    /// Check whether the request is held open.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Ordered, validated handler chain.
pub struct Pipeline {
    handlers: Vec<Arc<dyn Handler>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("Pipeline").field("handlers", &names).finish()
    }
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run `request` through the chain.
    ///
    /// Completes only after the handlers have finished and the request has
    /// been acknowledged; held requests complete when they are cancelled.
    pub async fn dispatch(&self, endpoint: Arc<Endpoint>, request: Message, peer: SocketAddr) {
        let ctx = Arc::new(RequestContext::new(endpoint, request, peer));
        let mut handled = false;

        for handler in &self.handlers {
            match handler.invoke(Arc::clone(&ctx)).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Handled) => {
                    handled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(handler = handler.name(), peer = %peer, error = %e, "handler failed");
                    respond_if_silent(&ctx, Code::INTERNAL_SERVER_ERROR);
                    handled = true;
                    break;
                }
            }
        }

        if !handled {
            let fallback = if ctx.is_held() {
                Code::CONTENT
            } else {
                Code::NOT_FOUND
            };
            respond_if_silent(&ctx, fallback);
        }

        if let Some(gate) = ctx.response().gate() {
            gate.acknowledged().await;
        }

        if ctx.is_held() {
            ctx.cancel_token().cancelled().await;
            tracing::debug!(peer = %peer, path = %ctx.request().path, "held request released");
        }
    }
}

fn respond_if_silent(ctx: &RequestContext, code: Code) {
    let response = ctx.response();
    if response.is_written() || response.is_ended() {
        return;
    }
    response.set_code(code);
    if let Err(e) = response.write(Vec::new()) {
        tracing::warn!(peer = %ctx.peer(), error = %e, "failed to send fallback response");
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    handlers: Vec<Arc<dyn Handler>>,
}

impl PipelineBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    pub fn handler<H: Handler>(self, handler: H) -> Self {
        self.shared(Arc::new(handler))
    }

    /// Append a shared handler.
    pub fn shared(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Validate capability dependencies and build.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] naming the first handler whose requirement
    /// is not provided by an earlier stage.
    pub fn build(self) -> Result<Pipeline> {
        let mut provided = HashSet::new();
        for handler in &self.handlers {
            if let Some(missing) = handler
                .requires()
                .iter()
                .find(|cap| !provided.contains(*cap))
            {
                return Err(GatewayError::Config(format!(
                    "handler `{}` requires capability `{}` earlier in the pipeline",
                    handler.name(),
                    missing
                )));
            }
            provided.extend(handler.provides().iter().copied());
        }
        Ok(Pipeline {
            handlers: self.handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::AutoAckHandler;
    use crate::transport::{ChannelTransport, Method, TimingParams};

    struct Needy;

    #[async_trait]
    impl Handler for Needy {
        fn name(&self) -> &'static str {
            "needy"
        }

        fn requires(&self) -> &[Capability] {
            &[Capability::AutoAck]
        }

        async fn invoke(&self, _ctx: Arc<RequestContext>) -> Result<Flow> {
            Ok(Flow::Continue)
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn invoke(&self, _ctx: Arc<RequestContext>) -> Result<Flow> {
            Err(GatewayError::Validation("boom".into()))
        }
    }

    #[test]
    fn test_missing_capability_rejected() {
        let result = Pipeline::builder().handler(Needy).build();
        match result {
            Err(GatewayError::Config(msg)) => assert!(msg.contains("needy")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_capability_order_matters() {
        assert!(
            Pipeline::builder()
                .handler(Needy)
                .handler(AutoAckHandler::default())
                .build()
                .is_err()
        );

        let pipeline = Pipeline::builder()
            .handler(AutoAckHandler::default())
            .handler(Needy)
            .build()
            .unwrap();
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn test_unhandled_request_gets_not_found() {
        let (transport, mut rx) = ChannelTransport::<Message>::new("127.0.0.1:5683".parse().unwrap());
        let endpoint = Endpoint::new(Arc::new(transport), TimingParams::default());
        let pipeline = Pipeline::builder().build().unwrap();

        let request = Message::request(Method::Get, "/nothing").with_token(vec![1]);
        pipeline
            .dispatch(endpoint, request, "127.0.0.1:40000".parse().unwrap())
            .await;

        let response = rx.try_recv().unwrap().payload;
        assert_eq!(response.code, Some(Code::NOT_FOUND));
        assert_eq!(response.token, vec![1]);
    }

    #[tokio::test]
    async fn test_handler_error_gets_server_error() {
        let (transport, mut rx) = ChannelTransport::<Message>::new("127.0.0.1:5683".parse().unwrap());
        let endpoint = Endpoint::new(Arc::new(transport), TimingParams::default());
        let pipeline = Pipeline::builder().handler(Failing).build().unwrap();

        pipeline
            .dispatch(
                endpoint,
                Message::request(Method::Get, "/x"),
                "127.0.0.1:40000".parse().unwrap(),
            )
            .await;

        let response = rx.try_recv().unwrap().payload;
        assert_eq!(response.code, Some(Code::INTERNAL_SERVER_ERROR));
    }
}
