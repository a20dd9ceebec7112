/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::OnceCell;

use volley_resolver::SocketConfig;
use volley_tls::{ClientCertPair, TlsContext};

use crate::hooks::HookChain;
use crate::{ActionError, EndpointUrl, Timeouts};

mod request;
pub use request::{
    Body, CustomRequest, GraphqlRequest, GrpcRequest, HttpRequest, Request, UdpMode, UdpRequest,
    WebSocketRequest,
};

mod encode;
pub use encode::{Encoded, EncodedBody, encode_request};
pub(crate) use encode::{graphql_body, grpc_frame};

pub type ActionId = u64;

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

pub const DEFAULT_REDIRECTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Http2,
    Http3,
    WebSocket,
    Grpc,
    Graphql,
    GraphqlHttp2,
    Udp,
    Custom,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Http2 => "http2",
            Protocol::Http3 => "http3",
            Protocol::WebSocket => "websocket",
            Protocol::Grpc => "grpc",
            Protocol::Graphql => "graphql",
            Protocol::GraphqlHttp2 => "graphql-http2",
            Protocol::Udp => "udp",
            Protocol::Custom => "custom",
        }
    }

    pub(crate) fn transport(&self) -> volley_resolver::Transport {
        match self {
            Protocol::Http3 | Protocol::Udp => volley_resolver::Transport::Udp,
            _ => volley_resolver::Transport::Tcp,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: &str, value: &str) -> Self {
        Tag {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Where a prepared action goes: the parsed url, what it resolved to and
/// the TLS context to use on it.
#[derive(Clone)]
pub struct Target {
    pub url: EndpointUrl,
    pub socket: SocketConfig,
    pub tls: Option<TlsContext>,
}

/// A replayable description of one protocol exchange.
///
/// The target is resolved by the first `prepare` and the wire form is
/// encoded by the first `setup`; both are kept for every later execution.
#[derive(Clone)]
pub struct Action {
    pub id: ActionId,
    pub name: String,
    pub url: String,
    pub protocol: Protocol,
    pub request: Request,
    pub user: Option<String>,
    pub group: Option<String>,
    pub tags: Vec<Tag>,
    pub weight: f64,
    pub redirects: usize,
    pub hooks: HookChain,
    pub tls_cert: Option<ClientCertPair>,
    target: OnceCell<Arc<Target>>,
    encoded: OnceLock<Arc<Encoded>>,
}

impl Action {
    pub fn new(name: &str, url: &str, protocol: Protocol, request: Request) -> Self {
        Action {
            id: NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            url: url.to_string(),
            protocol,
            request,
            user: None,
            group: None,
            tags: Vec::new(),
            weight: 1.0,
            redirects: DEFAULT_REDIRECTS,
            hooks: HookChain::default(),
            tls_cert: None,
            target: OnceCell::new(),
            encoded: OnceLock::new(),
        }
    }

    pub fn http(name: &str, url: &str, request: HttpRequest) -> Self {
        Action::new(name, url, Protocol::Http, Request::Http(request))
    }

    pub fn http2(name: &str, url: &str, request: HttpRequest) -> Self {
        Action::new(name, url, Protocol::Http2, Request::Http(request))
    }

    pub fn http3(name: &str, url: &str, request: HttpRequest) -> Self {
        Action::new(name, url, Protocol::Http3, Request::Http(request))
    }

    pub fn graphql(name: &str, url: &str, request: GraphqlRequest) -> Self {
        Action::new(name, url, Protocol::Graphql, Request::Graphql(request))
    }

    pub fn graphql_h2(name: &str, url: &str, request: GraphqlRequest) -> Self {
        Action::new(name, url, Protocol::GraphqlHttp2, Request::Graphql(request))
    }

    pub fn grpc(name: &str, url: &str, request: GrpcRequest) -> Self {
        Action::new(name, url, Protocol::Grpc, Request::Grpc(request))
    }

    pub fn websocket(name: &str, url: &str, request: WebSocketRequest) -> Self {
        Action::new(name, url, Protocol::WebSocket, Request::WebSocket(request))
    }

    pub fn udp(name: &str, url: &str, request: UdpRequest) -> Self {
        Action::new(name, url, Protocol::Udp, Request::Udp(request))
    }

    pub fn custom(name: &str, url: &str, request: CustomRequest) -> Self {
        Action::new(name, url, Protocol::Custom, Request::Custom(request))
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_tag(mut self, name: &str, value: &str) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_redirects(mut self, redirects: usize) -> Self {
        self.redirects = redirects;
        self
    }

    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_cert(mut self, cert: ClientCertPair) -> Self {
        self.tls_cert = Some(cert);
        self
    }

    /// Name of the client that executes this action.
    pub fn client_name(&self) -> &str {
        match &self.request {
            Request::Custom(r) => &r.client,
            _ => self.protocol.as_str(),
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.target.initialized()
    }

    pub fn target(&self) -> Result<&Arc<Target>, ActionError> {
        self.target
            .get()
            .ok_or_else(|| ActionError::Resolution(format!("action {} is not prepared", self.name)))
    }

    /// Resolve the target once, the first caller does the work and
    /// concurrent callers wait for it.
    pub(crate) async fn target_or_init<F, Fut>(&self, init: F) -> Result<&Arc<Target>, ActionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Target>, ActionError>>,
    {
        self.target.get_or_try_init(init).await
    }

    pub fn encoded(&self) -> Option<&Arc<Encoded>> {
        self.encoded.get()
    }

    /// Encode the request for the wire. Only the first call encodes.
    pub fn setup(&self, timeouts: &Timeouts) -> Result<Arc<Encoded>, ActionError> {
        if let Some(e) = self.encoded.get() {
            return Ok(e.clone());
        }
        let target = self.target()?;
        let e = Arc::new(encode_request(
            &self.request,
            self.protocol,
            &target.url,
            timeouts.total,
        )?);
        Ok(self.encoded.get_or_init(|| e).clone())
    }

    /// Drop the encoded form so the next `setup` sees the current request.
    pub fn invalidate_encoding(&mut self) {
        self.encoded = OnceLock::new();
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("protocol", &self.protocol)
            .field("prepared", &self.is_prepared())
            .finish()
    }
}
