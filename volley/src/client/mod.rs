/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex};

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

use volley_resolver::Transport;
use volley_tls::{ClientCertPair, TlsProtocol};

use crate::action::{Action, Protocol, Target};
use crate::config::PersonaConfig;
use crate::stats::ClientRuntimeStats;
use crate::{ActionError, ActionResult, EndpointUrl, EngineContext, Timeouts};

/// Implement [`Client`] for a type holding a `core` and implementing
/// `Exchange` on it.
macro_rules! impl_client {
    ($t:ty) => {
        #[async_trait::async_trait]
        impl $crate::client::Client for $t {
            fn name(&self) -> &str {
                &self.core.name
            }

            fn protocol(&self) -> $crate::action::Protocol {
                self.core.protocol
            }

            fn stats(&self) -> &std::sync::Arc<$crate::stats::ClientRuntimeStats> {
                &self.core.stats
            }

            fn pool_size(&self) -> usize {
                self.core.pool.size()
            }

            async fn prepare(
                &self,
                action: &$crate::action::Action,
            ) -> Result<(), $crate::ActionError> {
                $crate::client::prepare_action(&self.core, action).await
            }

            async fn execute(
                &self,
                action: &$crate::action::Action,
                cancel: &tokio_util::sync::CancellationToken,
            ) -> $crate::ActionResult {
                self.core.execute(self, action, cancel).await
            }

            async fn ensure_capacity(&self, n: usize) {
                self.core.pool.ensure_capacity(n).await;
            }

            async fn shrink(&self, k: usize) {
                self.core.shrink(self, k).await;
            }

            async fn reset_connections(&self) {
                self.reset_shared().await;
                self.core.reset_connections(self).await;
            }

            async fn close(&self) {
                self.reset_shared().await;
                self.core.reset_connections(self).await;
            }
        }
    };
}

/// Implement [`Client`] for a wrapper by forwarding to its `inner` client.
macro_rules! delegate_client {
    ($t:ty) => {
        #[async_trait::async_trait]
        impl $crate::client::Client for $t {
            fn name(&self) -> &str {
                self.inner.name()
            }

            fn protocol(&self) -> $crate::action::Protocol {
                self.inner.protocol()
            }

            fn stats(&self) -> &std::sync::Arc<$crate::stats::ClientRuntimeStats> {
                self.inner.stats()
            }

            fn pool_size(&self) -> usize {
                self.inner.pool_size()
            }

            async fn prepare(
                &self,
                action: &$crate::action::Action,
            ) -> Result<(), $crate::ActionError> {
                self.inner.prepare(action).await
            }

            async fn execute(
                &self,
                action: &$crate::action::Action,
                cancel: &tokio_util::sync::CancellationToken,
            ) -> $crate::ActionResult {
                self.inner.execute(action, cancel).await
            }

            async fn ensure_capacity(&self, n: usize) {
                self.inner.ensure_capacity(n).await;
            }

            async fn shrink(&self, k: usize) {
                self.inner.shrink(k).await;
            }

            async fn reset_connections(&self) {
                self.inner.reset_connections().await;
            }

            async fn close(&self) {
                self.inner.close().await;
            }
        }
    };
}

mod lifecycle;
use lifecycle::ClientCore;

mod http1;
pub use http1::HttpClient;

mod http2;
pub use http2::Http2Client;

mod http3;
pub use http3::Http3Client;

mod ws_frame;

mod websocket;
pub use websocket::WebSocketClient;

mod grpc;
pub use grpc::GrpcClient;

mod graphql;
pub use graphql::{GraphqlClient, GraphqlHttp2Client};

mod udp;
pub use udp::UdpClient;

mod custom;
pub use custom::{CustomClient, CustomConnection, CustomHandler, CustomResponse};

/// Names of the clients registered by [`ClientSet::with_defaults`].
pub const PROTOCOL_NAMES: &[&str] = &[
    "http",
    "http2",
    "http3",
    "websocket",
    "grpc",
    "graphql",
    "graphql-http2",
    "udp",
];

/// Largest accepted response header section.
pub(crate) const MAX_HEADER_SIZE: usize = 64 * 1024;
/// Largest accepted response body.
pub(crate) const MAX_BODY_SIZE: u64 = 64 << 20;

#[derive(Clone, Copy, Debug)]
pub struct ClientOptions {
    pub pool_size: usize,
    pub timeouts: Timeouts,
    /// Open a new connection for every action.
    pub reset_connections: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            pool_size: 1,
            timeouts: Timeouts::default(),
            reset_connections: false,
        }
    }
}

impl From<&PersonaConfig> for ClientOptions {
    fn from(config: &PersonaConfig) -> Self {
        ClientOptions {
            pool_size: config.batch_size.max(1),
            timeouts: config.timeouts(),
            reset_connections: config.reset_connections,
        }
    }
}

/// Executor of one wire protocol.
#[async_trait]
pub trait Client: Send + Sync {
    fn name(&self) -> &str;

    fn protocol(&self) -> Protocol;

    fn stats(&self) -> &Arc<ClientRuntimeStats>;

    fn pool_size(&self) -> usize;

    /// Resolve the target of `action` and encode its request. Later calls
    /// on the same action do nothing.
    async fn prepare(&self, action: &Action) -> Result<(), ActionError>;

    /// Run `action` once. Failures are reported on the result.
    async fn execute(&self, action: &Action, cancel: &CancellationToken) -> ActionResult;

    /// Grow the pool to at least `n` connections.
    async fn ensure_capacity(&self, n: usize);

    /// Retire `k` connections once they are idle.
    async fn shrink(&self, k: usize);

    /// Close every idle connection, keeping the pool size.
    async fn reset_connections(&self);

    async fn close(&self);
}

/// Resolve `url` into a target, picking the TLS context the scheme needs.
pub(crate) async fn resolve_target(
    ctx: &EngineContext,
    url: EndpointUrl,
    transport: Transport,
    tls: Option<TlsProtocol>,
    cert: Option<&ClientCertPair>,
    timeouts: &Timeouts,
) -> Result<Arc<Target>, ActionError> {
    let key = url.resolve_key(transport);
    let socket = ctx.dns.lookup(&key, timeouts.connect).await?;
    let tls = match tls {
        Some(protocol) => Some(ctx.tls.get(protocol, cert)?),
        None => None,
    };
    Ok(Arc::new(Target { url, socket, tls }))
}

/// TLS preset for an url of a client speaking `protocol`.
pub(crate) fn tls_protocol_for(protocol: Protocol, url: &EndpointUrl) -> Option<TlsProtocol> {
    match protocol {
        Protocol::Http3 => Some(TlsProtocol::Quic),
        Protocol::Udp | Protocol::Custom => None,
        Protocol::Http2 | Protocol::Grpc | Protocol::GraphqlHttp2 => {
            url.is_ssl.then_some(TlsProtocol::Http2)
        }
        Protocol::Http | Protocol::Graphql | Protocol::WebSocket => {
            url.is_ssl.then_some(TlsProtocol::Default)
        }
    }
}

/// Names of the actions a client has prepared.
#[derive(Default)]
pub(crate) struct PreparedSet {
    names: Mutex<AHashSet<String>>,
}

impl PreparedSet {
    pub(crate) fn insert(&self, name: &str) -> bool {
        let mut names = match self.names.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        names.insert(name.to_string())
    }

    pub(crate) fn len(&self) -> usize {
        match self.names.lock() {
            Ok(g) => g.len(),
            Err(p) => p.into_inner().len(),
        }
    }
}

/// Shared prepare step: resolve once, attach TLS, encode once.
pub(crate) async fn prepare_action<C: Send>(
    core: &ClientCore<C>,
    action: &Action,
) -> Result<(), ActionError> {
    if action.protocol != core.protocol {
        return Err(ActionError::Protocol(format!(
            "{} action given to the {} client",
            action.protocol, core.name
        )));
    }
    let ctx = &core.ctx;
    let timeouts = core.timeouts;
    action
        .target_or_init(|| async {
            let url = EndpointUrl::parse(&action.url)?;
            let tls = tls_protocol_for(action.protocol, &url);
            resolve_target(
                ctx,
                url,
                action.protocol.transport(),
                tls,
                action.tls_cert.as_ref(),
                &timeouts,
            )
            .await
        })
        .await?;
    action.setup(&timeouts)?;
    if core.prepared.insert(&action.name) {
        debug!("{} client prepared action {}", core.name, action.name);
    }
    Ok(())
}

/// Clients by name. Actions pick theirs with [`Action::client_name`].
#[derive(Default)]
pub struct ClientSet {
    clients: AHashMap<String, Arc<dyn Client>>,
}

impl ClientSet {
    pub fn new() -> Self {
        ClientSet::default()
    }

    /// Every built in protocol client.
    pub fn with_defaults(ctx: &EngineContext, options: ClientOptions) -> Self {
        let mut set = ClientSet::new();
        set.register(Arc::new(HttpClient::new(ctx.clone(), options)));
        set.register(Arc::new(Http2Client::new(ctx.clone(), options)));
        set.register(Arc::new(Http3Client::new(ctx.clone(), options)));
        set.register(Arc::new(WebSocketClient::new(ctx.clone(), options)));
        set.register(Arc::new(GrpcClient::new(ctx.clone(), options)));
        set.register(Arc::new(GraphqlClient::new(ctx.clone(), options)));
        set.register(Arc::new(GraphqlHttp2Client::new(ctx.clone(), options)));
        set.register(Arc::new(UdpClient::new(ctx.clone(), options)));
        set
    }

    pub fn register(&mut self, client: Arc<dyn Client>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Client>> {
        self.clients.get(name)
    }

    pub fn for_action(&self, action: &Action) -> Result<&Arc<dyn Client>, ActionError> {
        self.get(action.client_name()).ok_or_else(|| {
            ActionError::Protocol(format!("no client named {}", action.client_name()))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Client>> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub async fn close_all(&self) {
        for client in self.clients.values() {
            client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_config() {
        let config = PersonaConfig {
            batch_size: 8,
            reset_connections: true,
            ..Default::default()
        };
        let options = ClientOptions::from(&config);
        assert_eq!(options.pool_size, 8);
        assert!(options.reset_connections);

        let config = PersonaConfig {
            batch_size: 0,
            ..Default::default()
        };
        let options = ClientOptions::from(&config);
        assert_eq!(options.pool_size, 1);
        assert!(!options.reset_connections);
    }
}
