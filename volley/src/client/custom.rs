/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;

use super::lifecycle::{ClientCore, Exchange};
use super::ClientOptions;
use crate::action::{Action, Encoded, Protocol, Target};
use crate::result::Stage;
use crate::timeouts::{connect_timeout, read_timeout};
use crate::{ActionError, ActionResult, EngineContext};

/// What a custom exchange produced.
#[derive(Clone, Debug, Default)]
pub struct CustomResponse {
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A connection opened by a [`CustomHandler`].
#[async_trait]
pub trait CustomConnection: Send {
    async fn execute(&mut self, action: &Action, payload: &Bytes) -> anyhow::Result<CustomResponse>;

    async fn close(&mut self) {}
}

/// User supplied protocol. The engine drives it through the same
/// lifecycle as the built in clients.
#[async_trait]
pub trait CustomHandler: Send + Sync {
    async fn on_connect(&self, target: &Target) -> anyhow::Result<Box<dyn CustomConnection>>;
}

type Slot = Option<Box<dyn CustomConnection>>;

pub struct CustomClient {
    core: ClientCore<Slot>,
    handler: Arc<dyn CustomHandler>,
}

impl CustomClient {
    pub fn new(
        name: &str,
        handler: Arc<dyn CustomHandler>,
        ctx: EngineContext,
        options: ClientOptions,
    ) -> Self {
        CustomClient {
            core: ClientCore::new(name, Protocol::Custom, ctx, options, || None),
            handler,
        }
    }

    async fn reset_shared(&self) {}
}

#[async_trait]
impl Exchange for CustomClient {
    type Conn = Slot;

    async fn exchange(
        &self,
        slot: &mut Slot,
        action: &Action,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let Encoded::Opaque(payload) = encoded else {
            return Err(ActionError::Protocol(format!(
                "{} request given to custom client {}",
                action.protocol, self.core.name
            )));
        };
        let conn = match slot.take() {
            Some(conn) => conn,
            None => {
                let target = action.target()?;
                self.core.stats.add_conn_attempt();
                let conn = connect_timeout(self.core.timeouts.connect, async {
                    self.handler
                        .on_connect(target)
                        .await
                        .map_err(|e| ActionError::Connect(format!("{e:#}")))
                })
                .await?;
                self.core.stats.add_conn_success();
                conn
            }
        };
        let conn = slot.insert(conn);
        result.mark(Stage::ConnectEnd);
        result.mark(Stage::WriteEnd);

        let rsp = read_timeout(self.core.timeouts.read, async {
            conn.execute(action, payload)
                .await
                .map_err(|e| ActionError::User(format!("{e:#}")))
        })
        .await?;
        self.core.stats.add_write_bytes(payload.len());
        result.mark(Stage::ReadEnd);

        result.status = rsp.status;
        result.headers = rsp.headers;
        result.body = rsp.body;
        Ok(())
    }

    async fn retire(&self, slot: Slot) {
        if let Some(mut conn) = slot {
            conn.close().await;
        }
    }
}

impl_client!(CustomClient);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio_util::sync::CancellationToken;

    use crate::Timeouts;
    use crate::action::CustomRequest;
    use crate::client::{Client, ClientSet};

    struct Echo {
        connects: AtomicUsize,
    }

    struct EchoConnection;

    #[async_trait]
    impl CustomConnection for EchoConnection {
        async fn execute(
            &mut self,
            action: &Action,
            payload: &Bytes,
        ) -> anyhow::Result<CustomResponse> {
            if payload.as_ref() == b"fail" {
                anyhow::bail!("refused by handler");
            }
            Ok(CustomResponse {
                status: Some(200),
                headers: HeaderMap::new(),
                body: Bytes::from(format!("{}:{}", action.name, String::from_utf8_lossy(payload))),
            })
        }
    }

    #[async_trait]
    impl CustomHandler for Echo {
        async fn on_connect(&self, _target: &Target) -> anyhow::Result<Box<dyn CustomConnection>> {
            self.connects.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(EchoConnection))
        }
    }

    fn action(name: &str, addr: std::net::SocketAddr, payload: &'static str) -> Action {
        Action::custom(
            name,
            &format!("echo://{addr}"),
            CustomRequest {
                client: "echo".to_string(),
                method: "CALL".to_string(),
                payload: Bytes::from_static(payload.as_bytes()),
            },
        )
    }

    #[tokio::test]
    async fn connect_once_and_fail_as_user_error() {
        // only used for its address
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let handler = Arc::new(Echo {
            connects: AtomicUsize::new(0),
        });
        let options = ClientOptions {
            pool_size: 1,
            timeouts: Timeouts::new(
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ),
            reset_connections: false,
        };
        let mut set = ClientSet::new();
        set.register(Arc::new(CustomClient::new(
            "echo",
            handler.clone(),
            EngineContext::default(),
            options,
        )));

        let ok = action("first", addr, "hello");
        let client = set.for_action(&ok).unwrap();
        client.prepare(&ok).await.unwrap();
        let result = client.execute(&ok, &CancellationToken::new()).await;
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(result.body.as_ref(), b"first:hello");
        let result = client.execute(&ok, &CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(handler.connects.load(Ordering::Relaxed), 1);

        let bad = action("second", addr, "fail");
        client.prepare(&bad).await.unwrap();
        let result = client.execute(&bad, &CancellationToken::new()).await;
        assert_eq!(
            result.error,
            Some(ActionError::User("refused by handler".to_string()))
        );
        assert_eq!(result.status, None);
    }
}
