/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;

use super::lifecycle::{ClientCore, Exchange};
use super::{ClientOptions, MAX_BODY_SIZE};
use crate::action::{Action, Encoded, Protocol, Request, UdpMode};
use crate::connection::UdpConnection;
use crate::result::Stage;
use crate::timeouts::read_timeout;
use crate::{ActionError, ActionResult, EngineContext};

/// Datagram client with send, receive and send-then-receive modes.
pub struct UdpClient {
    core: ClientCore<UdpConnection>,
}

impl UdpClient {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        let reset = options.reset_connections;
        UdpClient {
            core: ClientCore::new("udp", Protocol::Udp, ctx, options, move || {
                UdpConnection::new(reset)
            }),
        }
    }

    async fn reset_shared(&self) {}
}

#[async_trait]
impl Exchange for UdpClient {
    type Conn = UdpConnection;

    async fn exchange(
        &self,
        conn: &mut UdpConnection,
        action: &Action,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let (Encoded::Datagram(data), Request::Udp(req)) = (encoded, &action.request) else {
            return Err(ActionError::Protocol(format!(
                "{} request can not be sent over udp",
                action.protocol
            )));
        };
        let target = action.target()?;
        match conn.connect(&target.socket, self.core.timeouts.connect).await {
            Ok(true) => {
                self.core.stats.add_conn_attempt();
                self.core.stats.add_conn_success();
            }
            Ok(false) => {}
            Err(e) => {
                self.core.stats.add_conn_attempt();
                return Err(e);
            }
        }
        result.mark(Stage::ConnectEnd);

        if matches!(req.mode, UdpMode::Send | UdpMode::Bidirectional) {
            conn.send(data).await?;
            self.core.stats.add_write_bytes(data.len());
        }
        result.mark(Stage::WriteEnd);

        if matches!(req.mode, UdpMode::Receive | UdpMode::Bidirectional) {
            let read = self.core.timeouts.read;
            let body = match req.response_size {
                Some(size) => read_timeout(read, conn.read_exactly(size)).await?,
                None => {
                    read_timeout(read, conn.read_until(&req.delimiter, MAX_BODY_SIZE as usize))
                        .await?
                }
            };
            result.body = body;
            result.mark(Stage::ReadEnd);
        }
        Ok(())
    }

    async fn retire(&self, mut conn: UdpConnection) {
        conn.close();
    }
}

impl_client!(UdpClient);
