/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, header};
use log::debug;

use super::lifecycle::{ClientCore, Exchange};
use super::ws_frame::{OpCode, encode_frame, read_frame};
use super::{ClientOptions, MAX_BODY_SIZE, MAX_HEADER_SIZE};
use crate::action::{Action, Encoded, Protocol};
use crate::connection::TcpConnection;
use crate::result::Stage;
use crate::timeouts::read_timeout;
use crate::{ActionError, ActionResult, EngineContext};

const SWITCHING_PROTOCOLS: u16 = 101;

/// A pooled connection and the handshake that upgraded it.
pub struct WsConnection {
    tcp: TcpConnection,
    upgraded: Option<HeaderMap>,
}

impl WsConnection {
    fn new(reset: bool) -> Self {
        let mut tcp = TcpConnection::new(reset);
        tcp.set_keep_pending(true);
        WsConnection {
            tcp,
            upgraded: None,
        }
    }
}

/// WebSocket client. The upgraded connection stays in the pool, so later
/// actions to the same host exchange frames without a new handshake.
pub struct WebSocketClient {
    core: ClientCore<WsConnection>,
}

impl WebSocketClient {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        let reset = options.reset_connections;
        WebSocketClient {
            core: ClientCore::new("websocket", Protocol::WebSocket, ctx, options, move || {
                WsConnection::new(reset)
            }),
        }
    }

    async fn reset_shared(&self) {}

    async fn upgrade(&self, conn: &mut WsConnection, handshake: &Bytes) -> Result<(), ActionError> {
        conn.tcp.write_all(handshake).await?;
        conn.tcp.flush().await?;
        self.core.stats.add_write_bytes(handshake.len());

        let reader = conn.tcp.reader()?;
        let head = read_timeout(self.core.timeouts.read, reader.read_response_head(MAX_HEADER_SIZE))
            .await?;
        if head.code != SWITCHING_PROTOCOLS {
            return Err(ActionError::Protocol(format!(
                "websocket upgrade refused with status {}",
                head.code
            )));
        }
        let upgraded = head
            .headers
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        if !upgraded {
            return Err(ActionError::Protocol(
                "101 response without upgrade: websocket".to_string(),
            ));
        }
        conn.upgraded = Some(head.headers);
        Ok(())
    }

    /// Read frames until one complete data message or a close.
    async fn read_message(&self, conn: &mut WsConnection) -> Result<Bytes, ActionError> {
        let mut message = BytesMut::new();
        let mut in_message = false;
        loop {
            let frame = read_frame(conn.tcp.reader()?, MAX_BODY_SIZE).await?;
            match frame.opcode {
                OpCode::Ping => {
                    let mut buf = BytesMut::new();
                    encode_frame(OpCode::Pong, &frame.payload, &mut buf);
                    conn.tcp.write_all(&buf).await?;
                    conn.tcp.flush().await?;
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    let mut buf = BytesMut::new();
                    let code = frame.payload.get(..2).unwrap_or_default();
                    encode_frame(OpCode::Close, code, &mut buf);
                    let _ = conn.tcp.write_all(&buf).await;
                    let _ = conn.tcp.flush().await;
                    debug!("websocket closed by the server");
                    conn.upgraded = None;
                    conn.tcp.set_keep_alive(false);
                    return Ok(frame.payload);
                }
                OpCode::Text | OpCode::Binary => {
                    if in_message {
                        return Err(ActionError::Protocol(
                            "websocket data frame inside a fragmented message".to_string(),
                        ));
                    }
                    message.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return Ok(message.freeze());
                    }
                    in_message = true;
                }
                OpCode::Continuation => {
                    if !in_message {
                        return Err(ActionError::Protocol(
                            "websocket continuation without a message".to_string(),
                        ));
                    }
                    if message.len() as u64 + frame.payload.len() as u64 > MAX_BODY_SIZE {
                        return Err(ActionError::Protocol(
                            "websocket message too large".to_string(),
                        ));
                    }
                    message.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return Ok(message.freeze());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Exchange for WebSocketClient {
    type Conn = WsConnection;

    async fn exchange(
        &self,
        conn: &mut WsConnection,
        action: &Action,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let Encoded::WebSocket { handshake, data } = encoded else {
            return Err(ActionError::Protocol(format!(
                "{} request can not be sent over websocket",
                action.protocol
            )));
        };
        let target = action.target()?;
        let tls = target.tls.as_ref().and_then(|t| t.openssl()).map(|c| c.as_ref());
        match conn
            .tcp
            .connect(&target.url.host, &target.socket, tls, self.core.timeouts.connect)
            .await
        {
            Ok(true) => {
                self.core.stats.add_conn_attempt();
                self.core.stats.add_conn_success();
                conn.upgraded = None;
            }
            Ok(false) => {}
            Err(e) => {
                self.core.stats.add_conn_attempt();
                return Err(e);
            }
        }
        if conn.upgraded.is_none() {
            self.upgrade(conn, handshake).await?;
        }
        let upgrade_headers = conn.upgraded.clone().unwrap_or_default();
        result.mark(Stage::ConnectEnd);

        if let Some(data) = data {
            let opcode = if std::str::from_utf8(data).is_ok() {
                OpCode::Text
            } else {
                OpCode::Binary
            };
            let mut buf = BytesMut::new();
            encode_frame(opcode, data, &mut buf);
            conn.tcp.write_all(&buf).await?;
            conn.tcp.flush().await?;
            self.core.stats.add_write_bytes(buf.len());
        }
        result.mark(Stage::WriteEnd);

        let message = read_timeout(self.core.timeouts.read, self.read_message(conn)).await?;
        result.mark(Stage::ReadEnd);

        result.status = Some(SWITCHING_PROTOCOLS);
        result.headers = upgrade_headers;
        result.body = message;
        Ok(())
    }

    async fn retire(&self, mut conn: WsConnection) {
        if conn.upgraded.take().is_some() {
            let mut buf = BytesMut::new();
            encode_frame(OpCode::Close, &1000u16.to_be_bytes(), &mut buf);
            let _ = conn.tcp.write_all(&buf).await;
        }
        conn.tcp.close().await;
    }
}

impl_client!(WebSocketClient);
