/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{Version, header};
use log::debug;

use volley_http::{HttpBodyType, LAST_CHUNK, SetCookie, encode_chunk};

use super::lifecycle::{ClientCore, Exchange};
use super::{
    ClientOptions, MAX_BODY_SIZE, MAX_HEADER_SIZE, resolve_target, tls_protocol_for,
};
use crate::action::{Action, Encoded, EncodedBody, Protocol, Target, encode_request};
use crate::connection::TcpConnection;
use crate::result::Stage;
use crate::timeouts::read_timeout;
use crate::{ActionError, ActionResult, EngineContext};

/// HTTP/1.1 over TCP or TLS, one request at a time per connection.
pub struct HttpClient {
    core: ClientCore<TcpConnection>,
}

impl HttpClient {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        HttpClient::with_protocol("http", Protocol::Http, ctx, options)
    }

    pub(crate) fn with_protocol(
        name: &str,
        protocol: Protocol,
        ctx: EngineContext,
        options: ClientOptions,
    ) -> Self {
        let reset = options.reset_connections;
        HttpClient {
            core: ClientCore::new(name, protocol, ctx, options, move || {
                TcpConnection::new(reset)
            }),
        }
    }

    /// Plain connections share nothing outside the pool.
    async fn reset_shared(&self) {}

    async fn send_one(
        &self,
        conn: &mut TcpConnection,
        target: &Target,
        head: &Bytes,
        body: &EncodedBody,
        is_head: bool,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let tls = target.tls.as_ref().and_then(|t| t.openssl()).map(|c| c.as_ref());
        let connected = conn
            .connect(&target.url.host, &target.socket, tls, self.core.timeouts.connect)
            .await;
        match connected {
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

        let mut written = head.len();
        conn.write_all(head).await?;
        match body {
            EncodedBody::Empty => {}
            EncodedBody::Full(data) => {
                written += data.len();
                conn.write_all(data).await?;
            }
            EncodedBody::Chunked(chunks) => {
                let mut buf = BytesMut::new();
                for chunk in chunks {
                    encode_chunk(chunk, &mut buf);
                }
                buf.extend_from_slice(LAST_CHUNK);
                written += buf.len();
                conn.write_all(&buf).await?;
            }
        }
        conn.flush().await?;
        self.core.stats.add_write_bytes(written);
        result.mark(Stage::WriteEnd);

        let read = self.core.timeouts.read;
        let reader = conn.reader()?;
        let mut rsp = read_timeout(read, reader.read_response_head(MAX_HEADER_SIZE)).await?;
        while (100..200).contains(&rsp.code) && rsp.code != 101 {
            rsp = read_timeout(read, reader.read_response_head(MAX_HEADER_SIZE)).await?;
        }
        let body_type = HttpBodyType::detect(rsp.code, is_head, &rsp.headers)?;
        let data = read_timeout(read, reader.read_body(body_type, MAX_BODY_SIZE)).await?;
        result.mark(Stage::ReadEnd);

        let close = rsp.version == Version::HTTP_10
            || rsp
                .headers
                .get(header::CONNECTION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        conn.set_keep_alive(!close);

        result.status = Some(rsp.code);
        result.cookies = SetCookie::collect(&rsp.headers);
        result.headers = rsp.headers;
        result.body = data;
        Ok(())
    }

    /// Target of the next hop, resolving again when the origin changes.
    async fn redirect_target(
        &self,
        action: &Action,
        current: &Arc<Target>,
        location: &str,
    ) -> Result<Arc<Target>, ActionError> {
        let url = current.url.join(location)?;
        if url.same_origin(&current.url) {
            return Ok(Arc::new(Target {
                url,
                socket: current.socket,
                tls: current.tls.clone(),
            }));
        }
        if url.is_ssl && !current.url.is_ssl {
            debug!("redirect of {} upgrades to tls at {}", action.name, url.authority);
        }
        let tls = tls_protocol_for(action.protocol, &url);
        resolve_target(
            &self.core.ctx,
            url,
            action.protocol.transport(),
            tls,
            action.tls_cert.as_ref(),
            &self.core.timeouts,
        )
        .await
    }
}

#[async_trait]
impl Exchange for HttpClient {
    type Conn = TcpConnection;

    async fn exchange(
        &self,
        conn: &mut TcpConnection,
        action: &Action,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let Encoded::Http1 {
            head,
            body,
            is_head,
        } = encoded
        else {
            return Err(ActionError::Protocol(format!(
                "{} request can not be sent over http/1.1",
                action.protocol
            )));
        };

        let mut target = action.target()?.clone();
        let mut head = head.clone();
        let mut hops = 0;
        loop {
            self.send_one(conn, &target, &head, body, *is_head, result)
                .await?;
            let status = result.status.unwrap_or_default();
            if !(300..400).contains(&status) || hops >= action.redirects {
                return Ok(());
            }
            let Some(location) = result
                .headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
            else {
                return Ok(());
            };

            target = self.redirect_target(action, &target, &location).await?;
            let next = encode_request(
                &action.request,
                action.protocol,
                &target.url,
                self.core.timeouts.total,
            )?;
            let Encoded::Http1 { head: next, .. } = next else {
                return Ok(());
            };
            head = next;
            hops += 1;
            debug!("{} follows redirect {hops} to {location}", action.name);
            result.clear_response();
        }
    }

    async fn retire(&self, mut conn: TcpConnection) {
        conn.close().await;
    }
}

impl_client!(HttpClient);

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use crate::Timeouts;
    use crate::action::HttpRequest;
    use crate::client::Client;

    async fn serve_once(listener: TcpListener, response: &'static [u8]) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = stream.read(&mut buf).await.unwrap();
        stream.write_all(response).await.unwrap();
        stream.flush().await.unwrap();
    }

    fn options(total: Duration) -> ClientOptions {
        ClientOptions {
            pool_size: 1,
            timeouts: Timeouts::new(Duration::from_secs(1), total, total),
            reset_connections: false,
        }
    }

    async fn local() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn plain_get() {
        let (listener, addr) = local().await;
        tokio::spawn(serve_once(
            listener,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nSet-Cookie: sid=1\r\n\r\nok",
        ));
        let client = HttpClient::new(EngineContext::default(), options(Duration::from_secs(2)));
        let action = Action::http("get", &format!("http://{addr}/"), HttpRequest::get());
        client.prepare(&action).await.unwrap();
        let result = client.execute(&action, &CancellationToken::new()).await;
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(result.status, Some(200));
        assert_eq!(result.body.as_ref(), b"ok");
        assert_eq!(result.cookies.len(), 1);
        assert!(result.timings.is_ordered());
        assert_eq!(client.stats().task_passed(), 1);
    }

    #[tokio::test]
    async fn malformed_status_line() {
        let (listener, addr) = local().await;
        tokio::spawn(serve_once(listener, b"HTTP/1.1 abc\r\n\r\n"));
        let client = HttpClient::new(EngineContext::default(), options(Duration::from_secs(2)));
        let action = Action::http("bad", &format!("http://{addr}/"), HttpRequest::get());
        client.prepare(&action).await.unwrap();
        let result = client.execute(&action, &CancellationToken::new()).await;
        assert_eq!(result.status, Some(400));
        assert!(matches!(result.error, Some(ActionError::Protocol(_))));
    }

    #[tokio::test]
    async fn request_timeout() {
        let (listener, addr) = local().await;
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });
        let client =
            HttpClient::new(EngineContext::default(), options(Duration::from_millis(100)));
        let action = Action::http("slow", &format!("http://{addr}/"), HttpRequest::get());
        client.prepare(&action).await.unwrap();
        let result = client.execute(&action, &CancellationToken::new()).await;
        assert_eq!(result.status, Some(408));
        assert_eq!(result.error_string().as_deref(), Some("Request timed out."));
        assert_eq!(client.stats().conn_replaced(), 1);
    }

    #[tokio::test]
    async fn connection_refused() {
        let (listener, addr) = local().await;
        drop(listener);
        let client = HttpClient::new(EngineContext::default(), options(Duration::from_secs(1)));
        let action = Action::http("refused", &format!("http://{addr}/"), HttpRequest::get());
        client.prepare(&action).await.unwrap();
        let result = client.execute(&action, &CancellationToken::new()).await;
        assert_eq!(result.status, Some(400));
        assert!(matches!(result.error, Some(ActionError::Connect(_))));
    }
}
