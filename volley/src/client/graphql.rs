/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::{ClientOptions, Http2Client, HttpClient};
use crate::action::Protocol;
use crate::EngineContext;

/// GraphQL queries posted as JSON over HTTP/1.1.
pub struct GraphqlClient {
    inner: HttpClient,
}

impl GraphqlClient {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        GraphqlClient {
            inner: HttpClient::with_protocol("graphql", Protocol::Graphql, ctx, options),
        }
    }
}

delegate_client!(GraphqlClient);

/// GraphQL queries posted as JSON over HTTP/2.
pub struct GraphqlHttp2Client {
    inner: Http2Client,
}

impl GraphqlHttp2Client {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        GraphqlHttp2Client {
            inner: Http2Client::with_protocol(
                "graphql-http2",
                Protocol::GraphqlHttp2,
                ctx,
                options,
            ),
        }
    }
}

delegate_client!(GraphqlHttp2Client);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use crate::action::{Action, GraphqlRequest, HttpRequest};
    use crate::client::Client;
    use crate::{ActionError, Timeouts};

    #[tokio::test]
    async fn query_over_http1() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut len = 0;
            loop {
                let seen = String::from_utf8_lossy(&buf[..len]);
                if seen.contains("{\"query\"") && seen.ends_with("\"}") {
                    break;
                }
                len += stream.read(&mut buf[len..]).await.unwrap();
            }
            let body = br#"{"data":{"me":{"id":"1"}}}"#;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(body).await.unwrap();
            String::from_utf8_lossy(&buf[..len]).to_string()
        });

        let options = ClientOptions {
            pool_size: 1,
            timeouts: Timeouts::new(
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2),
            ),
            reset_connections: false,
        };
        let client = GraphqlClient::new(EngineContext::default(), options);
        assert_eq!(client.name(), "graphql");

        let action = Action::graphql(
            "me",
            &format!("http://{addr}/graphql"),
            GraphqlRequest::new("{ me { id } }"),
        );
        client.prepare(&action).await.unwrap();
        let result = client.execute(&action, &CancellationToken::new()).await;
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(result.status, Some(200));
        assert_eq!(result.method, "POST");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /graphql HTTP/1.1\r\n"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
    }

    #[tokio::test]
    async fn wrong_protocol() {
        let client = GraphqlHttp2Client::new(EngineContext::default(), ClientOptions::default());
        let action = Action::http("plain", "http://127.0.0.1:1/", HttpRequest::get());
        let e = client.prepare(&action).await.unwrap_err();
        assert!(matches!(e, ActionError::Protocol(_)));
    }
}
