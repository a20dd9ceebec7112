/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use volley::action::{Action, HttpRequest, UdpMode, UdpRequest, WebSocketRequest};
use volley::client::{Client, Http2Client, HttpClient, UdpClient, WebSocketClient};
use volley::result::Stage;
use volley::{ActionError, EngineContext};

mod common;
use common::{context_with, local_tcp, options, read_head, tls_accept, tls_acceptor};

#[tokio::test]
async fn plain_http_get() {
    let (listener, addr) = local_tcp().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_head(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npong")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = HttpClient::new(EngineContext::default(), options(1, Duration::from_secs(2)));
    let action = Action::http("ping", &format!("http://{addr}/ping"), HttpRequest::get());
    client.prepare(&action).await.unwrap();
    let result = client.execute(&action, &CancellationToken::new()).await;

    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.body.as_ref(), b"pong");
    let connect_end = result.timings.get(Stage::ConnectEnd).unwrap();
    let read_end = result.timings.get(Stage::ReadEnd).unwrap();
    assert!(read_end > connect_end);
    assert!(result.timings.is_ordered());
}

#[tokio::test]
async fn https_redirect_upgrade() {
    let (plain, plain_addr) = local_tcp().await;
    let (secure, secure_addr) = local_tcp().await;

    tokio::spawn(async move {
        let (mut stream, _) = plain.accept().await.unwrap();
        let head = read_head(&mut stream).await;
        assert!(head.starts_with("GET /a HTTP/1.1\r\n"));
        stream
            .write_all(
                b"HTTP/1.1 301 Moved Permanently\r\n\
                  Location: https://example.test/a\r\n\
                  Content-Length: 0\r\n\r\n",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    });
    let acceptor = tls_acceptor("example.test", false);
    tokio::spawn(async move {
        let (tcp, _) = secure.accept().await.unwrap();
        let mut stream = tls_accept(&acceptor, tcp).await;
        let head = read_head(&mut stream).await;
        assert!(head.starts_with("GET /a HTTP/1.1\r\n"));
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let ctx = context_with(&[
        ("example.test", 80, plain_addr),
        ("example.test", 443, secure_addr),
    ]);
    let client = HttpClient::new(ctx.clone(), options(1, Duration::from_secs(5)));
    let action = Action::http("upgrade", "http://example.test/a", HttpRequest::get());
    client.prepare(&action).await.unwrap();
    let result = client.execute(&action, &CancellationToken::new()).await;

    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.body.as_ref(), b"ok");
    assert_eq!(ctx.dns.lookup_count(), 2);
}

#[tokio::test]
async fn http2_post_reuses_connection() {
    let (listener, addr) = local_tcp().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let acceptor = tls_acceptor("h2.test", true);

    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let (tcp, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let tls = tls_accept(&acceptor, tcp).await;
            tokio::spawn(async move {
                let mut conn = h2::server::handshake(tls).await.unwrap();
                while let Some(Ok((request, mut respond))) = conn.accept().await {
                    tokio::spawn(async move {
                        assert_eq!(request.method(), http::Method::POST);
                        assert_eq!(request.uri().path(), "/v1/echo");
                        let mut body = request.into_body();
                        let mut data = Vec::new();
                        while let Some(chunk) = body.data().await {
                            let chunk = chunk.unwrap();
                            let _ = body.flow_control().release_capacity(chunk.len());
                            data.extend_from_slice(&chunk);
                        }
                        let response = http::Response::builder().status(200).body(()).unwrap();
                        let mut send = respond.send_response(response, false).unwrap();
                        send.send_data(Bytes::from(data), true).unwrap();
                    });
                }
            });
        }
    });

    let ctx = context_with(&[("h2.test", 443, addr)]);
    let client = Http2Client::new(ctx, options(1, Duration::from_secs(5)));
    let action = Action::http2(
        "echo",
        "https://h2.test/v1/echo",
        HttpRequest::post(r#"{"x":1}"#),
    );
    client.prepare(&action).await.unwrap();

    let cancel = CancellationToken::new();
    let first = client.execute(&action, &cancel).await;
    assert!(first.error.is_none(), "{:?}", first.error);
    assert_eq!(first.status, Some(200));
    assert_eq!(first.body.as_ref(), br#"{"x":1}"#);

    let second = client.execute(&action, &cancel).await;
    assert!(second.error.is_none(), "{:?}", second.error);
    assert_eq!(second.status, Some(200));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(client.stats().conn_success(), 1);
    assert_eq!(client.session_count().await, 1);
}

fn websocket_accept(key: &str) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let mut input = key.as_bytes().to_vec();
    input.extend_from_slice(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
    STANDARD.encode(openssl::sha::sha1(&input))
}

fn server_text_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x81, payload.len() as u8];
    frame.extend_from_slice(payload);
    frame
}

async fn read_client_frame<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[1] & 0x80, 0x80, "client frames are masked");
    let len = (head[1] & 0x7f) as usize;
    assert!(len < 126);
    let mut mask = [0u8; 4];
    stream.read_exact(&mut mask).await.unwrap();
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= mask[i % 4];
    }
    (head[0] & 0x0f, payload)
}

#[tokio::test]
async fn websocket_handshake_then_send() {
    let (listener, addr) = local_tcp().await;
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        counter.fetch_add(1, Ordering::SeqCst);
        let head = read_head(&mut stream).await;
        assert!(head.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(head.to_ascii_lowercase().contains("sec-websocket-version: 13\r\n"));
        let key = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("sec-websocket-key")
                    .then(|| value.trim().to_string())
            })
            .unwrap();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            websocket_accept(&key)
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.write_all(&server_text_frame(b"welcome")).await.unwrap();

        let (opcode, payload) = read_client_frame(&mut stream).await;
        assert_eq!(opcode, 0x1);
        assert_eq!(payload, b"hello");
        stream.write_all(&server_text_frame(b"echo: hello")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let ctx = context_with(&[("ws.test", 80, addr)]);
    let client = WebSocketClient::new(ctx, options(1, Duration::from_secs(5)));
    let cancel = CancellationToken::new();

    let listen = Action::websocket("chat", "ws://ws.test/chat", WebSocketRequest::listen());
    client.prepare(&listen).await.unwrap();
    let result = client.execute(&listen, &cancel).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.status, Some(101));
    assert_eq!(
        result.headers.get("upgrade").and_then(|v| v.to_str().ok()),
        Some("websocket")
    );
    assert_eq!(result.body.as_ref(), b"welcome");

    let send = Action::websocket("hello", "ws://ws.test/chat", WebSocketRequest::send("hello"));
    client.prepare(&send).await.unwrap();
    let result = client.execute(&send, &cancel).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.body.as_ref(), b"echo: hello");

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(client.stats().conn_success(), 1);
}

#[tokio::test]
async fn websocket_keeps_pushed_message_for_next_action() {
    let (listener, addr) = local_tcp().await;
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let key = head
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("sec-websocket-key")
                            .then(|| value.trim().to_string())
                    })
                    .unwrap();
                let response = format!(
                    "HTTP/1.1 101 Switching Protocols\r\n\
                     Upgrade: websocket\r\n\
                     Connection: Upgrade\r\n\
                     Sec-WebSocket-Accept: {}\r\n\r\n",
                    websocket_accept(&key)
                );
                stream.write_all(response.as_bytes()).await.unwrap();

                let (_, payload) = read_client_frame(&mut stream).await;
                assert_eq!(payload, b"hello");
                stream.write_all(&server_text_frame(b"echo: hello")).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                stream.write_all(&server_text_frame(b"news")).await.unwrap();
                tokio::time::sleep(Duration::from_millis(500)).await;
            });
        }
    });

    let ctx = context_with(&[("ws.test", 80, addr)]);
    let client = WebSocketClient::new(ctx, options(1, Duration::from_secs(5)));
    let cancel = CancellationToken::new();

    let send = Action::websocket("hello", "ws://ws.test/chat", WebSocketRequest::send("hello"));
    client.prepare(&send).await.unwrap();
    let result = client.execute(&send, &cancel).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.body.as_ref(), b"echo: hello");

    // the pushed frame arrives while no action is running
    tokio::time::sleep(Duration::from_millis(100)).await;

    let listen = Action::websocket("news", "ws://ws.test/chat", WebSocketRequest::listen());
    client.prepare(&listen).await.unwrap();
    let result = client.execute(&listen, &cancel).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.body.as_ref(), b"news");

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(client.stats().conn_success(), 1);
}

#[tokio::test]
async fn udp_bidirectional() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (n, peer) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.send_to(b"pong\n", peer).await.unwrap();
    });

    let client = UdpClient::new(EngineContext::default(), options(1, Duration::from_secs(2)));
    let action = Action::udp(
        "echo",
        &format!("udp://{addr}"),
        UdpRequest::new(UdpMode::Bidirectional, "ping"),
    );
    client.prepare(&action).await.unwrap();
    let result = client.execute(&action, &CancellationToken::new()).await;

    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.body.as_ref(), b"pong");
    let write_end = result.timings.get(Stage::WriteEnd).unwrap();
    let read_end = result.timings.get(Stage::ReadEnd).unwrap();
    assert!(read_end > write_end);
}

#[tokio::test]
async fn request_timeout_replaces_connection() {
    let (listener, addr) = local_tcp().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            held.push(stream);
        }
    });

    let ctx = context_with(&[("slow.test", 80, addr)]);
    let client = HttpClient::new(ctx, options(1, Duration::from_millis(100)));
    let action = Action::http("slow", "http://slow.test/", HttpRequest::get());
    client.prepare(&action).await.unwrap();
    let result = client.execute(&action, &CancellationToken::new()).await;

    assert_eq!(result.status, Some(408));
    assert!(matches!(result.error, Some(ActionError::Timeout)));
    assert_eq!(result.error_string().as_deref(), Some("Request timed out."));
    let total = result.timings.total_time().unwrap();
    assert!(total >= Duration::from_millis(100), "{total:?}");
    assert!(total < Duration::from_millis(600), "{total:?}");
    assert_eq!(client.stats().conn_replaced(), 1);
    assert_eq!(client.pool_size(), 1);
}
