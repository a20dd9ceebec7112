/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_util::sync::CancellationToken;

use volley::action::{Action, HttpRequest};
use volley::client::{Client, Http3Client};
use volley_h3::frame::{self, Frame};
use volley_h3::qpack::{DecodedSection, Decoder, Encoder};
use volley_h3::{H3Settings, HeaderField, encode_control_preamble};

mod common;
use common::{context_with, options, self_signed};

fn server_config() -> quinn::ServerConfig {
    let pair = self_signed("h3.test");
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(pair.cert_der)],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pair.key_der)),
        )
        .unwrap();
    tls.alpn_protocols = vec![b"h3".to_vec()];
    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls).unwrap();
    quinn::ServerConfig::with_crypto(Arc::new(crypto))
}

/// Answer every request with its own path, and echo POST bodies.
async fn serve_request(mut send: quinn::SendStream, mut recv: quinn::RecvStream) {
    let data = recv.read_to_end(64 * 1024).await.unwrap();
    let mut buf = BytesMut::from(data.as_slice());
    let mut path = Vec::new();
    let mut method = Vec::new();
    let mut body = Vec::new();
    while let Some(f) = Frame::decode(&mut buf).unwrap() {
        match f {
            Frame::Headers(block) => {
                let mut decoder = Decoder::new(0, 0);
                let DecodedSection::Done(fields) = decoder.decode_section(0, block).unwrap() else {
                    panic!("static only encoder blocked");
                };
                for f in fields {
                    match f.name.as_ref() {
                        b":path" => path = f.value.to_vec(),
                        b":method" => method = f.value.to_vec(),
                        _ => {}
                    }
                }
            }
            Frame::Data(d) => body.extend_from_slice(&d),
            _ => {}
        }
    }

    let fields = [
        HeaderField::new(":status", "200"),
        HeaderField::new("content-type", "text/plain"),
    ];
    let mut block = Vec::new();
    Encoder::new().encode(&fields, &mut block);
    let mut out = BytesMut::new();
    frame::encode_headers(&block, &mut out);
    if method == b"POST" {
        frame::encode_data(&body, &mut out);
    } else {
        frame::encode_data(&path, &mut out);
    }
    send.write_all(&out).await.unwrap();
    let _ = send.finish();
}

async fn serve_connection(conn: quinn::Connection) {
    let Ok(mut control) = conn.open_uni().await else {
        return;
    };
    control
        .write_all(&encode_control_preamble(&H3Settings::default()))
        .await
        .unwrap();
    while let Ok((send, recv)) = conn.accept_bi().await {
        tokio::spawn(serve_request(send, recv));
    }
    drop(control);
}

async fn h3_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let endpoint = quinn::Endpoint::server(server_config(), "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = endpoint.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Some(incoming) = endpoint.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Ok(conn) = incoming.await {
                tokio::spawn(serve_connection(conn));
            }
        }
    });
    (addr, accepted)
}

#[tokio::test]
async fn get_and_post_share_one_connection() {
    let (addr, accepted) = h3_server().await;
    let ctx = context_with(&[("h3.test", 443, addr)]);
    let client = Http3Client::new(ctx, options(2, Duration::from_secs(5)));
    let cancel = CancellationToken::new();

    let get = Action::http3("get", "https://h3.test/items", HttpRequest::get());
    client.prepare(&get).await.unwrap();
    let result = client.execute(&get, &cancel).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.body.as_ref(), b"/items");
    assert_eq!(
        result.headers.get("content-type").and_then(|v| v.to_str().ok()),
        Some("text/plain")
    );

    let post = Action::http3("post", "https://h3.test/echo", HttpRequest::post("payload"));
    client.prepare(&post).await.unwrap();
    let result = client.execute(&post, &cancel).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.body.as_ref(), b"payload");
    assert!(result.timings.is_ordered());

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(client.stats().conn_success(), 1);
    assert_eq!(client.session_count().await, 1);
    client.close().await;
    assert_eq!(client.session_count().await, 0);
}

#[tokio::test]
async fn nobody_listening_is_a_connect_error() {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();
    drop(socket);

    let ctx = context_with(&[("h3.test", 443, addr)]);
    let client = Http3Client::new(ctx, options(1, Duration::from_millis(300)));
    let action = Action::http3("get", "https://h3.test/", HttpRequest::get());
    client.prepare(&action).await.unwrap();
    let result = client.execute(&action, &CancellationToken::new()).await;
    assert!(!result.is_ok());
    assert!(matches!(result.status, Some(400) | Some(408)));
}
