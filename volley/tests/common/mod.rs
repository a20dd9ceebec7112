/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use openssl::pkey::PKey;
use openssl::ssl::{AlpnError, Ssl, SslAcceptor, SslMethod, select_next_proto};
use openssl::x509::X509;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_openssl::SslStream;

use volley::client::ClientOptions;
use volley::{EngineContext, Timeouts};
use volley_resolver::SystemDriver;

pub fn options(pool_size: usize, total: Duration) -> ClientOptions {
    ClientOptions {
        pool_size,
        timeouts: Timeouts::new(Duration::from_secs(2), total, total),
        reset_connections: false,
    }
}

pub async fn local_tcp() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A context that sends `host:port` to the given local address.
pub fn context_with(entries: &[(&str, u16, SocketAddr)]) -> EngineContext {
    let driver = SystemDriver::with_overrides(
        entries
            .iter()
            .map(|(host, port, addr)| (host.to_string(), *port, *addr)),
    );
    EngineContext::new(Arc::new(driver))
}

pub struct SelfSigned {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

pub fn self_signed(host: &str) -> SelfSigned {
    let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    SelfSigned {
        cert_pem: certified.cert.pem(),
        key_pem: certified.key_pair.serialize_pem(),
        cert_der: certified.cert.der().to_vec(),
        key_der: certified.key_pair.serialize_der(),
    }
}

/// TLS server side. With `alpn_h2` set only `h2` is selected.
pub fn tls_acceptor(host: &str, alpn_h2: bool) -> SslAcceptor {
    let pair = self_signed(host);
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    let cert = X509::from_pem(pair.cert_pem.as_bytes()).unwrap();
    let key = PKey::private_key_from_pem(pair.key_pem.as_bytes()).unwrap();
    builder.set_certificate(&cert).unwrap();
    builder.set_private_key(&key).unwrap();
    if alpn_h2 {
        builder.set_alpn_select_callback(|_, client| {
            select_next_proto(b"\x02h2", client).ok_or(AlpnError::NOACK)
        });
    }
    builder.build()
}

pub async fn tls_accept(acceptor: &SslAcceptor, tcp: TcpStream) -> SslStream<TcpStream> {
    let ssl = Ssl::new(acceptor.context()).unwrap();
    let mut stream = SslStream::new(ssl, tcp).unwrap();
    Pin::new(&mut stream).accept().await.unwrap();
    stream
}

/// Read one HTTP/1.1 request head, returning it as text.
pub async fn read_head<S>(stream: &mut S) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8(buf).unwrap()
}

/// Keep-alive HTTP/1.1 server answering every request with `ok`.
/// Returns the number of accepted connections so far.
pub async fn serve_ok(listener: TcpListener) -> Arc<std::sync::atomic::AtomicUsize> {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                loop {
                    let head = read_head(&mut stream).await;
                    if !head.ends_with("\r\n\r\n") {
                        return;
                    }
                    if stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            });
        }
    });
    accepted
}
