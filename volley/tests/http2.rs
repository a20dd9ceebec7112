/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use volley::action::{Action, HttpRequest};
use volley::client::{Client, Http2Client};

mod common;
use common::{context_with, local_tcp, options};

/// Cleartext HTTP/2 server allowing one stream at a time. The first
/// connection starts a graceful shutdown on its second request.
async fn serve_then_go_away(listener: TcpListener, accepted: Arc<AtomicUsize>) {
    loop {
        let (tcp, _) = listener.accept().await.unwrap();
        let first = accepted.fetch_add(1, Ordering::SeqCst) == 0;
        tokio::spawn(async move {
            let mut conn = h2::server::Builder::new()
                .max_concurrent_streams(1)
                .handshake::<_, Bytes>(tcp)
                .await
                .unwrap();
            let mut served = 0;
            while let Some(Ok((_request, mut respond))) = conn.accept().await {
                served += 1;
                if first && served == 2 {
                    conn.graceful_shutdown();
                }
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let response = http::Response::builder().status(200).body(()).unwrap();
                    let _ = respond.send_response(response, true);
                });
            }
        });
    }
}

#[tokio::test]
async fn goaway_moves_requests_to_new_connection() {
    let (listener, addr) = local_tcp().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    tokio::spawn(serve_then_go_away(listener, accepted.clone()));

    let ctx = context_with(&[("h2.test", 80, addr)]);
    let client = Arc::new(Http2Client::new(ctx, options(4, Duration::from_secs(5))));
    let action = Arc::new(Action::http2("ping", "http://h2.test/ping", HttpRequest::get()));
    client.prepare(&action).await.unwrap();
    let cancel = CancellationToken::new();

    // learn the stream limit before the batch
    let warm = client.execute(&action, &cancel).await;
    assert!(warm.is_ok(), "{:?}", warm.error);

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        let action = action.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { client.execute(&action, &cancel).await }));
    }
    for t in tasks {
        let r = t.await.unwrap();
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.status, Some(200));
        assert!(r.timings.is_ordered());
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(client.stats().conn_success(), 2);
    assert_eq!(client.stats().task_failed(), 0);
}
