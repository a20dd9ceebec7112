/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use volley::ActionError;
use volley::action::{Action, GraphqlRequest, GrpcRequest};
use volley::client::{Client, GraphqlHttp2Client, GrpcClient};

mod common;
use common::{context_with, local_tcp, options};

async fn read_body(mut body: h2::RecvStream) -> Vec<u8> {
    let mut data = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        data.extend_from_slice(&chunk);
    }
    data
}

/// Cleartext HTTP/2 server. `/pkg.Greeter/Hello` answers the request
/// message prefixed with `hi `, `/pkg.Greeter/Missing` fails with status 5
/// and `/graphql` returns a fixed JSON document.
async fn serve(listener: TcpListener) {
    loop {
        let (tcp, _) = listener.accept().await.unwrap();
        tokio::spawn(async move {
            let mut conn = h2::server::handshake(tcp).await.unwrap();
            while let Some(Ok((request, mut respond))) = conn.accept().await {
                tokio::spawn(async move {
                    let path = request.uri().path().to_string();
                    let content_type = request
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let body = read_body(request.into_body()).await;
                    match path.as_str() {
                        "/pkg.Greeter/Hello" => {
                            assert_eq!(content_type, "application/grpc");
                            assert_eq!(body[0], 0);
                            let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
                            let mut reply = b"hi ".to_vec();
                            reply.extend_from_slice(&body[5..5 + len as usize]);
                            let mut frame = BytesMut::new();
                            frame.put_u8(0);
                            frame.put_u32(reply.len() as u32);
                            frame.put_slice(&reply);

                            let response = http::Response::builder()
                                .status(200)
                                .header("content-type", "application/grpc")
                                .body(())
                                .unwrap();
                            let mut send = respond.send_response(response, false).unwrap();
                            send.send_data(frame.freeze(), false).unwrap();
                            let mut trailers = http::HeaderMap::new();
                            trailers.insert("grpc-status", "0".parse().unwrap());
                            send.send_trailers(trailers).unwrap();
                        }
                        "/pkg.Greeter/Missing" => {
                            let response = http::Response::builder()
                                .status(200)
                                .header("content-type", "application/grpc")
                                .header("grpc-status", "5")
                                .header("grpc-message", "not found")
                                .body(())
                                .unwrap();
                            respond.send_response(response, true).unwrap();
                        }
                        "/graphql" => {
                            let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
                            assert_eq!(v["query"], "{ viewer { id } }");
                            assert_eq!(v["variables"]["n"], 1);
                            let response = http::Response::builder()
                                .status(200)
                                .header("content-type", "application/json")
                                .body(())
                                .unwrap();
                            let mut send = respond.send_response(response, false).unwrap();
                            send.send_data(Bytes::from_static(br#"{"data":{"viewer":{"id":"7"}}}"#), true)
                                .unwrap();
                        }
                        _ => {
                            let response = http::Response::builder().status(404).body(()).unwrap();
                            respond.send_response(response, true).unwrap();
                        }
                    }
                });
            }
        });
    }
}

#[tokio::test]
async fn grpc_unary_call() {
    let (listener, addr) = local_tcp().await;
    tokio::spawn(serve(listener));

    let ctx = context_with(&[("grpc.test", 80, addr)]);
    let client = GrpcClient::new(ctx, options(1, Duration::from_secs(5)));
    let cancel = CancellationToken::new();

    let hello = Action::grpc(
        "hello",
        "http://grpc.test/pkg.Greeter/Hello",
        GrpcRequest {
            message: Bytes::from_static(b"volley"),
            headers: Vec::new(),
        },
    );
    client.prepare(&hello).await.unwrap();
    let result = client.execute(&hello, &cancel).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.body.as_ref(), b"hi volley");
    assert_eq!(
        result.trailers.get("grpc-status").and_then(|v| v.to_str().ok()),
        Some("0")
    );

    let missing = Action::grpc(
        "missing",
        "http://grpc.test/pkg.Greeter/Missing",
        GrpcRequest {
            message: Bytes::new(),
            headers: Vec::new(),
        },
    );
    client.prepare(&missing).await.unwrap();
    let result = client.execute(&missing, &cancel).await;
    assert_eq!(result.status, Some(400));
    match result.error {
        Some(ActionError::Protocol(msg)) => assert_eq!(msg, "grpc-status 5: not found"),
        e => panic!("unexpected error {e:?}"),
    }
    assert_eq!(client.stats().conn_success(), 1);
}

#[tokio::test]
async fn graphql_over_http2() {
    let (listener, addr) = local_tcp().await;
    tokio::spawn(serve(listener));

    let ctx = context_with(&[("gql.test", 80, addr)]);
    let client = GraphqlHttp2Client::new(ctx, options(1, Duration::from_secs(5)));
    let mut request = GraphqlRequest::new("{ viewer { id } }");
    request.variables = Some(serde_json::json!({ "n": 1 }));
    let action = Action::graphql_h2("viewer", "http://gql.test/graphql", request);
    client.prepare(&action).await.unwrap();
    let result = client.execute(&action, &CancellationToken::new()).await;

    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.status, Some(200));
    let v: serde_json::Value = serde_json::from_slice(&result.body).unwrap();
    assert_eq!(v["data"]["viewer"]["id"], "7");
}
