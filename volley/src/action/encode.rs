/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::Serialize;

use volley_h2::HeaderField;
use volley_http::{append_query, basic_auth_value, cookie_header_value, encode_request_head};

use super::{Body, GraphqlRequest, GrpcRequest, HttpRequest, Request, WebSocketRequest};
use crate::{ActionError, EndpointUrl, Protocol};

const USER_AGENT: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub enum EncodedBody {
    Empty,
    Full(Bytes),
    Chunked(Vec<Bytes>),
}

/// Wire ready form of a request, built once per prepared action.
#[derive(Clone, Debug)]
pub enum Encoded {
    Http1 {
        head: Bytes,
        body: EncodedBody,
        is_head: bool,
    },
    /// Header list for the HPACK and QPACK encoders, which keep per
    /// connection state and so run at send time.
    Fields {
        fields: Vec<HeaderField>,
        body: Bytes,
        is_head: bool,
    },
    WebSocket {
        handshake: Bytes,
        data: Option<Bytes>,
    },
    Datagram(Bytes),
    Opaque(Bytes),
}

/// Headers that only make sense on an HTTP/1.1 connection.
fn is_connection_specific(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::HOST
        || name.as_str() == "keep-alive"
        || name.as_str() == "proxy-connection"
}

pub(crate) fn build_header_map(list: &[(String, String)]) -> Result<HeaderMap, ActionError> {
    let mut map = HeaderMap::with_capacity(list.len() + 4);
    for (name, value) in list {
        let name = HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
            .map_err(|_| ActionError::Protocol(format!("invalid header name {name}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| ActionError::Protocol(format!("invalid value for header {name}")))?;
        map.append(name, value);
    }
    Ok(map)
}

fn apply_auth_and_cookies(
    map: &mut HeaderMap,
    auth: &Option<(String, String)>,
    cookies: &[(String, String)],
) {
    if let Some((user, pass)) = auth {
        map.insert(header::AUTHORIZATION, basic_auth_value(user, pass));
    }
    if let Some(v) = cookie_header_value(cookies) {
        map.insert(header::COOKIE, v);
    }
}

fn body_bytes(body: &Body, map: &mut HeaderMap) -> Result<EncodedBody, ActionError> {
    let encoded = match body {
        Body::Empty => EncodedBody::Empty,
        Body::Raw(b) => EncodedBody::Full(b.clone()),
        Body::Json(v) => {
            let data = serde_json::to_vec(v).map_err(ActionError::protocol)?;
            if !map.contains_key(header::CONTENT_TYPE) {
                map.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            EncodedBody::Full(Bytes::from(data))
        }
        Body::Chunks(chunks) => EncodedBody::Chunked(chunks.clone()),
    };
    Ok(encoded)
}

fn method_expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn encode_http1(req: &HttpRequest, url: &EndpointUrl) -> Result<Encoded, ActionError> {
    let mut map = build_header_map(&req.headers)?;
    apply_auth_and_cookies(&mut map, &req.auth, &req.cookies);
    let body = body_bytes(&req.body, &mut map)?;
    finish_http1(&req.method, &req.params, map, body, url)
}

fn finish_http1(
    method: &Method,
    params: &[(String, String)],
    mut map: HeaderMap,
    body: EncodedBody,
    url: &EndpointUrl,
) -> Result<Encoded, ActionError> {
    match &body {
        EncodedBody::Empty => {
            if method_expects_body(method) {
                map.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
            }
        }
        EncodedBody::Full(b) => {
            map.insert(header::CONTENT_LENGTH, HeaderValue::from(b.len() as u64));
        }
        EncodedBody::Chunked(_) => {
            map.remove(header::CONTENT_LENGTH);
            map.insert(
                header::TRANSFER_ENCODING,
                HeaderValue::from_static("chunked"),
            );
        }
    }
    if !map.contains_key(header::USER_AGENT) {
        map.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    }

    let target = append_query(&url.path, params);
    let mut head = BytesMut::with_capacity(256);
    encode_request_head(method, &target, &url.authority, &map, &mut head);
    Ok(Encoded::Http1 {
        head: head.freeze(),
        body,
        is_head: *method == Method::HEAD,
    })
}

/// Pseudo headers in the order `:method, :authority, :scheme, :path`,
/// followed by the regular ones with lowercase names.
fn header_fields(method: &Method, scheme: &str, path: &str, url: &EndpointUrl, map: &HeaderMap) -> Vec<HeaderField> {
    let mut fields = Vec::with_capacity(map.len() + 4);
    fields.push(HeaderField::new(
        Bytes::from_static(b":method"),
        Bytes::copy_from_slice(method.as_str().as_bytes()),
    ));
    fields.push(HeaderField::new(
        Bytes::from_static(b":authority"),
        Bytes::copy_from_slice(url.authority.as_bytes()),
    ));
    fields.push(HeaderField::new(
        Bytes::from_static(b":scheme"),
        Bytes::copy_from_slice(scheme.as_bytes()),
    ));
    fields.push(HeaderField::new(
        Bytes::from_static(b":path"),
        Bytes::copy_from_slice(path.as_bytes()),
    ));
    for (name, value) in map {
        if is_connection_specific(name) {
            continue;
        }
        // HeaderName is always lowercase
        fields.push(HeaderField::new(
            Bytes::copy_from_slice(name.as_str().as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        ));
    }
    fields
}

fn flatten(body: EncodedBody) -> Bytes {
    match body {
        EncodedBody::Empty => Bytes::new(),
        EncodedBody::Full(b) => b,
        EncodedBody::Chunked(chunks) => {
            let mut buf = BytesMut::new();
            for c in chunks {
                buf.put_slice(&c);
            }
            buf.freeze()
        }
    }
}

fn encode_fields(
    req: &HttpRequest,
    url: &EndpointUrl,
    scheme: &str,
) -> Result<Encoded, ActionError> {
    let mut map = build_header_map(&req.headers)?;
    apply_auth_and_cookies(&mut map, &req.auth, &req.cookies);
    let body = flatten(body_bytes(&req.body, &mut map)?);
    if !body.is_empty() || method_expects_body(&req.method) {
        map.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
    }
    if !map.contains_key(header::USER_AGENT) {
        map.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    }
    let path = append_query(&url.path, &req.params);
    Ok(Encoded::Fields {
        fields: header_fields(&req.method, scheme, &path, url, &map),
        body,
        is_head: req.method == Method::HEAD,
    })
}

#[derive(Serialize)]
struct GraphqlBody<'a> {
    query: &'a str,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    operation_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a serde_json::Value>,
}

pub(crate) fn graphql_body(req: &GraphqlRequest) -> Result<Bytes, ActionError> {
    let body = GraphqlBody {
        query: &req.query,
        operation_name: req.operation_name.as_deref(),
        variables: req.variables.as_ref(),
    };
    serde_json::to_vec(&body)
        .map(Bytes::from)
        .map_err(ActionError::protocol)
}

fn graphql_as_http(req: &GraphqlRequest) -> Result<HttpRequest, ActionError> {
    let mut http = HttpRequest::new(Method::POST);
    http.headers = req.headers.clone();
    if !http
        .headers
        .iter()
        .any(|(n, _)| n.eq_ignore_ascii_case("content-type"))
    {
        http.headers
            .push(("content-type".to_string(), "application/json".to_string()));
    }
    http.auth = req.auth.clone();
    http.cookies = req.cookies.clone();
    http.body = Body::Raw(graphql_body(req)?);
    Ok(http)
}

/// `00 || length(u32 be) || message`
pub(crate) fn grpc_frame(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.len() + 5);
    buf.put_u8(0);
    buf.put_u32(message.len() as u32);
    buf.put_slice(message);
    buf.freeze()
}

fn encode_grpc(
    req: &GrpcRequest,
    url: &EndpointUrl,
    total_timeout: Duration,
) -> Result<Encoded, ActionError> {
    let mut map = build_header_map(&req.headers)?;
    map.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    let secs = total_timeout.as_secs().max(1);
    map.insert(
        HeaderName::from_static("grpc-timeout"),
        HeaderValue::from_str(&format!("{secs}S")).map_err(ActionError::protocol)?,
    );
    map.insert(header::TE, HeaderValue::from_static("trailers"));
    let body = grpc_frame(&req.message);
    Ok(Encoded::Fields {
        fields: header_fields(&Method::POST, &url.scheme, &url.path, url, &map),
        body,
        is_head: false,
    })
}

fn encode_websocket(req: &WebSocketRequest, url: &EndpointUrl) -> Result<Encoded, ActionError> {
    let mut map = build_header_map(&req.headers)?;
    let nonce: [u8; 16] = std::array::from_fn(|_| fastrand::u8(..));
    map.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    map.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    map.insert(
        header::SEC_WEBSOCKET_KEY,
        HeaderValue::from_str(&STANDARD.encode(nonce)).map_err(ActionError::protocol)?,
    );
    map.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
    if let Some(p) = &req.subprotocol {
        map.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(p).map_err(ActionError::protocol)?,
        );
    }
    if let Some(origin) = &req.origin {
        map.insert(
            header::ORIGIN,
            HeaderValue::from_str(origin).map_err(ActionError::protocol)?,
        );
    }

    let target = append_query(&url.path, &req.params);
    let mut head = BytesMut::with_capacity(256);
    encode_request_head(&Method::GET, &target, &url.authority, &map, &mut head);
    Ok(Encoded::WebSocket {
        handshake: head.freeze(),
        data: req.data.clone(),
    })
}

/// Build the wire form of `request` for `protocol` against `url`.
pub fn encode_request(
    request: &Request,
    protocol: Protocol,
    url: &EndpointUrl,
    total_timeout: Duration,
) -> Result<Encoded, ActionError> {
    match (request, protocol) {
        (Request::Http(r), Protocol::Http) => encode_http1(r, url),
        (Request::Http(r), Protocol::Http2) => encode_fields(r, url, &url.scheme),
        (Request::Http(r), Protocol::Http3) => encode_fields(r, url, "https"),
        (Request::Graphql(r), Protocol::Graphql) => encode_http1(&graphql_as_http(r)?, url),
        (Request::Graphql(r), Protocol::GraphqlHttp2) => {
            encode_fields(&graphql_as_http(r)?, url, &url.scheme)
        }
        (Request::Grpc(r), Protocol::Grpc) => encode_grpc(r, url, total_timeout),
        (Request::WebSocket(r), Protocol::WebSocket) => encode_websocket(r, url),
        (Request::Udp(r), Protocol::Udp) => Ok(Encoded::Datagram(r.data.clone())),
        (Request::Custom(r), Protocol::Custom) => Ok(Encoded::Opaque(r.payload.clone())),
        (_, p) => Err(ActionError::Protocol(format!(
            "request type does not match protocol {}",
            p.as_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> EndpointUrl {
        EndpointUrl::parse(s).unwrap()
    }

    #[test]
    fn http1_head() {
        let mut req = HttpRequest::get().header("X-Trace", "1");
        req.params = vec![("q".into(), "a b".into())];
        req.auth = Some(("user".into(), "pass".into()));
        req.cookies = vec![("sid".into(), "abc".into())];
        let Encoded::Http1 { head, body, .. } = encode_request(
            &Request::Http(req),
            Protocol::Http,
            &url("http://127.0.0.1:8080/ping"),
            Duration::from_secs(60),
        )
        .unwrap() else {
            panic!("wrong encoding");
        };
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.starts_with("GET /ping?q=a%20b HTTP/1.1\r\nHost: 127.0.0.1:8080\r\n"));
        assert!(head.contains("x-trace: 1\r\n"));
        assert!(head.contains("authorization: Basic dXNlcjpwYXNz\r\n"));
        assert!(head.contains("cookie: sid=abc\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
        assert!(matches!(body, EncodedBody::Empty));
    }

    #[test]
    fn http1_bodies() {
        let req = HttpRequest::post(Body::Json(serde_json::json!({"x": 1})));
        let Encoded::Http1 { head, body, .. } = encode_request(
            &Request::Http(req),
            Protocol::Http,
            &url("http://a.test/"),
            Duration::from_secs(60),
        )
        .unwrap() else {
            panic!("wrong encoding");
        };
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.contains("content-length: 7\r\n"));
        assert!(head.contains("content-type: application/json\r\n"));
        assert!(matches!(body, EncodedBody::Full(b) if b.as_ref() == b"{\"x\":1}"));

        let mut req = HttpRequest::new(Method::PUT);
        req.body = Body::Chunks(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"c")]);
        let Encoded::Http1 { head, body, .. } = encode_request(
            &Request::Http(req),
            Protocol::Http,
            &url("http://a.test/"),
            Duration::from_secs(60),
        )
        .unwrap() else {
            panic!("wrong encoding");
        };
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.contains("transfer-encoding: chunked\r\n"));
        assert!(!head.contains("content-length"));
        assert!(matches!(body, EncodedBody::Chunked(c) if c.len() == 2));
    }

    #[test]
    fn pseudo_header_order() {
        let req = HttpRequest::post("{\"x\":1}").header("X-Upper", "V");
        let Encoded::Fields { fields, body, .. } = encode_request(
            &Request::Http(req),
            Protocol::Http2,
            &url("https://h2.test/v1/echo"),
            Duration::from_secs(60),
        )
        .unwrap() else {
            panic!("wrong encoding");
        };
        let names: Vec<&[u8]> = fields.iter().map(|f| f.name.as_ref()).collect();
        assert_eq!(
            &names[..4],
            &[&b":method"[..], b":authority", b":scheme", b":path"]
        );
        assert_eq!(fields[1].value.as_ref(), b"h2.test");
        assert_eq!(fields[2].value.as_ref(), b"https");
        assert!(fields.iter().all(|f| !f.name.iter().any(u8::is_ascii_uppercase)));
        assert!(fields.iter().any(|f| f.name.as_ref() == b"x-upper"));
        assert!(fields.iter().all(|f| f.name.as_ref() != b"host"));
        assert_eq!(body.as_ref(), b"{\"x\":1}");
    }

    #[test]
    fn grpc_headers() {
        let req = GrpcRequest {
            message: Bytes::from_static(b"\x08\x01"),
            headers: vec![],
        };
        let Encoded::Fields { fields, body, .. } = encode_request(
            &Request::Grpc(req),
            Protocol::Grpc,
            &url("https://grpc.test/pkg.Svc/Call"),
            Duration::from_secs(30),
        )
        .unwrap() else {
            panic!("wrong encoding");
        };
        let get = |n: &[u8]| {
            fields
                .iter()
                .find(|f| f.name.as_ref() == n)
                .map(|f| f.value.clone())
        };
        assert_eq!(get(b"content-type").unwrap().as_ref(), b"application/grpc");
        assert_eq!(get(b"grpc-timeout").unwrap().as_ref(), b"30S");
        assert_eq!(get(b"te").unwrap().as_ref(), b"trailers");
        assert_eq!(body.as_ref(), b"\x00\x00\x00\x00\x02\x08\x01");
    }

    #[test]
    fn graphql_json() {
        let mut req = GraphqlRequest::new("query Q { a }");
        req.operation_name = Some("Q".into());
        let body = graphql_body(&req).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["query"], "query Q { a }");
        assert_eq!(v["operationName"], "Q");
        assert!(v.get("variables").is_none());
    }

    #[test]
    fn websocket_handshake() {
        let Encoded::WebSocket { handshake, data } = encode_request(
            &Request::WebSocket(WebSocketRequest::send("hello")),
            Protocol::WebSocket,
            &url("ws://ws.test/chat"),
            Duration::from_secs(60),
        )
        .unwrap() else {
            panic!("wrong encoding");
        };
        let head = std::str::from_utf8(&handshake).unwrap();
        assert!(head.starts_with("GET /chat HTTP/1.1\r\nHost: ws.test\r\n"));
        assert!(head.contains("upgrade: websocket\r\n"));
        assert!(head.contains("sec-websocket-version: 13\r\n"));
        let key_line = head
            .lines()
            .find(|l| l.starts_with("sec-websocket-key: "))
            .unwrap();
        let key = STANDARD.decode(&key_line["sec-websocket-key: ".len()..]).unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(data.unwrap().as_ref(), b"hello");
    }

    #[test]
    fn mismatch() {
        let r = encode_request(
            &Request::Http(HttpRequest::get()),
            Protocol::Udp,
            &url("udp://127.0.0.1:9000"),
            Duration::from_secs(1),
        );
        assert!(r.is_err());
    }
}
