/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;
use http::Method;

#[derive(Clone, Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Raw(Bytes),
    /// Serialized as JSON, with a JSON content type unless one is set.
    Json(serde_json::Value),
    /// Sent with chunked transfer encoding over HTTP/1.1.
    Chunks(Vec<Bytes>),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Raw(b) => b.is_empty(),
            Body::Json(_) => false,
            Body::Chunks(c) => c.iter().all(|b| b.is_empty()),
        }
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Raw(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Raw(b)
    }
}

/// Request inputs shared by the HTTP family.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub auth: Option<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: Method) -> Self {
        HttpRequest {
            method,
            headers: Vec::new(),
            body: Body::Empty,
            auth: None,
            cookies: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn get() -> Self {
        HttpRequest::new(Method::GET)
    }

    pub fn post(body: impl Into<Body>) -> Self {
        let mut r = HttpRequest::new(Method::POST);
        r.body = body.into();
        r
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Clone, Debug)]
pub struct GraphqlRequest {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    pub auth: Option<(String, String)>,
    pub cookies: Vec<(String, String)>,
}

impl GraphqlRequest {
    pub fn new(query: &str) -> Self {
        GraphqlRequest {
            query: query.to_string(),
            operation_name: None,
            variables: None,
            headers: Vec::new(),
            auth: None,
            cookies: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GrpcRequest {
    /// Serialized protobuf message.
    pub message: Bytes,
    pub headers: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct WebSocketRequest {
    /// `GET` only receives a message, `POST` sends `data` first.
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub data: Option<Bytes>,
    pub subprotocol: Option<String>,
    pub origin: Option<String>,
}

impl WebSocketRequest {
    pub fn listen() -> Self {
        WebSocketRequest {
            method: Method::GET,
            headers: Vec::new(),
            params: Vec::new(),
            data: None,
            subprotocol: None,
            origin: None,
        }
    }

    pub fn send(data: impl Into<Bytes>) -> Self {
        WebSocketRequest {
            method: Method::POST,
            data: Some(data.into()),
            ..WebSocketRequest::listen()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdpMode {
    Send,
    Receive,
    Bidirectional,
}

impl std::str::FromStr for UdpMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SEND" => Ok(UdpMode::Send),
            "RECEIVE" => Ok(UdpMode::Receive),
            "BIDIRECTIONAL" => Ok(UdpMode::Bidirectional),
            _ => Err(anyhow::anyhow!("invalid udp mode {s}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UdpRequest {
    pub mode: UdpMode,
    pub data: Bytes,
    pub delimiter: Bytes,
    /// Read exactly this many bytes instead of up to the delimiter.
    pub response_size: Option<usize>,
}

impl UdpRequest {
    pub fn new(mode: UdpMode, data: impl Into<Bytes>) -> Self {
        UdpRequest {
            mode,
            data: data.into(),
            delimiter: Bytes::from_static(b"\n"),
            response_size: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CustomRequest {
    /// Name of the client in the client set.
    pub client: String,
    pub method: String,
    pub payload: Bytes,
}

#[derive(Clone, Debug)]
pub enum Request {
    Http(HttpRequest),
    Graphql(GraphqlRequest),
    Grpc(GrpcRequest),
    WebSocket(WebSocketRequest),
    Udp(UdpRequest),
    Custom(CustomRequest),
}

impl Request {
    pub fn method_str(&self) -> &str {
        match self {
            Request::Http(r) => r.method.as_str(),
            Request::Graphql(_) | Request::Grpc(_) => "POST",
            Request::WebSocket(r) => r.method.as_str(),
            Request::Udp(r) => match r.mode {
                UdpMode::Send => "SEND",
                UdpMode::Receive => "RECEIVE",
                UdpMode::Bidirectional => "BIDIRECTIONAL",
            },
            Request::Custom(r) => &r.method,
        }
    }
}
