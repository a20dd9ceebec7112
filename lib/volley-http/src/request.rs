/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::{BufMut, BytesMut};
use http::{HeaderMap, HeaderValue, Method};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Append `params` to `path` as a percent encoded query string.
pub fn append_query(path: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let mut s = String::with_capacity(path.len() + params.len() * 16);
    s.push_str(path);
    let mut sep = if path.contains('?') { '&' } else { '?' };
    for (k, v) in params {
        s.push(sep);
        s.extend(utf8_percent_encode(k, QUERY_ENCODE_SET));
        s.push('=');
        s.extend(utf8_percent_encode(v, QUERY_ENCODE_SET));
        sep = '&';
    }
    s
}

pub fn basic_auth_value(user: &str, pass: &str) -> HeaderValue {
    let token = BASE64_STANDARD.encode(format!("{user}:{pass}"));
    // base64 output is always a valid header value
    HeaderValue::from_str(&format!("Basic {token}"))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"))
}

/// Join request cookies into a single `Cookie` header value.
pub fn cookie_header_value(cookies: &[(String, String)]) -> Option<HeaderValue> {
    if cookies.is_empty() {
        return None;
    }
    let mut s = String::new();
    for (i, (k, v)) in cookies.iter().enumerate() {
        if i > 0 {
            s.push_str("; ");
        }
        s.push_str(k);
        s.push('=');
        s.push_str(v);
    }
    HeaderValue::from_str(&s).ok()
}

/// Encode a request line and header section, terminated by the empty line.
///
/// `Host` is written first, followed by `headers` in map order.
pub fn encode_request_head(
    method: &Method,
    target: &str,
    host: &str,
    headers: &HeaderMap,
    buf: &mut BytesMut,
) {
    buf.reserve(64 + target.len() + headers.len() * 32);
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\nHost: ");
    buf.put_slice(host.as_bytes());
    buf.put_slice(b"\r\n");
    for (name, value) in headers {
        if *name == http::header::HOST {
            continue;
        }
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
}

/// Encode one chunk of a chunked request body.
pub fn encode_chunk(data: &[u8], buf: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    buf.reserve(data.len() + 20);
    buf.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    #[test]
    fn query() {
        let p = vec![
            ("q".to_string(), "a b&c".to_string()),
            ("n".to_string(), "1".to_string()),
        ];
        assert_eq!(append_query("/s", &p), "/s?q=a%20b%26c&n=1");
        assert_eq!(append_query("/s?x=1", &p[1..]), "/s?x=1&n=1");
        assert_eq!(append_query("/s", &[]), "/s");
    }

    #[test]
    fn basic_auth() {
        let v = basic_auth_value("user", "pass");
        assert_eq!(v, "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn cookies() {
        let c = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        assert_eq!(cookie_header_value(&c).unwrap(), "a=1; b=2");
        assert!(cookie_header_value(&[]).is_none());
    }

    #[test]
    fn request_head() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(header::HOST, HeaderValue::from_static("ignored"));
        let mut buf = BytesMut::new();
        encode_request_head(&Method::GET, "/ping", "127.0.0.1:8080", &headers, &mut buf);
        assert_eq!(
            buf.as_ref(),
            b"GET /ping HTTP/1.1\r\nHost: 127.0.0.1:8080\r\naccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn chunk() {
        let mut buf = BytesMut::new();
        encode_chunk(b"hello world, hello", &mut buf);
        buf.put_slice(LAST_CHUNK);
        assert_eq!(buf.as_ref(), b"12\r\nhello world, hello\r\n0\r\n\r\n");
    }
}
