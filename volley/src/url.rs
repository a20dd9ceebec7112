/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;

use url::Url;

use volley_resolver::{ResolveKey, Transport};

use crate::ActionError;

/// A parsed endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointUrl {
    pub scheme: String,
    /// Host as written, without the brackets of an IPv6 literal.
    pub host: String,
    pub port: u16,
    /// Path and query.
    pub path: String,
    /// `host[:port]`, the port omitted when it is the scheme default.
    pub authority: String,
    pub is_ssl: bool,
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

impl EndpointUrl {
    pub fn parse(s: &str) -> Result<Self, ActionError> {
        let url = Url::parse(s).map_err(|e| ActionError::Resolution(format!("{s}: {e}")))?;
        EndpointUrl::from_url(&url)
    }

    fn from_url(url: &Url) -> Result<Self, ActionError> {
        let scheme = url.scheme().to_ascii_lowercase();
        let host = url
            .host_str()
            .ok_or_else(|| ActionError::Resolution(format!("{url}: no host")))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port()
            .or_else(|| default_port(&scheme))
            .ok_or_else(|| ActionError::Resolution(format!("{url}: no port")))?;

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(q) = url.query() {
            path.push('?');
            path.push_str(q);
        }

        let host_part = if host.contains(':') {
            format!("[{host}]")
        } else {
            host.clone()
        };
        let authority = if default_port(&scheme) == Some(port) {
            host_part
        } else {
            format!("{host_part}:{port}")
        };
        let is_ssl = matches!(scheme.as_str(), "https" | "wss");

        Ok(EndpointUrl {
            scheme,
            host,
            port,
            path,
            authority,
            is_ssl,
        })
    }

    /// Resolve a `Location` value against this url.
    pub fn join(&self, location: &str) -> Result<Self, ActionError> {
        let base = Url::parse(&self.to_string())
            .map_err(|e| ActionError::Resolution(format!("{self}: {e}")))?;
        let url = base
            .join(location.trim())
            .map_err(|e| ActionError::Protocol(format!("invalid location {location}: {e}")))?;
        EndpointUrl::from_url(&url)
    }

    pub fn resolve_key(&self, transport: Transport) -> ResolveKey {
        ResolveKey::new(&self.host, self.port, self.is_ssl, transport)
    }

    /// Whether both point at the same transport endpoint.
    pub fn same_origin(&self, other: &EndpointUrl) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.is_ssl == other.is_ssl
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let u = EndpointUrl::parse("http://127.0.0.1:8080/ping").unwrap();
        assert_eq!(u.host, "127.0.0.1");
        assert_eq!(u.port, 8080);
        assert_eq!(u.path, "/ping");
        assert_eq!(u.authority, "127.0.0.1:8080");
        assert!(!u.is_ssl);

        let u = EndpointUrl::parse("https://h2.test/v1/echo?x=1").unwrap();
        assert_eq!(u.port, 443);
        assert_eq!(u.authority, "h2.test");
        assert_eq!(u.path, "/v1/echo?x=1");
        assert!(u.is_ssl);

        let u = EndpointUrl::parse("wss://[::1]:9443").unwrap();
        assert_eq!(u.host, "::1");
        assert_eq!(u.authority, "[::1]:9443");
        assert_eq!(u.path, "/");

        let u = EndpointUrl::parse("udp://127.0.0.1:9000").unwrap();
        assert_eq!(u.port, 9000);
        assert!(EndpointUrl::parse("udp://127.0.0.1").is_err());
        assert!(EndpointUrl::parse("not a url").is_err());
    }

    #[test]
    fn join() {
        let u = EndpointUrl::parse("http://example.test/a/b").unwrap();
        let next = u.join("https://example.test/a").unwrap();
        assert!(next.is_ssl);
        assert!(!u.same_origin(&next));

        let next = u.join("c?d=1").unwrap();
        assert_eq!(next.path, "/a/c?d=1");
        assert!(u.same_origin(&next));

        let next = u.join("/root").unwrap();
        assert_eq!(next.to_string(), "http://example.test/root");
    }
}
