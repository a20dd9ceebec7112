/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, SocketAddr};

use ahash::AHashMap;
use async_trait::async_trait;

use crate::ResolveError;

/// Source of candidate addresses for a host.
#[async_trait]
pub trait ResolveDriver: Send + Sync {
    async fn query(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError>;

    /// A static address for this exact host and port, if one is configured.
    fn fixed(&self, _host: &str, _port: u16) -> Option<SocketAddr> {
        None
    }
}

/// Lookup through the system resolver, with optional static entries that
/// take precedence.
#[derive(Default)]
pub struct SystemDriver {
    overrides: AHashMap<(String, u16), SocketAddr>,
}

impl SystemDriver {
    pub fn new() -> Self {
        SystemDriver::default()
    }

    pub fn add_override(&mut self, host: &str, port: u16, addr: SocketAddr) {
        self.overrides
            .insert((host.to_ascii_lowercase(), port), addr);
    }

    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, u16, SocketAddr)>,
    {
        let mut driver = SystemDriver::new();
        for (host, port, addr) in overrides {
            driver.add_override(&host, port, addr);
        }
        driver
    }
}

#[async_trait]
impl ResolveDriver for SystemDriver {
    async fn query(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
        if let Some(addr) = self.fixed(host, port) {
            return Ok(vec![addr]);
        }
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.collect())
    }

    fn fixed(&self, host: &str, port: u16) -> Option<SocketAddr> {
        self.overrides
            .get(&(host.to_ascii_lowercase(), port))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_entries() {
        let addr: SocketAddr = "127.0.0.1:9443".parse().unwrap();
        let driver = SystemDriver::with_overrides([("H2.test".to_string(), 443, addr)]);
        assert_eq!(driver.query("h2.test", 443).await.unwrap(), vec![addr]);
        assert_eq!(driver.fixed("h2.test", 443), Some(addr));
        assert_eq!(driver.fixed("h2.test", 80), None);

        let r = driver.query("::1", 80).await.unwrap();
        assert_eq!(r, vec!["[::1]:80".parse::<SocketAddr>().unwrap()]);
        let r = driver.query("[::1]", 80).await.unwrap();
        assert_eq!(r.len(), 1);
    }
}
