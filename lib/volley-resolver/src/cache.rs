/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ahash::AHashMap;
use log::debug;
use tokio::net::TcpStream;
use tokio::sync::OnceCell;

use crate::{ResolveDriver, ResolveError, ResolveKey, SocketConfig, Transport};

/// The resolved config and the port it was resolved for.
#[derive(Clone, Copy)]
struct Entry {
    config: SocketConfig,
    port: u16,
}

impl Entry {
    fn config_for(&self, key: &ResolveKey, fixed: Option<SocketAddr>) -> SocketConfig {
        if key.port == self.port {
            return SocketConfig {
                transport: key.transport,
                ..self.config
            };
        }
        let addr = fixed.unwrap_or_else(|| SocketAddr::new(self.config.ip(), key.port));
        SocketConfig::new(key.transport, addr)
    }
}

type Slot = Arc<OnceCell<Entry>>;
type SlotKey = (String, bool);

fn slot_key(key: &ResolveKey) -> SlotKey {
    (key.host.clone(), key.tls)
}

/// Process wide resolution cache.
///
/// Every host is resolved at most once per tls flag until invalidated. Other
/// ports of the host reuse the resolved address. Concurrent callers for the
/// same host wait on the first caller's lookup instead of starting their own.
pub struct DnsCache {
    driver: Arc<dyn ResolveDriver>,
    slots: Mutex<AHashMap<SlotKey, Slot>>,
    lookups: AtomicU64,
    hits: AtomicU64,
}

impl DnsCache {
    pub fn new(driver: Arc<dyn ResolveDriver>) -> Self {
        DnsCache {
            driver,
            slots: Mutex::new(AHashMap::new()),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// How many times the driver has been queried.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn slot(&self, key: &ResolveKey) -> Slot {
        let mut slots = match self.slots.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        slots.entry(slot_key(key)).or_default().clone()
    }

    fn fixed(&self, key: &ResolveKey) -> Option<SocketAddr> {
        self.driver.fixed(&key.host, key.port)
    }

    pub fn cached(&self, key: &ResolveKey) -> Option<SocketConfig> {
        let entry = {
            let slots = match self.slots.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            slots.get(&slot_key(key)).and_then(|s| s.get().copied())
        };
        entry.map(|e| e.config_for(key, self.fixed(key)))
    }

    /// Drop every entry of `host`, whatever port or scheme.
    pub fn invalidate(&self, host: &str) {
        let mut slots = match self.slots.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        slots.retain(|k, _| !k.0.eq_ignore_ascii_case(host));
        debug!("dns cache entries of {host} invalidated");
    }

    pub async fn lookup(
        &self,
        key: &ResolveKey,
        timeout: Duration,
    ) -> Result<SocketConfig, ResolveError> {
        if key.host.is_empty() {
            return Err(ResolveError::EmptyHost);
        }
        let slot = self.slot(key);
        if let Some(entry) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.config_for(key, self.fixed(key)));
        }
        let entry = slot
            .get_or_try_init(|| async {
                match tokio::time::timeout(timeout, self.resolve(key, timeout)).await {
                    Ok(Ok(config)) => Ok(Entry {
                        config,
                        port: key.port,
                    }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ResolveError::Timeout),
                }
            })
            .await?;
        Ok(entry.config_for(key, self.fixed(key)))
    }

    async fn resolve(
        &self,
        key: &ResolveKey,
        timeout: Duration,
    ) -> Result<SocketConfig, ResolveError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let candidates = self.driver.query(&key.host, key.port).await?;
        let config = match candidates.as_slice() {
            [] => return Err(ResolveError::NoCandidate(key.host.clone())),
            [addr] => SocketConfig::new(key.transport, *addr),
            _ => match key.transport {
                // datagram sockets can not be probed
                Transport::Udp => SocketConfig::new(key.transport, candidates[0]),
                Transport::Tcp => probe_tcp(&key.host, &candidates, timeout).await?,
            },
        };
        debug!(
            "dns cache filled: {}:{} -> {}",
            key.host, key.port, config.addr
        );
        Ok(config)
    }
}

/// The first candidate that accepts a connection wins.
async fn probe_tcp(
    host: &str,
    candidates: &[std::net::SocketAddr],
    timeout: Duration,
) -> Result<SocketConfig, ResolveError> {
    for addr in candidates {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => return Ok(SocketConfig::new(Transport::Tcp, *addr)),
            Ok(Err(e)) => debug!("candidate {addr} of {host} unreachable: {e}"),
            Err(_) => debug!("candidate {addr} of {host} timed out"),
        }
    }
    Err(ResolveError::NoCandidate(host.to_string()))
}
