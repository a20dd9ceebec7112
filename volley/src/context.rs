/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use volley_resolver::{DnsCache, ResolveDriver, SystemDriver};
use volley_tls::TlsContextFactory;

use crate::hooks::HookRegistry;

const DEFAULT_QUIC_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state of one engine instance, handed to every client.
#[derive(Clone)]
pub struct EngineContext {
    pub dns: Arc<DnsCache>,
    pub tls: Arc<TlsContextFactory>,
    pub hooks: Arc<HookRegistry>,
    /// Zero point of the second valued timings.
    pub epoch: Instant,
}

impl EngineContext {
    pub fn new(driver: Arc<dyn ResolveDriver>) -> Self {
        EngineContext {
            dns: Arc::new(DnsCache::new(driver)),
            tls: Arc::new(TlsContextFactory::new(DEFAULT_QUIC_IDLE_TIMEOUT)),
            hooks: Arc::new(HookRegistry::new()),
            epoch: Instant::now(),
        }
    }

    /// System resolution with static `host:port -> addr` entries in front.
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, u16, SocketAddr)>,
    {
        EngineContext::new(Arc::new(SystemDriver::with_overrides(overrides)))
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        EngineContext::new(Arc::new(SystemDriver::new()))
    }
}
