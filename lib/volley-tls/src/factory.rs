/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ahash::AHashMap;
use log::debug;

use crate::{OpensslContext, TlsError, build_quic_client_config};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TlsProtocol {
    /// HTTP/1.1, WebSocket and other TCP protocols.
    Default,
    Http2,
    Quic,
}

impl TlsProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsProtocol::Default => "default",
            TlsProtocol::Http2 => "h2",
            TlsProtocol::Quic => "quic",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientCertPair {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl ClientCertPair {
    pub fn from_paths(
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> Result<Option<Self>, TlsError> {
        match (cert, key) {
            (Some(cert), Some(key)) => Ok(Some(ClientCertPair { cert, key })),
            (Some(_), None) => Err(TlsError::MissingKey),
            _ => Ok(None),
        }
    }
}

#[derive(Clone)]
pub enum TlsContext {
    Openssl(Arc<OpensslContext>),
    Quic(quinn::ClientConfig),
}

impl TlsContext {
    pub fn openssl(&self) -> Option<&Arc<OpensslContext>> {
        match self {
            TlsContext::Openssl(c) => Some(c),
            TlsContext::Quic(_) => None,
        }
    }

    pub fn quic(&self) -> Option<&quinn::ClientConfig> {
        match self {
            TlsContext::Openssl(_) => None,
            TlsContext::Quic(c) => Some(c),
        }
    }
}

type CacheKey = (TlsProtocol, Option<ClientCertPair>);

/// Builds TLS contexts on first use and shares them afterwards.
pub struct TlsContextFactory {
    quic_idle_timeout: Duration,
    cache: Mutex<AHashMap<CacheKey, TlsContext>>,
}

impl TlsContextFactory {
    pub fn new(quic_idle_timeout: Duration) -> Self {
        TlsContextFactory {
            quic_idle_timeout,
            cache: Mutex::new(AHashMap::new()),
        }
    }

    pub fn cached_count(&self) -> usize {
        match self.cache.lock() {
            Ok(c) => c.len(),
            Err(p) => p.into_inner().len(),
        }
    }

    pub fn get(
        &self,
        protocol: TlsProtocol,
        cert: Option<&ClientCertPair>,
    ) -> Result<TlsContext, TlsError> {
        let key = (protocol, cert.cloned());
        let mut cache = match self.cache.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };
        if let Some(ctx) = cache.get(&key) {
            return Ok(ctx.clone());
        }

        let ctx = match protocol {
            TlsProtocol::Default => {
                TlsContext::Openssl(Arc::new(OpensslContext::default_preset(cert)?))
            }
            TlsProtocol::Http2 => TlsContext::Openssl(Arc::new(OpensslContext::h2_preset(cert)?)),
            TlsProtocol::Quic => {
                TlsContext::Quic(build_quic_client_config(cert, self.quic_idle_timeout)?)
            }
        };
        debug!(
            "tls context built for {} (client cert: {})",
            protocol.as_str(),
            cert.is_some()
        );
        cache.insert(key, ctx.clone());
        Ok(ctx)
    }
}
