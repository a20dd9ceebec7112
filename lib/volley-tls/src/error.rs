/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to build tls context: {0}")]
    Context(#[from] openssl::error::ErrorStack),
    #[error("failed to build quic tls config: {0}")]
    QuicConfig(String),
    #[error("failed to load {0}: {1}")]
    LoadFile(PathBuf, String),
    #[error("client certificate given without a private key")]
    MissingKey,
    #[error("tls handshake failed: {0}")]
    Handshake(String),
    #[error("alpn mismatch: expected {expected}, got {got}")]
    AlpnMismatch { expected: &'static str, got: String },
}

impl TlsError {
    pub fn get_type(&self) -> &'static str {
        match self {
            TlsError::Context(_) => "ContextError",
            TlsError::QuicConfig(_) => "QuicConfigError",
            TlsError::LoadFile(_, _) => "LoadFileError",
            TlsError::MissingKey => "MissingKey",
            TlsError::Handshake(_) => "HandshakeFailed",
            TlsError::AlpnMismatch { .. } => "AlpnMismatch",
        }
    }
}
