/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use volley_h2::H2Error;
use volley_h3::{H3Error, QpackError};
use volley_http::HttpReadError;
use volley_resolver::ResolveError;
use volley_tls::TlsError;

/// Failure of one action execution, rendered into the result record.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("resolution failed: {0}")]
    Resolution(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("Request timed out.")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("Request cancelled.")]
    Cancelled,
    #[error("{0}")]
    User(String),
}

impl ActionError {
    pub fn get_type(&self) -> &'static str {
        match self {
            ActionError::Resolution(_) => "ResolutionError",
            ActionError::Connect(_) => "ConnectError",
            ActionError::Tls(_) => "TlsError",
            ActionError::Timeout => "Timeout",
            ActionError::Protocol(_) => "ProtocolError",
            ActionError::Cancelled => "Cancelled",
            ActionError::User(_) => "UserError",
        }
    }

    /// Synthetic status code reported on the result.
    pub fn status(&self) -> Option<u16> {
        match self {
            ActionError::Timeout => Some(408),
            ActionError::Resolution(_)
            | ActionError::Connect(_)
            | ActionError::Tls(_)
            | ActionError::Protocol(_) => Some(400),
            ActionError::Cancelled | ActionError::User(_) => None,
        }
    }

    pub(crate) fn protocol<E: std::fmt::Display>(e: E) -> Self {
        ActionError::Protocol(e.to_string())
    }

    pub(crate) fn connect<E: std::fmt::Display>(e: E) -> Self {
        ActionError::Connect(e.to_string())
    }
}

impl From<ResolveError> for ActionError {
    fn from(e: ResolveError) -> Self {
        ActionError::Resolution(e.to_string())
    }
}

impl From<TlsError> for ActionError {
    fn from(e: TlsError) -> Self {
        ActionError::Tls(e.to_string())
    }
}

impl From<HttpReadError> for ActionError {
    fn from(e: HttpReadError) -> Self {
        if e.is_protocol() {
            ActionError::Protocol(e.to_string())
        } else {
            ActionError::Connect(e.to_string())
        }
    }
}

impl From<H2Error> for ActionError {
    fn from(e: H2Error) -> Self {
        ActionError::Protocol(format!("{}: {e}", e.get_type()))
    }
}

impl From<H3Error> for ActionError {
    fn from(e: H3Error) -> Self {
        ActionError::Protocol(format!("{}: {e}", e.get_type()))
    }
}

impl From<QpackError> for ActionError {
    fn from(e: QpackError) -> Self {
        ActionError::Protocol(format!("qpack: {e}"))
    }
}

impl From<io::Error> for ActionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => ActionError::Timeout,
            io::ErrorKind::InvalidData => ActionError::Protocol(e.to_string()),
            _ => ActionError::Connect(e.to_string()),
        }
    }
}
