/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("empty host name")]
    EmptyHost,
    #[error("no reachable address for {0}")]
    NoCandidate(String),
    #[error("dns lookup timed out")]
    Timeout,
    #[error("dns lookup failed: {0}")]
    Lookup(#[from] io::Error),
}

impl ResolveError {
    pub fn get_type(&self) -> &'static str {
        match self {
            ResolveError::EmptyHost => "EmptyHost",
            ResolveError::NoCandidate(_) => "NoCandidate",
            ResolveError::Timeout => "DnsTimeout",
            ResolveError::Lookup(_) => "LookupFailed",
        }
    }
}
