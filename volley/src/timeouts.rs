/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::future::Future;
use std::time::Duration;

use crate::ActionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub total: Duration,
    pub read: Duration,
}

impl Timeouts {
    /// `connect` and `read` never exceed `total`.
    pub fn new(connect: Duration, total: Duration, read: Duration) -> Self {
        Timeouts {
            connect: connect.min(total),
            total,
            read: read.min(total),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts::new(
            Duration::from_secs(15),
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }
}

/// Bound one read step.
pub(crate) async fn read_timeout<F, T, E>(timeout: Duration, fut: F) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ActionError>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(r) => r.map_err(Into::into),
        Err(_) => Err(ActionError::Timeout),
    }
}

/// Bound a connection setup step. Running out of time here is a connect
/// failure rather than a request timeout.
pub(crate) async fn connect_timeout<F, T, E>(timeout: Duration, fut: F) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ActionError>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(r) => r.map_err(Into::into),
        Err(_) => Err(ActionError::Connect(format!(
            "timed out after {timeout:?}"
        ))),
    }
}
