/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::ResolveError;

mod config;
pub use config::{AddressFamily, ResolveKey, SocketConfig, Transport};

mod driver;
pub use driver::{ResolveDriver, SystemDriver};

mod cache;
pub use cache::DnsCache;
