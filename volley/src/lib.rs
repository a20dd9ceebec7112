/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod duration;
mod logger;
mod opts;
mod pool;
mod timeouts;

pub mod action;
pub mod build;
pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod hooks;
pub mod persona;
pub mod result;
pub mod stats;
pub mod target;
pub mod url;

pub use action::{Action, Protocol};
pub use context::EngineContext;
pub use error::ActionError;
pub use logger::setup as setup_log;
pub use opts::{ProcArgs, add_global_args, parse_global_args};
pub use result::ActionResult;
pub use timeouts::Timeouts;
pub use self::url::EndpointUrl;
