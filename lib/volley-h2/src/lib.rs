/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::{ErrorCode, H2Error, HpackError};

pub mod frame;

mod settings;
pub use settings::{DEFAULT_MAX_FRAME_SIZE, MAX_WINDOW_SIZE, Settings};

mod flow;
pub use flow::{DEFAULT_WINDOW_SIZE, FlowWindow, RecvWindow};

pub mod hpack;
pub use hpack::HeaderField;

mod client;
pub use client::{CONNECTION_PREFACE, ClientConnection, H2Event, strip_preface};
