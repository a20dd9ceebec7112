/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::{H3Error, H3ErrorCode, QpackError};

pub mod varint;

mod settings;
pub use settings::H3Settings;

pub mod frame;
pub mod qpack;

mod stream;
pub use stream::{
    ControlEvent, ControlStreamReader, HeadersState, ResponseFrame, ResponseStreamReader,
    UniStreamType, encode_control_preamble,
};

pub use volley_h2::HeaderField;

pub const ALPN_H3: &[u8] = b"h3";
