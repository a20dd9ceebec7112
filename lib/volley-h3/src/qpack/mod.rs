/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod decoder;
mod encoder;
mod table;

pub use decoder::{DecodedSection, Decoder};
pub use encoder::Encoder;
pub use table::{DynamicTable, STATIC_TABLE};
