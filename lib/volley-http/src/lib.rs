/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod parse;
pub use parse::{HttpChunkedLine, HttpHeaderLine, HttpLineParseError, HttpStatusLine};

mod error;
pub use error::HttpReadError;

mod body;
pub use body::HttpBodyType;

mod reader;
pub use reader::{HttpResponseHead, HttpStreamReader};

mod cookie;
pub use cookie::SetCookie;

mod request;
pub use request::{
    LAST_CHUNK, append_query, basic_auth_value, cookie_header_value, encode_chunk,
    encode_request_head,
};
