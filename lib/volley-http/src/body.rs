/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix10Checked;
use http::HeaderMap;
use http::header;

use crate::HttpReadError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpBodyType {
    Empty,
    ContentLength(u64),
    Chunked,
}

impl HttpBodyType {
    /// Decide how the response body is delimited.
    ///
    /// `Content-Length` wins over `Transfer-Encoding: chunked`. A response
    /// with neither carries no body.
    pub fn detect(
        code: u16,
        request_is_head: bool,
        headers: &HeaderMap,
    ) -> Result<Self, HttpReadError> {
        if request_is_head || (100..200).contains(&code) || code == 204 || code == 304 {
            return Ok(HttpBodyType::Empty);
        }

        if let Some(v) = headers.get(header::CONTENT_LENGTH) {
            let v = v.as_bytes();
            let (len, offset) = u64::from_radix_10_checked(v);
            let Some(len) = len else {
                return Err(HttpReadError::InvalidContentLength);
            };
            if offset == 0 || offset != v.len() {
                return Err(HttpReadError::InvalidContentLength);
            }
            return if len == 0 {
                Ok(HttpBodyType::Empty)
            } else {
                Ok(HttpBodyType::ContentLength(len))
            };
        }

        for v in headers.get_all(header::TRANSFER_ENCODING) {
            let Ok(s) = v.to_str() else {
                continue;
            };
            if s.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")) {
                return Ok(HttpBodyType::Chunked);
            }
        }

        Ok(HttpBodyType::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn content_length_first() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("4"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert_eq!(
            HttpBodyType::detect(200, false, &headers).unwrap(),
            HttpBodyType::ContentLength(4)
        );
        assert_eq!(
            HttpBodyType::detect(200, true, &headers).unwrap(),
            HttpBodyType::Empty
        );
    }

    #[test]
    fn chunked() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("gzip, Chunked"));
        assert_eq!(
            HttpBodyType::detect(200, false, &headers).unwrap(),
            HttpBodyType::Chunked
        );
    }

    #[test]
    fn none_or_bad() {
        let headers = HeaderMap::new();
        assert_eq!(
            HttpBodyType::detect(200, false, &headers).unwrap(),
            HttpBodyType::Empty
        );

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("4x"));
        assert!(HttpBodyType::detect(200, false, &headers).is_err());
    }
}
