/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix10;
use http::Version;

use super::HttpLineParseError;

/// The first line of a response, borrowed from the read buffer.
pub struct HttpStatusLine<'a> {
    pub version: Version,
    pub code: u16,
    pub reason: &'a str,
}

impl<'a> HttpStatusLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpStatusLine<'a>, HttpLineParseError> {
        const MINIMAL_LENGTH: usize = 13; // HTTP/1.x XYZ\n

        if buf.len() < MINIMAL_LENGTH {
            return Err(HttpLineParseError::NotLongEnough);
        }

        let Some(p) = memchr::memchr(b' ', buf) else {
            return Err(HttpLineParseError::NoDelimiterFound(' '));
        };
        let version = match &buf[0..p] {
            b"HTTP/1.0" => Version::HTTP_10,
            b"HTTP/1.1" => Version::HTTP_11,
            b"HTTP/2.0" | b"HTTP/2" => Version::HTTP_2,
            v if v.eq_ignore_ascii_case(b"http/1.1") => Version::HTTP_11,
            v if v.eq_ignore_ascii_case(b"http/1.0") => Version::HTTP_10,
            _ => return Err(HttpLineParseError::InvalidVersion),
        };

        // tolerate extra spaces between version and code
        let mut left = &buf[p + 1..];
        while let Some(b' ') = left.first() {
            left = &left[1..];
        }
        let (code, len) = u16::from_radix_10(left);
        if len != 3 || !(100..1000).contains(&code) {
            return Err(HttpLineParseError::InvalidStatusCode);
        }

        let reason = match left.get(len) {
            None | Some(b'\r') | Some(b'\n') => "",
            Some(b' ') => std::str::from_utf8(&left[len + 1..])?.trim(),
            Some(_) => return Err(HttpLineParseError::InvalidStatusCode),
        };

        Ok(HttpStatusLine {
            version,
            code,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal() {
        let s = HttpStatusLine::parse(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(s.version, Version::HTTP_11);
        assert_eq!(s.code, 200);
        assert_eq!(s.reason, "OK");
    }

    #[test]
    fn no_reason() {
        let s = HttpStatusLine::parse(b"HTTP/1.1 200\r\n").unwrap();
        assert_eq!(s.version, Version::HTTP_11);
        assert_eq!(s.code, 200);
        assert_eq!(s.reason, "");
    }

    #[test]
    fn multi_word_reason() {
        let s = HttpStatusLine::parse(b"HTTP/1.0 101 Switching Protocols  \r\n").unwrap();
        assert_eq!(s.version, Version::HTTP_10);
        assert_eq!(s.code, 101);
        assert_eq!(s.reason, "Switching Protocols");
    }

    #[test]
    fn invalid() {
        assert!(HttpStatusLine::parse(b"HTTP/1.1 20\r\n").is_err());
        assert!(HttpStatusLine::parse(b"SIP/2.0 200 OK\r\n").is_err());
        assert!(HttpStatusLine::parse(b"HTTP/1.1 2000 OK\r\n").is_err());
    }
}
