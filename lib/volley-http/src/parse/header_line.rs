/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::HttpLineParseError;

pub struct HttpHeaderLine<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> HttpHeaderLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpHeaderLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(buf)?;
        let Some(p) = memchr::memchr(b':', line.as_bytes()) else {
            return Err(HttpLineParseError::NoDelimiterFound(':'));
        };

        let name = line[0..p].trim();
        if name.is_empty() {
            return Err(HttpLineParseError::InvalidHeaderName);
        }
        let value = line[p + 1..].trim();

        Ok(HttpHeaderLine { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_whitespace() {
        let h = HttpHeaderLine::parse(b"Content-Length: 4  \r\n").unwrap();
        assert_eq!(h.name, "Content-Length");
        assert_eq!(h.value, "4");
    }

    #[test]
    fn colon_in_value() {
        let h = HttpHeaderLine::parse(b"Location: http://a.test:8080/x\r\n").unwrap();
        assert_eq!(h.name, "Location");
        assert_eq!(h.value, "http://a.test:8080/x");
    }

    #[test]
    fn no_name() {
        assert!(HttpHeaderLine::parse(b": x\r\n").is_err());
        assert!(HttpHeaderLine::parse(b"no delimiter\r\n").is_err());
    }
}
