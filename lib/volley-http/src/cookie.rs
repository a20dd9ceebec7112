/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use http::HeaderMap;
use http::header;

/// One cookie taken from a `Set-Cookie` response header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub attributes: Vec<(String, Option<String>)>,
}

impl SetCookie {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(';');
        let pair = parts.next()?;
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let value = value.trim().trim_matches('"');

        let attributes = parts
            .filter_map(|attr| {
                let attr = attr.trim();
                if attr.is_empty() {
                    return None;
                }
                match attr.split_once('=') {
                    Some((k, v)) => Some((k.trim().to_string(), Some(v.trim().to_string()))),
                    None => Some((attr.to_string(), None)),
                }
            })
            .collect();

        Some(SetCookie {
            name: name.to_string(),
            value: value.to_string(),
            attributes,
        })
    }

    pub fn attribute(&self, name: &str) -> Option<Option<&str>> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

    /// Collect every parsable `Set-Cookie` header of a response.
    pub fn collect(headers: &HeaderMap) -> Vec<SetCookie> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(SetCookie::parse)
            .collect()
    }
}
