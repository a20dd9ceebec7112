/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;

use volley_h2::HeaderField;

use crate::QpackError;

/// Per-entry overhead counted against the table capacity.
pub const ENTRY_OVERHEAD: usize = 32;

pub static STATIC_TABLE: [(&str, &str); 99] = [
    (":authority", ""),
    (":path", "/"),
    ("age", "0"),
    ("content-disposition", ""),
    ("content-length", "0"),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("referer", ""),
    ("set-cookie", ""),
    (":method", "CONNECT"),
    (":method", "DELETE"),
    (":method", "GET"),
    (":method", "HEAD"),
    (":method", "OPTIONS"),
    (":method", "POST"),
    (":method", "PUT"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "103"),
    (":status", "200"),
    (":status", "304"),
    (":status", "404"),
    (":status", "503"),
    ("accept", "*/*"),
    ("accept", "application/dns-message"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-ranges", "bytes"),
    ("access-control-allow-headers", "cache-control"),
    ("access-control-allow-headers", "content-type"),
    ("access-control-allow-origin", "*"),
    ("cache-control", "max-age=0"),
    ("cache-control", "max-age=2592000"),
    ("cache-control", "max-age=604800"),
    ("cache-control", "no-cache"),
    ("cache-control", "no-store"),
    ("cache-control", "public, max-age=31536000"),
    ("content-encoding", "br"),
    ("content-encoding", "gzip"),
    ("content-type", "application/dns-message"),
    ("content-type", "application/javascript"),
    ("content-type", "application/json"),
    ("content-type", "application/x-www-form-urlencoded"),
    ("content-type", "image/gif"),
    ("content-type", "image/jpeg"),
    ("content-type", "image/png"),
    ("content-type", "text/css"),
    ("content-type", "text/html; charset=utf-8"),
    ("content-type", "text/plain"),
    ("content-type", "text/plain;charset=utf-8"),
    ("range", "bytes=0-"),
    ("strict-transport-security", "max-age=31536000"),
    ("strict-transport-security", "max-age=31536000; includesubdomains"),
    ("strict-transport-security", "max-age=31536000; includesubdomains; preload"),
    ("vary", "accept-encoding"),
    ("vary", "origin"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (":status", "100"),
    (":status", "204"),
    (":status", "206"),
    (":status", "302"),
    (":status", "400"),
    (":status", "403"),
    (":status", "421"),
    (":status", "425"),
    (":status", "500"),
    ("accept-language", ""),
    ("access-control-allow-credentials", "FALSE"),
    ("access-control-allow-credentials", "TRUE"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "get"),
    ("access-control-allow-methods", "get, post, options"),
    ("access-control-allow-methods", "options"),
    ("access-control-expose-headers", "content-length"),
    ("access-control-request-headers", "content-type"),
    ("access-control-request-method", "get"),
    ("access-control-request-method", "post"),
    ("alt-svc", "clear"),
    ("authorization", ""),
    ("content-security-policy", "script-src 'none'; object-src 'none'; base-uri 'none'"),
    ("early-data", "1"),
    ("expect-ct", ""),
    ("forwarded", ""),
    ("if-range", ""),
    ("origin", ""),
    ("purpose", "prefetch"),
    ("server", ""),
    ("timing-allow-origin", "*"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", ""),
    ("x-forwarded-for", ""),
    ("x-frame-options", "deny"),
    ("x-frame-options", "sameorigin"),
];

pub enum StaticMatch {
    Full(usize),
    Name(usize),
    None,
}

/// Indices are zero based in QPACK.
pub fn find_static(name: &[u8], value: &[u8]) -> StaticMatch {
    let mut name_match = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return StaticMatch::Full(i);
            }
            if name_match.is_none() {
                name_match = Some(i);
            }
        }
    }
    match name_match {
        Some(i) => StaticMatch::Name(i),
        None => StaticMatch::None,
    }
}

pub fn get_static(index: usize) -> Result<HeaderField, QpackError> {
    STATIC_TABLE
        .get(index)
        .map(|(n, v)| HeaderField::from_static(n, v))
        .ok_or(QpackError::InvalidStaticIndex(index))
}

fn entry_size(f: &HeaderField) -> usize {
    f.name.len() + f.value.len() + ENTRY_OVERHEAD
}

/// Dynamic table addressed by absolute index.
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    /// Number of entries evicted so far, which is also the absolute index of
    /// the oldest entry still present.
    dropped: u64,
    size: usize,
    capacity: usize,
    max_capacity: usize,
}

impl DynamicTable {
    pub fn new(max_capacity: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            dropped: 0,
            size: 0,
            capacity: 0,
            max_capacity,
        }
    }

    #[inline]
    pub fn insert_count(&self) -> u64 {
        self.dropped + self.entries.len() as u64
    }

    #[inline]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), QpackError> {
        if capacity > self.max_capacity {
            return Err(QpackError::CapacityOverLimit(capacity));
        }
        self.capacity = capacity;
        self.evict_to(capacity);
        Ok(())
    }

    fn evict_to(&mut self, limit: usize) {
        while self.size > limit {
            let Some(f) = self.entries.pop_front() else {
                break;
            };
            self.size -= entry_size(&f);
            self.dropped += 1;
        }
    }

    pub fn insert(&mut self, field: HeaderField) -> Result<(), QpackError> {
        let size = entry_size(&field);
        if size > self.capacity {
            return Err(QpackError::EntryTooLarge);
        }
        self.evict_to(self.capacity - size);
        self.size += size;
        self.entries.push_back(field);
        Ok(())
    }

    pub fn get_absolute(&self, index: u64) -> Result<&HeaderField, QpackError> {
        index
            .checked_sub(self.dropped)
            .and_then(|i| self.entries.get(i as usize))
            .ok_or(QpackError::InvalidDynamicIndex(index))
    }

    /// Relative index on the encoder stream counts back from the newest entry.
    pub fn get_relative(&self, index: u64) -> Result<&HeaderField, QpackError> {
        let abs = self
            .insert_count()
            .checked_sub(index + 1)
            .ok_or(QpackError::InvalidDynamicIndex(index))?;
        self.get_absolute(abs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_lookup() {
        assert!(matches!(find_static(b":method", b"GET"), StaticMatch::Full(17)));
        assert!(matches!(find_static(b":status", b"200"), StaticMatch::Full(25)));
        assert!(matches!(find_static(b":path", b"/index"), StaticMatch::Name(1)));
        assert!(matches!(find_static(b"x-custom", b""), StaticMatch::None));
        assert_eq!(get_static(98).unwrap().value.as_ref(), b"sameorigin");
        assert!(get_static(99).is_err());
    }

    #[test]
    fn eviction() {
        let mut t = DynamicTable::new(100);
        t.set_capacity(100).unwrap();
        t.insert(HeaderField::new("aaaa", "1111")).unwrap(); // 40
        t.insert(HeaderField::new("bbbb", "2222")).unwrap(); // 80
        t.insert(HeaderField::new("cccc", "3333")).unwrap(); // evicts aaaa
        assert_eq!(t.insert_count(), 3);
        assert!(t.get_absolute(0).is_err());
        assert_eq!(t.get_absolute(1).unwrap().name.as_ref(), b"bbbb");
        assert_eq!(t.get_relative(0).unwrap().name.as_ref(), b"cccc");
        assert_eq!(t.size(), 80);

        assert!(t.insert(HeaderField::new(vec![b'x'; 80], "")).is_err());
        assert!(t.set_capacity(101).is_err());
        t.set_capacity(40).unwrap();
        assert_eq!(t.get_relative(0).unwrap().name.as_ref(), b"cccc");
        assert!(t.get_absolute(1).is_err());
    }
}
