/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;

use bytes::Bytes;

use super::HeaderField;

pub(crate) const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

pub(crate) enum TableMatch {
    Full(usize),
    Name(usize),
    None,
}

/// Search the static table. Indices returned are 1 based.
pub(crate) fn find_static(name: &[u8], value: &[u8]) -> TableMatch {
    let mut name_idx = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return TableMatch::Full(i + 1);
            }
            if name_idx.is_none() {
                name_idx = Some(i + 1);
            }
        }
    }
    match name_idx {
        Some(i) => TableMatch::Name(i),
        None => TableMatch::None,
    }
}

pub(crate) const ENTRY_OVERHEAD: usize = 32;

/// Newest entry first.
pub(crate) struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub(crate) fn new(max_size: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&HeaderField> {
        self.entries.get(idx)
    }

    pub(crate) fn find(&self, name: &[u8], value: &[u8]) -> TableMatch {
        let mut name_idx = None;
        for (i, f) in self.entries.iter().enumerate() {
            if f.name.as_ref() == name {
                if f.value.as_ref() == value {
                    return TableMatch::Full(i);
                }
                if name_idx.is_none() {
                    name_idx = Some(i);
                }
            }
        }
        match name_idx {
            Some(i) => TableMatch::Name(i),
            None => TableMatch::None,
        }
    }

    pub(crate) fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict(0);
    }

    pub(crate) fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry_size = name.len() + value.len() + ENTRY_OVERHEAD;
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict(entry_size);
        self.size += entry_size;
        self.entries.push_front(HeaderField { name, value });
    }

    fn evict(&mut self, incoming: usize) {
        while self.size + incoming > self.max_size {
            let Some(f) = self.entries.pop_back() else {
                break;
            };
            self.size -= f.size();
        }
    }
}
