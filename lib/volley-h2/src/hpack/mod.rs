/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;

use crate::HpackError;

pub mod huffman;
mod table;

use table::{DynamicTable, ENTRY_OVERHEAD, STATIC_TABLE, TableMatch, find_static};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn from_static(name: &'static str, value: &'static str) -> Self {
        HeaderField {
            name: Bytes::from_static(name.as_bytes()),
            value: Bytes::from_static(value.as_bytes()),
        }
    }

    #[inline]
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    /// Size as accounted by the dynamic table.
    #[inline]
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

pub fn encode_int(value: usize, prefix_bits: u8, first_byte: u8, out: &mut Vec<u8>) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(first_byte | value as u8);
        return;
    }
    out.push(first_byte | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        out.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    out.push(rest as u8);
}

/// Returns the value and the number of bytes used.
pub fn decode_int(buf: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    let Some(first) = buf.first() else {
        return Err(HpackError::Truncated);
    };
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = (*first as usize) & max_prefix;
    if value < max_prefix {
        return Ok((value, 1));
    }
    let mut shift = 0u32;
    for (i, b) in buf[1..].iter().enumerate() {
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        value += ((*b & 0x7f) as usize) << shift;
        if b & 0x80 == 0 {
            return Ok((value, i + 2));
        }
        shift += 7;
    }
    Err(HpackError::Truncated)
}

pub(crate) fn encode_str(s: &[u8], out: &mut Vec<u8>) {
    encode_str_prefixed(s, 7, 0x00, out)
}

pub(crate) fn decode_str(buf: &[u8]) -> Result<(Bytes, usize), HpackError> {
    decode_str_prefixed(buf, 7)
}

/// Encode a string literal whose length uses a `prefix_bits` integer. The
/// huffman flag is the bit just above the prefix.
pub fn encode_str_prefixed(s: &[u8], prefix_bits: u8, first_byte: u8, out: &mut Vec<u8>) {
    let huffman_flag = 1u8 << prefix_bits;
    let huff_len = huffman::encoded_len(s);
    if huff_len < s.len() {
        encode_int(huff_len, prefix_bits, first_byte | huffman_flag, out);
        huffman::encode(s, out);
    } else {
        encode_int(s.len(), prefix_bits, first_byte, out);
        out.extend_from_slice(s);
    }
}

pub fn decode_str_prefixed(buf: &[u8], prefix_bits: u8) -> Result<(Bytes, usize), HpackError> {
    let Some(first) = buf.first() else {
        return Err(HpackError::Truncated);
    };
    let huffman_coded = first & (1u8 << prefix_bits) != 0;
    let (len, used) = decode_int(buf, prefix_bits)?;
    let end = used.checked_add(len).ok_or(HpackError::IntegerOverflow)?;
    if buf.len() < end {
        return Err(HpackError::Truncated);
    }
    let raw = &buf[used..end];
    let s = if huffman_coded {
        let mut plain = Vec::with_capacity(raw.len() * 8 / 5);
        huffman::decode(raw, &mut plain)?;
        Bytes::from(plain)
    } else {
        Bytes::copy_from_slice(raw)
    };
    Ok((s, end))
}

/// Header names whose values must never enter a compression table.
fn is_sensitive(name: &[u8]) -> bool {
    matches!(name, b"authorization" | b"proxy-authorization")
}

pub struct Encoder {
    table: DynamicTable,
    pending_size_update: Option<usize>,
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::new(4096)
    }
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Encoder {
            table: DynamicTable::new(max_table_size),
            pending_size_update: None,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE. The change is announced
    /// at the start of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size != self.table.max_size() {
            self.table.set_max_size(size);
            self.pending_size_update = Some(size);
        }
    }

    /// Encode a header list. Names are lowercased on the way out.
    pub fn encode<'a, I>(&mut self, fields: I, out: &mut Vec<u8>)
    where
        I: IntoIterator<Item = &'a HeaderField>,
    {
        if let Some(size) = self.pending_size_update.take() {
            encode_int(size, 5, 0x20, out);
        }
        for field in fields {
            let name = if field.name.iter().any(u8::is_ascii_uppercase) {
                Bytes::from(field.name.to_ascii_lowercase())
            } else {
                field.name.clone()
            };
            self.encode_field(name, field.value.clone(), out);
        }
    }

    fn encode_field(&mut self, name: Bytes, value: Bytes, out: &mut Vec<u8>) {
        let static_match = find_static(&name, &value);
        if let TableMatch::Full(idx) = static_match {
            encode_int(idx, 7, 0x80, out);
            return;
        }

        let dynamic_match = self.table.find(&name, &value);
        if let TableMatch::Full(idx) = dynamic_match {
            encode_int(STATIC_TABLE.len() + 1 + idx, 7, 0x80, out);
            return;
        }

        let name_idx = match (static_match, dynamic_match) {
            (TableMatch::Name(i), _) => Some(i),
            (_, TableMatch::Name(i)) => Some(STATIC_TABLE.len() + 1 + i),
            _ => None,
        };

        if is_sensitive(&name) {
            match name_idx {
                Some(i) => encode_int(i, 4, 0x10, out),
                None => {
                    out.push(0x10);
                    encode_str(&name, out);
                }
            }
            encode_str(&value, out);
            return;
        }

        match name_idx {
            Some(i) => encode_int(i, 6, 0x40, out),
            None => {
                out.push(0x40);
                encode_str(&name, out);
            }
        }
        encode_str(&value, out);
        self.table.insert(name, value);
    }
}

pub struct Decoder {
    table: DynamicTable,
    max_allowed_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(4096)
    }
}

impl Decoder {
    pub fn new(max_allowed_size: usize) -> Self {
        Decoder {
            table: DynamicTable::new(max_allowed_size),
            max_allowed_size,
        }
    }

    fn lookup(&self, idx: usize) -> Result<HeaderField, HpackError> {
        if idx == 0 {
            return Err(HpackError::InvalidIndex(idx));
        }
        if idx <= STATIC_TABLE.len() {
            let (n, v) = STATIC_TABLE[idx - 1];
            return Ok(HeaderField::from_static(n, v));
        }
        self.table
            .get(idx - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or(HpackError::InvalidIndex(idx))
    }

    fn literal(
        &self,
        block: &[u8],
        prefix_bits: u8,
    ) -> Result<(HeaderField, usize), HpackError> {
        let (idx, mut pos) = decode_int(block, prefix_bits)?;
        let name = if idx == 0 {
            let (name, used) = decode_str(&block[pos..])?;
            pos += used;
            name
        } else {
            self.lookup(idx)?.name
        };
        let (value, used) = decode_str(&block[pos..])?;
        pos += used;
        Ok((HeaderField { name, value }, pos))
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut fields = Vec::new();
        let mut pos = 0;
        while pos < block.len() {
            let b = block[pos];
            let rest = &block[pos..];
            if b & 0x80 != 0 {
                let (idx, used) = decode_int(rest, 7)?;
                fields.push(self.lookup(idx)?);
                pos += used;
            } else if b & 0xc0 == 0x40 {
                let (field, used) = self.literal(rest, 6)?;
                self.table.insert(field.name.clone(), field.value.clone());
                fields.push(field);
                pos += used;
            } else if b & 0xe0 == 0x20 {
                if !fields.is_empty() {
                    return Err(HpackError::LateTableSizeUpdate);
                }
                let (size, used) = decode_int(rest, 5)?;
                if size > self.max_allowed_size {
                    return Err(HpackError::TableSizeOverLimit(size));
                }
                self.table.set_max_size(size);
                pos += used;
            } else {
                // without indexing (0x00) and never indexed (0x10)
                let (field, used) = self.literal(rest, 4)?;
                fields.push(field);
                pos += used;
            }
        }
        Ok(fields)
    }
}
