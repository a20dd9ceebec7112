/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{Buf, Bytes, BytesMut};
use log::trace;
use volley_h2::hpack::{decode_int, decode_str_prefixed, encode_int};
use volley_h2::{HeaderField, HpackError};

use super::table::{DynamicTable, ENTRY_OVERHEAD, get_static};
use crate::QpackError;

pub enum DecodedSection {
    Done(Vec<HeaderField>),
    /// The section references entries that have not arrived on the encoder
    /// stream yet. It is kept and handed back by
    /// [`Decoder::on_encoder_stream`] once decodable.
    Blocked,
}

struct BlockedSection {
    stream_id: u64,
    required_insert_count: u64,
    block: Bytes,
}

pub struct Decoder {
    table: DynamicTable,
    max_blocked: usize,
    blocked: Vec<BlockedSection>,
    encoder_buf: BytesMut,
    known_received_count: u64,
    decoder_stream_out: Vec<u8>,
}

impl Decoder {
    pub fn new(max_table_capacity: usize, max_blocked: usize) -> Self {
        Decoder {
            table: DynamicTable::new(max_table_capacity),
            max_blocked,
            blocked: Vec::new(),
            encoder_buf: BytesMut::new(),
            known_received_count: 0,
            decoder_stream_out: Vec::new(),
        }
    }

    #[inline]
    pub fn insert_count(&self) -> u64 {
        self.table.insert_count()
    }

    #[inline]
    pub fn blocked_streams(&self) -> usize {
        self.blocked.len()
    }

    /// Bytes to be written on our QPACK decoder stream.
    pub fn take_decoder_stream_data(&mut self) -> Option<Vec<u8>> {
        if self.decoder_stream_out.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.decoder_stream_out))
        }
    }

    fn decode_required_insert_count(&self, encoded: u64) -> Result<u64, QpackError> {
        if encoded == 0 {
            return Ok(0);
        }
        let max_entries = (self.table.max_capacity() / ENTRY_OVERHEAD) as u64;
        let full_range = 2 * max_entries;
        if encoded > full_range {
            return Err(QpackError::InvalidRequiredInsertCount);
        }
        let max_value = self.table.insert_count() + max_entries;
        let max_wrapped = (max_value / full_range) * full_range;
        let mut ric = max_wrapped + encoded - 1;
        if ric > max_value {
            if ric <= full_range {
                return Err(QpackError::InvalidRequiredInsertCount);
            }
            ric -= full_range;
        }
        if ric == 0 {
            return Err(QpackError::InvalidRequiredInsertCount);
        }
        Ok(ric)
    }

    fn parse_prefix(&self, block: &[u8]) -> Result<(u64, u64, usize), QpackError> {
        let (encoded, n1) = decode_int(block, 8)?;
        let ric = self.decode_required_insert_count(encoded as u64)?;
        let rest = &block[n1..];
        let sign = rest.first().ok_or(QpackError::Truncated)? & 0x80 != 0;
        let (delta, n2) = decode_int(rest, 7)?;
        let delta = delta as u64;
        let base = if sign {
            ric.checked_sub(delta + 1)
                .ok_or(QpackError::InvalidRequiredInsertCount)?
        } else {
            ric + delta
        };
        Ok((ric, base, n1 + n2))
    }

    pub fn decode_section(
        &mut self,
        stream_id: u64,
        block: Bytes,
    ) -> Result<DecodedSection, QpackError> {
        let (ric, base, used) = self.parse_prefix(&block)?;
        if ric > self.table.insert_count() {
            if self.blocked.len() >= self.max_blocked {
                return Err(QpackError::TooManyBlockedStreams);
            }
            trace!("qpack section on stream {stream_id} blocked at insert count {ric}");
            self.blocked.push(BlockedSection {
                stream_id,
                required_insert_count: ric,
                block,
            });
            return Ok(DecodedSection::Blocked);
        }
        let fields = self.decode_lines(&block[used..], ric, base)?;
        self.ack_section(stream_id, ric);
        Ok(DecodedSection::Done(fields))
    }

    fn ack_section(&mut self, stream_id: u64, ric: u64) {
        if ric == 0 {
            return;
        }
        encode_int(stream_id as usize, 7, 0x80, &mut self.decoder_stream_out);
        if ric > self.known_received_count {
            self.known_received_count = ric;
        }
    }

    /// The request stream was reset before its field section was decoded.
    pub fn cancel_stream(&mut self, stream_id: u64) {
        self.blocked.retain(|b| b.stream_id != stream_id);
        if self.table.max_capacity() > 0 {
            encode_int(stream_id as usize, 6, 0x40, &mut self.decoder_stream_out);
        }
    }

    fn dynamic(&self, abs: u64, ric: u64) -> Result<HeaderField, QpackError> {
        if abs >= ric {
            return Err(QpackError::InvalidDynamicIndex(abs));
        }
        self.table.get_absolute(abs).cloned()
    }

    fn decode_lines(
        &self,
        mut buf: &[u8],
        ric: u64,
        base: u64,
    ) -> Result<Vec<HeaderField>, QpackError> {
        let mut fields = Vec::new();
        while let Some(&b) = buf.first() {
            if b & 0x80 != 0 {
                let (index, n) = decode_int(buf, 6)?;
                buf = &buf[n..];
                let field = if b & 0x40 != 0 {
                    get_static(index)?
                } else {
                    let abs = base
                        .checked_sub(index as u64 + 1)
                        .ok_or(QpackError::InvalidDynamicIndex(index as u64))?;
                    self.dynamic(abs, ric)?
                };
                fields.push(field);
            } else if b & 0x40 != 0 {
                let (index, n) = decode_int(buf, 4)?;
                buf = &buf[n..];
                let name = if b & 0x10 != 0 {
                    get_static(index)?.name
                } else {
                    let abs = base
                        .checked_sub(index as u64 + 1)
                        .ok_or(QpackError::InvalidDynamicIndex(index as u64))?;
                    self.dynamic(abs, ric)?.name
                };
                let (value, n) = decode_str_prefixed(buf, 7)?;
                buf = &buf[n..];
                fields.push(HeaderField { name, value });
            } else if b & 0x20 != 0 {
                let (name, n) = decode_str_prefixed(buf, 3)?;
                buf = &buf[n..];
                let (value, n) = decode_str_prefixed(buf, 7)?;
                buf = &buf[n..];
                fields.push(HeaderField { name, value });
            } else if b & 0x10 != 0 {
                let (index, n) = decode_int(buf, 4)?;
                buf = &buf[n..];
                fields.push(self.dynamic(base + index as u64, ric)?);
            } else {
                let (index, n) = decode_int(buf, 3)?;
                buf = &buf[n..];
                let name = self.dynamic(base + index as u64, ric)?.name;
                let (value, n) = decode_str_prefixed(buf, 7)?;
                buf = &buf[n..];
                fields.push(HeaderField { name, value });
            }
        }
        Ok(fields)
    }

    /// Apply one instruction from the front of `buf`. Returns the number of
    /// bytes consumed, or `None` if the instruction is incomplete.
    fn apply_instruction(&mut self, buf: &[u8]) -> Result<Option<usize>, QpackError> {
        let Some(&b) = buf.first() else {
            return Ok(None);
        };
        let r = if b & 0x80 != 0 {
            self.insert_with_name_ref(b, buf)
        } else if b & 0x40 != 0 {
            decode_str_prefixed(buf, 5).and_then(|(name, n1)| {
                let (value, n2) = decode_str_prefixed(&buf[n1..], 7)?;
                Ok((HeaderField { name, value }, n1 + n2))
            })
            .map_err(QpackError::from)
            .and_then(|(field, n)| {
                self.table.insert(field)?;
                Ok(n)
            })
        } else if b & 0x20 != 0 {
            decode_int(buf, 5)
                .map_err(QpackError::from)
                .and_then(|(cap, n)| {
                    self.table.set_capacity(cap)?;
                    Ok(n)
                })
        } else {
            decode_int(buf, 5)
                .map_err(QpackError::from)
                .and_then(|(index, n)| {
                    let field = self.table.get_relative(index as u64)?.clone();
                    self.table.insert(field)?;
                    Ok(n)
                })
        };
        match r {
            Ok(n) => Ok(Some(n)),
            Err(QpackError::Prefix(HpackError::Truncated)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn insert_with_name_ref(&mut self, b: u8, buf: &[u8]) -> Result<usize, QpackError> {
        let (index, n1) = decode_int(buf, 6)?;
        // value is parsed before the table is touched so a truncated
        // instruction can be retried as a whole
        let (value, n2) = decode_str_prefixed(&buf[n1..], 7)?;
        let name = if b & 0x40 != 0 {
            get_static(index)?.name
        } else {
            self.table.get_relative(index as u64)?.name.clone()
        };
        self.table.insert(HeaderField { name, value })?;
        Ok(n1 + n2)
    }

    /// Feed bytes received on the peer's QPACK encoder stream. Returns the
    /// field sections that became decodable.
    pub fn on_encoder_stream(
        &mut self,
        data: &[u8],
    ) -> Result<Vec<(u64, Vec<HeaderField>)>, QpackError> {
        self.encoder_buf.extend_from_slice(data);
        loop {
            let buf = self.encoder_buf.split().freeze();
            match self.apply_instruction(&buf)? {
                Some(n) => {
                    self.encoder_buf.extend_from_slice(&buf[n..]);
                }
                None => {
                    self.encoder_buf.extend_from_slice(&buf);
                    break;
                }
            }
        }

        let insert_count = self.table.insert_count();
        if insert_count > self.known_received_count {
            let inc = insert_count - self.known_received_count;
            encode_int(inc as usize, 6, 0x00, &mut self.decoder_stream_out);
            self.known_received_count = insert_count;
        }

        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.blocked.len() {
            if self.blocked[i].required_insert_count > insert_count {
                i += 1;
                continue;
            }
            let section = self.blocked.remove(i);
            let mut block = section.block;
            let (ric, base, used) = self.parse_prefix(&block)?;
            block.advance(used);
            let fields = self.decode_lines(&block, ric, base)?;
            self.ack_section(section.stream_id, ric);
            ready.push((section.stream_id, fields));
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_h2::hpack::encode_str_prefixed;

    fn section_prefix(encoded_ric: usize, delta_base: usize, negative: bool, out: &mut Vec<u8>) {
        encode_int(encoded_ric, 8, 0x00, out);
        encode_int(delta_base, 7, if negative { 0x80 } else { 0x00 }, out);
    }

    #[test]
    fn static_only() {
        let mut dec = Decoder::new(0, 0);
        let mut block = Vec::new();
        section_prefix(0, 0, false, &mut block);
        encode_int(25, 6, 0xc0, &mut block); // :status 200
        encode_int(44, 4, 0x50, &mut block); // content-type
        encode_str_prefixed(b"text/plain", 7, 0x00, &mut block);
        encode_str_prefixed(b"x-trace", 3, 0x20, &mut block);
        encode_str_prefixed(b"abc", 7, 0x00, &mut block);

        let DecodedSection::Done(fields) = dec.decode_section(0, Bytes::from(block)).unwrap()
        else {
            panic!("blocked");
        };
        assert_eq!(
            fields,
            vec![
                HeaderField::from_static(":status", "200"),
                HeaderField::from_static("content-type", "text/plain"),
                HeaderField::from_static("x-trace", "abc"),
            ]
        );
        assert!(dec.take_decoder_stream_data().is_none());
    }

    #[test]
    fn dynamic_and_blocked() {
        let mut dec = Decoder::new(220, 4);

        // section referencing the first dynamic entry, sent before the insert
        let mut block = Vec::new();
        // max entries 6, full range 12, ric 1 encodes as 2
        section_prefix(2, 0, false, &mut block);
        encode_int(0, 6, 0x80, &mut block); // dynamic relative 0 -> abs 0
        let block = Bytes::from(block);

        assert!(matches!(
            dec.decode_section(4, block).unwrap(),
            DecodedSection::Blocked
        ));
        assert_eq!(dec.blocked_streams(), 1);

        let mut enc = Vec::new();
        encode_int(220, 5, 0x20, &mut enc); // set capacity
        encode_str_prefixed(b"custom-key", 5, 0x40, &mut enc);
        encode_str_prefixed(b"custom-value", 7, 0x00, &mut enc);

        // split mid instruction
        let ready = dec.on_encoder_stream(&enc[..5]).unwrap();
        assert!(ready.is_empty());
        let ready = dec.on_encoder_stream(&enc[5..]).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, 4);
        assert_eq!(
            ready[0].1,
            vec![HeaderField::from_static("custom-key", "custom-value")]
        );
        assert_eq!(dec.blocked_streams(), 0);

        // insert count increment 1, section ack for stream 4
        assert_eq!(dec.take_decoder_stream_data().unwrap(), vec![0x01, 0x84]);
    }

    #[test]
    fn duplicate_and_post_base() {
        let mut dec = Decoder::new(4096, 0);
        let mut enc = Vec::new();
        encode_int(4096, 5, 0x20, &mut enc);
        encode_int(0, 6, 0xc0, &mut enc); // static name :authority
        encode_str_prefixed(b"example.com", 7, 0x00, &mut enc);
        encode_int(0, 5, 0x00, &mut enc); // duplicate newest
        dec.on_encoder_stream(&enc).unwrap();
        assert_eq!(dec.insert_count(), 2);

        // ric 2 (encoded 3 with max entries 128), base 1 (negative delta 0)
        let mut block = Vec::new();
        section_prefix(3, 0, true, &mut block);
        encode_int(0, 6, 0x80, &mut block); // relative 0 -> abs 0
        encode_int(0, 4, 0x10, &mut block); // post-base 0 -> abs 1
        let DecodedSection::Done(fields) = dec.decode_section(0, Bytes::from(block)).unwrap()
        else {
            panic!("blocked");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], fields[1]);
        assert_eq!(fields[0].value.as_ref(), b"example.com");
    }

    #[test]
    fn blocked_limit() {
        let mut dec = Decoder::new(4096, 0);
        let mut block = Vec::new();
        section_prefix(2, 0, false, &mut block);
        encode_int(0, 6, 0x80, &mut block);
        assert!(matches!(
            dec.decode_section(0, Bytes::from(block)),
            Err(QpackError::TooManyBlockedStreams)
        ));
    }

    #[test]
    fn bad_required_insert_count() {
        let mut dec = Decoder::new(0, 0);
        let mut block = Vec::new();
        section_prefix(1, 0, false, &mut block);
        assert!(dec.decode_section(0, Bytes::from(block)).is_err());
    }
}
