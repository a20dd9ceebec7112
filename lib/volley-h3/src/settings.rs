/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::BufMut;

use crate::{H3Error, varint};

pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
pub const MAX_FIELD_SECTION_SIZE: u64 = 0x06;
pub const QPACK_BLOCKED_STREAMS: u64 = 0x07;
pub const ENABLE_CONNECT_PROTOCOL: u64 = 0x08;
pub const H3_DATAGRAM: u64 = 0x33;
pub const ENABLE_WEBTRANSPORT: u64 = 0x2b60_3742;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H3Settings {
    pub qpack_max_table_capacity: u64,
    pub max_field_section_size: Option<u64>,
    pub qpack_blocked_streams: u64,
    pub enable_connect_protocol: bool,
    pub h3_datagram: bool,
    pub enable_webtransport: bool,
}

impl H3Settings {
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut put = |id: u64, v: u64| {
            varint::encode(id, buf);
            varint::encode(v, buf);
        };
        if self.qpack_max_table_capacity > 0 {
            put(QPACK_MAX_TABLE_CAPACITY, self.qpack_max_table_capacity);
        }
        if let Some(v) = self.max_field_section_size {
            put(MAX_FIELD_SECTION_SIZE, v);
        }
        if self.qpack_blocked_streams > 0 {
            put(QPACK_BLOCKED_STREAMS, self.qpack_blocked_streams);
        }
        if self.enable_connect_protocol {
            put(ENABLE_CONNECT_PROTOCOL, 1);
        }
        if self.h3_datagram {
            put(H3_DATAGRAM, 1);
        }
        if self.enable_webtransport {
            put(ENABLE_WEBTRANSPORT, 1);
        }
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self, H3Error> {
        let mut s = H3Settings::default();
        let mut seen: Vec<u64> = Vec::new();
        while !payload.is_empty() {
            let (id, n) = varint::decode(payload).ok_or(H3Error::Frame("truncated SETTINGS"))?;
            payload = &payload[n..];
            let (v, n) = varint::decode(payload).ok_or(H3Error::Frame("truncated SETTINGS"))?;
            payload = &payload[n..];

            if seen.contains(&id) {
                return Err(H3Error::Settings("duplicate setting"));
            }
            seen.push(id);

            let flag = |v: u64| match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(H3Error::Settings("boolean setting out of range")),
            };
            match id {
                QPACK_MAX_TABLE_CAPACITY => s.qpack_max_table_capacity = v,
                MAX_FIELD_SECTION_SIZE => s.max_field_section_size = Some(v),
                QPACK_BLOCKED_STREAMS => s.qpack_blocked_streams = v,
                ENABLE_CONNECT_PROTOCOL => s.enable_connect_protocol = flag(v)?,
                H3_DATAGRAM => s.h3_datagram = flag(v)?,
                ENABLE_WEBTRANSPORT => s.enable_webtransport = flag(v)?,
                // HTTP/2 only identifiers
                0x00 | 0x02..=0x05 => return Err(H3Error::Settings("reserved identifier")),
                _ => {}
            }
        }
        Ok(s)
    }
}
