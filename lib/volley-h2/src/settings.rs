/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{BufMut, BytesMut};

use crate::H2Error;

const HEADER_TABLE_SIZE: u16 = 0x1;
const ENABLE_PUSH: u16 = 0x2;
const MAX_CONCURRENT_STREAMS: u16 = 0x3;
const INITIAL_WINDOW_SIZE: u16 = 0x4;
const MAX_FRAME_SIZE: u16 = 0x5;
const MAX_HEADER_LIST_SIZE: u16 = 0x6;

pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;
pub const MAX_ALLOWED_FRAME_SIZE: u32 = 16_777_215;
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65535,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    pub fn client_default() -> Self {
        Settings {
            enable_push: false,
            ..Default::default()
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut put = |id: u16, v: u32| {
            buf.put_u16(id);
            buf.put_u32(v);
        };
        put(HEADER_TABLE_SIZE, self.header_table_size);
        put(ENABLE_PUSH, u32::from(self.enable_push));
        if let Some(v) = self.max_concurrent_streams {
            put(MAX_CONCURRENT_STREAMS, v);
        }
        put(INITIAL_WINDOW_SIZE, self.initial_window_size);
        put(MAX_FRAME_SIZE, self.max_frame_size);
        if let Some(v) = self.max_header_list_size {
            put(MAX_HEADER_LIST_SIZE, v);
        }
    }

    /// Parse a SETTINGS payload. Values not present keep their defaults,
    /// unknown identifiers are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, H2Error> {
        let mut s = Settings::default();
        for pair in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([pair[0], pair[1]]);
            let v = u32::from_be_bytes([pair[2], pair[3], pair[4], pair[5]]);
            s.set(id, v)?;
        }
        Ok(s)
    }

    /// Parse a SETTINGS payload as a delta over `self`.
    pub fn apply(&mut self, payload: &[u8]) -> Result<(), H2Error> {
        for pair in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([pair[0], pair[1]]);
            let v = u32::from_be_bytes([pair[2], pair[3], pair[4], pair[5]]);
            self.set(id, v)?;
        }
        Ok(())
    }

    fn set(&mut self, id: u16, v: u32) -> Result<(), H2Error> {
        match id {
            HEADER_TABLE_SIZE => self.header_table_size = v,
            ENABLE_PUSH => match v {
                0 => self.enable_push = false,
                1 => self.enable_push = true,
                _ => return Err(H2Error::InvalidSetting(id)),
            },
            MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(v),
            INITIAL_WINDOW_SIZE => {
                if v > MAX_WINDOW_SIZE {
                    return Err(H2Error::FlowControl);
                }
                self.initial_window_size = v;
            }
            MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&v) {
                    return Err(H2Error::InvalidSetting(id));
                }
                self.max_frame_size = v;
            }
            MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(v),
            _ => {}
        }
        Ok(())
    }
}
