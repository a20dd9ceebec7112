/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{H3Error, H3Settings, varint};

pub const FRAME_DATA: u64 = 0x00;
pub const FRAME_HEADERS: u64 = 0x01;
pub const FRAME_CANCEL_PUSH: u64 = 0x03;
pub const FRAME_SETTINGS: u64 = 0x04;
pub const FRAME_PUSH_PROMISE: u64 = 0x05;
pub const FRAME_GOAWAY: u64 = 0x07;
pub const FRAME_MAX_PUSH_ID: u64 = 0x0d;

/// Upper bound on a single frame we are willing to buffer.
pub const MAX_FRAME_PAYLOAD: u64 = 16 << 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    Headers(Bytes),
    CancelPush(u64),
    Settings(H3Settings),
    PushPromise { push_id: u64, block: Bytes },
    GoAway(u64),
    MaxPushId(u64),
    Unknown(u64),
}

impl Frame {
    pub fn type_code(&self) -> u64 {
        match self {
            Frame::Data(_) => FRAME_DATA,
            Frame::Headers(_) => FRAME_HEADERS,
            Frame::CancelPush(_) => FRAME_CANCEL_PUSH,
            Frame::Settings(_) => FRAME_SETTINGS,
            Frame::PushPromise { .. } => FRAME_PUSH_PROMISE,
            Frame::GoAway(_) => FRAME_GOAWAY,
            Frame::MaxPushId(_) => FRAME_MAX_PUSH_ID,
            Frame::Unknown(t) => *t,
        }
    }

    /// Split one complete frame off the front of `buf`.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, H3Error> {
        let Some((frame_type, n1)) = varint::decode(buf) else {
            return Ok(None);
        };
        let Some((len, n2)) = varint::decode(&buf[n1..]) else {
            return Ok(None);
        };
        if len > MAX_FRAME_PAYLOAD {
            return Err(H3Error::Frame("frame too large"));
        }
        let header_len = n1 + n2;
        let total = header_len + len as usize;
        if buf.len() < total {
            return Ok(None);
        }
        buf.advance(header_len);
        let mut payload = buf.split_to(len as usize).freeze();

        let single_varint = |payload: &Bytes| -> Result<u64, H3Error> {
            match varint::decode(payload) {
                Some((v, n)) if n == payload.len() => Ok(v),
                _ => Err(H3Error::Frame("bad varint payload")),
            }
        };

        let frame = match frame_type {
            FRAME_DATA => Frame::Data(payload),
            FRAME_HEADERS => Frame::Headers(payload),
            FRAME_CANCEL_PUSH => Frame::CancelPush(single_varint(&payload)?),
            FRAME_SETTINGS => Frame::Settings(H3Settings::decode(&payload)?),
            FRAME_PUSH_PROMISE => {
                let (push_id, n) =
                    varint::decode(&payload).ok_or(H3Error::Frame("bad PUSH_PROMISE"))?;
                payload.advance(n);
                Frame::PushPromise {
                    push_id,
                    block: payload,
                }
            }
            FRAME_GOAWAY => Frame::GoAway(single_varint(&payload)?),
            FRAME_MAX_PUSH_ID => Frame::MaxPushId(single_varint(&payload)?),
            // frame types of HTTP/2 with no HTTP/3 meaning
            0x02 | 0x06 | 0x08 | 0x09 => return Err(H3Error::FrameUnexpected(frame_type)),
            t => Frame::Unknown(t),
        };
        Ok(Some(frame))
    }
}

fn encode_header<B: BufMut>(frame_type: u64, len: usize, buf: &mut B) {
    varint::encode(frame_type, buf);
    varint::encode(len as u64, buf);
}

pub fn encode_data<B: BufMut>(data: &[u8], buf: &mut B) {
    encode_header(FRAME_DATA, data.len(), buf);
    buf.put_slice(data);
}

pub fn encode_headers<B: BufMut>(block: &[u8], buf: &mut B) {
    encode_header(FRAME_HEADERS, block.len(), buf);
    buf.put_slice(block);
}

pub fn encode_settings<B: BufMut>(settings: &H3Settings, buf: &mut B) {
    let mut payload = Vec::with_capacity(32);
    settings.encode(&mut payload);
    encode_header(FRAME_SETTINGS, payload.len(), buf);
    buf.put_slice(&payload);
}

pub fn encode_goaway<B: BufMut>(id: u64, buf: &mut B) {
    encode_header(FRAME_GOAWAY, varint::encoded_len(id), buf);
    varint::encode(id, buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_frames() {
        let mut buf = BytesMut::new();
        encode_headers(b"\x00\x00\xd1", &mut buf);
        encode_data(b"hello", &mut buf);
        encode_goaway(8, &mut buf);
        let tail = buf.split_off(buf.len() - 1);

        assert_eq!(
            Frame::decode(&mut buf).unwrap(),
            Some(Frame::Headers(Bytes::from_static(b"\x00\x00\xd1")))
        );
        assert_eq!(
            Frame::decode(&mut buf).unwrap(),
            Some(Frame::Data(Bytes::from_static(b"hello")))
        );
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
        buf.unsplit(tail);
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(Frame::GoAway(8)));
        assert!(buf.is_empty());
    }

    #[test]
    fn reserved_types() {
        for t in [0x02u64, 0x06, 0x08, 0x09] {
            let mut buf = BytesMut::new();
            encode_header(t, 0, &mut buf);
            assert!(matches!(Frame::decode(&mut buf), Err(H3Error::FrameUnexpected(_))));
        }
    }

    #[test]
    fn unknown_type() {
        let mut buf = BytesMut::new();
        encode_header(0x21, 3, &mut buf);
        buf.put_slice(b"abc");
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(Frame::Unknown(0x21)));
        assert!(buf.is_empty());
    }

    #[test]
    fn settings_frame() {
        let s = H3Settings {
            qpack_max_table_capacity: 4096,
            qpack_blocked_streams: 8,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        encode_settings(&s, &mut buf);
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(Frame::Settings(s)));
    }
}
