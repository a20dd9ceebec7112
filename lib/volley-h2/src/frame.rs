/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{ErrorCode, H2Error, Settings};

pub const FRAME_HEADER_SIZE: usize = 9;

pub const FLAG_END_STREAM: u8 = 0x01;
pub const FLAG_ACK: u8 = 0x01;
pub const FLAG_END_HEADERS: u8 = 0x04;
pub const FLAG_PADDED: u8 = 0x08;
pub const FLAG_PRIORITY: u8 = 0x20;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::GoAway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
            FrameType::Unknown(_) => "UNKNOWN",
        }
    }

    const fn code(&self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => *v,
        }
    }
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            v => FrameType::Unknown(v),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn new(length: usize, frame_type: FrameType, flags: u8, stream_id: u32) -> Self {
        FrameHeader {
            length: length as u32,
            frame_type,
            flags,
            stream_id,
        }
    }

    pub fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & STREAM_ID_MASK;
        FrameHeader {
            length,
            frame_type: FrameType::from(buf[3]),
            flags: buf[4],
            stream_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.length.to_be_bytes();
        buf.put_slice(&len[1..]);
        buf.put_u8(self.frame_type.code());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & STREAM_ID_MASK);
    }

    #[inline]
    fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Clone, Debug)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Payload length including padding, as charged to flow control.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        code: ErrorCode,
    },
    /// The raw payload is kept since SETTINGS only carries changed values.
    Settings {
        ack: bool,
        payload: Bytes,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Unknown {
        frame_type: u8,
        stream_id: u32,
    },
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data { .. } => FrameType::Data,
            Frame::Headers { .. } => FrameType::Headers,
            Frame::Priority { .. } => FrameType::Priority,
            Frame::RstStream { .. } => FrameType::RstStream,
            Frame::Settings { .. } => FrameType::Settings,
            Frame::PushPromise { .. } => FrameType::PushPromise,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::GoAway { .. } => FrameType::GoAway,
            Frame::WindowUpdate { .. } => FrameType::WindowUpdate,
            Frame::Continuation { .. } => FrameType::Continuation,
            Frame::Unknown { frame_type, .. } => FrameType::Unknown(*frame_type),
        }
    }

    /// Split one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, H2Error> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut hdr = [0u8; FRAME_HEADER_SIZE];
        hdr.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::parse(&hdr);
        if header.length > max_frame_size {
            return Err(H2Error::FrameSize);
        }
        let total = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }
        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();
        Frame::parse_payload(header, payload).map(Some)
    }

    fn parse_payload(header: FrameHeader, mut payload: Bytes) -> Result<Frame, H2Error> {
        let stream_id = header.stream_id;
        let frame = match header.frame_type {
            FrameType::Data => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("DATA on stream 0"));
                }
                let flow_len = header.length;
                strip_padding(&header, &mut payload)?;
                Frame::Data {
                    stream_id,
                    data: payload,
                    end_stream: header.has_flag(FLAG_END_STREAM),
                    flow_len,
                }
            }
            FrameType::Headers => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("HEADERS on stream 0"));
                }
                strip_padding(&header, &mut payload)?;
                if header.has_flag(FLAG_PRIORITY) {
                    if payload.len() < 5 {
                        return Err(H2Error::FrameSize);
                    }
                    payload.advance(5);
                }
                Frame::Headers {
                    stream_id,
                    block: payload,
                    end_stream: header.has_flag(FLAG_END_STREAM),
                    end_headers: header.has_flag(FLAG_END_HEADERS),
                }
            }
            FrameType::Priority => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("PRIORITY on stream 0"));
                }
                if payload.len() != 5 {
                    return Err(H2Error::FrameSize);
                }
                Frame::Priority { stream_id }
            }
            FrameType::RstStream => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("RST_STREAM on stream 0"));
                }
                if payload.len() != 4 {
                    return Err(H2Error::FrameSize);
                }
                Frame::RstStream {
                    stream_id,
                    code: ErrorCode::from(payload.get_u32()),
                }
            }
            FrameType::Settings => {
                if stream_id != 0 {
                    return Err(H2Error::Protocol("SETTINGS on non-zero stream"));
                }
                let ack = header.has_flag(FLAG_ACK);
                if ack && !payload.is_empty() {
                    return Err(H2Error::FrameSize);
                }
                if payload.len() % 6 != 0 {
                    return Err(H2Error::FrameSize);
                }
                if !ack {
                    // validate early
                    Settings::decode(&payload)?;
                }
                Frame::Settings { ack, payload }
            }
            FrameType::PushPromise => {
                strip_padding(&header, &mut payload)?;
                if payload.len() < 4 {
                    return Err(H2Error::FrameSize);
                }
                Frame::PushPromise {
                    stream_id,
                    promised_stream_id: payload.get_u32() & STREAM_ID_MASK,
                }
            }
            FrameType::Ping => {
                if stream_id != 0 {
                    return Err(H2Error::Protocol("PING on non-zero stream"));
                }
                if payload.len() != 8 {
                    return Err(H2Error::FrameSize);
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Frame::Ping {
                    ack: header.has_flag(FLAG_ACK),
                    payload: data,
                }
            }
            FrameType::GoAway => {
                if stream_id != 0 {
                    return Err(H2Error::Protocol("GOAWAY on non-zero stream"));
                }
                if payload.len() < 8 {
                    return Err(H2Error::FrameSize);
                }
                let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
                let code = ErrorCode::from(payload.get_u32());
                Frame::GoAway {
                    last_stream_id,
                    code,
                    debug_data: payload,
                }
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(H2Error::FrameSize);
                }
                let increment = payload.get_u32() & STREAM_ID_MASK;
                if increment == 0 {
                    return Err(H2Error::Protocol("zero WINDOW_UPDATE increment"));
                }
                Frame::WindowUpdate {
                    stream_id,
                    increment,
                }
            }
            FrameType::Continuation => {
                if stream_id == 0 {
                    return Err(H2Error::Protocol("CONTINUATION on stream 0"));
                }
                Frame::Continuation {
                    stream_id,
                    block: payload,
                    end_headers: header.has_flag(FLAG_END_HEADERS),
                }
            }
            FrameType::Unknown(frame_type) => Frame::Unknown {
                frame_type,
                stream_id,
            },
        };
        Ok(frame)
    }
}

fn strip_padding(header: &FrameHeader, payload: &mut Bytes) -> Result<(), H2Error> {
    if !header.has_flag(FLAG_PADDED) {
        return Ok(());
    }
    if payload.is_empty() {
        return Err(H2Error::FrameSize);
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(H2Error::Protocol("padding exceeds payload"));
    }
    payload.truncate(payload.len() - pad_len);
    Ok(())
}

pub fn encode_data(stream_id: u32, data: &[u8], end_stream: bool, buf: &mut BytesMut) {
    let flags = if end_stream { FLAG_END_STREAM } else { 0 };
    buf.reserve(FRAME_HEADER_SIZE + data.len());
    FrameHeader::new(data.len(), FrameType::Data, flags, stream_id).encode(buf);
    buf.put_slice(data);
}

/// Write a header block as one HEADERS frame plus as many CONTINUATION
/// frames as `max_frame_size` requires.
pub fn encode_header_block(
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    max_frame_size: usize,
    buf: &mut BytesMut,
) {
    let max_frame_size = max_frame_size.max(1);
    let mut chunks = block.chunks(max_frame_size).peekable();
    let first = chunks.next().unwrap_or(&[]);
    let mut flags = if end_stream { FLAG_END_STREAM } else { 0 };
    if chunks.peek().is_none() {
        flags |= FLAG_END_HEADERS;
    }
    buf.reserve(FRAME_HEADER_SIZE * (1 + block.len() / max_frame_size) + block.len());
    FrameHeader::new(first.len(), FrameType::Headers, flags, stream_id).encode(buf);
    buf.put_slice(first);

    while let Some(chunk) = chunks.next() {
        let flags = if chunks.peek().is_none() {
            FLAG_END_HEADERS
        } else {
            0
        };
        FrameHeader::new(chunk.len(), FrameType::Continuation, flags, stream_id).encode(buf);
        buf.put_slice(chunk);
    }
}

pub fn encode_settings(settings: &Settings, buf: &mut BytesMut) {
    let mut payload = BytesMut::with_capacity(36);
    settings.encode(&mut payload);
    FrameHeader::new(payload.len(), FrameType::Settings, 0, 0).encode(buf);
    buf.put_slice(&payload);
}

pub fn encode_settings_ack(buf: &mut BytesMut) {
    FrameHeader::new(0, FrameType::Settings, FLAG_ACK, 0).encode(buf);
}

pub fn encode_ping(payload: [u8; 8], ack: bool, buf: &mut BytesMut) {
    let flags = if ack { FLAG_ACK } else { 0 };
    FrameHeader::new(8, FrameType::Ping, flags, 0).encode(buf);
    buf.put_slice(&payload);
}

pub fn encode_window_update(stream_id: u32, increment: u32, buf: &mut BytesMut) {
    FrameHeader::new(4, FrameType::WindowUpdate, 0, stream_id).encode(buf);
    buf.put_u32(increment & STREAM_ID_MASK);
}

pub fn encode_rst_stream(stream_id: u32, code: ErrorCode, buf: &mut BytesMut) {
    FrameHeader::new(4, FrameType::RstStream, 0, stream_id).encode(buf);
    buf.put_u32(code.code());
}

pub fn encode_goaway(last_stream_id: u32, code: ErrorCode, buf: &mut BytesMut) {
    FrameHeader::new(8, FrameType::GoAway, 0, 0).encode(buf);
    buf.put_u32(last_stream_id & STREAM_ID_MASK);
    buf.put_u32(code.code());
}
