/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{Bytes, BytesMut};

use crate::frame::{self, FRAME_SETTINGS, Frame};
use crate::{H3Error, H3Settings, varint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniStreamType {
    Control,
    Push,
    QpackEncoder,
    QpackDecoder,
    Unknown(u64),
}

impl UniStreamType {
    pub fn code(&self) -> u64 {
        match self {
            UniStreamType::Control => 0x00,
            UniStreamType::Push => 0x01,
            UniStreamType::QpackEncoder => 0x02,
            UniStreamType::QpackDecoder => 0x03,
            UniStreamType::Unknown(v) => *v,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        varint::encode(self.code(), buf);
    }
}

impl From<u64> for UniStreamType {
    fn from(v: u64) -> Self {
        match v {
            0x00 => UniStreamType::Control,
            0x01 => UniStreamType::Push,
            0x02 => UniStreamType::QpackEncoder,
            0x03 => UniStreamType::QpackDecoder,
            v => UniStreamType::Unknown(v),
        }
    }
}

/// Stream type followed by our SETTINGS frame.
pub fn encode_control_preamble(settings: &H3Settings) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    UniStreamType::Control.encode(&mut buf);
    frame::encode_settings(settings, &mut buf);
    buf
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Settings(H3Settings),
    GoAway(u64),
}

/// Reader of the peer control stream, after the stream type has been
/// consumed.
#[derive(Default)]
pub struct ControlStreamReader {
    buf: BytesMut,
    settings_received: bool,
}

impl ControlStreamReader {
    pub fn new() -> Self {
        ControlStreamReader::default()
    }

    #[inline]
    pub fn settings_received(&self) -> bool {
        self.settings_received
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ControlEvent>, H3Error> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();
        while let Some(frame) = Frame::decode(&mut self.buf)? {
            if !self.settings_received {
                let Frame::Settings(settings) = frame else {
                    return Err(H3Error::MissingSettings);
                };
                self.settings_received = true;
                events.push(ControlEvent::Settings(settings));
                continue;
            }
            match frame {
                Frame::Settings(_) => return Err(H3Error::FrameUnexpected(FRAME_SETTINGS)),
                Frame::GoAway(id) => events.push(ControlEvent::GoAway(id)),
                Frame::CancelPush(_) | Frame::MaxPushId(_) | Frame::Unknown(_) => {}
                f => return Err(H3Error::FrameUnexpected(f.type_code())),
            }
        }
        Ok(events)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadersState {
    Initial,
    AfterHeaders,
    AfterTrailers,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseFrame {
    /// Encoded field section. Call
    /// [`ResponseStreamReader::informational_response`] if it turns out to
    /// carry a 1xx status.
    Headers(Bytes),
    Data(Bytes),
    Trailers(Bytes),
}

/// Frame sequencing on the response half of a request stream.
pub struct ResponseStreamReader {
    buf: BytesMut,
    state: HeadersState,
}

impl Default for ResponseStreamReader {
    fn default() -> Self {
        ResponseStreamReader {
            buf: BytesMut::new(),
            state: HeadersState::Initial,
        }
    }
}

impl ResponseStreamReader {
    pub fn new() -> Self {
        ResponseStreamReader::default()
    }

    #[inline]
    pub fn state(&self) -> HeadersState {
        self.state
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn informational_response(&mut self) {
        if self.state == HeadersState::AfterHeaders {
            self.state = HeadersState::Initial;
        }
    }

    pub fn next_frame(&mut self) -> Result<Option<ResponseFrame>, H3Error> {
        loop {
            let Some(frame) = Frame::decode(&mut self.buf)? else {
                return Ok(None);
            };
            let r = match (frame, self.state) {
                (Frame::Headers(block), HeadersState::Initial) => {
                    self.state = HeadersState::AfterHeaders;
                    ResponseFrame::Headers(block)
                }
                (Frame::Headers(block), HeadersState::AfterHeaders) => {
                    self.state = HeadersState::AfterTrailers;
                    ResponseFrame::Trailers(block)
                }
                (Frame::Headers(_), HeadersState::AfterTrailers) => {
                    return Err(H3Error::Message("HEADERS after trailers"));
                }
                (Frame::Data(data), HeadersState::AfterHeaders) => ResponseFrame::Data(data),
                (Frame::Data(_), HeadersState::Initial) => {
                    return Err(H3Error::Message("DATA before HEADERS"));
                }
                (Frame::Data(_), HeadersState::AfterTrailers) => {
                    return Err(H3Error::Message("DATA after trailers"));
                }
                (Frame::Unknown(_), _) => continue,
                (f, _) => return Err(H3Error::FrameUnexpected(f.type_code())),
            };
            return Ok(Some(r));
        }
    }

    /// The peer finished its side of the stream.
    pub fn finish(&self) -> Result<(), H3Error> {
        if !self.buf.is_empty() {
            return Err(H3Error::Frame("stream ended inside a frame"));
        }
        if self.state == HeadersState::Initial {
            return Err(H3Error::Message("stream ended without a response"));
        }
        Ok(())
    }
}
