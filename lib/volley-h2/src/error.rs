/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;

use thiserror::Error;

/// Error codes carried in RST_STREAM and GOAWAY frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Unknown(u32),
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Unknown(v) => *v,
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(v: u32) -> Self {
        match v {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            v => ErrorCode::Unknown(v),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Unknown(v) => write!(f, "UNKNOWN({v:#x})"),
            _ => write!(f, "{self:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HpackError {
    #[error("truncated header block")]
    Truncated,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid table index {0}")]
    InvalidIndex(usize),
    #[error("table size update {0} over limit")]
    TableSizeOverLimit(usize),
    #[error("table size update after the first field")]
    LateTableSizeUpdate,
    #[error("invalid huffman code")]
    InvalidHuffman,
}

#[derive(Debug, Error)]
pub enum H2Error {
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    #[error("frame size error")]
    FrameSize,
    #[error("flow control error")]
    FlowControl,
    #[error("compression error: {0}")]
    Compression(#[from] HpackError),
    #[error("invalid setting {0:#x}")]
    InvalidSetting(u16),
    #[error("stream id space exhausted")]
    StreamIdExhausted,
    #[error("connection is going away")]
    GoingAway,
    #[error("too many concurrent streams")]
    TooManyStreams,
    #[error("unknown stream {0}")]
    UnknownStream(u32),
}

impl H2Error {
    pub fn get_type(&self) -> &'static str {
        match self {
            H2Error::Protocol(_) => "ProtocolError",
            H2Error::FrameSize => "FrameSizeError",
            H2Error::FlowControl => "FlowControlError",
            H2Error::Compression(_) => "CompressionError",
            H2Error::InvalidSetting(_) => "InvalidSetting",
            H2Error::StreamIdExhausted => "StreamIdExhausted",
            H2Error::GoingAway => "GoingAway",
            H2Error::TooManyStreams => "TooManyStreams",
            H2Error::UnknownStream(_) => "UnknownStream",
        }
    }

    /// The code to put in a GOAWAY frame when this error ends the connection.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            H2Error::FrameSize => ErrorCode::FrameSizeError,
            H2Error::FlowControl => ErrorCode::FlowControlError,
            H2Error::Compression(_) => ErrorCode::CompressionError,
            H2Error::StreamIdExhausted | H2Error::GoingAway | H2Error::TooManyStreams => {
                ErrorCode::NoError
            }
            _ => ErrorCode::ProtocolError,
        }
    }

    /// Whether the connection can no longer open new streams.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, H2Error::TooManyStreams | H2Error::UnknownStream(_))
    }
}
