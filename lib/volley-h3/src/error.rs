/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;
use volley_h2::HpackError;

/// Application error codes of HTTP/3 and QPACK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum H3ErrorCode {
    NoError,
    GeneralProtocolError,
    InternalError,
    StreamCreationError,
    ClosedCriticalStream,
    FrameUnexpected,
    FrameError,
    ExcessiveLoad,
    IdError,
    SettingsError,
    MissingSettings,
    RequestRejected,
    RequestCancelled,
    RequestIncomplete,
    MessageError,
    ConnectError,
    VersionFallback,
    QpackDecompressionFailed,
    QpackEncoderStreamError,
    QpackDecoderStreamError,
}

impl H3ErrorCode {
    pub const fn code(&self) -> u64 {
        match self {
            H3ErrorCode::NoError => 0x100,
            H3ErrorCode::GeneralProtocolError => 0x101,
            H3ErrorCode::InternalError => 0x102,
            H3ErrorCode::StreamCreationError => 0x103,
            H3ErrorCode::ClosedCriticalStream => 0x104,
            H3ErrorCode::FrameUnexpected => 0x105,
            H3ErrorCode::FrameError => 0x106,
            H3ErrorCode::ExcessiveLoad => 0x107,
            H3ErrorCode::IdError => 0x108,
            H3ErrorCode::SettingsError => 0x109,
            H3ErrorCode::MissingSettings => 0x10a,
            H3ErrorCode::RequestRejected => 0x10b,
            H3ErrorCode::RequestCancelled => 0x10c,
            H3ErrorCode::RequestIncomplete => 0x10d,
            H3ErrorCode::MessageError => 0x10e,
            H3ErrorCode::ConnectError => 0x10f,
            H3ErrorCode::VersionFallback => 0x110,
            H3ErrorCode::QpackDecompressionFailed => 0x200,
            H3ErrorCode::QpackEncoderStreamError => 0x201,
            H3ErrorCode::QpackDecoderStreamError => 0x202,
        }
    }
}

#[derive(Debug, Error)]
pub enum QpackError {
    #[error("truncated field section")]
    Truncated,
    #[error("invalid static index {0}")]
    InvalidStaticIndex(usize),
    #[error("invalid dynamic index {0}")]
    InvalidDynamicIndex(u64),
    #[error("invalid required insert count")]
    InvalidRequiredInsertCount,
    #[error("table capacity {0} over limit")]
    CapacityOverLimit(usize),
    #[error("entry too large for table")]
    EntryTooLarge,
    #[error("too many blocked streams")]
    TooManyBlockedStreams,
    #[error("prefix coding: {0}")]
    Prefix(#[from] HpackError),
}

#[derive(Debug, Error)]
pub enum H3Error {
    #[error("frame error: {0}")]
    Frame(&'static str),
    #[error("frame type {0:#x} unexpected here")]
    FrameUnexpected(u64),
    #[error("settings error: {0}")]
    Settings(&'static str),
    #[error("peer SETTINGS missing")]
    MissingSettings,
    #[error("message error: {0}")]
    Message(&'static str),
    #[error("critical stream closed")]
    ClosedCriticalStream,
    #[error("stream creation error: {0}")]
    StreamCreation(&'static str),
    #[error("qpack decompression failed: {0}")]
    Decompression(QpackError),
    #[error("qpack encoder stream error: {0}")]
    EncoderStream(QpackError),
    #[error("qpack decoder stream error: {0}")]
    DecoderStream(QpackError),
}

impl H3Error {
    pub fn get_type(&self) -> &'static str {
        match self {
            H3Error::Frame(_) => "FrameError",
            H3Error::FrameUnexpected(_) => "FrameUnexpected",
            H3Error::Settings(_) => "SettingsError",
            H3Error::MissingSettings => "MissingSettings",
            H3Error::Message(_) => "MessageError",
            H3Error::ClosedCriticalStream => "ClosedCriticalStream",
            H3Error::StreamCreation(_) => "StreamCreationError",
            H3Error::Decompression(_) => "QpackDecompressionFailed",
            H3Error::EncoderStream(_) => "QpackEncoderStreamError",
            H3Error::DecoderStream(_) => "QpackDecoderStreamError",
        }
    }

    pub fn error_code(&self) -> H3ErrorCode {
        match self {
            H3Error::Frame(_) => H3ErrorCode::FrameError,
            H3Error::FrameUnexpected(_) => H3ErrorCode::FrameUnexpected,
            H3Error::Settings(_) => H3ErrorCode::SettingsError,
            H3Error::MissingSettings => H3ErrorCode::MissingSettings,
            H3Error::Message(_) => H3ErrorCode::MessageError,
            H3Error::ClosedCriticalStream => H3ErrorCode::ClosedCriticalStream,
            H3Error::StreamCreation(_) => H3ErrorCode::StreamCreationError,
            H3Error::Decompression(_) => H3ErrorCode::QpackDecompressionFailed,
            H3Error::EncoderStream(_) => H3ErrorCode::QpackEncoderStreamError,
            H3Error::DecoderStream(_) => H3ErrorCode::QpackDecoderStreamError,
        }
    }
}
