/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use crate::HttpLineParseError;

#[derive(Debug, Error)]
pub enum HttpReadError {
    #[error("io failed: {0:?}")]
    Io(#[from] io::Error),
    #[error("connection closed by remote")]
    ClosedByRemote,
    #[error("line too long (> {0})")]
    LineTooLong(usize),
    #[error("header section too large (> {0})")]
    HeadersTooLarge(usize),
    #[error("invalid line: {0}")]
    InvalidLine(#[from] HttpLineParseError),
    #[error("invalid header name {0}")]
    InvalidHeaderName(String),
    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),
    #[error("invalid content length")]
    InvalidContentLength,
    #[error("invalid chunk end")]
    InvalidChunkEnd,
    #[error("body too large (> {0})")]
    BodyTooLarge(u64),
}

impl HttpReadError {
    pub fn get_type(&self) -> &'static str {
        match self {
            HttpReadError::Io(_) => "IoFailed",
            HttpReadError::ClosedByRemote => "ClosedByRemote",
            HttpReadError::LineTooLong(_) => "LineTooLong",
            HttpReadError::HeadersTooLarge(_) => "HeadersTooLarge",
            HttpReadError::InvalidLine(_) => "InvalidLine",
            HttpReadError::InvalidHeaderName(_) => "InvalidHeaderName",
            HttpReadError::InvalidHeaderValue(_) => "InvalidHeaderValue",
            HttpReadError::InvalidContentLength => "InvalidContentLength",
            HttpReadError::InvalidChunkEnd => "InvalidChunkEnd",
            HttpReadError::BodyTooLarge(_) => "BodyTooLarge",
        }
    }

    /// Errors caused by the peer talking something other than HTTP/1.x.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, HttpReadError::Io(_) | HttpReadError::ClosedByRemote)
    }
}
