/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use tokio::io::{AsyncRead, AsyncWrite};

mod tcp;
pub use tcp::TcpConnection;

mod udp;
pub use udp::UdpConnection;

mod h2;
pub use h2::{H2Response, H2Session, H2StreamError, PendingResponse as H2PendingResponse};

mod quic;
pub use quic::{H3Response, H3Session, PendingResponse as H3PendingResponse};

pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Plain or TLS byte stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Read buffer limit of one connection.
pub(crate) const READ_BUFFER_LIMIT: usize = 64 * 1024;
