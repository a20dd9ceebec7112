/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::net::UdpSocket;

use volley_resolver::{AddressFamily, SocketConfig};

use crate::ActionError;
use crate::timeouts::connect_timeout;

const MAX_DATAGRAM_SIZE: usize = 65535;

/// A connected datagram socket with a receive buffer, so callers can read
/// by delimiter or size across datagram boundaries.
pub struct UdpConnection {
    socket: Option<UdpSocket>,
    peer: Option<SocketAddr>,
    buf: BytesMut,
    reset_on_reuse: bool,
}

impl UdpConnection {
    pub fn new(reset_on_reuse: bool) -> Self {
        UdpConnection {
            socket: None,
            peer: None,
            buf: BytesMut::new(),
            reset_on_reuse,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn set_reset_on_reuse(&mut self, reset: bool) {
        self.reset_on_reuse = reset;
    }

    /// Returns `true` when a new socket was opened.
    pub async fn connect(
        &mut self,
        config: &SocketConfig,
        timeout: Duration,
    ) -> Result<bool, ActionError> {
        if self.socket.is_some() && self.peer == Some(config.addr) && !self.reset_on_reuse {
            self.buf.clear();
            return Ok(false);
        }
        self.close();

        let bind: SocketAddr = match config.family {
            AddressFamily::Ipv4 => (Ipv4Addr::UNSPECIFIED, 0).into(),
            AddressFamily::Ipv6 => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = connect_timeout(timeout, async {
            let socket = UdpSocket::bind(bind).await.map_err(ActionError::connect)?;
            socket
                .connect(config.addr)
                .await
                .map_err(|e| ActionError::Connect(format!("{}: {e}", config.addr)))?;
            Ok::<_, ActionError>(socket)
        })
        .await?;
        debug!("new udp socket to {}", config.addr);
        self.socket = Some(socket);
        self.peer = Some(config.addr);
        Ok(true)
    }

    fn socket(&self) -> Result<&UdpSocket, ActionError> {
        self.socket
            .as_ref()
            .ok_or_else(|| ActionError::Connect("not connected".to_string()))
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<(), ActionError> {
        let socket = self.socket()?;
        let nw = socket.send(data).await?;
        if nw != data.len() {
            return Err(ActionError::Connect(format!(
                "datagram truncated: {nw} of {} bytes sent",
                data.len()
            )));
        }
        Ok(())
    }

    async fn recv_more(&mut self) -> Result<usize, ActionError> {
        let Some(socket) = &self.socket else {
            return Err(ActionError::Connect("not connected".to_string()));
        };
        self.buf.reserve(MAX_DATAGRAM_SIZE);
        let nr = socket.recv_buf(&mut self.buf).await?;
        Ok(nr)
    }

    /// One datagram, or what is left of an earlier one.
    pub async fn recv(&mut self) -> Result<Bytes, ActionError> {
        if self.buf.is_empty() {
            self.recv_more().await?;
        }
        Ok(self.buf.split().freeze())
    }

    /// Read up to `delimiter`, which is consumed and not returned.
    pub async fn read_until(&mut self, delimiter: &[u8], max_len: usize) -> Result<Bytes, ActionError> {
        if delimiter.is_empty() {
            return self.recv().await;
        }
        let mut searched = 0;
        loop {
            if let Some(p) = memchr::memmem::find(&self.buf[searched..], delimiter) {
                let data = self.buf.split_to(searched + p).freeze();
                let _ = self.buf.split_to(delimiter.len());
                return Ok(data);
            }
            if self.buf.len() > max_len {
                return Err(ActionError::Protocol(format!(
                    "no delimiter in the first {max_len} bytes"
                )));
            }
            searched = self.buf.len().saturating_sub(delimiter.len() - 1);
            self.recv_more().await?;
        }
    }

    pub async fn read_exactly(&mut self, size: usize) -> Result<Bytes, ActionError> {
        while self.buf.len() < size {
            self.recv_more().await?;
        }
        Ok(self.buf.split_to(size).freeze())
    }

    pub fn close(&mut self) {
        self.socket = None;
        self.peer = None;
        self.buf.clear();
    }
}
