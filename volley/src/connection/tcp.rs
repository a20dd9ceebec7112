/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::FutureExt;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};

use volley_http::HttpStreamReader;
use volley_resolver::{AddressFamily, SocketConfig};
use volley_tls::OpensslContext;

use super::{BoxedStream, READ_BUFFER_LIMIT};
use crate::ActionError;
use crate::timeouts::connect_timeout;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
struct Peer {
    host: String,
    addr: SocketAddr,
    tls: bool,
}

/// One TCP connection slot of a pool. It is empty until first used and
/// reconnects whenever the peer or the connection state asks for it.
pub struct TcpConnection {
    peer: Option<Peer>,
    reader: Option<HttpStreamReader<BoxedStream>>,
    reset_on_reuse: bool,
    keep_alive: bool,
    keep_pending: bool,
}

impl TcpConnection {
    pub fn new(reset_on_reuse: bool) -> Self {
        TcpConnection {
            peer: None,
            reader: None,
            reset_on_reuse,
            keep_alive: true,
            keep_pending: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    pub fn set_reset_on_reuse(&mut self, reset: bool) {
        self.reset_on_reuse = reset;
    }

    /// The peer will close after the current response.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Data the peer sends between exchanges stays buffered for the next
    /// one instead of making the connection unusable.
    pub fn set_keep_pending(&mut self, keep: bool) {
        self.keep_pending = keep;
    }

    /// An idle connection has nothing to read. Unread data only passes when
    /// pending data is kept, and an EOF never does. Nothing is consumed.
    fn is_reusable(&mut self) -> bool {
        let keep_pending = self.keep_pending;
        let Some(reader) = &mut self.reader else {
            return false;
        };
        if reader.buffered() > 0 {
            return keep_pending;
        }
        match reader.fill_buf().now_or_never() {
            None => true,
            Some(Ok(_)) => keep_pending,
            Some(Err(_)) => false,
        }
    }

    /// Make sure the connection is open to `host` at `socket`.
    ///
    /// Returns `true` when a new connection was established.
    pub async fn connect(
        &mut self,
        host: &str,
        socket: &SocketConfig,
        tls: Option<&OpensslContext>,
        timeout: Duration,
    ) -> Result<bool, ActionError> {
        let peer = Peer {
            host: host.to_ascii_lowercase(),
            addr: socket.addr,
            tls: tls.is_some(),
        };
        if self.peer.as_ref() == Some(&peer)
            && !self.reset_on_reuse
            && self.keep_alive
            && self.is_reusable()
        {
            return Ok(false);
        }
        self.close().await;

        let stream = connect_timeout(timeout, async {
            let tcp = tcp_connect(socket).await?;
            let stream: BoxedStream = match tls {
                Some(ctx) => Box::new(ctx.connect(host, tcp).await?),
                None => Box::new(tcp),
            };
            Ok::<_, ActionError>(stream)
        })
        .await?;
        debug!("new connection to {host} at {}", socket.addr);

        self.reader = Some(HttpStreamReader::new(stream, READ_BUFFER_LIMIT));
        self.peer = Some(peer);
        self.keep_alive = true;
        Ok(true)
    }

    fn reader_or_err(&mut self) -> Result<&mut HttpStreamReader<BoxedStream>, ActionError> {
        self.reader
            .as_mut()
            .ok_or_else(|| ActionError::Connect("not connected".to_string()))
    }

    pub fn reader(&mut self) -> Result<&mut HttpStreamReader<BoxedStream>, ActionError> {
        self.reader_or_err()
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), ActionError> {
        let stream = self.reader_or_err()?.get_mut();
        stream.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), ActionError> {
        let stream = self.reader_or_err()?.get_mut();
        stream.flush().await?;
        Ok(())
    }

    /// Shut the transport down and forget the peer.
    pub async fn close(&mut self) {
        self.peer = None;
        if let Some(reader) = self.reader.take() {
            let mut stream = reader.into_inner();
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, stream.shutdown()).await;
        }
    }
}

async fn tcp_connect(config: &SocketConfig) -> Result<TcpStream, ActionError> {
    let socket = match config.family {
        AddressFamily::Ipv4 => TcpSocket::new_v4(),
        AddressFamily::Ipv6 => TcpSocket::new_v6(),
    }
    .map_err(ActionError::connect)?;
    let stream = socket
        .connect(config.addr)
        .await
        .map_err(|e| ActionError::Connect(format!("{}: {e}", config.addr)))?;
    stream.set_nodelay(true).map_err(ActionError::connect)?;
    Ok(stream)
}
