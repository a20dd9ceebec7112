/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpSocket;
use tokio::sync::{mpsc, oneshot};

use volley_h2::{ClientConnection, ErrorCode, H2Error, H2Event, HeaderField, Settings};
use volley_resolver::{AddressFamily, SocketConfig};
use volley_tls::OpensslContext;

use super::BoxedStream;
use crate::ActionError;
use crate::timeouts::connect_timeout;

const READ_CHUNK_SIZE: usize = 16 * 1024;
const COMMAND_QUEUE_SIZE: usize = 256;

/// Why a stream ended without a response.
#[derive(Debug)]
pub enum H2StreamError {
    /// The peer never processed the request. It may be sent again on
    /// another connection.
    Refused(String),
    Failed(ActionError),
}

impl H2StreamError {
    pub fn is_refused(&self) -> bool {
        matches!(self, H2StreamError::Refused(_))
    }
}

impl From<ActionError> for H2StreamError {
    fn from(e: ActionError) -> Self {
        H2StreamError::Failed(e)
    }
}

impl From<H2StreamError> for ActionError {
    fn from(e: H2StreamError) -> Self {
        match e {
            H2StreamError::Refused(reason) => ActionError::Connect(reason),
            H2StreamError::Failed(e) => e,
        }
    }
}

/// A complete response of one stream.
#[derive(Debug, Default)]
pub struct H2Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub trailers: HeaderMap,
}

type ResponseSender = oneshot::Sender<Result<H2Response, H2StreamError>>;
type WrittenSender = oneshot::Sender<Result<u32, H2StreamError>>;

struct Command {
    fields: Vec<HeaderField>,
    body: Bytes,
    written: WrittenSender,
    response: ResponseSender,
}

impl Command {
    fn refuse(self, reason: &str) {
        let _ = self
            .written
            .send(Err(H2StreamError::Refused(reason.to_string())));
    }
}

#[derive(Default)]
struct ResponseFrameCollection {
    response: H2Response,
    body: BytesMut,
}

struct InFlight {
    sender: ResponseSender,
    collection: ResponseFrameCollection,
}

/// Answer of a request that has been written to the connection.
pub struct PendingResponse {
    pub stream_id: u32,
    receiver: oneshot::Receiver<Result<H2Response, H2StreamError>>,
}

impl PendingResponse {
    pub async fn recv(self) -> Result<H2Response, H2StreamError> {
        match self.receiver.await {
            Ok(r) => r,
            Err(_) => Err(H2StreamError::Failed(ActionError::Protocol(
                "h2 connection closed before the response".to_string(),
            ))),
        }
    }
}

/// One HTTP/2 connection shared by many concurrent streams.
///
/// A driver task owns the transport and the connection state; requests are
/// handed over through a channel and correlated back by stream id.
pub struct H2Session {
    commands: mpsc::Sender<Command>,
    closed: Arc<AtomicBool>,
}

impl H2Session {
    pub async fn connect(
        host: &str,
        socket: &SocketConfig,
        tls: Option<&OpensslContext>,
        timeout: Duration,
        max_body_size: u64,
    ) -> Result<Self, ActionError> {
        let stream = connect_timeout(timeout, async {
            let tcp = match socket.family {
                AddressFamily::Ipv4 => TcpSocket::new_v4(),
                AddressFamily::Ipv6 => TcpSocket::new_v6(),
            }
            .map_err(ActionError::connect)?
            .connect(socket.addr)
            .await
            .map_err(|e| ActionError::Connect(format!("{}: {e}", socket.addr)))?;
            tcp.set_nodelay(true).map_err(ActionError::connect)?;
            let stream: BoxedStream = match tls {
                Some(ctx) => Box::new(ctx.connect(host, tcp).await?),
                // prior knowledge
                None => Box::new(tcp),
            };
            Ok::<_, ActionError>(stream)
        })
        .await?;
        debug!("new h2 connection to {host} at {}", socket.addr);
        Ok(H2Session::spawn(stream, max_body_size))
    }

    /// Run the session over an established stream. A response body larger
    /// than `max_body_size` fails its stream.
    pub fn spawn<S>(stream: S, max_body_size: u64) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let closed = Arc::new(AtomicBool::new(false));
        let (r, w) = tokio::io::split(stream);
        let driver = Driver {
            conn: ClientConnection::new(Settings::client_default()),
            in_flight: AHashMap::new(),
            queued: VecDeque::new(),
            written: Vec::new(),
            closed: closed.clone(),
            max_body_size,
        };
        tokio::spawn(driver.run(r, w, receiver));
        H2Session {
            commands: sender,
            closed,
        }
    }

    /// Whether new streams may still be opened here.
    pub fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.commands.is_closed()
    }

    /// Stop opening streams on this session.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Open a stream and wait until its request is on the wire.
    pub async fn send(
        &self,
        fields: Vec<HeaderField>,
        body: Bytes,
    ) -> Result<PendingResponse, H2StreamError> {
        let (written, written_rx) = oneshot::channel();
        let (response, receiver) = oneshot::channel();
        let cmd = Command {
            fields,
            body,
            written,
            response,
        };
        if self.commands.send(cmd).await.is_err() {
            self.mark_closed();
            return Err(H2StreamError::Refused("h2 connection closed".to_string()));
        }
        let stream_id = match written_rx.await {
            Ok(r) => r?,
            Err(_) => {
                return Err(ActionError::Connect("h2 connection closed".to_string()).into());
            }
        };
        Ok(PendingResponse {
            stream_id,
            receiver,
        })
    }
}

struct Driver {
    conn: ClientConnection,
    in_flight: AHashMap<u32, InFlight>,
    queued: VecDeque<Command>,
    written: Vec<(WrittenSender, u32)>,
    closed: Arc<AtomicBool>,
    max_body_size: u64,
}

fn fields_to_map(fields: Vec<HeaderField>, map: &mut HeaderMap) -> Option<u16> {
    let mut status = None;
    for f in fields {
        if f.name.first() == Some(&b':') {
            if f.name.as_ref() == b":status" {
                status = std::str::from_utf8(&f.value).ok().and_then(|s| s.parse().ok());
            }
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(&f.name),
            HeaderValue::from_maybe_shared(f.value),
        ) else {
            continue;
        };
        map.append(name, value);
    }
    status
}

impl Driver {
    async fn run<S>(
        mut self,
        mut r: ReadHalf<S>,
        mut w: WriteHalf<S>,
        mut commands: mpsc::Receiver<Command>,
    ) where
        S: AsyncRead + AsyncWrite,
    {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut accepting = true;
        loop {
            if let Err(e) = self.flush(&mut w).await {
                self.fail_all(e);
                break;
            }
            if !accepting && self.in_flight.is_empty() && self.queued.is_empty() {
                self.conn.go_away();
                let _ = self.flush(&mut w).await;
                let _ = w.shutdown().await;
                break;
            }
            if self.conn.is_closed() {
                self.fail_all(ActionError::Protocol("h2 connection closed".to_string()));
                break;
            }

            tokio::select! {
                cmd = commands.recv(), if accepting => match cmd {
                    Some(cmd) => self.start(cmd),
                    None => accepting = false,
                },
                nr = r.read(&mut buf) => {
                    let nr = match nr {
                        Ok(0) => {
                            self.fail_all(ActionError::Connect("h2 connection closed by remote".to_string()));
                            break;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            self.fail_all(e.into());
                            break;
                        }
                    };
                    if let Err(e) = self.conn.feed(&buf[..nr]) {
                        let _ = self.flush(&mut w).await;
                        self.fail_all(e.into());
                        break;
                    }
                    self.process_events();
                    self.drop_abandoned();
                    self.retry_queued();
                }
            }
        }
        self.closed.store(true, Ordering::Release);
        commands.close();
        while let Ok(cmd) = commands.try_recv() {
            cmd.refuse("h2 connection closed");
        }
    }

    async fn flush<S: AsyncWrite>(&mut self, w: &mut WriteHalf<S>) -> Result<(), ActionError> {
        let mut wrote = false;
        while let Some(data) = self.conn.take_output() {
            w.write_all(&data).await?;
            wrote = true;
        }
        if wrote {
            w.flush().await?;
        }
        for (sender, stream_id) in self.written.drain(..) {
            let _ = sender.send(Ok(stream_id));
        }
        Ok(())
    }

    fn start(&mut self, cmd: Command) {
        if !self.queued.is_empty() {
            self.queued.push_back(cmd);
            return;
        }
        if let Some(cmd) = self.try_start(cmd) {
            self.queued.push_back(cmd);
        }
    }

    /// Returns the command back if it has to wait for a free stream.
    fn try_start(&mut self, cmd: Command) -> Option<Command> {
        let body = (!cmd.body.is_empty()).then(|| cmd.body.clone());
        match self.conn.send_request(&cmd.fields, body) {
            Ok(stream_id) => {
                self.written.push((cmd.written, stream_id));
                self.in_flight.insert(
                    stream_id,
                    InFlight {
                        sender: cmd.response,
                        collection: ResponseFrameCollection::default(),
                    },
                );
                None
            }
            Err(H2Error::TooManyStreams) => Some(cmd),
            Err(e @ (H2Error::GoingAway | H2Error::StreamIdExhausted)) => {
                self.closed.store(true, Ordering::Release);
                cmd.refuse(&format!("h2 connection can not open more streams: {e}"));
                None
            }
            Err(e) => {
                let _ = cmd.written.send(Err(ActionError::from(e).into()));
                None
            }
        }
    }

    fn retry_queued(&mut self) {
        while let Some(cmd) = self.queued.pop_front() {
            if let Some(cmd) = self.try_start(cmd) {
                self.queued.push_front(cmd);
                break;
            }
        }
    }

    fn finish(&mut self, stream_id: u32) {
        if let Some(mut f) = self.in_flight.remove(&stream_id) {
            f.collection.response.body = f.collection.body.freeze();
            let _ = f.sender.send(Ok(f.collection.response));
        }
    }

    fn process_events(&mut self) {
        while let Some(event) = self.conn.poll_event() {
            match event {
                H2Event::Response {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    if let Some(f) = self.in_flight.get_mut(&stream_id) {
                        let response = &mut f.collection.response;
                        response.status = fields_to_map(headers, &mut response.headers).unwrap_or(0);
                    }
                    if end_stream {
                        self.finish(stream_id);
                    }
                }
                H2Event::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    if let Some(f) = self.in_flight.get_mut(&stream_id) {
                        let size = f.collection.body.len() as u64 + data.len() as u64;
                        if size > self.max_body_size {
                            self.fail_stream(
                                stream_id,
                                ActionError::Protocol(format!(
                                    "response body exceeds {} bytes",
                                    self.max_body_size
                                )),
                            );
                            continue;
                        }
                        f.collection.body.extend_from_slice(&data);
                    }
                    if end_stream {
                        self.finish(stream_id);
                    }
                }
                H2Event::Trailers { stream_id, headers } => {
                    if let Some(f) = self.in_flight.get_mut(&stream_id) {
                        fields_to_map(headers, &mut f.collection.response.trailers);
                    }
                    self.finish(stream_id);
                }
                H2Event::StreamReset { stream_id, code } => {
                    if let Some(f) = self.in_flight.remove(&stream_id) {
                        let reason = format!("stream {stream_id} reset by peer: {code:?}");
                        let e = if code == ErrorCode::RefusedStream {
                            H2StreamError::Refused(reason)
                        } else {
                            H2StreamError::Failed(ActionError::Protocol(reason))
                        };
                        let _ = f.sender.send(Err(e));
                    }
                }
                H2Event::GoAway {
                    last_stream_id,
                    code,
                } => {
                    debug!("h2 GOAWAY received, last stream {last_stream_id}, code {code:?}");
                    self.closed.store(true, Ordering::Release);
                    let refused: Vec<u32> = self
                        .in_flight
                        .keys()
                        .copied()
                        .filter(|id| *id > last_stream_id)
                        .collect();
                    for id in refused {
                        if let Some(f) = self.in_flight.remove(&id) {
                            let _ = f.sender.send(Err(H2StreamError::Refused(format!(
                                "stream {id} refused by GOAWAY"
                            ))));
                        }
                    }
                    for cmd in self.queued.drain(..) {
                        cmd.refuse("h2 connection going away");
                    }
                }
                H2Event::PeerSettings | H2Event::SettingsAcked => {}
            }
        }
    }

    /// End a stream with an error and reset it.
    fn fail_stream(&mut self, stream_id: u32, e: ActionError) {
        if let Some(f) = self.in_flight.remove(&stream_id) {
            let _ = f.sender.send(Err(e.into()));
        }
        self.conn.cancel_stream(stream_id);
    }

    /// Cancel streams whose caller stopped waiting.
    fn drop_abandoned(&mut self) {
        let abandoned: Vec<u32> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.sender.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in abandoned {
            self.in_flight.remove(&id);
            self.conn.cancel_stream(id);
        }
    }

    fn fail_all(&mut self, e: ActionError) {
        if !self.in_flight.is_empty() || !self.queued.is_empty() {
            warn!("h2 connection failed with {} streams open: {e}", self.in_flight.len());
        }
        self.closed.store(true, Ordering::Release);
        for (_, f) in self.in_flight.drain() {
            let _ = f.sender.send(Err(e.clone().into()));
        }
        // nothing of these reached the wire
        for cmd in self.queued.drain(..) {
            cmd.refuse(&e.to_string());
        }
        for (sender, _) in self.written.drain(..) {
            let _ = sender.send(Err(e.clone().into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &'static str) -> Vec<HeaderField> {
        vec![
            HeaderField::new(Bytes::from_static(b":method"), Bytes::from_static(b"GET")),
            HeaderField::new(Bytes::from_static(b":authority"), Bytes::from_static(b"h2.test")),
            HeaderField::new(Bytes::from_static(b":scheme"), Bytes::from_static(b"http")),
            HeaderField::new(Bytes::from_static(b":path"), Bytes::from_static(path.as_bytes())),
        ]
    }

    #[tokio::test]
    async fn body_over_limit_fails_the_stream() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut conn = h2::server::handshake(server_io).await.unwrap();
            while let Some(Ok((request, mut respond))) = conn.accept().await {
                let size = if request.uri().path() == "/big" { 4096 } else { 16 };
                let response = http::Response::builder().status(200).body(()).unwrap();
                let mut send = respond.send_response(response, false).unwrap();
                send.send_data(Bytes::from(vec![b'x'; size]), true).unwrap();
            }
        });

        let session = H2Session::spawn(client_io, 1024);
        let pending = session.send(request("/small"), Bytes::new()).await.unwrap();
        let small = pending.recv().await.unwrap();
        assert_eq!(small.status, 200);
        assert_eq!(small.body.len(), 16);

        let pending = session.send(request("/big"), Bytes::new()).await.unwrap();
        let r = pending.recv().await;
        assert!(
            matches!(r, Err(H2StreamError::Failed(ActionError::Protocol(_)))),
            "{r:?}"
        );
        // only the stream is gone
        assert!(session.is_usable());
        let pending = session.send(request("/small"), Bytes::new()).await.unwrap();
        assert_eq!(pending.recv().await.unwrap().body.len(), 16);
    }
}
