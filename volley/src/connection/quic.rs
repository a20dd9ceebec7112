/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use log::{debug, trace, warn};
use quinn::{Connection, Endpoint, RecvStream, SendStream, VarInt};
use tokio::sync::{Notify, mpsc, watch};

use volley_h3::qpack::{DecodedSection, Decoder, Encoder};
use volley_h3::{
    ControlEvent, ControlStreamReader, H3Error, H3ErrorCode, H3Settings, HeaderField,
    ResponseFrame, ResponseStreamReader, UniStreamType, encode_control_preamble, frame, varint,
};

use crate::ActionError;
use crate::timeouts::connect_timeout;

const QPACK_MAX_TABLE_CAPACITY: u64 = 4096;
const QPACK_BLOCKED_STREAMS: u64 = 16;
const MAX_FIELD_SECTION_SIZE: u64 = 64 * 1024;

#[derive(Debug, Default)]
pub struct H3Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub trailers: HeaderMap,
}

#[derive(Clone, Debug)]
enum PeerState {
    Pending,
    Ready(H3Settings),
    Failed(String),
}

struct QpackState {
    decoder: Decoder,
    /// Sections that were blocked and became decodable, by stream id.
    ready: AHashMap<u64, Vec<HeaderField>>,
}

struct Shared {
    conn: Connection,
    qpack: Mutex<QpackState>,
    unblocked: Notify,
    peer: watch::Sender<PeerState>,
    going_away: AtomicBool,
    decoder_out: mpsc::UnboundedSender<Vec<u8>>,
}

impl Shared {
    fn qpack(&self) -> MutexGuard<'_, QpackState> {
        match self.qpack.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    fn flush_decoder(&self, qpack: &mut QpackState) {
        if let Some(data) = qpack.decoder.take_decoder_stream_data() {
            let _ = self.decoder_out.send(data);
        }
    }

    fn fail(&self, e: H3Error) {
        warn!("h3 connection error: {e}");
        let code = e.error_code();
        self.conn
            .close(VarInt::from_u64(code.code()).unwrap_or(VarInt::from_u32(0x102)), b"");
        self.peer.send_replace(PeerState::Failed(e.to_string()));
        self.unblocked.notify_waiters();
    }
}

fn quic_connect_error<E: std::fmt::Display>(e: E) -> ActionError {
    ActionError::Connect(format!("quic: {e}"))
}

fn stream_error<E: std::fmt::Display>(e: E) -> ActionError {
    ActionError::Protocol(format!("h3 stream: {e}"))
}

/// An HTTP/3 connection. Each request runs on its own bidirectional
/// stream; control and QPACK streams are opened on connect.
pub struct H3Session {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    // closing any of these is a connection error for the peer
    _control: SendStream,
    _encoder: SendStream,
}

impl H3Session {
    pub async fn connect(
        server_name: &str,
        addr: SocketAddr,
        config: quinn::ClientConfig,
        timeout: Duration,
    ) -> Result<Self, ActionError> {
        let bind: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let endpoint = Endpoint::client(bind).map_err(quic_connect_error)?;
        let server_name = server_name.trim_start_matches('[').trim_end_matches(']');

        connect_timeout(timeout, async {
            let conn = endpoint
                .connect_with(config, addr, server_name)
                .map_err(quic_connect_error)?
                .await
                .map_err(quic_connect_error)?;
            H3Session::setup(endpoint.clone(), conn).await
        })
        .await
    }

    async fn setup(endpoint: Endpoint, conn: Connection) -> Result<Self, ActionError> {
        let local = H3Settings {
            qpack_max_table_capacity: QPACK_MAX_TABLE_CAPACITY,
            qpack_blocked_streams: QPACK_BLOCKED_STREAMS,
            max_field_section_size: Some(MAX_FIELD_SECTION_SIZE),
            ..Default::default()
        };

        let mut control = conn.open_uni().await.map_err(quic_connect_error)?;
        control
            .write_all(&encode_control_preamble(&local))
            .await
            .map_err(quic_connect_error)?;
        let mut encoder = conn.open_uni().await.map_err(quic_connect_error)?;
        let mut preamble = Vec::with_capacity(1);
        UniStreamType::QpackEncoder.encode(&mut preamble);
        encoder
            .write_all(&preamble)
            .await
            .map_err(quic_connect_error)?;
        let mut decoder = conn.open_uni().await.map_err(quic_connect_error)?;
        preamble.clear();
        UniStreamType::QpackDecoder.encode(&mut preamble);
        decoder
            .write_all(&preamble)
            .await
            .map_err(quic_connect_error)?;

        let (decoder_out, decoder_rx) = mpsc::unbounded_channel();
        let (peer, mut peer_rx) = watch::channel(PeerState::Pending);
        let shared = Arc::new(Shared {
            conn: conn.clone(),
            qpack: Mutex::new(QpackState {
                decoder: Decoder::new(
                    QPACK_MAX_TABLE_CAPACITY as usize,
                    QPACK_BLOCKED_STREAMS as usize,
                ),
                ready: AHashMap::new(),
            }),
            unblocked: Notify::new(),
            peer,
            going_away: AtomicBool::new(false),
            decoder_out,
        });
        tokio::spawn(write_decoder_stream(decoder, decoder_rx));
        tokio::spawn(accept_uni_streams(shared.clone()));

        // requests wait for the peer SETTINGS
        let state = tokio::select! {
            r = peer_rx.wait_for(|s| !matches!(s, PeerState::Pending)) => match r {
                Ok(s) => s.clone(),
                Err(_) => PeerState::Failed("h3 connection dropped".to_string()),
            },
            e = conn.closed() => PeerState::Failed(e.to_string()),
        };
        match state {
            PeerState::Ready(settings) => {
                debug!("h3 peer settings received: {settings:?}");
            }
            PeerState::Failed(e) => return Err(ActionError::Protocol(e)),
            PeerState::Pending => {}
        }

        Ok(H3Session {
            endpoint,
            shared,
            _control: control,
            _encoder: encoder,
        })
    }

    pub fn is_usable(&self) -> bool {
        self.shared.conn.close_reason().is_none() && !self.shared.going_away.load(Ordering::Acquire)
    }

    pub fn peer_settings(&self) -> Option<H3Settings> {
        match &*self.shared.peer.borrow() {
            PeerState::Ready(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Open a request stream and write the whole request on it.
    pub async fn send(
        &self,
        fields: &[HeaderField],
        body: &Bytes,
    ) -> Result<PendingResponse, ActionError> {
        let (mut send, recv) = self
            .shared
            .conn
            .open_bi()
            .await
            .map_err(quic_connect_error)?;
        let stream_id = VarInt::from(send.id()).into_inner();

        let mut block = Vec::with_capacity(128);
        Encoder::new().encode(fields, &mut block);
        let mut buf = BytesMut::with_capacity(block.len() + body.len() + 16);
        frame::encode_headers(&block, &mut buf);
        if !body.is_empty() {
            frame::encode_data(body, &mut buf);
        }
        send.write_all(&buf).await.map_err(stream_error)?;
        send.finish().map_err(stream_error)?;
        Ok(PendingResponse {
            shared: self.shared.clone(),
            stream_id,
            recv,
        })
    }

    pub fn close(&self) {
        self.shared
            .conn
            .close(VarInt::from_u64(H3ErrorCode::NoError.code()).unwrap_or(VarInt::from_u32(0x100)), b"");
        self.endpoint.close(VarInt::from_u32(0x100), b"");
    }
}

/// Response side of a request stream.
pub struct PendingResponse {
    shared: Arc<Shared>,
    pub stream_id: u64,
    recv: RecvStream,
}

/// Cancels a blocked field section when its reader goes away.
struct BlockedGuard<'a> {
    shared: &'a Shared,
    stream_id: u64,
    armed: bool,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut qpack = self.shared.qpack();
            qpack.ready.remove(&self.stream_id);
            qpack.decoder.cancel_stream(self.stream_id);
            self.shared.flush_decoder(&mut qpack);
        }
    }
}

impl PendingResponse {
    async fn decode_fields(&self, block: Bytes) -> Result<Vec<HeaderField>, ActionError> {
        {
            let mut qpack = self.shared.qpack();
            let r = qpack.decoder.decode_section(self.stream_id, block);
            self.shared.flush_decoder(&mut qpack);
            match r {
                Ok(DecodedSection::Done(fields)) => return Ok(fields),
                Ok(DecodedSection::Blocked) => {}
                Err(e) => {
                    drop(qpack);
                    let e = H3Error::Decompression(e);
                    let ae = ActionError::Protocol(format!("{}: {e}", e.get_type()));
                    self.shared.fail(e);
                    return Err(ae);
                }
            }
        }

        trace!("h3 stream {} waits for qpack inserts", self.stream_id);
        let mut guard = BlockedGuard {
            shared: &self.shared,
            stream_id: self.stream_id,
            armed: true,
        };
        loop {
            let notified = self.shared.unblocked.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let ready = self.shared.qpack().ready.remove(&self.stream_id);
            if let Some(fields) = ready {
                guard.armed = false;
                return Ok(fields);
            }
            let failed = match &*self.shared.peer.borrow() {
                PeerState::Failed(e) => Some(e.clone()),
                _ => None,
            };
            if let Some(e) = failed {
                guard.armed = false;
                return Err(ActionError::Protocol(e));
            }
            notified.await;
        }
    }

    pub async fn recv(mut self) -> Result<H3Response, ActionError> {
        let mut reader = ResponseStreamReader::new();
        let mut response = H3Response::default();
        let mut body = BytesMut::new();
        let mut have_status = false;
        loop {
            let chunk = self
                .recv
                .read_chunk(usize::MAX, true)
                .await
                .map_err(stream_error)?;
            let finished = match chunk {
                Some(c) => {
                    reader.extend(&c.bytes);
                    false
                }
                None => true,
            };

            while let Some(frame) = reader.next_frame()? {
                match frame {
                    ResponseFrame::Headers(block) => {
                        let fields = self.decode_fields(block).await?;
                        let mut headers = HeaderMap::new();
                        let status = fields_to_map(fields, &mut headers)
                            .ok_or(ActionError::Protocol("h3 response without :status".to_string()))?;
                        if (100..200).contains(&status) {
                            reader.informational_response();
                            continue;
                        }
                        response.status = status;
                        response.headers = headers;
                        have_status = true;
                    }
                    ResponseFrame::Data(data) => body.extend_from_slice(&data),
                    ResponseFrame::Trailers(block) => {
                        let fields = self.decode_fields(block).await?;
                        fields_to_map(fields, &mut response.trailers);
                    }
                }
            }

            if finished {
                reader.finish()?;
                break;
            }
        }
        if !have_status {
            return Err(ActionError::Protocol("h3 stream ended without a response".to_string()));
        }
        response.body = body.freeze();
        Ok(response)
    }
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
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(&f.name),
            HeaderValue::from_maybe_shared(f.value),
        ) {
            map.append(name, value);
        }
    }
    status
}

async fn write_decoder_stream(mut stream: SendStream, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = stream.write_all(&data).await {
            debug!("qpack decoder stream write failed: {e}");
            break;
        }
    }
}

async fn accept_uni_streams(shared: Arc<Shared>) {
    loop {
        let recv = match shared.conn.accept_uni().await {
            Ok(s) => s,
            Err(e) => {
                debug!("h3 connection closed: {e}");
                shared
                    .peer
                    .send_if_modified(|s| match s {
                        PeerState::Pending => {
                            *s = PeerState::Failed(e.to_string());
                            true
                        }
                        _ => false,
                    });
                shared.unblocked.notify_waiters();
                return;
            }
        };
        tokio::spawn(handle_uni_stream(shared.clone(), recv));
    }
}

async fn read_stream_type(recv: &mut RecvStream) -> Option<(UniStreamType, Bytes)> {
    let mut buf = BytesMut::new();
    loop {
        if let Some((v, n)) = varint::decode(&buf) {
            let _ = buf.split_to(n);
            return Some((UniStreamType::from(v), buf.freeze()));
        }
        let chunk = recv.read_chunk(usize::MAX, true).await.ok()??;
        buf.extend_from_slice(&chunk.bytes);
    }
}

async fn handle_uni_stream(shared: Arc<Shared>, mut recv: RecvStream) {
    let Some((stream_type, rest)) = read_stream_type(&mut recv).await else {
        return;
    };
    match stream_type {
        UniStreamType::Control => {
            let mut reader = ControlStreamReader::new();
            let mut data = rest;
            loop {
                match reader.feed(&data) {
                    Ok(events) => {
                        for event in events {
                            match event {
                                ControlEvent::Settings(s) => {
                                    shared.peer.send_replace(PeerState::Ready(s));
                                }
                                ControlEvent::GoAway(id) => {
                                    debug!("h3 GOAWAY received, stream {id}");
                                    shared.going_away.store(true, Ordering::Release);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        shared.fail(e);
                        return;
                    }
                }
                match recv.read_chunk(usize::MAX, true).await {
                    Ok(Some(c)) => data = c.bytes,
                    Ok(None) => {
                        shared.fail(H3Error::ClosedCriticalStream);
                        return;
                    }
                    Err(_) => return,
                }
            }
        }
        UniStreamType::QpackEncoder => {
            let mut data = rest;
            loop {
                if !data.is_empty() {
                    let mut qpack = shared.qpack();
                    match qpack.decoder.on_encoder_stream(&data) {
                        Ok(ready) => {
                            let unblocked = !ready.is_empty();
                            qpack.ready.extend(ready);
                            shared.flush_decoder(&mut qpack);
                            drop(qpack);
                            if unblocked {
                                shared.unblocked.notify_waiters();
                            }
                        }
                        Err(e) => {
                            drop(qpack);
                            shared.fail(H3Error::EncoderStream(e));
                            return;
                        }
                    }
                }
                match recv.read_chunk(usize::MAX, true).await {
                    Ok(Some(c)) => data = c.bytes,
                    Ok(None) => {
                        shared.fail(H3Error::ClosedCriticalStream);
                        return;
                    }
                    Err(_) => return,
                }
            }
        }
        UniStreamType::Push => {
            // no MAX_PUSH_ID was ever sent
            shared.fail(H3Error::StreamCreation("push stream without MAX_PUSH_ID"));
        }
        UniStreamType::QpackDecoder | UniStreamType::Unknown(_) => {
            // our encoder never uses the dynamic table, so decoder stream
            // instructions carry nothing for us
            while let Ok(Some(_)) = recv.read_chunk(usize::MAX, true).await {}
        }
    }
}
