/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;

use ahash::AHashMap;
use bytes::{Buf, Bytes, BytesMut};
use log::debug;

use crate::flow::{FlowWindow, RecvWindow};
use crate::frame::{self, Frame};
use crate::hpack::{Decoder, Encoder, HeaderField};
use crate::{ErrorCode, H2Error, Settings};

pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const MAX_STREAM_ID: u32 = 0x7fff_ffff;

#[derive(Debug)]
pub enum H2Event {
    /// Final response headers of a stream.
    Response {
        stream_id: u32,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    Trailers {
        stream_id: u32,
        headers: Vec<HeaderField>,
    },
    StreamReset {
        stream_id: u32,
        code: ErrorCode,
    },
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
    },
    PeerSettings,
    SettingsAcked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnState {
    Open,
    GoingAway,
    Closed,
}

struct StreamState {
    send_window: FlowWindow,
    recv_window: RecvWindow,
    pending: BytesMut,
    end_after_pending: bool,
    local_closed: bool,
    remote_closed: bool,
    response_received: bool,
}

struct HeaderAssembly {
    stream_id: u32,
    block: BytesMut,
    end_stream: bool,
}

/// Client side of an HTTP/2 connection without any I/O.
///
/// Bytes read from the transport go into [`ClientConnection::feed`], bytes to
/// write come out of [`ClientConnection::take_output`], and decoded results
/// are polled with [`ClientConnection::poll_event`].
pub struct ClientConnection {
    local_settings: Settings,
    remote_settings: Settings,
    encoder: Encoder,
    decoder: Decoder,
    next_stream_id: u32,
    streams: AHashMap<u32, StreamState>,
    send_window: FlowWindow,
    recv_window: RecvWindow,
    input: BytesMut,
    output: BytesMut,
    events: VecDeque<H2Event>,
    assembly: Option<HeaderAssembly>,
    state: ConnState,
    remote_settings_received: bool,
}

impl ClientConnection {
    pub fn new(local_settings: Settings) -> Self {
        let mut output = BytesMut::with_capacity(256);
        output.extend_from_slice(CONNECTION_PREFACE);
        frame::encode_settings(&local_settings, &mut output);
        let recv_window = RecvWindow::new(local_settings.initial_window_size);
        ClientConnection {
            decoder: Decoder::new(local_settings.header_table_size as usize),
            local_settings,
            remote_settings: Settings::default(),
            encoder: Encoder::default(),
            next_stream_id: 1,
            streams: AHashMap::new(),
            send_window: FlowWindow::default(),
            recv_window,
            input: BytesMut::new(),
            output,
            events: VecDeque::new(),
            assembly: None,
            state: ConnState::Open,
            remote_settings_received: false,
        }
    }

    #[inline]
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    #[inline]
    pub fn remote_settings_received(&self) -> bool {
        self.remote_settings_received
    }

    #[inline]
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    #[inline]
    pub fn is_stream_open(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// The id the next request would get.
    #[inline]
    pub fn next_stream_id(&self) -> u32 {
        self.next_stream_id
    }

    /// Whether new streams can still be opened on this connection.
    pub fn can_open_stream(&self) -> bool {
        self.state == ConnState::Open && self.next_stream_id <= MAX_STREAM_ID
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub fn take_output(&mut self) -> Option<Bytes> {
        if self.output.is_empty() {
            None
        } else {
            Some(self.output.split().freeze())
        }
    }

    pub fn poll_event(&mut self) -> Option<H2Event> {
        self.events.pop_front()
    }

    /// Open a stream and queue its HEADERS and any DATA allowed by flow
    /// control. The rest of the body is sent as windows open up.
    pub fn send_request(
        &mut self,
        headers: &[HeaderField],
        body: Option<Bytes>,
    ) -> Result<u32, H2Error> {
        match self.state {
            ConnState::Open => {}
            _ => return Err(H2Error::GoingAway),
        }
        if self.next_stream_id > MAX_STREAM_ID {
            return Err(H2Error::StreamIdExhausted);
        }
        if let Some(max) = self.remote_settings.max_concurrent_streams
            && self.streams.len() >= max as usize
        {
            return Err(H2Error::TooManyStreams);
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let body = body.filter(|b| !b.is_empty());
        let mut block = Vec::with_capacity(128);
        self.encoder.encode(headers, &mut block);
        frame::encode_header_block(
            stream_id,
            &block,
            body.is_none(),
            self.remote_settings.max_frame_size as usize,
            &mut self.output,
        );

        let mut stream = StreamState {
            send_window: FlowWindow::new(self.remote_settings.initial_window_size),
            recv_window: RecvWindow::new(self.local_settings.initial_window_size),
            pending: BytesMut::new(),
            end_after_pending: false,
            local_closed: body.is_none(),
            remote_closed: false,
            response_received: false,
        };
        if let Some(body) = body {
            stream.pending.extend_from_slice(&body);
            stream.end_after_pending = true;
        }
        self.streams.insert(stream_id, stream);
        self.flush_pending_data()?;
        Ok(stream_id)
    }

    /// Abort a stream locally.
    pub fn cancel_stream(&mut self, stream_id: u32) {
        if self.streams.remove(&stream_id).is_some() {
            frame::encode_rst_stream(stream_id, ErrorCode::Cancel, &mut self.output);
        }
    }

    pub fn send_ping(&mut self, payload: [u8; 8]) {
        frame::encode_ping(payload, false, &mut self.output);
    }

    /// Start a graceful shutdown from our side.
    pub fn go_away(&mut self) {
        if self.state != ConnState::Closed {
            frame::encode_goaway(0, ErrorCode::NoError, &mut self.output);
            self.state = ConnState::Closed;
        }
    }

    fn flush_pending_data(&mut self) -> Result<(), H2Error> {
        let max_frame = self.remote_settings.max_frame_size as usize;
        for (stream_id, stream) in self.streams.iter_mut() {
            while !stream.pending.is_empty() {
                let n = stream
                    .pending
                    .len()
                    .min(max_frame)
                    .min(self.send_window.available())
                    .min(stream.send_window.available());
                if n == 0 {
                    break;
                }
                let chunk = stream.pending.split_to(n);
                let end_stream = stream.pending.is_empty() && stream.end_after_pending;
                self.send_window.consume(n as u32)?;
                stream.send_window.consume(n as u32)?;
                frame::encode_data(*stream_id, &chunk, end_stream, &mut self.output);
                if end_stream {
                    stream.local_closed = true;
                }
            }
        }
        self.streams
            .retain(|_, s| !(s.local_closed && s.remote_closed));
        Ok(())
    }

    /// Process bytes read from the transport.
    ///
    /// A returned error is fatal for the connection; a GOAWAY has already
    /// been queued for output.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), H2Error> {
        self.input.extend_from_slice(data);
        loop {
            let r = Frame::decode(&mut self.input, self.local_settings.max_frame_size);
            let frame = match r {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.fail(e)),
            };
            if let Err(e) = self.handle_frame(frame) {
                return Err(self.fail(e));
            }
        }
    }

    fn fail(&mut self, e: H2Error) -> H2Error {
        debug!("h2 connection error: {e}");
        if self.state != ConnState::Closed {
            // no server initiated stream was ever accepted
            frame::encode_goaway(0, e.error_code(), &mut self.output);
            self.state = ConnState::Closed;
        }
        e
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), H2Error> {
        if let Some(assembly) = &self.assembly {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == assembly.stream_id => {}
                _ => return Err(H2Error::Protocol("expected CONTINUATION")),
            }
        }

        match frame {
            Frame::Settings { ack: true, .. } => {
                self.events.push_back(H2Event::SettingsAcked);
            }
            Frame::Settings {
                ack: false,
                payload,
            } => {
                let mut settings = self.remote_settings.clone();
                settings.apply(&payload)?;
                self.apply_remote_settings(settings)?;
            }
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
            } => {
                if end_headers {
                    self.handle_header_block(stream_id, &block, end_stream)?;
                } else {
                    let mut buf = BytesMut::with_capacity(block.len() * 2);
                    buf.extend_from_slice(&block);
                    self.assembly = Some(HeaderAssembly {
                        stream_id,
                        block: buf,
                        end_stream,
                    });
                }
            }
            Frame::Continuation {
                stream_id,
                block,
                end_headers,
            } => {
                let Some(mut assembly) = self.assembly.take() else {
                    return Err(H2Error::Protocol("unexpected CONTINUATION"));
                };
                assembly.block.extend_from_slice(&block);
                if end_headers {
                    self.handle_header_block(stream_id, &assembly.block, assembly.end_stream)?;
                } else {
                    self.assembly = Some(assembly);
                }
            }
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_len,
            } => self.handle_data(stream_id, data, end_stream, flow_len)?,
            Frame::RstStream { stream_id, code } => {
                if self.streams.remove(&stream_id).is_some() {
                    self.events
                        .push_back(H2Event::StreamReset { stream_id, code });
                }
            }
            Frame::Ping { ack: false, payload } => {
                frame::encode_ping(payload, true, &mut self.output);
            }
            Frame::Ping { ack: true, .. } => {}
            Frame::GoAway {
                last_stream_id,
                code,
                ..
            } => {
                debug!("h2 GOAWAY received, last stream {last_stream_id}, code {code}");
                if self.state == ConnState::Open {
                    self.state = ConnState::GoingAway;
                }
                let refused: Vec<u32> = self
                    .streams
                    .keys()
                    .copied()
                    .filter(|id| *id > last_stream_id)
                    .collect();
                for stream_id in refused {
                    self.streams.remove(&stream_id);
                    self.events.push_back(H2Event::StreamReset {
                        stream_id,
                        code: ErrorCode::RefusedStream,
                    });
                }
                self.events.push_back(H2Event::GoAway {
                    last_stream_id,
                    code,
                });
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                if stream_id == 0 {
                    self.send_window.increase(increment)?;
                } else if let Some(stream) = self.streams.get_mut(&stream_id) {
                    stream.send_window.increase(increment)?;
                }
                self.flush_pending_data()?;
            }
            Frame::PushPromise { .. } => {
                return Err(H2Error::Protocol("PUSH_PROMISE with push disabled"));
            }
            Frame::Priority { .. } | Frame::Unknown { .. } => {}
        }
        Ok(())
    }

    fn apply_remote_settings(&mut self, settings: Settings) -> Result<(), H2Error> {
        let delta =
            settings.initial_window_size as i64 - self.remote_settings.initial_window_size as i64;
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.send_window.adjust(delta)?;
            }
        }
        self.encoder
            .set_max_table_size(settings.header_table_size.min(4096) as usize);
        self.remote_settings = settings;
        self.remote_settings_received = true;
        frame::encode_settings_ack(&mut self.output);
        self.events.push_back(H2Event::PeerSettings);
        self.flush_pending_data()
    }

    fn handle_header_block(
        &mut self,
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
    ) -> Result<(), H2Error> {
        // decode even for unknown streams to keep the table in sync
        let headers = self.decoder.decode(block)?;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };

        if stream.response_received {
            if !end_stream {
                return Err(H2Error::Protocol("trailers without END_STREAM"));
            }
            self.events.push_back(H2Event::Trailers { stream_id, headers });
        } else {
            let informational = headers
                .iter()
                .find(|f| f.name.as_ref() == b":status")
                .map(|f| f.value.first() == Some(&b'1'))
                .ok_or(H2Error::Protocol("response without :status"))?;
            if informational {
                return Ok(());
            }
            stream.response_received = true;
            self.events.push_back(H2Event::Response {
                stream_id,
                headers,
                end_stream,
            });
        }
        if end_stream {
            self.close_remote(stream_id);
        }
        Ok(())
    }

    fn handle_data(
        &mut self,
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        flow_len: u32,
    ) -> Result<(), H2Error> {
        if let Some(inc) = self.recv_window.on_received(flow_len)? {
            frame::encode_window_update(0, inc, &mut self.output);
        }
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        if !stream.response_received {
            return Err(H2Error::Protocol("DATA before HEADERS"));
        }
        if let Some(inc) = stream.recv_window.on_received(flow_len)?
            && !end_stream
        {
            frame::encode_window_update(stream_id, inc, &mut self.output);
        }
        self.events.push_back(H2Event::Data {
            stream_id,
            data,
            end_stream,
        });
        if end_stream {
            self.close_remote(stream_id);
        }
        Ok(())
    }

    fn close_remote(&mut self, stream_id: u32) {
        let remove = match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                stream.remote_closed = true;
                stream.local_closed
            }
            None => false,
        };
        if remove {
            self.streams.remove(&stream_id);
        } else if let Some(stream) = self.streams.get_mut(&stream_id)
            && !stream.pending.is_empty()
        {
            // the peer answered early, the rest of the body is moot
            stream.pending.clear();
            self.streams.remove(&stream_id);
            frame::encode_rst_stream(stream_id, ErrorCode::NoError, &mut self.output);
        }
    }
}

/// Skip the bytes of a connection preface, used by test servers.
pub fn strip_preface(buf: &mut BytesMut) -> bool {
    if buf.len() < CONNECTION_PREFACE.len() || &buf[..CONNECTION_PREFACE.len()] != CONNECTION_PREFACE
    {
        return false;
    }
    buf.advance(CONNECTION_PREFACE.len());
    true
}
