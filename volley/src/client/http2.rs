/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::sync::Mutex;

use volley_h2::HeaderField;
use volley_http::SetCookie;

use super::grpc;
use super::lifecycle::{ClientCore, Exchange};
use super::{ClientOptions, MAX_BODY_SIZE};
use crate::action::{Action, Encoded, Protocol, Target};
use crate::connection::{H2Response, H2Session, H2StreamError};
use crate::result::Stage;
use crate::{ActionError, ActionResult, EngineContext};

/// How many times a request the peer refused to process is sent again.
const REFUSED_RETRIES: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PeerKey {
    host: String,
    addr: SocketAddr,
    tls: bool,
}

impl PeerKey {
    pub(crate) fn new(target: &Target) -> Self {
        PeerKey {
            host: target.url.host.to_ascii_lowercase(),
            addr: target.socket.addr,
            tls: target.tls.is_some(),
        }
    }
}

/// A pooled stream slot. It remembers the session its last stream ran on.
#[derive(Default)]
pub struct H2Slot {
    session: Option<(PeerKey, Arc<H2Session>)>,
}

/// HTTP/2 client. Pool slots are streams multiplexed over one session per
/// peer, so the pool size bounds the concurrent streams.
pub struct Http2Client {
    core: ClientCore<H2Slot>,
    sessions: Mutex<AHashMap<PeerKey, Arc<H2Session>>>,
    reset: bool,
}

impl Http2Client {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        Http2Client::with_protocol("http2", Protocol::Http2, ctx, options)
    }

    pub(crate) fn with_protocol(
        name: &str,
        protocol: Protocol,
        ctx: EngineContext,
        options: ClientOptions,
    ) -> Self {
        Http2Client {
            core: ClientCore::new(name, protocol, ctx, options, H2Slot::default),
            sessions: Mutex::new(AHashMap::new()),
            reset: options.reset_connections,
        }
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|s| s.is_usable()).count()
    }

    async fn reset_shared(&self) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values() {
            session.mark_closed();
        }
        sessions.clear();
    }

    async fn session(
        &self,
        slot: &mut H2Slot,
        target: &Target,
    ) -> Result<Arc<H2Session>, ActionError> {
        let key = PeerKey::new(target);
        if !self.reset
            && let Some((k, s)) = &slot.session
            && *k == key
            && s.is_usable()
        {
            return Ok(s.clone());
        }

        let mut sessions = self.sessions.lock().await;
        if !self.reset
            && let Some(s) = sessions.get(&key)
            && s.is_usable()
        {
            slot.session = Some((key, s.clone()));
            return Ok(s.clone());
        }

        self.core.stats.add_conn_attempt();
        let tls = target.tls.as_ref().and_then(|t| t.openssl()).map(|c| c.as_ref());
        let session = H2Session::connect(
            &target.url.host,
            &target.socket,
            tls,
            self.core.timeouts.connect,
            MAX_BODY_SIZE,
        )
        .await?;
        self.core.stats.add_conn_success();
        let session = Arc::new(session);
        if let Some(old) = sessions.insert(key.clone(), session.clone()) {
            debug!("replaced h2 session to {}", target.url.authority);
            old.mark_closed();
        }
        slot.session = Some((key, session.clone()));
        Ok(session)
    }

    async fn round_trip(
        &self,
        session: &H2Session,
        fields: &[HeaderField],
        body: &Bytes,
        result: &mut ActionResult,
    ) -> Result<H2Response, H2StreamError> {
        let pending = session.send(fields.to_vec(), body.clone()).await?;
        self.core.stats.add_write_bytes(body.len());
        result.mark(Stage::WriteEnd);

        match tokio::time::timeout(self.core.timeouts.read, pending.recv()).await {
            Ok(r) => r,
            Err(_) => Err(ActionError::Timeout.into()),
        }
    }
}

#[async_trait]
impl Exchange for Http2Client {
    type Conn = H2Slot;

    async fn exchange(
        &self,
        slot: &mut H2Slot,
        action: &Action,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let Encoded::Fields { fields, body, .. } = encoded else {
            return Err(ActionError::Protocol(format!(
                "{} request can not be sent over http/2",
                action.protocol
            )));
        };
        let target = action.target()?;
        let mut retries = 0;
        let rsp = loop {
            let session = self.session(slot, target).await?;
            if result.timings.get(Stage::ConnectEnd).is_none() {
                result.mark(Stage::ConnectEnd);
            }
            match self.round_trip(&session, fields, body, result).await {
                Ok(rsp) => break rsp,
                Err(H2StreamError::Refused(reason)) if retries < REFUSED_RETRIES => {
                    retries += 1;
                    debug!("{reason}, sending {} again", action.name);
                    slot.session = None;
                }
                Err(e) => return Err(e.into()),
            }
        };
        result.mark(Stage::ReadEnd);

        result.status = Some(rsp.status);
        result.cookies = SetCookie::collect(&rsp.headers);
        result.headers = rsp.headers;
        result.trailers = rsp.trailers;
        result.body = rsp.body;
        if self.core.protocol == Protocol::Grpc {
            grpc::check_response(result)?;
        }
        Ok(())
    }
}

impl_client!(Http2Client);
