/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use http::header;
use log::debug;
use tokio::sync::Mutex;

use volley_http::SetCookie;

use super::http2::PeerKey;
use super::lifecycle::{ClientCore, Exchange};
use super::{ClientOptions, resolve_target, tls_protocol_for};
use crate::action::{Action, Encoded, Protocol, Target, encode_request};
use crate::connection::H3Session;
use crate::result::Stage;
use crate::timeouts::read_timeout;
use crate::{ActionError, ActionResult, EngineContext};

#[derive(Default)]
pub struct H3Slot {
    session: Option<(PeerKey, Arc<H3Session>)>,
}

/// HTTP/3 client. Like HTTP/2, slots are request streams over one QUIC
/// connection per peer.
pub struct Http3Client {
    core: ClientCore<H3Slot>,
    sessions: Mutex<AHashMap<PeerKey, Arc<H3Session>>>,
    reset: bool,
}

impl Http3Client {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        Http3Client {
            core: ClientCore::new("http3", Protocol::Http3, ctx, options, H3Slot::default),
            sessions: Mutex::new(AHashMap::new()),
            reset: options.reset_connections,
        }
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|s| s.is_usable()).count()
    }

    async fn reset_shared(&self) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values() {
            session.close();
        }
        sessions.clear();
    }

    async fn session(
        &self,
        slot: &mut H3Slot,
        target: &Target,
    ) -> Result<Arc<H3Session>, ActionError> {
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

        let Some(config) = target.tls.as_ref().and_then(|t| t.quic()) else {
            return Err(ActionError::Tls(format!(
                "no quic tls context for {}",
                target.url.authority
            )));
        };
        self.core.stats.add_conn_attempt();
        let session = H3Session::connect(
            &target.url.host,
            target.socket.addr,
            config.clone(),
            self.core.timeouts.connect,
        )
        .await?;
        self.core.stats.add_conn_success();
        let session = Arc::new(session);
        if let Some(old) = sessions.insert(key.clone(), session.clone()) {
            debug!("replaced h3 session to {}", target.url.authority);
            old.close();
        }
        slot.session = Some((key, session.clone()));
        Ok(session)
    }

    async fn send_one(
        &self,
        slot: &mut H3Slot,
        target: &Target,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let Encoded::Fields { fields, body, .. } = encoded else {
            return Err(ActionError::Protocol(
                "request can not be sent over http/3".to_string(),
            ));
        };
        let session = self.session(slot, target).await?;
        result.mark(Stage::ConnectEnd);

        let pending = session.send(fields, body).await?;
        self.core.stats.add_write_bytes(body.len());
        result.mark(Stage::WriteEnd);

        let rsp = read_timeout(self.core.timeouts.read, pending.recv()).await?;
        result.mark(Stage::ReadEnd);

        result.status = Some(rsp.status);
        result.cookies = SetCookie::collect(&rsp.headers);
        result.headers = rsp.headers;
        result.trailers = rsp.trailers;
        result.body = rsp.body;
        Ok(())
    }
}

#[async_trait]
impl Exchange for Http3Client {
    type Conn = H3Slot;

    async fn exchange(
        &self,
        slot: &mut H3Slot,
        action: &Action,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError> {
        let mut target = action.target()?.clone();
        let mut next: Option<Encoded> = None;
        let mut hops = 0;
        loop {
            let current = next.as_ref().unwrap_or(encoded);
            self.send_one(slot, &target, current, result).await?;

            let status = result.status.unwrap_or_default();
            if !(300..400).contains(&status) || hops >= action.redirects {
                return Ok(());
            }
            let Some(location) = result
                .headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
            else {
                return Ok(());
            };

            let url = target.url.join(&location)?;
            target = if url.same_origin(&target.url) {
                Arc::new(Target {
                    url,
                    socket: target.socket,
                    tls: target.tls.clone(),
                })
            } else {
                let tls = tls_protocol_for(Protocol::Http3, &url);
                resolve_target(
                    &self.core.ctx,
                    url,
                    Protocol::Http3.transport(),
                    tls,
                    action.tls_cert.as_ref(),
                    &self.core.timeouts,
                )
                .await?
            };
            next = Some(encode_request(
                &action.request,
                Protocol::Http3,
                &target.url,
                self.core.timeouts.total,
            )?);
            hops += 1;
            debug!("{} follows h3 redirect {hops} to {location}", action.name);
            result.clear_response();
        }
    }

    async fn retire(&self, slot: H3Slot) {
        if let Some((_, session)) = slot.session
            && !session.is_usable()
        {
            session.close();
        }
    }
}

impl_client!(Http3Client);
