/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, trace};
use tokio_util::sync::CancellationToken;

use super::{ClientOptions, PreparedSet};
use crate::action::{Action, Encoded, Protocol};
use crate::pool::Pool;
use crate::result::Stage;
use crate::stats::ClientRuntimeStats;
use crate::{ActionError, ActionResult, EngineContext, Timeouts};

/// The protocol specific part of an execution: connect, write the request
/// and read the response on a leased connection.
#[async_trait]
pub(crate) trait Exchange: Send + Sync {
    type Conn: Send;

    /// Marks `ConnectEnd`, `WriteEnd` and `ReadEnd` on `result` as the
    /// exchange goes through them.
    async fn exchange(
        &self,
        conn: &mut Self::Conn,
        action: &Action,
        encoded: &Encoded,
        result: &mut ActionResult,
    ) -> Result<(), ActionError>;

    /// Close a connection that left the pool.
    async fn retire(&self, _conn: Self::Conn) {}
}

/// State every client carries.
pub(crate) struct ClientCore<C> {
    pub(crate) name: String,
    pub(crate) protocol: Protocol,
    pub(crate) ctx: EngineContext,
    pub(crate) timeouts: Timeouts,
    pub(crate) stats: Arc<ClientRuntimeStats>,
    pub(crate) pool: Pool<C>,
    pub(crate) prepared: PreparedSet,
}

impl<C: Send + 'static> ClientCore<C> {
    pub(crate) fn new<F>(
        name: &str,
        protocol: Protocol,
        ctx: EngineContext,
        options: ClientOptions,
        factory: F,
    ) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        ClientCore {
            name: name.to_string(),
            protocol,
            ctx,
            timeouts: options.timeouts,
            stats: Arc::new(ClientRuntimeStats::new(name)),
            pool: Pool::new(options.pool_size, factory),
            prepared: PreparedSet::default(),
        }
    }

    /// Run one action through the whole lifecycle. Never fails: errors end
    /// up on the returned result.
    pub(crate) async fn execute<E>(
        &self,
        exchange: &E,
        action: &Action,
        cancel: &CancellationToken,
    ) -> ActionResult
    where
        E: Exchange<Conn = C>,
    {
        let mut result = ActionResult::new(action);
        result.mark(Stage::WaitStart);
        self.stats.add_task_total();
        self.stats.inc_task_alive();

        let mut retired = None;
        match self.run(exchange, action, cancel, &mut result, &mut retired).await {
            Ok(()) => {
                self.stats.add_task_passed();
                self.stats.add_read_bytes(result.body.len());
            }
            Err(e) => {
                debug!("{} action {} failed: {e}", self.name, action.name);
                self.stats.add_task_failed();
                result.fail(e);
            }
        }

        self.notify(action, &mut result).await;
        self.stats.dec_task_alive();
        if let Some(conn) = retired {
            exchange.retire(conn).await;
        }
        result
    }

    /// Everything from the pool lease on. A connection that failed is left
    /// in `retired`, already replaced in the pool, to be closed once the
    /// result is complete.
    async fn run<E>(
        &self,
        exchange: &E,
        action: &Action,
        cancel: &CancellationToken,
        result: &mut ActionResult,
        retired: &mut Option<C>,
    ) -> Result<(), ActionError>
    where
        E: Exchange<Conn = C>,
    {
        let mut lease = self.pool.acquire(cancel).await?;

        if action.hooks.listen {
            let wait = self.ctx.hooks.listen(action.id);
            trace!("action {} waiting for its notifier", action.name);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    lease.release();
                    return Err(ActionError::Cancelled);
                }
                _ = wait => {}
            }
        }

        let mut conn_failed = false;
        let r = {
            let fut = self.attempt(exchange, action, lease.conn_mut(), result, &mut conn_failed);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ActionError::Cancelled),
                r = tokio::time::timeout(self.timeouts.total, fut) => {
                    r.unwrap_or(Err(ActionError::Timeout))
                }
            }
        };

        // the connection state is unknown when the exchange did not finish
        if r.is_err() && conn_failed {
            if let Some(conn) = lease.discard() {
                self.stats.add_conn_replaced();
                *retired = Some(conn);
            }
        } else {
            lease.release();
        }
        r
    }

    /// Hooks, encoding and the exchange, all under the total timeout.
    /// `conn_failed` stays set while the connection is in use and is cleared
    /// once the exchange succeeded.
    async fn attempt<E>(
        &self,
        exchange: &E,
        action: &Action,
        conn: &mut C,
        result: &mut ActionResult,
        conn_failed: &mut bool,
    ) -> Result<(), ActionError>
    where
        E: Exchange<Conn = C>,
    {
        let hooked = match &action.hooks.before {
            Some(hook) => {
                let mut copy = action.clone();
                hook.before(&mut copy, result)
                    .await
                    .map_err(|e| ActionError::User(format!("before hook: {e}")))?;
                copy.invalidate_encoding();
                Some(copy)
            }
            None => None,
        };
        let action_ref = hooked.as_ref().unwrap_or(action);
        let encoded = action_ref.setup(&self.timeouts)?;

        result.mark(Stage::Start);
        *conn_failed = true;
        exchange.exchange(conn, action_ref, &encoded, result).await?;
        *conn_failed = false;

        if let Some(hook) = &action.hooks.after {
            hook.after(action_ref, result)
                .await
                .map_err(|e| ActionError::User(format!("after hook: {e}")))?;
        }
        for check in &action.hooks.checks {
            check(result).map_err(ActionError::User)?;
        }
        Ok(())
    }

    /// Deliver the result to the notify channels, close the timings and
    /// only then wake the listeners, so a listener always completes after
    /// its notifier.
    async fn notify(&self, action: &Action, result: &mut ActionResult) {
        if !action.hooks.notify {
            result.timings.finish();
            return;
        }
        let listeners = &action.hooks.listeners;
        join_all(
            action
                .hooks
                .channels
                .iter()
                .map(|c| c.notify(result, listeners)),
        )
        .await;
        result.timings.finish();
        for id in listeners {
            if !self.ctx.hooks.notify(*id) {
                trace!("no listener of action {id} is waiting");
            }
        }
    }

    pub(crate) async fn shrink<E>(&self, exchange: &E, k: usize)
    where
        E: Exchange<Conn = C>,
    {
        for conn in self.pool.shrink(k).await {
            exchange.retire(conn).await;
        }
    }

    pub(crate) async fn reset_connections<E>(&self, exchange: &E)
    where
        E: Exchange<Conn = C>,
    {
        for conn in self.pool.reset_idle() {
            exchange.retire(conn).await;
        }
    }
}
