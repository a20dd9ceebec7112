/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use log::{debug, info, warn};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::client::{Client, ClientSet};
use crate::config::{PersonaConfig, PersonaType};
use crate::stats::RunSummary;
use crate::{ActionError, ActionResult};

mod approximate;
mod default;
mod multi_sequence;
mod sequence;
mod weighted;

/// Results of one persona run.
pub struct RunOutcome {
    pub elapsed: Duration,
    pub results: Vec<ActionResult>,
}

impl RunOutcome {
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(self.elapsed, &self.results)
    }
}

/// What every dispatch policy needs while it fires actions.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    clients: Arc<ClientSet>,
    used: Vec<Arc<dyn Client>>,
    cancel: CancellationToken,
    deadline: Instant,
    config: PersonaConfig,
}

impl Dispatcher {
    /// Same deadline, but stopping it leaves the siblings running.
    pub(crate) fn child(&self) -> Dispatcher {
        Dispatcher {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    #[inline]
    pub(crate) fn config(&self) -> &PersonaConfig {
        &self.config
    }

    pub(crate) fn is_over(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Start one execution of `action`.
    pub(crate) fn fire(&self, tasks: &mut JoinSet<ActionResult>, action: &Arc<Action>) {
        let client = match self.clients.for_action(action) {
            Ok(c) => c.clone(),
            Err(e) => {
                warn!("skipped action {}: {e}", action.name);
                return;
            }
        };
        let action = action.clone();
        let cancel = self.cancel.clone();
        tasks.spawn(async move { client.execute(&action, &cancel).await });
    }

    /// Close idle connections before a batch when asked to.
    pub(crate) async fn start_batch(&self) {
        if self.config.reset_connections {
            for client in &self.used {
                client.reset_connections().await;
            }
        }
    }

    /// Wait `wait`, but not past the deadline. Returns whether firing
    /// may go on.
    pub(crate) async fn pause(&self, wait: Duration) -> bool {
        if wait.is_zero() {
            tokio::task::yield_now().await;
            return !self.is_over();
        }
        let until = (Instant::now() + wait).min(self.deadline);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(until) => !self.is_over(),
        }
    }

    /// Wait for every task in `tasks`, or until the deadline.
    pub(crate) async fn join_until_deadline(
        &self,
        tasks: &mut JoinSet<ActionResult>,
        results: &mut Vec<ActionResult>,
    ) {
        loop {
            tokio::select! {
                biased;
                r = tasks.join_next() => match r {
                    Some(r) => collect(r, results),
                    None => return,
                },
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(self.deadline) => return,
            }
        }
    }

    /// Move the finished tasks to `results` without waiting.
    pub(crate) fn reap(&self, tasks: &mut JoinSet<ActionResult>, results: &mut Vec<ActionResult>) {
        while let Some(r) = tasks.try_join_next() {
            collect(r, results);
        }
    }

    /// Give the unfinished tasks the graceful stop time, then cancel them
    /// and collect what they return.
    pub(crate) async fn drain(&self, mut tasks: JoinSet<ActionResult>, results: &mut Vec<ActionResult>) {
        let grace = tokio::time::sleep(self.config.graceful_stop);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                biased;
                r = tasks.join_next() => match r {
                    Some(r) => collect(r, results),
                    None => return,
                },
                _ = &mut grace => break,
            }
        }
        debug!("cancelling {} unfinished actions", tasks.len());
        self.cancel.cancel();
        while let Some(r) = tasks.join_next().await {
            collect(r, results);
        }
    }
}

fn collect(r: Result<ActionResult, JoinError>, results: &mut Vec<ActionResult>) {
    match r {
        Ok(result) => results.push(result),
        Err(e) => warn!("action task failed: {e}"),
    }
}

/// Drives a set of actions against their clients under one load shape
/// until the total time is used up.
pub struct Persona {
    config: PersonaConfig,
    clients: Arc<ClientSet>,
    actions: Vec<Arc<Action>>,
    stop: CancellationToken,
}

impl Persona {
    pub fn new(config: PersonaConfig, clients: Arc<ClientSet>, actions: Vec<Action>) -> Self {
        Persona {
            config,
            clients,
            actions: actions.into_iter().map(Arc::new).collect(),
            stop: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PersonaConfig {
        &self.config
    }

    pub fn actions(&self) -> &[Arc<Action>] {
        &self.actions
    }

    /// Cancelling this token ends the running batch at once.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    fn used_clients(&self) -> Result<Vec<Arc<dyn Client>>, ActionError> {
        let mut seen = AHashSet::new();
        let mut used = Vec::new();
        for action in &self.actions {
            let client = self.clients.for_action(action)?;
            if seen.insert(client.name().to_string()) {
                used.push(client.clone());
            }
        }
        Ok(used)
    }

    /// Resolve and encode every action and size the pools for one batch.
    ///
    /// Resolution and TLS failures are returned here rather than showing
    /// up on every result later.
    pub async fn prepare(&self) -> Result<(), ActionError> {
        for client in self.used_clients()? {
            client.ensure_capacity(self.config.batch_size.max(1)).await;
        }
        for action in &self.actions {
            let client = self.clients.for_action(action)?;
            client.prepare(action).await?;
        }
        Ok(())
    }

    pub async fn run(&self) -> anyhow::Result<RunOutcome> {
        self.prepare().await?;
        if self.actions.is_empty() {
            return Ok(RunOutcome {
                elapsed: Duration::ZERO,
                results: Vec::new(),
            });
        }

        let started = Instant::now();
        let dispatcher = Dispatcher {
            clients: self.clients.clone(),
            used: self.used_clients()?,
            cancel: self.stop.child_token(),
            deadline: started + self.config.total_time,
            config: self.config.clone(),
        };
        let batch = self.config.batch_size.max(1);
        info!(
            "{} persona started: {} actions, batch size {batch}, total time {:?}",
            self.config.persona_type.as_str(),
            self.actions.len(),
            self.config.total_time
        );

        let results = match self.config.persona_type {
            PersonaType::Default => default::run(&dispatcher, &self.actions, batch).await,
            PersonaType::Sequence => sequence::run(&dispatcher, &self.actions, batch).await,
            PersonaType::Weighted => weighted::run(&dispatcher, &self.actions, batch).await,
            PersonaType::MultiSequence => {
                multi_sequence::run(&dispatcher, &self.actions, batch, multi_sequence::Grouping::Group)
                    .await
            }
            PersonaType::MultiUser => {
                multi_sequence::run(&dispatcher, &self.actions, batch, multi_sequence::Grouping::User)
                    .await
            }
            PersonaType::MultiUserSequence => {
                multi_sequence::run(
                    &dispatcher,
                    &self.actions,
                    batch,
                    multi_sequence::Grouping::UserSequence,
                )
                .await
            }
            PersonaType::ApproximateDistribution => {
                approximate::run(&dispatcher, &self.actions, batch).await
            }
        };

        let elapsed = started.elapsed();
        info!("persona finished with {} results in {elapsed:?}", results.len());
        Ok(RunOutcome { elapsed, results })
    }
}
