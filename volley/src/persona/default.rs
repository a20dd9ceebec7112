/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use tokio::task::JoinSet;

use super::Dispatcher;
use crate::ActionResult;
use crate::action::Action;

/// Constant arrival: `batch` actions, taken round robin, every interval.
/// Slow actions do not hold back the next batch.
pub(super) async fn run(
    d: &Dispatcher,
    actions: &[Arc<Action>],
    batch: usize,
) -> Vec<ActionResult> {
    let mut results = Vec::new();
    let mut tasks = JoinSet::new();
    let mut next = actions.iter().cycle();

    while !d.is_over() {
        d.start_batch().await;
        for action in next.by_ref().take(batch) {
            d.fire(&mut tasks, action);
        }
        d.reap(&mut tasks, &mut results);
        if !d.pause(d.config().next_interval()).await {
            break;
        }
    }

    d.drain(tasks, &mut results).await;
    results
}
