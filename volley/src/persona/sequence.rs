/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use log::trace;
use tokio::task::JoinSet;

use super::Dispatcher;
use crate::ActionResult;
use crate::action::Action;

/// Step through the actions in order. Each step fires `batch` copies of
/// one action and waits for all of them before the interval and the next
/// step.
pub(super) async fn run(
    d: &Dispatcher,
    actions: &[Arc<Action>],
    batch: usize,
) -> Vec<ActionResult> {
    let mut results = Vec::new();
    let mut tasks = JoinSet::new();
    if batch == 0 {
        return results;
    }

    'outer: while !d.is_over() {
        for (step, action) in actions.iter().enumerate() {
            d.start_batch().await;
            trace!("sequence step {step}: {}", action.name);
            for _ in 0..batch {
                d.fire(&mut tasks, action);
            }
            d.join_until_deadline(&mut tasks, &mut results).await;
            if !tasks.is_empty() || !d.pause(d.config().next_interval()).await {
                break 'outer;
            }
        }
    }

    d.drain(tasks, &mut results).await;
    results
}
