/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use log::debug;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::Dispatcher;
use crate::ActionResult;
use crate::action::Action;
use crate::config::PersonaConfig;

/// Target batch size of each window.
///
/// A given distribution is used as is, capped at the batch size and
/// repeating its last value when it is shorter than the window count.
/// Without one, window `i` ramps to `ceil(gradient * batch * (i + 1))`.
pub(crate) fn window_targets(config: &PersonaConfig) -> Vec<usize> {
    let batch = config.batch_size.max(1);
    let count = config.batch_count.max(1);
    match &config.distribution {
        Some(dist) if !dist.is_empty() => (0..count)
            .map(|i| dist[i.min(dist.len() - 1)].min(batch))
            .collect(),
        _ => (0..count)
            .map(|i| {
                let v = (config.batch_gradient * batch as f64 * (i + 1) as f64).ceil();
                if v.is_finite() && v > 0.0 {
                    (v as usize).clamp(1, batch)
                } else {
                    1
                }
            })
            .collect(),
    }
}

/// Split the total time into windows and fire at each window's target
/// batch size.
pub(super) async fn run(
    d: &Dispatcher,
    actions: &[Arc<Action>],
    _batch: usize,
) -> Vec<ActionResult> {
    let mut results = Vec::new();
    let mut tasks = JoinSet::new();
    let targets = window_targets(d.config());
    let window = d.config().total_time / targets.len() as u32;
    let mut next = actions.iter().cycle();
    let started = Instant::now();

    'outer: for (i, target) in targets.iter().enumerate() {
        let window_end = (started + window * (i as u32 + 1)).min(d.deadline());
        debug!("window {i}: batch size {target}");
        while Instant::now() < window_end {
            d.start_batch().await;
            for action in next.by_ref().take(*target) {
                d.fire(&mut tasks, action);
            }
            d.reap(&mut tasks, &mut results);
            let wait = d
                .config()
                .next_interval()
                .min(window_end.saturating_duration_since(Instant::now()));
            if !d.pause(wait).await {
                break 'outer;
            }
        }
    }

    d.drain(tasks, &mut results).await;
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp() {
        let config = PersonaConfig {
            batch_size: 100,
            batch_count: 12,
            batch_gradient: 0.1,
            ..Default::default()
        };
        let t = window_targets(&config);
        assert_eq!(t.len(), 12);
        assert_eq!(t[0], 10);
        assert_eq!(t[4], 50);
        assert_eq!(t[9], 100);
        assert_eq!(t[11], 100);
    }

    #[test]
    fn distribution() {
        let config = PersonaConfig {
            batch_size: 20,
            batch_count: 5,
            distribution: Some(vec![5, 50, 10]),
            ..Default::default()
        };
        assert_eq!(window_targets(&config), vec![5, 20, 10, 10, 10]);
    }
}
