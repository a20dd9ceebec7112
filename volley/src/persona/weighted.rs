/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use tokio::task::JoinSet;

use super::Dispatcher;
use crate::ActionResult;
use crate::action::Action;

/// Draws indices with probability proportional to the weights. Negative
/// and NaN weights count as zero; all zero means uniform.
pub(crate) struct WeightedPicker {
    cumulative: Vec<f64>,
    total: f64,
}

impl WeightedPicker {
    pub(crate) fn new<I>(weights: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut total = 0.0;
        let cumulative = weights
            .into_iter()
            .map(|w| {
                if w.is_finite() && w > 0.0 {
                    total += w;
                }
                total
            })
            .collect();
        WeightedPicker { cumulative, total }
    }

    pub(crate) fn pick_with(&self, r: f64) -> usize {
        let n = self.cumulative.len();
        if self.total <= 0.0 {
            return ((r * n as f64) as usize).min(n.saturating_sub(1));
        }
        let point = r * self.total;
        self.cumulative
            .partition_point(|c| *c <= point)
            .min(n.saturating_sub(1))
    }

    pub(crate) fn pick(&self) -> usize {
        self.pick_with(fastrand::f64())
    }
}

pub(super) async fn run(
    d: &Dispatcher,
    actions: &[Arc<Action>],
    batch: usize,
) -> Vec<ActionResult> {
    let mut results = Vec::new();
    let mut tasks = JoinSet::new();
    let picker = WeightedPicker::new(actions.iter().map(|a| a.weight));

    while !d.is_over() {
        d.start_batch().await;
        for _ in 0..batch {
            d.fire(&mut tasks, &actions[picker.pick()]);
        }
        d.reap(&mut tasks, &mut results);
        if !d.pause(d.config().next_interval()).await {
            break;
        }
    }

    d.drain(tasks, &mut results).await;
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional() {
        let p = WeightedPicker::new([1.0, 0.0, 3.0]);
        assert_eq!(p.pick_with(0.0), 0);
        assert_eq!(p.pick_with(0.2), 0);
        assert_eq!(p.pick_with(0.25), 2);
        assert_eq!(p.pick_with(0.99), 2);

        let mut counts = [0usize; 3];
        for _ in 0..4000 {
            counts[p.pick()] += 1;
        }
        assert_eq!(counts[1], 0);
        assert!(counts[2] > counts[0] * 2);
    }

    #[test]
    fn all_zero_is_uniform() {
        let p = WeightedPicker::new([0.0, -1.0, f64::NAN]);
        assert_eq!(p.pick_with(0.0), 0);
        assert_eq!(p.pick_with(0.5), 1);
        assert_eq!(p.pick_with(0.9), 2);
    }
}
