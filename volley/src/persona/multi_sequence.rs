/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexMap;
use log::debug;

use super::{Dispatcher, default, sequence};
use crate::ActionResult;
use crate::action::Action;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Grouping {
    /// By explicit group, then by user. Each group is a sequence.
    Group,
    /// By user. Each group fires round robin.
    User,
    /// By user. Each group is a sequence.
    UserSequence,
}

impl Grouping {
    fn key<'a>(&self, action: &'a Action) -> Option<&'a str> {
        match self {
            Grouping::Group => action.group.as_deref().or(action.user.as_deref()),
            Grouping::User | Grouping::UserSequence => action.user.as_deref(),
        }
    }

    fn is_sequence(&self) -> bool {
        !matches!(self, Grouping::User)
    }
}

/// Split `actions` by key, in first seen order. Actions without a key
/// share one group.
pub(crate) fn partition(actions: &[Arc<Action>], grouping: Grouping) -> Vec<Vec<Arc<Action>>> {
    let mut groups: IndexMap<Option<&str>, Vec<Arc<Action>>> = IndexMap::new();
    for action in actions {
        groups
            .entry(grouping.key(action))
            .or_default()
            .push(action.clone());
    }
    groups.into_values().collect()
}

/// `floor(batch / groups)` each, the remainder going to the last group.
pub(crate) fn group_batch_sizes(batch: usize, groups: usize) -> Vec<usize> {
    if groups == 0 {
        return Vec::new();
    }
    let each = batch / groups;
    let mut sizes = vec![each; groups];
    if let Some(last) = sizes.last_mut() {
        *last += batch % groups;
    }
    sizes
}

/// Run every group concurrently with its share of the batch.
pub(super) async fn run(
    d: &Dispatcher,
    actions: &[Arc<Action>],
    batch: usize,
    grouping: Grouping,
) -> Vec<ActionResult> {
    let groups = partition(actions, grouping);
    let sizes = group_batch_sizes(batch, groups.len());
    debug!("{} action groups with batch sizes {sizes:?}", groups.len());

    let runs = groups
        .iter()
        .zip(sizes)
        .filter(|(_, size)| *size > 0)
        .map(|(group, size)| {
            let d = d.child();
            async move {
                if grouping.is_sequence() {
                    sequence::run(&d, group, size).await
                } else {
                    default::run(&d, group, size).await
                }
            }
        });
    join_all(runs).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HttpRequest;

    fn action(name: &str, user: Option<&str>, group: Option<&str>) -> Arc<Action> {
        let mut a = Action::http(name, "http://127.0.0.1:1/", HttpRequest::get());
        a.user = user.map(|s| s.to_string());
        a.group = group.map(|s| s.to_string());
        Arc::new(a)
    }

    #[test]
    fn sizes() {
        assert_eq!(group_batch_sizes(10, 3), vec![3, 3, 4]);
        assert_eq!(group_batch_sizes(9, 3), vec![3, 3, 3]);
        assert_eq!(group_batch_sizes(2, 3), vec![0, 0, 2]);
        assert!(group_batch_sizes(5, 0).is_empty());
        assert_eq!(group_batch_sizes(10, 3).iter().sum::<usize>(), 10);
    }

    #[test]
    fn by_user() {
        let actions = vec![
            action("a1", Some("alice"), None),
            action("b1", Some("bob"), Some("g1")),
            action("a2", Some("alice"), Some("g1")),
            action("n1", None, None),
        ];
        let groups = partition(&actions, Grouping::User);
        let names: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|a| a.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a1", "a2"], vec!["b1"], vec!["n1"]]);

        let groups = partition(&actions, Grouping::Group);
        let names: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|a| a.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a1"], vec!["b1", "a2"], vec!["n1"]]);
    }
}
