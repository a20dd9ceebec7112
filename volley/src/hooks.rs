/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use async_trait::async_trait;
use smallvec::SmallVec;
use tokio::sync::oneshot;

use crate::action::{Action, ActionId};
use crate::ActionResult;

/// Runs before the request is written. It may change the action, which
/// is then encoded again.
#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn before(&self, action: &mut Action, result: &ActionResult) -> anyhow::Result<()>;
}

/// Runs after the response is read and may rewrite the result.
#[async_trait]
pub trait AfterHook: Send + Sync {
    async fn after(&self, action: &Action, result: &mut ActionResult) -> anyhow::Result<()>;
}

/// Receives every result of a notifying action.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    async fn notify(&self, result: &ActionResult, listeners: &[ActionId]);
}

/// A synchronous assertion on a successful result.
pub type Check = Arc<dyn Fn(&ActionResult) -> Result<(), String> + Send + Sync>;

struct FnHook<F>(F);

#[async_trait]
impl<F> BeforeHook for FnHook<F>
where
    F: Fn(&mut Action, &ActionResult) -> anyhow::Result<()> + Send + Sync,
{
    async fn before(&self, action: &mut Action, result: &ActionResult) -> anyhow::Result<()> {
        (self.0)(action, result)
    }
}

struct FnAfterHook<F>(F);

#[async_trait]
impl<F> AfterHook for FnAfterHook<F>
where
    F: Fn(&Action, &mut ActionResult) -> anyhow::Result<()> + Send + Sync,
{
    async fn after(&self, action: &Action, result: &mut ActionResult) -> anyhow::Result<()> {
        (self.0)(action, result)
    }
}

pub fn before_fn<F>(f: F) -> Arc<dyn BeforeHook>
where
    F: Fn(&mut Action, &ActionResult) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

pub fn after_fn<F>(f: F) -> Arc<dyn AfterHook>
where
    F: Fn(&Action, &mut ActionResult) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnAfterHook(f))
}

pub fn check_fn<F>(f: F) -> Check
where
    F: Fn(&ActionResult) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone, Default)]
pub struct HookChain {
    pub before: Option<Arc<dyn BeforeHook>>,
    pub after: Option<Arc<dyn AfterHook>>,
    pub checks: Vec<Check>,
    /// Wait for a notification from another action before running.
    pub listen: bool,
    /// Signal `listeners` once this action completes.
    pub notify: bool,
    pub channels: Vec<Arc<dyn NotifyChannel>>,
    pub listeners: SmallVec<[ActionId; 4]>,
}

impl HookChain {
    pub fn is_empty(&self) -> bool {
        self.before.is_none()
            && self.after.is_none()
            && self.checks.is_empty()
            && !self.listen
            && !self.notify
    }

    pub fn with_before(mut self, hook: Arc<dyn BeforeHook>) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn with_after(mut self, hook: Arc<dyn AfterHook>) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn listening(mut self) -> Self {
        self.listen = true;
        self
    }

    /// Notify `listener` on completion.
    pub fn notifying(mut self, listener: ActionId) -> Self {
        self.notify = true;
        self.listeners.push(listener);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotifyChannel>) -> Self {
        self.notify = true;
        self.channels.push(channel);
        self
    }
}

/// Pending listen events, keyed by the listening action.
///
/// Each `notify` pops and fires one event of the target, so notifiers and
/// listeners pair one to one. A notification nobody waits for is dropped.
#[derive(Default)]
pub struct HookRegistry {
    events: Mutex<AHashMap<ActionId, VecDeque<oneshot::Sender<()>>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        HookRegistry::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<ActionId, VecDeque<oneshot::Sender<()>>>> {
        match self.events.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    pub fn listen(&self, id: ActionId) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        self.lock().entry(id).or_default().push_back(sender);
        receiver
    }

    /// Fire the oldest pending event of `id`. Returns whether a waiter got it.
    pub fn notify(&self, id: ActionId) -> bool {
        let mut events = self.lock();
        let Some(queue) = events.get_mut(&id) else {
            return false;
        };
        let mut delivered = false;
        while let Some(sender) = queue.pop_front() {
            // a dropped receiver belongs to a cancelled listener
            if sender.send(()).is_ok() {
                delivered = true;
                break;
            }
        }
        if queue.is_empty() {
            events.remove(&id);
        }
        delivered
    }

    pub fn pending(&self, id: ActionId) -> usize {
        self.lock()
            .get(&id)
            .map(|q| q.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HttpRequest;
    use std::time::Duration;

    #[tokio::test]
    async fn pairing() {
        let registry = HookRegistry::new();
        let mut waiters: Vec<_> = (0..3).map(|_| registry.listen(7)).collect();
        assert_eq!(registry.pending(7), 3);

        assert!(registry.notify(7));
        assert!(waiters.remove(0).await.is_ok());
        assert_eq!(registry.pending(7), 2);

        // cancelled listeners are skipped
        drop(waiters.remove(0));
        assert!(registry.notify(7));
        assert!(waiters.remove(0).await.is_ok());

        assert!(!registry.notify(7));
        assert_eq!(registry.pending(7), 0);
    }

    #[tokio::test]
    async fn unmatched_notify_is_dropped() {
        let registry = HookRegistry::new();
        assert!(!registry.notify(1));
        let mut rx = registry.listen(1);
        let r = tokio::time::timeout(Duration::from_millis(20), &mut rx).await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn fn_hooks() {
        let hook = before_fn(|action, _| {
            action.name.push_str("-x");
            Ok(())
        });
        let after = after_fn(|_, result| {
            result.status = Some(299);
            Ok(())
        });
        let mut action = Action::http("a", "http://127.0.0.1/", HttpRequest::get());
        let mut result = ActionResult::new(&action);
        hook.before(&mut action, &result).await.unwrap();
        after.after(&action, &mut result).await.unwrap();
        assert_eq!(action.name, "a-x");
        assert_eq!(result.status, Some(299));

        let chain = HookChain::default().listening().notifying(3);
        assert!(chain.listen && chain.notify);
        assert_eq!(chain.listeners.as_slice(), &[3]);
        assert!(HookChain::default().is_empty());
    }
}
