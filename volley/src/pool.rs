/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::ActionError;

/// A fixed set of connections guarded by a semaphore of the same size.
///
/// A permit is taken before a connection is popped and given back only
/// after the connection is pushed again, so the available permits never
/// exceed the idle connections and the permits held always equal the
/// connections in use.
pub struct Pool<C> {
    idle: Mutex<Vec<C>>,
    semaphore: Semaphore,
    size: AtomicUsize,
    factory: Box<dyn Fn() -> C + Send + Sync>,
    resize: tokio::sync::Mutex<()>,
}

impl<C> Pool<C> {
    pub fn new<F>(size: usize, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let idle = (0..size).map(|_| factory()).collect();
        Pool {
            idle: Mutex::new(idle),
            semaphore: Semaphore::new(size),
            size: AtomicUsize::new(size),
            factory: Box::new(factory),
            resize: tokio::sync::Mutex::new(()),
        }
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<C>> {
        match self.idle.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.size().saturating_sub(self.available())
    }

    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    /// Wait for a free connection. Waiters are served in arrival order.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Lease<'_, C>, ActionError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ActionError::Cancelled),
            r = self.semaphore.acquire() => r.map_err(|_| ActionError::Cancelled)?,
        };
        let conn = self.idle().pop().unwrap_or_else(|| (self.factory)());
        Ok(Lease {
            pool: self,
            conn: Some(conn),
            permit: Some(permit),
        })
    }

    /// Add `n` fresh connections.
    pub async fn grow(&self, n: usize) {
        if n == 0 {
            return;
        }
        let _guard = self.resize.lock().await;
        self.grow_locked(n);
    }

    fn grow_locked(&self, n: usize) {
        {
            let mut idle = self.idle();
            idle.extend((0..n).map(|_| (self.factory)()));
        }
        self.size.fetch_add(n, Ordering::AcqRel);
        self.semaphore.add_permits(n);
        debug!("pool grown by {n} to {}", self.size());
    }

    /// Grow so at least `n` connections exist.
    pub async fn ensure_capacity(&self, n: usize) {
        let _guard = self.resize.lock().await;
        let size = self.size();
        if n > size {
            self.grow_locked(n - size);
        }
    }

    /// Retire `k` connections, waiting for them to become idle.
    ///
    /// The retired connections are handed back so the caller can close them.
    pub async fn shrink(&self, k: usize) -> Vec<C> {
        let _guard = self.resize.lock().await;
        let k = k.min(self.size());
        if k == 0 {
            return Vec::new();
        }
        let Ok(permits) = self.semaphore.acquire_many(k as u32).await else {
            return Vec::new();
        };
        let retired = {
            let mut idle = self.idle();
            let at = idle.len().saturating_sub(k);
            idle.split_off(at)
        };
        self.size.fetch_sub(k, Ordering::AcqRel);
        permits.forget();
        debug!("pool shrunk by {k} to {}", self.size());
        retired
    }

    /// Swap every idle connection for a fresh one and return the old ones.
    pub fn reset_idle(&self) -> Vec<C> {
        let mut idle = self.idle();
        let fresh = (0..idle.len()).map(|_| (self.factory)()).collect();
        std::mem::replace(&mut *idle, fresh)
    }

    /// Apply `f` to every idle connection.
    pub fn for_each_idle<F: FnMut(&mut C)>(&self, f: F) {
        self.idle().iter_mut().for_each(f);
    }
}

/// Exclusive use of one pooled connection.
///
/// Dropping a lease that was neither released nor discarded counts as a
/// discard, so an aborted execution still leaves the pool at full size.
pub struct Lease<'a, C> {
    pool: &'a Pool<C>,
    conn: Option<C>,
    permit: Option<SemaphorePermit<'a>>,
}

impl<C> Lease<'_, C> {
    pub fn conn_mut(&mut self) -> &mut C {
        // only None after release or discard, which consume the lease
        match self.conn.as_mut() {
            Some(c) => c,
            None => unreachable!("lease used after return"),
        }
    }

    pub fn conn(&self) -> &C {
        match self.conn.as_ref() {
            Some(c) => c,
            None => unreachable!("lease used after return"),
        }
    }

    /// Return the connection for reuse.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle().push(conn);
        }
        self.permit.take();
    }

    /// Replace the connection with a fresh one and hand the old one back.
    pub fn discard(mut self) -> Option<C> {
        let old = self.conn.take();
        self.pool.idle().push((self.pool.factory)());
        self.permit.take();
        old
    }
}

impl<C> Drop for Lease<'_, C> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            debug!("connection dropped without release, replacing it");
            self.pool.idle().push((self.pool.factory)());
        }
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn counting_pool(size: usize) -> (Pool<u32>, Arc<AtomicU32>) {
        let created = Arc::new(AtomicU32::new(0));
        let c = created.clone();
        let pool = Pool::new(size, move || c.fetch_add(1, Ordering::Relaxed));
        (pool, created)
    }

    #[tokio::test]
    async fn permits_track_in_flight() {
        let (pool, _) = counting_pool(3);
        let cancel = CancellationToken::new();
        let a = pool.acquire(&cancel).await.unwrap();
        let b = pool.acquire(&cancel).await.unwrap();
        assert_eq!(pool.available() + pool.in_flight(), pool.size());
        assert_eq!(pool.in_flight(), 2);
        a.release();
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.idle_count(), 2);
        let old = b.discard();
        assert!(old.is_some());
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn discard_replaces() {
        let (pool, created) = counting_pool(2);
        let cancel = CancellationToken::new();
        let lease = pool.acquire(&cancel).await.unwrap();
        drop(lease);
        assert_eq!(created.load(Ordering::Relaxed), 3);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn acquire_cancelled() {
        let (pool, _) = counting_pool(1);
        let cancel = CancellationToken::new();
        let held = pool.acquire(&cancel).await.unwrap();
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c2.cancel();
        });
        let r = pool.acquire(&cancel).await;
        assert!(matches!(r, Err(ActionError::Cancelled)));
        held.release();
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn grow_and_shrink() {
        let (pool, _) = counting_pool(2);
        pool.ensure_capacity(5).await;
        assert_eq!(pool.size(), 5);
        assert_eq!(pool.available(), 5);
        pool.ensure_capacity(3).await;
        assert_eq!(pool.size(), 5);

        let cancel = CancellationToken::new();
        let lease = pool.acquire(&cancel).await.unwrap();
        let retired = pool.shrink(4).await;
        assert_eq!(retired.len(), 4);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available(), 0);
        lease.release();
        assert_eq!(pool.available(), pool.size());
        assert_eq!(pool.idle_count(), pool.size());
    }

    #[tokio::test]
    async fn shrink_waits_for_busy() {
        let pool = Arc::new(Pool::new(2, || 0u8));
        let cancel = CancellationToken::new();
        let p = pool.clone();
        let c = cancel.clone();
        let holder = tokio::spawn(async move {
            let lease = p.acquire(&c).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            lease.release();
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let retired = pool.shrink(2).await;
        holder.await.unwrap();
        assert_eq!(retired.len(), 2);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn concurrent_invariant() {
        let pool = Arc::new(Pool::new(4, || ()));
        let cancel = CancellationToken::new();
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            let cancel = cancel.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let lease = pool.acquire(&cancel).await.unwrap();
                let busy = pool.in_flight();
                peak.fetch_max(busy, Ordering::Relaxed);
                assert_eq!(pool.available() + pool.in_flight(), pool.size());
                tokio::task::yield_now().await;
                if fastrand::bool() {
                    lease.release();
                } else {
                    lease.discard();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(peak.load(Ordering::Relaxed) <= 4);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.idle_count(), 4);
    }
}
