/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counters of one client, updated from the hot path.
pub struct ClientRuntimeStats {
    name: String,
    task_total: AtomicU64,
    task_alive: AtomicI64,
    task_passed: AtomicU64,
    task_failed: AtomicU64,
    conn_attempt: AtomicU64,
    conn_success: AtomicU64,
    conn_replaced: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl ClientRuntimeStats {
    pub fn new(name: &str) -> Self {
        ClientRuntimeStats {
            name: name.to_string(),
            task_total: AtomicU64::new(0),
            task_alive: AtomicI64::new(0),
            task_passed: AtomicU64::new(0),
            task_failed: AtomicU64::new(0),
            conn_attempt: AtomicU64::new(0),
            conn_success: AtomicU64::new(0),
            conn_replaced: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_task_total(&self) {
        self.task_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_task_alive(&self) {
        self.task_alive.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_task_alive(&self) {
        self.task_alive.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_task_passed(&self) {
        self.task_passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_task_failed(&self) {
        self.task_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_conn_attempt(&self) {
        self.conn_attempt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_conn_success(&self) {
        self.conn_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_conn_replaced(&self) {
        self.conn_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_read_bytes(&self, size: usize) {
        self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn add_write_bytes(&self, size: usize) {
        self.bytes_written.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn task_total(&self) -> u64 {
        self.task_total.load(Ordering::Relaxed)
    }

    pub fn task_alive(&self) -> i64 {
        self.task_alive.load(Ordering::Relaxed)
    }

    pub fn task_passed(&self) -> u64 {
        self.task_passed.load(Ordering::Relaxed)
    }

    pub fn task_failed(&self) -> u64 {
        self.task_failed.load(Ordering::Relaxed)
    }

    pub fn conn_attempt(&self) -> u64 {
        self.conn_attempt.load(Ordering::Relaxed)
    }

    pub fn conn_success(&self) -> u64 {
        self.conn_success.load(Ordering::Relaxed)
    }

    pub fn conn_replaced(&self) -> u64 {
        self.conn_replaced.load(Ordering::Relaxed)
    }

    pub fn summary(&self, total_time: Duration) {
        let total_secs = total_time.as_secs_f64().max(f64::MIN_POSITIVE);

        println!("# Client {}", self.name);
        println!("Tasks:         {}", self.task_total());
        println!("Passed:        {}", self.task_passed());
        let failed = self.task_failed();
        if failed > 0 {
            println!("Failed:        {failed}");
        }

        println!("# Connections");
        let total_attempt = self.conn_attempt();
        println!("Attempt count: {total_attempt}");
        let total_success = self.conn_success();
        println!("Success count: {total_success}");
        if total_attempt > 0 {
            println!(
                "Success ratio: {:.2}%",
                (total_success as f64 / total_attempt as f64) * 100.0
            );
        }
        println!("Success rate:  {:.3}/s", total_success as f64 / total_secs);
        let replaced = self.conn_replaced();
        if replaced > 0 {
            println!("Replaced:      {replaced}");
        }

        println!("# Traffic");
        let total_send = self.bytes_written.load(Ordering::Relaxed);
        println!("Send bytes:    {total_send}");
        println!("Send rate:     {:.3}B/s", total_send as f64 / total_secs);
        let total_recv = self.bytes_read.load(Ordering::Relaxed);
        println!("Recv bytes:    {total_recv}");
        println!("Recv rate:     {:.3}B/s", total_recv as f64 / total_secs);
    }
}
