/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use indexmap::IndexMap;

use super::ResultHistogram;
use crate::ActionResult;

/// Aggregate view of the results of one run.
pub struct RunSummary {
    pub total_time: Duration,
    pub completed: u64,
    pub failed: u64,
    /// Status code counts, in first seen order.
    pub status: IndexMap<u16, u64>,
    /// Failure counts by error message.
    pub errors: IndexMap<String, u64>,
    pub histogram: ResultHistogram,
}

impl RunSummary {
    pub fn new(total_time: Duration) -> Self {
        RunSummary {
            total_time,
            completed: 0,
            failed: 0,
            status: IndexMap::new(),
            errors: IndexMap::new(),
            histogram: ResultHistogram::new(),
        }
    }

    pub fn from_results<'a, I>(total_time: Duration, results: I) -> Self
    where
        I: IntoIterator<Item = &'a ActionResult>,
    {
        let mut summary = RunSummary::new(total_time);
        for r in results {
            summary.add(r);
        }
        summary
    }

    pub fn add(&mut self, result: &ActionResult) {
        if let Some(code) = result.status {
            *self.status.entry(code).or_default() += 1;
        }
        match &result.error {
            Some(e) => {
                self.failed += 1;
                *self.errors.entry(e.to_string()).or_default() += 1;
            }
            None => self.completed += 1,
        }
        self.histogram.record(result);
    }

    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }

    /// Completed actions per second.
    pub fn rps(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.completed as f64 / secs
    }

    pub fn print(&self) {
        println!("Time taken for tests: {:?}", self.total_time);
        println!("Complete requests:    {:<10}", self.completed);
        if self.failed > 0 {
            println!("Failed requests:      {}", self.failed);
        }
        println!("Requests per second:  {:.3} [#/sec] (mean)", self.rps());

        if !self.status.is_empty() {
            println!("# Status Codes");
            for (code, count) in &self.status {
                println!("{code:<10} {count}");
            }
        }
        if !self.errors.is_empty() {
            println!("# Errors");
            for (msg, count) in &self.errors {
                println!("{count:<10} {msg}");
            }
        }
        self.histogram.summary();
    }
}
