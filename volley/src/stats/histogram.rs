/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use hdrhistogram::Histogram;

use super::{summary_duration_line, summary_histogram_title, summary_total_percentage};
use crate::ActionResult;

const SIGNIFICANT_FIGURES: u8 = 3;

fn new_histogram() -> Histogram<u64> {
    // 3 significant figures is always in range
    match Histogram::new(SIGNIFICANT_FIGURES) {
        Ok(h) => h,
        Err(_) => unreachable!(),
    }
}

fn as_nanos_u64(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Phase latencies of a set of results.
pub struct ResultHistogram {
    connect_time: Histogram<u64>,
    write_time: Histogram<u64>,
    read_time: Histogram<u64>,
    total_time: Histogram<u64>,
}

impl Default for ResultHistogram {
    fn default() -> Self {
        ResultHistogram::new()
    }
}

impl ResultHistogram {
    pub fn new() -> Self {
        ResultHistogram {
            connect_time: new_histogram(),
            write_time: new_histogram(),
            read_time: new_histogram(),
            total_time: new_histogram(),
        }
    }

    /// Only successful results carry meaningful phase times.
    pub fn record(&mut self, result: &ActionResult) {
        if !result.is_ok() {
            return;
        }
        let t = &result.timings;
        if let Some(d) = t.connect_time() {
            let _ = self.connect_time.record(as_nanos_u64(d));
        }
        if let Some(d) = t.write_time() {
            let _ = self.write_time.record(as_nanos_u64(d));
        }
        if let Some(d) = t.read_time() {
            let _ = self.read_time.record(as_nanos_u64(d));
        }
        if let Some(d) = t.total_time() {
            let _ = self.total_time.record(as_nanos_u64(d));
        }
    }

    pub fn len(&self) -> u64 {
        self.total_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_time.is_empty()
    }

    pub fn total_time(&self) -> &Histogram<u64> {
        &self.total_time
    }

    pub fn summary(&self) {
        summary_histogram_title("# Duration Times");
        summary_duration_line("Connect:", &self.connect_time);
        summary_duration_line("Write:", &self.write_time);
        summary_duration_line("Read:", &self.read_time);
        summary_duration_line("Total:", &self.total_time);
        println!();
        summary_total_percentage(&self.total_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, HttpRequest};
    use crate::result::Stage;

    #[test]
    fn records_successes_only() {
        let action = Action::http("a", "http://127.0.0.1/", HttpRequest::get());
        let mut h = ResultHistogram::new();

        let mut ok = ActionResult::new(&action);
        ok.timings.mark(Stage::WaitStart);
        ok.timings.mark(Stage::Start);
        std::thread::sleep(Duration::from_millis(1));
        ok.timings.mark(Stage::ConnectEnd);
        ok.timings.mark(Stage::WriteEnd);
        ok.timings.mark(Stage::ReadEnd);
        ok.timings.finish();
        h.record(&ok);

        let mut failed = ActionResult::new(&action);
        failed.fail(crate::ActionError::Timeout);
        h.record(&failed);

        assert_eq!(h.len(), 1);
        assert!(h.total_time().min() >= 1_000_000);
    }
}
