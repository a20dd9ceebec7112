/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::HeaderMap;

use volley_http::SetCookie;

use crate::action::{Action, ActionId, Protocol, Tag};
use crate::ActionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    WaitStart = 0,
    Start = 1,
    ConnectEnd = 2,
    WriteEnd = 3,
    ReadEnd = 4,
    Complete = 5,
}

const STAGE_COUNT: usize = 6;

/// Phase timestamps of one execution, on the monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timings {
    marks: [Option<Instant>; STAGE_COUNT],
}

/// The same timestamps as seconds since a run epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimingSecs {
    pub wait_start: f64,
    pub start: f64,
    pub connect_end: f64,
    pub write_end: f64,
    pub read_end: f64,
    pub complete: f64,
}

impl Timings {
    pub fn mark(&mut self, stage: Stage) {
        self.marks[stage as usize] = Some(Instant::now());
    }

    pub fn get(&self, stage: Stage) -> Option<Instant> {
        self.marks[stage as usize]
    }

    pub fn is_complete(&self) -> bool {
        self.marks[Stage::Complete as usize].is_some()
    }

    /// Record `complete` and give every stage that was never reached the
    /// same instant, so the sequence stays non-decreasing.
    pub fn finish(&mut self) {
        let now = Instant::now();
        let complete = *self.marks[Stage::Complete as usize].get_or_insert(now);
        for m in self.marks.iter_mut() {
            if m.is_none() {
                *m = Some(complete);
            }
        }
    }

    fn span(&self, from: Stage, to: Stage) -> Option<Duration> {
        let a = self.get(from)?;
        let b = self.get(to)?;
        Some(b.saturating_duration_since(a))
    }

    pub fn connect_time(&self) -> Option<Duration> {
        self.span(Stage::Start, Stage::ConnectEnd)
    }

    pub fn write_time(&self) -> Option<Duration> {
        self.span(Stage::ConnectEnd, Stage::WriteEnd)
    }

    pub fn read_time(&self) -> Option<Duration> {
        self.span(Stage::WriteEnd, Stage::ReadEnd)
    }

    /// `complete - start`
    pub fn total_time(&self) -> Option<Duration> {
        self.span(Stage::Start, Stage::Complete)
    }

    pub fn waited(&self) -> Option<Duration> {
        self.span(Stage::WaitStart, Stage::Start)
    }

    pub fn as_secs(&self, epoch: Instant) -> TimingSecs {
        let s = |stage| {
            self.get(stage)
                .map(|t: Instant| t.saturating_duration_since(epoch).as_secs_f64())
                .unwrap_or_default()
        };
        TimingSecs {
            wait_start: s(Stage::WaitStart),
            start: s(Stage::Start),
            connect_end: s(Stage::ConnectEnd),
            write_end: s(Stage::WriteEnd),
            read_end: s(Stage::ReadEnd),
            complete: s(Stage::Complete),
        }
    }

    /// Whether every recorded stage is at or after the one before it.
    pub fn is_ordered(&self) -> bool {
        self.marks
            .iter()
            .flatten()
            .zip(self.marks.iter().flatten().skip(1))
            .all(|(a, b)| a <= b)
    }
}

/// Outcome of executing one action.
#[derive(Clone, Debug)]
pub struct ActionResult {
    pub action_id: ActionId,
    pub name: String,
    pub url: String,
    pub user: Option<String>,
    pub tags: Vec<Tag>,
    pub protocol: Protocol,
    pub method: String,
    pub error: Option<ActionError>,
    pub timings: Timings,
    pub status: Option<u16>,
    pub headers: HeaderMap,
    /// gRPC and HTTP/2 trailers.
    pub trailers: HeaderMap,
    pub body: Bytes,
    pub cookies: Vec<SetCookie>,
}

impl ActionResult {
    pub fn new(action: &Action) -> Self {
        ActionResult {
            action_id: action.id,
            name: action.name.clone(),
            url: action.url.clone(),
            user: action.user.clone(),
            tags: action.tags.clone(),
            protocol: action.protocol,
            method: action.request.method_str().to_string(),
            error: None,
            timings: Timings::default(),
            status: None,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            body: Bytes::new(),
            cookies: Vec::new(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Error message as stored on the record.
    pub fn error_string(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// Attach `e`, replace the status with its synthetic one where it has
    /// one, and close the timings.
    pub fn fail(&mut self, e: ActionError) {
        if let Some(status) = e.status() {
            self.status = Some(status);
        }
        self.error = Some(e);
        self.timings.finish();
    }

    pub(crate) fn mark(&mut self, stage: Stage) {
        self.timings.mark(stage);
    }

    /// Reset what a previous redirect hop read.
    pub(crate) fn clear_response(&mut self) {
        self.status = None;
        self.headers.clear();
        self.trailers.clear();
        self.body = Bytes::new();
        self.cookies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::HttpRequest;

    #[test]
    fn finish_fills_unreached() {
        let mut t = Timings::default();
        t.mark(Stage::WaitStart);
        t.mark(Stage::Start);
        std::thread::sleep(Duration::from_millis(2));
        t.finish();
        assert!(t.is_complete());
        assert!(t.is_ordered());
        assert_eq!(t.get(Stage::ConnectEnd), t.get(Stage::Complete));
        assert!(t.total_time().unwrap() >= Duration::from_millis(2));
    }

    #[test]
    fn fail_sets_status() {
        let action = Action::http("a", "http://127.0.0.1/", HttpRequest::get());
        let mut r = ActionResult::new(&action);
        r.mark(Stage::WaitStart);
        r.mark(Stage::Start);
        r.fail(ActionError::Timeout);
        assert_eq!(r.status, Some(408));
        assert_eq!(r.error_string().as_deref(), Some("Request timed out."));
        assert!(r.timings.is_ordered());
        assert_eq!(r.method, "GET");

        let mut r = ActionResult::new(&action);
        r.status = Some(200);
        r.fail(ActionError::User("check failed".into()));
        assert_eq!(r.status, Some(200));
    }

    #[test]
    fn secs_since_epoch() {
        let epoch = Instant::now();
        let mut t = Timings::default();
        t.mark(Stage::WaitStart);
        t.finish();
        let s = t.as_secs(epoch);
        assert!(s.wait_start >= 0.0);
        assert!(s.complete >= s.wait_start);
    }
}
