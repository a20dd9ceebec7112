/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use crate::H2Error;
use crate::settings::MAX_WINDOW_SIZE;

pub const DEFAULT_WINDOW_SIZE: u32 = 65535;

/// A flow control window. It may go negative after a SETTINGS change
/// shrinks the initial window size.
#[derive(Clone, Copy, Debug)]
pub struct FlowWindow {
    size: i64,
}

impl Default for FlowWindow {
    fn default() -> Self {
        FlowWindow::new(DEFAULT_WINDOW_SIZE)
    }
}

impl FlowWindow {
    pub fn new(size: u32) -> Self {
        FlowWindow { size: size as i64 }
    }

    #[inline]
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Bytes that may be sent right now.
    #[inline]
    pub fn available(&self) -> usize {
        self.size.max(0) as usize
    }

    pub fn consume(&mut self, n: u32) -> Result<(), H2Error> {
        let n = n as i64;
        if n > self.size {
            return Err(H2Error::FlowControl);
        }
        self.size -= n;
        Ok(())
    }

    pub fn increase(&mut self, n: u32) -> Result<(), H2Error> {
        let new = self.size + n as i64;
        if new > MAX_WINDOW_SIZE as i64 {
            return Err(H2Error::FlowControl);
        }
        self.size = new;
        Ok(())
    }

    /// Apply the difference between an old and a new initial window size.
    pub fn adjust(&mut self, delta: i64) -> Result<(), H2Error> {
        let new = self.size + delta;
        if new > MAX_WINDOW_SIZE as i64 {
            return Err(H2Error::FlowControl);
        }
        self.size = new;
        Ok(())
    }
}

/// Receive side bookkeeping: tells when to send WINDOW_UPDATE.
#[derive(Clone, Copy, Debug)]
pub struct RecvWindow {
    window: FlowWindow,
    target: u32,
    unacked: u32,
}

impl RecvWindow {
    pub fn new(target: u32) -> Self {
        RecvWindow {
            window: FlowWindow::new(target),
            target,
            unacked: 0,
        }
    }

    /// Record `n` received bytes. Returns the increment to announce once
    /// half of the window has been used up.
    pub fn on_received(&mut self, n: u32) -> Result<Option<u32>, H2Error> {
        self.window.consume(n)?;
        self.unacked += n;
        if self.unacked >= self.target / 2 {
            let inc = self.unacked;
            self.unacked = 0;
            self.window.increase(inc)?;
            Ok(Some(inc))
        } else {
            Ok(None)
        }
    }
}
