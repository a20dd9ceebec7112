/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::Timeouts;
use crate::duration::{parse_duration, parse_duration_range};

pub const ENV_TOTAL_TIME: &str = "VOLLEY_TOTAL_TIME";
pub const ENV_BATCH_SIZE: &str = "VOLLEY_BATCH_SIZE";
pub const ENV_BATCH_INTERVAL: &str = "VOLLEY_BATCH_INTERVAL";
pub const ENV_BATCH_INTERVAL_RANGE: &str = "VOLLEY_BATCH_INTERVAL_RANGE";
pub const ENV_BATCH_COUNT: &str = "VOLLEY_BATCH_COUNT";
pub const ENV_BATCH_GRADIENT: &str = "VOLLEY_BATCH_GRADIENT";
pub const ENV_REQUEST_TIMEOUT: &str = "VOLLEY_REQUEST_TIMEOUT";
pub const ENV_CONNECT_TIMEOUT: &str = "VOLLEY_CONNECT_TIMEOUT";
pub const ENV_RESET_CONNECTIONS: &str = "VOLLEY_RESET_CONNECTIONS";
pub const ENV_GRACEFUL_STOP: &str = "VOLLEY_GRACEFUL_STOP";
pub const ENV_PERSONA_TYPE: &str = "VOLLEY_PERSONA_TYPE";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PersonaType {
    #[default]
    Default,
    Sequence,
    MultiSequence,
    Weighted,
    MultiUser,
    MultiUserSequence,
    ApproximateDistribution,
}

impl PersonaType {
    pub const ALL_NAMES: &[&str] = &[
        "default",
        "sequence",
        "multi-sequence",
        "weighted",
        "multi-user",
        "multi-user-sequence",
        "approximate-distribution",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaType::Default => "default",
            PersonaType::Sequence => "sequence",
            PersonaType::MultiSequence => "multi-sequence",
            PersonaType::Weighted => "weighted",
            PersonaType::MultiUser => "multi-user",
            PersonaType::MultiUserSequence => "multi-user-sequence",
            PersonaType::ApproximateDistribution => "approximate-distribution",
        }
    }
}

impl FromStr for PersonaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "default" | "constant" => Ok(PersonaType::Default),
            "sequence" | "sequenced" => Ok(PersonaType::Sequence),
            "multi-sequence" => Ok(PersonaType::MultiSequence),
            "weighted" | "weighted-selection" => Ok(PersonaType::Weighted),
            "multi-user" => Ok(PersonaType::MultiUser),
            "multi-user-sequence" => Ok(PersonaType::MultiUserSequence),
            "approximate-distribution" => Ok(PersonaType::ApproximateDistribution),
            _ => Err(anyhow!("unknown persona type {s}")),
        }
    }
}

fn default_batch_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_mul(250)
        .max(1)
}

#[derive(Clone, Debug)]
pub struct PersonaConfig {
    pub total_time: Duration,
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub batch_interval_range: Option<(Duration, Duration)>,
    pub batch_count: usize,
    pub batch_gradient: f64,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub reset_connections: bool,
    pub graceful_stop: Duration,
    pub persona_type: PersonaType,
    /// Target concurrency per window for the approximate distribution
    /// persona.
    pub distribution: Option<Vec<usize>>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        PersonaConfig {
            total_time: Duration::from_secs(60),
            batch_size: default_batch_size(),
            batch_interval: Duration::from_secs(1),
            batch_interval_range: None,
            batch_count: 10,
            batch_gradient: 0.1,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            reset_connections: false,
            graceful_stop: Duration::from_secs(1),
            persona_type: PersonaType::Default,
            distribution: None,
        }
    }
}

fn parse_bool(s: &str) -> anyhow::Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("invalid boolean value {s}")),
    }
}

impl PersonaConfig {
    /// Defaults overridden by `VOLLEY_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = PersonaConfig::default();
        config.apply_env(|k| std::env::var(k).ok())?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_TOTAL_TIME) {
            self.total_time = parse_duration(&v).context(ENV_TOTAL_TIME)?;
        }
        if let Some(v) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = v
                .trim()
                .parse::<usize>()
                .map_err(|e| anyhow!("{ENV_BATCH_SIZE}: {e}"))?
                .max(1);
        }
        if let Some(v) = lookup(ENV_BATCH_INTERVAL) {
            self.batch_interval = parse_duration(&v).context(ENV_BATCH_INTERVAL)?;
        }
        if let Some(v) = lookup(ENV_BATCH_INTERVAL_RANGE) {
            self.batch_interval_range =
                Some(parse_duration_range(&v).context(ENV_BATCH_INTERVAL_RANGE)?);
        }
        if let Some(v) = lookup(ENV_BATCH_COUNT) {
            self.batch_count = v
                .trim()
                .parse::<usize>()
                .map_err(|e| anyhow!("{ENV_BATCH_COUNT}: {e}"))?
                .max(1);
        }
        if let Some(v) = lookup(ENV_BATCH_GRADIENT) {
            self.batch_gradient = v
                .trim()
                .parse::<f64>()
                .map_err(|e| anyhow!("{ENV_BATCH_GRADIENT}: {e}"))?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT) {
            self.request_timeout = parse_duration(&v).context(ENV_REQUEST_TIMEOUT)?;
        }
        if let Some(v) = lookup(ENV_CONNECT_TIMEOUT) {
            self.connect_timeout = parse_duration(&v).context(ENV_CONNECT_TIMEOUT)?;
        }
        if let Some(v) = lookup(ENV_RESET_CONNECTIONS) {
            self.reset_connections = parse_bool(&v).context(ENV_RESET_CONNECTIONS)?;
        }
        if let Some(v) = lookup(ENV_GRACEFUL_STOP) {
            self.graceful_stop = parse_duration(&v).context(ENV_GRACEFUL_STOP)?;
        }
        if let Some(v) = lookup(ENV_PERSONA_TYPE) {
            self.persona_type = PersonaType::from_str(&v).context(ENV_PERSONA_TYPE)?;
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::new(
            self.connect_timeout,
            self.request_timeout,
            self.request_timeout,
        )
    }

    /// Wait before the next batch, drawn from the range when one is set.
    pub fn next_interval(&self) -> Duration {
        match self.batch_interval_range {
            Some((min, max)) if max > min => {
                let span = (max - min).as_nanos() as u64;
                min + Duration::from_nanos(fastrand::u64(0..=span))
            }
            Some((min, _)) => min,
            None => self.batch_interval,
        }
    }
}
