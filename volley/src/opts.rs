/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint, value_parser};

use volley_tls::ClientCertPair;

use crate::config::{PersonaConfig, PersonaType};
use crate::duration::{parse_duration, parse_duration_range};
use crate::{EngineContext, Timeouts};

const GLOBAL_ARG_VERBOSE: &str = "verbose";
const GLOBAL_ARG_TOTAL_TIME: &str = "total-time";
const GLOBAL_ARG_BATCH_SIZE: &str = "batch-size";
const GLOBAL_ARG_BATCH_INTERVAL: &str = "batch-interval";
const GLOBAL_ARG_BATCH_INTERVAL_RANGE: &str = "batch-interval-range";
const GLOBAL_ARG_BATCH_COUNT: &str = "batch-count";
const GLOBAL_ARG_BATCH_GRADIENT: &str = "batch-gradient";
const GLOBAL_ARG_DISTRIBUTION: &str = "distribution";
const GLOBAL_ARG_REQUEST_TIMEOUT: &str = "request-timeout";
const GLOBAL_ARG_CONNECT_TIMEOUT: &str = "connect-timeout";
const GLOBAL_ARG_RESET_CONNECTIONS: &str = "reset-connections";
const GLOBAL_ARG_GRACEFUL_STOP: &str = "graceful-stop";
const GLOBAL_ARG_PERSONA: &str = "persona";
const GLOBAL_ARG_RESOLVE: &str = "resolve";
const GLOBAL_ARG_CERT: &str = "cert";
const GLOBAL_ARG_KEY: &str = "key";
const GLOBAL_ARG_NO_SUMMARY: &str = "no-summary";

pub struct ProcArgs {
    pub verbose_level: u8,
    pub persona: PersonaConfig,
    resolver: Vec<(String, u16, SocketAddr)>,
    pub(crate) cert: Option<ClientCertPair>,
    pub no_summary: bool,
}

impl Default for ProcArgs {
    fn default() -> Self {
        ProcArgs {
            verbose_level: 0,
            persona: PersonaConfig::default(),
            resolver: Vec::new(),
            cert: None,
            no_summary: false,
        }
    }
}

impl ProcArgs {
    pub fn summary(&self) {
        if self.no_summary {
            return;
        }

        let config = &self.persona;
        println!("Persona:          {}", config.persona_type.as_str());
        println!("Batch Size:       {}", config.batch_size);
        match config.batch_interval_range {
            Some((min, max)) => println!("Batch Interval:   {min:?} - {max:?}"),
            None => println!("Batch Interval:   {:?}", config.batch_interval),
        }
        println!("Total Time:       {:?}", config.total_time);
        println!();
    }

    fn parse_resolve_value(&mut self, v: &str) -> anyhow::Result<()> {
        let mut parts = v.splitn(3, ':');

        let host = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("no host field found"))?;
        let port = parts.next().ok_or_else(|| anyhow!("no port field found"))?;
        let port = u16::from_str(port).map_err(|e| anyhow!("invalid port: {e}"))?;
        let addr = parts
            .next()
            .ok_or_else(|| anyhow!("no address field found"))?;

        let addr = match SocketAddr::from_str(addr) {
            Ok(addr) => addr,
            Err(_) => {
                let ip = addr.trim_start_matches('[').trim_end_matches(']');
                let ip = IpAddr::from_str(ip).map_err(|e| anyhow!("invalid ip address: {e}"))?;
                SocketAddr::new(ip, port)
            }
        };

        self.resolver.push((host.to_string(), port, addr));
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        self.persona.timeouts()
    }

    pub fn engine_context(&self) -> EngineContext {
        EngineContext::with_overrides(self.resolver.iter().cloned())
    }
}

pub fn add_global_args(app: Command) -> Command {
    app.arg(
        Arg::new(GLOBAL_ARG_VERBOSE)
            .help("Show verbose output")
            .short('v')
            .long(GLOBAL_ARG_VERBOSE)
            .global(true)
            .action(ArgAction::Count),
    )
    .arg(
        Arg::new(GLOBAL_ARG_TOTAL_TIME)
            .help("Total time of the run")
            .value_name("DURATION")
            .short('t')
            .long(GLOBAL_ARG_TOTAL_TIME)
            .global(true)
            .num_args(1),
    )
    .arg(
        Arg::new(GLOBAL_ARG_BATCH_SIZE)
            .help("Number of actions fired in one batch")
            .value_name("COUNT")
            .short('b')
            .long(GLOBAL_ARG_BATCH_SIZE)
            .global(true)
            .num_args(1)
            .value_parser(value_parser!(usize)),
    )
    .arg(
        Arg::new(GLOBAL_ARG_BATCH_INTERVAL)
            .help("Wait time between two batches")
            .value_name("DURATION")
            .short('i')
            .long(GLOBAL_ARG_BATCH_INTERVAL)
            .global(true)
            .num_args(1),
    )
    .arg(
        Arg::new(GLOBAL_ARG_BATCH_INTERVAL_RANGE)
            .help("Random wait time between two batches")
            .value_name("MIN:MAX")
            .long(GLOBAL_ARG_BATCH_INTERVAL_RANGE)
            .global(true)
            .num_args(1)
            .conflicts_with(GLOBAL_ARG_BATCH_INTERVAL),
    )
    .arg(
        Arg::new(GLOBAL_ARG_BATCH_COUNT)
            .help("Number of windows for the approximate distribution persona")
            .value_name("COUNT")
            .long(GLOBAL_ARG_BATCH_COUNT)
            .global(true)
            .num_args(1)
            .value_parser(value_parser!(usize)),
    )
    .arg(
        Arg::new(GLOBAL_ARG_BATCH_GRADIENT)
            .help("Ramp step for the approximate distribution persona")
            .value_name("RATIO")
            .long(GLOBAL_ARG_BATCH_GRADIENT)
            .global(true)
            .num_args(1)
            .value_parser(value_parser!(f64)),
    )
    .arg(
        Arg::new(GLOBAL_ARG_DISTRIBUTION)
            .help("Concurrency of each window for the approximate distribution persona")
            .value_name("N,N,...")
            .long(GLOBAL_ARG_DISTRIBUTION)
            .global(true)
            .num_args(1)
            .value_delimiter(',')
            .value_parser(value_parser!(usize)),
    )
    .arg(
        Arg::new(GLOBAL_ARG_REQUEST_TIMEOUT)
            .help("Timeout of a single action")
            .value_name("DURATION")
            .long(GLOBAL_ARG_REQUEST_TIMEOUT)
            .global(true)
            .num_args(1),
    )
    .arg(
        Arg::new(GLOBAL_ARG_CONNECT_TIMEOUT)
            .help("Timeout of connection setup")
            .value_name("DURATION")
            .long(GLOBAL_ARG_CONNECT_TIMEOUT)
            .global(true)
            .num_args(1),
    )
    .arg(
        Arg::new(GLOBAL_ARG_RESET_CONNECTIONS)
            .help("Drop idle connections before every batch")
            .long(GLOBAL_ARG_RESET_CONNECTIONS)
            .global(true)
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new(GLOBAL_ARG_GRACEFUL_STOP)
            .help("Time given to in flight actions after the total time")
            .value_name("DURATION")
            .long(GLOBAL_ARG_GRACEFUL_STOP)
            .global(true)
            .num_args(1),
    )
    .arg(
        Arg::new(GLOBAL_ARG_PERSONA)
            .help("Persona type")
            .short('p')
            .long(GLOBAL_ARG_PERSONA)
            .global(true)
            .num_args(1)
            .value_parser(PossibleValuesParser::new(
                PersonaType::ALL_NAMES.iter().copied(),
            )),
    )
    .arg(
        Arg::new(GLOBAL_ARG_RESOLVE)
            .help("Resolve host:port to the given address")
            .value_name("HOST:PORT:ADDRESS")
            .long(GLOBAL_ARG_RESOLVE)
            .global(true)
            .action(ArgAction::Append),
    )
    .arg(
        Arg::new(GLOBAL_ARG_CERT)
            .help("Client certificate file for TLS")
            .value_name("CERT FILE")
            .long(GLOBAL_ARG_CERT)
            .global(true)
            .num_args(1)
            .value_hint(ValueHint::FilePath)
            .value_parser(value_parser!(PathBuf))
            .requires(GLOBAL_ARG_KEY),
    )
    .arg(
        Arg::new(GLOBAL_ARG_KEY)
            .help("Client private key file for TLS")
            .value_name("KEY FILE")
            .long(GLOBAL_ARG_KEY)
            .global(true)
            .num_args(1)
            .value_hint(ValueHint::FilePath)
            .value_parser(value_parser!(PathBuf))
            .requires(GLOBAL_ARG_CERT),
    )
    .arg(
        Arg::new(GLOBAL_ARG_NO_SUMMARY)
            .help("Disable summary output")
            .action(ArgAction::SetTrue)
            .long(GLOBAL_ARG_NO_SUMMARY)
            .global(true),
    )
}

fn get_duration(args: &ArgMatches, id: &str) -> anyhow::Result<Option<Duration>> {
    match args.get_one::<String>(id) {
        Some(v) => {
            let d = parse_duration(v).context(format!("invalid {id} value {v}"))?;
            Ok(Some(d))
        }
        None => Ok(None),
    }
}

/// Command line values win over `VOLLEY_*` environment variables, which
/// win over the defaults.
pub fn parse_global_args(args: &ArgMatches) -> anyhow::Result<ProcArgs> {
    let mut proc_args = ProcArgs {
        persona: PersonaConfig::from_env()?,
        ..Default::default()
    };
    let config = &mut proc_args.persona;

    if let Some(d) = get_duration(args, GLOBAL_ARG_TOTAL_TIME)? {
        config.total_time = d;
    }
    if let Some(n) = args.get_one::<usize>(GLOBAL_ARG_BATCH_SIZE) {
        config.batch_size = (*n).max(1);
    }
    if let Some(d) = get_duration(args, GLOBAL_ARG_BATCH_INTERVAL)? {
        config.batch_interval = d;
        config.batch_interval_range = None;
    }
    if let Some(v) = args.get_one::<String>(GLOBAL_ARG_BATCH_INTERVAL_RANGE) {
        let range = parse_duration_range(v).context(format!("invalid interval range {v}"))?;
        config.batch_interval_range = Some(range);
    }
    if let Some(n) = args.get_one::<usize>(GLOBAL_ARG_BATCH_COUNT) {
        config.batch_count = (*n).max(1);
    }
    if let Some(g) = args.get_one::<f64>(GLOBAL_ARG_BATCH_GRADIENT) {
        config.batch_gradient = *g;
    }
    if let Some(values) = args.get_many::<usize>(GLOBAL_ARG_DISTRIBUTION) {
        config.distribution = Some(values.copied().collect());
    }
    if let Some(d) = get_duration(args, GLOBAL_ARG_REQUEST_TIMEOUT)? {
        config.request_timeout = d;
    }
    if let Some(d) = get_duration(args, GLOBAL_ARG_CONNECT_TIMEOUT)? {
        config.connect_timeout = d;
    }
    if args.get_flag(GLOBAL_ARG_RESET_CONNECTIONS) {
        config.reset_connections = true;
    }
    if let Some(d) = get_duration(args, GLOBAL_ARG_GRACEFUL_STOP)? {
        config.graceful_stop = d;
    }
    if let Some(s) = args.get_one::<String>(GLOBAL_ARG_PERSONA) {
        config.persona_type = PersonaType::from_str(s)?;
    }

    if let Some(values) = args.get_many::<String>(GLOBAL_ARG_RESOLVE) {
        for v in values {
            proc_args
                .parse_resolve_value(v)
                .context(format!("invalid resolve string {v}"))?;
        }
    }

    proc_args.cert = ClientCertPair::from_paths(
        args.get_one::<PathBuf>(GLOBAL_ARG_CERT).cloned(),
        args.get_one::<PathBuf>(GLOBAL_ARG_KEY).cloned(),
    )?;

    proc_args.verbose_level = args.get_count(GLOBAL_ARG_VERBOSE);
    proc_args.no_summary = args.get_flag(GLOBAL_ARG_NO_SUMMARY);

    Ok(proc_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> ProcArgs {
        let app = add_global_args(Command::new("volley"));
        let args = app.try_get_matches_from(argv).unwrap();
        parse_global_args(&args).unwrap()
    }

    #[test]
    fn cli_values() {
        let p = parse(&[
            "volley",
            "-t",
            "2m",
            "-b",
            "8",
            "--batch-interval-range",
            "100ms:1s",
            "--persona",
            "sequence",
            "--distribution",
            "1,4,2",
            "-vv",
        ]);
        assert_eq!(p.persona.total_time, Duration::from_secs(120));
        assert_eq!(p.persona.batch_size, 8);
        assert_eq!(
            p.persona.batch_interval_range,
            Some((Duration::from_millis(100), Duration::from_secs(1)))
        );
        assert_eq!(p.persona.persona_type, PersonaType::Sequence);
        assert_eq!(p.persona.distribution, Some(vec![1, 4, 2]));
        assert_eq!(p.verbose_level, 2);
    }

    #[test]
    fn resolve_values() {
        let mut p = ProcArgs::default();
        p.parse_resolve_value("example.net:443:127.0.0.1").unwrap();
        p.parse_resolve_value("example.org:80:127.0.0.1:8080").unwrap();
        p.parse_resolve_value("example.com:80:[::1]").unwrap();
        assert_eq!(
            p.resolver[0],
            ("example.net".to_string(), 443, "127.0.0.1:443".parse().unwrap())
        );
        assert_eq!(p.resolver[1].2, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(p.resolver[2].2, "[::1]:80".parse().unwrap());
        assert!(p.parse_resolve_value("example.net:x:127.0.0.1").is_err());
        assert!(p.parse_resolve_value("example.net:443").is_err());
    }
}
