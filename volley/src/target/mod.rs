/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{info, warn};

use crate::ProcArgs;
use crate::action::Action;
use crate::client::{ClientOptions, ClientSet};
use crate::persona::Persona;

pub mod graphql;
pub mod grpc;
pub mod http;
pub mod udp;
pub mod websocket;

const ARG_TARGET: &str = "target";
const ARG_NAME: &str = "name";
const ARG_HEADER: &str = "header";
const ARG_REDIRECTS: &str = "redirects";

fn add_common_args(cmd: Command, about: &'static str) -> Command {
    cmd.about(about)
        .arg(
            Arg::new(ARG_TARGET)
                .help("Target url")
                .value_name("URL")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new(ARG_NAME)
                .help("Name of the action in logs and results")
                .long(ARG_NAME)
                .num_args(1),
        )
}

fn add_header_arg(cmd: Command) -> Command {
    cmd.arg(
        Arg::new(ARG_HEADER)
            .help("Extra request header")
            .value_name("NAME: VALUE")
            .short('H')
            .long(ARG_HEADER)
            .action(ArgAction::Append),
    )
}

fn add_redirects_arg(cmd: Command) -> Command {
    cmd.arg(
        Arg::new(ARG_REDIRECTS)
            .help("Maximum redirects to follow")
            .long(ARG_REDIRECTS)
            .num_args(1)
            .value_parser(clap::value_parser!(usize)),
    )
}

fn get_target(args: &ArgMatches) -> anyhow::Result<&str> {
    args.get_one::<String>(ARG_TARGET)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("no target url set"))
}

fn get_name<'a>(args: &'a ArgMatches, default: &'a str) -> &'a str {
    args.get_one::<String>(ARG_NAME)
        .map(|s| s.as_str())
        .unwrap_or(default)
}

fn get_headers(args: &ArgMatches) -> anyhow::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    if let Some(values) = args.get_many::<String>(ARG_HEADER) {
        for v in values {
            let (name, value) = v
                .split_once(':')
                .ok_or_else(|| anyhow!("invalid header {v}"))?;
            let name = name.trim();
            ::http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("invalid header name {name}: {e}"))?;
            headers.push((name.to_string(), value.trim().to_string()));
        }
    }
    Ok(headers)
}

fn apply_common(mut action: Action, args: &ArgMatches, proc_args: &ProcArgs) -> Action {
    if let Some(n) = args.try_get_one::<usize>(ARG_REDIRECTS).ok().flatten() {
        action = action.with_redirects(*n);
    }
    if let Some(cert) = &proc_args.cert {
        action = action.with_cert(cert.clone());
    }
    action
}

/// Run one action under the configured persona and print what happened.
async fn run(proc_args: &ProcArgs, action: Action) -> anyhow::Result<ExitCode> {
    let ctx = proc_args.engine_context();
    let options = ClientOptions::from(&proc_args.persona);
    let clients = Arc::new(ClientSet::with_defaults(&ctx, options));
    let client_name = action.client_name().to_string();
    let persona = Persona::new(proc_args.persona.clone(), clients.clone(), vec![action]);

    let stop = persona.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping");
            stop.cancel();
        }
    });

    let outcome = persona.run().await.context("run failed")?;
    clients.close_all().await;

    let summary = outcome.summary();
    if !proc_args.no_summary {
        if let Some(client) = clients.get(&client_name) {
            client.stats().summary(outcome.elapsed);
            println!();
        }
        summary.print();
    }

    if summary.total() > 0 && summary.completed == 0 {
        warn!("no action completed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
