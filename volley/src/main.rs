/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::process::ExitCode;

use anyhow::{Context, anyhow};
use clap::{Arg, ArgMatches, Command, value_parser};
use clap_complete::Shell;

use volley::target::{graphql, grpc, http, udp, websocket};

const COMMAND_VERSION: &str = "version";
const COMMAND_COMPLETION: &str = "completion";

fn build_cli_args() -> Command {
    volley::add_global_args(Command::new(volley::build::PKG_NAME))
        .subcommand_required(true)
        .subcommand_value_name("PROTOCOL")
        .subcommand(Command::new(COMMAND_VERSION).override_help("Show version"))
        .subcommand(
            Command::new(COMMAND_COMPLETION).arg(
                Arg::new("target")
                    .value_name("SHELL")
                    .required(true)
                    .num_args(1)
                    .value_parser(value_parser!(Shell)),
            ),
        )
        .subcommand(http::command_h1())
        .subcommand(http::command_h2())
        .subcommand(http::command_h3())
        .subcommand(websocket::command())
        .subcommand(grpc::command())
        .subcommand(graphql::command_h1())
        .subcommand(graphql::command_h2())
        .subcommand(udp::command())
}

fn main() -> anyhow::Result<ExitCode> {
    openssl::init();
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    let args = build_cli_args().get_matches();
    let proc_args = volley::parse_global_args(&args)?;

    let (subcommand, sub_args) = args
        .subcommand()
        .ok_or_else(|| anyhow!("no subcommand found"))?;

    match subcommand {
        COMMAND_VERSION => {
            volley::build::print_version();
            return Ok(ExitCode::SUCCESS);
        }
        COMMAND_COMPLETION => {
            generate_completion(sub_args);
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let _log_guard = volley::setup_log(proc_args.verbose_level)
        .map_err(|e| anyhow!("failed to setup logger: {e}"))?;

    proc_args.summary();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("volley-main")
        .build()
        .context("failed to start main runtime")?;
    rt.block_on(async move {
        match subcommand {
            http::COMMAND_H1 | http::COMMAND_H2 | http::COMMAND_H3 => {
                http::run(&proc_args, subcommand, sub_args).await
            }
            graphql::COMMAND_H1 | graphql::COMMAND_H2 => {
                graphql::run(&proc_args, subcommand, sub_args).await
            }
            websocket::COMMAND => websocket::run(&proc_args, sub_args).await,
            grpc::COMMAND => grpc::run(&proc_args, sub_args).await,
            udp::COMMAND => udp::run(&proc_args, sub_args).await,
            cmd => Err(anyhow!("invalid subcommand {cmd}")),
        }
    })
}

fn generate_completion(args: &ArgMatches) {
    if let Some(target) = args.get_one::<Shell>("target") {
        let mut app = build_cli_args();
        let bin_name = app.get_name().to_string();
        clap_complete::generate(*target, &mut app, bin_name, &mut io::stdout());
    }
}
