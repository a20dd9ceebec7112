/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::process::ExitCode;

use clap::{Arg, ArgAction, ArgMatches, Command};

use super::ProcArgs;
use crate::action::{Action, WebSocketRequest};

pub const COMMAND: &str = "websocket";

const ARG_DATA: &str = "data";
const ARG_PARAM: &str = "param";
const ARG_SUBPROTOCOL: &str = "subprotocol";
const ARG_ORIGIN: &str = "origin";

pub fn command() -> Command {
    let cmd = super::add_common_args(
        Command::new(COMMAND),
        "WebSocket load, sends data if set and waits for one message",
    )
    .arg(
        Arg::new(ARG_DATA)
            .help("Message to send after the upgrade")
            .short('d')
            .long(ARG_DATA)
            .num_args(1),
    )
    .arg(
        Arg::new(ARG_PARAM)
            .help("Query parameter")
            .value_name("NAME=VALUE")
            .long(ARG_PARAM)
            .action(ArgAction::Append),
    )
    .arg(
        Arg::new(ARG_SUBPROTOCOL)
            .help("Requested subprotocol")
            .long(ARG_SUBPROTOCOL)
            .num_args(1),
    )
    .arg(
        Arg::new(ARG_ORIGIN)
            .help("Origin header of the upgrade request")
            .long(ARG_ORIGIN)
            .num_args(1),
    );
    super::add_header_arg(cmd)
}

pub async fn run(proc_args: &ProcArgs, args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let url = super::get_target(args)?;
    let name = super::get_name(args, COMMAND);
    let mut request = match args.get_one::<String>(ARG_DATA) {
        Some(data) => WebSocketRequest::send(data.clone().into_bytes()),
        None => WebSocketRequest::listen(),
    };
    request.headers = super::get_headers(args)?;
    request.params = super::http::parse_pairs(args, ARG_PARAM)?;
    request.subprotocol = args.get_one::<String>(ARG_SUBPROTOCOL).cloned();
    request.origin = args.get_one::<String>(ARG_ORIGIN).cloned();

    let action = super::apply_common(Action::websocket(name, url, request), args, proc_args);
    super::run(proc_args, action).await
}
