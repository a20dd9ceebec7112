/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use bytes::Bytes;
use clap::{Arg, ArgMatches, Command, ValueHint, value_parser};

use super::ProcArgs;
use crate::action::{Action, GrpcRequest};

pub const COMMAND: &str = "grpc";

const ARG_MESSAGE_FILE: &str = "message-file";

pub fn command() -> Command {
    let cmd = super::add_common_args(
        Command::new(COMMAND),
        "gRPC unary call load, the url path is /package.Service/Method",
    )
    .arg(
        Arg::new(ARG_MESSAGE_FILE)
            .help("File holding the serialized protobuf request message")
            .value_name("FILE")
            .long(ARG_MESSAGE_FILE)
            .num_args(1)
            .value_hint(ValueHint::FilePath)
            .value_parser(value_parser!(PathBuf)),
    );
    super::add_header_arg(cmd)
}

pub async fn run(proc_args: &ProcArgs, args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let url = super::get_target(args)?;
    let name = super::get_name(args, COMMAND);
    let message = match args.get_one::<PathBuf>(ARG_MESSAGE_FILE) {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .context(format!("failed to read message file {}", path.display()))?;
            Bytes::from(data)
        }
        None => Bytes::new(),
    };
    let request = GrpcRequest {
        message,
        headers: super::get_headers(args)?,
    };
    let action = super::apply_common(Action::grpc(name, url, request), args, proc_args);
    super::run(proc_args, action).await
}
