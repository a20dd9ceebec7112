/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::process::ExitCode;

use anyhow::{Context, anyhow};
use clap::{Arg, ArgMatches, Command};

use super::ProcArgs;
use crate::action::{Action, GraphqlRequest};

pub const COMMAND_H1: &str = "graphql";
pub const COMMAND_H2: &str = "graphql-http2";

const ARG_QUERY: &str = "query";
const ARG_OPERATION_NAME: &str = "operation-name";
const ARG_VARIABLES: &str = "variables";

fn add_graphql_args(cmd: Command) -> Command {
    let cmd = cmd
        .arg(
            Arg::new(ARG_QUERY)
                .help("GraphQL query document")
                .short('q')
                .long(ARG_QUERY)
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new(ARG_OPERATION_NAME)
                .help("Operation to run from the document")
                .long(ARG_OPERATION_NAME)
                .num_args(1),
        )
        .arg(
            Arg::new(ARG_VARIABLES)
                .help("Query variables as a JSON object")
                .long(ARG_VARIABLES)
                .num_args(1),
        );
    super::http::add_auth_args(super::add_header_arg(cmd))
}

pub fn command_h1() -> Command {
    let cmd = super::add_common_args(Command::new(COMMAND_H1), "GraphQL over HTTP/1.1 load");
    add_graphql_args(cmd)
}

pub fn command_h2() -> Command {
    let cmd = super::add_common_args(Command::new(COMMAND_H2), "GraphQL over HTTP/2 load");
    add_graphql_args(cmd)
}

fn parse_graphql_request(args: &ArgMatches) -> anyhow::Result<GraphqlRequest> {
    let query = args
        .get_one::<String>(ARG_QUERY)
        .ok_or_else(|| anyhow!("no query set"))?;
    let mut request = GraphqlRequest::new(query);
    request.operation_name = args.get_one::<String>(ARG_OPERATION_NAME).cloned();
    if let Some(v) = args.get_one::<String>(ARG_VARIABLES) {
        let variables: serde_json::Value =
            serde_json::from_str(v).context("invalid variables json")?;
        if !variables.is_object() {
            return Err(anyhow!("graphql variables should be a json object"));
        }
        request.variables = Some(variables);
    }
    request.headers = super::get_headers(args)?;
    request.auth = super::http::parse_auth(args)?;
    request.cookies = super::http::parse_pairs(args, super::http::ARG_COOKIE)?;
    Ok(request)
}

pub async fn run(
    proc_args: &ProcArgs,
    command: &str,
    args: &ArgMatches,
) -> anyhow::Result<ExitCode> {
    let url = super::get_target(args)?;
    let name = super::get_name(args, command);
    let request = parse_graphql_request(args)?;
    let action = match command {
        COMMAND_H1 => Action::graphql(name, url, request),
        COMMAND_H2 => Action::graphql_h2(name, url, request),
        cmd => return Err(anyhow!("invalid graphql command {cmd}")),
    };
    let action = super::apply_common(action, args, proc_args);
    super::run(proc_args, action).await
}
