/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use bytes::Bytes;
use clap::{Arg, ArgAction, ArgMatches, Command};
use http::Method;

use super::ProcArgs;
use crate::action::{Action, Body, HttpRequest};

pub const COMMAND_H1: &str = "http";
pub const COMMAND_H2: &str = "http2";
pub const COMMAND_H3: &str = "http3";

const ARG_METHOD: &str = "method";
const ARG_DATA: &str = "data";
const ARG_JSON: &str = "json";
const ARG_CHUNK: &str = "chunk";
const ARG_USER: &str = "user";
pub(super) const ARG_COOKIE: &str = "cookie";
const ARG_PARAM: &str = "param";

pub(super) fn add_auth_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new(ARG_USER)
            .help("Basic auth credentials")
            .value_name("USER:PASSWORD")
            .short('u')
            .long(ARG_USER)
            .num_args(1),
    )
    .arg(
        Arg::new(ARG_COOKIE)
            .help("Request cookie")
            .value_name("NAME=VALUE")
            .long(ARG_COOKIE)
            .action(ArgAction::Append),
    )
}

fn add_http_args(cmd: Command) -> Command {
    let cmd = cmd
        .arg(
            Arg::new(ARG_METHOD)
                .help("Request method")
                .short('X')
                .long(ARG_METHOD)
                .num_args(1)
                .default_value("GET"),
        )
        .arg(
            Arg::new(ARG_DATA)
                .help("Request body")
                .short('d')
                .long(ARG_DATA)
                .num_args(1)
                .conflicts_with(ARG_CHUNK),
        )
        .arg(
            Arg::new(ARG_JSON)
                .help("Send the body as JSON")
                .long(ARG_JSON)
                .action(ArgAction::SetTrue)
                .requires(ARG_DATA),
        )
        .arg(
            Arg::new(ARG_CHUNK)
                .help("Body chunk, sent with chunked encoding over HTTP/1.1")
                .long(ARG_CHUNK)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_PARAM)
                .help("Query parameter")
                .value_name("NAME=VALUE")
                .long(ARG_PARAM)
                .action(ArgAction::Append),
        );
    let cmd = add_auth_args(super::add_header_arg(cmd));
    super::add_redirects_arg(cmd)
}

pub fn command_h1() -> Command {
    let cmd = super::add_common_args(Command::new(COMMAND_H1), "HTTP/1.1 load");
    add_http_args(cmd)
}

pub fn command_h2() -> Command {
    let cmd = super::add_common_args(Command::new(COMMAND_H2), "HTTP/2 load");
    add_http_args(cmd)
}

pub fn command_h3() -> Command {
    let cmd = super::add_common_args(Command::new(COMMAND_H3), "HTTP/3 load");
    add_http_args(cmd)
}

pub(super) fn parse_pairs(args: &ArgMatches, id: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    if let Some(values) = args.get_many::<String>(id) {
        for v in values {
            let (name, value) = v
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid {id} value {v}, should be name=value"))?;
            pairs.push((name.to_string(), value.to_string()));
        }
    }
    Ok(pairs)
}

pub(super) fn parse_auth(args: &ArgMatches) -> anyhow::Result<Option<(String, String)>> {
    match args.get_one::<String>(ARG_USER) {
        Some(v) => {
            let (user, pass) = v.split_once(':').unwrap_or((v.as_str(), ""));
            if user.is_empty() {
                return Err(anyhow!("empty user name in {v}"));
            }
            Ok(Some((user.to_string(), pass.to_string())))
        }
        None => Ok(None),
    }
}

fn parse_http_request(args: &ArgMatches) -> anyhow::Result<HttpRequest> {
    let method = match args.get_one::<String>(ARG_METHOD) {
        Some(m) => Method::from_str(&m.to_ascii_uppercase())
            .map_err(|e| anyhow!("invalid method {m}: {e}"))?,
        None => Method::GET,
    };
    let mut request = HttpRequest::new(method);
    request.headers = super::get_headers(args)?;
    request.auth = parse_auth(args)?;
    request.cookies = parse_pairs(args, ARG_COOKIE)?;
    request.params = parse_pairs(args, ARG_PARAM)?;

    if let Some(data) = args.get_one::<String>(ARG_DATA) {
        request.body = if args.get_flag(ARG_JSON) {
            let v = serde_json::from_str(data).context("invalid json body")?;
            Body::Json(v)
        } else {
            Body::Raw(Bytes::copy_from_slice(data.as_bytes()))
        };
    } else if let Some(chunks) = args.get_many::<String>(ARG_CHUNK) {
        request.body = Body::Chunks(
            chunks
                .map(|c| Bytes::copy_from_slice(c.as_bytes()))
                .collect(),
        );
    }
    Ok(request)
}

pub async fn run(
    proc_args: &ProcArgs,
    command: &str,
    args: &ArgMatches,
) -> anyhow::Result<ExitCode> {
    let url = super::get_target(args)?;
    let name = super::get_name(args, command);
    let request = parse_http_request(args)?;
    let action = match command {
        COMMAND_H1 => Action::http(name, url, request),
        COMMAND_H2 => Action::http2(name, url, request),
        COMMAND_H3 => Action::http3(name, url, request),
        cmd => return Err(anyhow!("invalid http command {cmd}")),
    };
    let action = super::apply_common(action, args, proc_args);
    super::run(proc_args, action).await
}
