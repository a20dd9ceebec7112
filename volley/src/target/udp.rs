/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::process::ExitCode;
use std::str::FromStr;

use bytes::Bytes;
use clap::{Arg, ArgMatches, Command, value_parser};

use super::ProcArgs;
use crate::action::{Action, UdpMode, UdpRequest};

pub const COMMAND: &str = "udp";

const ARG_MODE: &str = "mode";
const ARG_DATA: &str = "data";
const ARG_DELIMITER: &str = "delimiter";
const ARG_RESPONSE_SIZE: &str = "response-size";

pub fn command() -> Command {
    super::add_common_args(Command::new(COMMAND), "UDP datagram load, the url is udp://host:port")
        .arg(
            Arg::new(ARG_MODE)
                .help("Exchange mode")
                .short('m')
                .long(ARG_MODE)
                .num_args(1)
                .value_parser(["send", "receive", "bidirectional"])
                .default_value("bidirectional"),
        )
        .arg(
            Arg::new(ARG_DATA)
                .help("Datagram payload")
                .short('d')
                .long(ARG_DATA)
                .num_args(1),
        )
        .arg(
            Arg::new(ARG_DELIMITER)
                .help("End of a response")
                .long(ARG_DELIMITER)
                .num_args(1)
                .conflicts_with(ARG_RESPONSE_SIZE),
        )
        .arg(
            Arg::new(ARG_RESPONSE_SIZE)
                .help("Read exactly this many response bytes")
                .long(ARG_RESPONSE_SIZE)
                .num_args(1)
                .value_parser(value_parser!(usize)),
        )
}

pub async fn run(proc_args: &ProcArgs, args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let url = super::get_target(args)?;
    let name = super::get_name(args, COMMAND);
    let mode = match args.get_one::<String>(ARG_MODE) {
        Some(m) => UdpMode::from_str(m)?,
        None => UdpMode::Bidirectional,
    };
    let data = args
        .get_one::<String>(ARG_DATA)
        .map(|s| Bytes::copy_from_slice(s.as_bytes()))
        .unwrap_or_default();
    let mut request = UdpRequest::new(mode, data);
    if let Some(d) = args.get_one::<String>(ARG_DELIMITER) {
        request.delimiter = Bytes::copy_from_slice(d.as_bytes());
    }
    request.response_size = args.get_one::<usize>(ARG_RESPONSE_SIZE).copied();

    let action = super::apply_common(Action::udp(name, url, request), args, proc_args);
    super::run(proc_args, action).await
}
