/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::Buf;
use http::HeaderMap;

use super::{ClientOptions, Http2Client};
use crate::action::Protocol;
use crate::{ActionError, ActionResult, EngineContext};

const GRPC_STATUS: &str = "grpc-status";
const GRPC_MESSAGE: &str = "grpc-message";

/// gRPC unary calls over the HTTP/2 client.
pub struct GrpcClient {
    inner: Http2Client,
}

impl GrpcClient {
    pub fn new(ctx: EngineContext, options: ClientOptions) -> Self {
        GrpcClient {
            inner: Http2Client::with_protocol("grpc", Protocol::Grpc, ctx, options),
        }
    }
}

delegate_client!(GrpcClient);

fn grpc_status(headers: &HeaderMap) -> Option<(u32, String)> {
    let code = headers.get(GRPC_STATUS)?.to_str().ok()?.trim().parse().ok()?;
    let message = headers
        .get(GRPC_MESSAGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

/// Strip the length prefixed framing off the response message and fail
/// on a non zero `grpc-status`.
///
/// The status is read from the trailers, or from the headers of a
/// trailers only response.
pub(crate) fn check_response(result: &mut ActionResult) -> Result<(), ActionError> {
    let status = grpc_status(&result.trailers).or_else(|| grpc_status(&result.headers));
    if let Some((code, message)) = status
        && code != 0
    {
        return Err(ActionError::Protocol(format!(
            "grpc-status {code}: {message}"
        )));
    }

    let mut body = result.body.clone();
    if body.is_empty() {
        return Ok(());
    }
    if body.len() < 5 {
        return Err(ActionError::Protocol(format!(
            "grpc frame too short: {} bytes",
            body.len()
        )));
    }
    let compressed = body.get_u8();
    let len = body.get_u32() as usize;
    if compressed != 0 {
        return Err(ActionError::Protocol(
            "compressed grpc messages are not supported".to_string(),
        ));
    }
    if body.len() < len {
        return Err(ActionError::Protocol(format!(
            "grpc frame truncated: {} of {len} bytes",
            body.len()
        )));
    }
    result.body = body.split_to(len);
    Ok(())
}
