/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use volley_http::HttpStreamReader;

use crate::ActionError;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const MASK_BIT: u8 = 0x80;
const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub(crate) fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) payload: Bytes,
}

fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}

/// Encode one final frame, masked with `key`.
pub(crate) fn encode_frame_masked(opcode: OpCode, payload: &[u8], key: [u8; 4], buf: &mut BytesMut) {
    buf.reserve(payload.len() + 14);
    buf.put_u8(FIN_BIT | opcode.as_u8());
    let len = payload.len();
    if len < 126 {
        buf.put_u8(MASK_BIT | len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(MASK_BIT | 126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(MASK_BIT | 127);
        buf.put_u64(len as u64);
    }
    buf.put_slice(&key);
    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], key);
}

/// Encode one final client frame with a random masking key.
pub(crate) fn encode_frame(opcode: OpCode, payload: &[u8], buf: &mut BytesMut) {
    let key = fastrand::u32(..).to_be_bytes();
    encode_frame_masked(opcode, payload, key, buf);
}

/// Read one frame. A masked server frame is unmasked.
pub(crate) async fn read_frame<R>(
    reader: &mut HttpStreamReader<R>,
    max_payload: u64,
) -> Result<Frame, ActionError>
where
    R: AsyncRead + Unpin,
{
    let head = reader.read_exactly(2).await?;
    let (b0, b1) = (head[0], head[1]);
    if b0 & RSV_BITS != 0 {
        return Err(ActionError::Protocol(
            "websocket frame with reserved bits set".to_string(),
        ));
    }
    let fin = b0 & FIN_BIT != 0;
    let Some(opcode) = OpCode::from_u8(b0 & 0x0F) else {
        return Err(ActionError::Protocol(format!(
            "websocket frame with reserved opcode {:#x}",
            b0 & 0x0F
        )));
    };

    let len = match b1 & 0x7F {
        126 => {
            let ext = reader.read_exactly(2).await?;
            u16::from_be_bytes([ext[0], ext[1]]) as u64
        }
        127 => {
            let ext = reader.read_exactly(8).await?;
            let mut v = [0u8; 8];
            v.copy_from_slice(&ext);
            u64::from_be_bytes(v)
        }
        n => n as u64,
    };
    if opcode.is_control() && (!fin || len > MAX_CONTROL_PAYLOAD) {
        return Err(ActionError::Protocol(
            "invalid websocket control frame".to_string(),
        ));
    }
    if len > max_payload {
        return Err(ActionError::Protocol(format!(
            "websocket frame of {len} bytes exceeds {max_payload}"
        )));
    }

    let key = if b1 & MASK_BIT != 0 {
        let k = reader.read_exactly(4).await?;
        Some([k[0], k[1], k[2], k[3]])
    } else {
        None
    };
    let data = reader.read_exactly(len as usize).await?;
    let payload = match key {
        Some(key) => {
            let mut data = BytesMut::from(data.as_ref());
            apply_mask(&mut data, key);
            data.freeze()
        }
        None => data,
    };
    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}
