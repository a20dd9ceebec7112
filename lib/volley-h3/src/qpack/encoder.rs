/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use volley_h2::HeaderField;
use volley_h2::hpack::{encode_int, encode_str_prefixed};

use super::table::{StaticMatch, find_static};

/// Field section encoder that only references the static table, so the peer
/// never has to block on encoder stream data.
#[derive(Default)]
pub struct Encoder {
    lower: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder::default()
    }

    pub fn encode<'a, I>(&mut self, fields: I, out: &mut Vec<u8>)
    where
        I: IntoIterator<Item = &'a HeaderField>,
    {
        // Required Insert Count 0, Base 0
        out.push(0);
        out.push(0);

        for field in fields {
            self.lower.clear();
            self.lower
                .extend(field.name.iter().map(|b| b.to_ascii_lowercase()));
            let name = self.lower.as_slice();

            match find_static(name, &field.value) {
                StaticMatch::Full(i) => encode_int(i, 6, 0xc0, out),
                StaticMatch::Name(i) => {
                    encode_int(i, 4, 0x50, out);
                    encode_str_prefixed(&field.value, 7, 0x00, out);
                }
                StaticMatch::None => {
                    encode_str_prefixed(name, 3, 0x20, out);
                    encode_str_prefixed(&field.value, 7, 0x00, out);
                }
            }
        }
    }
}
