/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

const PACKAGE_VERSION: Option<&str> = option_env!("VOLLEY_PACKAGE_VERSION");

pub fn print_version() {
    println!("{PKG_NAME} {VERSION}");
    println!("{PKG_DESCRIPTION}");
    print!("Protocols:");
    for name in crate::client::PROTOCOL_NAMES {
        print!(" {name}");
    }
    println!();
    if let Some(package_version) = PACKAGE_VERSION {
        println!("Package Version: {package_version}");
    }
}
