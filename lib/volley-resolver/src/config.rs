/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

/// The socket parameters a host name resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    pub family: AddressFamily,
    pub transport: Transport,
    pub addr: SocketAddr,
}

impl SocketConfig {
    pub fn new(transport: Transport, addr: SocketAddr) -> Self {
        let family = if addr.is_ipv4() {
            AddressFamily::Ipv4
        } else {
            AddressFamily::Ipv6
        };
        SocketConfig {
            family,
            transport,
            addr,
        }
    }

    #[inline]
    pub fn ip(&self) -> std::net::IpAddr {
        self.addr.ip()
    }
}

/// What to resolve. The cache keeps one entry per host and tls flag, so a
/// scheme change resolves again while another port of the same host does
/// not.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolveKey {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub transport: Transport,
}

impl ResolveKey {
    pub fn new(host: &str, port: u16, tls: bool, transport: Transport) -> Self {
        ResolveKey {
            host: host.to_ascii_lowercase(),
            port,
            tls,
            transport,
        }
    }
}
