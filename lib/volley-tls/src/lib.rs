/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::TlsError;

mod tcp;
pub use tcp::OpensslContext;

mod quic;
pub use quic::{ALPN_H3, build_quic_client_config};

mod factory;
pub use factory::{ClientCertPair, TlsContext, TlsContextFactory, TlsProtocol};

pub use tokio_openssl::SslStream;
