/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::Path;
use std::pin::Pin;

use openssl::ssl::{
    SslConnector, SslConnectorBuilder, SslFiletype, SslMethod, SslOptions, SslVerifyMode,
    SslVersion,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_openssl::SslStream;

use crate::{ClientCertPair, TlsError};

const H2_CIPHER_LIST: &str = "ECDHE+AESGCM:ECDHE+CHACHA20:DHE+AESGCM:DHE+CHACHA20";
const MTLS_CIPHER_LIST: &str = "ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384";

const ALPN_H2_HTTP11: &[u8] = b"\x02h2\x08http/1.1";

/// A configured OpenSSL client context for TCP based protocols.
pub struct OpensslContext {
    connector: SslConnector,
    require_alpn: Option<&'static str>,
}

impl OpensslContext {
    /// Server authentication purpose, no verification.
    pub fn default_preset(cert: Option<&ClientCertPair>) -> Result<Self, TlsError> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        match cert {
            Some(pair) => {
                builder.set_options(SslOptions::SINGLE_DH_USE | SslOptions::SINGLE_ECDH_USE);
                builder.set_cipher_list(MTLS_CIPHER_LIST)?;
                builder.set_default_verify_paths()?;
                builder.set_verify(SslVerifyMode::PEER);
                load_cert_pair(&mut builder, &pair.cert, &pair.key)?;
            }
            None => builder.set_verify(SslVerifyMode::NONE),
        }
        Ok(OpensslContext {
            connector: builder.build(),
            require_alpn: None,
        })
    }

    /// ALPN `h2` with `http/1.1` fallback offered, TLS 1.2 and up, no
    /// compression. The handshake fails unless the server picks `h2`.
    pub fn h2_preset(cert: Option<&ClientCertPair>) -> Result<Self, TlsError> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
        builder.set_options(SslOptions::NO_COMPRESSION);
        builder.set_cipher_list(H2_CIPHER_LIST)?;
        builder.set_alpn_protos(ALPN_H2_HTTP11)?;
        builder.set_verify(SslVerifyMode::NONE);
        if let Some(pair) = cert {
            load_cert_pair(&mut builder, &pair.cert, &pair.key)?;
        }
        Ok(OpensslContext {
            connector: builder.build(),
            require_alpn: Some("h2"),
        })
    }

    pub async fn connect<S>(&self, server_name: &str, stream: S) -> Result<SslStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ssl = self
            .connector
            .configure()?
            .verify_hostname(false)
            .into_ssl(server_name)?;
        let mut tls = SslStream::new(ssl, stream)?;
        Pin::new(&mut tls)
            .connect()
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))?;

        if let Some(expected) = self.require_alpn {
            let got = tls.ssl().selected_alpn_protocol().unwrap_or_default();
            if got != expected.as_bytes() {
                return Err(TlsError::AlpnMismatch {
                    expected,
                    got: String::from_utf8_lossy(got).to_string(),
                });
            }
        }
        Ok(tls)
    }
}

fn load_cert_pair(
    builder: &mut SslConnectorBuilder,
    cert: &Path,
    key: &Path,
) -> Result<(), TlsError> {
    builder
        .set_certificate_chain_file(cert)
        .map_err(|e| TlsError::LoadFile(cert.to_path_buf(), e.to_string()))?;
    builder
        .set_private_key_file(key, SslFiletype::PEM)
        .map_err(|e| TlsError::LoadFile(key.to_path_buf(), e.to_string()))?;
    builder.check_private_key()?;
    Ok(())
}
