// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Mutual-TLS client construction for the credential endpoint.
//!
//! The client presents a device certificate and trusts the platform roots
//! plus one extra CA certificate. Negotiation is pinned to:
//!
//! - TLS 1.2 or 1.3
//! - AES-256-GCM suites only (ECDHE with ECDSA or RSA on TLS 1.2)
//! - X25519 and P-384 key exchange
//! - no session resumption, so every run performs a full handshake
//!
//! All PEM material is read eagerly; malformed input fails here rather than
//! during the first request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::Resumption;
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};

use crate::constants::REQUEST_TIMEOUT;
use crate::errors::{AppError, error_chain};

/// Protocol versions offered, newest first.
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Filesystem locations of the client identity and the extra trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
}

/// Builds an HTTPS client for the credential endpoint.
///
/// # Errors
///
/// Returns [`AppError::ConfigError`] if any PEM file is unreadable or
/// malformed, if the certificate and key do not form a pair, or if the CA
/// certificate cannot be added to the trust store.
#[tracing::instrument(skip_all, fields(cert = %material.cert_path.display(), ca = %material.ca_path.display()))]
pub fn build_client(material: &TlsMaterial) -> Result<reqwest::Client, AppError> {
    let config = client_config(material)?;

    reqwest::Client::builder()
        .use_preconfigured_tls(config)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|err| AppError::ConfigError(format!("failed to build HTTPS client: {}", error_chain(&err))))
}

/// Builds the rustls configuration used by [`build_client`].
pub fn client_config(material: &TlsMaterial) -> Result<ClientConfig, AppError> {
    let provider = Arc::new(restricted_provider());

    let certs = load_certificates(&material.cert_path)?;
    let key = load_private_key(&material.key_path)?;
    check_key_pair(&provider, &certs, &key)?;

    let roots = root_store(&material.ca_path)?;

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(|err| AppError::ConfigError(format!("unsupported TLS versions: {err}")))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|err| AppError::ConfigError(format!("invalid client certificate: {err}")))?;

    config.resumption = Resumption::disabled();

    Ok(config)
}

/// The aws-lc-rs provider narrowed to the allowed suites and groups.
pub fn restricted_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: vec![
            aws_lc_rs::cipher_suite::TLS13_AES_256_GCM_SHA384,
            aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        ],
        kx_groups: vec![aws_lc_rs::kx_group::X25519, aws_lc_rs::kx_group::SECP384R1],
        ..aws_lc_rs::default_provider()
    }
}

/// System roots when available, plus the supplied CA certificate(s).
fn root_store(ca_path: &Path) -> Result<RootCertStore, AppError> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::debug!("[tls] system trust store: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!("[tls] loaded {} system roots ({} ignored)", added, ignored);

    let ca_certs = load_certificates(ca_path)?;
    for cert in ca_certs {
        roots.add(cert).map_err(|err| {
            AppError::ConfigError(format!(
                "failed to append CA certificate {}: {err}",
                ca_path.display()
            ))
        })?;
    }

    Ok(roots)
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, AppError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|err| {
            AppError::ConfigError(format!("failed to read certificate {}: {err}", path.display()))
        })?;

    if certs.is_empty() {
        return Err(AppError::ConfigError(format!(
            "no PEM certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, AppError> {
    PrivateKeyDer::from_pem_file(path).map_err(|err| {
        AppError::ConfigError(format!("failed to read private key {}: {err}", path.display()))
    })
}

fn check_key_pair(
    provider: &CryptoProvider,
    certs: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<(), AppError> {
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|err| AppError::ConfigError(format!("unsupported private key: {err}")))?;

    CertifiedKey::new(certs.to_vec(), signing_key)
        .keys_match()
        .map_err(|err| {
            AppError::ConfigError(format!("certificate and private key do not match: {err}"))
        })
}
