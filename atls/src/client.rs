// SPDX-License-Identifier: Apache-2.0

//! Client-side channel establishment.
//!
//! Chain verification is replaced entirely: the server certificate is
//! accepted iff it is self-signed, carries an attestation document matching
//! one of the configured validators, and the validated user data equals the
//! hash of the certificate's public key.

use std::fmt;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::debug;

use crate::cert::{hash_public_key, parse_self_signed};
use crate::error::AtlsError;
use crate::nonce::{encode_nonce_channel, generate_nonce};
use crate::oids::PlatformId;
use crate::server::crypto_provider;
use crate::traits::{CertExt, Validator};

/// Everything needed to open one attested client connection.
///
/// The nonce is baked into both the server name and the verifier, so a config
/// must not be reused across connections; build a fresh one per dial.
pub struct AtlsClientConfig {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
    pub nonce: Vec<u8>,
}

/// Build a client config that validates the server's attestation document
/// against any of the given validators.
pub fn build_client_config(validators: Vec<Arc<dyn Validator>>) -> Result<AtlsClientConfig> {
    build_client_config_with_nonce(validators, generate_nonce().to_vec())
}

/// Like [`build_client_config`] but with a caller-chosen nonce.
pub fn build_client_config_with_nonce(
    validators: Vec<Arc<dyn Validator>>,
    nonce: Vec<u8>,
) -> Result<AtlsClientConfig> {
    ensure!(!validators.is_empty(), "at least one validator is required");
    let provider = crypto_provider();
    let verifier = AttestationVerifier {
        validators,
        nonce: nonce.clone(),
        supported: provider.signature_verification_algorithms,
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("failed to select protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    finish_config(config, nonce)
}

/// Build a client config that skips attestation validation entirely but still
/// transports a nonce so attesting servers can issue their certificate.
pub fn build_unverified_client_config() -> Result<AtlsClientConfig> {
    let nonce = generate_nonce().to_vec();
    let provider = crypto_provider();
    let verifier = AcceptAnyCert {
        supported: provider.signature_verification_algorithms,
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("failed to select protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    finish_config(config, nonce)
}

fn finish_config(config: ClientConfig, nonce: Vec<u8>) -> Result<AtlsClientConfig> {
    let server_name = ServerName::try_from(encode_nonce_channel(&nonce))
        .context("nonce channel encoding is not a valid server name")?;
    Ok(AtlsClientConfig {
        config: Arc::new(config),
        server_name,
        nonce,
    })
}

/// Validate an attested leaf certificate and return the attested user data.
pub(crate) fn process_certificate(
    cert_der: &[u8],
    validators: &[Arc<dyn Validator>],
    nonce: &[u8],
) -> Result<Vec<u8>, AtlsError> {
    let cert = parse_self_signed(cert_der)?;
    let key_hash = hash_public_key(cert.public_key().raw);

    let mut seen = Vec::new();
    for ext in cert.extensions() {
        let Some(components) = ext.oid.iter().map(|it| it.collect::<Vec<u64>>()) else {
            continue;
        };
        if PlatformId::is_attestation_oid(&components) {
            seen.push(components);
        }
    }
    if seen.is_empty() {
        return Err(AtlsError::NoAttestationExtension);
    }

    for validator in validators {
        let oid = validator.platform().oid();
        if !seen.iter().any(|s| s.as_slice() == oid) {
            continue;
        }
        let document = cert
            .get_extension_bytes(oid)
            .map_err(|err| AtlsError::CertParse(err.to_string()))?
            .ok_or(AtlsError::NoAttestationExtension)?;
        let user_data = validator
            .validate(&document, nonce)
            .map_err(AtlsError::Validation)?;
        if user_data != key_hash {
            return Err(AtlsError::UserDataMismatch);
        }
        debug!(platform = %validator.platform(), "validated attestation document");
        return Ok(user_data);
    }

    Err(AtlsError::UnknownAttestationOid(
        seen.iter()
            .map(|oid| {
                oid.iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(".")
            })
            .collect(),
    ))
}

struct AttestationVerifier {
    validators: Vec<Arc<dyn Validator>>,
    nonce: Vec<u8>,
    supported: WebPkiSupportedAlgorithms,
}

impl fmt::Debug for AttestationVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let platforms: Vec<_> = self.validators.iter().map(|v| v.platform()).collect();
        f.debug_struct("AttestationVerifier")
            .field("platforms", &platforms)
            .finish()
    }
}

impl ServerCertVerifier for AttestationVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        process_certificate(end_entity.as_ref(), &self.validators, &self.nonce)
            .map_err(|err| rustls::Error::General(format!("attestation failed: {err}")))?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}

#[derive(Debug)]
struct AcceptAnyCert {
    supported: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}
