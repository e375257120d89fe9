// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors produced while processing an attested certificate.
#[derive(Debug, Error)]
pub enum AtlsError {
    #[error("parsing certificate: {0}")]
    CertParse(String),

    #[error("certificate is not self-signed: {0}")]
    NotSelfSigned(String),

    #[error("certificate does not contain an attestation document")]
    NoAttestationExtension,

    #[error("certificate does not contain compatible attestation documents: got extension OIDs {0:?}")]
    UnknownAttestationOid(Vec<String>),

    #[error("validating attestation document: {0}")]
    Validation(#[source] anyhow::Error),

    #[error("attestation document user data does not match certificate public key")]
    UserDataMismatch,

    #[error("invalid nonce channel encoding: {0}")]
    NonceChannel(String),
}
