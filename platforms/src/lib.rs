// SPDX-License-Identifier: Apache-2.0

//! Platform plugins: per-cloud issuers and validators.
//!
//! Each platform contributes an instance-info source for issuance and a
//! trust decision for validation. All trust decisions are routed through
//! [`TrustPolicy`], so the mapping from platform to behavior is visible in
//! one place.

use anyhow::{Context, Result};
use atls::PlatformId;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use vtpm_attest::{AttestationDocument, TrustBackend};

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod qemu;

/// Decode the document's embedded attestation key without external trust.
pub(crate) fn decode_ak(doc: &AttestationDocument) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(&doc.ak_public)
        .context("failed to decode attestation key from document")
}

/// How a validator decides which attestation key to trust.
pub enum TrustPolicy {
    /// NSM attestation document binds the TPM attestation key to the
    /// enclave; the variant carries the pinned Nitro root CA.
    Aws(aws::AwsTrust),
    /// Azure vTPM attestation keys are bound to the SEV-SNP report; until
    /// that link is verified here, the embedded key is decoded as-is.
    Azure,
    /// The shielded-VM identity fetched from the Compute API is the trusted
    /// key; the document's embedded key is ignored.
    Gcp(gcp::GcpTrust),
    /// Non-confidential GCP VMs: no platform anchor, embedded key as-is.
    GcpNonCvm,
    /// Development platform, no trust anchor.
    Qemu,
}

impl TrustPolicy {
    pub fn platform(&self) -> PlatformId {
        match self {
            TrustPolicy::Aws(_) => PlatformId::Aws,
            TrustPolicy::Azure => PlatformId::Azure,
            TrustPolicy::Gcp(_) => PlatformId::Gcp,
            TrustPolicy::GcpNonCvm => PlatformId::GcpNonCvm,
            TrustPolicy::Qemu => PlatformId::Qemu,
        }
    }
}

impl TrustBackend for TrustPolicy {
    fn trusted_key(
        &self,
        doc: &AttestationDocument,
        extra_data: &[u8; 32],
    ) -> Result<RsaPublicKey> {
        match self {
            TrustPolicy::Aws(trust) => trust.trusted_key(doc, extra_data),
            TrustPolicy::Gcp(trust) => trust.trusted_key(doc),
            TrustPolicy::Azure | TrustPolicy::GcpNonCvm | TrustPolicy::Qemu => decode_ak(doc),
        }
    }

    fn validate_cvm(&self, doc: &AttestationDocument) -> Result<()> {
        match self {
            TrustPolicy::Azure => azure::validate_cvm(doc),
            _ => Ok(()),
        }
    }
}
