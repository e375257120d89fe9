// SPDX-License-Identifier: Apache-2.0

//! AWS Nitro.
//!
//! The issuer asks the Nitro Security Module for an attestation document
//! over the TPM attestation key and the quote's qualifying data, and embeds
//! the raw COSE bytes as instance info. The validator verifies the NSM
//! document against a pinned Nitro root CA and checks that it binds exactly
//! that key and that qualifying data.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use atls::PlatformId;
use nitro_nsm::{verify_attestation, NsmContext};
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use tpm::{OpenDeviceFn, TpmDevice};
use tracing::debug;
use vtpm_attest::{
    AttestationDocument, InstanceInfoSource, Issuer, TrustedPcrs, Validator,
    DEFAULT_PCR_SELECTION,
};

use crate::{decode_ak, TrustPolicy};

/// Requests an NSM attestation document over the TPM attestation key.
#[derive(Debug, Clone, Copy, Default)]
pub struct NsmInstanceInfo;

impl InstanceInfoSource for NsmInstanceInfo {
    fn instance_info(&self, device: &mut dyn TpmDevice, extra_data: &[u8; 32]) -> Result<Vec<u8>> {
        let ak_public = device.ak_public()?;
        let ak_digest: [u8; 32] = Sha256::digest(&ak_public).into();

        let nsm = NsmContext::new().context("failed to open NSM device")?;
        nsm.get_attestation_doc(Some(&ak_digest), Some(extra_data), None)
            .context("failed to request NSM attestation document")
    }
}

/// Validates the NSM document and the key binding inside it.
pub struct AwsTrust {
    root_ca_pem: String,
}

impl AwsTrust {
    /// `root_ca_pem` is the AWS Nitro Enclaves root CA the verifier pins.
    pub fn new(root_ca_pem: impl Into<String>) -> Self {
        Self {
            root_ca_pem: root_ca_pem.into(),
        }
    }

    pub(crate) fn trusted_key(
        &self,
        doc: &AttestationDocument,
        extra_data: &[u8; 32],
    ) -> Result<RsaPublicKey> {
        let report = verify_attestation(&doc.instance_info, &self.root_ca_pem)
            .context("NSM attestation verification failed")?;
        debug!(module_id = %report.module_id, "NSM attestation document verified");

        let ak_digest: [u8; 32] = Sha256::digest(&doc.ak_public).into();
        if report.user_data.as_deref() != Some(ak_digest.as_slice()) {
            bail!("NSM document does not attest the document's attestation key");
        }
        if report.nonce.as_deref() != Some(extra_data.as_slice()) {
            bail!("NSM document does not bind the quote's qualifying data");
        }

        decode_ak(doc)
    }
}

pub fn issuer(open_device: OpenDeviceFn) -> Issuer {
    Issuer::new(
        PlatformId::Aws,
        open_device,
        Arc::new(NsmInstanceInfo),
        DEFAULT_PCR_SELECTION,
    )
}

pub fn validator(expected_pcrs: TrustedPcrs, root_ca_pem: impl Into<String>) -> Validator {
    Validator::new(
        PlatformId::Aws,
        expected_pcrs,
        Arc::new(TrustPolicy::Aws(AwsTrust::new(root_ca_pem))),
    )
}
