// SPDX-License-Identifier: Apache-2.0

//! Attestation document issuance.

use std::sync::Arc;

use anyhow::{Context, Result};
use atls::PlatformId;
use sha2::{Digest, Sha256};
use tpm::{OpenDeviceFn, PcrSelection, TpmDevice, TpmSession};
use tracing::info;

use crate::doc::{AttestationDocument, Quote};
use crate::make_extra_data;

/// Platform-specific instance information embedded in the document.
///
/// On GCP this identifies the instance so the validator can fetch the
/// shielded-VM attestation key; on AWS it carries an NSM attestation
/// document over the TPM attestation key.
pub trait InstanceInfoSource: Send + Sync {
    fn instance_info(&self, device: &mut dyn TpmDevice, extra_data: &[u8; 32]) -> Result<Vec<u8>>;
}

/// For platforms whose trust backend needs no instance information.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyInstanceInfo;

impl InstanceInfoSource for EmptyInstanceInfo {
    fn instance_info(&self, _device: &mut dyn TpmDevice, _extra_data: &[u8; 32]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Issues vTPM attestation documents.
pub struct Issuer {
    platform: PlatformId,
    open_device: OpenDeviceFn,
    instance_info: Arc<dyn InstanceInfoSource>,
    pcr_selection: Vec<u32>,
}

impl Issuer {
    pub fn new(
        platform: PlatformId,
        open_device: OpenDeviceFn,
        instance_info: Arc<dyn InstanceInfoSource>,
        pcr_selection: &[u32],
    ) -> Self {
        Self {
            platform,
            open_device,
            instance_info,
            pcr_selection: pcr_selection.to_vec(),
        }
    }
}

impl atls::Issuer for Issuer {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    fn issue(&self, user_data: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        let extra_data = make_extra_data(user_data, nonce);

        let mut session = TpmSession::open(&self.open_device)?;
        let ak_public = session.ak_public().context("failed to read attestation key")?;

        let mut quotes = Vec::new();
        for bank in session.banks() {
            let selection = PcrSelection::new(&bank, &self.pcr_selection);
            let raw = session
                .quote(&extra_data, &selection)
                .with_context(|| format!("failed to quote {bank} bank"))?;
            quotes.push(Quote {
                bank,
                pcr_values: raw.pcr_values,
                message: raw.message,
                signature: raw.signature,
            });
        }

        let instance_info = self
            .instance_info
            .instance_info(&mut *session, &extra_data)
            .context("failed to collect instance info")?;

        let user_data_digest: [u8; 32] = Sha256::digest(user_data).into();
        let user_data_signature = session
            .sign(&user_data_digest)
            .context("failed to sign user data")?;

        let doc = AttestationDocument {
            quotes,
            ak_public,
            instance_info,
            user_data: user_data.to_vec(),
            user_data_signature,
        };

        info!(platform = %self.platform, quotes = doc.quotes.len(), "issued attestation document");
        serde_json::to_vec(&doc).context("failed to marshal attestation document")
    }
}
