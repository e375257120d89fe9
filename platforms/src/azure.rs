// SPDX-License-Identifier: Apache-2.0

//! Azure confidential VMs.
//!
//! The vTPM attestation key on Azure CVMs is tied to the SEV-SNP report
//! through the runtime data of the HCL. Verifying that link is not wired up
//! yet, so the validator currently accepts the embedded key and relies on
//! the PCR measurements alone.

use std::sync::Arc;

use anyhow::Result;
use atls::PlatformId;
use tpm::OpenDeviceFn;
use vtpm_attest::{
    AttestationDocument, EmptyInstanceInfo, Issuer, TrustedPcrs, Validator, AZURE_PCR_SELECTION,
};

use crate::TrustPolicy;

pub fn issuer(open_device: OpenDeviceFn) -> Issuer {
    Issuer::new(
        PlatformId::Azure,
        open_device,
        Arc::new(EmptyInstanceInfo),
        AZURE_PCR_SELECTION,
    )
}

pub fn validator(expected_pcrs: TrustedPcrs) -> Validator {
    Validator::new(
        PlatformId::Azure,
        expected_pcrs,
        Arc::new(TrustPolicy::Azure),
    )
}

/// Confirm the document comes from a confidential VM.
///
/// TODO(azure): verify the SEV-SNP report from the document's instance info
/// and its binding to the attestation key.
pub(crate) fn validate_cvm(_doc: &AttestationDocument) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atls::{Issuer as _, Validator as _};
    use tpm::sim::SimDevice;

    #[test]
    fn azure_roundtrip_uses_azure_selection() {
        let open: OpenDeviceFn = Arc::new(|| Ok(Box::new(SimDevice::new()?)));
        let doc_bytes = issuer(open).issue(b"key hash", b"nonce").unwrap();

        let doc: AttestationDocument = serde_json::from_slice(&doc_bytes).unwrap();
        let quote = doc.sha256_quote().unwrap();
        let quoted: Vec<u32> = quote.pcr_values.iter().map(|p| p.index).collect();
        assert_eq!(quoted, AZURE_PCR_SELECTION.to_vec());

        validator(TrustedPcrs::new())
            .validate(&doc_bytes, b"nonce")
            .unwrap();
    }
}
