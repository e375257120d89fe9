// SPDX-License-Identifier: Apache-2.0

//! QEMU: development platform without a hardware trust anchor.
//!
//! Documents are issued and structurally validated like on any other
//! platform, but the attestation key is taken from the document itself, so
//! trust reduces to the expected PCR values.

use std::sync::Arc;

use tpm::OpenDeviceFn;
use vtpm_attest::{
    EmptyInstanceInfo, Issuer, TrustedPcrs, Validator, DEFAULT_PCR_SELECTION,
};

use crate::TrustPolicy;
use atls::PlatformId;

pub fn issuer(open_device: OpenDeviceFn) -> Issuer {
    Issuer::new(
        PlatformId::Qemu,
        open_device,
        Arc::new(EmptyInstanceInfo),
        DEFAULT_PCR_SELECTION,
    )
}

pub fn validator(expected_pcrs: TrustedPcrs) -> Validator {
    Validator::new(
        PlatformId::Qemu,
        expected_pcrs,
        Arc::new(TrustPolicy::Qemu),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use atls::{Issuer as _, Validator as _};
    use tpm::sim::SimDevice;

    fn sim_open() -> OpenDeviceFn {
        Arc::new(|| Ok(Box::new(SimDevice::new()?)))
    }

    #[test]
    fn issue_validate_roundtrip() {
        let issuer = issuer(sim_open());
        let doc = issuer.issue(b"key hash", &[1, 2, 3, 4]).unwrap();
        let user_data = validator(TrustedPcrs::new())
            .validate(&doc, &[1, 2, 3, 4])
            .unwrap();
        assert_eq!(user_data, b"key hash");
    }

    #[test]
    fn nonce_mismatch_rejected() {
        let issuer = issuer(sim_open());
        let doc = issuer.issue(b"key hash", &[1, 2, 3, 4]).unwrap();
        let err = validator(TrustedPcrs::new())
            .validate(&doc, &[4, 3, 2, 1])
            .unwrap_err();
        assert!(err.to_string().contains("nonce mismatch"), "got {err:#}");
    }
}
