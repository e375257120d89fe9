// SPDX-License-Identifier: Apache-2.0

//! Attestation document validation.

use std::sync::Arc;

use anyhow::Result;
use atls::PlatformId;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tpm::RawQuote;
use tracing::debug;

use crate::doc::AttestationDocument;
use crate::make_extra_data;
use crate::measurements::TrustedPcrs;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid attestation document: {0}")]
    InvalidDocument(String),
    #[error("attestation document contains no quotes")]
    MissingQuotes,
    #[error("no quote contains PCR data")]
    NoPcrData,
    #[error("no SHA-256 quote found")]
    NoSha256Quote,
    #[error("untrusted attestation key: {0}")]
    UntrustedKey(String),
    #[error("quote verification failed: {0}")]
    Quote(String),
    #[error("nonce mismatch")]
    NonceMismatch,
    #[error("invalid user data signature: {0}")]
    Signature(String),
    #[error("untrusted PCR value at PCR index {0}")]
    PcrMismatch(u32),
    #[error("confidential-VM validation failed: {0}")]
    Cvm(String),
}

/// Platform-specific trust decisions during validation.
///
/// `trusted_key` decides which RSA key is trusted to have signed the quote,
/// based on the document's instance info; `validate_cvm` runs any additional
/// platform checks after the quote itself verified.
pub trait TrustBackend: Send + Sync {
    fn trusted_key(
        &self,
        doc: &AttestationDocument,
        extra_data: &[u8; 32],
    ) -> Result<RsaPublicKey>;

    fn validate_cvm(&self, _doc: &AttestationDocument) -> Result<()> {
        Ok(())
    }
}

/// Validates vTPM attestation documents.
pub struct Validator {
    platform: PlatformId,
    expected_pcrs: TrustedPcrs,
    trust: Arc<dyn TrustBackend>,
}

impl Validator {
    pub fn new(platform: PlatformId, expected_pcrs: TrustedPcrs, trust: Arc<dyn TrustBackend>) -> Self {
        Self {
            platform,
            expected_pcrs,
            trust,
        }
    }

    fn validate_document(
        &self,
        document: &[u8],
        nonce: &[u8],
    ) -> Result<Vec<u8>, ValidationError> {
        let doc: AttestationDocument = serde_json::from_slice(document)
            .map_err(|err| ValidationError::InvalidDocument(err.to_string()))?;

        let quote = doc.sha256_quote()?;

        let extra_data = make_extra_data(&doc.user_data, nonce);
        let ak_public = self
            .trust
            .trusted_key(&doc, &extra_data)
            .map_err(|err| ValidationError::UntrustedKey(format!("{err:#}")))?;

        let raw = RawQuote {
            message: quote.message.clone(),
            signature: quote.signature.clone(),
            pcr_values: quote.pcr_values.clone(),
        };
        let attest = tpm::attest::verify_quote(&raw, &ak_public)
            .map_err(|err| ValidationError::Quote(format!("{err:#}")))?;

        if attest.extra_data != extra_data {
            return Err(ValidationError::NonceMismatch);
        }

        let user_data_digest = Sha256::digest(&doc.user_data);
        ak_public
            .verify(
                rsa::Pkcs1v15Sign::new::<Sha256>(),
                &user_data_digest,
                &doc.user_data_signature,
            )
            .map_err(|err| ValidationError::Signature(err.to_string()))?;

        for (index, measurement) in &self.expected_pcrs {
            let actual = quote
                .pcr_values
                .iter()
                .find(|pcr| pcr.index == *index)
                .ok_or(ValidationError::PcrMismatch(*index))?;
            if actual.value != measurement.expected {
                return Err(ValidationError::PcrMismatch(*index));
            }
        }

        self.trust
            .validate_cvm(&doc)
            .map_err(|err| ValidationError::Cvm(format!("{err:#}")))?;

        debug!(platform = %self.platform, "attestation document validated");
        Ok(doc.user_data)
    }
}

impl atls::Validator for Validator {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    fn validate(&self, document: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        Ok(self.validate_document(document, nonce)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{EmptyInstanceInfo, Issuer};
    use crate::measurements::{Measurement, DEFAULT_PCR_SELECTION};
    use atls::Issuer as _;
    use rsa::pkcs8::DecodePublicKey;
    use tpm::sim::SimDevice;
    use tpm::OpenDeviceFn;

    /// Trusts whatever key the document carries. Only suitable for tests;
    /// real backends derive trust from the platform.
    struct SelfTrust;

    impl TrustBackend for SelfTrust {
        fn trusted_key(
            &self,
            doc: &AttestationDocument,
            _extra_data: &[u8; 32],
        ) -> Result<RsaPublicKey> {
            Ok(RsaPublicKey::from_public_key_der(&doc.ak_public)?)
        }
    }

    fn sim_open() -> OpenDeviceFn {
        Arc::new(|| Ok(Box::new(SimDevice::new()?)))
    }

    fn issuer(open: &OpenDeviceFn) -> Issuer {
        Issuer::new(
            PlatformId::Qemu,
            open.clone(),
            Arc::new(EmptyInstanceInfo),
            DEFAULT_PCR_SELECTION,
        )
    }

    fn validator(expected_pcrs: TrustedPcrs) -> Validator {
        Validator::new(PlatformId::Qemu, expected_pcrs, Arc::new(SelfTrust))
    }

    #[test]
    fn issue_validate_roundtrip() {
        let open = sim_open();
        let doc = issuer(&open).issue(b"some user data", b"the nonce").unwrap();
        let user_data = validator(TrustedPcrs::new())
            .validate_document(&doc, b"the nonce")
            .unwrap();
        assert_eq!(user_data, b"some user data");
    }

    #[test]
    fn wrong_nonce_rejected() {
        let open = sim_open();
        let doc = issuer(&open).issue(b"data", &[1, 2, 3, 4]).unwrap();
        let err = validator(TrustedPcrs::new())
            .validate_document(&doc, &[4, 3, 2, 1])
            .unwrap_err();
        assert!(matches!(err, ValidationError::NonceMismatch), "got {err:?}");
    }

    #[test]
    fn tampered_user_data_rejected() {
        let open = sim_open();
        let doc = issuer(&open).issue(b"data", b"nonce").unwrap();
        let mut parsed: AttestationDocument = serde_json::from_slice(&doc).unwrap();
        parsed.user_data = b"evil".to_vec();
        let doc = serde_json::to_vec(&parsed).unwrap();
        // extra_data no longer matches the quoted value
        let err = validator(TrustedPcrs::new())
            .validate_document(&doc, b"nonce")
            .unwrap_err();
        assert!(matches!(err, ValidationError::NonceMismatch), "got {err:?}");
    }

    #[test]
    fn tampered_signature_rejected() {
        let open = sim_open();
        let doc = issuer(&open).issue(b"data", b"nonce").unwrap();
        let mut parsed: AttestationDocument = serde_json::from_slice(&doc).unwrap();
        parsed.user_data_signature[0] ^= 0xff;
        let doc = serde_json::to_vec(&parsed).unwrap();
        let err = validator(TrustedPcrs::new())
            .validate_document(&doc, b"nonce")
            .unwrap_err();
        assert!(matches!(err, ValidationError::Signature(_)), "got {err:?}");
    }

    #[test]
    fn pcr_mismatch_names_the_index() {
        let open = sim_open();
        let doc = issuer(&open).issue(b"data", b"nonce").unwrap();

        let mut expected = TrustedPcrs::new();
        expected.insert(0, Measurement::new(vec![0u8; 32])); // matches reset state
        expected.insert(11, Measurement::new(vec![0xEEu8; 32]));

        let err = validator(expected)
            .validate_document(&doc, b"nonce")
            .unwrap_err();
        assert!(matches!(err, ValidationError::PcrMismatch(11)), "got {err:?}");
        assert_eq!(err.to_string(), "untrusted PCR value at PCR index 11");
    }

    #[test]
    fn unquoted_expected_pcr_rejected() {
        let open = sim_open();
        let doc = issuer(&open).issue(b"data", b"nonce").unwrap();
        let mut expected = TrustedPcrs::new();
        expected.insert(5, Measurement::new(vec![0u8; 32])); // not in DEFAULT_PCR_SELECTION
        let err = validator(expected)
            .validate_document(&doc, b"nonce")
            .unwrap_err();
        assert!(matches!(err, ValidationError::PcrMismatch(5)), "got {err:?}");
    }

    #[test]
    fn garbage_document_rejected() {
        let err = validator(TrustedPcrs::new())
            .validate_document(b"not json", b"nonce")
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDocument(_)), "got {err:?}");
    }

    #[test]
    fn sha1_only_document_rejected() {
        let open = sim_open();
        let doc = issuer(&open).issue(b"data", b"nonce").unwrap();
        let mut parsed: AttestationDocument = serde_json::from_slice(&doc).unwrap();
        parsed.quotes.retain(|q| q.bank == "sha1");
        let doc = serde_json::to_vec(&parsed).unwrap();
        let err = validator(TrustedPcrs::new())
            .validate_document(&doc, b"nonce")
            .unwrap_err();
        assert!(matches!(err, ValidationError::NoSha256Quote), "got {err:?}");
    }

    /// Delegates to one simulated device shared across sessions, so a test
    /// can observe state changes between opens.
    struct SharedSim(Arc<std::sync::Mutex<SimDevice>>);

    impl tpm::TpmDevice for SharedSim {
        fn banks(&self) -> Vec<String> {
            self.lock().banks()
        }
        fn ak_public(&mut self) -> Result<Vec<u8>> {
            self.lock().ak_public()
        }
        fn quote(&mut self, extra_data: &[u8], selection: &tpm::PcrSelection) -> Result<tpm::RawQuote> {
            self.lock().quote(extra_data, selection)
        }
        fn sign(&mut self, digest: &[u8; 32]) -> Result<Vec<u8>> {
            self.lock().sign(digest)
        }
        fn pcr_extend(&mut self, bank: &str, index: u32, digest: &[u8]) -> Result<()> {
            self.lock().pcr_extend(bank, index, digest)
        }
        fn read_pcrs(&mut self, selection: &tpm::PcrSelection) -> Result<Vec<tpm::PcrValue>> {
            self.lock().read_pcrs(selection)
        }
    }

    impl SharedSim {
        fn lock(&self) -> std::sync::MutexGuard<'_, SimDevice> {
            self.0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    fn shared_open() -> OpenDeviceFn {
        let device = Arc::new(std::sync::Mutex::new(SimDevice::new().unwrap()));
        Arc::new(move || Ok(Box::new(SharedSim(device.clone()))))
    }

    #[test]
    fn initialized_node_validates_against_snapshot() {
        use crate::init::mark_node_as_initialized;
        use crate::measurements::trusted_pcrs_from_device;

        let open = shared_open();
        mark_node_as_initialized(&open, b"owner", b"cluster").unwrap();

        let expected = trusted_pcrs_from_device(&open, DEFAULT_PCR_SELECTION).unwrap();
        assert_ne!(expected[&11].expected, vec![0u8; 32]);
        assert_ne!(expected[&12].expected, vec![0u8; 32]);

        let doc = issuer(&open).issue(b"data", b"nonce").unwrap();
        validator(expected).validate_document(&doc, b"nonce").unwrap();

        // a node initialized with a different owner fails PCR 11
        let other = shared_open();
        mark_node_as_initialized(&other, b"imposter", b"cluster").unwrap();
        let expected = trusted_pcrs_from_device(&open, DEFAULT_PCR_SELECTION).unwrap();
        let doc = issuer(&other).issue(b"data", b"nonce").unwrap();
        let err = validator(expected)
            .validate_document(&doc, b"nonce")
            .unwrap_err();
        assert!(matches!(err, ValidationError::PcrMismatch(11)), "got {err:?}");
    }
}
