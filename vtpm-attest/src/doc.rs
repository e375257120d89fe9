// SPDX-License-Identifier: Apache-2.0

//! The attestation document format.

use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;
use tpm::PcrValue;

use crate::validate::ValidationError;

/// One TPM quote over a single PCR bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// PCR bank the quote covers (e.g. "sha256")
    pub bank: String,
    /// PCR values at the time of quote generation
    pub pcr_values: Vec<PcrValue>,
    /// TPMS_ATTEST structure
    #[serde(with = "hex_bytes")]
    pub message: Vec<u8>,
    /// TPMT_SIGNATURE over the message by the attestation key
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Attestation document exchanged between issuer and validator, JSON encoded
/// with hex byte fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationDocument {
    /// One quote per PCR bank the device maintains
    pub quotes: Vec<Quote>,
    /// Attestation key, DER-encoded SubjectPublicKeyInfo
    #[serde(with = "hex_bytes")]
    pub ak_public: Vec<u8>,
    /// Platform-specific material establishing trust in the attestation key
    #[serde(with = "hex_bytes")]
    pub instance_info: Vec<u8>,
    /// Caller-supplied data bound into the quotes
    #[serde(with = "hex_bytes")]
    pub user_data: Vec<u8>,
    /// PKCS#1 v1.5 signature over SHA-256(user_data) by the attestation key
    #[serde(with = "hex_bytes")]
    pub user_data_signature: Vec<u8>,
}

impl AttestationDocument {
    /// The first SHA-256 quote in document order. Any quote without PCR data
    /// makes the whole document invalid; the error distinguishes an empty
    /// document, a quote without PCR data, and a document quoting only other
    /// banks.
    pub fn sha256_quote(&self) -> Result<&Quote, ValidationError> {
        if self.quotes.is_empty() {
            return Err(ValidationError::MissingQuotes);
        }
        for quote in &self.quotes {
            if quote.pcr_values.is_empty() {
                return Err(ValidationError::NoPcrData);
            }
            if quote.bank == "sha256" {
                return Ok(quote);
            }
        }
        Err(ValidationError::NoSha256Quote)
    }
}
