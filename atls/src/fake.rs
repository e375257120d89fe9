// SPDX-License-Identifier: Apache-2.0

//! Software-only issuer/validator pair for the Dummy platform.
//!
//! The fake document is a JSON passthrough of user data and nonce with no
//! hardware involvement. It exists so the channel layer can be exercised in
//! tests and on machines without a TPM.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;

use crate::oids::PlatformId;
use crate::traits::{Issuer, Validator};

#[derive(Debug, Serialize, Deserialize)]
struct FakeAttestationDoc {
    #[serde(with = "hex_bytes")]
    user_data: Vec<u8>,
    #[serde(with = "hex_bytes")]
    nonce: Vec<u8>,
}

/// Issues unsigned passthrough documents.
#[derive(Debug, Clone, Copy)]
pub struct FakeIssuer {
    platform: PlatformId,
}

impl FakeIssuer {
    pub fn new(platform: PlatformId) -> Self {
        Self { platform }
    }
}

impl Default for FakeIssuer {
    fn default() -> Self {
        Self::new(PlatformId::Dummy)
    }
}

impl Issuer for FakeIssuer {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    fn issue(&self, user_data: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        let doc = FakeAttestationDoc {
            user_data: user_data.to_vec(),
            nonce: nonce.to_vec(),
        };
        serde_json::to_vec(&doc).context("failed to marshal fake attestation document")
    }
}

/// Accepts passthrough documents whose nonce matches.
#[derive(Debug, Clone, Copy)]
pub struct FakeValidator {
    platform: PlatformId,
}

impl FakeValidator {
    pub fn new(platform: PlatformId) -> Self {
        Self { platform }
    }
}

impl Default for FakeValidator {
    fn default() -> Self {
        Self::new(PlatformId::Dummy)
    }
}

impl Validator for FakeValidator {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    fn validate(&self, document: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        let doc: FakeAttestationDoc = serde_json::from_slice(document)
            .context("failed to unmarshal fake attestation document")?;
        if doc.nonce != nonce {
            bail!(
                "invalid nonce: expected {}, got {}",
                hex::encode(nonce),
                hex::encode(&doc.nonce)
            );
        }
        Ok(doc.user_data)
    }
}
