// SPDX-License-Identifier: Apache-2.0

//! vTPM-based attestation document issuance and validation.
//!
//! An issuer produces a JSON document containing TPM quotes over the
//! configured PCRs, the attestation key, platform-specific instance
//! information, and a signature over the caller's user data. A validator
//! checks the whole chain against a platform trust backend and a set of
//! expected PCR measurements.

use sha2::{Digest, Sha256};

mod doc;
mod init;
mod issue;
mod measurements;
mod validate;

pub use doc::{AttestationDocument, Quote};
pub use init::mark_node_as_initialized;
pub use issue::{EmptyInstanceInfo, InstanceInfoSource, Issuer};
pub use measurements::{
    trusted_pcrs_from_device, Measurement, TrustedPcrs, AZURE_PCR_SELECTION,
    DEFAULT_PCR_SELECTION, GCP_PCR_SELECTION, PCR_INDEX_CLUSTER_ID, PCR_INDEX_OWNER_ID,
};
pub use validate::{TrustBackend, ValidationError, Validator};

/// Qualifying data bound into every quote: a hash over the user data and the
/// peer's nonce, so the quote commits to both.
pub fn make_extra_data(user_data: &[u8], nonce: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(user_data);
    hasher.update(nonce);
    hasher.finalize().into()
}
