// SPDX-License-Identifier: Apache-2.0

//! Traits at the seam between the channel layer and the attestation engines.

use anyhow::Result;

use crate::oids::PlatformId;

/// Issues attestation documents binding user data and a nonce to the
/// platform's hardware.
pub trait Issuer: Send + Sync {
    /// The platform this issuer runs on, which keys the certificate extension.
    fn platform(&self) -> PlatformId;

    /// Produce a serialized attestation document quoting `user_data` and
    /// `nonce`.
    fn issue(&self, user_data: &[u8], nonce: &[u8]) -> Result<Vec<u8>>;
}

/// Validates attestation documents issued on one platform.
pub trait Validator: Send + Sync {
    /// The platform whose documents this validator accepts.
    fn platform(&self) -> PlatformId;

    /// Validate a serialized attestation document against `nonce` and return
    /// the attested user data.
    fn validate(&self, document: &[u8], nonce: &[u8]) -> Result<Vec<u8>>;
}

/// Types that custom certificate extensions can be read from.
pub trait CertExt {
    /// Get the raw DER content of the extension with the given OID.
    fn get_extension_der(&self, oid: &[u64]) -> Result<Option<Vec<u8>>>;

    /// Get the extension payload, unwrapping the DER octet-string envelope.
    fn get_extension_bytes(&self, oid: &[u64]) -> Result<Option<Vec<u8>>> {
        let Some(der) = self.get_extension_der(oid)? else {
            return Ok(None);
        };
        let bytes = yasna::parse_der(&der, |reader| reader.read_bytes())?;
        Ok(Some(bytes))
    }
}
