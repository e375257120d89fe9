// SPDX-License-Identifier: Apache-2.0

//! Session certificate issuance.
//!
//! Every handshake gets a fresh self-signed certificate: an ephemeral P-256
//! key whose SPKI hash is quoted as the attestation user data, with the
//! resulting document embedded under the issuer's platform OID.

use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, KeyUsagePurpose,
    PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use x509_parser::der_parser::Oid;
use x509_parser::prelude::X509Certificate;

use crate::error::AtlsError;
use crate::traits::{CertExt, Issuer};

/// Certificates are valid from now minus this window to now plus it, to
/// tolerate clock skew between peers.
pub const CERT_VALIDITY_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

const COMMON_NAME: &str = "aTLS";

/// An ephemeral certificate and its private key, both DER encoded.
pub struct SessionCert {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

/// SHA-256 over a DER-encoded SubjectPublicKeyInfo.
///
/// This is the binding between the attestation document and the TLS session:
/// the issuer quotes this hash as user data, and the validator recomputes it
/// from the presented leaf certificate.
pub fn hash_public_key(spki_der: &[u8]) -> [u8; 32] {
    Sha256::digest(spki_der).into()
}

/// Issue a fresh self-signed session certificate carrying an attestation
/// document bound to `nonce`.
pub fn issue_session_cert(issuer: &dyn Issuer, nonce: &[u8]) -> Result<SessionCert> {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .context("failed to generate session key")?;
    let user_data = hash_public_key(&key.public_key_der());

    let document = issuer
        .issue(&user_data, nonce)
        .context("failed to issue attestation statement")?;

    let now = SystemTime::now();
    let mut params = CertificateParams::new(vec![])?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, COMMON_NAME);
    params.distinguished_name = dn;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.not_before = (now - CERT_VALIDITY_WINDOW).into();
    params.not_after = (now + CERT_VALIDITY_WINDOW).into();
    add_ext(&mut params, issuer.platform().oid(), &document);

    let cert = params
        .self_signed(&key)
        .context("failed to self-sign session certificate")?;

    Ok(SessionCert {
        cert_der: cert.der().to_vec(),
        key_der: key.serialize_der(),
    })
}

fn add_ext(params: &mut CertificateParams, oid: &[u64], content: impl AsRef<[u8]>) {
    let content = yasna::construct_der(|writer| {
        writer.write_bytes(content.as_ref());
    });
    params
        .custom_extensions
        .push(CustomExtension::from_oid_content(oid, content));
}

impl CertExt for rcgen::Certificate {
    fn get_extension_der(&self, oid: &[u64]) -> Result<Option<Vec<u8>>> {
        let found = self
            .params()
            .custom_extensions
            .iter()
            .find(|ext| ext.oid_components().collect::<Vec<_>>() == oid)
            .map(|ext| ext.content().to_vec());
        Ok(found)
    }
}

impl CertExt for X509Certificate<'_> {
    fn get_extension_der(&self, oid: &[u64]) -> Result<Option<Vec<u8>>> {
        let oid = Oid::from(oid).or(Err(anyhow!("invalid oid")))?;
        let found = self
            .get_extension_unique(&oid)
            .context("failed to decode extension")?
            .map(|ext| ext.value.to_vec());
        Ok(found)
    }
}

/// Parse a leaf certificate and confirm it is self-signed.
pub(crate) fn parse_self_signed(cert_der: &[u8]) -> Result<X509Certificate<'_>, AtlsError> {
    use x509_parser::prelude::FromDer;

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|err| AtlsError::CertParse(err.to_string()))?;
    cert.verify_signature(None)
        .map_err(|err| AtlsError::NotSelfSigned(err.to_string()))?;
    Ok(cert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeIssuer;
    use crate::oids::PlatformId;
    use x509_parser::prelude::FromDer;

    #[test]
    fn issued_cert_carries_document_under_platform_oid() {
        let issuer = FakeIssuer::new(PlatformId::Dummy);
        let nonce = [7u8; 32];
        let session = issue_session_cert(&issuer, &nonce).unwrap();

        let (_, cert) = X509Certificate::from_der(&session.cert_der).unwrap();
        let doc = cert
            .get_extension_bytes(PlatformId::Dummy.oid())
            .unwrap()
            .expect("attestation extension missing");
        assert!(!doc.is_empty());
        assert!(cert
            .get_extension_bytes(PlatformId::Aws.oid())
            .unwrap()
            .is_none());
    }

    #[test]
    fn issued_cert_is_self_signed() {
        let issuer = FakeIssuer::new(PlatformId::Dummy);
        let session = issue_session_cert(&issuer, &[1, 2, 3]).unwrap();
        parse_self_signed(&session.cert_der).unwrap();
    }

    #[test]
    fn user_data_is_spki_hash() {
        let issuer = FakeIssuer::new(PlatformId::Dummy);
        let nonce = [9u8; 32];
        let session = issue_session_cert(&issuer, &nonce).unwrap();

        let (_, cert) = X509Certificate::from_der(&session.cert_der).unwrap();
        let doc = cert
            .get_extension_bytes(PlatformId::Dummy.oid())
            .unwrap()
            .unwrap();
        let validator = crate::fake::FakeValidator::new(PlatformId::Dummy);
        let user_data = crate::Validator::validate(&validator, &doc, &nonce).unwrap();
        assert_eq!(user_data, hash_public_key(cert.public_key().raw).to_vec());
    }
}
