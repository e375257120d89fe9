// SPDX-License-Identifier: Apache-2.0

//! NSM attestation document verification.

use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use p384::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use rustls_pki_types::{CertificateDer, UnixTime};
use sha2::{Digest, Sha384};
use tracing::debug;
use webpki::EndEntityCert;
use x509_parser::prelude::*;

use crate::{AttestationDocument, CoseSign1};

/// Verified NSM attestation report
#[derive(Debug, Clone)]
pub struct NsmVerifiedReport {
    /// Module ID
    pub module_id: String,
    /// Digest algorithm
    pub digest: String,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: u64,
    /// PCR values
    pub pcrs: std::collections::BTreeMap<u16, Vec<u8>>,
    /// User data from attestation
    pub user_data: Option<Vec<u8>>,
    /// Nonce from attestation
    pub nonce: Option<Vec<u8>>,
    /// Public key from attestation
    pub public_key: Option<Vec<u8>>,
}

/// Verify an NSM attestation document against the given root CA.
pub fn verify_attestation(cose_sign1_bytes: &[u8], root_ca_pem: &str) -> Result<NsmVerifiedReport> {
    verify_attestation_at(cose_sign1_bytes, root_ca_pem, None)
}

/// Like [`verify_attestation`] but with an overridable validation time.
pub fn verify_attestation_at(
    cose_sign1_bytes: &[u8],
    root_ca_pem: &str,
    now: Option<SystemTime>,
) -> Result<NsmVerifiedReport> {
    let cose = CoseSign1::from_bytes(cose_sign1_bytes).context("failed to parse COSE Sign1")?;
    let alg = cose.algorithm().context("failed to get algorithm")?;
    if alg != -35 {
        bail!("unsupported COSE algorithm: {alg}, expected -35 (ES384)");
    }
    let doc = AttestationDocument::from_cbor(&cose.payload)
        .context("failed to parse attestation document")?;
    verify_certificate_chain(&doc, root_ca_pem, now)
        .context("certificate chain verification failed")?;
    verify_cose_signature(&cose, &doc.certificate).context("COSE signature verification failed")?;

    Ok(NsmVerifiedReport {
        module_id: doc.module_id,
        digest: doc.digest,
        timestamp: doc.timestamp,
        pcrs: doc.pcrs,
        user_data: doc.user_data,
        nonce: doc.nonce,
        public_key: doc.public_key,
    })
}

/// Verify the certificate chain from the attestation document.
///
/// The cabundle carries `[ROOT, INTERM_1, ..., INTERM_N]`; the embedded root
/// is ignored in favor of the verifier-provided one.
fn verify_certificate_chain(
    doc: &AttestationDocument,
    root_ca_pem: &str,
    now_override: Option<SystemTime>,
) -> Result<()> {
    let root_ca_der = parse_pem_cert(root_ca_pem).context("failed to parse root CA PEM")?;

    let intermediates: Vec<CertificateDer<'static>> = doc
        .cabundle
        .iter()
        .skip(1)
        .map(|der| CertificateDer::from(der.clone()))
        .collect();

    debug!(
        "certificate chain: 1 leaf + {} intermediates + 1 root",
        intermediates.len()
    );

    let leaf_cert_der = CertificateDer::from(doc.certificate.clone());
    let leaf_cert =
        EndEntityCert::try_from(&leaf_cert_der).context("failed to parse leaf certificate")?;

    let root_cert_der = CertificateDer::from(root_ca_der);
    let trust_anchor = webpki::anchor_from_trusted_cert(&root_cert_der)
        .context("failed to create trust anchor from root CA")?;

    let now = now_override.unwrap_or_else(SystemTime::now);
    let now = now
        .duration_since(std::time::UNIX_EPOCH)
        .context("failed to get current time")?;
    let time = UnixTime::since_unix_epoch(now);

    // Nitro Enclaves don't publish CRLs, so no revocation checking
    let trust_anchors = [trust_anchor];
    leaf_cert
        .verify_for_usage(
            webpki::ALL_VERIFICATION_ALGS,
            &trust_anchors,
            &intermediates,
            time,
            webpki::KeyUsage::client_auth(),
            None,
            None,
        )
        .context("chain does not lead to the trusted root")?;

    Ok(())
}

/// Verify the COSE signature using the leaf certificate's public key.
fn verify_cose_signature(cose: &CoseSign1, cert_der: &[u8]) -> Result<()> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).context("failed to parse signing certificate")?;

    let spki = cert.public_key();
    let verifying_key = VerifyingKey::from_sec1_bytes(spki.subject_public_key.data.as_ref())
        .context("failed to parse P-384 public key from certificate")?;

    let sig_structure = cose
        .sig_structure()
        .context("failed to build Sig_structure")?;
    let message_hash = Sha384::digest(&sig_structure);

    // P-384 signature is fixed-size r || s
    if cose.signature.len() != 96 {
        bail!(
            "invalid P-384 signature length: {} (expected 96)",
            cose.signature.len()
        );
    }
    let signature =
        Signature::from_slice(&cose.signature).context("failed to parse ECDSA signature")?;

    verifying_key
        .verify_prehash(&message_hash, &signature)
        .context("ECDSA signature verification failed")?;

    Ok(())
}

/// Parse a PEM certificate to DER
fn parse_pem_cert(pem_str: &str) -> Result<Vec<u8>> {
    let pem_block = ::pem::parse(pem_str).context("failed to parse PEM")?;
    if pem_block.tag() != "CERTIFICATE" {
        bail!("PEM is not a certificate: {}", pem_block.tag());
    }
    Ok(pem_block.into_contents())
}
