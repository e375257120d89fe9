// SPDX-License-Identifier: Apache-2.0

//! Attested TLS (aTLS) channel establishment.
//!
//! A server proves possession of trusted hardware by embedding a platform
//! attestation document into a self-signed certificate extension. The document
//! quotes the hash of the certificate's public key together with a nonce the
//! client transports in the TLS server-name field, so a successful handshake
//! implies the peer holding the session key is the attested machine.

mod cert;
mod client;
mod error;
mod nonce;
mod oids;
mod server;
mod traits;

pub mod fake;

pub use cert::{hash_public_key, issue_session_cert, SessionCert, CERT_VALIDITY_WINDOW};
pub use client::{
    build_client_config, build_client_config_with_nonce, build_unverified_client_config,
    AtlsClientConfig,
};
pub use error::AtlsError;
pub use nonce::{decode_nonce_channel, encode_nonce_channel, generate_nonce, NONCE_LEN};
pub use oids::{
    PlatformId, ATTESTATION_OID_ARC, AWS_ATTESTATION, AZURE_ATTESTATION, DUMMY_ATTESTATION,
    GCP_ATTESTATION, GCP_NON_CVM_ATTESTATION, QEMU_ATTESTATION,
};
pub use server::{build_server_config, AttestedCertResolver};
pub use traits::{CertExt, Issuer, Validator};
