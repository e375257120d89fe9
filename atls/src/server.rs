// SPDX-License-Identifier: Apache-2.0

//! Server-side channel establishment.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, warn};

use crate::cert::issue_session_cert;
use crate::nonce::decode_nonce_channel;
use crate::traits::Issuer;

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Issues a fresh attested certificate for every ClientHello.
///
/// The nonce is recovered from the server-name field, so each handshake gets
/// its own session key and attestation document. A handshake without a server
/// name, or one whose issuance fails, is aborted.
pub struct AttestedCertResolver {
    issuer: Arc<dyn Issuer>,
}

impl AttestedCertResolver {
    pub fn new(issuer: Arc<dyn Issuer>) -> Self {
        Self { issuer }
    }

    fn session_key(&self, server_name: &str) -> Result<CertifiedKey> {
        let nonce = decode_nonce_channel(server_name)?;
        let session = issue_session_cert(self.issuer.as_ref(), &nonce)?;
        let key_der = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(session.key_der));
        let signing_key = rustls::crypto::ring::sign::any_ecdsa_type(&key_der)
            .map_err(|err| anyhow::anyhow!("unusable session key: {err}"))?;
        Ok(CertifiedKey::new(
            vec![CertificateDer::from(session.cert_der)],
            signing_key,
        ))
    }
}

impl fmt::Debug for AttestedCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestedCertResolver")
            .field("platform", &self.issuer.platform())
            .finish()
    }
}

impl ResolvesServerCert for AttestedCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(name) = client_hello.server_name() else {
            warn!("client hello carries no server name, cannot recover attestation nonce");
            return None;
        };
        match self.session_key(name) {
            Ok(certified) => {
                debug!(platform = %self.issuer.platform(), "issued attested session certificate");
                Some(Arc::new(certified))
            }
            Err(err) => {
                warn!("failed to issue attested certificate: {err:#}");
                None
            }
        }
    }
}

/// Build a TLS server config that attests itself to connecting clients.
pub fn build_server_config(issuer: Arc<dyn Issuer>) -> Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .context("failed to select protocol versions")?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(AttestedCertResolver::new(issuer)));
    Ok(Arc::new(config))
}
