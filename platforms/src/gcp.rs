// SPDX-License-Identifier: Apache-2.0

//! GCP confidential and shielded VMs.
//!
//! The issuer embeds the instance's identity (project, zone, name) in the
//! document. The validator uses that identity to fetch the shielded-VM
//! signing key from the Compute API and trusts only quotes signed by it, so
//! the document's embedded key never matters.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use atls::PlatformId;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use tpm::{OpenDeviceFn, TpmDevice};
use tracing::debug;
use vtpm_attest::{
    AttestationDocument, InstanceInfoSource, Issuer, TrustedPcrs, Validator, GCP_PCR_SELECTION,
};

use crate::TrustPolicy;

const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Identity of a GCP instance, sufficient to look it up in the Compute API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpInstanceInfo {
    pub project_id: String,
    pub zone: String,
    pub instance_name: String,
}

/// Collects the instance identity from the metadata server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataInstanceInfo;

impl MetadataInstanceInfo {
    fn query(&self, path: &str) -> Result<String> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(format!("{METADATA_BASE}/{path}"))
            .header("Metadata-Flavor", "Google")
            .send()
            .with_context(|| format!("metadata query {path} failed"))?;
        if !response.status().is_success() {
            bail!("metadata query {path} returned {}", response.status());
        }
        Ok(response.text()?)
    }
}

impl InstanceInfoSource for MetadataInstanceInfo {
    fn instance_info(&self, _device: &mut dyn TpmDevice, _extra_data: &[u8; 32]) -> Result<Vec<u8>> {
        let zone_path = self.query("instance/zone")?;
        // zone comes back as projects/<num>/zones/<zone>
        let zone = zone_path
            .rsplit('/')
            .next()
            .unwrap_or(&zone_path)
            .to_string();
        let info = GcpInstanceInfo {
            project_id: self.query("project/project-id")?,
            zone,
            instance_name: self.query("instance/name")?,
        };
        serde_json::to_vec(&info).context("failed to marshal instance info")
    }
}

/// Fetches the shielded-VM signing key for an instance.
///
/// Injectable so validation can be tested without the Compute API.
pub trait GcpIdentityClient: Send + Sync {
    /// PEM-encoded public signing key of the instance's shielded identity.
    fn signing_key_pem(&self, info: &GcpInstanceInfo) -> Result<String>;
}

/// Talks to the Compute `getShieldedInstanceIdentity` endpoint with a token
/// from the metadata server.
pub struct ComputeIdentityClient;

impl GcpIdentityClient for ComputeIdentityClient {
    fn signing_key_pem(&self, info: &GcpInstanceInfo) -> Result<String> {
        #[derive(Deserialize)]
        struct Token {
            access_token: String,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Identity {
            signing_key: IdentityKey,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct IdentityKey {
            ek_pub: String,
        }

        let client = reqwest::blocking::Client::new();
        let token: Token = client
            .get(format!(
                "{METADATA_BASE}/instance/service-accounts/default/token"
            ))
            .header("Metadata-Flavor", "Google")
            .send()
            .context("failed to fetch access token")?
            .json()
            .context("failed to decode access token")?;

        let url = format!(
            "https://compute.googleapis.com/compute/v1/projects/{}/zones/{}/instances/{}/getShieldedInstanceIdentity",
            info.project_id, info.zone, info.instance_name
        );
        let response = client
            .get(url)
            .bearer_auth(token.access_token)
            .send()
            .context("failed to fetch shielded instance identity")?;
        if !response.status().is_success() {
            bail!(
                "shielded instance identity request returned {}",
                response.status()
            );
        }
        let identity: Identity = response
            .json()
            .context("failed to decode shielded instance identity")?;
        Ok(identity.signing_key.ek_pub)
    }
}

/// Trusts the shielded-VM signing key named by the document's instance info.
pub struct GcpTrust {
    client: Arc<dyn GcpIdentityClient>,
}

impl GcpTrust {
    pub fn new(client: Arc<dyn GcpIdentityClient>) -> Self {
        Self { client }
    }

    pub(crate) fn trusted_key(&self, doc: &AttestationDocument) -> Result<RsaPublicKey> {
        let info: GcpInstanceInfo = serde_json::from_slice(&doc.instance_info)
            .context("failed to parse GCP instance info")?;
        debug!(instance = %info.instance_name, zone = %info.zone, "fetching shielded identity");
        let pem = self.client.signing_key_pem(&info)?;
        RsaPublicKey::from_public_key_pem(&pem).context("failed to decode shielded signing key")
    }
}

pub fn issuer(open_device: OpenDeviceFn) -> Issuer {
    Issuer::new(
        PlatformId::Gcp,
        open_device,
        Arc::new(MetadataInstanceInfo),
        GCP_PCR_SELECTION,
    )
}

pub fn validator(expected_pcrs: TrustedPcrs, client: Arc<dyn GcpIdentityClient>) -> Validator {
    Validator::new(
        PlatformId::Gcp,
        expected_pcrs,
        Arc::new(TrustPolicy::Gcp(GcpTrust::new(client))),
    )
}

/// Issuer for GCP instances without confidential computing. Documents carry
/// the same instance identity and PCR selection as the CVM variant.
pub fn non_cvm_issuer(open_device: OpenDeviceFn) -> Issuer {
    Issuer::new(
        PlatformId::GcpNonCvm,
        open_device,
        Arc::new(MetadataInstanceInfo),
        GCP_PCR_SELECTION,
    )
}

/// Validator for GCP instances without confidential computing. Trusts the
/// document's embedded attestation key as-is; PCR policy is the only check.
pub fn non_cvm_validator(expected_pcrs: TrustedPcrs) -> Validator {
    Validator::new(
        PlatformId::GcpNonCvm,
        expected_pcrs,
        Arc::new(TrustPolicy::GcpNonCvm),
    )
}
