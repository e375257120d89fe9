// SPDX-License-Identifier: Apache-2.0

//! OIDs used by the aTLS protocol.

use std::fmt;
use std::str::FromStr;

/// Reserved arc under which all attestation document extensions live.
pub const ATTESTATION_OID_ARC: &[u64] = &[1, 3, 9900];

/// OID for the Dummy (software-only) attestation extension.
pub const DUMMY_ATTESTATION: &[u64] = &[1, 3, 9900, 1];
/// OID for the AWS attestation extension.
pub const AWS_ATTESTATION: &[u64] = &[1, 3, 9900, 2];
/// OID for the GCP attestation extension.
pub const GCP_ATTESTATION: &[u64] = &[1, 3, 9900, 3];
/// OID for the Azure attestation extension.
pub const AZURE_ATTESTATION: &[u64] = &[1, 3, 9900, 4];
/// OID for the QEMU attestation extension.
pub const QEMU_ATTESTATION: &[u64] = &[1, 3, 9900, 5];
/// OID for the GCP non-confidential-VM attestation extension.
pub const GCP_NON_CVM_ATTESTATION: &[u64] = &[1, 3, 9900, 99];

/// The platform an attestation document was issued on.
///
/// Each platform owns one extension OID; validators are routed by matching
/// the certificate's extension OIDs against the configured platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformId {
    Dummy,
    Aws,
    Gcp,
    Azure,
    Qemu,
    GcpNonCvm,
}

impl PlatformId {
    /// The extension OID this platform embeds its document under.
    pub fn oid(&self) -> &'static [u64] {
        match self {
            PlatformId::Dummy => DUMMY_ATTESTATION,
            PlatformId::Aws => AWS_ATTESTATION,
            PlatformId::Gcp => GCP_ATTESTATION,
            PlatformId::Azure => AZURE_ATTESTATION,
            PlatformId::Qemu => QEMU_ATTESTATION,
            PlatformId::GcpNonCvm => GCP_NON_CVM_ATTESTATION,
        }
    }

    /// Look up the platform owning an OID, if it is one of ours.
    pub fn from_oid(oid: &[u64]) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.oid() == oid)
    }

    /// Whether an OID lives under the reserved attestation arc.
    pub fn is_attestation_oid(oid: &[u64]) -> bool {
        oid.len() > ATTESTATION_OID_ARC.len() && oid.starts_with(ATTESTATION_OID_ARC)
    }

    pub fn all() -> &'static [PlatformId] {
        &[
            PlatformId::Dummy,
            PlatformId::Aws,
            PlatformId::Gcp,
            PlatformId::Azure,
            PlatformId::Qemu,
            PlatformId::GcpNonCvm,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Dummy => "dummy",
            PlatformId::Aws => "aws",
            PlatformId::Gcp => "gcp",
            PlatformId::Azure => "azure",
            PlatformId::Qemu => "qemu",
            PlatformId::GcpNonCvm => "gcp-non-cvm",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlatformId::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown platform: {s}"))
    }
}
