// SPDX-License-Identifier: Apache-2.0

//! Expected PCR measurements and per-platform PCR selections.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;
use tpm::{OpenDeviceFn, PcrSelection, TpmSession};

/// PCR tracking the unique ID of the node's owner.
pub const PCR_INDEX_OWNER_ID: u32 = 11;
/// PCR tracking the unique ID of the cluster the node joined.
pub const PCR_INDEX_CLUSTER_ID: u32 = 12;

/// PCRs quoted on Azure. PCR 0 and 6 hold the VM ID and are unstable across
/// instances; 10 and 13 are reserved for IMA and kernel modules.
pub const AZURE_PCR_SELECTION: &[u32] = &[
    1, 2, 3, 4, 5, 7, 8, 9, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
];

/// PCRs quoted on GCP: the full set.
pub const GCP_PCR_SELECTION: &[u32] = &[
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
];

/// PCRs quoted on platforms without a curated selection: the firmware
/// measurement plus the owner and cluster PCRs.
pub const DEFAULT_PCR_SELECTION: &[u32] = &[0, PCR_INDEX_OWNER_ID, PCR_INDEX_CLUSTER_ID];

/// One expected PCR value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(with = "hex_bytes")]
    pub expected: Vec<u8>,
}

impl Measurement {
    pub fn new(expected: impl Into<Vec<u8>>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

/// Expected sha256 PCR values keyed by PCR index. Validation fails on the
/// first PCR whose quoted value differs.
pub type TrustedPcrs = BTreeMap<u32, Measurement>;

/// Snapshot the device's current sha256 PCR values as trusted measurements.
pub fn trusted_pcrs_from_device(open_device: &OpenDeviceFn, pcrs: &[u32]) -> Result<TrustedPcrs> {
    let mut session = TpmSession::open(open_device)?;
    let values = session.read_pcrs(&PcrSelection::sha256(pcrs))?;
    Ok(values
        .into_iter()
        .map(|pcr| (pcr.index, Measurement::new(pcr.value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tpm::sim::SimDevice;
    use tpm::TpmDevice;

    #[test]
    fn azure_selection_skips_unstable_pcrs() {
        assert!(!AZURE_PCR_SELECTION.contains(&0));
        assert!(!AZURE_PCR_SELECTION.contains(&6));
        assert!(!AZURE_PCR_SELECTION.contains(&10));
        assert!(AZURE_PCR_SELECTION.contains(&PCR_INDEX_OWNER_ID));
        assert!(AZURE_PCR_SELECTION.contains(&PCR_INDEX_CLUSTER_ID));
    }

    #[test]
    fn snapshot_matches_device_state() {
        let open: OpenDeviceFn = Arc::new(|| {
            let mut device = SimDevice::new()?;
            device.pcr_extend("sha256", 11, &[7u8; 32])?;
            Ok(Box::new(device))
        });
        let trusted = trusted_pcrs_from_device(&open, DEFAULT_PCR_SELECTION).unwrap();
        assert_eq!(trusted.len(), DEFAULT_PCR_SELECTION.len());
        assert_eq!(trusted[&0].expected, vec![0u8; 32]);
        assert_ne!(trusted[&11].expected, vec![0u8; 32]);
    }
}
