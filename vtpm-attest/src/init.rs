// SPDX-License-Identifier: Apache-2.0

//! Node initialization markers.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tpm::{OpenDeviceFn, TpmSession};
use tracing::info;

use crate::measurements::{PCR_INDEX_CLUSTER_ID, PCR_INDEX_OWNER_ID};

/// Extend the owner and cluster PCRs with the node's identity.
///
/// This is a one-way, irreversible operation: once extended, the node's
/// quotes no longer match the uninitialized measurements, and the only way
/// back is a reboot.
pub fn mark_node_as_initialized(
    open_device: &OpenDeviceFn,
    owner_id: &[u8],
    cluster_id: &[u8],
) -> Result<()> {
    let mut session = TpmSession::open(open_device)?;

    session
        .pcr_extend("sha256", PCR_INDEX_OWNER_ID, &Sha256::digest(owner_id))
        .context("failed to extend owner PCR")?;
    session
        .pcr_extend("sha256", PCR_INDEX_CLUSTER_ID, &Sha256::digest(cluster_id))
        .context("failed to extend cluster PCR")?;

    info!("node marked as initialized");
    Ok(())
}
