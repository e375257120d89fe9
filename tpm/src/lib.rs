// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 quote backend.
//!
//! Issuance and validation are built on a small device abstraction: the real
//! backend wraps the `tpm2-tools` command-line utilities, and a software
//! simulator provides the same interface for tests and machines without a
//! TPM. Quote parsing and signature verification are pure Rust.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;

pub mod attest;
pub mod sim;
pub mod tools;

/// PCR (Platform Configuration Register) selection for quotes and reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcrSelection {
    pub bank: String,
    pub pcrs: Vec<u32>,
}

impl PcrSelection {
    pub fn new(bank: &str, pcrs: &[u32]) -> Self {
        Self {
            bank: bank.to_string(),
            pcrs: pcrs.to_vec(),
        }
    }

    pub fn sha256(pcrs: &[u32]) -> Self {
        Self::new("sha256", pcrs)
    }

    /// Selection in `bank:i,j,k` form as consumed by tpm2-tools.
    pub fn to_arg(&self) -> String {
        let pcr_list: Vec<String> = self.pcrs.iter().map(|p| p.to_string()).collect();
        format!("{}:{}", self.bank, pcr_list.join(","))
    }

    /// Digest length of the selection's bank in bytes.
    pub fn digest_len(&self) -> Result<usize> {
        bank_digest_len(&self.bank)
    }
}

pub(crate) fn bank_digest_len(bank: &str) -> Result<usize> {
    match bank {
        "sha1" => Ok(20),
        "sha256" => Ok(32),
        other => anyhow::bail!("unsupported PCR bank: {other}"),
    }
}

/// PCR value for a specific PCR register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrValue {
    /// PCR index
    pub index: u32,
    /// Hash algorithm (e.g., "sha256")
    pub algorithm: String,
    /// PCR value (hash)
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// Raw quote materials as produced by the device.
#[derive(Debug, Clone)]
pub struct RawQuote {
    /// TPMS_ATTEST structure
    pub message: Vec<u8>,
    /// TPMT_SIGNATURE over the message by the attestation key
    pub signature: Vec<u8>,
    /// PCR values at the time of quote generation
    pub pcr_values: Vec<PcrValue>,
}

/// A TPM device usable for quote issuance.
///
/// One implementation wraps tpm2-tools, another is a pure software simulator.
/// A device is single-session: the attestation key is created lazily and kept
/// for the lifetime of the value.
pub trait TpmDevice: Send {
    /// PCR banks the device maintains, e.g. `["sha1", "sha256"]`.
    fn banks(&self) -> Vec<String>;

    /// DER-encoded SubjectPublicKeyInfo of the attestation key.
    fn ak_public(&mut self) -> Result<Vec<u8>>;

    /// Produce a quote over the selected PCRs with `extra_data` as
    /// qualifying data.
    fn quote(&mut self, extra_data: &[u8], selection: &PcrSelection) -> Result<RawQuote>;

    /// Sign a SHA-256 digest with the attestation key (raw PKCS#1 v1.5).
    fn sign(&mut self, digest: &[u8; 32]) -> Result<Vec<u8>>;

    /// Extend a PCR with a digest.
    fn pcr_extend(&mut self, bank: &str, index: u32, digest: &[u8]) -> Result<()>;

    /// Read the selected PCR values.
    fn read_pcrs(&mut self, selection: &PcrSelection) -> Result<Vec<PcrValue>>;
}

/// Constructor for a TPM device, invoked once per session.
pub type OpenDeviceFn =
    std::sync::Arc<dyn Fn() -> Result<Box<dyn TpmDevice>> + Send + Sync>;

// TPM resource manager access is serialized process-wide; concurrent
// transient-handle churn makes tpm2-tools fail in surprising ways.
static DEVICE_LOCK: Mutex<()> = Mutex::new(());

/// An exclusive session with the TPM device.
///
/// Holds a process-wide lock for its lifetime, so sessions from different
/// threads are serialized.
pub struct TpmSession {
    device: Box<dyn TpmDevice>,
    _guard: MutexGuard<'static, ()>,
}

impl TpmSession {
    pub fn open(open_device: &OpenDeviceFn) -> Result<Self> {
        let guard = DEVICE_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let device = open_device()?;
        Ok(Self {
            device,
            _guard: guard,
        })
    }
}

impl Deref for TpmSession {
    type Target = dyn TpmDevice;

    fn deref(&self) -> &Self::Target {
        self.device.as_ref()
    }
}

impl DerefMut for TpmSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device.as_mut()
    }
}
