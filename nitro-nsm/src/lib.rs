// SPDX-License-Identifier: Apache-2.0

//! AWS Nitro Security Module attestation.
//!
//! Wraps the official `aws-nitro-enclaves-nsm-api` driver for document
//! issuance inside an enclave, and provides pure Rust COSE Sign1 parsing and
//! verification for validators outside it. The root of trust is the AWS
//! Nitro Enclaves root CA, supplied by the verifier in PEM form.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use aws_nitro_enclaves_nsm_api::api::{Request, Response};
use aws_nitro_enclaves_nsm_api::driver;
use serde::Deserialize;

mod verify;

pub use verify::{verify_attestation, verify_attestation_at, NsmVerifiedReport};

/// NSM device path inside a Nitro Enclave
pub const NSM_DEVICE_PATH: &str = "/dev/nsm";

/// Check if running inside a Nitro Enclave
pub fn is_nitro_enclave() -> bool {
    Path::new(NSM_DEVICE_PATH).exists()
}

/// Handle to the Nitro Security Module device.
#[derive(Debug)]
pub struct NsmContext {
    fd: i32,
}

impl NsmContext {
    /// Open the NSM device
    pub fn new() -> Result<Self> {
        let fd = driver::nsm_init();
        if fd < 0 {
            bail!("failed to open NSM device");
        }
        Ok(Self { fd })
    }

    /// Request an attestation document from the NSM.
    ///
    /// All three fields are optional and are echoed back, signed, in the
    /// document payload.
    pub fn get_attestation_doc(
        &self,
        user_data: Option<&[u8]>,
        nonce: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let request = Request::Attestation {
            user_data: user_data.map(|d| d.to_vec().into()),
            nonce: nonce.map(|d| d.to_vec().into()),
            public_key: public_key.map(|d| d.to_vec().into()),
        };

        let response = driver::nsm_process_request(self.fd, request);

        match response {
            Response::Attestation { document } => Ok(document),
            Response::Error(err) => bail!("NSM attestation failed: {err:?}"),
            _ => bail!("unexpected NSM response"),
        }
    }
}

impl Drop for NsmContext {
    fn drop(&mut self) {
        driver::nsm_exit(self.fd);
    }
}

/// Parsed COSE Sign1 structure carrying an NSM attestation document.
#[derive(Debug)]
pub struct CoseSign1 {
    /// Protected header (contains algorithm)
    pub protected: Vec<u8>,
    /// Unprotected header (usually empty for NSM)
    pub unprotected: BTreeMap<i64, ciborium::Value>,
    /// Payload (CBOR-encoded attestation document)
    pub payload: Vec<u8>,
    /// Signature (ECDSA P-384)
    pub signature: Vec<u8>,
}

impl CoseSign1 {
    /// Parse COSE Sign1 from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        // COSE Sign1 is a CBOR array [protected, unprotected, payload,
        // signature], optionally wrapped in tag 18
        let mut reader = Cursor::new(data);
        let value: ciborium::Value =
            ciborium::from_reader(&mut reader).context("failed to parse COSE Sign1 CBOR")?;
        if reader.position() != data.len() as u64 {
            bail!("trailing bytes after COSE Sign1");
        }

        let array = match value {
            ciborium::Value::Array(arr) => arr,
            ciborium::Value::Tag(18, inner) => match *inner {
                ciborium::Value::Array(arr) => arr,
                _ => bail!("COSE Sign1 tag content is not an array"),
            },
            _ => bail!("COSE Sign1 is not an array"),
        };

        if array.len() != 4 {
            bail!("COSE Sign1 array must have 4 elements, got {}", array.len());
        }

        let protected = match &array[0] {
            ciborium::Value::Bytes(b) => b.clone(),
            _ => bail!("COSE Sign1 protected header is not bytes"),
        };

        let unprotected = match &array[1] {
            ciborium::Value::Map(m) => {
                let mut map = BTreeMap::new();
                for (k, v) in m {
                    if let ciborium::Value::Integer(i) = k {
                        let key: i128 = (*i).into();
                        map.insert(key as i64, v.clone());
                    }
                }
                map
            }
            _ => BTreeMap::new(),
        };

        let payload = match &array[2] {
            ciborium::Value::Bytes(b) => b.clone(),
            _ => bail!("COSE Sign1 payload is not bytes"),
        };

        let signature = match &array[3] {
            ciborium::Value::Bytes(b) => b.clone(),
            _ => bail!("COSE Sign1 signature is not bytes"),
        };

        Ok(Self {
            protected,
            unprotected,
            payload,
            signature,
        })
    }

    /// Get the algorithm from the protected header (COSE key 1)
    pub fn algorithm(&self) -> Result<i64> {
        let mut reader = Cursor::new(&self.protected);
        let protected_map: BTreeMap<i64, ciborium::Value> =
            ciborium::from_reader(&mut reader).context("failed to parse protected header")?;

        let alg = protected_map
            .get(&1)
            .context("no algorithm in protected header")?;

        match alg {
            ciborium::Value::Integer(i) => {
                let val: i128 = (*i).into();
                Ok(val as i64)
            }
            _ => bail!("algorithm is not an integer"),
        }
    }

    /// Build the Sig_structure the signature is computed over:
    /// `["Signature1", protected, external_aad, payload]`
    pub fn sig_structure(&self) -> Result<Vec<u8>> {
        let sig_structure = ciborium::Value::Array(vec![
            ciborium::Value::Text("Signature1".to_string()),
            ciborium::Value::Bytes(self.protected.clone()),
            ciborium::Value::Bytes(vec![]), // external_aad is empty
            ciborium::Value::Bytes(self.payload.clone()),
        ]);

        let mut buf = Vec::new();
        ciborium::into_writer(&sig_structure, &mut buf)
            .context("failed to encode Sig_structure")?;
        Ok(buf)
    }
}

/// Attestation document structure (parsed from the COSE payload)
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationDocument {
    /// Module ID
    pub module_id: String,
    /// Digest algorithm used
    pub digest: String,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: u64,
    /// PCR values
    pub pcrs: BTreeMap<u16, Vec<u8>>,
    /// The signing certificate, DER encoded
    pub certificate: Vec<u8>,
    /// CA bundle, DER encoded, ordered `[ROOT, INTERM_1, ..., INTERM_N]`
    pub cabundle: Vec<Vec<u8>>,
    #[serde(default)]
    pub public_key: Option<Vec<u8>>,
    #[serde(default)]
    pub user_data: Option<Vec<u8>>,
    #[serde(default)]
    pub nonce: Option<Vec<u8>>,
}

impl AttestationDocument {
    /// Parse an attestation document from its CBOR payload
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);
        let doc = ciborium::from_reader(&mut reader)
            .context("failed to parse attestation document CBOR")?;
        if reader.position() != data.len() as u64 {
            bail!("trailing bytes after attestation document CBOR");
        }
        Ok(doc)
    }
}
