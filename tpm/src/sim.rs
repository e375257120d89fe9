// SPDX-License-Identifier: Apache-2.0

//! In-memory TPM simulator.
//!
//! Maintains sha1 and sha256 PCR banks and a software RSA-2048 attestation
//! key, and marshals real TPMS_ATTEST / TPMT_SIGNATURE structures, so code
//! verifying quotes can be exercised without a TPM device.

use anyhow::{bail, Context, Result};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::attest::{TPM_ALG_RSASSA, TPM_ALG_SHA256, TPM_GENERATED_VALUE, TPM_ST_ATTEST_QUOTE};
use crate::{bank_digest_len, PcrSelection, PcrValue, RawQuote, TpmDevice};

const PCR_COUNT: usize = 24;
const TPM_ALG_SHA1: u16 = 0x0004;

pub struct SimDevice {
    sha1_bank: [[u8; 20]; PCR_COUNT],
    sha256_bank: [[u8; 32]; PCR_COUNT],
    ak: RsaPrivateKey,
    ak_public_der: Vec<u8>,
}

impl SimDevice {
    pub fn new() -> Result<Self> {
        let ak = RsaPrivateKey::new(&mut OsRng, 2048)
            .context("failed to generate simulator attestation key")?;
        let ak_public_der = ak
            .to_public_key()
            .to_public_key_der()
            .context("failed to encode simulator attestation key")?
            .as_bytes()
            .to_vec();
        Ok(Self {
            sha1_bank: [[0u8; 20]; PCR_COUNT],
            sha256_bank: [[0u8; 32]; PCR_COUNT],
            ak,
            ak_public_der,
        })
    }

    fn pcr_value(&self, bank: &str, index: u32) -> Result<Vec<u8>> {
        let index = check_index(index)?;
        match bank {
            "sha1" => Ok(self.sha1_bank[index].to_vec()),
            "sha256" => Ok(self.sha256_bank[index].to_vec()),
            other => bail!("unsupported PCR bank: {other}"),
        }
    }

    fn marshal_attest(
        &self,
        extra_data: &[u8],
        selection: &PcrSelection,
        pcr_values: &[PcrValue],
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&TPM_GENERATED_VALUE.to_be_bytes());
        out.extend_from_slice(&TPM_ST_ATTEST_QUOTE.to_be_bytes());

        // qualified signer: name of the AK, alg id + sha256 of the public key
        let mut signer = Vec::with_capacity(2 + 32);
        signer.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
        signer.extend_from_slice(&Sha256::digest(&self.ak_public_der));
        write_tpm2b(&mut out, &signer)?;

        write_tpm2b(&mut out, extra_data)?;

        // clock info and firmware version
        out.extend_from_slice(&0u64.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.push(1); // safe
        out.extend_from_slice(&0u64.to_be_bytes());

        // TPML_PCR_SELECTION with a single entry for the quoted bank
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&bank_alg_id(&selection.bank)?.to_be_bytes());
        out.push(3); // sizeofSelect
        let mut bitmap = [0u8; 3];
        for &pcr in &selection.pcrs {
            let index = check_index(pcr)?;
            bitmap[index / 8] |= 1 << (index % 8);
        }
        out.extend_from_slice(&bitmap);

        let mut digest = Sha256::new();
        for pcr in pcr_values {
            digest.update(&pcr.value);
        }
        write_tpm2b(&mut out, &digest.finalize())?;

        Ok(out)
    }

    fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(message);
        let sig = self
            .ak
            .sign(rsa::Pkcs1v15Sign::new::<Sha256>(), &digest)
            .context("simulator quote signing failed")?;

        let mut out = Vec::with_capacity(4 + 2 + sig.len());
        out.extend_from_slice(&TPM_ALG_RSASSA.to_be_bytes());
        out.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
        write_tpm2b(&mut out, &sig)?;
        Ok(out)
    }
}

impl TpmDevice for SimDevice {
    fn banks(&self) -> Vec<String> {
        vec!["sha1".to_string(), "sha256".to_string()]
    }

    fn ak_public(&mut self) -> Result<Vec<u8>> {
        Ok(self.ak_public_der.clone())
    }

    fn quote(&mut self, extra_data: &[u8], selection: &PcrSelection) -> Result<RawQuote> {
        let pcr_values = self.read_pcrs(selection)?;
        let message = self.marshal_attest(extra_data, selection, &pcr_values)?;
        let signature = self.sign_message(&message)?;
        Ok(RawQuote {
            message,
            signature,
            pcr_values,
        })
    }

    fn sign(&mut self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        self.ak
            .sign(rsa::Pkcs1v15Sign::new::<Sha256>(), digest)
            .context("simulator signing failed")
    }

    fn pcr_extend(&mut self, bank: &str, index: u32, digest: &[u8]) -> Result<()> {
        let expected = bank_digest_len(bank)?;
        if digest.len() != expected {
            bail!(
                "digest length {} does not match {bank} bank ({expected} bytes)",
                digest.len()
            );
        }
        let index = check_index(index)?;
        match bank {
            "sha1" => {
                let mut hasher = Sha1::new();
                hasher.update(self.sha1_bank[index]);
                hasher.update(digest);
                self.sha1_bank[index] = hasher.finalize().into();
            }
            "sha256" => {
                let mut hasher = Sha256::new();
                hasher.update(self.sha256_bank[index]);
                hasher.update(digest);
                self.sha256_bank[index] = hasher.finalize().into();
            }
            other => bail!("unsupported PCR bank: {other}"),
        }
        Ok(())
    }

    fn read_pcrs(&mut self, selection: &PcrSelection) -> Result<Vec<PcrValue>> {
        selection
            .pcrs
            .iter()
            .map(|&index| {
                Ok(PcrValue {
                    index,
                    algorithm: selection.bank.clone(),
                    value: self.pcr_value(&selection.bank, index)?,
                })
            })
            .collect()
    }
}

fn check_index(index: u32) -> Result<usize> {
    if index as usize >= PCR_COUNT {
        bail!("PCR index {index} out of range");
    }
    Ok(index as usize)
}

fn bank_alg_id(bank: &str) -> Result<u16> {
    match bank {
        "sha1" => Ok(TPM_ALG_SHA1),
        "sha256" => Ok(TPM_ALG_SHA256),
        other => bail!("unsupported PCR bank: {other}"),
    }
}

fn write_tpm2b(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).context("TPM2B payload too large")?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_changes_pcr() {
        let mut device = SimDevice::new().unwrap();
        let before = device.pcr_value("sha256", 11).unwrap();
        device.pcr_extend("sha256", 11, &[0xAAu8; 32]).unwrap();
        let after = device.pcr_value("sha256", 11).unwrap();
        assert_ne!(before, after);

        // extend is the standard fold: new = H(old || digest)
        let mut hasher = Sha256::new();
        hasher.update(&before);
        hasher.update([0xAAu8; 32]);
        assert_eq!(after, hasher.finalize().to_vec());
    }

    #[test]
    fn extend_is_order_dependent() {
        let mut a = SimDevice::new().unwrap();
        let mut b = SimDevice::new().unwrap();
        a.pcr_extend("sha256", 0, &[1u8; 32]).unwrap();
        a.pcr_extend("sha256", 0, &[2u8; 32]).unwrap();
        b.pcr_extend("sha256", 0, &[2u8; 32]).unwrap();
        b.pcr_extend("sha256", 0, &[1u8; 32]).unwrap();
        assert_ne!(
            a.pcr_value("sha256", 0).unwrap(),
            b.pcr_value("sha256", 0).unwrap()
        );
    }

    #[test]
    fn banks_are_independent() {
        let mut device = SimDevice::new().unwrap();
        device.pcr_extend("sha1", 0, &[3u8; 20]).unwrap();
        assert_eq!(device.pcr_value("sha256", 0).unwrap(), vec![0u8; 32]);
        assert_ne!(device.pcr_value("sha1", 0).unwrap(), vec![0u8; 20]);
    }

    #[test]
    fn wrong_digest_length_rejected() {
        let mut device = SimDevice::new().unwrap();
        assert!(device.pcr_extend("sha256", 0, &[0u8; 20]).is_err());
        assert!(device.pcr_extend("sha256", 99, &[0u8; 32]).is_err());
    }

    #[test]
    fn read_preserves_selection_order() {
        let mut device = SimDevice::new().unwrap();
        let values = device
            .read_pcrs(&PcrSelection::sha256(&[12, 0, 11]))
            .unwrap();
        let indices: Vec<u32> = values.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![12, 0, 11]);
    }
}
