// SPDX-License-Identifier: Apache-2.0

//! Pure Rust parsing and verification of TPM quote structures.

use anyhow::{bail, Context, Result};
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::{PcrValue, RawQuote};

/// TPM_GENERATED_VALUE, first field of every TPMS_ATTEST
pub const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
/// TPM_ST_ATTEST_QUOTE
pub const TPM_ST_ATTEST_QUOTE: u16 = 0x8018;
/// TPM_ALG_RSASSA
pub const TPM_ALG_RSASSA: u16 = 0x0014;
/// TPM_ALG_SHA256
pub const TPM_ALG_SHA256: u16 = 0x000B;

/// TPMS_ATTEST structure parsed (TPM 2.0 Part 2, Section 10.12.8)
#[derive(Debug)]
pub struct TpmsAttest {
    pub magic: u32,
    pub type_: u16,
    pub qualified_signer: Vec<u8>,
    pub extra_data: Vec<u8>,
    pub clock_info: ClockInfo,
    pub firmware_version: u64,
    pub quote_info: QuoteInfo,
}

#[derive(Debug)]
pub struct ClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: u8,
}

#[derive(Debug)]
pub struct QuoteInfo {
    /// Raw TPML_PCR_SELECTION bytes
    pub pcr_select: Vec<u8>,
    pub pcr_digest: Vec<u8>,
}

/// Parse a TPMS_ATTEST structure and check magic and attestation type.
pub fn parse_tpms_attest(data: &[u8]) -> Result<TpmsAttest> {
    use nom::bytes::complete::take;
    use nom::number::complete::{be_u16, be_u32, be_u64, be_u8};
    use nom::IResult;

    fn parse_sized_buffer(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
        let (input, size) = be_u16(input)?;
        let (input, data) = take(size)(input)?;
        Ok((input, data.to_vec()))
    }

    fn parse_attest(input: &[u8]) -> IResult<&[u8], TpmsAttest> {
        let (input, magic) = be_u32(input)?;
        let (input, type_) = be_u16(input)?;
        let (input, qualified_signer) = parse_sized_buffer(input)?;
        let (input, extra_data) = parse_sized_buffer(input)?;

        let (input, clock) = be_u64(input)?;
        let (input, reset_count) = be_u32(input)?;
        let (input, restart_count) = be_u32(input)?;
        let (input, safe) = be_u8(input)?;

        let (input, firmware_version) = be_u64(input)?;

        // TPMS_QUOTE_INFO: pcrSelect is a TPML_PCR_SELECTION, no size prefix.
        // Re-serialize it so parse_pcr_selection can consume it on its own.
        let (input, pcr_select_count) = be_u32(input)?;
        let mut pcr_select_data = Vec::new();
        pcr_select_data.extend_from_slice(&pcr_select_count.to_be_bytes());

        let mut current_input = input;
        for _ in 0..pcr_select_count {
            let (input, hash_alg) = be_u16(current_input)?;
            let (input, sizeof_select) = be_u8(input)?;
            let (input, pcr_bitmap) = take(sizeof_select)(input)?;

            pcr_select_data.extend_from_slice(&hash_alg.to_be_bytes());
            pcr_select_data.push(sizeof_select);
            pcr_select_data.extend_from_slice(pcr_bitmap);

            current_input = input;
        }

        let input = current_input;
        let (input, pcr_digest) = parse_sized_buffer(input)?;

        Ok((
            input,
            TpmsAttest {
                magic,
                type_,
                qualified_signer,
                extra_data,
                clock_info: ClockInfo {
                    clock,
                    reset_count,
                    restart_count,
                    safe,
                },
                firmware_version,
                quote_info: QuoteInfo {
                    pcr_select: pcr_select_data,
                    pcr_digest,
                },
            },
        ))
    }

    let (_, attest) = parse_attest(data).map_err(|e| anyhow::anyhow!("parse error: {e}"))?;

    if attest.magic != TPM_GENERATED_VALUE {
        bail!("invalid magic number: 0x{:08x}", attest.magic);
    }
    if attest.type_ != TPM_ST_ATTEST_QUOTE {
        bail!("invalid attest type: 0x{:04x}", attest.type_);
    }

    Ok(attest)
}

/// Parse a TPML_PCR_SELECTION into the sorted list of selected PCR indices.
pub fn parse_pcr_selection(data: &[u8]) -> Result<Vec<u32>> {
    use nom::bytes::complete::take;
    use nom::number::complete::{be_u16, be_u32, be_u8};
    use nom::IResult;

    fn parse_selection(input: &[u8]) -> IResult<&[u8], Vec<u32>> {
        let (input, count) = be_u32(input)?;

        let mut all_pcrs = Vec::new();
        let mut current_input = input;

        for _ in 0..count {
            let (input, _hash_alg) = be_u16(current_input)?;
            let (input, sizeof_select) = be_u8(input)?;
            let (input, pcr_bitmap) = take(sizeof_select)(input)?;

            for (byte_idx, &byte) in pcr_bitmap.iter().enumerate() {
                for bit_idx in 0..8 {
                    if (byte & (1 << bit_idx)) != 0 {
                        all_pcrs.push((byte_idx * 8 + bit_idx) as u32);
                    }
                }
            }

            current_input = input;
        }

        Ok((current_input, all_pcrs))
    }

    let (_, mut pcr_indices) =
        parse_selection(data).map_err(|e| anyhow::anyhow!("failed to parse PCR selection: {e}"))?;
    pcr_indices.sort_unstable();
    Ok(pcr_indices)
}

/// Digest of the selected PCR values in selection order.
pub fn compute_pcr_digest(pcr_values: &[PcrValue]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for pcr in pcr_values {
        hasher.update(&pcr.value);
    }
    hasher.finalize().to_vec()
}

/// Verify a TPMT_SIGNATURE (RSASSA over SHA-256) against the message.
pub fn verify_quote_signature(
    message: &[u8],
    signature: &[u8],
    ak_public: &RsaPublicKey,
) -> Result<()> {
    if signature.len() < 4 {
        bail!("signature too short: {} bytes", signature.len());
    }

    let sig_alg = u16::from_be_bytes([signature[0], signature[1]]);
    let hash_alg = u16::from_be_bytes([signature[2], signature[3]]);
    if sig_alg != TPM_ALG_RSASSA {
        bail!("expected RSASSA (0x0014), got 0x{sig_alg:04x}");
    }
    if hash_alg != TPM_ALG_SHA256 {
        bail!("unsupported hash algorithm: 0x{hash_alg:04x}");
    }

    // TPM2B_PUBLIC_KEY_RSA: 2-byte size prefix followed by the raw signature
    let body = &signature[4..];
    if body.len() < 2 {
        bail!("RSA signature too short for size field");
    }
    let sig_size = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() < 2 + sig_size {
        bail!("RSA signature too short for signature data");
    }
    let sig_data = &body[2..2 + sig_size];

    let message_hash = Sha256::digest(message);
    let padding = rsa::Pkcs1v15Sign::new::<Sha256>();
    ak_public
        .verify(padding, &message_hash, sig_data)
        .context("quote signature verification failed")
}

/// Structurally verify a quote against the attestation key: parse the
/// TPMS_ATTEST, check the signature, and check that the carried PCR values
/// are exactly the attested selection with a matching digest.
///
/// The qualifying data is returned inside the parsed structure; comparing it
/// against the expected nonce is up to the caller.
pub fn verify_quote(quote: &RawQuote, ak_public: &RsaPublicKey) -> Result<TpmsAttest> {
    let attest = parse_tpms_attest(&quote.message)?;

    verify_quote_signature(&quote.message, &quote.signature, ak_public)?;

    let attested_pcr_indices = parse_pcr_selection(&attest.quote_info.pcr_select)?;
    let mut provided_pcr_indices: Vec<u32> = quote.pcr_values.iter().map(|p| p.index).collect();
    provided_pcr_indices.sort_unstable();
    if attested_pcr_indices != provided_pcr_indices {
        bail!(
            "PCR selection mismatch: attested {:?}, provided {:?}",
            attested_pcr_indices,
            provided_pcr_indices
        );
    }

    let computed_pcr_digest = compute_pcr_digest(&quote.pcr_values);
    if attest.quote_info.pcr_digest != computed_pcr_digest {
        bail!("PCR digest mismatch");
    }

    Ok(attest)
}
