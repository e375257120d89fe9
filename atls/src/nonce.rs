// SPDX-License-Identifier: Apache-2.0

//! Nonce generation and the server-name transport channel.
//!
//! The client smuggles its attestation nonce to the server inside the TLS
//! server-name field, so the server can bind it into the quote before any
//! application byte flows. rustls only accepts syntactically valid DNS names
//! as SNI, so the nonce travels as dot-separated hex labels. The encoding is
//! confined to this module; everything else handles raw nonce bytes.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::AtlsError;

/// Length of a freshly generated attestation nonce.
pub const NONCE_LEN: usize = 32;

// DNS labels max out at 63 octets.
const LABEL_LEN: usize = 56;

/// Generate a fresh random nonce from the OS RNG.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encode a nonce for transport in the TLS server-name field.
pub fn encode_nonce_channel(nonce: &[u8]) -> String {
    let encoded = hex::encode(nonce);
    encoded
        .as_bytes()
        .chunks(LABEL_LEN)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(".")
}

/// Decode a nonce received in the TLS server-name field.
pub fn decode_nonce_channel(name: &str) -> Result<Vec<u8>, AtlsError> {
    let compact: String = name.chars().filter(|c| *c != '.').collect();
    hex::decode(&compact).map_err(|err| AtlsError::NonceChannel(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let nonce = generate_nonce();
        let name = encode_nonce_channel(&nonce);
        assert_eq!(decode_nonce_channel(&name).unwrap(), nonce.to_vec());
    }

    #[test]
    fn short_nonce_roundtrip() {
        let nonce = [1u8, 2, 3, 4];
        let name = encode_nonce_channel(&nonce);
        assert_eq!(name, "01020304");
        assert_eq!(decode_nonce_channel(&name).unwrap(), nonce.to_vec());
    }

    #[test]
    fn encoding_is_a_valid_dns_name() {
        let nonce = generate_nonce();
        let name = encode_nonce_channel(&nonce);
        for label in name.split('.') {
            assert!(!label.is_empty());
            assert!(label.len() <= 63);
            assert!(label.chars().all(|c| c.is_ascii_hexdigit()));
        }
        // rustls must accept it as a server name
        rustls_pki_types_check(&name);
    }

    fn rustls_pki_types_check(name: &str) {
        use rustls_pki_types::ServerName;
        ServerName::try_from(name.to_owned()).expect("nonce channel encoding rejected as SNI");
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_nonce_channel("not-hex!").is_err());
        assert!(decode_nonce_channel("abc").is_err()); // odd length
    }
}
