// SPDX-License-Identifier: Apache-2.0

//! Verification tests against a synthetic enclave certificate chain.

use ciborium::Value;
use nitro_nsm::{verify_attestation, CoseSign1};
use p384::ecdsa::signature::hazmat::PrehashSigner;
use p384::ecdsa::{Signature, SigningKey};
use p384::pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    PKCS_ECDSA_P384_SHA384,
};
use sha2::{Digest, Sha384};

struct TestChain {
    root_pem: String,
    leaf_der: Vec<u8>,
    root_der: Vec<u8>,
    signing_key: SigningKey,
}

fn make_chain() -> TestChain {
    let ca_key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap();
    let mut ca_params = CertificateParams::new(vec![]).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    // the COSE signing key is the leaf certificate's key
    let signing_key = SigningKey::random(&mut OsRng);
    let pkcs8 = signing_key.to_pkcs8_der().unwrap();
    let leaf_key =
        KeyPair::from_pkcs8_der_and_sign_algo(&pkcs8.as_bytes().into(), &PKCS_ECDSA_P384_SHA384)
            .unwrap();

    let mut leaf_params = CertificateParams::new(vec!["test.enclave".into()]).unwrap();
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    TestChain {
        root_pem: ca_cert.pem(),
        leaf_der: leaf_cert.der().to_vec(),
        root_der: ca_cert.der().to_vec(),
        signing_key,
    }
}

fn bytes(v: &[u8]) -> Value {
    Value::Bytes(v.to_vec())
}

fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).unwrap();
    buf
}

fn make_document(chain: &TestChain, alg: i64) -> Vec<u8> {
    let payload = encode(&Value::Map(vec![
        (
            Value::Text("module_id".into()),
            Value::Text("i-0000-enc-test".into()),
        ),
        (Value::Text("digest".into()), Value::Text("SHA384".into())),
        (
            Value::Text("timestamp".into()),
            Value::Integer(1_700_000_000_000i64.into()),
        ),
        (
            Value::Text("pcrs".into()),
            Value::Map(vec![(Value::Integer(0.into()), bytes(&[0u8; 48]))]),
        ),
        (Value::Text("certificate".into()), bytes(&chain.leaf_der)),
        (
            Value::Text("cabundle".into()),
            Value::Array(vec![bytes(&chain.root_der)]),
        ),
        (Value::Text("public_key".into()), bytes(b"attestation key")),
        (Value::Text("user_data".into()), bytes(b"user data")),
        (Value::Text("nonce".into()), bytes(b"nonce")),
    ]));

    let protected = encode(&Value::Map(vec![(
        Value::Integer(1.into()),
        Value::Integer(alg.into()),
    )]));

    let unsigned = CoseSign1 {
        protected: protected.clone(),
        unprotected: Default::default(),
        payload: payload.clone(),
        signature: vec![],
    };
    let sig_structure = unsigned.sig_structure().unwrap();
    let signature: Signature = chain
        .signing_key
        .sign_prehash(&Sha384::digest(&sig_structure))
        .unwrap();

    encode(&Value::Tag(
        18,
        Box::new(Value::Array(vec![
            bytes(&protected),
            Value::Map(vec![]),
            bytes(&payload),
            bytes(&signature.to_bytes()),
        ])),
    ))
}

#[test]
fn verifies_synthetic_document() {
    let chain = make_chain();
    let doc = make_document(&chain, -35);
    let report = verify_attestation(&doc, &chain.root_pem).unwrap();
    assert_eq!(report.module_id, "i-0000-enc-test");
    assert_eq!(report.user_data.as_deref(), Some(b"user data".as_slice()));
    assert_eq!(report.nonce.as_deref(), Some(b"nonce".as_slice()));
    assert_eq!(
        report.public_key.as_deref(),
        Some(b"attestation key".as_slice())
    );
    assert_eq!(report.pcrs[&0], vec![0u8; 48]);
}

#[test]
fn rejects_foreign_root() {
    let chain = make_chain();
    let doc = make_document(&chain, -35);
    let other = make_chain();
    assert!(verify_attestation(&doc, &other.root_pem).is_err());
}

#[test]
fn rejects_wrong_algorithm() {
    let chain = make_chain();
    let doc = make_document(&chain, -7); // ES256
    let err = verify_attestation(&doc, &chain.root_pem).unwrap_err();
    assert!(err.to_string().contains("unsupported COSE algorithm"));
}

#[test]
fn rejects_tampered_payload() {
    let chain = make_chain();
    let doc = make_document(&chain, -35);

    // re-sign nothing: swap a byte inside the payload region
    let cose = CoseSign1::from_bytes(&doc).unwrap();
    let mut payload = cose.payload.clone();
    let pos = payload.len() - 1;
    payload[pos] ^= 0xff;
    let tampered = encode(&Value::Tag(
        18,
        Box::new(Value::Array(vec![
            bytes(&cose.protected),
            Value::Map(vec![]),
            bytes(&payload),
            bytes(&cose.signature),
        ])),
    ));
    assert!(verify_attestation(&tampered, &chain.root_pem).is_err());
}

#[test]
fn rejects_truncated_cose() {
    let chain = make_chain();
    let doc = make_document(&chain, -35);
    assert!(CoseSign1::from_bytes(&doc[..doc.len() - 2]).is_err());
}
