// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trust anchor table lookups through the public API

use vaporseal::anchors::{
    identify_certificate, lookup, PublicKeyAlgorithm, SignatureAlgorithm, MS_UEFI_CA_2011,
    MS_UEFI_CA_2023, TRUST_ANCHORS,
};

#[test]
fn test_every_anchor_is_found_by_its_own_identity() {
    for anchor in TRUST_ANCHORS {
        let found = lookup(anchor.subject, anchor.authority_key_id).unwrap();
        assert!(std::ptr::eq(found, *anchor));
    }
}

#[test]
fn test_microsoft_uefi_cas() {
    assert_eq!(MS_UEFI_CA_2011.public_key_algorithm, PublicKeyAlgorithm::Rsa);
    assert_eq!(
        MS_UEFI_CA_2011.signature_algorithm,
        SignatureAlgorithm::Sha256WithRsa
    );
    assert_eq!(
        hex::encode(MS_UEFI_CA_2011.subject_key_id),
        "13adbf4309bd82709c8cd54f316ed522988a1bd4"
    );
    assert_eq!(
        hex::encode(MS_UEFI_CA_2023.authority_key_id),
        "8444860600983f2caab3c589f3ac2ec9e69d0903"
    );
}

#[test]
fn test_issuer_is_not_an_anchor() {
    // The 2011 CA's issuer is a root, not itself in the table
    assert!(lookup(MS_UEFI_CA_2011.issuer, MS_UEFI_CA_2011.authority_key_id).is_none());
    assert!(lookup(MS_UEFI_CA_2011.subject, MS_UEFI_CA_2011.subject_key_id).is_none());
}

#[test]
fn test_non_certificates_are_not_identified() {
    assert!(identify_certificate(MS_UEFI_CA_2011.subject).is_none());
    assert!(identify_certificate(b"-----BEGIN CERTIFICATE-----").is_none());
}
