// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compiled-in table of known signing authorities
//!
//! Identities are matched by exact DER bytes. Nothing here verifies a
//! signature; the table only answers "is this one of the authorities we
//! know about".

use der::oid::ObjectIdentifier;
use der::{Decode, Encode};
use x509_cert::ext::pkix::AuthorityKeyIdentifier;
use x509_cert::name::Name;
use x509_cert::Certificate;

const OID_AUTHORITY_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.35");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyAlgorithm {
    Rsa,
    Ecdsa,
    Ed25519,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha256WithRsa,
    Sha384WithRsa,
    EcdsaWithSha256,
    EcdsaWithSha384,
}

/// Identity of a certificate authority
#[derive(Debug, PartialEq, Eq)]
pub struct AuthorityIdentity {
    /// DER-encoded subject distinguished name
    pub subject: &'static [u8],
    pub subject_key_id: &'static [u8],
    pub public_key_algorithm: PublicKeyAlgorithm,
    /// DER-encoded issuer distinguished name
    pub issuer: &'static [u8],
    pub authority_key_id: &'static [u8],
    pub signature_algorithm: SignatureAlgorithm,
}

impl AuthorityIdentity {
    /// Subject rendered as an RFC 4514 string, or `None` if the stored
    /// bytes are not a distinguished name
    pub fn subject_name(&self) -> Option<String> {
        Name::from_der(self.subject).ok().map(|name| name.to_string())
    }

    pub fn issuer_name(&self) -> Option<String> {
        Name::from_der(self.issuer).ok().map(|name| name.to_string())
    }
}

/// CN=Microsoft Corporation UEFI CA 2011,O=Microsoft Corporation,L=Redmond,ST=Washington,C=US
pub static MS_UEFI_CA_2011: AuthorityIdentity = AuthorityIdentity {
    subject: &[
        0x30, 0x81, 0x81, 0x31, 0x0b, 0x30, 0x09, 0x06, 0x03, 0x55, 0x04, 0x06, 0x13, 0x02, 0x55,
        0x53, 0x31, 0x13, 0x30, 0x11, 0x06, 0x03, 0x55, 0x04, 0x08, 0x13, 0x0a, 0x57, 0x61, 0x73,
        0x68, 0x69, 0x6e, 0x67, 0x74, 0x6f, 0x6e, 0x31, 0x10, 0x30, 0x0e, 0x06, 0x03, 0x55, 0x04,
        0x07, 0x13, 0x07, 0x52, 0x65, 0x64, 0x6d, 0x6f, 0x6e, 0x64, 0x31, 0x1e, 0x30, 0x1c, 0x06,
        0x03, 0x55, 0x04, 0x0a, 0x13, 0x15, 0x4d, 0x69, 0x63, 0x72, 0x6f, 0x73, 0x6f, 0x66, 0x74,
        0x20, 0x43, 0x6f, 0x72, 0x70, 0x6f, 0x72, 0x61, 0x74, 0x69, 0x6f, 0x6e, 0x31, 0x2b, 0x30,
        0x29, 0x06, 0x03, 0x55, 0x04, 0x03, 0x13, 0x22, 0x4d, 0x69, 0x63, 0x72, 0x6f, 0x73, 0x6f,
        0x66, 0x74, 0x20, 0x43, 0x6f, 0x72, 0x70, 0x6f, 0x72, 0x61, 0x74, 0x69, 0x6f, 0x6e, 0x20,
        0x55, 0x45, 0x46, 0x49, 0x20, 0x43, 0x41, 0x20, 0x32, 0x30, 0x31, 0x31,
    ],
    subject_key_id: &[
        0x13, 0xad, 0xbf, 0x43, 0x09, 0xbd, 0x82, 0x70, 0x9c, 0x8c, 0xd5, 0x4f, 0x31, 0x6e, 0xd5,
        0x22, 0x98, 0x8a, 0x1b, 0xd4,
    ],
    public_key_algorithm: PublicKeyAlgorithm::Rsa,
    // CN=Microsoft Corporation Third Party Marketplace Root
    issuer: &[
        0x30, 0x81, 0x91, 0x31, 0x0b, 0x30, 0x09, 0x06, 0x03, 0x55, 0x04, 0x06, 0x13, 0x02, 0x55,
        0x53, 0x31, 0x13, 0x30, 0x11, 0x06, 0x03, 0x55, 0x04, 0x08, 0x13, 0x0a, 0x57, 0x61, 0x73,
        0x68, 0x69, 0x6e, 0x67, 0x74, 0x6f, 0x6e, 0x31, 0x10, 0x30, 0x0e, 0x06, 0x03, 0x55, 0x04,
        0x07, 0x13, 0x07, 0x52, 0x65, 0x64, 0x6d, 0x6f, 0x6e, 0x64, 0x31, 0x1e, 0x30, 0x1c, 0x06,
        0x03, 0x55, 0x04, 0x0a, 0x13, 0x15, 0x4d, 0x69, 0x63, 0x72, 0x6f, 0x73, 0x6f, 0x66, 0x74,
        0x20, 0x43, 0x6f, 0x72, 0x70, 0x6f, 0x72, 0x61, 0x74, 0x69, 0x6f, 0x6e, 0x31, 0x3b, 0x30,
        0x39, 0x06, 0x03, 0x55, 0x04, 0x03, 0x13, 0x32, 0x4d, 0x69, 0x63, 0x72, 0x6f, 0x73, 0x6f,
        0x66, 0x74, 0x20, 0x43, 0x6f, 0x72, 0x70, 0x6f, 0x72, 0x61, 0x74, 0x69, 0x6f, 0x6e, 0x20,
        0x54, 0x68, 0x69, 0x72, 0x64, 0x20, 0x50, 0x61, 0x72, 0x74, 0x79, 0x20, 0x4d, 0x61, 0x72,
        0x6b, 0x65, 0x74, 0x70, 0x6c, 0x61, 0x63, 0x65, 0x20, 0x52, 0x6f, 0x6f, 0x74,
    ],
    authority_key_id: &[
        0x45, 0x66, 0x52, 0x43, 0xe1, 0x7e, 0x58, 0x11, 0xbf, 0xd6, 0x4e, 0x9e, 0x23, 0x55, 0x08,
        0x3b, 0x3a, 0x22, 0x6a, 0xa8,
    ],
    signature_algorithm: SignatureAlgorithm::Sha256WithRsa,
};

/// CN=Microsoft UEFI CA 2023,O=Microsoft Corporation,C=US
///
/// Successor to [`MS_UEFI_CA_2011`].
pub static MS_UEFI_CA_2023: AuthorityIdentity = AuthorityIdentity {
    subject: &[
        0x30, 0x4e, 0x31, 0x0b, 0x30, 0x09, 0x06, 0x03, 0x55, 0x04, 0x06, 0x13, 0x02, 0x55, 0x53,
        0x31, 0x1e, 0x30, 0x1c, 0x06, 0x03, 0x55, 0x04, 0x0a, 0x13, 0x15, 0x4d, 0x69, 0x63, 0x72,
        0x6f, 0x73, 0x6f, 0x66, 0x74, 0x20, 0x43, 0x6f, 0x72, 0x70, 0x6f, 0x72, 0x61, 0x74, 0x69,
        0x6f, 0x6e, 0x31, 0x1f, 0x30, 0x1d, 0x06, 0x03, 0x55, 0x04, 0x03, 0x13, 0x16, 0x4d, 0x69,
        0x63, 0x72, 0x6f, 0x73, 0x6f, 0x66, 0x74, 0x20, 0x55, 0x45, 0x46, 0x49, 0x20, 0x43, 0x41,
        0x20, 0x32, 0x30, 0x32, 0x33,
    ],
    subject_key_id: &[
        0x81, 0xaa, 0x6b, 0x32, 0x44, 0xc9, 0x35, 0xbc, 0xe0, 0xd6, 0x62, 0x8a, 0xf3, 0x98, 0x27,
        0x42, 0x1e, 0x32, 0x49, 0x7d,
    ],
    public_key_algorithm: PublicKeyAlgorithm::Rsa,
    // CN=Microsoft RSA Devices Root CA 2021
    issuer: &[
        0x30, 0x5a, 0x31, 0x0b, 0x30, 0x09, 0x06, 0x03, 0x55, 0x04, 0x06, 0x13, 0x02, 0x55, 0x53,
        0x31, 0x1e, 0x30, 0x1c, 0x06, 0x03, 0x55, 0x04, 0x0a, 0x13, 0x15, 0x4d, 0x69, 0x63, 0x72,
        0x6f, 0x73, 0x6f, 0x66, 0x74, 0x20, 0x43, 0x6f, 0x72, 0x70, 0x6f, 0x72, 0x61, 0x74, 0x69,
        0x6f, 0x6e, 0x31, 0x2b, 0x30, 0x29, 0x06, 0x03, 0x55, 0x04, 0x03, 0x13, 0x22, 0x4d, 0x69,
        0x63, 0x72, 0x6f, 0x73, 0x6f, 0x66, 0x74, 0x20, 0x52, 0x53, 0x41, 0x20, 0x44, 0x65, 0x76,
        0x69, 0x63, 0x65, 0x73, 0x20, 0x52, 0x6f, 0x6f, 0x74, 0x20, 0x43, 0x41, 0x20, 0x32, 0x30,
        0x32, 0x31,
    ],
    authority_key_id: &[
        0x84, 0x44, 0x86, 0x06, 0x00, 0x98, 0x3f, 0x2c, 0xaa, 0xb3, 0xc5, 0x89, 0xf3, 0xac, 0x2e,
        0xc9, 0xe6, 0x9d, 0x09, 0x03,
    ],
    signature_algorithm: SignatureAlgorithm::Sha256WithRsa,
};

/// Every authority the table knows about
pub static TRUST_ANCHORS: &[&AuthorityIdentity] = &[&MS_UEFI_CA_2011, &MS_UEFI_CA_2023];

/// Find the authority whose subject and authority key identifier both
/// match exactly
pub fn lookup(subject: &[u8], authority_key_id: &[u8]) -> Option<&'static AuthorityIdentity> {
    TRUST_ANCHORS
        .iter()
        .copied()
        .find(|anchor| anchor.subject == subject && anchor.authority_key_id == authority_key_id)
}

/// Identify a DER certificate as one of the known authorities
///
/// Returns `None` when the certificate does not parse, carries no
/// Authority Key Identifier, or is not in the table.
pub fn identify_certificate(cert_der: &[u8]) -> Option<&'static AuthorityIdentity> {
    let cert = Certificate::from_der(cert_der).ok()?;
    let subject = cert.tbs_certificate.subject.to_der().ok()?;
    let aki = extract_aki(&cert)?;
    lookup(&subject, &aki)
}

/// keyIdentifier from the Authority Key Identifier extension (OID 2.5.29.35)
fn extract_aki(cert: &Certificate) -> Option<Vec<u8>> {
    let extensions = cert.tbs_certificate.extensions.as_ref()?;

    for ext in extensions.iter() {
        if ext.extn_id == OID_AUTHORITY_KEY_IDENTIFIER {
            let aki = AuthorityKeyIdentifier::from_der(ext.extn_value.as_bytes()).ok()?;
            return aki.key_identifier.map(|id| id.as_bytes().to_vec());
        }
    }
    None
}
