// SPDX-License-Identifier: MIT OR Apache-2.0

//! Object public areas (TPMT_PUBLIC)
//!
//! Type-specific parameters and the unique field are kept as their
//! marshaled bytes. That is enough to re-marshal the area exactly, compute
//! its name, and compare it against a creation template.

use bitflags::bitflags;

use crate::error::DecodeError;
use crate::wire::{Cursor, Writer};
use crate::{HashAlg, TpmAlg, TPM_ECC_NIST_P256};

bitflags! {
    /// TPMA_OBJECT
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectAttributes: u32 {
        const FIXED_TPM = 1 << 1;
        const ST_CLEAR = 1 << 2;
        const FIXED_PARENT = 1 << 4;
        const SENSITIVE_DATA_ORIGIN = 1 << 5;
        const USER_WITH_AUTH = 1 << 6;
        const ADMIN_WITH_POLICY = 1 << 7;
        const NO_DA = 1 << 10;
        const ENCRYPTED_DUPLICATION = 1 << 11;
        const RESTRICTED = 1 << 16;
        const DECRYPT = 1 << 17;
        const SIGN_ENCRYPT = 1 << 18;
    }
}

/// Object types the unseal path handles
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Rsa = 0x0001,
    KeyedHash = 0x0008,
    Ecc = 0x0023,
}

impl ObjectType {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            0x0001 => Some(ObjectType::Rsa),
            0x0008 => Some(ObjectType::KeyedHash),
            0x0023 => Some(ObjectType::Ecc),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObjectType::Rsa => "rsa",
            ObjectType::KeyedHash => "keyedhash",
            ObjectType::Ecc => "ecc",
        }
    }
}

/// Parsed TPMT_PUBLIC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicArea {
    pub object_type: ObjectType,
    pub name_alg: HashAlg,
    pub attributes: ObjectAttributes,
    pub auth_policy: Vec<u8>,
    /// Marshaled type-specific parameters
    pub parameters: Vec<u8>,
    /// Marshaled unique field
    pub unique: Vec<u8>,
}

impl PublicArea {
    /// Parse a TPMT_PUBLIC that spans exactly `data`
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);
        let public = Self::read(&mut cursor)?;
        cursor.finish()?;
        Ok(public)
    }

    pub(crate) fn read(cursor: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        let type_id = cursor.read_u16()?;
        let object_type =
            ObjectType::from_u16(type_id).ok_or(DecodeError::UnsupportedObjectType { type_id })?;
        let name_alg = HashAlg::try_from(cursor.read_u16()?)?;
        let attributes = ObjectAttributes::from_bits_retain(cursor.read_u32()?);
        let auth_policy = cursor.read_tpm2b()?.to_vec();

        let start = cursor.offset();
        match object_type {
            ObjectType::KeyedHash => read_keyedhash_scheme(cursor)?,
            ObjectType::Rsa => {
                read_sym_def_object(cursor)?;
                read_scheme(cursor, "RSA scheme")?;
                cursor.read_u16()?; // keyBits
                cursor.read_u32()?; // exponent
            }
            ObjectType::Ecc => {
                read_sym_def_object(cursor)?;
                read_scheme(cursor, "ECC scheme")?;
                cursor.read_u16()?; // curveID
                read_scheme(cursor, "KDF scheme")?;
            }
        }
        let parameters = cursor.since(start).to_vec();

        let start = cursor.offset();
        match object_type {
            ObjectType::KeyedHash | ObjectType::Rsa => {
                cursor.read_tpm2b()?;
            }
            ObjectType::Ecc => {
                cursor.read_tpm2b()?;
                cursor.read_tpm2b()?;
            }
        }
        let unique = cursor.since(start).to_vec();

        Ok(Self {
            object_type,
            name_alg,
            attributes,
            auth_policy,
            parameters,
            unique,
        })
    }

    /// Marshaled TPMT_PUBLIC
    ///
    /// `auth_policy` must fit a TPM2B; [`crate::SealedKeyData::to_bytes`]
    /// reports an area that does not.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.write(Writer::new()).into_vec()
    }

    pub(crate) fn write(&self, writer: Writer) -> Writer {
        writer
            .write_u16(self.object_type as u16)
            .write_u16(self.name_alg.id())
            .write_u32(self.attributes.bits())
            .write_tpm2b(&self.auth_policy)
            .write_bytes(&self.parameters)
            .write_bytes(&self.unique)
    }

    /// Object name: nameAlg || H_nameAlg(TPMT_PUBLIC)
    pub fn name(&self) -> Vec<u8> {
        let mut name = self.name_alg.id().to_be_bytes().to_vec();
        name.extend(self.name_alg.hash(&[self.to_bytes().as_slice()]));
        name
    }

    /// True when everything except the unique field matches `template`
    pub fn matches_template(&self, template: &PublicArea) -> bool {
        self.object_type == template.object_type
            && self.name_alg == template.name_alg
            && self.attributes == template.attributes
            && self.auth_policy == template.auth_policy
            && self.parameters == template.parameters
    }

    /// Sealed data object whose only authorization is `auth_policy`
    pub fn sealed_object(name_alg: HashAlg, auth_policy: Vec<u8>, unique: &[u8]) -> Self {
        Self {
            object_type: ObjectType::KeyedHash,
            name_alg,
            attributes: ObjectAttributes::FIXED_TPM | ObjectAttributes::FIXED_PARENT,
            auth_policy,
            parameters: Writer::new().write_u16(TpmAlg::Null as u16).into_vec(),
            unique: Writer::new().write_tpm2b(unique).into_vec(),
        }
    }

    /// External ECC P-256 verification key from a SEC1 uncompressed point
    pub fn ecc_p256_verify_key(sec1: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(sec1);
        let tag = cursor.read_u8()?;
        if tag != 0x04 {
            return Err(DecodeError::UnsupportedAlgorithm {
                field: "point encoding",
                alg_id: u16::from(tag),
            });
        }
        let x = cursor.read_bytes(32)?;
        let y = cursor.read_bytes(32)?;
        cursor.finish()?;

        Ok(Self {
            object_type: ObjectType::Ecc,
            name_alg: HashAlg::Sha256,
            attributes: ObjectAttributes::USER_WITH_AUTH | ObjectAttributes::SIGN_ENCRYPT,
            auth_policy: Vec::new(),
            parameters: Writer::new()
                .write_u16(TpmAlg::Null as u16) // symmetric
                .write_u16(TpmAlg::EcDsa as u16)
                .write_u16(TpmAlg::Sha256 as u16)
                .write_u16(TPM_ECC_NIST_P256)
                .write_u16(TpmAlg::Null as u16) // kdf
                .into_vec(),
            unique: Writer::new().write_tpm2b(x).write_tpm2b(y).into_vec(),
        })
    }
}

/// TPMT_KEYEDHASH_SCHEME
fn read_keyedhash_scheme(cursor: &mut Cursor<'_>) -> Result<(), DecodeError> {
    let scheme = cursor.read_u16()?;
    match TpmAlg::from_u16(scheme) {
        Some(TpmAlg::Null) => {}
        Some(TpmAlg::Hmac) => {
            HashAlg::try_from(cursor.read_u16()?)?;
        }
        Some(TpmAlg::Xor) => {
            HashAlg::try_from(cursor.read_u16()?)?;
            cursor.read_u16()?; // kdf
        }
        _ => {
            return Err(DecodeError::UnsupportedAlgorithm {
                field: "keyed hash scheme",
                alg_id: scheme,
            })
        }
    }
    Ok(())
}

/// TPMT_SYM_DEF_OBJECT
fn read_sym_def_object(cursor: &mut Cursor<'_>) -> Result<(), DecodeError> {
    let alg = cursor.read_u16()?;
    match TpmAlg::from_u16(alg) {
        Some(TpmAlg::Null) => {}
        Some(TpmAlg::Aes) => {
            cursor.read_u16()?; // keyBits
            cursor.read_u16()?; // mode
        }
        _ => {
            return Err(DecodeError::UnsupportedAlgorithm {
                field: "symmetric",
                alg_id: alg,
            })
        }
    }
    Ok(())
}

/// Signing, encryption or KDF scheme: an algorithm, plus a hash unless NULL
fn read_scheme(cursor: &mut Cursor<'_>, field: &'static str) -> Result<(), DecodeError> {
    let alg = cursor.read_u16()?;
    match TpmAlg::from_u16(alg) {
        Some(TpmAlg::Null) => {}
        Some(
            TpmAlg::RsaSsa
            | TpmAlg::RsaEs
            | TpmAlg::RsaPss
            | TpmAlg::Oaep
            | TpmAlg::EcDsa
            | TpmAlg::EcDh
            | TpmAlg::EcSchnorr
            | TpmAlg::Kdf1Sp800_56a
            | TpmAlg::Kdf1Sp800_108,
        ) => {
            // TPMS_ENC_SCHEME_RSAES carries no hash
            if alg != TpmAlg::RsaEs as u16 {
                HashAlg::try_from(cursor.read_u16()?)?;
            }
        }
        _ => return Err(DecodeError::UnsupportedAlgorithm { field, alg_id: alg }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srk::SrkTemplate;

    #[test]
    fn test_sealed_object_round_trip() {
        let public = PublicArea::sealed_object(HashAlg::Sha256, vec![0xAB; 32], &[0x11; 32]);
        let bytes = public.to_bytes();
        assert_eq!(&bytes[..2], &[0x00, 0x08]);
        assert_eq!(PublicArea::from_bytes(&bytes).unwrap(), public);
    }

    #[test]
    fn test_srk_template_parses() {
        for template in [SrkTemplate::Rsa2048, SrkTemplate::EccP256] {
            let public = template.public_area();
            let parsed = PublicArea::from_bytes(&public.to_bytes()).unwrap();
            assert_eq!(parsed, public);
        }
    }

    #[test]
    fn test_rsa_srk_attributes() {
        let public = SrkTemplate::Rsa2048.public_area();
        assert_eq!(public.attributes.bits(), 0x00030472);
        // symmetric AES-128-CFB, scheme NULL, 2048 bits, default exponent
        assert_eq!(
            public.parameters,
            [0x00, 0x06, 0x00, 0x80, 0x00, 0x43, 0x00, 0x10, 0x08, 0x00, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_template_match_ignores_unique() {
        let template = SrkTemplate::Rsa2048.public_area();
        let mut created = template.clone();
        created.unique = Writer::new().write_tpm2b(&[0x5A; 256]).into_vec();
        assert!(created.matches_template(&template));
        assert_ne!(created.name(), template.name());

        created.attributes.remove(ObjectAttributes::NO_DA);
        assert!(!created.matches_template(&template));
    }

    #[test]
    fn test_name_uses_name_alg() {
        let public = PublicArea::sealed_object(HashAlg::Sha1, Vec::new(), &[]);
        let name = public.name();
        assert_eq!(&name[..2], &[0x00, 0x04]);
        assert_eq!(name.len(), 2 + 20);
    }

    #[test]
    fn test_ecc_verify_key_name() {
        let mut sec1 = vec![0x04];
        sec1.extend([0x11; 32]);
        sec1.extend([0x22; 32]);
        let public = PublicArea::ecc_p256_verify_key(&sec1).unwrap();
        assert_eq!(public.attributes.bits(), 0x00040040);

        let mut expected = vec![0x00, 0x23, 0x00, 0x0B, 0x00, 0x04, 0x00, 0x40, 0x00, 0x00];
        expected.extend([0x00, 0x10, 0x00, 0x18, 0x00, 0x0B, 0x00, 0x03, 0x00, 0x10]);
        expected.extend([0x00, 0x20]);
        expected.extend([0x11; 32]);
        expected.extend([0x00, 0x20]);
        expected.extend([0x22; 32]);
        assert_eq!(public.to_bytes(), expected);

        let name = public.name();
        assert_eq!(&name[2..], HashAlg::Sha256.hash(&[expected.as_slice()]).as_slice());
    }

    #[test]
    fn test_ecc_verify_key_rejects_compressed_point() {
        let mut sec1 = vec![0x02];
        sec1.extend([0x11; 32]);
        assert!(PublicArea::ecc_p256_verify_key(&sec1).is_err());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = PublicArea::sealed_object(HashAlg::Sha256, Vec::new(), &[]).to_bytes();
        bytes.push(0);
        assert_eq!(
            PublicArea::from_bytes(&bytes),
            Err(DecodeError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn test_rejects_unknown_type() {
        let bytes = [0x00, 0x25, 0x00, 0x0B, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            PublicArea::from_bytes(&bytes),
            Err(DecodeError::UnsupportedObjectType { type_id: 0x0025 })
        );
    }
}
