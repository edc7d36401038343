// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sealed-key authorization and unsealing for TPM 2.0
//!
//! Loads a previously sealed key object into the TPM, replays the policy
//! assertions its authorization policy demands (PCR state, revocation
//! counter, signed authorization, branch selection) and unseals the key.
//! Every failure is classified as one of the [`UnsealError`] kinds so the
//! caller can pick a recovery action: wait out a lockout, provision the
//! TPM, or reseal the key.
//!
//! The TPM is reached through the [`Device`] trait. Command marshaling and
//! transport belong to the implementor.

use sha2::Digest;

pub mod anchors;
pub mod device;
pub mod error;
pub mod keydata;
pub mod payload;
pub mod pcr;
pub mod policy;
pub mod public;
pub mod rc;
mod scoped;
pub mod srk;
pub mod unseal;
mod wire;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;


pub use device::{Device, NvPublic, PermanentAttributes, ReadPublic};
pub use error::{DecodeError, DeviceError, EncodeError, PayloadError, PolicyError, UnsealError};
pub use keydata::{DynamicPolicyData, KeyDataVersion, SealedKeyData, StaticPolicyData};
pub use rc::ResponseCode;
pub use srk::SrkTemplate;
pub use unseal::{unseal, unseal_bytes, unseal_with_options, UnsealOptions, UnsealResult};

/// TPM 2.0 command codes used by the unseal path
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TpmCc {
    NvReadPublic = 0x00000169,
    PolicyNV = 0x00000149,
    Load = 0x00000157,
    Unseal = 0x0000015E,
    PolicySigned = 0x00000160,
    FlushContext = 0x00000165,
    PolicyOR = 0x00000171,
    ReadPublic = 0x00000173,
    StartAuthSession = 0x00000176,
    GetCapability = 0x0000017A,
    PolicyPCR = 0x0000017F,
}

impl TpmCc {
    pub fn name(&self) -> &'static str {
        match self {
            TpmCc::NvReadPublic => "TPM2_NV_ReadPublic",
            TpmCc::PolicyNV => "TPM2_PolicyNV",
            TpmCc::Load => "TPM2_Load",
            TpmCc::Unseal => "TPM2_Unseal",
            TpmCc::PolicySigned => "TPM2_PolicySigned",
            TpmCc::FlushContext => "TPM2_FlushContext",
            TpmCc::PolicyOR => "TPM2_PolicyOR",
            TpmCc::ReadPublic => "TPM2_ReadPublic",
            TpmCc::StartAuthSession => "TPM2_StartAuthSession",
            TpmCc::GetCapability => "TPM2_GetCapability",
            TpmCc::PolicyPCR => "TPM2_PolicyPCR",
        }
    }
}

impl std::fmt::Display for TpmCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// TPM 2.0 algorithm identifiers appearing in object public areas
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmAlg {
    Rsa = 0x0001,
    Sha1 = 0x0004,
    Hmac = 0x0005,
    Aes = 0x0006,
    KeyedHash = 0x0008,
    Xor = 0x000A,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Null = 0x0010,
    RsaSsa = 0x0014,
    RsaEs = 0x0015,
    RsaPss = 0x0016,
    Oaep = 0x0017,
    EcDsa = 0x0018,
    EcDh = 0x0019,
    EcSchnorr = 0x001C,
    Kdf1Sp800_56a = 0x0020,
    Kdf1Sp800_108 = 0x0022,
    Ecc = 0x0023,
    Cfb = 0x0043,
}

impl TpmAlg {
    /// Try to convert a u16 to a TpmAlg
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            0x0001 => Some(TpmAlg::Rsa),
            0x0004 => Some(TpmAlg::Sha1),
            0x0005 => Some(TpmAlg::Hmac),
            0x0006 => Some(TpmAlg::Aes),
            0x0008 => Some(TpmAlg::KeyedHash),
            0x000A => Some(TpmAlg::Xor),
            0x000B => Some(TpmAlg::Sha256),
            0x000C => Some(TpmAlg::Sha384),
            0x000D => Some(TpmAlg::Sha512),
            0x0010 => Some(TpmAlg::Null),
            0x0014 => Some(TpmAlg::RsaSsa),
            0x0015 => Some(TpmAlg::RsaEs),
            0x0016 => Some(TpmAlg::RsaPss),
            0x0017 => Some(TpmAlg::Oaep),
            0x0018 => Some(TpmAlg::EcDsa),
            0x0019 => Some(TpmAlg::EcDh),
            0x001C => Some(TpmAlg::EcSchnorr),
            0x0020 => Some(TpmAlg::Kdf1Sp800_56a),
            0x0022 => Some(TpmAlg::Kdf1Sp800_108),
            0x0023 => Some(TpmAlg::Ecc),
            0x0043 => Some(TpmAlg::Cfb),
            _ => None,
        }
    }
}

/// Hash algorithms usable as an object name algorithm, a policy session
/// algorithm or a PCR bank
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlg {
    Sha1 = 0x0004,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
}

impl HashAlg {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            0x0004 => Some(HashAlg::Sha1),
            0x000B => Some(HashAlg::Sha256),
            0x000C => Some(HashAlg::Sha384),
            0x000D => Some(HashAlg::Sha512),
            _ => None,
        }
    }

    /// TPM_ALG_ID wire value
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn digest_size(self) -> usize {
        match self {
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlg::Sha1 => "sha1",
            HashAlg::Sha256 => "sha256",
            HashAlg::Sha384 => "sha384",
            HashAlg::Sha512 => "sha512",
        }
    }

    /// Hash the concatenation of `parts`
    pub fn hash(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<H: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = H::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            HashAlg::Sha1 => run::<sha1::Sha1>(parts),
            HashAlg::Sha256 => run::<sha2::Sha256>(parts),
            HashAlg::Sha384 => run::<sha2::Sha384>(parts),
            HashAlg::Sha512 => run::<sha2::Sha512>(parts),
        }
    }
}

impl TryFrom<u16> for HashAlg {
    type Error = DecodeError;

    fn try_from(val: u16) -> Result<Self, Self::Error> {
        Self::from_u16(val).ok_or(DecodeError::UnknownHashAlgorithm { alg_id: val })
    }
}

impl std::fmt::Display for HashAlg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// TPM handle for the owner hierarchy
pub const TPM_RH_OWNER: u32 = 0x40000001;

/// Persistent handle of the storage root key (TCG provisioning guidance)
pub const SRK_HANDLE: u32 = 0x81000001;

/// TPM handle type prefixes (top byte of a handle)
pub const TPM_HT_NV_INDEX: u8 = 0x01;
pub const TPM_HT_POLICY_SESSION: u8 = 0x03;
pub const TPM_HT_TRANSIENT: u8 = 0x80;
pub const TPM_HT_PERSISTENT: u8 = 0x81;

/// ECC curve identifiers
pub const TPM_ECC_NIST_P256: u16 = 0x0003;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_alg_from_u16() {
        assert_eq!(HashAlg::from_u16(0x000B), Some(HashAlg::Sha256));
        assert_eq!(HashAlg::from_u16(0x0004), Some(HashAlg::Sha1));
        assert_eq!(HashAlg::from_u16(0x0010), None);
        assert!(matches!(
            HashAlg::try_from(0x0012u16),
            Err(DecodeError::UnknownHashAlgorithm { alg_id: 0x0012 })
        ));
    }

    #[test]
    fn test_hash_output_sizes() {
        for alg in [HashAlg::Sha1, HashAlg::Sha256, HashAlg::Sha384, HashAlg::Sha512] {
            assert_eq!(alg.hash(&[&b"abc"[..]]).len(), alg.digest_size());
        }
    }

    #[test]
    fn test_hash_concatenates_parts() {
        let joined = HashAlg::Sha256.hash(&[&b"hello world"[..]]);
        let split = HashAlg::Sha256.hash(&[&b"hello"[..], &b" "[..], &b"world"[..]]);
        assert_eq!(joined, split);
        assert_eq!(
            hex::encode(&joined),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_command_names() {
        assert_eq!(TpmCc::Unseal.to_string(), "TPM2_Unseal");
        assert_eq!(TpmCc::PolicyOR as u32, 0x171);
    }
}
