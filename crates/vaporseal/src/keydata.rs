// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sealed key data: the persisted record produced when a key is sealed
//!
//! Layout (big-endian):
//!
//! ```text
//! magic            u32   "USK$"
//! version          u32
//! public_area      TPM2B(TPMT_PUBLIC)
//! sealed_payload   TPM2B(private blob)
//! update_key       TPM2B(SEC1 P-256 point)
//! lock_index       u32
//! pcr_selection    TPML_PCR_SELECTION
//! or_digests       TPML_DIGEST
//! pcr_digest       TPM2B
//! revocation_ctr   u64
//! signature        TPM2B(DER ECDSA)
//! ```

use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{DecodeError, EncodeError};
use crate::pcr::{read_selection_list, write_selection_list, PcrSelection, MAX_PCR_SELECTIONS};
use crate::public::PublicArea;
use crate::wire::{Cursor, Writer};

/// "USK$"
pub const KEY_DATA_MAGIC: u32 = 0x55534B24;

/// Maximum number of authorized branches (TPM2_PolicyOR limit)
pub const MAX_OR_DIGESTS: u32 = 8;

/// Fixed-size header - zerocopy maps this directly from bytes
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct KeyDataHeader {
    magic: U32<BigEndian>,
    version: U32<BigEndian>,
}

const HEADER_SIZE: usize = core::mem::size_of::<KeyDataHeader>();

/// Key data format version; selects how the unsealed payload is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDataVersion {
    /// Version 0: payload is the raw key
    Legacy,
    /// Version 1 and later: payload is TPM2B(key) || TPM2B(auth update key)
    Structured(u32),
}

impl KeyDataVersion {
    pub const V1: Self = KeyDataVersion::Structured(1);

    /// Numeric version as persisted
    pub fn as_u32(self) -> u32 {
        match self {
            KeyDataVersion::Legacy => 0,
            KeyDataVersion::Structured(version) => version,
        }
    }
}

impl From<u32> for KeyDataVersion {
    fn from(version: u32) -> Self {
        match version {
            0 => KeyDataVersion::Legacy,
            version => KeyDataVersion::Structured(version),
        }
    }
}

/// Policy metadata fixed when the key was sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticPolicyData {
    /// Public key that signs dynamic policy updates (SEC1 uncompressed P-256)
    pub update_key: Vec<u8>,
    /// NV counter index used for revocation
    pub lock_index: u32,
    pub pcr_selection: Vec<PcrSelection>,
    /// Authorized branch digests combined by TPM2_PolicyOR
    pub or_digests: Vec<Vec<u8>>,
}

/// Policy metadata refreshed whenever the PCR profile changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicPolicyData {
    pub pcr_digest: Vec<u8>,
    pub revocation_counter: u64,
    /// DER ECDSA-P256/SHA-256 signature over [`Self::signed_message`]
    pub signature: Vec<u8>,
}

impl DynamicPolicyData {
    /// Bytes covered by the signature: TPM2B(pcr_digest) || u64(counter)
    pub fn signed_message(&self) -> Vec<u8> {
        Writer::new()
            .write_tpm2b(&self.pcr_digest)
            .write_u64(self.revocation_counter)
            .into_vec()
    }
}

/// Decoded sealed key record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedKeyData {
    version: KeyDataVersion,
    public_area: PublicArea,
    sealed_payload: Vec<u8>,
    static_policy: StaticPolicyData,
    dynamic_policy: DynamicPolicyData,
}

impl SealedKeyData {
    pub fn new(
        version: KeyDataVersion,
        public_area: PublicArea,
        sealed_payload: Vec<u8>,
        static_policy: StaticPolicyData,
        dynamic_policy: DynamicPolicyData,
    ) -> Self {
        Self {
            version,
            public_area,
            sealed_payload,
            static_policy,
            dynamic_policy,
        }
    }

    /// Decode a persisted record
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let (header, _) =
            KeyDataHeader::ref_from_prefix(data).map_err(|_| DecodeError::InputTooShort {
                actual: data.len(),
                minimum: HEADER_SIZE,
            })?;

        let magic = header.magic.get();
        if magic != KEY_DATA_MAGIC {
            return Err(DecodeError::MagicInvalid {
                expected: KEY_DATA_MAGIC,
                got: magic,
            });
        }
        let version = KeyDataVersion::from(header.version.get());

        let mut cursor = Cursor::new(data);
        cursor.read_bytes(HEADER_SIZE)?;

        let public_area = PublicArea::from_bytes(cursor.read_tpm2b()?)?;
        let sealed_payload = cursor.read_tpm2b()?.to_vec();

        let update_key = cursor.read_tpm2b()?.to_vec();
        let lock_index = cursor.read_u32()?;
        let pcr_selection = read_selection_list(&mut cursor)?;
        let or_digests = read_digest_list(&mut cursor)?;

        let pcr_digest = cursor.read_tpm2b()?.to_vec();
        let revocation_counter = cursor.read_u64()?;
        let signature = cursor.read_tpm2b()?.to_vec();

        cursor.finish()?;

        Ok(Self {
            version,
            public_area,
            sealed_payload,
            static_policy: StaticPolicyData {
                update_key,
                lock_index,
                pcr_selection,
                or_digests,
            },
            dynamic_policy: DynamicPolicyData {
                pcr_digest,
                revocation_counter,
                signature,
            },
        })
    }

    /// Serialize to the persisted layout
    ///
    /// Fails for a record that [`Self::from_bytes`] could not read back.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let static_policy = &self.static_policy;
        let selections = static_policy.pcr_selection.len();
        if selections > MAX_PCR_SELECTIONS as usize {
            return Err(EncodeError::PcrSelectionCountExceeded { count: selections });
        }
        let digests = static_policy.or_digests.len();
        if digests > MAX_OR_DIGESTS as usize {
            return Err(EncodeError::DigestCountExceeded { count: digests });
        }

        let header = KeyDataHeader {
            magic: U32::new(KEY_DATA_MAGIC),
            version: U32::new(self.version.as_u32()),
        };

        let mut w = Writer::new()
            .write_bytes(header.as_bytes())
            .write_tpm2b_with(|w| self.public_area.write(w))
            .write_tpm2b(&self.sealed_payload)
            .write_tpm2b(&static_policy.update_key)
            .write_u32(static_policy.lock_index);
        w = write_selection_list(w, &static_policy.pcr_selection);
        w = w.write_u32(digests as u32);
        for digest in &static_policy.or_digests {
            w = w.write_tpm2b(digest);
        }
        w.write_tpm2b(&self.dynamic_policy.pcr_digest)
            .write_u64(self.dynamic_policy.revocation_counter)
            .write_tpm2b(&self.dynamic_policy.signature)
            .finish()
    }

    pub fn version(&self) -> KeyDataVersion {
        self.version
    }

    /// Numeric format version as persisted
    pub fn format_version(&self) -> u32 {
        self.version.as_u32()
    }

    pub fn public_area(&self) -> &PublicArea {
        &self.public_area
    }

    /// Opaque private blob handed to TPM2_Load
    pub fn sealed_payload(&self) -> &[u8] {
        &self.sealed_payload
    }

    pub fn static_policy(&self) -> &StaticPolicyData {
        &self.static_policy
    }

    pub fn dynamic_policy(&self) -> &DynamicPolicyData {
        &self.dynamic_policy
    }

    /// Replace the dynamic policy after a PCR profile update
    pub fn set_dynamic_policy(&mut self, dynamic_policy: DynamicPolicyData) {
        self.dynamic_policy = dynamic_policy;
    }
}

/// Read a TPML_DIGEST
fn read_digest_list(cursor: &mut Cursor<'_>) -> Result<Vec<Vec<u8>>, DecodeError> {
    let count = cursor.read_u32()?;
    if count > MAX_OR_DIGESTS {
        return Err(DecodeError::DigestCountExceeded { count });
    }
    (0..count)
        .map(|_| cursor.read_tpm2b().map(<[u8]>::to_vec))
        .collect()
}
