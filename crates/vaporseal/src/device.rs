// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPM device capability seam
//!
//! The unseal engine never marshals commands itself. It drives a
//! [`Device`], which a caller backs with a real transport (a resource
//! manager character device, a simulator, a remote TPM) or with
//! [`crate::test_support::MockTpm`] in tests.

use bitflags::bitflags;
use zeroize::Zeroizing;

use crate::error::DeviceError;
use crate::pcr::PcrSelection;
use crate::public::PublicArea;
use crate::wire::Writer;
use crate::HashAlg;

bitflags! {
    /// TPMA_PERMANENT
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PermanentAttributes: u32 {
        const OWNER_AUTH_SET = 1 << 0;
        const ENDORSEMENT_AUTH_SET = 1 << 1;
        const LOCKOUT_AUTH_SET = 1 << 2;
        const DISABLE_CLEAR = 1 << 8;
        const IN_LOCKOUT = 1 << 9;
        const TPM_GENERATED_EPS = 1 << 10;
    }
}

/// NV attribute bits
pub const TPMA_NV_PPWRITE: u32 = 1 << 0;
pub const TPMA_NV_OWNERWRITE: u32 = 1 << 1;
pub const TPMA_NV_AUTHWRITE: u32 = 1 << 2;
pub const TPMA_NV_POLICYWRITE: u32 = 1 << 3;
pub const TPMA_NV_TPM_NT_MASK: u32 = 0xF << 4;
pub const TPMA_NV_PPREAD: u32 = 1 << 16;
pub const TPMA_NV_OWNERREAD: u32 = 1 << 17;
pub const TPMA_NV_AUTHREAD: u32 = 1 << 18;
pub const TPMA_NV_POLICYREAD: u32 = 1 << 19;
pub const TPMA_NV_NO_DA: u32 = 1 << 25;
pub const TPMA_NV_WRITTEN: u32 = 1 << 29;

/// NV index types (TPM_NT, bits 4-7 of TPMA_NV)
pub const TPM_NT_ORDINARY: u32 = 0x0;
pub const TPM_NT_COUNTER: u32 = 0x1;
pub const TPM_NT_BITS: u32 = 0x2;
pub const TPM_NT_EXTEND: u32 = 0x4;

/// NV index public information (TPMS_NV_PUBLIC)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvPublic {
    pub index: u32,
    pub name_alg: HashAlg,
    pub attributes: u32,
    pub auth_policy: Vec<u8>,
    pub data_size: u16,
}

impl NvPublic {
    /// TPM_NT value encoded in the attributes
    pub fn nv_type(&self) -> u32 {
        (self.attributes & TPMA_NV_TPM_NT_MASK) >> 4
    }

    /// Marshaled TPMS_NV_PUBLIC
    pub fn to_bytes(&self) -> Vec<u8> {
        Writer::new()
            .write_u32(self.index)
            .write_u16(self.name_alg.id())
            .write_u32(self.attributes)
            .write_tpm2b(&self.auth_policy)
            .write_u16(self.data_size)
            .into_vec()
    }

    /// Index name: nameAlg || H_nameAlg(TPMS_NV_PUBLIC)
    pub fn name(&self) -> Vec<u8> {
        let mut name = self.name_alg.id().to_be_bytes().to_vec();
        name.extend(self.name_alg.hash(&[self.to_bytes().as_slice()]));
        name
    }
}

/// Result of TPM2_ReadPublic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPublic {
    pub public: PublicArea,
    pub name: Vec<u8>,
    pub qualified_name: Vec<u8>,
}

/// Comparison operators for TPM2_PolicyNV (TPM_EO)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvOperation {
    Eq = 0x0000,
    Neq = 0x0001,
    SignedGt = 0x0002,
    UnsignedGt = 0x0003,
    SignedLt = 0x0004,
    UnsignedLt = 0x0005,
    SignedGe = 0x0006,
    UnsignedGe = 0x0007,
    SignedLe = 0x0008,
    UnsignedLe = 0x0009,
    BitSet = 0x000A,
    BitClear = 0x000B,
}

/// TPM commands the unseal engine relies on
///
/// Methods take `&mut self`: one command is in flight per device at a
/// time. Share a device between threads behind a lock.
pub trait Device {
    /// TPM_PT_PERMANENT from TPM2_GetCapability
    fn get_permanent_attributes(&mut self) -> Result<PermanentAttributes, DeviceError>;

    /// Confirm a persistent handle exists and return the handle to use for it
    ///
    /// Returns [`DeviceError::ResourceUnavailable`] when nothing is
    /// persisted at `handle`.
    fn resolve_persistent_handle(&mut self, handle: u32) -> Result<u32, DeviceError>;

    fn read_public(&mut self, handle: u32) -> Result<ReadPublic, DeviceError>;

    /// TPM2_Load; returns the transient object handle
    fn load_object(
        &mut self,
        parent: u32,
        public: &[u8],
        private: &[u8],
    ) -> Result<u32, DeviceError>;

    /// TPM2_StartAuthSession for an unbound, unsalted policy session
    fn start_policy_session(&mut self, alg: HashAlg) -> Result<u32, DeviceError>;

    fn nv_read_public(&mut self, index: u32) -> Result<NvPublic, DeviceError>;

    fn policy_pcr(
        &mut self,
        session: u32,
        selection: &[PcrSelection],
        pcr_digest: &[u8],
    ) -> Result<(), DeviceError>;

    /// TPM2_PolicyNV, authorizing the read with the index itself
    fn policy_nv(
        &mut self,
        session: u32,
        index: u32,
        operand_b: &[u8],
        offset: u16,
        operation: NvOperation,
    ) -> Result<(), DeviceError>;

    /// TPM2_PolicySigned with an externally loaded P-256 key
    ///
    /// `auth_key` is a SEC1 uncompressed point. `message` is the signed
    /// payload and `signature` its DER ECDSA signature.
    fn policy_signed(
        &mut self,
        session: u32,
        auth_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), DeviceError>;

    fn policy_or(&mut self, session: u32, digests: &[Vec<u8>]) -> Result<(), DeviceError>;

    fn unseal(&mut self, object: u32, session: u32) -> Result<Zeroizing<Vec<u8>>, DeviceError>;

    fn flush_context(&mut self, handle: u32) -> Result<(), DeviceError>;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn get_permanent_attributes(&mut self) -> Result<PermanentAttributes, DeviceError> {
        (**self).get_permanent_attributes()
    }

    fn resolve_persistent_handle(&mut self, handle: u32) -> Result<u32, DeviceError> {
        (**self).resolve_persistent_handle(handle)
    }

    fn read_public(&mut self, handle: u32) -> Result<ReadPublic, DeviceError> {
        (**self).read_public(handle)
    }

    fn load_object(
        &mut self,
        parent: u32,
        public: &[u8],
        private: &[u8],
    ) -> Result<u32, DeviceError> {
        (**self).load_object(parent, public, private)
    }

    fn start_policy_session(&mut self, alg: HashAlg) -> Result<u32, DeviceError> {
        (**self).start_policy_session(alg)
    }

    fn nv_read_public(&mut self, index: u32) -> Result<NvPublic, DeviceError> {
        (**self).nv_read_public(index)
    }

    fn policy_pcr(
        &mut self,
        session: u32,
        selection: &[PcrSelection],
        pcr_digest: &[u8],
    ) -> Result<(), DeviceError> {
        (**self).policy_pcr(session, selection, pcr_digest)
    }

    fn policy_nv(
        &mut self,
        session: u32,
        index: u32,
        operand_b: &[u8],
        offset: u16,
        operation: NvOperation,
    ) -> Result<(), DeviceError> {
        (**self).policy_nv(session, index, operand_b, offset, operation)
    }

    fn policy_signed(
        &mut self,
        session: u32,
        auth_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), DeviceError> {
        (**self).policy_signed(session, auth_key, message, signature)
    }

    fn policy_or(&mut self, session: u32, digests: &[Vec<u8>]) -> Result<(), DeviceError> {
        (**self).policy_or(session, digests)
    }

    fn unseal(&mut self, object: u32, session: u32) -> Result<Zeroizing<Vec<u8>>, DeviceError> {
        (**self).unseal(object, session)
    }

    fn flush_context(&mut self, handle: u32) -> Result<(), DeviceError> {
        (**self).flush_context(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_index() -> NvPublic {
        NvPublic {
            index: 0x01801100,
            name_alg: HashAlg::Sha256,
            attributes: (TPM_NT_COUNTER << 4) | TPMA_NV_AUTHREAD | TPMA_NV_OWNERWRITE,
            auth_policy: Vec::new(),
            data_size: 8,
        }
    }

    #[test]
    fn test_nv_type() {
        assert_eq!(counter_index().nv_type(), TPM_NT_COUNTER);
        let mut ordinary = counter_index();
        ordinary.attributes &= !TPMA_NV_TPM_NT_MASK;
        assert_eq!(ordinary.nv_type(), TPM_NT_ORDINARY);
    }

    #[test]
    fn test_nv_public_marshaling() {
        let nv = counter_index();
        let bytes = nv.to_bytes();
        assert_eq!(
            bytes,
            [0x01, 0x80, 0x11, 0x00, 0x00, 0x0B, 0x00, 0x04, 0x00, 0x12, 0x00, 0x00, 0x00, 0x08]
        );
        let name = nv.name();
        assert_eq!(&name[..2], &[0x00, 0x0B]);
        assert_eq!(&name[2..], HashAlg::Sha256.hash(&[bytes.as_slice()]).as_slice());
    }

    #[test]
    fn test_permanent_attributes_lockout_bit() {
        let attrs = PermanentAttributes::from_bits_retain(0x0000_0200);
        assert!(attrs.contains(PermanentAttributes::IN_LOCKOUT));
        assert!(!PermanentAttributes::OWNER_AUTH_SET.contains(PermanentAttributes::IN_LOCKOUT));
    }
}
