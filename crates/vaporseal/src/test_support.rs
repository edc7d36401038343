// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test support: an in-memory TPM and sealed key builders.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.
//!
//! [`MockTpm`] keeps real policy session digests, so a record only unseals
//! when its branches were computed the same way a TPM would compute them.
//! Private blobs are not encrypted; they name the parent and the object
//! they belong to, and TPM2_Load rejects them under any other parent.

use std::collections::BTreeMap;

use ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature as P256Signature, SigningKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::device::{
    Device, NvOperation, NvPublic, PermanentAttributes, ReadPublic, TPMA_NV_AUTHREAD,
    TPMA_NV_NO_DA, TPMA_NV_OWNERWRITE, TPMA_NV_WRITTEN, TPM_NT_COUNTER,
};
use crate::error::DeviceError;
use crate::keydata::{DynamicPolicyData, KeyDataVersion, SealedKeyData, StaticPolicyData};
use crate::payload;
use crate::pcr::PcrSelection;
use crate::policy::digest::{pcr_composite_digest, TrialPolicy};
use crate::policy::verify_ecdsa_p256;
use crate::public::{ObjectAttributes, ObjectType, PublicArea};
use crate::rc::{
    ResponseCode, TPM_RC_BINDING, TPM_RC_HANDLE, TPM_RC_INTEGRITY, TPM_RC_KEY, TPM_RC_POLICY,
    TPM_RC_POLICY_FAIL, TPM_RC_SIGNATURE, TPM_RC_SIZE, TPM_RC_TYPE, TPM_RC_VALUE,
};
use crate::srk::{primary_qualified_name, SrkTemplate};
use crate::wire::{Cursor, Writer};
use crate::{HashAlg, TpmCc, SRK_HANDLE, TPM_RH_OWNER};

/// Prefix of every private blob produced by [`MockTpm::wrap_private`]
pub const MOCK_PRIVATE_TAG: &[u8; 4] = b"MPRV";

const SESSION_HANDLE_BASE: u32 = 0x03000000;
const TRANSIENT_HANDLE_BASE: u32 = 0x80000000;

// ============================================================================
// MockTpm
// ============================================================================

#[derive(Debug, Clone)]
struct PersistentObject {
    public: PublicArea,
    hierarchy: u32,
}

#[derive(Debug, Clone)]
struct LoadedObject {
    public: PublicArea,
    sensitive: Zeroizing<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct NvCounter {
    public: NvPublic,
    value: u64,
}

/// Resource accounting across a test
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub total: usize,
    pub sessions_started: usize,
    pub sessions_flushed: usize,
    pub objects_loaded: usize,
    pub objects_flushed: usize,
}

/// In-memory [`Device`]
#[derive(Debug, Clone, Default)]
pub struct MockTpm {
    permanent: PermanentAttributes,
    persistent: BTreeMap<u32, PersistentObject>,
    pcrs: BTreeMap<(HashAlg, u8), Vec<u8>>,
    nv: BTreeMap<u32, NvCounter>,
    sessions: BTreeMap<u32, TrialPolicy>,
    objects: BTreeMap<u32, LoadedObject>,
    next_session: u32,
    next_object: u32,
    faults: BTreeMap<TpmCc, DeviceError>,
    calls: BTreeMap<TpmCc, usize>,
    counts: CallCounts,
    flushed: Vec<u32>,
}

impl MockTpm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a primary storage key created from `template` in the owner
    /// hierarchy. `seed` determines its unique field.
    pub fn provision_srk(&mut self, handle: u32, template: SrkTemplate, seed: &[u8]) -> PublicArea {
        let mut public = template.public_area();
        public.unique = match public.object_type {
            ObjectType::Ecc => Writer::new()
                .write_tpm2b(&expand(seed, b"x", 32))
                .write_tpm2b(&expand(seed, b"y", 32))
                .into_vec(),
            _ => Writer::new()
                .write_tpm2b(&expand(seed, b"n", 256))
                .into_vec(),
        };
        self.set_persistent(handle, public.clone());
        public
    }

    /// Persist an arbitrary object in the owner hierarchy
    pub fn set_persistent(&mut self, handle: u32, public: PublicArea) {
        self.persistent.insert(
            handle,
            PersistentObject {
                public,
                hierarchy: TPM_RH_OWNER,
            },
        );
    }

    pub fn set_hierarchy(&mut self, handle: u32, hierarchy: u32) {
        if let Some(obj) = self.persistent.get_mut(&handle) {
            obj.hierarchy = hierarchy;
        }
    }

    pub fn remove_persistent(&mut self, handle: u32) {
        self.persistent.remove(&handle);
    }

    /// Attributes of a persistent object (panics if absent)
    pub fn persistent_attributes(&mut self, handle: u32) -> &mut ObjectAttributes {
        &mut self
            .persistent
            .get_mut(&handle)
            .expect("no persistent object at handle")
            .public
            .attributes
    }

    pub fn set_lockout(&mut self, in_lockout: bool) {
        self.permanent.set(PermanentAttributes::IN_LOCKOUT, in_lockout);
    }

    pub fn set_pcr(&mut self, bank: HashAlg, index: u8, value: &[u8]) {
        self.pcrs.insert((bank, index), value.to_vec());
    }

    /// Current PCR value; unset PCRs read as zeros
    pub fn pcr_value(&self, bank: HashAlg, index: u8) -> Vec<u8> {
        self.pcrs
            .get(&(bank, index))
            .cloned()
            .unwrap_or_else(|| vec![0u8; bank.digest_size()])
    }

    /// Define an 8-byte NV counter holding `value`
    pub fn define_counter(&mut self, index: u32, value: u64) -> NvPublic {
        let public = NvPublic {
            index,
            name_alg: HashAlg::Sha256,
            attributes: (TPM_NT_COUNTER << 4)
                | TPMA_NV_OWNERWRITE
                | TPMA_NV_AUTHREAD
                | TPMA_NV_NO_DA
                | TPMA_NV_WRITTEN,
            auth_policy: Vec::new(),
            data_size: 8,
        };
        self.nv.insert(
            index,
            NvCounter {
                public: public.clone(),
                value,
            },
        );
        public
    }

    pub fn set_counter(&mut self, index: u32, value: u64) {
        if let Some(counter) = self.nv.get_mut(&index) {
            counter.value = value;
        }
    }

    pub fn set_nv_attributes(&mut self, index: u32, attributes: u32) {
        if let Some(counter) = self.nv.get_mut(&index) {
            counter.public.attributes = attributes;
        }
    }

    pub fn remove_nv(&mut self, index: u32) {
        self.nv.remove(&index);
    }

    /// Fail the next `command` with `err`, before it has any effect
    pub fn inject(&mut self, command: TpmCc, err: DeviceError) {
        self.faults.insert(command, err);
    }

    /// Number of times `command` was issued
    pub fn calls(&self, command: TpmCc) -> usize {
        self.calls.get(&command).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &CallCounts {
        &self.counts
    }

    /// Handles flushed so far, in order
    pub fn flush_order(&self) -> &[u32] {
        &self.flushed
    }

    /// Loaded objects and sessions not yet flushed
    pub fn open_handles(&self) -> usize {
        self.sessions.len() + self.objects.len()
    }

    pub fn session_digest(&self, session: u32) -> Option<Vec<u8>> {
        self.sessions.get(&session).map(|s| s.digest().to_vec())
    }

    /// Private blob that loads `public` under the persistent `parent`
    pub fn wrap_private(&self, parent: u32, public: &PublicArea, sensitive: &[u8]) -> Vec<u8> {
        let parent = self
            .persistent
            .get(&parent)
            .expect("no persistent parent at handle");
        Writer::new()
            .write_bytes(MOCK_PRIVATE_TAG)
            .write_tpm2b(&parent.public.name())
            .write_tpm2b(&public.name())
            .write_tpm2b(sensitive)
            .into_vec()
    }

    fn enter(&mut self, command: TpmCc) -> Result<(), DeviceError> {
        self.counts.total += 1;
        *self.calls.entry(command).or_default() += 1;
        match self.faults.remove(&command) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn session_mut(
        &mut self,
        command: TpmCc,
        session: u32,
        position: u8,
    ) -> Result<&mut TrialPolicy, DeviceError> {
        self.sessions
            .get_mut(&session)
            .ok_or_else(|| tpm_error(command, ResponseCode::handle(TPM_RC_HANDLE, position)))
    }
}

fn tpm_error(command: TpmCc, code: ResponseCode) -> DeviceError {
    DeviceError::Tpm { command, code }
}

/// Deterministic filler bytes derived from `seed`
fn expand(seed: &[u8], label: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter = 0u32;
    while out.len() < len {
        out.extend(HashAlg::Sha256.hash(&[seed, label, &counter.to_be_bytes()]));
        counter += 1;
    }
    out.truncate(len);
    out
}

impl Device for MockTpm {
    fn get_permanent_attributes(&mut self) -> Result<PermanentAttributes, DeviceError> {
        self.enter(TpmCc::GetCapability)?;
        Ok(self.permanent)
    }

    fn resolve_persistent_handle(&mut self, handle: u32) -> Result<u32, DeviceError> {
        self.enter(TpmCc::ReadPublic)?;
        if self.persistent.contains_key(&handle) {
            Ok(handle)
        } else {
            Err(DeviceError::ResourceUnavailable { handle })
        }
    }

    fn read_public(&mut self, handle: u32) -> Result<ReadPublic, DeviceError> {
        self.enter(TpmCc::ReadPublic)?;
        let obj = self
            .persistent
            .get(&handle)
            .ok_or(DeviceError::ResourceUnavailable { handle })?;
        let name = obj.public.name();
        let qualified_name = primary_qualified_name(obj.hierarchy, &name, obj.public.name_alg);
        Ok(ReadPublic {
            public: obj.public.clone(),
            name,
            qualified_name,
        })
    }

    fn load_object(
        &mut self,
        parent: u32,
        public: &[u8],
        private: &[u8],
    ) -> Result<u32, DeviceError> {
        self.enter(TpmCc::Load)?;
        let parent_obj = self
            .persistent
            .get(&parent)
            .ok_or(DeviceError::ResourceUnavailable { handle: parent })?;
        let storage = ObjectAttributes::RESTRICTED | ObjectAttributes::DECRYPT;
        if !parent_obj.public.attributes.contains(storage) {
            return Err(tpm_error(TpmCc::Load, ResponseCode::handle(TPM_RC_TYPE, 1)));
        }

        let public = PublicArea::from_bytes(public)
            .map_err(|_| tpm_error(TpmCc::Load, ResponseCode::parameter(TPM_RC_SIZE, 2)))?;

        let malformed = || tpm_error(TpmCc::Load, ResponseCode::parameter(TPM_RC_SIZE, 1));
        let mut cursor = Cursor::new(private);
        let tag = cursor.read_bytes(MOCK_PRIVATE_TAG.len()).map_err(|_| malformed())?;
        if tag != MOCK_PRIVATE_TAG {
            return Err(malformed());
        }
        let parent_name = cursor.read_tpm2b().map_err(|_| malformed())?;
        let object_name = cursor.read_tpm2b().map_err(|_| malformed())?;
        let sensitive = cursor.read_tpm2b().map_err(|_| malformed())?;
        cursor.finish().map_err(|_| malformed())?;

        if parent_name != parent_obj.public.name() {
            return Err(tpm_error(
                TpmCc::Load,
                ResponseCode::parameter(TPM_RC_INTEGRITY, 1),
            ));
        }
        if object_name != public.name() {
            return Err(tpm_error(TpmCc::Load, ResponseCode::parameter(TPM_RC_BINDING, 2)));
        }

        let handle = TRANSIENT_HANDLE_BASE + self.next_object;
        self.next_object += 1;
        self.objects.insert(
            handle,
            LoadedObject {
                public,
                sensitive: Zeroizing::new(sensitive.to_vec()),
            },
        );
        self.counts.objects_loaded += 1;
        Ok(handle)
    }

    fn start_policy_session(&mut self, alg: HashAlg) -> Result<u32, DeviceError> {
        self.enter(TpmCc::StartAuthSession)?;
        let handle = SESSION_HANDLE_BASE + self.next_session;
        self.next_session += 1;
        self.sessions.insert(handle, TrialPolicy::new(alg));
        self.counts.sessions_started += 1;
        Ok(handle)
    }

    fn nv_read_public(&mut self, index: u32) -> Result<NvPublic, DeviceError> {
        self.enter(TpmCc::NvReadPublic)?;
        self.nv
            .get(&index)
            .map(|counter| counter.public.clone())
            .ok_or(DeviceError::ResourceUnavailable { handle: index })
    }

    fn policy_pcr(
        &mut self,
        session: u32,
        selection: &[PcrSelection],
        pcr_digest: &[u8],
    ) -> Result<(), DeviceError> {
        self.enter(TpmCc::PolicyPCR)?;
        let alg = self.session_mut(TpmCc::PolicyPCR, session, 1)?.alg();

        let mut values = Vec::new();
        for sel in selection {
            for index in sel.indices() {
                values.push(self.pcr_value(sel.hash, index));
            }
        }
        let live = pcr_composite_digest(alg, values.iter().map(Vec::as_slice));
        if !pcr_digest.is_empty() && pcr_digest != live.as_slice() {
            return Err(tpm_error(
                TpmCc::PolicyPCR,
                ResponseCode::parameter(TPM_RC_VALUE, 1),
            ));
        }

        self.session_mut(TpmCc::PolicyPCR, session, 1)?
            .policy_pcr(selection, &live);
        Ok(())
    }

    fn policy_nv(
        &mut self,
        session: u32,
        index: u32,
        operand_b: &[u8],
        offset: u16,
        operation: NvOperation,
    ) -> Result<(), DeviceError> {
        self.enter(TpmCc::PolicyNV)?;
        let counter = self
            .nv
            .get(&index)
            .cloned()
            .ok_or(DeviceError::ResourceUnavailable { handle: index })?;
        self.session_mut(TpmCc::PolicyNV, session, 3)?;

        let operand: [u8; 8] = match (offset, <[u8; 8]>::try_from(operand_b)) {
            (0, Ok(operand)) => operand,
            _ => {
                return Err(tpm_error(
                    TpmCc::PolicyNV,
                    ResponseCode::parameter(TPM_RC_SIZE, 1),
                ))
            }
        };
        let a = counter.value;
        let b = u64::from_be_bytes(operand);
        let holds = match operation {
            NvOperation::Eq => a == b,
            NvOperation::Neq => a != b,
            NvOperation::UnsignedGt => a > b,
            NvOperation::UnsignedLt => a < b,
            NvOperation::UnsignedGe => a >= b,
            NvOperation::UnsignedLe => a <= b,
            _ => {
                return Err(tpm_error(
                    TpmCc::PolicyNV,
                    ResponseCode::parameter(TPM_RC_VALUE, 3),
                ))
            }
        };
        if !holds {
            return Err(tpm_error(TpmCc::PolicyNV, ResponseCode(TPM_RC_POLICY)));
        }

        let name = counter.public.name();
        self.session_mut(TpmCc::PolicyNV, session, 3)?
            .policy_nv(&name, operand_b, offset, operation);
        Ok(())
    }

    fn policy_signed(
        &mut self,
        session: u32,
        auth_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), DeviceError> {
        self.enter(TpmCc::PolicySigned)?;
        self.session_mut(TpmCc::PolicySigned, session, 2)?;
        let key = PublicArea::ecc_p256_verify_key(auth_key)
            .map_err(|_| tpm_error(TpmCc::PolicySigned, ResponseCode::handle(TPM_RC_KEY, 1)))?;
        verify_ecdsa_p256(message, signature, auth_key).map_err(|_| {
            tpm_error(
                TpmCc::PolicySigned,
                ResponseCode::parameter(TPM_RC_SIGNATURE, 5),
            )
        })?;

        self.session_mut(TpmCc::PolicySigned, session, 2)?
            .policy_signed(&key.name(), &[]);
        Ok(())
    }

    fn policy_or(&mut self, session: u32, digests: &[Vec<u8>]) -> Result<(), DeviceError> {
        self.enter(TpmCc::PolicyOR)?;
        let trial = self.session_mut(TpmCc::PolicyOR, session, 1)?;
        if !(2..=8).contains(&digests.len()) {
            return Err(tpm_error(
                TpmCc::PolicyOR,
                ResponseCode::parameter(TPM_RC_SIZE, 1),
            ));
        }
        if !digests.iter().any(|d| d.as_slice() == trial.digest()) {
            return Err(tpm_error(
                TpmCc::PolicyOR,
                ResponseCode::parameter(TPM_RC_VALUE, 1),
            ));
        }
        trial.policy_or(digests);
        Ok(())
    }

    fn unseal(&mut self, object: u32, session: u32) -> Result<Zeroizing<Vec<u8>>, DeviceError> {
        self.enter(TpmCc::Unseal)?;
        let obj = self
            .objects
            .get(&object)
            .ok_or_else(|| tpm_error(TpmCc::Unseal, ResponseCode::handle(TPM_RC_HANDLE, 1)))?;
        let trial = self
            .sessions
            .get(&session)
            .ok_or_else(|| tpm_error(TpmCc::Unseal, ResponseCode::session(TPM_RC_HANDLE, 1)))?;
        if obj.public.auth_policy.as_slice() != trial.digest() {
            return Err(tpm_error(
                TpmCc::Unseal,
                ResponseCode::session(TPM_RC_POLICY_FAIL, 1),
            ));
        }
        Ok(obj.sensitive.clone())
    }

    fn flush_context(&mut self, handle: u32) -> Result<(), DeviceError> {
        self.enter(TpmCc::FlushContext)?;
        if self.sessions.remove(&handle).is_some() {
            self.counts.sessions_flushed += 1;
        } else if self.objects.remove(&handle).is_some() {
            self.counts.objects_flushed += 1;
        } else {
            return Err(tpm_error(
                TpmCc::FlushContext,
                ResponseCode::parameter(TPM_RC_HANDLE, 1),
            ));
        }
        self.flushed.push(handle);
        Ok(())
    }
}

// ============================================================================
// Sealed key fixtures
// ============================================================================

/// Fixed P-256 scalar for the policy update key
pub const TEST_UPDATE_KEY_SECRET: [u8; 32] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e,
    0x1f, 0x20,
];

/// A different scalar, for signatures that must not verify
pub const OTHER_UPDATE_KEY_SECRET: [u8; 32] = [
    0x20, 0x1f, 0x1e, 0x1d, 0x1c, 0x1b, 0x1a, 0x19, 0x18, 0x17, 0x16, 0x15, 0x14, 0x13, 0x12,
    0x11, 0x10, 0x0f, 0x0e, 0x0d, 0x0c, 0x0b, 0x0a, 0x09, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03,
    0x02, 0x01,
];

pub const TEST_LOCK_INDEX: u32 = 0x01801100;
pub const TEST_COUNTER: u64 = 5;
pub const TEST_PCRS: [u8; 2] = [7, 12];

pub fn test_signing_key(secret: &[u8; 32]) -> SigningKey {
    SigningKey::from_bytes(&(*secret).into()).expect("valid P-256 scalar")
}

/// Sign `dynamic` with `key`, replacing its signature
pub fn sign_dynamic_policy(key: &SigningKey, dynamic: &mut DynamicPolicyData) {
    let digest = Sha256::digest(dynamic.signed_message());
    let signature: P256Signature = key.sign_prehash(&digest).expect("prehash signing");
    dynamic.signature = signature.to_der().as_bytes().to_vec();
}

/// A sealed key record together with a mock TPM it unseals on
///
/// The record authorizes two branches: one for the current PCR values and
/// revocation counter, and a decoy for an older PCR profile.
pub struct SealedKeyFixture {
    pub key: SealedKeyData,
    pub tpm: MockTpm,
    signing_key: SigningKey,
}

impl SealedKeyFixture {
    /// Version 1 record sealing `key` and `auth_update_key`
    pub fn v1(key: &[u8], auth_update_key: &[u8]) -> Self {
        Self::build(KeyDataVersion::V1, &payload::encode_v1(key, auth_update_key))
    }

    /// Version 0 record sealing `key` as raw bytes
    pub fn legacy(key: &[u8]) -> Self {
        Self::build(KeyDataVersion::Legacy, key)
    }

    /// Record of `version` whose sealed object holds `sensitive` verbatim
    pub fn build(version: KeyDataVersion, sensitive: &[u8]) -> Self {
        let alg = HashAlg::Sha256;
        let mut tpm = MockTpm::new();
        tpm.provision_srk(SRK_HANDLE, SrkTemplate::Rsa2048, b"mock storage root");
        for index in TEST_PCRS {
            tpm.set_pcr(alg, index, &alg.hash(&[&b"boot component"[..], &[index]]));
        }
        let lock_index = tpm.define_counter(TEST_LOCK_INDEX, TEST_COUNTER);

        let signing_key = test_signing_key(&TEST_UPDATE_KEY_SECRET);
        let update_key = signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let key_name = PublicArea::ecc_p256_verify_key(&update_key)
            .expect("update key")
            .name();

        let pcr_selection = vec![PcrSelection::new(alg, &TEST_PCRS)];
        let values: Vec<Vec<u8>> = TEST_PCRS.iter().map(|&i| tpm.pcr_value(alg, i)).collect();
        let pcr_digest = pcr_composite_digest(alg, values.iter().map(Vec::as_slice));

        let branch = |pcr_digest: &[u8]| {
            let mut trial = TrialPolicy::new(alg);
            trial
                .policy_pcr(&pcr_selection, pcr_digest)
                .policy_nv(
                    &lock_index.name(),
                    &TEST_COUNTER.to_be_bytes(),
                    0,
                    NvOperation::UnsignedLe,
                )
                .policy_signed(&key_name, &[]);
            trial.into_digest()
        };
        let decoy = alg.hash(&[&b"previous PCR profile"[..]]);
        let or_digests = vec![branch(&pcr_digest), branch(&decoy)];

        let mut auth_policy = TrialPolicy::new(alg);
        auth_policy.policy_or(&or_digests);
        let public = PublicArea::sealed_object(
            alg,
            auth_policy.into_digest(),
            &alg.hash(&[&b"sealed object"[..]]),
        );
        let private = tpm.wrap_private(SRK_HANDLE, &public, sensitive);

        let mut dynamic = DynamicPolicyData {
            pcr_digest,
            revocation_counter: TEST_COUNTER,
            signature: Vec::new(),
        };
        sign_dynamic_policy(&signing_key, &mut dynamic);

        let key = SealedKeyData::new(
            version,
            public,
            private,
            StaticPolicyData {
                update_key,
                lock_index: TEST_LOCK_INDEX,
                pcr_selection,
                or_digests,
            },
            dynamic,
        );

        Self {
            key,
            tpm,
            signing_key,
        }
    }

    /// Persisted form of the record
    pub fn bytes(&self) -> Vec<u8> {
        self.key.to_bytes().expect("fixture record encodes")
    }

    /// Re-sign `dynamic` with the record's update key
    pub fn sign_dynamic(&self, dynamic: &mut DynamicPolicyData) {
        sign_dynamic_policy(&self.signing_key, dynamic);
    }
}
