// SPDX-License-Identifier: MIT OR Apache-2.0

//! Policy session executor
//!
//! Drives a policy session through the assertions a sealed key's
//! authorization policy is built from:
//!
//! 1. TPM2_PolicyPCR against the authorized PCR digest
//! 2. TPM2_PolicyNV: the revocation counter must not exceed the record's
//! 3. TPM2_PolicySigned by the update key over the dynamic metadata
//! 4. TPM2_PolicyOR over the authorized branches
//!
//! The order is fixed; the first failing step ends the session.

use ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::device::{Device, NvOperation, NvPublic, TPM_NT_COUNTER};
use crate::error::{
    DynamicPolicyReason, PolicyError, SignatureInvalidReason, StaticPolicyReason,
};
use crate::keydata::{DynamicPolicyData, StaticPolicyData, MAX_OR_DIGESTS};
use crate::public::PublicArea;
use crate::rc::{TPM_RC_SIGNATURE, TPM_RC_VALUE, TPM_RC_POLICY};
use crate::{HashAlg, TpmCc};

pub mod digest;

use digest::TrialPolicy;

/// Size of a revocation counter operand
const COUNTER_SIZE: u16 = 8;

/// Run every assertion of the sealed key policy in `session`
///
/// On success the session digest equals the object's authorization policy
/// and the session can authorize TPM2_Unseal.
pub fn execute_policy_session<D: Device + ?Sized>(
    device: &mut D,
    session: u32,
    alg: HashAlg,
    static_policy: &StaticPolicyData,
    dynamic_policy: &DynamicPolicyData,
) -> Result<(), PolicyError> {
    let update_key = check_metadata(alg, static_policy, dynamic_policy)?;

    // 1. PCR state
    if let Err(err) = device.policy_pcr(
        session,
        &static_policy.pcr_selection,
        &dynamic_policy.pcr_digest,
    ) {
        return Err(match err.tpm_code(TpmCc::PolicyPCR) {
            Some(rc) if rc.is_parameter_error(TPM_RC_VALUE, None) => {
                DynamicPolicyReason::PcrMismatch.into()
            }
            _ => PolicyError::Device {
                context: "cannot execute PCR assertion",
                source: err,
            },
        });
    }
    debug!("PCR assertion satisfied");

    // 2. Revocation counter
    let lock_index = read_lock_index(device, static_policy.lock_index)?;
    let operand = dynamic_policy.revocation_counter.to_be_bytes();
    if let Err(err) = device.policy_nv(
        session,
        static_policy.lock_index,
        &operand,
        0,
        NvOperation::UnsignedLe,
    ) {
        if err.is_resource_unavailable(static_policy.lock_index) {
            return Err(PolicyError::LockIndexMissing {
                index: static_policy.lock_index,
            });
        }
        return Err(match err.tpm_code(TpmCc::PolicyNV) {
            Some(rc) if rc.base() == TPM_RC_POLICY => DynamicPolicyReason::Superseded {
                counter: dynamic_policy.revocation_counter,
            }
            .into(),
            _ => PolicyError::Device {
                context: "cannot execute revocation counter assertion",
                source: err,
            },
        });
    }
    debug!(
        counter = dynamic_policy.revocation_counter,
        "revocation counter assertion satisfied"
    );

    // 3. Signed authorization of the dynamic metadata
    let message = dynamic_policy.signed_message();
    verify_ecdsa_p256(&message, &dynamic_policy.signature, &static_policy.update_key)
        .map_err(DynamicPolicyReason::from)?;
    if let Err(err) = device.policy_signed(
        session,
        &static_policy.update_key,
        &message,
        &dynamic_policy.signature,
    ) {
        return Err(match err.tpm_code(TpmCc::PolicySigned) {
            Some(rc)
                if rc.is_parameter_error(TPM_RC_SIGNATURE, None)
                    || rc.is_parameter_error(TPM_RC_VALUE, None) =>
            {
                DynamicPolicyReason::from(SignatureInvalidReason::RejectedByTpm(rc)).into()
            }
            _ => PolicyError::Device {
                context: "cannot execute signed assertion",
                source: err,
            },
        });
    }
    debug!("signed assertion satisfied");

    // 4. Branch selection
    let mut trial = TrialPolicy::new(alg);
    trial
        .policy_pcr(&static_policy.pcr_selection, &dynamic_policy.pcr_digest)
        .policy_nv(&lock_index.name(), &operand, 0, NvOperation::UnsignedLe)
        .policy_signed(&update_key.name(), &[]);
    let branch = static_policy
        .or_digests
        .iter()
        .position(|d| d.as_slice() == trial.digest())
        .ok_or(DynamicPolicyReason::NoMatchingBranch)?;
    debug!(
        branch,
        digest = %hex::encode(trial.digest()),
        "resolved authorized branch"
    );

    if let Err(err) = device.policy_or(session, &static_policy.or_digests) {
        return Err(match err.tpm_code(TpmCc::PolicyOR) {
            Some(rc) if rc.is_parameter_error(TPM_RC_VALUE, None) => {
                DynamicPolicyReason::NoMatchingBranch.into()
            }
            _ => PolicyError::Device {
                context: "cannot execute OR assertion",
                source: err,
            },
        });
    }
    Ok(())
}

/// Structural checks that need no device
fn check_metadata(
    alg: HashAlg,
    static_policy: &StaticPolicyData,
    dynamic_policy: &DynamicPolicyData,
) -> Result<PublicArea, PolicyError> {
    if static_policy.pcr_selection.iter().all(|sel| sel.is_empty()) {
        return Err(StaticPolicyReason::EmptyPcrSelection.into());
    }

    let count = static_policy.or_digests.len();
    if !(2..=MAX_OR_DIGESTS as usize).contains(&count) {
        return Err(StaticPolicyReason::OrDigestCount { count }.into());
    }
    let expected = alg.digest_size();
    for (index, digest) in static_policy.or_digests.iter().enumerate() {
        if digest.len() != expected {
            return Err(StaticPolicyReason::OrDigestLength {
                index,
                expected,
                got: digest.len(),
            }
            .into());
        }
    }

    if dynamic_policy.pcr_digest.len() != expected {
        return Err(DynamicPolicyReason::PcrDigestLength {
            expected,
            got: dynamic_policy.pcr_digest.len(),
        }
        .into());
    }

    P256VerifyingKey::from_sec1_bytes(&static_policy.update_key)
        .map_err(|e| StaticPolicyReason::InvalidUpdateKey(e.to_string()))?;
    let update_key = PublicArea::ecc_p256_verify_key(&static_policy.update_key)
        .map_err(|e| StaticPolicyReason::InvalidUpdateKey(e.to_string()))?;
    Ok(update_key)
}

fn read_lock_index<D: Device + ?Sized>(device: &mut D, index: u32) -> Result<NvPublic, PolicyError> {
    let nv = match device.nv_read_public(index) {
        Ok(nv) => nv,
        Err(err) if err.is_resource_unavailable(index) => {
            return Err(PolicyError::LockIndexMissing { index })
        }
        Err(err) => {
            return Err(PolicyError::Device {
                context: "cannot read revocation index",
                source: err,
            })
        }
    };

    if nv.index != index || nv.nv_type() != TPM_NT_COUNTER || nv.data_size != COUNTER_SIZE {
        return Err(StaticPolicyReason::LockIndexType {
            index,
            attributes: nv.attributes,
        }
        .into());
    }
    Ok(nv)
}

// =============================================================================
// Signature verification
// =============================================================================

/// Verify ECDSA-SHA256 signature over a message
pub fn verify_ecdsa_p256(
    message: &[u8],
    signature_der: &[u8],
    public_key: &[u8],
) -> Result<(), SignatureInvalidReason> {
    // SEC1 uncompressed: 0x04 || X || Y
    let verifying_key = P256VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| SignatureInvalidReason::InvalidPublicKey(e.to_string()))?;

    let signature = P256Signature::from_der(signature_der)
        .map_err(|e| SignatureInvalidReason::InvalidSignatureEncoding(e.to_string()))?;

    let digest = Sha256::digest(message);

    verifying_key
        .verify_prehash(&digest, &signature)
        .map_err(|e| SignatureInvalidReason::EcdsaVerificationFailed(e.to_string()))?;

    Ok(())
}
