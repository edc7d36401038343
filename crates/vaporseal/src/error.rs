// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types
//!
//! Each layer has its own closed enum. [`UnsealError`] is the only one a
//! caller of [`crate::unseal`] has to handle; the others are mapped into it
//! at the layer boundaries.

use thiserror::Error;

use crate::rc::ResponseCode;
use crate::TpmCc;

/// Errors returned by [`crate::unseal`]
///
/// The variant tells the caller which recovery action applies:
/// `LockedOut` clears with time, `NotProvisioned` needs the TPM to be
/// provisioned, `InvalidKeyData` needs the key to be resealed or the policy
/// metadata refreshed, `Fatal` needs investigation.
#[derive(Debug, Error)]
pub enum UnsealError {
    #[error("the TPM is in DA lockout mode")]
    LockedOut,

    #[error("the TPM is not correctly provisioned")]
    NotProvisioned,

    #[error("invalid key data: {reason}")]
    InvalidKeyData { reason: String },

    #[error("{context}: {source}")]
    Fatal {
        context: &'static str,
        #[source]
        source: DeviceError,
    },
}

impl UnsealError {
    pub(crate) fn invalid_key_data(reason: impl Into<String>) -> Self {
        UnsealError::InvalidKeyData {
            reason: reason.into(),
        }
    }
}

impl From<DecodeError> for UnsealError {
    fn from(err: DecodeError) -> Self {
        UnsealError::invalid_key_data(format!("cannot decode key data: {err}"))
    }
}

impl From<PayloadError> for UnsealError {
    fn from(err: PayloadError) -> Self {
        UnsealError::invalid_key_data(err.to_string())
    }
}

// =============================================================================
// DeviceError
// =============================================================================

/// Failures reported by a [`crate::Device`] implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("TPM resource at handle 0x{handle:08x} is not available")]
    ResourceUnavailable { handle: u32 },

    #[error("{command} failed: {code}")]
    Tpm { command: TpmCc, code: ResponseCode },

    #[error("TPM transport failure: {0}")]
    Transport(String),
}

impl DeviceError {
    /// True when the device reported that `handle` does not exist
    pub fn is_resource_unavailable(&self, handle: u32) -> bool {
        matches!(self, DeviceError::ResourceUnavailable { handle: h } if *h == handle)
    }

    /// The response code, if this is a TPM error for `command`
    pub fn tpm_code(&self, command: TpmCc) -> Option<ResponseCode> {
        match self {
            DeviceError::Tpm { command: c, code } if *c == command => Some(*code),
            _ => None,
        }
    }
}

// =============================================================================
// DecodeError
// =============================================================================

/// Structural errors in persisted key data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Input too short: {actual} < {minimum}")]
    InputTooShort { actual: usize, minimum: usize },

    #[error("Invalid key data magic: expected 0x{expected:08x}, got 0x{got:08x}")]
    MagicInvalid { expected: u32, got: u32 },

    #[error("Truncated structure at offset {offset}")]
    Truncated { offset: usize },

    #[error("Integer overflow at offset {offset}")]
    Overflow { offset: usize },

    #[error("{count} unexpected trailing bytes")]
    TrailingBytes { count: usize },

    #[error("PCR selection count {count} exceeds reasonable maximum")]
    PcrSelectionCountExceeded { count: u32 },

    #[error("PCR bitmap size {size} exceeds maximum")]
    PcrBitmapSizeExceeded { size: u8 },

    #[error("Policy digest count {count} exceeds maximum")]
    DigestCountExceeded { count: u32 },

    #[error("Unknown hash algorithm: 0x{alg_id:04X}")]
    UnknownHashAlgorithm { alg_id: u16 },

    #[error("Unsupported object type: 0x{type_id:04X}")]
    UnsupportedObjectType { type_id: u16 },

    #[error("Unsupported {field} algorithm: 0x{alg_id:04X}")]
    UnsupportedAlgorithm { field: &'static str, alg_id: u16 },
}

/// Records that cannot be represented in the persisted layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{len}-byte field exceeds the TPM2B maximum of 65535")]
    FieldTooLarge { len: usize },

    #[error("PCR selection count {count} exceeds maximum")]
    PcrSelectionCountExceeded { count: usize },

    #[error("Policy digest count {count} exceeds maximum")]
    DigestCountExceeded { count: usize },
}

// =============================================================================
// PayloadError
// =============================================================================

/// Errors decoding the cleartext returned by TPM2_Unseal
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("cannot unmarshal sealed payload: {0}")]
    Malformed(#[from] DecodeError),
}

// =============================================================================
// PolicyError
// =============================================================================

/// Outcome of a failed policy session
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid static policy data: {0}")]
    StaticData(#[from] StaticPolicyReason),

    #[error("invalid dynamic policy data: {0}")]
    DynamicData(#[from] DynamicPolicyReason),

    #[error("revocation index 0x{index:08x} is not present")]
    LockIndexMissing { index: u32 },

    #[error("{context}: {source}")]
    Device {
        context: &'static str,
        #[source]
        source: DeviceError,
    },
}

#[derive(Debug, Error)]
pub enum StaticPolicyReason {
    #[error("authorized branch count {count} outside 2..=8")]
    OrDigestCount { count: usize },

    #[error("authorized branch {index} has wrong length: expected {expected}, got {got}")]
    OrDigestLength {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("PCR selection is empty")]
    EmptyPcrSelection,

    #[error("Invalid update key: {0}")]
    InvalidUpdateKey(String),

    #[error("NV index 0x{index:08x} is not a revocation counter (attributes 0x{attributes:08x})")]
    LockIndexType { index: u32, attributes: u32 },
}

#[derive(Debug, Error)]
pub enum DynamicPolicyReason {
    #[error("PCR digest has wrong length: expected {expected}, got {got}")]
    PcrDigestLength { expected: usize, got: usize },

    #[error("PCR values do not match the authorized PCR digest")]
    PcrMismatch,

    #[error("the key data has been superseded (revocation counter {counter} is stale)")]
    Superseded { counter: u64 },

    #[error("authorization signature is invalid: {0}")]
    SignatureInvalid(#[from] SignatureInvalidReason),

    #[error("no authorized branch matches the policy")]
    NoMatchingBranch,
}

#[derive(Debug, Error)]
pub enum SignatureInvalidReason {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid signature DER: {0}")]
    InvalidSignatureEncoding(String),

    #[error("Signature verification failed: {0}")]
    EcdsaVerificationFailed(String),

    #[error("TPM rejected the signature: {0}")]
    RejectedByTpm(ResponseCode),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc::{ResponseCode, TPM_RC_VALUE};

    #[test]
    fn test_decode_error_maps_to_invalid_key_data() {
        let err: UnsealError = DecodeError::TrailingBytes { count: 7 }.into();
        match err {
            UnsealError::InvalidKeyData { reason } => {
                assert!(reason.contains("7 unexpected trailing bytes"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_superseded_message() {
        let err = PolicyError::from(DynamicPolicyReason::Superseded { counter: 3 });
        assert!(err.to_string().contains("superseded"));
    }

    #[test]
    fn test_device_error_helpers() {
        let err = DeviceError::ResourceUnavailable { handle: 0x81000001 };
        assert!(err.is_resource_unavailable(0x81000001));
        assert!(!err.is_resource_unavailable(0x81000002));
        assert_eq!(err.tpm_code(TpmCc::Load), None);

        let code = ResponseCode::parameter(TPM_RC_VALUE, 1);
        let err = DeviceError::Tpm {
            command: TpmCc::PolicyPCR,
            code,
        };
        assert_eq!(err.tpm_code(TpmCc::PolicyPCR), Some(code));
        assert_eq!(err.tpm_code(TpmCc::PolicyNV), None);
    }

    #[test]
    fn test_fatal_display_carries_context() {
        let err = UnsealError::Fatal {
            context: "cannot unseal key",
            source: DeviceError::Transport("broken pipe".into()),
        };
        assert_eq!(
            err.to_string(),
            "cannot unseal key: TPM transport failure: broken pipe"
        );
    }
}
