// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unseal orchestration
//!
//! `Start -> LockoutChecked -> Loaded -> SessionOpen -> PolicyAsserted ->
//! Unsealed -> Decoded`. Any step can fail; from `Loaded` onward the
//! transient object and the policy session are flushed on every exit path.

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::device::{Device, PermanentAttributes};
use crate::error::{DeviceError, PolicyError, UnsealError};
use crate::keydata::SealedKeyData;
use crate::payload::{self, SealedPayload};
use crate::policy;
use crate::rc::TPM_RC_POLICY_FAIL;
use crate::scoped::ScopedHandle;
use crate::srk::{self, SrkStatus, SrkTemplate};
use crate::{TpmCc, SRK_HANDLE};

/// Caller-tunable unseal settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnsealOptions {
    /// Persistent handle of the storage root key
    pub srk_handle: u32,
    /// Template the storage root key is expected to be created from
    pub srk_template: SrkTemplate,
}

impl Default for UnsealOptions {
    fn default() -> Self {
        Self {
            srk_handle: SRK_HANDLE,
            srk_template: SrkTemplate::default(),
        }
    }
}

/// Unsealed secrets
pub struct UnsealResult {
    pub key_material: Zeroizing<Vec<u8>>,
    /// Key authorizing policy updates; empty for legacy records
    pub auth_update_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for UnsealResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsealResult")
            .field("key_material_len", &self.key_material.len())
            .field("auth_update_key_len", &self.auth_update_key.len())
            .finish()
    }
}

impl From<SealedPayload> for UnsealResult {
    fn from(payload: SealedPayload) -> Self {
        match payload {
            SealedPayload::Legacy { key } => UnsealResult {
                key_material: key,
                auth_update_key: Zeroizing::new(Vec::new()),
            },
            SealedPayload::Structured {
                key,
                auth_update_key,
            } => UnsealResult {
                key_material: key,
                auth_update_key,
            },
        }
    }
}

/// Unseal `key` with the default storage root key settings
pub fn unseal<D: Device + ?Sized>(
    key: &SealedKeyData,
    device: &mut D,
) -> Result<UnsealResult, UnsealError> {
    unseal_with_options(key, device, &UnsealOptions::default())
}

/// Decode a persisted record and unseal it
///
/// Records that do not decode are reported as `InvalidKeyData` without
/// touching the device.
pub fn unseal_bytes<D: Device + ?Sized>(
    data: &[u8],
    device: &mut D,
    options: &UnsealOptions,
) -> Result<UnsealResult, UnsealError> {
    let key = SealedKeyData::from_bytes(data)?;
    unseal_with_options(&key, device, options)
}

pub fn unseal_with_options<D: Device + ?Sized>(
    key: &SealedKeyData,
    device: &mut D,
    options: &UnsealOptions,
) -> Result<UnsealResult, UnsealError> {
    let attributes = device
        .get_permanent_attributes()
        .map_err(|source| UnsealError::Fatal {
            context: "cannot fetch properties from TPM",
            source,
        })?;
    if attributes.contains(PermanentAttributes::IN_LOCKOUT) {
        debug!("TPM is in DA lockout mode");
        return Err(UnsealError::LockedOut);
    }
    debug!("lockout check passed");

    let object_handle = load(key, device, options)?;
    let mut object = ScopedHandle::new(device, object_handle, "sealed object");
    debug!(handle = format_args!("0x{object_handle:08x}"), "sealed object loaded");

    let alg = key.public_area().name_alg;
    let session_handle =
        object
            .device()
            .start_policy_session(alg)
            .map_err(|source| UnsealError::Fatal {
                context: "cannot start policy session",
                source,
            })?;
    let mut session = ScopedHandle::new(object.device(), session_handle, "policy session");
    debug!(
        handle = format_args!("0x{session_handle:08x}"),
        alg = %alg,
        "policy session started"
    );

    policy::execute_policy_session(
        session.device(),
        session_handle,
        alg,
        key.static_policy(),
        key.dynamic_policy(),
    )
    .map_err(classify_policy_error)?;
    debug!("authorization policy asserted");

    let data = match session.device().unseal(object_handle, session_handle) {
        Ok(data) => data,
        Err(err) if is_unseal_policy_failure(&err) => {
            // Either the record does not match the object or the TPM is not
            // fully provisioned; both are reported as invalid key data
            return Err(UnsealError::invalid_key_data(
                "the authorization policy check failed during unsealing",
            ));
        }
        Err(source) => {
            return Err(UnsealError::Fatal {
                context: "cannot unseal key",
                source,
            })
        }
    };
    debug!("sealed object unsealed");

    let payload = payload::decode(key.version(), data)?;
    debug!(version = key.format_version(), "payload decoded");
    Ok(payload.into())
}

/// Load the sealed object under the storage root key
fn load<D: Device + ?Sized>(
    key: &SealedKeyData,
    device: &mut D,
    options: &UnsealOptions,
) -> Result<u32, UnsealError> {
    let srk = match device.resolve_persistent_handle(options.srk_handle) {
        Ok(handle) => handle,
        Err(err) if err.is_resource_unavailable(options.srk_handle) => {
            debug!(
                handle = format_args!("0x{:08x}", options.srk_handle),
                "no storage root key"
            );
            return Err(UnsealError::NotProvisioned);
        }
        Err(source) => {
            return Err(UnsealError::Fatal {
                context: "cannot create context for SRK",
                source,
            })
        }
    };

    let public = key.public_area().to_bytes();
    let err = match device.load_object(srk, &public, key.sealed_payload()) {
        Ok(handle) => return Ok(handle),
        Err(err) => err,
    };

    if err.is_resource_unavailable(srk) {
        return Err(UnsealError::NotProvisioned);
    }
    if !is_load_rejection(&err) {
        return Err(UnsealError::Fatal {
            context: "cannot load sealed key object into TPM",
            source: err,
        });
    }

    // The rejection could be the key data or the SRK it was sealed under
    debug!(error = %err, "sealed object rejected, probing SRK");
    match srk::probe(device, options.srk_handle, options.srk_template) {
        Ok(SrkStatus::Valid) => Err(UnsealError::invalid_key_data(format!(
            "cannot load sealed key object into TPM: {err}"
        ))),
        Ok(status) => {
            debug!(?status, "storage root key is not usable");
            Err(UnsealError::NotProvisioned)
        }
        Err(source) => Err(UnsealError::Fatal {
            context: "cannot determine if object at SRK handle is a primary storage key",
            source,
        }),
    }
}

/// A TPM2_Load failure caused by its inputs: any parameter, or the parent
fn is_load_rejection(err: &DeviceError) -> bool {
    err.tpm_code(TpmCc::Load)
        .map(|rc| rc.parameter_index().is_some() || rc.handle_index() == Some(1))
        .unwrap_or(false)
}

fn is_unseal_policy_failure(err: &DeviceError) -> bool {
    err.tpm_code(TpmCc::Unseal)
        .map(|rc| rc.is_session_error(TPM_RC_POLICY_FAIL, Some(1)))
        .unwrap_or(false)
}

fn classify_policy_error(err: PolicyError) -> UnsealError {
    match err {
        PolicyError::StaticData(_) | PolicyError::DynamicData(_) => UnsealError::invalid_key_data(
            format!("cannot complete authorization policy assertions: {err}"),
        ),
        PolicyError::LockIndexMissing { index } => {
            debug!(index = format_args!("0x{index:08x}"), "revocation index missing");
            UnsealError::invalid_key_data("required revocation index missing")
        }
        PolicyError::Device { context, source } => UnsealError::Fatal { context, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc::{ResponseCode, TPM_RC_HANDLE, TPM_RC_INTEGRITY, TPM_RC_VALUE};

    #[test]
    fn test_load_rejection_positions() {
        let load = |code| DeviceError::Tpm {
            command: TpmCc::Load,
            code,
        };
        assert!(is_load_rejection(&load(ResponseCode::parameter(TPM_RC_INTEGRITY, 1))));
        assert!(is_load_rejection(&load(ResponseCode::handle(TPM_RC_HANDLE, 1))));
        assert!(!is_load_rejection(&load(ResponseCode::session(TPM_RC_VALUE, 1))));
        assert!(!is_load_rejection(&DeviceError::Transport("eof".into())));
        assert!(!is_load_rejection(&DeviceError::Tpm {
            command: TpmCc::Unseal,
            code: ResponseCode::parameter(TPM_RC_INTEGRITY, 1),
        }));
    }

    #[test]
    fn test_unseal_policy_failure_detection() {
        let err = DeviceError::Tpm {
            command: TpmCc::Unseal,
            code: ResponseCode(0x99D),
        };
        assert!(is_unseal_policy_failure(&err));
        let err = DeviceError::Tpm {
            command: TpmCc::Unseal,
            code: ResponseCode::session(TPM_RC_POLICY_FAIL, 2),
        };
        assert!(!is_unseal_policy_failure(&err));
    }

    #[test]
    fn test_options_defaults_and_serde() {
        let options = UnsealOptions::default();
        assert_eq!(options.srk_handle, 0x81000001);
        assert_eq!(options.srk_template, SrkTemplate::Rsa2048);

        let parsed: UnsealOptions = serde_json::from_str(r#"{"srk_template":"ecc-p256"}"#).unwrap();
        assert_eq!(parsed.srk_handle, SRK_HANDLE);
        assert_eq!(parsed.srk_template, SrkTemplate::EccP256);

        assert!(serde_json::from_str::<UnsealOptions>(r#"{"srk":1}"#).is_err());
    }

    #[test]
    fn test_result_debug_hides_secrets() {
        let result = UnsealResult {
            key_material: Zeroizing::new(b"secret".to_vec()),
            auth_update_key: Zeroizing::new(Vec::new()),
        };
        assert_eq!(
            format!("{result:?}"),
            "UnsealResult { key_material_len: 6, auth_update_key_len: 0 }"
        );
    }
}
