// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage root key templates and provisioning probe

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::Device;
use crate::error::DeviceError;
use crate::public::{ObjectAttributes, ObjectType, PublicArea};
use crate::wire::Writer;
use crate::{HashAlg, TpmAlg, TPM_ECC_NIST_P256, TPM_RH_OWNER};

/// Creation template expected for the storage root key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SrkTemplate {
    /// TCG RSA-2048 storage key template
    #[default]
    Rsa2048,
    /// TCG ECC NIST P-256 storage key template
    EccP256,
}

impl SrkTemplate {
    /// Template public area, with the unique field as the TCG guidance sets it
    pub fn public_area(self) -> PublicArea {
        let attributes = ObjectAttributes::FIXED_TPM
            | ObjectAttributes::FIXED_PARENT
            | ObjectAttributes::SENSITIVE_DATA_ORIGIN
            | ObjectAttributes::USER_WITH_AUTH
            | ObjectAttributes::NO_DA
            | ObjectAttributes::RESTRICTED
            | ObjectAttributes::DECRYPT;

        // AES-128-CFB inner wrapper, no signing scheme
        let symmetric = Writer::new()
            .write_u16(TpmAlg::Aes as u16)
            .write_u16(128)
            .write_u16(TpmAlg::Cfb as u16)
            .write_u16(TpmAlg::Null as u16);

        match self {
            SrkTemplate::Rsa2048 => PublicArea {
                object_type: ObjectType::Rsa,
                name_alg: HashAlg::Sha256,
                attributes,
                auth_policy: Vec::new(),
                parameters: symmetric.write_u16(2048).write_u32(0).into_vec(),
                unique: Writer::new().write_tpm2b(&[0u8; 256]).into_vec(),
            },
            SrkTemplate::EccP256 => PublicArea {
                object_type: ObjectType::Ecc,
                name_alg: HashAlg::Sha256,
                attributes,
                auth_policy: Vec::new(),
                parameters: symmetric
                    .write_u16(TPM_ECC_NIST_P256)
                    .write_u16(TpmAlg::Null as u16)
                    .into_vec(),
                unique: Writer::new()
                    .write_tpm2b(&[0u8; 32])
                    .write_tpm2b(&[0u8; 32])
                    .into_vec(),
            },
        }
    }
}

/// What sits at the storage root key handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrkStatus {
    Missing,
    /// Something is persisted there but it is not the expected storage key
    WrongTemplate,
    Valid,
}

/// Qualified name of an object created directly under `hierarchy`:
/// nameAlg || H_nameAlg(hierarchy handle || name)
pub fn primary_qualified_name(hierarchy: u32, name: &[u8], name_alg: HashAlg) -> Vec<u8> {
    let mut qn = name_alg.id().to_be_bytes().to_vec();
    qn.extend(name_alg.hash(&[&hierarchy.to_be_bytes()[..], name]));
    qn
}

/// Check that `handle` holds a primary storage key in the owner hierarchy
/// created from `template`
pub fn probe<D: Device + ?Sized>(
    device: &mut D,
    handle: u32,
    template: SrkTemplate,
) -> Result<SrkStatus, DeviceError> {
    let read = match device.read_public(handle) {
        Ok(read) => read,
        Err(err) if err.is_resource_unavailable(handle) => {
            debug!(handle = format_args!("0x{handle:08x}"), "no object at SRK handle");
            return Ok(SrkStatus::Missing);
        }
        Err(err) => return Err(err),
    };

    if !read.public.matches_template(&template.public_area()) {
        debug!(
            handle = format_args!("0x{handle:08x}"),
            object_type = read.public.object_type.name(),
            "SRK does not match the storage key template"
        );
        return Ok(SrkStatus::WrongTemplate);
    }

    let name = read.public.name();
    if read.name != name {
        debug!("SRK name does not match its public area");
        return Ok(SrkStatus::WrongTemplate);
    }
    if read.qualified_name != primary_qualified_name(TPM_RH_OWNER, &name, read.public.name_alg) {
        debug!("SRK is not a primary key in the owner hierarchy");
        return Ok(SrkStatus::WrongTemplate);
    }

    Ok(SrkStatus::Valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTpm;
    use crate::SRK_HANDLE;

    #[test]
    fn test_probe_missing() {
        let mut tpm = MockTpm::new();
        assert_eq!(
            probe(&mut tpm, SRK_HANDLE, SrkTemplate::Rsa2048).unwrap(),
            SrkStatus::Missing
        );
    }

    #[test]
    fn test_probe_valid() {
        let mut tpm = MockTpm::new();
        tpm.provision_srk(SRK_HANDLE, SrkTemplate::Rsa2048, b"seed");
        assert_eq!(
            probe(&mut tpm, SRK_HANDLE, SrkTemplate::Rsa2048).unwrap(),
            SrkStatus::Valid
        );
    }

    #[test]
    fn test_probe_wrong_template() {
        let mut tpm = MockTpm::new();
        tpm.provision_srk(SRK_HANDLE, SrkTemplate::EccP256, b"seed");
        assert_eq!(
            probe(&mut tpm, SRK_HANDLE, SrkTemplate::Rsa2048).unwrap(),
            SrkStatus::WrongTemplate
        );
        assert_eq!(
            probe(&mut tpm, SRK_HANDLE, SrkTemplate::EccP256).unwrap(),
            SrkStatus::Valid
        );
    }

    #[test]
    fn test_probe_wrong_hierarchy() {
        let mut tpm = MockTpm::new();
        tpm.provision_srk(SRK_HANDLE, SrkTemplate::Rsa2048, b"seed");
        tpm.set_hierarchy(SRK_HANDLE, 0x4000000B);
        assert_eq!(
            probe(&mut tpm, SRK_HANDLE, SrkTemplate::Rsa2048).unwrap(),
            SrkStatus::WrongTemplate
        );
    }

    #[test]
    fn test_probe_propagates_device_failure() {
        let mut tpm = MockTpm::new();
        tpm.provision_srk(SRK_HANDLE, SrkTemplate::Rsa2048, b"seed");
        tpm.inject(
            crate::TpmCc::ReadPublic,
            DeviceError::Transport("gone".into()),
        );
        assert!(matches!(
            probe(&mut tpm, SRK_HANDLE, SrkTemplate::Rsa2048),
            Err(DeviceError::Transport(_))
        ));
    }

    #[test]
    fn test_template_serde_names() {
        let json = serde_json::to_string(&SrkTemplate::EccP256).unwrap();
        assert_eq!(json, "\"ecc-p256\"");
        let parsed: SrkTemplate = serde_json::from_str("\"rsa2048\"").unwrap();
        assert_eq!(parsed, SrkTemplate::Rsa2048);
    }
}
