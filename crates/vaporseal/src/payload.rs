// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoding of the cleartext returned by TPM2_Unseal

use zeroize::Zeroizing;

use crate::error::PayloadError;
use crate::keydata::KeyDataVersion;
use crate::wire::{Cursor, Writer};

/// Unsealed payload, one variant per payload layout
pub enum SealedPayload {
    Legacy {
        key: Zeroizing<Vec<u8>>,
    },
    Structured {
        key: Zeroizing<Vec<u8>>,
        auth_update_key: Zeroizing<Vec<u8>>,
    },
}

impl std::fmt::Debug for SealedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SealedPayload::Legacy { key } => f
                .debug_struct("Legacy")
                .field("key_len", &key.len())
                .finish(),
            SealedPayload::Structured {
                key,
                auth_update_key,
            } => f
                .debug_struct("Structured")
                .field("key_len", &key.len())
                .field("auth_update_key_len", &auth_update_key.len())
                .finish(),
        }
    }
}

/// Decode `data` according to the key data `version`
pub fn decode(
    version: KeyDataVersion,
    data: Zeroizing<Vec<u8>>,
) -> Result<SealedPayload, PayloadError> {
    match version {
        KeyDataVersion::Legacy => Ok(SealedPayload::Legacy { key: data }),
        KeyDataVersion::Structured(_) => {
            let mut cursor = Cursor::new(&data);
            let key = Zeroizing::new(cursor.read_tpm2b()?.to_vec());
            let auth_update_key = Zeroizing::new(cursor.read_tpm2b()?.to_vec());
            cursor.finish()?;
            Ok(SealedPayload::Structured {
                key,
                auth_update_key,
            })
        }
    }
}

/// Structured payload for `key` and `auth_update_key`
pub fn encode_v1(key: &[u8], auth_update_key: &[u8]) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(
        Writer::new()
            .write_tpm2b(key)
            .write_tpm2b(auth_update_key)
            .into_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    #[test]
    fn test_legacy_payload_is_raw_key() {
        let payload = decode(KeyDataVersion::Legacy, Zeroizing::new(b"raw key".to_vec())).unwrap();
        match payload {
            SealedPayload::Legacy { key } => assert_eq!(key.as_slice(), b"raw key"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_v1_payload() {
        let payload = decode(KeyDataVersion::V1, encode_v1(b"K", b"A")).unwrap();
        match payload {
            SealedPayload::Structured {
                key,
                auth_update_key,
            } => {
                assert_eq!(key.as_slice(), b"K");
                assert_eq!(auth_update_key.as_slice(), b"A");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_v1_payload_with_trailing_bytes() {
        let mut data = encode_v1(b"K", b"A");
        data.push(0xFF);
        assert!(matches!(
            decode(KeyDataVersion::V1, data),
            Err(PayloadError::Malformed(DecodeError::TrailingBytes { count: 1 }))
        ));
    }

    #[test]
    fn test_v1_payload_truncated() {
        let data = Zeroizing::new(vec![0x00, 0x04, b'K']);
        assert!(matches!(
            decode(KeyDataVersion::V1, data),
            Err(PayloadError::Malformed(DecodeError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_v1_payload_empty_key() {
        match decode(KeyDataVersion::V1, encode_v1(b"", b"A")).unwrap() {
            SealedPayload::Structured {
                key,
                auth_update_key,
            } => {
                assert!(key.is_empty());
                assert_eq!(auth_update_key.as_slice(), b"A");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_later_versions_use_structured_layout() {
        let payload = decode(KeyDataVersion::Structured(3), encode_v1(b"K", b"A")).unwrap();
        assert!(matches!(payload, SealedPayload::Structured { .. }));
    }

    #[test]
    fn test_debug_does_not_print_key() {
        let payload = decode(KeyDataVersion::Legacy, Zeroizing::new(b"secret".to_vec())).unwrap();
        let text = format!("{payload:?}");
        assert!(!text.contains("115"), "{text}");
        assert!(text.contains("key_len: 6"));
    }
}
