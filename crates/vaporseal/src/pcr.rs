// SPDX-License-Identifier: MIT OR Apache-2.0

//! PCR selections (TPML_PCR_SELECTION)

use serde::Serialize;

use crate::error::DecodeError;
use crate::wire::{Cursor, Writer};
use crate::HashAlg;

/// Maximum number of banks in a selection list
pub const MAX_PCR_SELECTIONS: u32 = 16;

/// Maximum bitmap size (256 PCRs)
pub const MAX_PCR_SELECT_SIZE: u8 = 32;

/// Bitmap size used when building selections (PCRs 0-23)
const DEFAULT_SELECT_SIZE: usize = 3;

/// One bank of a PCR selection (TPMS_PCR_SELECTION)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PcrSelection {
    #[serde(serialize_with = "serialize_hash_alg")]
    pub hash: HashAlg,
    /// Never longer than [`MAX_PCR_SELECT_SIZE`]
    #[serde(with = "hex_bytes")]
    select: Vec<u8>,
}

impl PcrSelection {
    /// Build a selection of `indices` in the `hash` bank
    pub fn new(hash: HashAlg, indices: &[u8]) -> Self {
        let needed = indices
            .iter()
            .map(|&i| i as usize / 8 + 1)
            .max()
            .unwrap_or(0);
        let mut select = vec![0u8; needed.max(DEFAULT_SELECT_SIZE)];
        for &index in indices {
            select[index as usize / 8] |= 1 << (index % 8);
        }
        Self { hash, select }
    }

    /// Raw TPMS_PCR_SELECTION bitmap
    pub fn select(&self) -> &[u8] {
        &self.select
    }

    /// Selected PCR indices in ascending order
    pub fn indices(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (byte_idx, byte) in self.select.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    out.push((byte_idx * 8 + bit) as u8);
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.select.iter().all(|&b| b == 0)
    }
}

/// Read a TPML_PCR_SELECTION
pub(crate) fn read_selection_list(cursor: &mut Cursor<'_>) -> Result<Vec<PcrSelection>, DecodeError> {
    let count = cursor.read_u32()?;
    if count > MAX_PCR_SELECTIONS {
        return Err(DecodeError::PcrSelectionCountExceeded { count });
    }

    let mut selections = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let hash = HashAlg::try_from(cursor.read_u16()?)?;
        let size = cursor.read_u8()?;
        if size > MAX_PCR_SELECT_SIZE {
            return Err(DecodeError::PcrBitmapSizeExceeded { size });
        }
        let select = cursor.read_bytes(size as usize)?.to_vec();
        selections.push(PcrSelection { hash, select });
    }
    Ok(selections)
}

/// Write a TPML_PCR_SELECTION
pub(crate) fn write_selection_list(mut writer: Writer, selections: &[PcrSelection]) -> Writer {
    writer = writer.write_u32(selections.len() as u32);
    for sel in selections {
        writer = writer
            .write_u16(sel.hash.id())
            // bounded by MAX_PCR_SELECT_SIZE
            .write_u8(sel.select.len() as u8)
            .write_bytes(&sel.select);
    }
    writer
}

/// Marshaled TPML_PCR_SELECTION bytes
pub fn marshal_selection_list(selections: &[PcrSelection]) -> Vec<u8> {
    write_selection_list(Writer::new(), selections).into_vec()
}

fn serialize_hash_alg<S: serde::Serializer>(alg: &HashAlg, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(alg.name())
}

mod hex_bytes {
    pub fn serialize<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_bitmap() {
        let sel = PcrSelection::new(HashAlg::Sha256, &[0, 7, 12, 23]);
        assert_eq!(sel.select, vec![0x81, 0x10, 0x80]);
        assert_eq!(sel.indices(), vec![0, 7, 12, 23]);
        assert!(!sel.is_empty());
        assert!(PcrSelection::new(HashAlg::Sha1, &[]).is_empty());
    }

    #[test]
    fn test_selection_grows_past_pcr_23() {
        let sel = PcrSelection::new(HashAlg::Sha256, &[30]);
        assert_eq!(sel.select.len(), 4);
        assert_eq!(sel.indices(), vec![30]);
    }

    #[test]
    fn test_highest_pcr_fits_bitmap_limit() {
        let sel = PcrSelection::new(HashAlg::Sha256, &[255]);
        assert_eq!(sel.select().len(), MAX_PCR_SELECT_SIZE as usize);

        let bytes = marshal_selection_list(&[sel.clone()]);
        assert_eq!(bytes[6], MAX_PCR_SELECT_SIZE);
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(read_selection_list(&mut cursor).unwrap(), vec![sel]);
    }

    #[test]
    fn test_selection_list_wire_format() {
        let list = vec![PcrSelection::new(HashAlg::Sha256, &[7])];
        let bytes = marshal_selection_list(&list);
        assert_eq!(bytes, [0, 0, 0, 1, 0x00, 0x0B, 3, 0x80, 0x00, 0x00]);

        let mut cursor = Cursor::new(&bytes);
        assert_eq!(read_selection_list(&mut cursor).unwrap(), list);
        cursor.finish().unwrap();
    }

    #[test]
    fn test_selection_count_limit() {
        let bytes = [0, 0, 0, 17];
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(
            read_selection_list(&mut cursor),
            Err(DecodeError::PcrSelectionCountExceeded { count: 17 })
        );
    }

    #[test]
    fn test_bitmap_size_limit() {
        let bytes = [0, 0, 0, 1, 0x00, 0x0B, 33];
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(
            read_selection_list(&mut cursor),
            Err(DecodeError::PcrBitmapSizeExceeded { size: 33 })
        );
    }

    #[test]
    fn test_unknown_bank_algorithm() {
        let bytes = [0, 0, 0, 1, 0x00, 0x12, 3, 0, 0, 0];
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(
            read_selection_list(&mut cursor),
            Err(DecodeError::UnknownHashAlgorithm { alg_id: 0x0012 })
        );
    }
}
