// SPDX-License-Identifier: MIT OR Apache-2.0

//! Big-endian TPM marshaling helpers

use crate::error::{DecodeError, EncodeError};

/// Bounds-checked reader over TPM-marshaled bytes
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Read exactly `len` bytes, returning error on overflow or truncation
    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(DecodeError::Overflow {
                offset: self.offset,
            })?;
        if end > self.data.len() {
            return Err(DecodeError::Truncated {
                offset: self.offset,
            });
        }
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a TPM2B structure (2-byte size prefix + data)
    pub(crate) fn read_tpm2b(&mut self) -> Result<&'a [u8], DecodeError> {
        let size = self.read_u16()? as usize;
        self.read_bytes(size)
    }

    /// Bytes consumed since `start`
    pub(crate) fn since(&self, start: usize) -> &'a [u8] {
        &self.data[start..self.offset]
    }

    /// Fail unless every byte has been consumed
    pub(crate) fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(DecodeError::TrailingBytes { count }),
        }
    }
}

/// Builder for TPM-marshaled bytes
///
/// A TPM2B longer than `u16::MAX` is not written; the first such length is
/// kept and reported by [`Writer::finish`].
#[derive(Default)]
pub(crate) struct Writer {
    data: Vec<u8>,
    oversized: Option<usize>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write_bytes(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub(crate) fn write_u8(mut self, val: u8) -> Self {
        self.data.push(val);
        self
    }

    pub(crate) fn write_u16(mut self, val: u16) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    pub(crate) fn write_u32(mut self, val: u32) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    pub(crate) fn write_u64(mut self, val: u64) -> Self {
        self.data.extend_from_slice(&val.to_be_bytes());
        self
    }

    /// Write a TPM2B structure (2-byte size prefix + data)
    pub(crate) fn write_tpm2b(mut self, data: &[u8]) -> Self {
        match u16::try_from(data.len()) {
            Ok(size) => self.write_u16(size).write_bytes(data),
            Err(_) => {
                self.oversized.get_or_insert(data.len());
                self
            }
        }
    }

    /// Write a TPM2B whose contents are built by `build`
    pub(crate) fn write_tpm2b_with(self, build: impl FnOnce(Writer) -> Writer) -> Self {
        let inner = build(Writer::new());
        let mut writer = self.write_tpm2b(&inner.data);
        if let Some(len) = inner.oversized {
            writer.oversized.get_or_insert(len);
        }
        writer
    }

    /// Marshaled bytes, or the length of the first TPM2B that did not fit
    pub(crate) fn finish(self) -> Result<Vec<u8>, EncodeError> {
        match self.oversized {
            Some(len) => Err(EncodeError::FieldTooLarge { len }),
            None => Ok(self.data),
        }
    }

    /// Marshaled bytes for inputs bounded by construction
    pub(crate) fn into_vec(self) -> Vec<u8> {
        debug_assert!(self.oversized.is_none());
        self.data
    }
}
