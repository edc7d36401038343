// SPDX-License-Identifier: MIT OR Apache-2.0

//! TPM 2.0 response code decoding
//!
//! Format-one codes carry the number of the handle, parameter or session
//! the error relates to. The unseal path uses that position to tell key
//! data problems apart from device faults.

use std::fmt;

/// Format selector: set for format-one codes
pub const RC_FMT1: u32 = 0x080;
/// Format-one: set when N identifies a parameter
pub const RC_P: u32 = 0x040;
/// Format-one: set when N identifies a session (handle form otherwise)
pub const RC_S: u32 = 0x800;
/// Format-zero: TPM 2.0 error (as opposed to a TPM 1.2 code)
pub const RC_VER1: u32 = 0x100;
/// Format-zero: warning class
pub const RC_WARN: u32 = 0x900;

pub const TPM_RC_SUCCESS: u32 = 0x000;
pub const TPM_RC_VALUE: u32 = RC_FMT1 + 0x004;
pub const TPM_RC_HIERARCHY: u32 = RC_FMT1 + 0x005;
pub const TPM_RC_TYPE: u32 = RC_FMT1 + 0x00A;
pub const TPM_RC_HANDLE: u32 = RC_FMT1 + 0x00B;
pub const TPM_RC_SIZE: u32 = RC_FMT1 + 0x015;
pub const TPM_RC_SIGNATURE: u32 = RC_FMT1 + 0x01B;
pub const TPM_RC_KEY: u32 = RC_FMT1 + 0x01C;
pub const TPM_RC_POLICY_FAIL: u32 = RC_FMT1 + 0x01D;
pub const TPM_RC_INTEGRITY: u32 = RC_FMT1 + 0x01F;
pub const TPM_RC_BINDING: u32 = RC_FMT1 + 0x025;
pub const TPM_RC_POLICY: u32 = RC_VER1 + 0x026;
pub const TPM_RC_NV_UNINITIALIZED: u32 = RC_VER1 + 0x04A;
pub const TPM_RC_LOCKOUT: u32 = RC_WARN + 0x021;
pub const TPM_RC_RETRY: u32 = RC_WARN + 0x022;

/// A raw TPM_RC value returned by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u32);

impl ResponseCode {
    /// Format-one code tied to parameter `n` (1-15)
    pub fn parameter(base: u32, n: u8) -> Self {
        Self(base | RC_P | ((u32::from(n) & 0xF) << 8))
    }

    /// Format-one code tied to handle `n` (1-7)
    pub fn handle(base: u32, n: u8) -> Self {
        Self(base | ((u32::from(n) & 0x7) << 8))
    }

    /// Format-one code tied to session `n` (1-7)
    pub fn session(base: u32, n: u8) -> Self {
        Self(base | RC_S | ((u32::from(n) & 0x7) << 8))
    }

    pub fn is_format_one(&self) -> bool {
        self.0 & RC_FMT1 != 0
    }

    /// Error code with the position bits stripped
    pub fn base(&self) -> u32 {
        if self.is_format_one() {
            self.0 & (RC_FMT1 | 0x03F)
        } else {
            self.0 & 0xFFF
        }
    }

    /// Parameter number, for format-one codes in the parameter form
    pub fn parameter_index(&self) -> Option<u8> {
        if self.is_format_one() && self.0 & RC_P != 0 {
            Some(((self.0 >> 8) & 0xF) as u8)
        } else {
            None
        }
    }

    /// Handle number, for format-one codes in the handle form
    pub fn handle_index(&self) -> Option<u8> {
        if !self.is_format_one() || self.0 & (RC_P | RC_S) != 0 {
            return None;
        }
        match (self.0 >> 8) & 0x7 {
            0 => None,
            n => Some(n as u8),
        }
    }

    /// Session number, for format-one codes in the session form
    pub fn session_index(&self) -> Option<u8> {
        if !self.is_format_one() || self.0 & RC_P != 0 || self.0 & RC_S == 0 {
            return None;
        }
        Some(((self.0 >> 8) & 0x7) as u8)
    }

    /// True when this is `base` reported against parameter `n`
    /// (any parameter when `n` is `None`)
    pub fn is_parameter_error(&self, base: u32, n: Option<u8>) -> bool {
        self.base() == base && matches_position(self.parameter_index(), n)
    }

    pub fn is_handle_error(&self, base: u32, n: Option<u8>) -> bool {
        self.base() == base && matches_position(self.handle_index(), n)
    }

    pub fn is_session_error(&self, base: u32, n: Option<u8>) -> bool {
        self.base() == base && matches_position(self.session_index(), n)
    }

    fn base_name(&self) -> Option<&'static str> {
        let name = match self.base() {
            TPM_RC_SUCCESS => "TPM_RC_SUCCESS",
            TPM_RC_VALUE => "TPM_RC_VALUE",
            TPM_RC_HIERARCHY => "TPM_RC_HIERARCHY",
            TPM_RC_TYPE => "TPM_RC_TYPE",
            TPM_RC_HANDLE => "TPM_RC_HANDLE",
            TPM_RC_SIZE => "TPM_RC_SIZE",
            TPM_RC_SIGNATURE => "TPM_RC_SIGNATURE",
            TPM_RC_KEY => "TPM_RC_KEY",
            TPM_RC_POLICY_FAIL => "TPM_RC_POLICY_FAIL",
            TPM_RC_INTEGRITY => "TPM_RC_INTEGRITY",
            TPM_RC_BINDING => "TPM_RC_BINDING",
            TPM_RC_POLICY => "TPM_RC_POLICY",
            TPM_RC_NV_UNINITIALIZED => "TPM_RC_NV_UNINITIALIZED",
            TPM_RC_LOCKOUT => "TPM_RC_LOCKOUT",
            TPM_RC_RETRY => "TPM_RC_RETRY",
            _ => return None,
        };
        Some(name)
    }
}

fn matches_position(actual: Option<u8>, wanted: Option<u8>) -> bool {
    match (actual, wanted) {
        (Some(a), Some(w)) => a == w,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base_name() {
            Some(name) => write!(f, "{name}")?,
            None => write!(f, "TPM_RC 0x{:03x}", self.base())?,
        }
        if let Some(n) = self.parameter_index() {
            write!(f, " (parameter {n})")?;
        } else if let Some(n) = self.session_index() {
            write!(f, " (session {n})")?;
        } else if let Some(n) = self.handle_index() {
            write!(f, " (handle {n})")?;
        }
        write!(f, " [0x{:08x}]", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_fail_on_session_one() {
        let rc = ResponseCode(0x0000099D);
        assert!(rc.is_format_one());
        assert_eq!(rc.base(), TPM_RC_POLICY_FAIL);
        assert_eq!(rc.session_index(), Some(1));
        assert_eq!(rc.parameter_index(), None);
        assert_eq!(rc.handle_index(), None);
        assert!(rc.is_session_error(TPM_RC_POLICY_FAIL, Some(1)));
        assert!(!rc.is_session_error(TPM_RC_POLICY_FAIL, Some(2)));
        assert_eq!(ResponseCode::session(TPM_RC_POLICY_FAIL, 1), rc);
    }

    #[test]
    fn test_parameter_form() {
        // TPM_RC_VALUE on parameter 1
        let rc = ResponseCode(0x000001C4);
        assert_eq!(rc.base(), TPM_RC_VALUE);
        assert_eq!(rc.parameter_index(), Some(1));
        assert!(rc.is_parameter_error(TPM_RC_VALUE, None));
        assert!(rc.is_parameter_error(TPM_RC_VALUE, Some(1)));
        assert!(!rc.is_handle_error(TPM_RC_VALUE, None));
        assert_eq!(ResponseCode::parameter(TPM_RC_VALUE, 1), rc);
    }

    #[test]
    fn test_handle_form() {
        let rc = ResponseCode::handle(TPM_RC_TYPE, 1);
        assert_eq!(rc.0, 0x0000018A);
        assert_eq!(rc.handle_index(), Some(1));
        assert_eq!(rc.session_index(), None);
        assert!(rc.is_handle_error(TPM_RC_TYPE, Some(1)));
    }

    #[test]
    fn test_format_zero_codes() {
        let rc = ResponseCode(TPM_RC_POLICY);
        assert!(!rc.is_format_one());
        assert_eq!(rc.base(), TPM_RC_POLICY);
        assert_eq!(rc.parameter_index(), None);
        assert_eq!(rc.handle_index(), None);

        let lockout = ResponseCode(TPM_RC_LOCKOUT);
        assert_eq!(lockout.base(), 0x921);
        assert_eq!(lockout.to_string(), "TPM_RC_LOCKOUT [0x00000921]");
    }

    #[test]
    fn test_display_includes_position() {
        let rc = ResponseCode::parameter(TPM_RC_INTEGRITY, 1);
        assert_eq!(rc.to_string(), "TPM_RC_INTEGRITY (parameter 1) [0x000001df]");
    }
}
