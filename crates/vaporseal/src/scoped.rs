// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transient TPM handles released on scope exit

use tracing::{debug, warn};

use crate::device::Device;

/// Flushes a transient handle when dropped
///
/// Holds the device borrow for its lifetime; use [`ScopedHandle::device`]
/// to keep issuing commands. A guard created from another guard's device
/// is dropped first, so sessions are flushed before the objects they were
/// opened against.
pub(crate) struct ScopedHandle<'a, D: Device + ?Sized> {
    device: &'a mut D,
    handle: u32,
    kind: &'static str,
}

impl<'a, D: Device + ?Sized> ScopedHandle<'a, D> {
    pub(crate) fn new(device: &'a mut D, handle: u32, kind: &'static str) -> Self {
        Self {
            device,
            handle,
            kind,
        }
    }

    pub(crate) fn device(&mut self) -> &mut D {
        &mut *self.device
    }
}

impl<D: Device + ?Sized> Drop for ScopedHandle<'_, D> {
    fn drop(&mut self) {
        match self.device.flush_context(self.handle) {
            Ok(()) => debug!(
                kind = self.kind,
                handle = format_args!("0x{:08x}", self.handle),
                "flushed"
            ),
            Err(err) => warn!(
                kind = self.kind,
                handle = format_args!("0x{:08x}", self.handle),
                error = %err,
                "cannot flush context"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::test_support::MockTpm;
    use crate::{HashAlg, TpmCc};

    #[test]
    fn test_flushes_on_drop() {
        let mut tpm = MockTpm::new();
        let handle = tpm.start_policy_session(HashAlg::Sha256).unwrap();
        {
            let mut guard = ScopedHandle::new(&mut tpm, handle, "session");
            assert!(guard.device().session_digest(handle).is_some());
        }
        assert_eq!(tpm.counts().sessions_flushed, 1);
        assert!(tpm.session_digest(handle).is_none());
    }

    #[test]
    fn test_nested_guards_release_inner_first() {
        let mut tpm = MockTpm::new();
        let outer_handle = tpm.start_policy_session(HashAlg::Sha256).unwrap();
        {
            let mut outer = ScopedHandle::new(&mut tpm, outer_handle, "outer");
            let inner_handle = outer.device().start_policy_session(HashAlg::Sha1).unwrap();
            let _inner = ScopedHandle::new(outer.device(), inner_handle, "inner");
        }
        assert_eq!(
            tpm.flush_order(),
            &[outer_handle + 1, outer_handle],
            "inner guard flushed before outer"
        );
    }

    #[test]
    fn test_flush_failure_is_swallowed() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut tpm = MockTpm::new();
        let handle = tpm.start_policy_session(HashAlg::Sha256).unwrap();
        tpm.inject(TpmCc::FlushContext, DeviceError::Transport("gone".into()));
        drop(ScopedHandle::new(&mut tpm, handle, "session"));
        assert_eq!(tpm.calls(TpmCc::FlushContext), 1);
        assert_eq!(tpm.counts().sessions_flushed, 0);
    }
}
