// SPDX-License-Identifier: MIT OR Apache-2.0

//! Software computation of TPM policy digests
//!
//! Mirrors the policyDigest updates the TPM performs for each assertion,
//! so a branch digest can be predicted without a trial session.

use crate::device::NvOperation;
use crate::pcr::{marshal_selection_list, PcrSelection};
use crate::{HashAlg, TpmCc};

/// Running policy digest for a single hash algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPolicy {
    alg: HashAlg,
    digest: Vec<u8>,
}

impl TrialPolicy {
    /// Fresh policy: digest of all zeros
    pub fn new(alg: HashAlg) -> Self {
        Self {
            alg,
            digest: vec![0u8; alg.digest_size()],
        }
    }

    pub fn alg(&self) -> HashAlg {
        self.alg
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn into_digest(self) -> Vec<u8> {
        self.digest
    }

    /// H(digest || TPM_CC_PolicyPCR || pcrs || pcrDigest)
    pub fn policy_pcr(&mut self, selection: &[PcrSelection], pcr_digest: &[u8]) -> &mut Self {
        let pcrs = marshal_selection_list(selection);
        self.extend(TpmCc::PolicyPCR, &[pcrs.as_slice(), pcr_digest])
    }

    /// H(digest || TPM_CC_PolicyNV || H(operandB || offset || operation) || nvName)
    pub fn policy_nv(
        &mut self,
        nv_name: &[u8],
        operand_b: &[u8],
        offset: u16,
        operation: NvOperation,
    ) -> &mut Self {
        let args = self.alg.hash(&[
            operand_b,
            &offset.to_be_bytes(),
            &(operation as u16).to_be_bytes(),
        ]);
        self.extend(TpmCc::PolicyNV, &[args.as_slice(), nv_name])
    }

    /// H(H(digest || TPM_CC_PolicySigned || keyName) || policyRef)
    pub fn policy_signed(&mut self, key_name: &[u8], policy_ref: &[u8]) -> &mut Self {
        self.extend(TpmCc::PolicySigned, &[key_name]);
        self.digest = self.alg.hash(&[self.digest.as_slice(), policy_ref]);
        self
    }

    /// H(0...0 || TPM_CC_PolicyOR || digests)
    ///
    /// The TPM only accepts this when the current digest is one of
    /// `digests`; callers check membership before relying on the result.
    pub fn policy_or(&mut self, digests: &[Vec<u8>]) -> &mut Self {
        self.digest = vec![0u8; self.alg.digest_size()];
        let parts: Vec<&[u8]> = digests.iter().map(Vec::as_slice).collect();
        self.extend(TpmCc::PolicyOR, &parts)
    }

    fn extend(&mut self, command: TpmCc, parts: &[&[u8]]) -> &mut Self {
        let cc = (command as u32).to_be_bytes();
        let mut input: Vec<&[u8]> = Vec::with_capacity(parts.len() + 2);
        input.push(&self.digest);
        input.push(&cc);
        input.extend_from_slice(parts);
        self.digest = self.alg.hash(&input);
        self
    }
}

/// PCR composite digest: H(value_0 || value_1 || ...) in selection order
pub fn pcr_composite_digest<'a>(
    alg: HashAlg,
    values: impl IntoIterator<Item = &'a [u8]>,
) -> Vec<u8> {
    let values: Vec<&[u8]> = values.into_iter().collect();
    alg.hash(&values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn test_policy_pcr_matches_manual_computation() {
        let values = [[0x11u8; 32], [0x22u8; 32]];
        let pcr_digest = pcr_composite_digest(HashAlg::Sha256, values.iter().map(|v| &v[..]));

        let mut hasher = Sha256::new();
        hasher.update(values[0]);
        hasher.update(values[1]);
        assert_eq!(pcr_digest, hasher.finalize().to_vec());

        let selection = vec![PcrSelection::new(HashAlg::Sha256, &[0, 7])];
        let mut trial = TrialPolicy::new(HashAlg::Sha256);
        trial.policy_pcr(&selection, &pcr_digest);

        let mut hasher = Sha256::new();
        hasher.update([0u8; 32]);
        hasher.update(0x0000017Fu32.to_be_bytes());
        hasher.update(1u32.to_be_bytes());
        hasher.update(0x000Bu16.to_be_bytes());
        hasher.update([3u8]);
        hasher.update([0x81, 0x00, 0x00]);
        hasher.update(&pcr_digest);
        assert_eq!(trial.digest(), hasher.finalize().as_slice());
    }

    #[test]
    fn test_policy_nv_matches_manual_computation() {
        let nv_name = [0x00, 0x0B, 0xAA, 0xBB];
        let operand = 7u64.to_be_bytes();
        let mut trial = TrialPolicy::new(HashAlg::Sha256);
        trial.policy_nv(&nv_name, &operand, 0, NvOperation::UnsignedLe);

        let args = Sha256::new()
            .chain_update(operand)
            .chain_update([0x00, 0x00])
            .chain_update([0x00, 0x09])
            .finalize();
        let expected = Sha256::new()
            .chain_update([0u8; 32])
            .chain_update(0x00000149u32.to_be_bytes())
            .chain_update(args)
            .chain_update(nv_name)
            .finalize();
        assert_eq!(trial.digest(), expected.as_slice());
    }

    #[test]
    fn test_policy_signed_matches_manual_computation() {
        let key_name = [0x00, 0x0B, 0x01, 0x02, 0x03];
        let mut trial = TrialPolicy::new(HashAlg::Sha256);
        trial.policy_signed(&key_name, &[]);

        let inner = Sha256::new()
            .chain_update([0u8; 32])
            .chain_update(0x00000160u32.to_be_bytes())
            .chain_update(key_name)
            .finalize();
        let expected = Sha256::digest(inner);
        assert_eq!(trial.digest(), expected.as_slice());
    }

    #[test]
    fn test_policy_or_resets_running_digest() {
        let digests = vec![vec![0x01; 32], vec![0x02; 32]];

        let mut from_fresh = TrialPolicy::new(HashAlg::Sha256);
        from_fresh.policy_or(&digests);

        let mut from_branch = TrialPolicy::new(HashAlg::Sha256);
        from_branch.policy_signed(b"name", &[]).policy_or(&digests);

        assert_eq!(from_fresh, from_branch);

        let expected = Sha256::new()
            .chain_update([0u8; 32])
            .chain_update(0x00000171u32.to_be_bytes())
            .chain_update([0x01; 32])
            .chain_update([0x02; 32])
            .finalize();
        assert_eq!(from_fresh.digest(), expected.as_slice());
    }

    #[test]
    fn test_digest_size_follows_algorithm() {
        let mut trial = TrialPolicy::new(HashAlg::Sha1);
        assert_eq!(trial.digest(), &[0u8; 20]);
        trial.policy_signed(b"name", b"ref");
        assert_eq!(trial.digest().len(), 20);
        assert_eq!(trial.alg(), HashAlg::Sha1);
    }
}
