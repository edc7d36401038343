// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inspect a sealed key file
//!
//! Reads key data from a file or stdin, decodes it, and prints a JSON
//! summary of the record and its authorization policy. No TPM is touched.

use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;
use vaporseal::pcr::PcrSelection;
use vaporseal::policy::verify_ecdsa_p256;
use vaporseal::SealedKeyData;

/// JSON-friendly summary with hex-encoded binary fields
#[derive(Serialize)]
struct KeyDataInfoJson {
    version: u32,
    object_type: &'static str,
    name_alg: &'static str,
    object_name: String,
    auth_policy: String,
    lock_index: String,
    pcr_selection: Vec<PcrSelection>,
    authorized_branches: usize,
    pcr_digest: String,
    revocation_counter: u64,
    /// Local ECDSA check of the dynamic policy signature
    signature_valid: bool,
}

impl From<&SealedKeyData> for KeyDataInfoJson {
    fn from(data: &SealedKeyData) -> Self {
        let public = data.public_area();
        let static_policy = data.static_policy();
        let dynamic_policy = data.dynamic_policy();

        let signature_valid = verify_ecdsa_p256(
            &dynamic_policy.signed_message(),
            &dynamic_policy.signature,
            &static_policy.update_key,
        )
        .is_ok();

        KeyDataInfoJson {
            version: data.format_version(),
            object_type: public.object_type.name(),
            name_alg: public.name_alg.name(),
            object_name: hex::encode(public.name()),
            auth_policy: hex::encode(&public.auth_policy),
            lock_index: format!("0x{:08x}", static_policy.lock_index),
            pcr_selection: static_policy.pcr_selection.clone(),
            authorized_branches: static_policy.or_digests.len(),
            pcr_digest: hex::encode(&dynamic_policy.pcr_digest),
            revocation_counter: dynamic_policy.revocation_counter,
            signature_valid,
        }
    }
}

fn read_input(path: Option<&str>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path != "-" => {
            fs::read(path).with_context(|| format!("failed to read {path}"))
        }
        _ => {
            let mut input = Vec::new();
            io::stdin()
                .read_to_end(&mut input)
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}

fn run() -> Result<String> {
    let args: Vec<String> = std::env::args().collect();
    let bytes = read_input(args.get(1).map(String::as_str))?;
    let data = SealedKeyData::from_bytes(&bytes).context("cannot decode key data")?;
    let info = KeyDataInfoJson::from(&data);
    Ok(serde_json::to_string_pretty(&info)?)
}

fn main() -> ExitCode {
    match run() {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
