//! Result image naming.
//!
//! Generates deterministic, collision-free paths for job results.
//!
//! Convention: `{root}/command_{id}/{server}_{generator}__{codes}__{digest}.png`
//!
//! - `codes` = contributing item code names joined by `-`, sanitized and truncated
//! - `digest` = first 8 hex chars of SHA-256 over the full job identity
//!
//! Fixer stages append `__{fixer}` to the stem of the image they consume.

use std::path::{Path, PathBuf};

use crate::hashing::sha256_hex;
use crate::types::DbId;

/// Longest readable code-name segment kept in a file name.
pub const MAX_CODES_LEN: usize = 96;

const DIGEST_LEN: usize = 8;

const RESULT_EXTENSION: &str = "png";

/// Everything that identifies one primary job's output.
#[derive(Debug, Clone)]
pub struct ResultName<'a> {
    pub server: &'a str,
    pub generator: &'a str,
    pub command_id: DbId,
    /// Readable part of the name, in contribution order.
    pub code_names: Vec<&'a str>,
    /// Stable identity of each contributing item (e.g. `group:item:slot`).
    pub identity: Vec<String>,
}

impl ResultName<'_> {
    /// Full result path under `root`.
    pub fn path_in(&self, root: &Path) -> PathBuf {
        let key = format!(
            "{}|{}|{}|{}",
            self.server,
            self.generator,
            self.command_id,
            self.identity.join(",")
        );
        let digest = &sha256_hex(key.as_bytes())[..DIGEST_LEN];

        let codes: String = self
            .code_names
            .iter()
            .map(|c| sanitize(c))
            .collect::<Vec<_>>()
            .join("-")
            .chars()
            .take(MAX_CODES_LEN)
            .collect();

        root.join(format!("command_{}", self.command_id)).join(format!(
            "{}_{}__{codes}__{digest}.{RESULT_EXTENSION}",
            sanitize(self.server),
            sanitize(self.generator),
        ))
    }
}

/// Result path for a fixer pass over the image at `input`.
pub fn fixer_result_path(input: &Path, fixer: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}__{}.{RESULT_EXTENSION}", sanitize(fixer)))
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
