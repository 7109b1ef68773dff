//! Stderr classification
//!
//! Maps well-known engine diagnostics onto semantic error codes so that
//! callers can branch on "not found" or "permission denied" without parsing
//! text themselves. Rules are checked in order; the first match wins.

use super::spec::Program;
use crate::error::{ErrorCode, RodentError};

/// Diagnostics printed by the ssh client itself
const SSH_RULES: &[(&str, ErrorCode)] = &[
    ("host key verification failed", ErrorCode::CommandPermission),
    ("permission denied (publickey", ErrorCode::CommandPermission),
    ("could not resolve hostname", ErrorCode::CommandExecution),
];

/// Diagnostics printed by `zfs` (locally or through ssh)
const ZFS_RULES: &[(&str, ErrorCode)] = &[
    ("dataset does not exist", ErrorCode::ZfsDatasetNotFound),
    ("could not find any snapshots to destroy", ErrorCode::ZfsDatasetNotFound),
    ("no such pool", ErrorCode::ZfsPoolNotFound),
    ("bad property list: invalid property", ErrorCode::ZfsDatasetPropertyNotFound),
    ("invalid property", ErrorCode::ZfsDatasetInvalidProperty),
    ("bad numeric value", ErrorCode::ZfsInvalidPropertyValue),
    ("disk quota exceeded", ErrorCode::ZfsQuotaExceeded),
    ("no resume token", ErrorCode::ZfsDatasetNoReceiveToken),
    ("input/output error", ErrorCode::ZfsIoError),
    ("permission denied", ErrorCode::ZfsPermissionDenied),
    ("operation not permitted", ErrorCode::ZfsPermissionDenied),
];

/// Code for a stderr text, if any rule recognises it
pub fn classify_stderr(program: Program, stderr: &str) -> Option<ErrorCode> {
    let haystack = stderr.to_lowercase();
    let rules: &[&[(&str, ErrorCode)]] = match program {
        Program::Ssh => &[SSH_RULES, ZFS_RULES],
        Program::Zfs => &[ZFS_RULES],
    };

    rules
        .iter()
        .flat_map(|table| table.iter())
        .find(|(needle, _)| haystack.contains(needle))
        .map(|(_, code)| *code)
}

/// Re-classify a generic command failure using its captured stderr
pub fn refine(program: Program, err: RodentError, stderr: &str) -> RodentError {
    match classify_stderr(program, stderr) {
        Some(code) if !err.has_code(code) => err.wrap(code),
        _ => err,
    }
}
