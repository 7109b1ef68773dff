//! Error types for the node agent
//!
//! Every failure surfaced by this crate is a [`RodentError`]: a numeric code
//! from the static table in [`codes`], the domain and HTTP status registered
//! for it, optional free-form details, and a string metadata map carrying
//! diagnostics (captured command line, exit code, stderr, wrap provenance).
//!
//! Identity is `(code, domain)`. Message, details and metadata are
//! informational and never take part in equality.

pub mod codes;

pub use codes::{classify, Domain, ErrorCode, ErrorDefinition, UNKNOWN_DEFINITION};

use chrono::{SecondsFormat, Utc};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Well-known metadata keys
pub mod meta {
    pub const COMMAND: &str = "command";
    pub const EXIT_CODE: &str = "exit_code";
    pub const STDERR: &str = "stderr";
    pub const OUTPUT: &str = "output";
    pub const WRAPPED_CODE: &str = "wrapped_code";
    pub const WRAPPED_DOMAIN: &str = "wrapped_domain";
    pub const WRAPPED_MESSAGE: &str = "wrapped_message";
}

// =============================================================================
// RodentError
// =============================================================================

/// A classified failure
#[derive(Error, Debug, Clone)]
#[error("[{domain}-{code}] {message}{}", render_suffix(.details, .metadata))]
pub struct RodentError {
    code: u16,
    domain: Domain,
    message: &'static str,
    details: Option<String>,
    http_status: u16,
    metadata: BTreeMap<String, String>,
}

impl RodentError {
    /// Create an error for a registered code
    pub fn new(code: ErrorCode, details: impl Into<String>) -> Self {
        Self::from_definition(code.as_u16(), code.definition(), details.into())
    }

    /// Create an error from a raw numeric code
    ///
    /// Unregistered codes produce an `UNKNOWN` error with status 500.
    pub fn from_raw(code: u16, details: impl Into<String>) -> Self {
        Self::from_definition(code, classify(code), details.into())
    }

    /// Bare error for a code, suitable for matching with [`RodentError::is`]
    pub const fn sentinel(code: ErrorCode) -> Self {
        let def = code.definition();
        Self {
            code: code as u16,
            domain: def.domain,
            message: def.message,
            details: None,
            http_status: def.http_status,
            metadata: BTreeMap::new(),
        }
    }

    fn from_definition(code: u16, def: ErrorDefinition, details: String) -> Self {
        Self {
            code,
            domain: def.domain,
            message: def.message,
            details: (!details.is_empty()).then_some(details),
            http_status: def.http_status,
            metadata: BTreeMap::new(),
        }
    }

    /// Error for an external command that exited unsuccessfully
    pub fn command_failure(command: &str, exit_code: Option<i32>, stderr: &str) -> Self {
        let exit = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        Self::new(ErrorCode::CommandExecution, format!("exit status {}", exit))
            .with_metadata(meta::COMMAND, command)
            .with_metadata(meta::EXIT_CODE, exit)
            .with_metadata(meta::STDERR, stderr)
    }

    /// Re-classify under a new code
    ///
    /// Details and metadata carry over; the original code, domain and message
    /// are recorded under the `wrapped_*` metadata keys.
    pub fn wrap(self, code: ErrorCode) -> Self {
        let mut wrapped = Self::from_definition(
            code.as_u16(),
            code.definition(),
            self.details.unwrap_or_default(),
        );
        wrapped.metadata = self.metadata;
        wrapped
            .with_metadata(meta::WRAPPED_CODE, self.code.to_string())
            .with_metadata(meta::WRAPPED_DOMAIN, self.domain.as_str())
            .with_metadata(meta::WRAPPED_MESSAGE, self.message)
    }

    /// Classify a foreign error, keeping its text as details
    pub fn from_error(err: &dyn std::error::Error, code: ErrorCode) -> Self {
        Self::new(code, err.to_string())
    }

    /// Return a copy with one more metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Identity check against a sentinel, ignoring message and metadata
    pub fn is(&self, other: &RodentError) -> bool {
        self.code == other.code && self.domain == other.domain
    }

    /// Whether this error carries the given code
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code == code.as_u16() && self.domain == code.domain()
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// The registered code, if this error was built from one
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_raw(self.code).filter(|c| c.domain() == self.domain)
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn message(&self) -> &str {
        self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl PartialEq for RodentError {
    fn eq(&self, other: &Self) -> bool {
        self.is(other)
    }
}

impl Eq for RodentError {}

fn render_suffix(details: &Option<String>, metadata: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    if let Some(details) = details {
        out.push_str(" - ");
        out.push_str(details);
    }
    if let Some(stderr) = metadata.get(meta::STDERR).filter(|s| !s.trim().is_empty()) {
        out.push_str("\nCommand output: ");
        out.push_str(stderr.trim_end());
    }
    out
}

impl Serialize for RodentError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RodentError", 6)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("domain", &self.domain)?;
        state.serialize_field("message", self.message)?;
        match &self.details {
            Some(details) => state.serialize_field("details", details)?,
            None => state.skip_field("details")?,
        }
        if self.metadata.is_empty() {
            state.skip_field("metadata")?;
        } else {
            state.serialize_field("metadata", &self.metadata)?;
        }
        state.serialize_field(
            "timestamp",
            &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        )?;
        state.end()
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, RodentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_table() {
        let err = RodentError::new(ErrorCode::ZfsDatasetNotFound, "tank/missing");
        assert_eq!(err.code(), 2030);
        assert_eq!(err.domain(), Domain::Zfs);
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.details(), Some("tank/missing"));
        assert_eq!(err.kind(), Some(ErrorCode::ZfsDatasetNotFound));
    }

    #[test]
    fn test_unknown_raw_code_degrades() {
        let err = RodentError::from_raw(4242, "mystery");
        assert_eq!(err.domain(), Domain::Unknown);
        assert_eq!(err.message(), "Unknown error");
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_display_format() {
        let err = RodentError::new(ErrorCode::ZfsNameLeadingSlash, "/tank");
        assert_eq!(err.to_string(), "[ZFS-2016] Leading slash in name - /tank");

        let err = RodentError::new(ErrorCode::ZfsNameLeadingSlash, "");
        assert_eq!(err.to_string(), "[ZFS-2016] Leading slash in name");
    }

    #[test]
    fn test_display_includes_stderr_but_not_other_metadata() {
        let err = RodentError::command_failure("zfs destroy tank/x", Some(1), "cannot destroy\n");
        let rendered = err.to_string();
        assert!(rendered.starts_with("[CMD-1301] Command execution failed"));
        assert!(rendered.ends_with("\nCommand output: cannot destroy"));
        assert!(!rendered.contains("zfs destroy tank/x"));
    }

    #[test]
    fn test_wrap_preserves_metadata() {
        let original = RodentError::command_failure("zfs create tank/a", Some(1), "boom")
            .with_metadata("custom", "value");
        let wrapped = original.clone().wrap(ErrorCode::ZfsDatasetCreate);

        assert!(wrapped.has_code(ErrorCode::ZfsDatasetCreate));
        for key in original.metadata().keys() {
            assert_eq!(wrapped.metadata_value(key), original.metadata_value(key));
        }
        assert_eq!(wrapped.metadata_value(meta::WRAPPED_CODE), Some("1301"));
        assert_eq!(wrapped.metadata_value(meta::WRAPPED_DOMAIN), Some("CMD"));
        assert_eq!(
            wrapped.metadata_value(meta::WRAPPED_MESSAGE),
            Some("Command execution failed")
        );
        assert_eq!(wrapped.details(), original.details());
    }

    #[test]
    fn test_is_ignores_message_and_metadata() {
        let sentinel = RodentError::sentinel(ErrorCode::ZfsDatasetPropertyNotFound);
        let err = RodentError::new(ErrorCode::ZfsDatasetPropertyNotFound, "quota")
            .with_metadata("stderr", "bad property list");
        assert!(err.is(&sentinel));
        assert_eq!(err, sentinel);

        let wrapped = RodentError::new(ErrorCode::CommandExecution, "x")
            .wrap(ErrorCode::ZfsDatasetPropertyNotFound);
        assert!(wrapped.is(&sentinel));
        assert!(!wrapped.is(&RodentError::sentinel(ErrorCode::CommandExecution)));
    }

    #[test]
    fn test_json_shape() {
        let err = RodentError::new(ErrorCode::ZfsDatasetNotFound, "tank/x")
            .with_metadata(meta::EXIT_CODE, "1");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["code"], 2030);
        assert_eq!(json["domain"], "ZFS");
        assert_eq!(json["message"], "ZFS dataset not found");
        assert_eq!(json["details"], "tank/x");
        assert_eq!(json["metadata"]["exit_code"], "1");
        assert!(json.get("http_status").is_none());
        let ts = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_json_omits_empty_optionals() {
        let err = RodentError::sentinel(ErrorCode::ServerContextCancelled);
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("metadata").is_none());
    }
}
