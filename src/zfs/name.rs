//! Hierarchical name validation
//!
//! A name is `pool[/component]*[@snapshot|#bookmark]`. Validation is pure
//! and reports only the first violated rule, checked in a fixed order:
//!
//! 1. empty, leading slash, trailing slash
//! 2. more than one `@`/`#` delimiter
//! 3. per component: empty, invalid character, reserved or disk-like pool
//!    name, `.` and `..`
//! 4. pool must begin with a letter
//! 5. total length
//! 6. delimiter required by the kind

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorCode, RodentError, Result};

/// Names this long or longer are rejected
pub const MAX_NAME_LEN: usize = 256;

/// Longest accepted property value
pub const MAX_PROPERTY_VALUE_LEN: usize = 8192;

/// Longest accepted property name
pub const MAX_PROPERTY_NAME_LEN: usize = 256;

const RESERVED_PREFIXES: &[&str] = &["mirror", "raidz", "draid"];
const RESERVED_NAMES: &[&str] = &["spare", "log"];

/// What a name is expected to denote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameKind {
    Pool,
    /// A dataset, snapshot or bookmark
    Dataset,
    Snapshot,
    Bookmark,
}

/// Snapshot or bookmark separator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delimiter {
    Snapshot,
    Bookmark,
}

impl Delimiter {
    pub const fn as_char(&self) -> char {
        match self {
            Delimiter::Snapshot => '@',
            Delimiter::Bookmark => '#',
        }
    }
}

// =============================================================================
// DatasetName
// =============================================================================

/// A validated name split into its parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetName {
    raw: String,
    components: Vec<String>,
    delimiter: Option<Delimiter>,
    suffix: Option<String>,
}

impl DatasetName {
    /// Validate `name` as `kind` and split it
    pub fn parse(name: &str, kind: NameKind) -> Result<Self> {
        validate(name, kind)?;

        let (base, delimiter, suffix) = split_delimiter(name);
        Ok(Self {
            raw: name.to_string(),
            components: base.split('/').map(str::to_string).collect(),
            delimiter,
            suffix: suffix.map(str::to_string),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn pool(&self) -> &str {
        self.components.first().map(String::as_str).unwrap_or_default()
    }

    /// Path components including the pool
    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn delimiter(&self) -> Option<Delimiter> {
        self.delimiter
    }

    /// Snapshot or bookmark part after the delimiter
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// The dataset part without any snapshot or bookmark suffix
    pub fn dataset(&self) -> String {
        self.components.join("/")
    }

    pub fn is_snapshot(&self) -> bool {
        self.delimiter == Some(Delimiter::Snapshot)
    }

    pub fn is_bookmark(&self) -> bool {
        self.delimiter == Some(Delimiter::Bookmark)
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DatasetName {
    type Err = RodentError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, NameKind::Dataset)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Check `name` against the naming rules for `kind`
pub fn validate(name: &str, kind: NameKind) -> Result<()> {
    let fail = |code: ErrorCode| Err(RodentError::new(code, name));

    if name.is_empty() {
        return fail(ErrorCode::ZfsNameEmptyComponent);
    }
    if name.starts_with('/') {
        return fail(ErrorCode::ZfsNameLeadingSlash);
    }
    if name.ends_with('/') {
        return fail(ErrorCode::ZfsNameTrailingSlash);
    }

    if name.chars().filter(|c| matches!(c, '@' | '#')).count() > 1 {
        return fail(ErrorCode::ZfsNameMultipleDelimiters);
    }

    let (base, delimiter, suffix) = split_delimiter(name);
    for (index, component) in base.split('/').enumerate() {
        check_component(component, index == 0).or_else(fail)?;
    }
    if let Some(suffix) = suffix {
        check_component(suffix, false).or_else(fail)?;
    }

    let starts_with_letter = base
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_with_letter {
        return fail(ErrorCode::ZfsNameNoLetter);
    }

    if name.len() >= MAX_NAME_LEN {
        return fail(ErrorCode::ZfsNameTooLong);
    }

    match kind {
        NameKind::Snapshot if delimiter != Some(Delimiter::Snapshot) => {
            fail(ErrorCode::ZfsNameNoAtSign)
        }
        NameKind::Bookmark if delimiter != Some(Delimiter::Bookmark) => {
            fail(ErrorCode::ZfsNameNoPound)
        }
        NameKind::Pool if delimiter.is_some() || base.contains('/') => {
            fail(ErrorCode::ZfsNameInvalidChar)
        }
        _ => Ok(()),
    }
}

/// Validate a plain dataset (no snapshot or bookmark part)
pub fn validate_plain_dataset(name: &str) -> Result<DatasetName> {
    let parsed = DatasetName::parse(name, NameKind::Dataset)?;
    if parsed.delimiter().is_some() {
        return Err(RodentError::new(
            ErrorCode::ZfsDatasetInvalidName,
            format!("{} is not a filesystem or volume", name),
        ));
    }
    Ok(parsed)
}

fn split_delimiter(name: &str) -> (&str, Option<Delimiter>, Option<&str>) {
    match name.find(['@', '#']) {
        Some(pos) => {
            let delimiter = if name[pos..].starts_with('@') {
                Delimiter::Snapshot
            } else {
                Delimiter::Bookmark
            };
            (&name[..pos], Some(delimiter), Some(&name[pos + 1..]))
        }
        None => (name, None, None),
    }
}

fn check_component(component: &str, is_pool: bool) -> std::result::Result<(), ErrorCode> {
    if component.is_empty() {
        return Err(ErrorCode::ZfsNameEmptyComponent);
    }
    if !component.chars().all(is_valid_char) {
        return Err(ErrorCode::ZfsNameInvalidChar);
    }
    if is_pool {
        if RESERVED_PREFIXES.iter().any(|p| component.starts_with(p))
            || RESERVED_NAMES.contains(&component)
        {
            return Err(ErrorCode::ZfsNameReserved);
        }
        let mut chars = component.chars();
        if chars.next() == Some('c') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(ErrorCode::ZfsNameDiskLike);
        }
    }
    match component {
        "." => Err(ErrorCode::ZfsNameSelfRef),
        ".." => Err(ErrorCode::ZfsNameParentRef),
        _ => Ok(()),
    }
}

fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | ' ')
}

// =============================================================================
// Properties
// =============================================================================

/// Native (`compression`) or user (`com.example:tag`) property name
pub fn validate_property_name(property: &str) -> Result<()> {
    let valid = !property.is_empty()
        && property.len() <= MAX_PROPERTY_NAME_LEN
        && property.starts_with(|c: char| c.is_ascii_lowercase())
        && property
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | ':' | '+'));

    if valid {
        Ok(())
    } else {
        Err(RodentError::new(ErrorCode::ZfsDatasetInvalidProperty, property))
    }
}

pub fn validate_property_value(property: &str, value: &str) -> Result<()> {
    if value.len() > MAX_PROPERTY_VALUE_LEN {
        return Err(RodentError::new(
            ErrorCode::ZfsPropertyValueTooLong,
            format!("{} ({} bytes, limit {})", property, value.len(), MAX_PROPERTY_VALUE_LEN),
        ));
    }
    if value.contains(['\0', '\n']) {
        return Err(RodentError::new(
            ErrorCode::ZfsInvalidPropertyValue,
            format!("{} contains a control character", property),
        ));
    }
    Ok(())
}

/// Validate every `name=value` pair of a property map
pub fn validate_properties<'a, I>(properties: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    for (name, value) in properties {
        validate_property_name(name)?;
        validate_property_value(name, value)?;
    }
    Ok(())
}

// =============================================================================
// Sizes
// =============================================================================

/// Parse a size such as `10G`, `512M` or `1.5T` into bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let invalid = |why: String| RodentError::new(ErrorCode::ZfsInvalidSize, why);

    let s = s.trim();
    if s.is_empty() {
        return Err(invalid("empty size".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map_or(s.len(), |(i, _)| i);
    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: f64 = num_str
        .parse()
        .map_err(|_| invalid(format!("invalid number: {}", s)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1 << 10,
        "M" | "MB" | "MI" | "MIB" => 1 << 20,
        "G" | "GB" | "GI" | "GIB" => 1 << 30,
        "T" | "TB" | "TI" | "TIB" => 1 << 40,
        "P" | "PB" | "PI" | "PIB" => 1 << 50,
        _ => return Err(invalid(format!("unknown unit: {}", unit_str))),
    };

    let bytes = (num * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 1.0 || bytes >= u64::MAX as f64 {
        return Err(invalid(format!("size out of range: {}", s)));
    }
    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn code_of(name: &str, kind: NameKind) -> Option<ErrorCode> {
        validate(name, kind).err().and_then(|e| e.kind())
    }

    #[test]
    fn test_valid_names() {
        for name in ["tank", "tank/fs1", "tank/a b/c-d_e.f:g", "tank/fs1@snap1", "tank/fs1#bm"] {
            assert!(validate(name, NameKind::Dataset).is_ok(), "{}", name);
        }
        assert!(validate("tank", NameKind::Pool).is_ok());
        assert!(validate("tank/fs@s", NameKind::Snapshot).is_ok());
        assert!(validate("tank/fs#b", NameKind::Bookmark).is_ok());
    }

    #[test]
    fn test_documented_scenarios() {
        assert_eq!(code_of("tank/fs1", NameKind::Dataset), None);
        assert_eq!(
            code_of("/tank/fs1", NameKind::Dataset),
            Some(ErrorCode::ZfsNameLeadingSlash)
        );
        assert_eq!(
            code_of("tank/fs1@@snap", NameKind::Dataset),
            Some(ErrorCode::ZfsNameMultipleDelimiters)
        );
        assert_eq!(
            code_of("1tank/fs1", NameKind::Dataset),
            Some(ErrorCode::ZfsNameNoLetter)
        );
    }

    #[test]
    fn test_rule_codes() {
        let cases = [
            ("", ErrorCode::ZfsNameEmptyComponent),
            ("tank/", ErrorCode::ZfsNameTrailingSlash),
            ("tank//fs", ErrorCode::ZfsNameEmptyComponent),
            ("tank/fs@", ErrorCode::ZfsNameEmptyComponent),
            ("tank@a#b", ErrorCode::ZfsNameMultipleDelimiters),
            ("tank/f$s", ErrorCode::ZfsNameInvalidChar),
            ("tank/fs@sn!ap", ErrorCode::ZfsNameInvalidChar),
            ("mirror1/fs", ErrorCode::ZfsNameReserved),
            ("raidz", ErrorCode::ZfsNameReserved),
            ("log", ErrorCode::ZfsNameReserved),
            ("c0t0d0", ErrorCode::ZfsNameDiskLike),
            ("tank/./fs", ErrorCode::ZfsNameSelfRef),
            ("tank/..", ErrorCode::ZfsNameParentRef),
            ("_tank", ErrorCode::ZfsNameNoLetter),
        ];
        for (name, code) in cases {
            assert_eq!(code_of(name, NameKind::Dataset), Some(code), "{:?}", name);
        }
    }

    #[test]
    fn test_reserved_only_applies_to_pool() {
        assert!(validate("tank/mirror", NameKind::Dataset).is_ok());
        assert!(validate("tank/c0d0", NameKind::Dataset).is_ok());
        assert!(validate("cache", NameKind::Pool).is_ok());
    }

    #[test]
    fn test_length_limit() {
        let long = format!("tank/{}", "a".repeat(MAX_NAME_LEN));
        assert_eq!(code_of(&long, NameKind::Dataset), Some(ErrorCode::ZfsNameTooLong));

        let fits = format!("tank/{}", "a".repeat(MAX_NAME_LEN - 6));
        assert_eq!(code_of(&fits, NameKind::Dataset), None);
    }

    #[test]
    fn test_kind_requirements() {
        assert_eq!(code_of("tank/fs", NameKind::Snapshot), Some(ErrorCode::ZfsNameNoAtSign));
        assert_eq!(code_of("tank/fs#b", NameKind::Snapshot), Some(ErrorCode::ZfsNameNoAtSign));
        assert_eq!(code_of("tank/fs@s", NameKind::Bookmark), Some(ErrorCode::ZfsNameNoPound));
        assert_eq!(code_of("tank/fs", NameKind::Pool), Some(ErrorCode::ZfsNameInvalidChar));
    }

    #[test]
    fn test_earlier_rules_win() {
        // leading slash beats everything after it
        assert_eq!(code_of("/1@a@b", NameKind::Snapshot), Some(ErrorCode::ZfsNameLeadingSlash));
        // component rules beat the letter rule
        assert_eq!(code_of("1ta$nk", NameKind::Dataset), Some(ErrorCode::ZfsNameInvalidChar));
    }

    #[test]
    fn test_parse_parts() {
        let name = DatasetName::parse("tank/a/b@snap", NameKind::Snapshot).unwrap();
        assert_eq!(name.pool(), "tank");
        assert_eq!(name.components(), ["tank", "a", "b"]);
        assert_eq!(name.dataset(), "tank/a/b");
        assert_eq!(name.suffix(), Some("snap"));
        assert!(name.is_snapshot());
        assert_eq!(name.to_string(), "tank/a/b@snap");

        let bm: DatasetName = "tank#mark".parse().unwrap();
        assert!(bm.is_bookmark());
        assert_eq!(bm.delimiter().map(|d| d.as_char()), Some('#'));
    }

    #[test]
    fn test_plain_dataset() {
        assert!(validate_plain_dataset("tank/fs").is_ok());
        let err = validate_plain_dataset("tank/fs@s").unwrap_err();
        assert!(err.has_code(ErrorCode::ZfsDatasetInvalidName));
    }

    #[test]
    fn test_property_names() {
        for ok in ["compression", "recordsize", "com.example:tag", "org.rodent:backup-policy"] {
            assert!(validate_property_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "Compression", "1quota", "quota=1", "a b"] {
            let err = validate_property_name(bad).unwrap_err();
            assert!(err.has_code(ErrorCode::ZfsDatasetInvalidProperty), "{:?}", bad);
        }
    }

    #[test]
    fn test_property_values() {
        assert!(validate_property_value("quota", "10G").is_ok());
        let long = "x".repeat(MAX_PROPERTY_VALUE_LEN + 1);
        let err = validate_property_value("com.example:note", &long).unwrap_err();
        assert!(err.has_code(ErrorCode::ZfsPropertyValueTooLong));
        let err = validate_property_value("quota", "1\n2").unwrap_err();
        assert!(err.has_code(ErrorCode::ZfsInvalidPropertyValue));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("10G").unwrap(), 10 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5T").unwrap(), 3 * (1u64 << 39));
        assert_eq!(parse_size(" 2 gib ").unwrap(), 2 * (1u64 << 30));

        for bad in ["", "0", "0G", "abc", "10X", "-1G"] {
            let err = parse_size(bad).unwrap_err();
            assert_matches!(err.kind(), Some(ErrorCode::ZfsInvalidSize), "{:?}", bad);
        }
    }
}
