//! Subject naming rules.
//!
//! Subjects are `.`-delimited (`orders.created`); the legacy `-` and `_`
//! separators are accepted when deriving handler identifiers. The first
//! token of a multi-token subject is treated as a namespace and dropped:
//!
//! | subject              | handler id     |
//! |----------------------|----------------|
//! | `orders.created`     | `created`      |
//! | `orders-created`     | `created`      |
//! | `orders_created`     | `created`      |
//! | `orders.old.deleted` | `old_deleted`  |
//! | `payments`           | `payments`     |
//! | `orders.*`           | none (wildcard)|

use crate::error::ConfigError;
use std::borrow::Borrow;
use std::fmt;

/// Canonical subject delimiter.
pub const DELIMITER: char = '.';

const LEGACY_SEPARATORS: [char; 2] = ['-', '_'];
const WILDCARDS: [char; 2] = ['*', '>'];

/// Canonical identifier of the handler a subject routes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(String);

impl HandlerId {
    /// Create a handler id from an already-canonical name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the handler id for a subject.
    ///
    /// Returns `None` for wildcard subjects and for subjects with empty
    /// tokens (see [`validate_subject`]), which are never routed.
    pub fn for_subject(subject: &str) -> Option<Self> {
        if is_wildcard(subject) {
            return None;
        }

        let tokens: Vec<&str> = tokens(subject).collect();
        if tokens.iter().any(|token| token.is_empty()) {
            return None;
        }

        let id = match tokens.as_slice() {
            [single] => (*single).to_string(),
            [_namespace, rest @ ..] => rest.join("_"),
            [] => return None,
        };

        Some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for HandlerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HandlerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for HandlerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

fn tokens(subject: &str) -> impl Iterator<Item = &str> {
    subject.split(|c: char| c == DELIMITER || LEGACY_SEPARATORS.contains(&c))
}

/// Validate a subject: non-empty, with no empty token between separators
/// (`orders.`, `orders..created` and `.created` are rejected).
pub fn validate_subject(subject: &str) -> Result<&str, ConfigError> {
    if tokens(subject).any(str::is_empty) {
        return Err(ConfigError::InvalidSubject(subject.to_string()));
    }
    Ok(subject)
}

/// Whether the subject contains a `*` or `>` wildcard.
pub fn is_wildcard(subject: &str) -> bool {
    subject.contains(WILDCARDS)
}

/// Whether the subject uses the canonical `.` delimiter.
pub fn uses_dot_notation(subject: &str) -> bool {
    subject.contains(DELIMITER)
}

/// Validate a JetStream stream name.
///
/// Stream names may not be empty and may not contain whitespace or the
/// subject delimiter.
pub fn validate_stream_name(name: &str) -> Result<&str, ConfigError> {
    if name.is_empty() || name.contains(char::is_whitespace) || name.contains(DELIMITER) {
        return Err(ConfigError::InvalidStreamName(name.to_string()));
    }
    Ok(name)
}

/// Validate a durable consumer name.
pub fn validate_durable_name(name: &str) -> Result<&str, ConfigError> {
    if name.is_empty()
        || name.contains(char::is_whitespace)
        || name.contains(DELIMITER)
        || is_wildcard(name)
    {
        return Err(ConfigError::InvalidDurableName(name.to_string()));
    }
    Ok(name)
}
