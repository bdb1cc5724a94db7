//! Document identifiers.
//!
//! Callers hand the client whatever identifier they hold: a string from a
//! route parameter, an integer primary key, or a float that came out of a
//! JSON payload. [`RawDocumentId`] captures that input as-is and
//! [`DocumentId`] is the validated, path-ready form.
//!
//! A raw identifier is valid when it is a non-blank string or a finite
//! number. Validation never touches the network.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProgressError;

/// Largest integer an `f64` represents exactly (2^53).
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

// ─────────────────────────────────────────────────────────────────────────────
// RawDocumentId
// ─────────────────────────────────────────────────────────────────────────────

/// An unvalidated document identifier as supplied by a caller.
#[derive(Clone, Debug, PartialEq)]
pub enum RawDocumentId {
    /// A textual identifier.
    Text(String),
    /// An integral identifier.
    Integer(i64),
    /// A floating-point identifier (may be `NaN` or infinite).
    Float(f64),
    /// No identifier at all.
    Missing,
}

impl fmt::Display for RawDocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Missing => f.write_str("<missing>"),
        }
    }
}

impl From<&str> for RawDocumentId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for RawDocumentId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for RawDocumentId {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<i64> for RawDocumentId {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for RawDocumentId {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<u32> for RawDocumentId {
    fn from(n: u32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<u64> for RawDocumentId {
    fn from(n: u64) -> Self {
        i64::try_from(n).map_or_else(|_| Self::Text(n.to_string()), Self::Integer)
    }
}

impl From<usize> for RawDocumentId {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or_else(|_| Self::Text(n.to_string()), Self::Integer)
    }
}

impl From<f64> for RawDocumentId {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl<T: Into<RawDocumentId>> From<Option<T>> for RawDocumentId {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Missing, Into::into)
    }
}

impl From<DocumentId> for RawDocumentId {
    fn from(id: DocumentId) -> Self {
        Self::Text(id.0)
    }
}

impl From<&DocumentId> for RawDocumentId {
    fn from(id: &DocumentId) -> Self {
        Self::Text(id.0.clone())
    }
}

/// Whether a raw identifier is acceptable: a non-blank string or a finite
/// number.
pub fn validate_document_id(raw: &RawDocumentId) -> bool {
    match raw {
        RawDocumentId::Text(s) => !s.trim().is_empty(),
        RawDocumentId::Integer(_) => true,
        RawDocumentId::Float(n) => n.is_finite(),
        RawDocumentId::Missing => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DocumentId
// ─────────────────────────────────────────────────────────────────────────────

/// A validated document identifier, rendered the way it appears in URLs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Validate a raw identifier.
    ///
    /// Strings are trimmed; integral floats render without a fractional
    /// part (`42.0` becomes `"42"`).
    pub fn parse(raw: impl Into<RawDocumentId>) -> Result<Self, ProgressError> {
        let raw = raw.into();
        let rendered = match &raw {
            _ if !validate_document_id(&raw) => None,
            RawDocumentId::Text(s) => Some(s.trim().to_owned()),
            RawDocumentId::Integer(n) => Some(n.to_string()),
            RawDocumentId::Float(n) => Some(render_float(*n)),
            RawDocumentId::Missing => None,
        };
        rendered.map(Self).ok_or_else(|| ProgressError::InvalidIdentifier {
            value: raw.to_string(),
        })
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<RawDocumentId> for DocumentId {
    type Error = ProgressError;

    fn try_from(raw: RawDocumentId) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn render_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < MAX_EXACT_FLOAT_INT {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
