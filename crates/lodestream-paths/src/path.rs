//! Types for dealing with logical resource paths.
//!
//! A resource path has the shape `<prefix>:/<relative>`, for example
//! `res:/models/ship.mesh`. The prefix selects which registered root the
//! relative part is resolved against. Two prefixes are special:
//!
//! - `http`/`https` paths are complete URLs and are used verbatim.
//! - `str` paths carry their payload inline and never hit the network.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The namespace for paths that encode their payload inline.
pub const LITERAL_PREFIX: &str = "str";

/// A normalized logical resource path.
///
/// Paths are case-folded and use forward slashes, so that `Res:\Ship.Mesh`
/// and `res:/ship.mesh` name the same resource. Literal (`str:/`) paths are
/// exempt from normalization since their payload is part of the path.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Creates a new [`ResourcePath`], applying normalization.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        if raw.starts_with("str:") {
            return ResourcePath(raw.into());
        }
        ResourcePath(raw.to_ascii_lowercase().replace('\\', "/"))
    }

    /// Returns the normalized path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the prefix before the first `:`, if the path has one.
    pub fn prefix(&self) -> Option<&str> {
        match self.0.split_once(':') {
            Some((prefix, _)) if !prefix.is_empty() => Some(prefix),
            _ => None,
        }
    }

    /// Returns the part of the path after `<prefix>:`, without leading slashes.
    pub fn relative(&self) -> &str {
        match self.0.split_once(':') {
            Some((_, rest)) => rest.trim_start_matches('/'),
            None => &self.0,
        }
    }

    /// Whether this is a `str:/` literal-payload path.
    pub fn is_literal(&self) -> bool {
        self.prefix() == Some(LITERAL_PREFIX)
    }

    /// Whether this path is a complete URL that bypasses the prefix table.
    pub fn is_url(&self) -> bool {
        matches!(self.prefix(), Some("http") | Some("https"))
    }

    /// Returns the extension used to pick a preparer for this path.
    ///
    /// For regular paths this is the part after the last `.` of the last
    /// segment. For literal paths it is the first component after the
    /// namespace: the extension of `str:/mesh/...` is `mesh`.
    pub fn extension(&self) -> Option<&str> {
        if self.is_literal() {
            let rest = self.relative();
            let ext = rest.split('/').next().unwrap_or(rest);
            return (!ext.is_empty()).then_some(ext);
        }
        let last_segment = self.0.rsplit('/').next().unwrap_or(&self.0);
        match last_segment.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Returns the inline payload of a literal path.
    ///
    /// The payload of `str:/mesh/some payload` is `some payload`. Returns
    /// `None` for non-literal paths and literal paths without a payload
    /// component.
    pub fn literal_payload(&self) -> Option<&str> {
        if !self.is_literal() {
            return None;
        }
        self.relative().split_once('/').map(|(_, payload)| payload)
    }

    /// Returns an iterator of the relative path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.relative().split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourcePath {
    fn from(raw: &str) -> Self {
        ResourcePath::new(raw)
    }
}

impl From<String> for ResourcePath {
    fn from(raw: String) -> Self {
        ResourcePath::new(raw)
    }
}
