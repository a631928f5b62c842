//! Mapping from path prefixes to fetchable root URLs.

use thiserror::Error;
use url::Url;

use crate::{LITERAL_PREFIX, ResourcePath};

/// An error produced while resolving a [`ResourcePath`] to a URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The path does not start with a `<prefix>:` component.
    #[error("resource path has no prefix: {0}")]
    PrefixUndefined(String),
    /// The path's prefix has no registered root URL.
    #[error("unregistered path prefix `{0}`")]
    PrefixUnregistered(String),
    /// A root URL could not be parsed or joined against.
    #[error("invalid root URL: {0}")]
    InvalidRoot(String),
}

/// Maps logical path prefixes to root URLs.
///
/// `http`/`https` paths bypass the table and resolve to themselves; `str:/`
/// literal paths are never resolved and are rejected here.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    roots: Vec<(String, Url)>,
}

impl PathResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a root URL for a path prefix.
    ///
    /// The root is normalized to end with a `/` so that relative paths
    /// always join as children of it. Registering a prefix again replaces
    /// its root.
    pub fn register_path(
        &mut self,
        prefix: impl AsRef<str>,
        root_url: impl AsRef<str>,
    ) -> Result<(), ResolveError> {
        let prefix = prefix.as_ref().to_ascii_lowercase();
        let mut root = root_url.as_ref().to_owned();
        if !root.ends_with('/') {
            root.push('/');
        }
        let root = Url::parse(&root).map_err(|e| ResolveError::InvalidRoot(e.to_string()))?;

        match self.roots.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, existing)) => *existing = root,
            None => self.roots.push((prefix, root)),
        }
        Ok(())
    }

    /// Returns the registered root for a prefix.
    pub fn root(&self, prefix: &str) -> Option<&Url> {
        self.roots
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, root)| root)
    }

    /// Resolves a path to the URL it can be fetched from.
    ///
    /// Each segment of the relative part is percent-encoded and empty
    /// segments are collapsed; the base is always treated as a directory.
    pub fn resolve(&self, path: &ResourcePath) -> Result<Url, ResolveError> {
        if path.is_url() {
            return Url::parse(path.as_str())
                .map_err(|e| ResolveError::InvalidRoot(e.to_string()));
        }

        let prefix = path
            .prefix()
            .ok_or_else(|| ResolveError::PrefixUndefined(path.as_str().into()))?;
        if prefix == LITERAL_PREFIX {
            return Err(ResolveError::PrefixUnregistered(prefix.into()));
        }
        let root = self
            .root(prefix)
            .ok_or_else(|| ResolveError::PrefixUnregistered(prefix.into()))?;

        let mut joined = root.clone();
        joined
            .path_segments_mut()
            .map_err(|_| ResolveError::InvalidRoot("URL cannot-be-a-base".into()))?
            .pop_if_empty()
            .extend(path.segments());
        Ok(joined)
    }
}
