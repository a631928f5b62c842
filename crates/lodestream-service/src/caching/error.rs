use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// An error that happens while streaming a resource into the cache.
///
/// Every failure in the engine degrades to "this one resource never became
/// ready" and is recorded against the record of the path it belongs to;
/// nothing here is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The path does not start with a `<prefix>:` component.
    #[error("resource path has no prefix: {0}")]
    PrefixUndefined(String),
    /// The path's prefix has no registered root URL.
    #[error("unregistered path prefix `{0}`")]
    PrefixUnregistered(String),
    /// The path has no parseable extension to pick a preparer with.
    #[error("resource path has no extension: {0}")]
    ExtensionUndefined(String),
    /// No preparer has been registered for the path's extension.
    #[error("no preparer registered for extension `{0}`")]
    ExtensionUnregistered(String),
    /// The resource was not found at the remote source.
    #[error("not found")]
    NotFound,
    /// The remote source refused to serve the resource.
    ///
    /// The attached string contains the remote source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The transport gave up waiting for the remote source.
    #[error("download timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    /// The transport itself could not be constructed, e.g. because the TLS
    /// backend failed to initialize.
    #[error("transport could not be constructed: {0}")]
    TransportInit(String),
    /// The fetch could not be dispatched at all.
    #[error("request could not be sent: {0}")]
    SendFailed(String),
    /// The remote source responded with an unexpected HTTP status.
    #[error("unexpected server status {0}")]
    Status(u16),
    /// The fetch failed due to another problem, like connection loss, DNS
    /// resolution, or a 5xx server response.
    #[error("download failed: {0}")]
    DownloadError(String),
    /// The payload was fetched successfully, but the preparer rejected it.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in the engine itself.
    #[error("internal error")]
    InternalError,
}

impl ResourceError {
    pub(crate) fn download_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        if error_string.contains("SSL routines") {
            error_string = "SSL error".to_string();
        }

        Self::DownloadError(error_string)
    }

    #[track_caller]
    pub(crate) fn from_std_error<E: Error + 'static>(e: E) -> Self {
        let dynerr: &dyn Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

impl From<std::io::Error> for ResourceError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<lodestream_paths::ResolveError> for ResourceError {
    fn from(error: lodestream_paths::ResolveError) -> Self {
        use lodestream_paths::ResolveError;
        match error {
            ResolveError::PrefixUndefined(path) => Self::PrefixUndefined(path),
            ResolveError::PrefixUnregistered(prefix) => Self::PrefixUnregistered(prefix),
            ResolveError::InvalidRoot(msg) => Self::SendFailed(msg),
        }
    }
}

/// A result from the streaming engine, containing either `Ok(T)` or the
/// reason why a resource could not be fetched or is otherwise unusable.
pub type ResourceResult<T = ()> = Result<T, ResourceError>;
