//! Support for fetching resources from the local filesystem.
//!
//! Roots are registered as `file://` URLs, which is usually only used for
//! development builds and tests.

use std::io;
use std::path::PathBuf;

use bytes::Bytes;

use crate::caching::ResourceError;

use super::{CompletionSender, FetchCompletion, FetchRequest, Transport};

/// Transport implementation fetching from `file://` URLs.
#[derive(Debug, Clone)]
pub struct FilesystemTransport {
    runtime: tokio::runtime::Handle,
}

impl FilesystemTransport {
    /// Creates a filesystem transport spawning reads onto the given runtime.
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    async fn read_payload(path: PathBuf) -> Result<Bytes, ResourceError> {
        tracing::debug!("Fetching resource from {:?}", path);

        let payload = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ResourceError::NotFound,
            io::ErrorKind::PermissionDenied => ResourceError::PermissionDenied(e.to_string()),
            _ => e.into(),
        })?;
        Ok(payload.into())
    }
}

impl Transport for FilesystemTransport {
    fn fetch(&self, request: FetchRequest, completions: CompletionSender) {
        let outcome = request
            .url
            .to_file_path()
            .map_err(|_| ResourceError::SendFailed(format!("not a file URL: {}", request.url)));

        self.runtime.spawn(async move {
            let outcome = match outcome {
                Ok(path) => Self::read_payload(path).await,
                Err(err) => Err(err),
            };
            completions
                .send(FetchCompletion {
                    path: request.path,
                    generation: request.generation,
                    outcome,
                })
                .ok();
        });
    }
}
