//! Transports which stream raw resource payloads from their sources.
//!
//! A [`Transport`] performs exactly one asynchronous byte-fetch per request
//! and reports the outcome as a message on the engine's completion channel.
//! It never touches cache state: issuing a fetch returns immediately, and
//! the engine picks completions up on its next
//! [`tick`](crate::caching::CacheEngine::tick). This keeps all cache
//! mutation on the single driving thread even though the I/O itself runs on
//! a runtime elsewhere.

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use lodestream_paths::ResourcePath;

use crate::caching::ResourceResult;

mod filesystem;
mod http;

pub use self::filesystem::FilesystemTransport;
pub use self::http::HttpTransport;

/// A single fetch dispatched to a [`Transport`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// The normalized path the fetch belongs to, echoed back in the
    /// completion so the engine can find the record again.
    pub path: ResourcePath,
    /// The resolved URL to fetch.
    pub url: Url,
    /// An engine-assigned fetch identifier, echoed back in the completion.
    ///
    /// This lets the engine tell a live fetch's completion apart from the
    /// orphaned completion of an earlier fetch for the same path.
    pub generation: u64,
}

/// The completion message a transport delivers for one [`FetchRequest`].
#[derive(Debug)]
pub struct FetchCompletion {
    /// The path of the originating request.
    pub path: ResourcePath,
    /// The generation of the originating request.
    pub generation: u64,
    /// The fetched payload, or the reason the fetch failed.
    pub outcome: ResourceResult<Bytes>,
}

/// Sending half of the engine's fetch completion channel.
pub type CompletionSender = mpsc::UnboundedSender<FetchCompletion>;

/// Receiving half of the engine's fetch completion channel.
pub type CompletionReceiver = mpsc::UnboundedReceiver<FetchCompletion>;

/// Creates the completion channel an engine drains on every tick.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

/// A pluggable byte-fetcher.
///
/// Implementations must not block the caller: `fetch` queues or spawns the
/// actual I/O and returns. When the fetch finishes, one [`FetchCompletion`]
/// is sent on `completions`. A dropped receiver (engine torn down first)
/// must be tolerated silently.
pub trait Transport: Send + Sync {
    /// Starts one fetch. The completion is delivered asynchronously.
    fn fetch(&self, request: FetchRequest, completions: CompletionSender);
}
