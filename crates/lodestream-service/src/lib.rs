//! The lodestream resource streaming and cache engine.
//!
//! This crate contains the path-keyed registry, the pending-request
//! deduplication and fan-out mechanism, the time-budgeted incremental parse
//! pipeline, and the activity-based eviction policy that together stream
//! remote game assets into memory. Rendering, asset binary formats and the
//! high-level scene API are external collaborators: the engine hands opaque
//! payloads to pluggable [`Preparer`](caching::Preparer)s and is driven by
//! the host's frame clock through
//! [`CacheEngine::tick`](caching::CacheEngine::tick).

pub mod caching;
pub mod config;
pub mod logging;
pub mod transport;
