//! # Lodestream caching infrastructure
//!
//! Streaming game assets is front and center in lodestream. Every mesh,
//! shader, texture or scene the host application asks for goes through the
//! engine in this module, which guarantees that repeated references to the
//! same logical path resolve to one shared in-memory object, fetched at
//! most once.
//!
//! ## Moving parts
//!
//! - [`ResourceRecord`] tracks one path's lifecycle:
//!   `Requested → Loading → Queued → Ready` (or `Failed`), and `Purged`
//!   after its memory has been reclaimed.
//! - [`MotherLode`] is the path→record registry and the single source of
//!   truth for "is this path already known".
//! - [`PrepareQueue`] holds records whose raw payload has arrived and is
//!   waiting to be parsed, and drains them under a per-tick wall-clock
//!   budget so the frame loop never stalls on a large payload.
//! - [`CacheEngine`] is the orchestrator driving all of the above from its
//!   [`tick`](CacheEngine::tick) entry point.
//!
//! ## A request's journey
//!
//! A [`get_object`](CacheEngine::get_object) call normalizes its path and
//! looks it up in the mother lode. On a hit the caller either receives the
//! finished object immediately or attaches a waiter to the in-flight
//! record; no second fetch is ever issued for a known path. On a miss a
//! record is created and a fetch dispatched through the configured
//! [`Transport`](crate::transport::Transport).
//!
//! Fetch completions arrive as messages on a channel and are drained at the
//! start of the next tick, which keeps all cache mutation on the single
//! driving thread. Arrived payloads are handed to the [`Preparer`]
//! registered for the path's extension. Preparers may be atomic or
//! resumable: a resumable preparer advances one unit of work per invocation
//! and keeps its place at the head of the queue across ticks until it
//! reports [`PrepareOutcome::Done`].
//!
//! Once a record is ready, all attached waiters are resolved exactly once
//! with the shared object. An internal purge clock periodically scans the
//! registry and unloads records that have been inactive beyond the
//! configured window, unless they are pinned.
//!
//! ## Errors
//!
//! [`ResourceError`] covers the whole taxonomy from path resolution through
//! transport failures to malformed payloads. Errors are recorded on the
//! failing record (capped, deduplicated) and delivered through the
//! rejection side of waiters; a failing preparer never aborts the drain of
//! the records queued behind it.

mod engine;
mod error;
mod mother_lode;
mod prepare;
mod record;

pub use engine::{CacheEngine, EngineStats};
pub use error::{ResourceError, ResourceResult};
pub use mother_lode::{MotherLode, PurgeSummary};
pub use prepare::{
    DrainSummary, PrepareOutcome, PrepareQueue, Preparer, PreparerFactory,
};
pub use record::{
    RecordState, RejectFn, ResolveFn, ResourceHandle, ResourceObject, ResourceRecord,
};

#[cfg(test)]
mod tests;
