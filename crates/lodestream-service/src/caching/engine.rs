use std::sync::Arc;

use rustc_hash::FxHashMap;

use lodestream_paths::{PathResolver, ResourcePath};

use crate::config::Config;
use crate::transport::{
    CompletionReceiver, CompletionSender, FetchCompletion, FetchRequest, Transport,
    completion_channel,
};

use super::mother_lode::MotherLode;
use super::prepare::{PrepareQueue, PreparerFactory};
use super::record::{RecordState, RejectFn, ResolveFn, ResourceHandle, ResourceRecord, Waiter};
use super::{ResourceError, ResourceResult};

/// How often the purge pass runs, in fired purge-clock seconds.
const PURGE_INTERVAL_SECS: u64 = 5;

/// Counters exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Transport fetches issued over the engine's lifetime.
    pub fetches: u64,
    /// Literal payloads served from their path, without a transport fetch.
    pub literals: u64,
    /// Records that reached `Ready`.
    pub prepared: u64,
    /// Records that failed fetching or preparing.
    pub failed: u64,
    /// Records unloaded by the purge pass.
    pub unloaded: u64,
    /// Records dropped from the registry by the purge pass.
    pub removed: u64,
}

/// Accumulates tick deltas and fires the purge pass on a fixed cadence.
///
/// Fires once per accumulated real-time second, carrying the fractional
/// remainder over; every [`PURGE_INTERVAL_SECS`]th fire is a purge.
struct PurgeClock {
    accum: f64,
    fired_seconds: u64,
}

impl PurgeClock {
    fn new() -> Self {
        Self {
            accum: 0.0,
            fired_seconds: 0,
        }
    }

    fn advance(&mut self, dt: f64) -> bool {
        self.accum += dt;
        if self.accum < 1.0 {
            return false;
        }
        let whole = self.accum.floor();
        self.accum -= whole;
        self.fired_seconds += whole as u64;

        if self.fired_seconds >= PURGE_INTERVAL_SECS {
            self.fired_seconds %= PURGE_INTERVAL_SECS;
            return true;
        }
        false
    }
}

/// The streaming cache engine.
///
/// One engine instance is constructed by the host application and driven by
/// its frame loop: every frame calls [`tick`](Self::tick), which drains
/// fetch completions, runs parsing under the configured time budget, and
/// periodically purges inactive resources.
///
/// All methods take `&mut self`: the engine is single-threaded cooperative,
/// and the only concurrency is the transport's asynchronous I/O, which
/// communicates exclusively through the completion channel.
pub struct CacheEngine {
    config: Config,
    resolver: PathResolver,
    transport: Arc<dyn Transport>,
    preparers: FxHashMap<String, Arc<dyn PreparerFactory>>,
    mother_lode: MotherLode,
    prepare_queue: PrepareQueue,
    completions_tx: CompletionSender,
    completions_rx: CompletionReceiver,
    pending_loads: usize,
    fetch_generation: u64,
    cur_frame: u64,
    purge_clock: PurgeClock,
    frames_at_last_purge: u64,
    stats: EngineStats,
}

impl CacheEngine {
    /// Creates an engine around a path resolver and a transport.
    pub fn new(config: Config, resolver: PathResolver, transport: Arc<dyn Transport>) -> Self {
        let (completions_tx, completions_rx) = completion_channel();
        Self {
            config,
            resolver,
            transport,
            preparers: FxHashMap::default(),
            mother_lode: MotherLode::new(),
            prepare_queue: PrepareQueue::new(),
            completions_tx,
            completions_rx,
            pending_loads: 0,
            fetch_generation: 0,
            cur_frame: 0,
            purge_clock: PurgeClock::new(),
            frames_at_last_purge: 0,
            stats: EngineStats::default(),
        }
    }

    /// Registers a root URL for a path prefix.
    pub fn register_path(
        &mut self,
        prefix: impl AsRef<str>,
        root_url: impl AsRef<str>,
    ) -> ResourceResult {
        self.resolver.register_path(prefix, root_url)?;
        Ok(())
    }

    /// Registers the preparer used for paths with the given extension.
    pub fn register_extension(
        &mut self,
        extension: impl AsRef<str>,
        factory: impl PreparerFactory + 'static,
    ) {
        self.preparers
            .insert(extension.as_ref().to_ascii_lowercase(), Arc::new(factory));
    }

    /// The engine's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Enables or disables the automatic purge pass.
    pub fn set_auto_purge(&mut self, auto_purge: bool) {
        self.config.auto_purge = auto_purge;
    }

    /// Adjusts how long resources may go untouched before purging.
    pub fn set_purge_time(&mut self, purge_time: std::time::Duration) {
        self.config.purge_time = purge_time;
    }

    /// The number of issued fetches whose completion has not been applied
    /// yet. Literal payloads count until the tick that consumes them.
    pub fn pending_loads(&self) -> usize {
        self.pending_loads
    }

    /// Lifetime counters for diagnostics.
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// The number of records the registry currently tracks.
    pub fn cached_resources(&self) -> usize {
        self.mother_lode.len()
    }

    /// Returns the live record for a path, fetching it if unknown.
    ///
    /// The returned handle may still be loading; callers poll
    /// [`is_good`](ResourceRecord::is_good) /
    /// [`is_purged`](ResourceRecord::is_purged). Fetch and resolution
    /// failures are attached to the record rather than returned here; only
    /// a path that cannot name a preparer is an immediate error.
    pub fn get_resource(&mut self, path: impl AsRef<str>) -> ResourceResult<ResourceHandle> {
        self.request(path.as_ref(), None)
    }

    /// Requests the finished object for a path, callback style.
    ///
    /// Multiple calls for the same unresolved path attach to the same
    /// record and are satisfied by a single fetch and parse; each callback
    /// pair fires exactly once.
    pub fn get_object(
        &mut self,
        path: impl AsRef<str>,
        on_resolved: impl FnOnce(super::ResourceObject) + Send + 'static,
        on_rejected: impl FnOnce(ResourceError) + Send + 'static,
    ) {
        let waiter = Waiter {
            resolve: Box::new(on_resolved) as ResolveFn,
            reject: Box::new(on_rejected) as RejectFn,
        };
        // Request errors are delivered through the rejection callback.
        self.request(path.as_ref(), Some(waiter)).ok();
    }

    /// Re-issues the fetch for a record, reusing its identity.
    ///
    /// A no-op while a fetch or parse is already in flight.
    pub fn reload_resource(&mut self, record: &ResourceHandle) {
        if matches!(
            record.state(),
            RecordState::Requested | RecordState::Loading | RecordState::Queued
        ) {
            return;
        }

        record.reset_for_reload();
        record.touch(self.cur_frame);
        if self.mother_lode.find(record.path()).is_none() {
            self.mother_lode.add(record.clone());
        }
        self.issue_fetch(record);
    }

    /// Drops all registry entries without releasing their memory.
    ///
    /// Live handles keep working; a later request for the same path starts
    /// over with a fresh record.
    pub fn clear(&mut self) {
        self.mother_lode.clear();
    }

    /// Unloads every record, then drops all registry entries.
    pub fn unload_and_clear(&mut self) {
        self.mother_lode.unload_and_clear();
    }

    /// Advances the engine by one frame.
    ///
    /// `dt` is the wall-clock time since the previous tick, in seconds.
    /// This is the only entry point that performs CPU-bound work: it drains
    /// arrived fetch completions, runs parsing under the configured
    /// [`max_prepare_time`](Config::max_prepare_time) budget, and drives
    /// the purge clock.
    pub fn tick(&mut self, dt: f64) {
        self.cur_frame = self.cur_frame.wrapping_add(1);

        self.drain_completions();

        let drained = self
            .prepare_queue
            .drain(self.config.max_prepare_time, self.cur_frame);
        self.stats.prepared += drained.prepared as u64;
        self.stats.failed += drained.failed as u64;

        if self.purge_clock.advance(dt) && self.config.auto_purge {
            self.purge_pass();
        }
    }

    fn request(&mut self, raw_path: &str, waiter: Option<Waiter>) -> ResourceResult<ResourceHandle> {
        let path = ResourcePath::new(raw_path);

        if let Some(record) = self.mother_lode.find(&path) {
            record.touch(self.cur_frame);
            if record.is_purged() {
                self.reload_resource(&record);
            }

            if let Some(waiter) = waiter {
                match record.state() {
                    RecordState::Ready => match record.object() {
                        Some(object) => (waiter.resolve)(object),
                        None => (waiter.reject)(ResourceError::InternalError),
                    },
                    RecordState::Failed => {
                        let error = record
                            .last_error()
                            .unwrap_or(ResourceError::InternalError);
                        (waiter.reject)(error);
                    }
                    _ => record.push_waiter(waiter),
                }
            }
            return Ok(record);
        }

        let extension = match path.extension() {
            Some(extension) => extension.to_ascii_lowercase(),
            None => {
                let error = ResourceError::ExtensionUndefined(path.to_string());
                if let Some(waiter) = waiter {
                    (waiter.reject)(error.clone());
                }
                return Err(error);
            }
        };
        if !self.preparers.contains_key(&extension) {
            let error = ResourceError::ExtensionUnregistered(extension);
            if let Some(waiter) = waiter {
                (waiter.reject)(error.clone());
            }
            return Err(error);
        }

        let record = ResourceRecord::new(path, extension, self.config.max_errors_per_record);
        record.touch(self.cur_frame);
        if let Some(waiter) = waiter {
            record.push_waiter(waiter);
        }
        self.mother_lode.add(record.clone());
        self.issue_fetch(&record);
        Ok(record)
    }

    /// Issues the transport fetch for a record.
    ///
    /// Literal `str:/` paths carry their payload inline; their completion is
    /// synthesized onto the same channel so the prepare pipeline stays
    /// uniform. Resolution failures are attached to the record and rejected
    /// to its waiters.
    fn issue_fetch(&mut self, record: &ResourceHandle) {
        let path = record.path().clone();
        self.fetch_generation += 1;
        let generation = self.fetch_generation;

        if path.is_literal() {
            let payload = path.literal_payload().unwrap_or("").as_bytes().to_vec();
            record.begin_loading(generation);
            self.pending_loads += 1;
            self.stats.literals += 1;
            self.completions_tx
                .send(FetchCompletion {
                    path,
                    generation,
                    outcome: Ok(payload.into()),
                })
                .ok();
            return;
        }

        match self.resolver.resolve(&path) {
            Ok(url) => {
                record.begin_loading(generation);
                self.pending_loads += 1;
                self.stats.fetches += 1;
                self.transport.fetch(
                    FetchRequest {
                        path,
                        url,
                        generation,
                    },
                    self.completions_tx.clone(),
                );
            }
            Err(resolve_error) => {
                let error: ResourceError = resolve_error.into();
                tracing::warn!("Cannot resolve resource `{path}`: {error}");
                self.stats.failed += 1;
                for waiter in record.fail(error.clone()) {
                    (waiter.reject)(error.clone());
                }
            }
        }
    }

    /// Applies all fetch completions that arrived since the last tick.
    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.pending_loads = self.pending_loads.saturating_sub(1);

            let Some(record) = self.mother_lode.find(&completion.path) else {
                tracing::debug!(
                    "Dropping completion for unknown resource `{}`",
                    completion.path
                );
                continue;
            };
            if record.state() != RecordState::Loading
                || completion.generation != record.load_generation()
            {
                // A stale completion, e.g. the orphaned fetch of a record
                // that was cleared and re-requested; the live fetch will
                // deliver its own.
                tracing::debug!("Dropping stale completion for `{}`", completion.path);
                continue;
            }

            match completion.outcome {
                Ok(payload) => {
                    let Some(factory) = self.preparers.get(record.extension()) else {
                        let error =
                            ResourceError::ExtensionUnregistered(record.extension().into());
                        self.stats.failed += 1;
                        for waiter in record.fail(error.clone()) {
                            (waiter.reject)(error.clone());
                        }
                        continue;
                    };
                    record.payload_arrived(payload, factory.make());
                    self.prepare_queue.push(record);
                }
                Err(error) => {
                    tracing::debug!("Fetching resource `{}` failed: {error}", completion.path);
                    self.stats.failed += 1;
                    for waiter in record.fail(error.clone()) {
                        (waiter.reject)(error.clone());
                    }
                }
            }
        }
    }

    /// Runs one purge pass over the registry.
    ///
    /// The configured purge time is translated into a frame distance using
    /// the frame rate observed since the previous pass, since records track
    /// activity in frames while the policy is configured in seconds.
    fn purge_pass(&mut self) {
        let frames = self.cur_frame.wrapping_sub(self.frames_at_last_purge);
        self.frames_at_last_purge = self.cur_frame;

        let frames_per_second = frames as f64 / PURGE_INTERVAL_SECS as f64;
        let frame_distance = (self.config.purge_time.as_secs_f64() * frames_per_second)
            .round()
            .max(1.0) as u64;

        let summary =
            self.mother_lode
                .purge_inactive(self.cur_frame, self.config.frame_limit, frame_distance);
        self.stats.unloaded += summary.unloaded as u64;
        self.stats.removed += summary.removed as u64;

        if summary.removed > 0 {
            tracing::debug!(
                "Purge pass unloaded {} and removed {} resources ({} remain)",
                summary.unloaded,
                summary.removed,
                self.mother_lode.len()
            );
        }
    }
}
