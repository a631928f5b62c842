use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use lodestream_paths::ResourcePath;

use super::prepare::{PrepareOutcome, Preparer};
use super::ResourceError;

/// A finished, usable in-memory resource.
///
/// The engine treats objects as opaque; consumers downcast via
/// [`ResourceRecord::object_as`].
pub type ResourceObject = Arc<dyn Any + Send + Sync>;

/// Callback invoked with the finished object of an object request.
pub type ResolveFn = Box<dyn FnOnce(ResourceObject) + Send>;

/// Callback invoked when an object request cannot be satisfied.
pub type RejectFn = Box<dyn FnOnce(ResourceError) + Send>;

/// A caller awaiting a path's first resolution.
pub(crate) struct Waiter {
    pub resolve: ResolveFn,
    pub reject: RejectFn,
}

/// Lifecycle state of a [`ResourceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordState {
    /// Created, fetch not yet issued.
    Requested = 0,
    /// A fetch is outstanding on the transport.
    Loading = 1,
    /// The payload has arrived and sits in the prepare queue.
    Queued = 2,
    /// The object is available.
    Ready = 3,
    /// The resource could not be fetched or prepared.
    Failed = 4,
    /// The object has been unloaded; a later request reloads in place.
    Purged = 5,
}

impl RecordState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Requested,
            1 => Self::Loading,
            2 => Self::Queued,
            3 => Self::Ready,
            4 => Self::Failed,
            _ => Self::Purged,
        }
    }
}

/// A shared handle to a live resource record.
///
/// Handles returned by [`get_resource`](super::CacheEngine::get_resource)
/// stay valid across purge and reload; the record is repopulated in place
/// rather than replaced.
pub type ResourceHandle = Arc<ResourceRecord>;

#[derive(Default)]
struct RecordInner {
    payload: Option<Bytes>,
    object: Option<ResourceObject>,
    errors: Vec<ResourceError>,
    waiters: Vec<Waiter>,
    preparer: Option<Box<dyn Preparer>>,
}

/// The unit of caching: one logical path's bookkeeping and lifecycle.
pub struct ResourceRecord {
    path: ResourcePath,
    extension: String,
    state: AtomicU8,
    active_frame: AtomicU64,
    load_generation: AtomicU64,
    pinned: AtomicBool,
    max_errors: usize,
    inner: Mutex<RecordInner>,
}

impl fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("path", &self.path)
            .field("state", &self.state())
            .field("active_frame", &self.active_frame())
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

impl ResourceRecord {
    pub(crate) fn new(path: ResourcePath, extension: String, max_errors: usize) -> ResourceHandle {
        Arc::new(ResourceRecord {
            path,
            extension,
            state: AtomicU8::new(RecordState::Requested as u8),
            active_frame: AtomicU64::new(0),
            load_generation: AtomicU64::new(0),
            pinned: AtomicBool::new(false),
            max_errors,
            inner: Mutex::new(RecordInner::default()),
        })
    }

    /// The normalized path this record caches.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The extension the record's preparer is registered under.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The record's current lifecycle state.
    pub fn state(&self) -> RecordState {
        RecordState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RecordState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the finished object is available.
    pub fn is_good(&self) -> bool {
        self.state() == RecordState::Ready
    }

    /// Whether the record has been unloaded and awaits a reload.
    pub fn is_purged(&self) -> bool {
        self.state() == RecordState::Purged
    }

    /// The last frame number at which this record was touched.
    pub fn active_frame(&self) -> u64 {
        self.active_frame.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, cur_frame: u64) {
        self.active_frame.fetch_max(cur_frame, Ordering::AcqRel);
    }

    /// Exempts this record from the purge pass, e.g. for a video texture
    /// that must retain its buffers.
    pub fn pin(&self) {
        self.pinned.store(true, Ordering::Release);
    }

    /// Makes this record eligible for purging again.
    pub fn unpin(&self) {
        self.pinned.store(false, Ordering::Release);
    }

    /// Whether this record is exempt from purging.
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    /// The finished object, if the record is ready.
    pub fn object(&self) -> Option<ResourceObject> {
        self.inner.lock().unwrap().object.clone()
    }

    /// The finished object downcast to a concrete type.
    pub fn object_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.object().and_then(|object| object.downcast().ok())
    }

    /// The errors accumulated against this record, oldest first.
    pub fn errors(&self) -> Vec<ResourceError> {
        self.inner.lock().unwrap().errors.clone()
    }

    /// The most recent error, if any.
    pub fn last_error(&self) -> Option<ResourceError> {
        self.inner.lock().unwrap().errors.last().cloned()
    }

    pub(crate) fn has_waiters(&self) -> bool {
        !self.inner.lock().unwrap().waiters.is_empty()
    }

    pub(crate) fn push_waiter(&self, waiter: Waiter) {
        self.inner.lock().unwrap().waiters.push(waiter);
    }

    /// Marks the record loading and remembers which fetch it is waiting
    /// for, so orphaned completions of earlier fetches can be told apart.
    pub(crate) fn begin_loading(&self, generation: u64) {
        self.load_generation.store(generation, Ordering::Release);
        self.set_state(RecordState::Loading);
    }

    pub(crate) fn load_generation(&self) -> u64 {
        self.load_generation.load(Ordering::Acquire)
    }

    /// Stores an arrived payload together with the preparer that will turn
    /// it into an object.
    pub(crate) fn payload_arrived(&self, payload: Bytes, preparer: Box<dyn Preparer>) {
        let mut inner = self.inner.lock().unwrap();
        inner.payload = Some(payload);
        inner.preparer = Some(preparer);
        drop(inner);
        self.set_state(RecordState::Queued);
    }

    /// Runs one preparer invocation against the stored payload.
    ///
    /// User code runs without the record lock held, so waiter callbacks and
    /// preparers can never deadlock against the record.
    pub(crate) fn prepare_step(&self, cur_frame: u64) -> PrepareStep {
        let mut inner = self.inner.lock().unwrap();
        let (preparer, payload) = (inner.preparer.take(), inner.payload.clone());
        drop(inner);

        let (Some(mut preparer), Some(payload)) = (preparer, payload) else {
            let error = ResourceError::InternalError;
            return PrepareStep::Failed(self.fail(error.clone()), error);
        };

        match preparer.prepare(&self.path, &payload) {
            Ok(PrepareOutcome::Done(object)) => {
                PrepareStep::Finished(self.finish(object.clone(), cur_frame), object)
            }
            Ok(PrepareOutcome::Pending) => {
                self.inner.lock().unwrap().preparer = Some(preparer);
                PrepareStep::Pending
            }
            Err(error) => PrepareStep::Failed(self.fail(error.clone()), error),
        }
    }

    /// Marks the record ready and returns the waiters to resolve.
    ///
    /// The raw payload is dropped here; a preparer that needs the bytes
    /// after completion must keep its own copy inside the object.
    fn finish(&self, object: ResourceObject, cur_frame: u64) -> Vec<Waiter> {
        let mut inner = self.inner.lock().unwrap();
        inner.payload = None;
        inner.preparer = None;
        inner.object = Some(object);
        let waiters = std::mem::take(&mut inner.waiters);
        drop(inner);

        self.set_state(RecordState::Ready);
        self.touch(cur_frame);
        waiters
    }

    /// Records a failure and returns the waiters to reject.
    pub(crate) fn fail(&self, error: ResourceError) -> Vec<Waiter> {
        let mut inner = self.inner.lock().unwrap();
        if inner.errors.last() != Some(&error) && inner.errors.len() < self.max_errors {
            inner.errors.push(error);
        }
        inner.payload = None;
        inner.preparer = None;
        let waiters = std::mem::take(&mut inner.waiters);
        drop(inner);

        self.set_state(RecordState::Failed);
        waiters
    }

    /// Releases the record's memory, leaving it addressable for a reload.
    ///
    /// Returns `false` without touching anything if the record is pinned or
    /// a fetch/parse is still in flight.
    pub fn unload(&self) -> bool {
        if self.is_pinned() {
            return false;
        }
        if !matches!(self.state(), RecordState::Ready | RecordState::Failed) {
            return false;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.payload = None;
        inner.object = None;
        inner.preparer = None;
        drop(inner);

        self.set_state(RecordState::Purged);
        true
    }

    /// Rewinds the record to `Requested` so a fresh fetch can be issued.
    ///
    /// Waiters attached before a purge stay attached and are satisfied by
    /// the reloaded object.
    pub(crate) fn reset_for_reload(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.payload = None;
        inner.object = None;
        inner.preparer = None;
        drop(inner);

        self.set_state(RecordState::Requested);
    }
}

/// The result of one [`ResourceRecord::prepare_step`], carrying the waiters
/// that must be notified once the record lock has been released.
pub(crate) enum PrepareStep {
    Finished(Vec<Waiter>, ResourceObject),
    Pending,
    Failed(Vec<Waiter>, ResourceError),
}
