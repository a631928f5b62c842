use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

use lodestream_paths::ResourcePath;

use super::record::{PrepareStep, ResourceHandle, ResourceObject};
use super::ResourceResult;

/// What a [`Preparer`] reports after one invocation.
pub enum PrepareOutcome {
    /// The object is finished.
    Done(ResourceObject),
    /// One unit of work was done; invoke again on a subsequent tick.
    Pending,
}

/// Turns a raw fetched payload into a usable in-memory object.
///
/// An atomic preparer returns [`PrepareOutcome::Done`] on its first
/// invocation. A resumable preparer models constructing e.g. a scene graph
/// from hundreds of entity definitions in one payload: each invocation
/// advances one unit of work and returns [`PrepareOutcome::Pending`] until
/// the last one. State between invocations lives in the preparer itself.
///
/// Errors are per-record: a failing preparer marks its record failed but
/// never aborts the queue drain for records behind it.
pub trait Preparer: Send {
    /// Advances the parse by one unit of work.
    fn prepare(
        &mut self,
        path: &ResourcePath,
        payload: &Bytes,
    ) -> ResourceResult<PrepareOutcome>;
}

/// Creates one fresh [`Preparer`] per arriving payload.
///
/// Registered per file extension; any `Fn() -> Box<dyn Preparer>` closure
/// qualifies.
pub trait PreparerFactory: Send + Sync {
    /// Creates a preparer for one record's payload.
    fn make(&self) -> Box<dyn Preparer>;
}

impl<F> PreparerFactory for F
where
    F: Fn() -> Box<dyn Preparer> + Send + Sync,
{
    fn make(&self) -> Box<dyn Preparer> {
        self()
    }
}

/// What one [`PrepareQueue::drain`] call got done.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Records that became ready.
    pub prepared: usize,
    /// Records that failed preparing.
    pub failed: usize,
    /// Preparer invocations, including pending resumption steps.
    pub steps: usize,
}

/// Records whose payload has arrived, waiting to be parsed under the
/// per-tick time budget.
///
/// The queue is FIFO across records, but a resumable preparer keeps its
/// record at the head until it finishes. A very large resumable job can
/// therefore starve unrelated records queued behind it; that unfairness is
/// accepted in exchange for never splitting one record's parse across
/// interleaved work.
#[derive(Default)]
pub struct PrepareQueue {
    queue: VecDeque<ResourceHandle>,
}

impl PrepareQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record whose payload has arrived.
    pub fn push(&mut self, record: ResourceHandle) {
        self.queue.push_back(record);
    }

    /// The number of records waiting for (or in the middle of) preparation.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no work is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs preparers until the queue is empty or the budget is spent.
    ///
    /// The elapsed wall-time is checked after every invocation, so at least
    /// one unit of work happens per call, and draining stops immediately
    /// once the budget is exceeded; remaining items wait for the next tick.
    /// Waiters of finished or failed records are notified here, after the
    /// record's own bookkeeping is complete.
    pub fn drain(&mut self, budget: Duration, cur_frame: u64) -> DrainSummary {
        let start = Instant::now();
        let mut summary = DrainSummary::default();

        while let Some(record) = self.queue.front().cloned() {
            summary.steps += 1;
            match record.prepare_step(cur_frame) {
                PrepareStep::Finished(waiters, object) => {
                    self.queue.pop_front();
                    summary.prepared += 1;
                    tracing::trace!("Prepared resource `{}`", record.path());
                    for waiter in waiters {
                        (waiter.resolve)(object.clone());
                    }
                }
                PrepareStep::Pending => {
                    // Resumable parse in progress; the record keeps the head.
                }
                PrepareStep::Failed(waiters, error) => {
                    self.queue.pop_front();
                    summary.failed += 1;
                    tracing::debug!("Preparing resource `{}` failed: {error}", record.path());
                    for waiter in waiters {
                        (waiter.reject)(error.clone());
                    }
                }
            }

            if start.elapsed() >= budget {
                break;
            }
        }

        summary
    }
}
