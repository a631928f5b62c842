use rustc_hash::FxHashMap;

use lodestream_paths::ResourcePath;

use super::record::ResourceHandle;

/// What one purge pass did to the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Records unloaded because they went inactive.
    pub unloaded: usize,
    /// Records dropped from the registry entirely.
    pub removed: usize,
}

/// The path→record registry: the single source of truth for whether a path
/// is already known to the cache.
///
/// The mother lode never issues fetches itself; absence is represented as
/// `None`, not an error.
#[derive(Default)]
pub struct MotherLode {
    records: FxHashMap<ResourcePath, ResourceHandle>,
}

impl MotherLode {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the record for a path.
    pub fn find(&self, path: &ResourcePath) -> Option<ResourceHandle> {
        self.records.get(path).cloned()
    }

    /// Inserts a record under its path, replacing any previous entry.
    pub fn add(&mut self, record: ResourceHandle) {
        self.records.insert(record.path().clone(), record);
    }

    /// Removes the record for a path.
    pub fn remove(&mut self, path: &ResourcePath) -> Option<ResourceHandle> {
        self.records.remove(path)
    }

    /// Drops all entries without unloading them.
    ///
    /// Callers that want the records' memory released first use
    /// [`unload_and_clear`](Self::unload_and_clear) instead.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Unloads every record, then drops all entries.
    pub fn unload_and_clear(&mut self) {
        for record in self.records.values() {
            record.unload();
        }
        self.records.clear();
    }

    /// The number of known paths.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Evicts records that have gone inactive.
    ///
    /// Records already flagged purged by an out-of-band unload are dropped
    /// from the registry. Ready, unpinned records whose frame distance to
    /// `cur_frame` reaches `frame_distance` are unloaded and then dropped.
    /// The distance is taken modulo `frame_limit` to bound the comparison
    /// window under frame counter wraparound. Records with waiters still
    /// awaiting their first resolution are never touched.
    pub fn purge_inactive(
        &mut self,
        cur_frame: u64,
        frame_limit: u64,
        frame_distance: u64,
    ) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        let frame_limit = frame_limit.max(1);

        self.records.retain(|path, record| {
            if record.is_purged() {
                tracing::debug!("Removing purged resource `{path}` from the mother lode");
                summary.removed += 1;
                return false;
            }
            if !record.is_good() || record.is_pinned() || record.has_waiters() {
                return true;
            }

            let distance = cur_frame.wrapping_sub(record.active_frame()) % frame_limit;
            if distance < frame_distance {
                return true;
            }

            if record.unload() {
                tracing::debug!("Unloaded inactive resource `{path}`");
                summary.unloaded += 1;
                summary.removed += 1;
                false
            } else {
                true
            }
        });

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::record::ResourceRecord;

    use lodestream_paths::ResourcePath;

    fn record(path: &str) -> ResourceHandle {
        ResourceRecord::new(ResourcePath::new(path), "mesh".into(), 8)
    }

    #[test]
    fn test_find_and_add() {
        let mut lode = MotherLode::new();
        let path = ResourcePath::new("res:/a.mesh");
        assert!(lode.find(&path).is_none());

        lode.add(record("res:/a.mesh"));
        assert!(lode.find(&path).is_some());
        assert_eq!(lode.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut lode = MotherLode::new();
        lode.add(record("res:/a.mesh"));

        let path = ResourcePath::new("res:/a.mesh");
        assert!(lode.remove(&path).is_some());
        assert!(lode.find(&path).is_none());
    }

    #[test]
    fn test_purge_skips_unready_records() {
        let mut lode = MotherLode::new();
        lode.add(record("res:/a.mesh"));

        let summary = lode.purge_inactive(1_000, 1 << 20, 1);
        assert_eq!(summary, PurgeSummary::default());
        assert_eq!(lode.len(), 1);
    }
}
