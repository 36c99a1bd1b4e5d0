//! Hash-partitioned, lock-striped in-memory value store.
//!
//! Locking has two levels: each [`Partition`] guards its series map with a reader-writer
//! lock, and each [`Entry`] guards its own value log. Writers to existing series only
//! take the partition lock in shared mode, so unrelated series never contend and writers
//! to the same series contend only for the append itself.

use crate::error::TsdbError;
use crate::types::{SeriesId, Timestamp, Value};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::RwLock;
use xxhash_rust::xxh3::xxh3_64;

/// Number of partitions a shard is split into unless configured otherwise.
pub const DEFAULT_PARTITION_COUNT: usize = 16;

/// Totals reported by a retention sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Values dropped because they were older than the cutoff.
    pub values_removed: usize,
    /// Entries unlinked because they were already empty before the sweep.
    pub entries_evicted: usize,
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, rhs: Self) {
        self.values_removed += rhs.values_removed;
        self.entries_evicted += rhs.entries_evicted;
    }
}

/// Outcome of sweeping a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySweep {
    pub removed: usize,
    /// False when the entry held no values before this sweep and can be unlinked.
    pub keep: bool,
}

/// Append-only value log for exactly one series, in arrival order.
#[derive(Debug)]
pub struct Entry<T> {
    values: RwLock<Vec<Value<T>>>,
}

impl<T: Clone> Default for Entry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Entry<T> {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(Vec::new()),
        }
    }

    fn with_values(values: Vec<Value<T>>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Appends `values` as-is. No reordering or deduplication by timestamp.
    pub fn add(&self, values: Vec<Value<T>>) -> Result<(), TsdbError> {
        let mut guard = self.values.write()?;
        guard.extend(values);
        Ok(())
    }

    /// Drops every value with `timestamp < cutoff`, preserving the order of the rest.
    ///
    /// An entry that gets drained stays linked until the next sweep finds it still empty,
    /// so a series receiving sparse writes is not torn down and rebuilt every cycle.
    pub fn remove_before(&self, cutoff: Timestamp) -> Result<EntrySweep, TsdbError> {
        let mut guard = self.values.write()?;
        let before = guard.len();
        guard.retain(|v| v.timestamp >= cutoff);
        if guard.is_empty() {
            guard.shrink_to_fit();
        }
        Ok(EntrySweep {
            removed: before - guard.len(),
            keep: before > 0,
        })
    }

    /// Returns values with `min <= timestamp <= max`, in arrival order.
    ///
    /// The log is scanned in full so backfilled (out-of-order) values are not missed.
    pub fn values_between(&self, min: Timestamp, max: Timestamp) -> Result<Vec<Value<T>>, TsdbError> {
        let guard = self.values.read()?;
        Ok(guard
            .iter()
            .filter(|v| v.timestamp >= min && v.timestamp <= max)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize, TsdbError> {
        Ok(self.values.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, TsdbError> {
        Ok(self.values.read()?.is_empty())
    }
}

/// A stripe of the series keyspace: series identifier -> [`Entry`].
#[derive(Debug)]
pub struct Partition<T> {
    entries: RwLock<HashMap<SeriesId, Entry<T>>>,
}

impl<T: Clone> Default for Partition<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Partition<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Appends `values` to the entry for `key`, creating the entry on first write.
    ///
    /// The partition read lock is held across the append so a concurrent sweep cannot
    /// unlink the entry underneath the writer.
    pub fn write(&self, key: &str, values: Vec<Value<T>>) -> Result<(), TsdbError> {
        if values.is_empty() {
            return Ok(());
        }

        {
            let guard = self.entries.read()?;
            if let Some(entry) = guard.get(key) {
                return entry.add(values);
            }
        }

        let mut guard = self.entries.write()?;
        // Another writer may have created the entry while we waited for the write lock.
        match guard.get(key) {
            Some(entry) => entry.add(values),
            None => {
                guard.insert(key.to_string(), Entry::with_values(values));
                Ok(())
            }
        }
    }

    /// Sweeps every entry and unlinks the ones that were already empty before this sweep.
    pub fn remove_before(&self, cutoff: Timestamp) -> Result<SweepStats, TsdbError> {
        let mut guard = self.entries.write()?;
        let mut stats = SweepStats::default();
        let mut stale = Vec::new();
        for (key, entry) in guard.iter() {
            let sweep = entry.remove_before(cutoff)?;
            stats.values_removed += sweep.removed;
            if !sweep.keep {
                stale.push(key.clone());
            }
        }
        for key in &stale {
            guard.remove(key);
        }
        stats.entries_evicted = stale.len();
        Ok(stats)
    }

    /// Values of series `key` within `[min, max]`; empty when the series is unknown here.
    pub fn values_between(
        &self,
        key: &str,
        min: Timestamp,
        max: Timestamp,
    ) -> Result<Vec<Value<T>>, TsdbError> {
        let guard = self.entries.read()?;
        match guard.get(key) {
            Some(entry) => entry.values_between(min, max),
            None => Ok(Vec::new()),
        }
    }

    /// Number of linked entries.
    pub fn len(&self) -> Result<usize, TsdbError> {
        Ok(self.entries.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, TsdbError> {
        Ok(self.entries.read()?.is_empty())
    }

    /// Number of values stored for `key`, if the entry is linked.
    pub fn entry_len(&self, key: &str) -> Result<Option<usize>, TsdbError> {
        let guard = self.entries.read()?;
        guard.get(key).map(Entry::len).transpose()
    }
}

/// Fixed ring of partitions; a series is routed to `xxh3(series) % partition_count`.
///
/// The shard has no lock of its own.
#[derive(Debug)]
pub struct Shard<T> {
    partitions: Vec<Partition<T>>,
}

impl<T: Clone + Send + Sync> Shard<T> {
    /// Creates a shard with `partition_count` partitions (at least one).
    pub fn new(partition_count: usize) -> Self {
        let partitions = (0..partition_count.max(1)).map(|_| Partition::new()).collect();
        Self { partitions }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Index of the partition owning `key`. Stable for the lifetime of the shard.
    pub fn partition_index(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) % self.partitions.len() as u64) as usize
    }

    pub fn route_partition(&self, key: &str) -> &Partition<T> {
        &self.partitions[self.partition_index(key)]
    }

    /// Writes each series' values to its partition. Not atomic across series.
    pub fn write_multi(&self, batch: HashMap<SeriesId, Vec<Value<T>>>) -> Result<(), TsdbError> {
        for (series, values) in batch {
            self.route_partition(&series).write(&series, values)?;
        }
        Ok(())
    }

    /// Sweeps all partitions in parallel. Partitions are swept independently, so a
    /// concurrent query may observe some swept and some not yet swept.
    pub fn remove_before(&self, cutoff: Timestamp) -> Result<SweepStats, TsdbError> {
        self.partitions
            .par_iter()
            .map(|p| p.remove_before(cutoff))
            .try_reduce(SweepStats::default, |mut a, b| {
                a += b;
                Ok(a)
            })
    }

    pub fn values_between(
        &self,
        key: &str,
        min: Timestamp,
        max: Timestamp,
    ) -> Result<Vec<Value<T>>, TsdbError> {
        self.route_partition(key).values_between(key, min, max)
    }

    /// Number of linked entries across all partitions.
    pub fn series_count(&self) -> Result<usize, TsdbError> {
        self.partitions
            .iter()
            .try_fold(0usize, |acc, p| -> Result<usize, TsdbError> { Ok(acc + p.len()?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn v(ts: Timestamp, val: i64) -> Value<i64> {
        Value::new(ts, val)
    }

    #[test]
    fn entry_appends_in_arrival_order() {
        let entry = Entry::new();
        entry.add(vec![v(300, 3), v(100, 1)]).unwrap();
        entry.add(vec![v(200, 2)]).unwrap();
        assert_eq!(
            entry.values_between(i64::MIN, i64::MAX).unwrap(),
            vec![v(300, 3), v(100, 1), v(200, 2)]
        );
    }

    #[test]
    fn entry_range_is_inclusive() {
        let entry = Entry::new();
        entry.add(vec![v(10, 1), v(20, 2), v(30, 3), v(40, 4)]).unwrap();
        assert_eq!(entry.values_between(20, 30).unwrap(), vec![v(20, 2), v(30, 3)]);
        assert!(entry.values_between(41, 50).unwrap().is_empty());
    }

    #[test]
    fn entry_range_finds_backfilled_values() {
        let entry = Entry::new();
        entry.add(vec![v(100, 1), v(200, 2)]).unwrap();
        entry.add(vec![v(50, 0), v(150, 9)]).unwrap();
        assert_eq!(entry.values_between(40, 160).unwrap(), vec![v(100, 1), v(50, 0), v(150, 9)]);
    }

    #[test]
    fn entry_remove_before_keeps_order_and_reports_liveness() {
        let entry = Entry::new();
        entry.add(vec![v(5, 1), v(1, 2), v(9, 3), v(3, 4)]).unwrap();

        let sweep = entry.remove_before(4).unwrap();
        assert_eq!(sweep, EntrySweep { removed: 2, keep: true });
        assert_eq!(entry.values_between(i64::MIN, i64::MAX).unwrap(), vec![v(5, 1), v(9, 3)]);

        let sweep = entry.remove_before(100).unwrap();
        assert_eq!(sweep, EntrySweep { removed: 2, keep: true });
        assert!(entry.is_empty().unwrap());

        let sweep = entry.remove_before(100).unwrap();
        assert_eq!(sweep, EntrySweep { removed: 0, keep: false });
    }

    #[test]
    fn partition_evicts_drained_entry_on_second_sweep() {
        let p = Partition::new();
        p.write("a=b", vec![v(10, 1)]).unwrap();

        let stats = p.remove_before(100).unwrap();
        assert_eq!(stats, SweepStats { values_removed: 1, entries_evicted: 0 });
        assert_eq!(p.len().unwrap(), 1);
        assert_eq!(p.entry_len("a=b").unwrap(), Some(0));

        let stats = p.remove_before(100).unwrap();
        assert_eq!(stats, SweepStats { values_removed: 0, entries_evicted: 1 });
        assert!(p.is_empty().unwrap());
        assert!(p.values_between("a=b", 0, 1000).unwrap().is_empty());
    }

    #[test]
    fn partition_write_between_sweeps_keeps_entry() {
        let p = Partition::new();
        p.write("a=b", vec![v(10, 1)]).unwrap();
        p.remove_before(100).unwrap();

        p.write("a=b", vec![v(150, 2)]).unwrap();
        let stats = p.remove_before(100).unwrap();
        assert_eq!(stats.entries_evicted, 0);
        assert_eq!(p.values_between("a=b", 0, 1000).unwrap(), vec![v(150, 2)]);
    }

    #[test]
    fn partition_ignores_empty_writes() {
        let p: Partition<i64> = Partition::new();
        p.write("a=b", Vec::new()).unwrap();
        assert!(p.is_empty().unwrap());
    }

    #[test]
    fn partition_unknown_series_is_empty() {
        let p: Partition<i64> = Partition::new();
        assert!(p.values_between("nope", 0, 10).unwrap().is_empty());
        assert_eq!(p.entry_len("nope").unwrap(), None);
    }

    #[test]
    fn concurrent_first_writes_create_one_entry() {
        let p = Arc::new(Partition::new());
        let threads = 8;
        let per_thread = 500;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let p = Arc::clone(&p);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..per_thread {
                        p.write("cpu=#0", vec![v((t * per_thread + i) as i64, 1)]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(p.len().unwrap(), 1);
        assert_eq!(p.entry_len("cpu=#0").unwrap(), Some(threads * per_thread));
    }

    #[test]
    fn routing_is_deterministic_and_spreads_keys() {
        let shard: Shard<i64> = Shard::new(DEFAULT_PARTITION_COUNT);
        assert_eq!(shard.partition_count(), 16);

        let mut used = HashSet::new();
        for i in 0..1000 {
            let key = format!("host=h{};region=r{}", i, i % 7);
            let idx = shard.partition_index(&key);
            assert_eq!(idx, shard.partition_index(&key));
            assert!(idx < 16);
            used.insert(idx);
        }
        assert_eq!(used.len(), 16);
    }

    #[test]
    fn zero_partitions_clamps_to_one() {
        let shard: Shard<i64> = Shard::new(0);
        assert_eq!(shard.partition_count(), 1);
        assert_eq!(shard.partition_index("anything"), 0);
    }

    #[test]
    fn shard_write_multi_and_sweep() {
        let shard = Shard::new(4);
        let mut batch = HashMap::new();
        for i in 0..20 {
            batch.insert(format!("s={}", i), vec![v(10, i), v(200, i)]);
        }
        shard.write_multi(batch).unwrap();
        assert_eq!(shard.series_count().unwrap(), 20);

        let stats = shard.remove_before(100).unwrap();
        assert_eq!(stats, SweepStats { values_removed: 20, entries_evicted: 0 });
        for i in 0..20 {
            assert_eq!(shard.values_between(&format!("s={}", i), 0, 1000).unwrap(), vec![v(200, i)]);
        }

        shard.remove_before(1000).unwrap();
        let stats = shard.remove_before(1000).unwrap();
        assert_eq!(stats.entries_evicted, 20);
        assert_eq!(shard.series_count().unwrap(), 0);
    }
}
