//! Series index: the set of known series and a tag -> series inverted index.
//!
//! The index only grows. Series whose data has expired stay registered; queries against
//! them simply come back empty from storage.

use crate::error::TsdbError;
use crate::types::{SeriesId, Tag};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct IndexInner {
    /// Fast membership check for already registered series.
    series: HashSet<SeriesId>,
    /// Tag -> series containing that exact key and value.
    postings: HashMap<Tag, Vec<SeriesId>>,
}

/// Tracks which series exist and which series carry each tag.
///
/// A single reader-writer lock guards the whole structure: registration takes the
/// writer side, lookups the reader side.
#[derive(Debug, Default)]
pub struct SeriesIndex {
    inner: RwLock<IndexInner>,
}

impl SeriesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every series in `batch` that is not yet known and appends it to the
    /// posting list of each of its tags.
    ///
    /// Already-known series are skipped; the remaining new series in the same batch are
    /// still registered. Returns the number of newly registered series.
    pub fn register_series_if_absent(
        &self,
        batch: &HashMap<SeriesId, Vec<Tag>>,
    ) -> Result<usize, TsdbError> {
        // Avoid the writer lock entirely when nothing is new.
        {
            let guard = self.inner.read()?;
            if batch.keys().all(|series| guard.series.contains(series)) {
                return Ok(0);
            }
        }

        let mut guard = self.inner.write()?;
        let inner = &mut *guard;
        let mut created = 0;
        for (series, tags) in batch {
            if inner.series.contains(series) {
                continue;
            }
            inner.series.insert(series.clone());
            for tag in tags {
                inner
                    .postings
                    .entry(tag.clone())
                    .or_default()
                    .push(series.clone());
            }
            created += 1;
        }
        Ok(created)
    }

    /// Returns the series carrying every one of `tags` (exact key and value match).
    ///
    /// An empty filter matches nothing. The result order is unspecified.
    pub fn find_series(&self, tags: &[Tag]) -> Result<Vec<SeriesId>, TsdbError> {
        let wanted: HashSet<&Tag> = tags.iter().collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let guard = self.inner.read()?;
        let mut hits: HashMap<&str, usize> = HashMap::new();
        for tag in &wanted {
            let Some(series) = guard.postings.get(*tag) else {
                // A tag nobody carries rules out every candidate.
                return Ok(Vec::new());
            };
            for s in series {
                *hits.entry(s.as_str()).or_insert(0) += 1;
            }
        }

        Ok(hits
            .into_iter()
            .filter(|&(_, count)| count == wanted.len())
            .map(|(series, _)| series.to_string())
            .collect())
    }

    /// Returns whether `series` has been registered.
    pub fn contains(&self, series: &str) -> Result<bool, TsdbError> {
        Ok(self.inner.read()?.series.contains(series))
    }

    /// Number of registered series.
    pub fn series_count(&self) -> Result<usize, TsdbError> {
        Ok(self.inner.read()?.series.len())
    }
}
