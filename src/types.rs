use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp type (nanoseconds since epoch).
pub type Timestamp = i64;

/// Canonical series identifier, e.g. `"host=a;region=us"`.
pub type SeriesId = String;

/// A single `key=value` label attached to a point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A stored sample: timestamp plus the scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Value<T> {
    pub timestamp: Timestamp,
    pub value: T,
}

impl<T> Value<T> {
    pub fn new(timestamp: Timestamp, value: T) -> Self {
        Self { timestamp, value }
    }
}

/// Represents a single data point handed to `Engine::write_points`.
///
/// Tags are deduplicated by key on construction: they are stable-sorted by key and,
/// when two tags share a key, the one appearing later in the input wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Point<T> {
    measurement: Option<String>,
    tags: Vec<Tag>,
    timestamp: Timestamp,
    field: T,
}

impl<T> Point<T> {
    /// Builds a point from a tag list, a nanosecond timestamp and a field value.
    pub fn new(tags: impl IntoIterator<Item = Tag>, timestamp: Timestamp, field: T) -> Self {
        let mut point = Self {
            measurement: None,
            tags: tags.into_iter().collect(),
            timestamp,
            field,
        };
        point.dedup_tags();
        point
    }

    /// Builds a point stamped with a wall-clock instant.
    pub fn at(tags: impl IntoIterator<Item = Tag>, time: SystemTime, field: T) -> Self {
        Self::new(tags, unix_nanos(time), field)
    }

    /// Attaches a measurement name. It is carried along but never interpreted by the engine.
    pub fn with_measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement = Some(measurement.into());
        self
    }

    /// Sorts tags by key and collapses duplicate keys to their last occurrence. Idempotent.
    pub fn dedup_tags(&mut self) {
        dedup_tags(&mut self.tags);
    }

    /// Returns the canonical series identifier, or an empty string when the point has no tags.
    pub fn series_id(&self) -> SeriesId {
        series_id(&self.tags)
    }

    pub fn measurement(&self) -> Option<&str> {
        self.measurement.as_deref()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn field(&self) -> &T {
        &self.field
    }

    /// Splits the point into its tags and the value to store.
    pub fn into_parts(self) -> (Vec<Tag>, Value<T>) {
        (
            self.tags,
            Value {
                timestamp: self.timestamp,
                value: self.field,
            },
        )
    }
}

/// Stable-sorts `tags` ascending by key, keeping the last-occurring value for each key.
pub fn dedup_tags(tags: &mut Vec<Tag>) {
    tags.sort_by(|a, b| a.key.cmp(&b.key));
    let mut deduped: Vec<Tag> = Vec::with_capacity(tags.len());
    for tag in tags.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.key == tag.key => *last = tag,
            _ => deduped.push(tag),
        }
    }
    *tags = deduped;
}

/// Renders an already deduplicated, key-sorted tag list as `k1=v1;k2=v2`.
///
/// `\`, `;` and `=` inside keys and values are backslash-escaped so that distinct tag
/// sets never render to the same identifier. Plain tags render unchanged.
pub(crate) fn series_id(tags: &[Tag]) -> SeriesId {
    let mut id = String::new();
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            id.push(';');
        }
        push_escaped(&mut id, &tag.key);
        id.push('=');
        push_escaped(&mut id, &tag.value);
    }
    id
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, '\\' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Converts a wall-clock instant to nanoseconds since the epoch (negative before it).
pub fn unix_nanos(time: SystemTime) -> Timestamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => duration_nanos(d),
        Err(e) => -duration_nanos(e.duration()),
    }
}

/// Current wall-clock time in nanoseconds since the epoch.
pub fn now_nanos() -> Timestamp {
    unix_nanos(SystemTime::now())
}

/// Saturating conversion of a duration to signed nanoseconds.
pub fn duration_nanos(d: Duration) -> Timestamp {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}
