//! Tag lists: stream metadata carried by TAG events and messages.
//!
//! | Tag | Type | Meaning |
//! |-----|------|---------|
//! | `title` | String | Stream title |
//! | `duration` | UInt | Duration in nanoseconds |
//! | `bitrate` | UInt | Bits per second |
//! | `codec` | String | Codec name |
//!
//! ```rust
//! use padline::event::{TagList, TagMergeMode};
//!
//! let mut tags = TagList::new();
//! tags.set("title", "Morning");
//! let mut more = TagList::new();
//! more.set("title", "Evening");
//! more.set("bitrate", 128_000u64);
//!
//! tags.merge(&more, TagMergeMode::Keep);
//! assert_eq!(tags.get_string("title"), Some("Morning"));
//! assert_eq!(tags.get_uint("bitrate"), Some(128_000));
//! ```

use std::collections::BTreeMap;

use crate::clock::ClockTime;

/// A tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Text.
    String(String),
    /// Unsigned integer (durations, bitrates).
    UInt(u64),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Double(f64),
    /// Boolean.
    Bool(bool),
}

impl TagValue {
    /// Text content.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned content; non-negative signed values convert.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            TagValue::UInt(v) => Some(*v),
            TagValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::String(v)
    }
}

impl From<u64> for TagValue {
    fn from(v: u64) -> Self {
        TagValue::UInt(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Double(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

/// How a new tag list combines with an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TagMergeMode {
    /// Drop existing tags, take the new list.
    ReplaceAll,
    /// New values win over existing ones.
    #[default]
    Replace,
    /// Existing values win; only missing tags are added.
    Keep,
    /// Ignore the new list.
    KeepAll,
}

/// Key/value stream metadata, ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagList {
    tags: BTreeMap<String, TagValue>,
}

impl TagList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Tag value.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Tag as text.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(TagValue::as_string)
    }

    /// Tag as unsigned integer.
    pub fn get_uint(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(TagValue::as_uint)
    }

    /// `duration` tag.
    pub fn duration(&self) -> Option<ClockTime> {
        self.get_uint("duration").map(ClockTime::from_nanos)
    }

    /// Remove a tag.
    pub fn remove(&mut self, key: &str) -> Option<TagValue> {
        self.tags.remove(key)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Combine `other` into this list.
    pub fn merge(&mut self, other: &TagList, mode: TagMergeMode) {
        match mode {
            TagMergeMode::ReplaceAll => self.tags = other.tags.clone(),
            TagMergeMode::Replace => {
                for (k, v) in &other.tags {
                    self.tags.insert(k.clone(), v.clone());
                }
            }
            TagMergeMode::Keep => {
                for (k, v) in &other.tags {
                    self.tags.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            TagMergeMode::KeepAll => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(pairs: &[(&str, &str)]) -> TagList {
        let mut tags = TagList::new();
        for (k, v) in pairs {
            tags.set(*k, *v);
        }
        tags
    }

    #[test]
    fn test_merge_modes() {
        let base = list(&[("title", "a"), ("codec", "raw")]);
        let incoming = list(&[("title", "b"), ("artist", "c")]);

        let mut replace = base.clone();
        replace.merge(&incoming, TagMergeMode::Replace);
        assert_eq!(replace.get_string("title"), Some("b"));
        assert_eq!(replace.len(), 3);

        let mut keep = base.clone();
        keep.merge(&incoming, TagMergeMode::Keep);
        assert_eq!(keep.get_string("title"), Some("a"));
        assert_eq!(keep.get_string("artist"), Some("c"));

        let mut all = base.clone();
        all.merge(&incoming, TagMergeMode::ReplaceAll);
        assert_eq!(all, incoming);

        let mut none = base.clone();
        none.merge(&incoming, TagMergeMode::KeepAll);
        assert_eq!(none, base);
    }

    #[test]
    fn test_duration_tag() {
        let mut tags = TagList::new();
        tags.set("duration", ClockTime::from_secs(3).nanos());
        assert_eq!(tags.duration(), Some(ClockTime::from_secs(3)));
        tags.set("duration", -1i64);
        assert_eq!(tags.duration(), None);
    }
}
