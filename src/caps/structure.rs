use std::fmt;

use super::value::{CapsValue, Value};

/// A media type name plus named field constraints.
///
/// Fields keep insertion order. An unconstrained field is the same as an
/// absent one, so setting [`CapsValue::Any`] removes the field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Structure {
    name: String,
    fields: Vec<(String, CapsValue<Value>)>,
}

impl Structure {
    /// Structure with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<CapsValue<Value>>) -> Self {
        self.set(name, value);
        self
    }

    /// Media type name, e.g. `audio/x-raw`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the media type name matches.
    pub fn has_name(&self, name: &str) -> bool {
        self.name == name
    }

    /// Set or replace a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<CapsValue<Value>>) {
        let name = name.into();
        let value = value.into();
        if value.is_any() {
            self.remove(&name);
            return;
        }
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Field constraint.
    pub fn get(&self, name: &str) -> Option<&CapsValue<Value>> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Fixed value of a field.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(CapsValue::as_fixed)
    }

    /// Fixed integer value of a field.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_int)
    }

    /// Fixed string value of a field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_str)
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Option<CapsValue<Value>> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &CapsValue<Value>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// True if every field is fixed.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Field-wise intersection. `None` for different names or any
    /// disjoint field.
    ///
    /// Fields of `self` come first, then fields only `other` has.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }
        let mut fields = Vec::with_capacity(self.fields.len() + other.fields.len());
        for (name, value) in &self.fields {
            let merged = match other.get(name) {
                Some(theirs) => value.intersect(theirs)?,
                None => value.clone(),
            };
            fields.push((name.clone(), merged));
        }
        for (name, value) in &other.fields {
            if self.get(name).is_none() {
                fields.push((name.clone(), value.clone()));
            }
        }
        Some(Structure {
            name: self.name.clone(),
            fields,
        })
    }

    /// True if the structures have a non-empty intersection.
    pub fn can_intersect(&self, other: &Structure) -> bool {
        self.name == other.name
            && self.fields.iter().all(|(name, value)| match other.get(name) {
                Some(theirs) => value.intersect(theirs).is_some(),
                None => true,
            })
    }

    /// True if every value described by `self` is described by `superset`.
    ///
    /// A field `superset` constrains must be at least as constrained here;
    /// extra fields on `self` only narrow it further.
    pub fn is_subset(&self, superset: &Structure) -> bool {
        self.name == superset.name
            && superset.fields.iter().all(|(name, theirs)| {
                self.get(name)
                    .is_some_and(|ours| ours.is_subset(theirs))
            })
    }

    /// Pick one value per field: range lower bound, first list entry.
    pub fn fixate(&self) -> Structure {
        let fields = self
            .fields
            .iter()
            .filter_map(|(name, value)| {
                value
                    .fixate()
                    .map(|v| (name.clone(), CapsValue::Fixed(v)))
            })
            .collect();
        Structure {
            name: self.name.clone(),
            fields,
        }
    }

    /// Set `name` to the value nearest `target` if the field allows it.
    pub fn fixate_field_nearest(&mut self, name: &str, target: impl Into<Value>) -> bool {
        let target = target.into();
        let Some((_, slot)) = self.fields.iter_mut().find(|(n, _)| n == name) else {
            return false;
        };
        match slot.fixate_nearest(&target) {
            Some(v) => {
                *slot = CapsValue::Fixed(v);
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (name, value) in &self.fields {
            write!(f, ", {name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_audio() -> Structure {
        Structure::new("audio/x-raw")
            .with_field("rate", CapsValue::int_range(8000, 48000))
            .with_field("channels", 2)
    }

    #[test]
    fn test_set_any_removes_field() {
        let mut s = raw_audio();
        s.set("channels", CapsValue::Any);
        assert!(s.get("channels").is_none());
        assert_eq!(s.n_fields(), 1);
    }

    #[test]
    fn test_intersect_merges_fields() {
        let other = Structure::new("audio/x-raw")
            .with_field("rate", 44100)
            .with_field("format", "S16LE");
        let merged = raw_audio().intersect(&other).unwrap();
        assert_eq!(merged.get_int("rate"), Some(44100));
        assert_eq!(merged.get_int("channels"), Some(2));
        assert_eq!(merged.get_str("format"), Some("S16LE"));
        assert!(merged.is_fixed());
    }

    #[test]
    fn test_intersect_disjoint() {
        let video = Structure::new("video/x-raw");
        assert!(raw_audio().intersect(&video).is_none());
        let mono = Structure::new("audio/x-raw").with_field("channels", 1);
        assert!(raw_audio().intersect(&mono).is_none());
        assert!(!raw_audio().can_intersect(&mono));
    }

    #[test]
    fn test_subset() {
        let fixed = Structure::new("audio/x-raw")
            .with_field("rate", 16000)
            .with_field("channels", 2)
            .with_field("layout", "interleaved");
        assert!(fixed.is_subset(&raw_audio()));
        assert!(!raw_audio().is_subset(&fixed));
        assert!(!Structure::new("audio/x-raw").is_subset(&raw_audio()));
    }

    #[test]
    fn test_fixate_lower_bound() {
        let fixed = raw_audio().fixate();
        assert_eq!(fixed.get_int("rate"), Some(8000));
        assert!(fixed.is_fixed());
        assert_eq!(fixed.to_string(), "audio/x-raw, rate=(int)8000, channels=(int)2");
    }

    #[test]
    fn test_fixate_nearest() {
        let mut s = raw_audio();
        assert!(s.fixate_field_nearest("rate", 44100));
        assert_eq!(s.get_int("rate"), Some(44100));
        assert!(!s.fixate_field_nearest("missing", 1));
    }
}
