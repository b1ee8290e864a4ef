//! Caps: negotiable descriptions of data formats.
//!
//! [`Caps`] is an ordered set of alternative [`Structure`]s, most preferred
//! first, or the special values ANY (accepts everything) and EMPTY (accepts
//! nothing). Caps are refcounted and copy-on-write like buffers.
//!
//! # Negotiation algebra
//!
//! - [`Caps::intersect`]: every pairwise structure intersection, in the
//!   order of the first operand's structures
//! - [`Caps::fixate`]: first structure, range lower bound, first list entry
//! - [`Caps::is_subset`]: every alternative is covered by the superset
//! - [`Caps::is_fixed`]: exactly one structure with only fixed fields
//!
//! ```rust
//! use padline::caps::{Caps, CapsValue};
//!
//! let sink = Caps::builder("audio/x-raw")
//!     .field("rate", CapsValue::int_range(8000, 48000))
//!     .build();
//! let src = Caps::builder("audio/x-raw").field("rate", 8000).build();
//!
//! let common = src.intersect(&sink);
//! assert!(common.is_fixed());
//! assert_eq!(common.to_string(), "audio/x-raw, rate=(int)8000");
//! ```

mod parse;
mod structure;
mod value;

pub use structure::Structure;
pub use value::{CapsValue, Fraction, Value};

use std::fmt;

use smallvec::SmallVec;

use crate::object::Shared;

#[derive(Clone, Debug, PartialEq, Eq)]
struct CapsInner {
    any: bool,
    structures: SmallVec<[Structure; 2]>,
}

/// A refcounted set of format alternatives.
#[derive(Clone, PartialEq, Eq)]
pub struct Caps(Shared<CapsInner>);

impl Caps {
    /// Caps accepting any format.
    pub fn new_any() -> Self {
        Self(Shared::new(CapsInner {
            any: true,
            structures: SmallVec::new(),
        }))
    }

    /// Caps accepting nothing.
    pub fn new_empty() -> Self {
        Self(Shared::new(CapsInner {
            any: false,
            structures: SmallVec::new(),
        }))
    }

    /// Caps with a single structure.
    pub fn from_structure(structure: Structure) -> Self {
        let mut structures = SmallVec::new();
        structures.push(structure);
        Self(Shared::new(CapsInner {
            any: false,
            structures,
        }))
    }

    /// Builder for single-structure caps.
    pub fn builder(name: impl Into<String>) -> CapsBuilder {
        CapsBuilder {
            structure: Structure::new(name),
        }
    }

    /// True for ANY caps.
    pub fn is_any(&self) -> bool {
        self.0.any
    }

    /// True for EMPTY caps.
    pub fn is_empty(&self) -> bool {
        !self.0.any && self.0.structures.is_empty()
    }

    /// True for exactly one structure whose fields are all fixed.
    pub fn is_fixed(&self) -> bool {
        !self.0.any && self.0.structures.len() == 1 && self.0.structures[0].is_fixed()
    }

    /// Number of structures (0 for ANY).
    pub fn size(&self) -> usize {
        self.0.structures.len()
    }

    /// Structure at `idx`.
    pub fn structure(&self, idx: usize) -> Option<&Structure> {
        self.0.structures.get(idx)
    }

    /// All structures, most preferred first.
    pub fn structures(&self) -> &[Structure] {
        &self.0.structures
    }

    /// Append an alternative. No-op on ANY caps.
    pub fn append_structure(&mut self, structure: Structure) {
        if self.0.any {
            return;
        }
        self.0.make_mut().structures.push(structure);
    }

    /// Number of handles sharing these caps.
    pub fn ref_count(&self) -> usize {
        self.0.ref_count()
    }

    /// Intersection of both sets of alternatives.
    ///
    /// Structures are produced in the order of `self`'s alternatives, so
    /// the first operand's preference wins. Duplicates are skipped.
    pub fn intersect(&self, other: &Caps) -> Caps {
        if self.is_any() {
            return other.clone();
        }
        if other.is_any() {
            return self.clone();
        }
        let mut structures: SmallVec<[Structure; 2]> = SmallVec::new();
        for ours in self.structures() {
            for theirs in other.structures() {
                match ours.intersect(theirs) {
                    Some(common) if !structures.contains(&common) => structures.push(common),
                    _ => {}
                }
            }
        }
        Caps(Shared::new(CapsInner {
            any: false,
            structures,
        }))
    }

    /// True if the intersection is not empty.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        self.structures()
            .iter()
            .any(|ours| other.structures().iter().any(|theirs| ours.can_intersect(theirs)))
    }

    /// True if every alternative of `self` is covered by `superset`.
    pub fn is_subset(&self, superset: &Caps) -> bool {
        if superset.is_any() {
            return true;
        }
        if self.is_any() {
            return false;
        }
        self.structures()
            .iter()
            .all(|ours| superset.structures().iter().any(|theirs| ours.is_subset(theirs)))
    }

    /// True if both describe the same set of formats.
    pub fn is_equal(&self, other: &Caps) -> bool {
        self == other || (self.is_subset(other) && other.is_subset(self))
    }

    /// Union: alternatives of `other` not already covered are appended.
    pub fn merge(&self, other: &Caps) -> Caps {
        if self.is_any() || other.is_any() {
            return Caps::new_any();
        }
        let mut merged = self.clone();
        for theirs in other.structures() {
            if !self.structures().iter().any(|ours| theirs.is_subset(ours)) {
                merged.append_structure(theirs.clone());
            }
        }
        merged
    }

    /// Fixed caps from the first alternative.
    ///
    /// Ranges become their lower bound, lists their first entry and
    /// unconstrained fields are dropped. `None` for ANY or EMPTY.
    pub fn fixate(&self) -> Option<Caps> {
        if self.is_any() {
            return None;
        }
        self.structures()
            .first()
            .map(|first| Caps::from_structure(first.fixate()))
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("ANY");
        }
        if self.is_empty() {
            return f.write_str("EMPTY");
        }
        for (i, structure) in self.structures().iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{structure}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Caps({self})")
    }
}

/// Builder for single-structure [`Caps`].
#[derive(Debug, Clone)]
pub struct CapsBuilder {
    structure: Structure,
}

impl CapsBuilder {
    /// Add a field constraint.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<CapsValue<Value>>) -> Self {
        self.structure.set(name, value);
        self
    }

    /// Finish.
    pub fn build(self) -> Caps {
        Caps::from_structure(self.structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(rate: impl Into<CapsValue<Value>>) -> Caps {
        Caps::builder("audio/x-raw").field("rate", rate).build()
    }

    #[test]
    fn test_disjoint_media_types_intersect_empty() {
        let a = audio(44100);
        let b = Caps::builder("video/x-raw").field("width", 320).build();
        assert!(a.intersect(&b).is_empty());
        assert!(!a.can_intersect(&b));
    }

    #[test]
    fn test_fixed_intersection_is_idempotent() {
        let a = audio(44100);
        let b = audio(44100);
        let common = a.intersect(&b);
        assert_eq!(common, a);
        assert_eq!(common, b);
    }

    #[test]
    fn test_range_against_fixed_negotiates_fixed() {
        let sink = audio(CapsValue::int_range(8000, 48000));
        let src = audio(8000);
        let common = sink.intersect(&src);
        assert_eq!(common.fixate().unwrap(), audio(8000));
        assert!(common.is_fixed());
    }

    #[test]
    fn test_any_and_empty() {
        let a = audio(44100);
        assert_eq!(Caps::new_any().intersect(&a), a);
        assert_eq!(a.intersect(&Caps::new_any()), a);
        assert!(a.intersect(&Caps::new_empty()).is_empty());
        assert!(a.is_subset(&Caps::new_any()));
        assert!(!Caps::new_any().is_subset(&a));
        assert!(Caps::new_empty().is_subset(&a));
        assert!(Caps::new_any().fixate().is_none());
        assert!(Caps::new_empty().fixate().is_none());
    }

    #[test]
    fn test_intersection_order_follows_first_operand() {
        let mut up = Caps::builder("audio/x-raw").field("format", "F32LE").build();
        up.append_structure(Structure::new("audio/x-raw").with_field("format", "S16LE"));
        let mut down = Caps::builder("audio/x-raw").field("format", "S16LE").build();
        down.append_structure(Structure::new("audio/x-raw").with_field("format", "F32LE"));

        let common = up.intersect(&down);
        assert_eq!(common.size(), 2);
        assert_eq!(common.structure(0).unwrap().get_str("format"), Some("F32LE"));
        assert_eq!(
            down.intersect(&up).structure(0).unwrap().get_str("format"),
            Some("S16LE")
        );
    }

    #[test]
    fn test_fixate_policy_pinned() {
        let mut caps = Caps::builder("audio/x-raw")
            .field("rate", CapsValue::int_range(16000, 48000))
            .field("format", CapsValue::list(["S16LE", "F32LE"]))
            .field("channels", CapsValue::Any)
            .build();
        caps.append_structure(Structure::new("audio/x-raw").with_field("rate", 8000));

        let fixed = caps.fixate().unwrap();
        let s = fixed.structure(0).unwrap();
        assert_eq!(fixed.size(), 1);
        assert_eq!(s.get_int("rate"), Some(16000));
        assert_eq!(s.get_str("format"), Some("S16LE"));
        assert!(s.get("channels").is_none());
    }

    #[test]
    fn test_subset_and_merge() {
        let wide = audio(CapsValue::int_range(8000, 48000));
        let narrow = audio(16000);
        assert!(narrow.is_subset(&wide));
        assert!(!wide.is_subset(&narrow));

        let merged = wide.merge(&narrow);
        assert_eq!(merged.size(), 1);
        let merged = narrow.merge(&Caps::builder("audio/mpeg").build());
        assert_eq!(merged.size(), 2);
        assert!(merged.is_equal(&merged.clone()));
    }

    #[test]
    fn test_append_is_copy_on_write() {
        let a = audio(8000);
        let mut b = a.clone();
        b.append_structure(Structure::new("audio/mpeg"));
        assert_eq!(a.size(), 1);
        assert_eq!(b.size(), 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(Caps::new_any().to_string(), "ANY");
        assert_eq!(Caps::new_empty().to_string(), "EMPTY");
        assert_eq!(
            audio(CapsValue::int_range(8000, 48000)).to_string(),
            "audio/x-raw, rate=(int)[ 8000, 48000 ]"
        );
    }
}
