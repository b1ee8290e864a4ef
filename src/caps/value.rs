//! Field values and constraint algebra.
//!
//! [`CapsValue<T>`] is a constraint on one field: fixed, inclusive range,
//! preference-ordered list or unconstrained. Intersection finds the common
//! ground of two constraints and fixation picks the preferred value:
//! lower bound of a range, first entry of a list.

use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Fraction
// ============================================================================

/// A reduced fraction with a positive denominator (frame rates, aspect ratios).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fraction {
    num: i32,
    den: i32,
}

impl Fraction {
    /// `num/den`, reduced. A zero denominator is treated as `num/1`.
    pub fn new(num: i32, den: i32) -> Self {
        let (mut num, mut den) = (num as i64, den as i64);
        if den == 0 {
            den = 1;
        }
        if den < 0 {
            num = -num;
            den = -den;
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        Self {
            num: (num / g) as i32,
            den: (den / g) as i32,
        }
    }

    /// Numerator.
    pub const fn num(self) -> i32 {
        self.num
    }

    /// Denominator.
    pub const fn den(self) -> i32 {
        self.den
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        // a/b vs c/d => a*d vs c*b, denominators are positive
        let lhs = self.num as i64 * other.den as i64;
        let rhs = other.num as i64 * self.den as i64;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Value
// ============================================================================

/// A scalar field value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    /// Integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// String.
    Str(String),
    /// Fraction.
    Fraction(Fraction),
}

impl Value {
    /// Type name used in the caps string syntax.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Fraction(_) => "fraction",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::Bool(_) => 1,
            Value::Str(_) => 2,
            Value::Fraction(_) => 3,
        }
    }

    /// Integer content, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean content, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Fraction content, if any.
    pub fn as_fraction(&self) -> Option<Fraction> {
        match self {
            Value::Fraction(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Fraction(a), Value::Fraction(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Fraction(v) => write!(f, "{v}"),
            Value::Str(s) if needs_quotes(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
            Value::Str(s) => f.write_str(s),
        }
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.+:/".contains(c))
        || s.parse::<i64>().is_ok()
        || matches!(s, "true" | "false")
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Fraction> for Value {
    fn from(v: Fraction) -> Self {
        Value::Fraction(v)
    }
}

// ============================================================================
// CapsValue
// ============================================================================

/// A constraint on one caps field.
///
/// ```rust
/// use padline::caps::{CapsValue, Value};
///
/// let range: CapsValue<Value> = CapsValue::Range { min: 8000.into(), max: 48000.into() };
/// let fixed: CapsValue<Value> = CapsValue::Fixed(44100.into());
/// assert_eq!(range.intersect(&fixed), Some(fixed.clone()));
/// assert_eq!(range.fixate(), Some(Value::Int(8000)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum CapsValue<T> {
    /// Exactly this value.
    Fixed(T),
    /// Any value in the inclusive range.
    Range {
        /// Lower bound.
        min: T,
        /// Upper bound.
        max: T,
    },
    /// One of these values, most preferred first.
    List(Vec<T>),
    /// Unconstrained.
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// True if `value` satisfies the constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Common ground of two constraints, `None` if disjoint.
    ///
    /// List order follows `self`. Results with a single value collapse to
    /// `Fixed`.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, other) => Some(other.clone()),
            (this, Self::Any) => Some(this.clone()),

            (Self::Fixed(v), other) | (other, Self::Fixed(v)) => {
                other.accepts(v).then(|| Self::Fixed(v.clone()))
            }

            (Self::Range { min: min1, max: max1 }, Self::Range { min: min2, max: max2 }) => {
                let lo = min1.max(min2);
                let hi = max1.min(max2);
                match lo.cmp(hi) {
                    Ordering::Greater => None,
                    Ordering::Equal => Some(Self::Fixed(lo.clone())),
                    Ordering::Less => Some(Self::Range {
                        min: lo.clone(),
                        max: hi.clone(),
                    }),
                }
            }

            (Self::List(list), other @ Self::Range { .. })
            | (other @ Self::Range { .. }, Self::List(list)) => {
                Self::collapse(list.iter().filter(|v| other.accepts(v)).cloned().collect())
            }

            (Self::List(list1), Self::List(list2)) => {
                Self::collapse(list1.iter().filter(|v| list2.contains(v)).cloned().collect())
            }
        }
    }

    fn collapse(mut values: Vec<T>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Fixed),
            _ => Some(Self::List(values)),
        }
    }

    /// True if every value accepted by `self` is accepted by `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::Any) => true,
            (Self::Any, _) => false,
            (Self::Fixed(v), other) => other.accepts(v),
            (Self::List(values), other) => values.iter().all(|v| other.accepts(v)),
            (Self::Range { min, max }, Self::Range { min: lo, max: hi }) => min >= lo && max <= hi,
            (Self::Range { min, max }, _) => min == max && other.accepts(min),
        }
    }

    /// The preferred value: fixed value, range lower bound, first list entry.
    ///
    /// `None` for `Any` and for an empty list.
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }

    /// The preferred value closest to `target`.
    ///
    /// Used by elements that want a specific value inside a range or list
    /// before falling back to the default policy.
    pub fn fixate_nearest(&self, target: &T) -> Option<T> {
        if self.accepts(target) {
            return Some(target.clone());
        }
        match self {
            Self::Range { min, max } => Some(if target < min { min.clone() } else { max.clone() }),
            _ => self.fixate(),
        }
    }

    /// True for `Fixed`.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// True for `Any`.
    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// The value if fixed.
    #[inline]
    pub fn as_fixed(&self) -> Option<&T> {
        match self {
            Self::Fixed(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_fixed_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for CapsValue<Value> {
                fn from(value: $ty) -> Self {
                    Self::Fixed(value.into())
                }
            }
        )*
    };
}

impl_fixed_from!(i64, i32, bool, &str, String, Fraction);

impl From<Value> for CapsValue<Value> {
    fn from(value: Value) -> Self {
        Self::Fixed(value)
    }
}

impl CapsValue<Value> {
    /// Integer range `[min, max]`.
    pub fn int_range(min: i64, max: i64) -> Self {
        Self::Range {
            min: Value::Int(min),
            max: Value::Int(max),
        }
    }

    /// Fraction range `[min, max]`.
    pub fn fraction_range(min: Fraction, max: Fraction) -> Self {
        Self::Range {
            min: Value::Fraction(min),
            max: Value::Fraction(max),
        }
    }

    /// List from anything convertible to [`Value`].
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    /// Type name of the contained values, `None` for `Any` or an empty list.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            Self::Fixed(v) | Self::Range { min: v, .. } => Some(v.type_name()),
            Self::List(values) => values.first().map(Value::type_name),
            Self::Any => None,
        }
    }
}

impl fmt::Display for CapsValue<Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = self.type_name() {
            write!(f, "({kind})")?;
        }
        match self {
            Self::Fixed(v) => write!(f, "{v}"),
            Self::Range { min, max } => write!(f, "[ {min}, {max} ]"),
            Self::List(values) => {
                f.write_str("{ ")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(" }")
            }
            Self::Any => f.write_str("ANY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    #[test]
    fn test_fraction_reduced_and_ordered() {
        assert_eq!(Fraction::new(60, 2), Fraction::new(30, 1));
        assert_eq!(Fraction::new(1, -2), Fraction::new(-1, 2));
        assert!(Fraction::new(30000, 1001) < Fraction::new(30, 1));
        assert_eq!(Fraction::new(25, 0).den(), 1);
    }

    #[test]
    fn test_intersect_fixed() {
        let a: CapsValue<Value> = 5.into();
        assert_eq!(a.intersect(&a), Some(a.clone()));
        assert_eq!(a.intersect(&6.into()), None);
        assert_eq!(a.intersect(&CapsValue::Any), Some(a.clone()));
    }

    #[test]
    fn test_intersect_range_range() {
        let a = CapsValue::int_range(8000, 48000);
        let b = CapsValue::int_range(44100, 96000);
        assert_eq!(a.intersect(&b), Some(CapsValue::int_range(44100, 48000)));
        assert_eq!(
            a.intersect(&CapsValue::int_range(48000, 96000)),
            Some(CapsValue::Fixed(int(48000)))
        );
        assert_eq!(a.intersect(&CapsValue::int_range(1, 100)), None);
    }

    #[test]
    fn test_intersect_list_keeps_first_order() {
        let a = CapsValue::list([3, 1, 2]);
        let b = CapsValue::list([2, 3, 9]);
        assert_eq!(a.intersect(&b), Some(CapsValue::list([3, 2])));
        assert_eq!(b.intersect(&a), Some(CapsValue::list([2, 3])));
        assert_eq!(
            a.intersect(&CapsValue::int_range(2, 10)),
            Some(CapsValue::list([3, 2]))
        );
        assert_eq!(
            a.intersect(&CapsValue::int_range(3, 10)),
            Some(CapsValue::Fixed(int(3)))
        );
    }

    #[test]
    fn test_fixate_policy() {
        assert_eq!(CapsValue::int_range(8000, 48000).fixate(), Some(int(8000)));
        assert_eq!(CapsValue::list(["b", "a"]).fixate(), Some(Value::from("b")));
        assert_eq!(CapsValue::<Value>::Any.fixate(), None);
        assert_eq!(
            CapsValue::int_range(8000, 48000).fixate_nearest(&int(44100)),
            Some(int(44100))
        );
        assert_eq!(
            CapsValue::int_range(8000, 48000).fixate_nearest(&int(96000)),
            Some(int(48000))
        );
    }

    #[test]
    fn test_subset() {
        let range = CapsValue::int_range(0, 10);
        assert!(CapsValue::from(3).is_subset(&range));
        assert!(CapsValue::list([1, 2]).is_subset(&range));
        assert!(CapsValue::int_range(2, 4).is_subset(&range));
        assert!(!range.is_subset(&CapsValue::int_range(2, 4)));
        assert!(!CapsValue::Any.is_subset(&range));
        assert!(range.is_subset(&CapsValue::Any));
    }

    #[test]
    fn test_display() {
        assert_eq!(CapsValue::int_range(1, 2).to_string(), "(int)[ 1, 2 ]");
        assert_eq!(CapsValue::list(["S16LE", "F32LE"]).to_string(), "(string){ S16LE, F32LE }");
        assert_eq!(CapsValue::from("two words").to_string(), "(string)\"two words\"");
        assert_eq!(CapsValue::from(Fraction::new(30, 1)).to_string(), "(fraction)30/1");
        assert_eq!(CapsValue::from(true).to_string(), "(boolean)true");
    }
}
