//! Typed field values.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view: integers, timestamps, and strings that parse as integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) | Value::Timestamp(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            Value::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) | Value::Timestamp(i) => Some(*i as f64),
            Value::String(s) => s.trim().parse().ok(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::String(_) => 0,
            Value::Integer(_) => 1,
            Value::Float(_) => 2,
            Value::Timestamp(_) => 3,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

// Total order so values can key the group barrier; floats use `total_cmp`.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Integer(i) | Value::Timestamp(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(i) | Value::Timestamp(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views() {
        assert_eq!(Value::from(" 42 ").as_i64(), Some(42));
        assert_eq!(Value::Timestamp(60_000).as_i64(), Some(60_000));
        assert_eq!(Value::from("GET").as_i64(), None);
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
    }

    #[test]
    fn ordering_is_total_across_variants() {
        let mut values = vec![
            Value::Timestamp(1),
            Value::Float(f64::NAN),
            Value::Integer(7),
            Value::from("b"),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(values[0], Value::from("a"));
        assert_eq!(values[1], Value::from("b"));
        assert_eq!(values[2], Value::Integer(7));
        assert_eq!(values[4], Value::Timestamp(1));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn display_is_plain_text() {
        assert_eq!(Value::Timestamp(1_577_836_800_000).to_string(), "1577836800000");
        assert_eq!(Value::from("/a").to_string(), "/a");
    }
}
