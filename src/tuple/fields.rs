//! Field sets: ordered, unique field names acting as a record schema.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{FlowError, Result};

/// An ordered set of unique field names.
///
/// Cloning is cheap; the name list and the name -> position index are shared.
#[derive(Clone)]
pub struct FieldSet {
    inner: Arc<Inner>,
}

struct Inner {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl FieldSet {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(names.len());
        for (pos, name) in names.iter().enumerate() {
            if index.insert(name.clone(), pos).is_some() {
                return Err(FlowError::SchemaMismatch(format!(
                    "duplicate field {:?} in {:?}",
                    name, names
                )));
            }
        }
        Ok(Self {
            inner: Arc::new(Inner { names, index }),
        })
    }

    /// Fixed names known to be unique at the call site.
    pub(crate) fn literal(names: &[&str]) -> Self {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let index = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        Self {
            inner: Arc::new(Inner { names, index }),
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                names: Vec::new(),
                index: HashMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.inner.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.inner.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.index.contains_key(name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.inner.index.get(name).copied()
    }

    /// Positions of `selector`'s fields within this set, in selector order.
    pub fn positions_of(&self, selector: &FieldSet) -> Result<Vec<usize>> {
        selector
            .iter()
            .map(|name| {
                self.position(name).ok_or_else(|| {
                    FlowError::SchemaMismatch(format!(
                        "field {:?} not found in {}",
                        name, self
                    ))
                })
            })
            .collect()
    }

    /// Concatenate two field sets; names must stay unique.
    pub fn append(&self, other: &FieldSet) -> Result<FieldSet> {
        FieldSet::new(self.iter().chain(other.iter()))
    }

    /// Subset by name, in the order given.
    pub fn select(&self, names: &FieldSet) -> Result<FieldSet> {
        self.positions_of(names)?;
        Ok(names.clone())
    }

    /// Subset by position range.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Result<FieldSet> {
        let names = self.inner.names.get(range.clone()).ok_or_else(|| {
            FlowError::SchemaMismatch(format!("range {:?} out of bounds for {}", range, self))
        })?;
        FieldSet::new(names.iter().cloned())
    }
}

impl PartialEq for FieldSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.names == other.inner.names
    }
}

impl Eq for FieldSet {}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.inner.names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_duplicate_names() {
        let err = FieldSet::new(["a", "b", "a"]).unwrap_err();
        assert!(matches!(err, FlowError::SchemaMismatch(_)));
    }

    #[test]
    fn append_and_select() {
        let left = FieldSet::new(["ip", "time"]).unwrap();
        let right = FieldSet::new(["status"]).unwrap();
        let all = left.append(&right).unwrap();
        assert_eq!(all.names(), &["ip", "time", "status"]);
        assert_eq!(all.position("status"), Some(2));

        let picked = all.select(&FieldSet::new(["status", "ip"]).unwrap()).unwrap();
        assert_eq!(all.positions_of(&picked).unwrap(), vec![2, 0]);

        assert!(left.append(&left).is_err());
        assert!(all.select(&FieldSet::new(["size"]).unwrap()).is_err());
    }

    #[test]
    fn slice_by_range() {
        let all = FieldSet::new(["a", "b", "c"]).unwrap();
        assert_eq!(all.slice(1..3).unwrap().names(), &["b", "c"]);
        assert!(all.slice(2..5).is_err());
    }
}
