use std::fmt;

use crate::error::{FlowError, Result};
use crate::tuple::{FieldSet, Value};

/// One schema-conformant tuple. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    fields: FieldSet,
    values: Vec<Value>,
}

impl Record {
    pub fn new(fields: FieldSet, values: Vec<Value>) -> Result<Self> {
        if fields.len() != values.len() {
            return Err(FlowError::SchemaMismatch(format!(
                "{} values for {} fields {}",
                values.len(),
                fields.len(),
                fields
            )));
        }
        Ok(Self { fields, values })
    }

    /// Build a record whose arity is already known to match.
    pub(crate) fn from_parts(fields: FieldSet, values: Vec<Value>) -> Self {
        debug_assert_eq!(fields.len(), values.len());
        Self { fields, values }
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.position(name).map(|pos| &self.values[pos])
    }

    pub fn get_at(&self, pos: usize) -> Option<&Value> {
        self.values.get(pos)
    }

    /// Sub-record by field names; the source record is left untouched.
    pub fn select(&self, names: &FieldSet) -> Result<Record> {
        let positions = self.fields.positions_of(names)?;
        Ok(Record {
            fields: names.clone(),
            values: positions.iter().map(|&p| self.values[p].clone()).collect(),
        })
    }

    /// Sub-record by position range.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Result<Record> {
        let fields = self.fields.slice(range.clone())?;
        Ok(Record {
            fields,
            values: self.values[range].to_vec(),
        })
    }

    /// Values joined with `delimiter`, the text form written to line sinks.
    pub fn to_line(&self, delimiter: &str) -> String {
        self.values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(delimiter)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.fields.iter().zip(&self.values) {
            map.entry(&name, value);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Record {
        let fields = FieldSet::new(["ip", "method", "status"]).unwrap();
        Record::new(
            fields,
            vec!["10.0.0.1".into(), "GET".into(), Value::Integer(200)],
        )
        .unwrap()
    }

    #[test]
    fn arity_must_match() {
        let fields = FieldSet::new(["a", "b"]).unwrap();
        let err = Record::new(fields, vec!["x".into()]).unwrap_err();
        assert!(matches!(err, FlowError::SchemaMismatch(_)));
    }

    #[test]
    fn lookup_and_subsets() {
        let rec = sample();
        assert_eq!(rec.get("status"), Some(&Value::Integer(200)));
        assert_eq!(rec.get("size"), None);

        let sub = rec.select(&FieldSet::new(["status", "ip"]).unwrap()).unwrap();
        assert_eq!(sub.to_line("\t"), "200\t10.0.0.1");

        let tail = rec.slice(1..3).unwrap();
        assert_eq!(tail.fields().names(), &["method", "status"]);
        // Source untouched.
        assert_eq!(rec.values().len(), 3);
    }
}
