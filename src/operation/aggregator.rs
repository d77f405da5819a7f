//! Per-group aggregators.
//!
//! Accumulators can be folded one record at a time and merged with partial
//! results from other partitions, so the same aggregator serves as combiner
//! (before the group barrier) and reducer (after it).

use crate::error::{FlowError, Result};
use crate::tuple::{FieldSet, Record, Value};

#[derive(Debug, Clone)]
pub enum Aggregator {
    Count { declared: FieldSet },
}

impl Aggregator {
    /// Count records per group into a field named `count`.
    pub fn count() -> Self {
        Aggregator::Count {
            declared: FieldSet::literal(&["count"]),
        }
    }

    pub fn count_as(declared: FieldSet) -> Result<Self> {
        if declared.len() != 1 {
            return Err(FlowError::SchemaMismatch(format!(
                "count declares exactly one field, got {}",
                declared
            )));
        }
        Ok(Aggregator::Count { declared })
    }

    pub fn declared(&self) -> &FieldSet {
        match self {
            Aggregator::Count { declared } => declared,
        }
    }

    pub fn start(&self) -> Accumulator {
        match self {
            Aggregator::Count { .. } => Accumulator::Count(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accumulator {
    Count(i64),
}

impl Accumulator {
    /// Account for one grouped record.
    pub fn fold(&mut self, _record: &Record) {
        match self {
            Accumulator::Count(n) => *n += 1,
        }
    }

    pub fn merge(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
        }
    }

    pub fn finish(&self) -> Vec<Value> {
        match self {
            Accumulator::Count(n) => vec![Value::Integer(*n)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_counts_merge() {
        let agg = Aggregator::count();
        assert_eq!(agg.declared().names(), &["count"]);

        let rec = Record::new(FieldSet::new(["ip"]).unwrap(), vec!["10.0.0.1".into()]).unwrap();
        let mut left = agg.start();
        left.fold(&rec);
        left.fold(&rec);
        let mut right = agg.start();
        right.fold(&rec);

        left.merge(&right);
        assert_eq!(left.finish(), vec![Value::Integer(3)]);
        assert_eq!(agg.start().finish(), vec![Value::Integer(0)]);
    }

    #[test]
    fn custom_count_field() {
        let agg = Aggregator::count_as(FieldSet::new(["hits"]).unwrap()).unwrap();
        assert_eq!(agg.declared().names(), &["hits"]);
        assert!(Aggregator::count_as(FieldSet::new(["a", "b"]).unwrap()).is_err());
    }
}
