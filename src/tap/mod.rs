//! Taps: a location plus the scheme used to read records from it or write
//! records to it.

pub mod location;
pub mod storage;

pub use location::Location;
pub use storage::{LineSink, LocalFs, MemoryStorage, Storage};

use crate::error::{FlowError, Result};
use crate::tuple::{FieldSet, Record, Value};

const TAB: &str = "\t";

/// How lines map to records.
#[derive(Debug, Clone)]
pub enum Scheme {
    /// Source: `offset` (byte offset of the line) and `line`, or just `line`.
    /// Sink: every incoming field, tab separated.
    TextLine { fields: FieldSet },
    /// Tab separated values with exactly the declared fields.
    Delimited { fields: FieldSet },
}

impl Scheme {
    pub fn text_line() -> Self {
        Scheme::TextLine {
            fields: FieldSet::literal(&["offset", "line"]),
        }
    }

    /// A text line scheme with custom names: one field (the line) or two
    /// (offset, line).
    pub fn text_line_with(fields: FieldSet) -> Result<Self> {
        if fields.is_empty() || fields.len() > 2 {
            return Err(FlowError::SchemaMismatch(format!(
                "text line scheme takes one or two fields, got {}",
                fields
            )));
        }
        Ok(Scheme::TextLine { fields })
    }

    pub fn delimited(fields: FieldSet) -> Self {
        Scheme::Delimited { fields }
    }

    pub fn source_fields(&self) -> &FieldSet {
        match self {
            Scheme::TextLine { fields } | Scheme::Delimited { fields } => fields,
        }
    }

    /// Fields a sink insists on, if any.
    pub fn sink_fields(&self) -> Option<&FieldSet> {
        match self {
            Scheme::TextLine { .. } => None,
            Scheme::Delimited { fields } => Some(fields),
        }
    }

    pub(crate) fn decode(&self, offset: usize, line: &str) -> Result<Record> {
        match self {
            Scheme::TextLine { fields } => {
                let values = if fields.len() == 2 {
                    vec![Value::Integer(offset as i64), Value::from(line)]
                } else {
                    vec![Value::from(line)]
                };
                Ok(Record::from_parts(fields.clone(), values))
            }
            Scheme::Delimited { fields } => {
                let values: Vec<Value> = line.split(TAB).map(Value::from).collect();
                if values.len() != fields.len() {
                    return Err(FlowError::Parse {
                        line: line.to_string(),
                        pattern: format!("{} tab separated fields {}", fields.len(), fields),
                    });
                }
                Ok(Record::from_parts(fields.clone(), values))
            }
        }
    }
}

/// Whether an existing sink is replaced or protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    #[default]
    Replace,
    Keep,
}

#[derive(Debug, Clone)]
pub struct Tap {
    pub location: Location,
    pub scheme: Scheme,
    pub mode: SinkMode,
}

impl Tap {
    pub fn new(scheme: Scheme, location: impl Into<Location>) -> Self {
        Self {
            location: location.into(),
            scheme,
            mode: SinkMode::Replace,
        }
    }

    pub fn with_mode(mut self, mode: SinkMode) -> Self {
        self.mode = mode;
        self
    }

    /// Read every line and its byte offset. Offsets count the full `\r\n`
    /// terminator; the returned line drops the `\r`.
    pub(crate) fn read_lines(&self, storage: &dyn Storage) -> Result<Vec<(usize, String)>> {
        let mut offset = 0usize;
        let lines = storage.open_for_read(&self.location)?;
        Ok(lines
            .into_iter()
            .map(|mut line| {
                let at = offset;
                offset += line.len() + 1;
                if line.ends_with('\r') {
                    line.pop();
                }
                (at, line)
            })
            .collect())
    }

    /// Write `records` (all sharing `incoming`) and return how many were written.
    pub(crate) fn write_records(
        &self,
        storage: &dyn Storage,
        incoming: &FieldSet,
        records: &[Record],
    ) -> Result<usize> {
        let positions = match self.scheme.sink_fields() {
            Some(fields) => Some(incoming.positions_of(fields)?),
            None => None,
        };

        let mut sink = storage.open_for_write(&self.location)?;
        for record in records {
            let line = match &positions {
                Some(positions) => positions
                    .iter()
                    .map(|&p| record.values()[p].to_string())
                    .collect::<Vec<_>>()
                    .join(TAB),
                None => record.to_line(TAB),
            };
            sink.write_line(&line)?;
        }
        sink.finish()?;
        Ok(records.len())
    }
}
