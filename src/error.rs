//! Error taxonomy for assembly, compilation and execution.

use thiserror::Error;

use crate::flow::FlowId;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    /// Operator wiring does not line up with the fields flowing into it.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Pipes cannot be bound to the given taps.
    #[error("assembly error: {0}")]
    Assembly(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("could not match pattern: [{pattern}] with value: [{line}]")]
    Parse { line: String, pattern: String },

    #[error("could not parse timestamp [{value}] with format [{format}]")]
    TimestampParse { value: String, format: String },

    #[error("expression error: {0}")]
    Expression(String),

    #[error("i/o error on {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sink {location} is already present and its tap is in keep mode")]
    SinkExists { location: String },

    #[error("sink {location} is claimed by both {first} and {second}")]
    SinkConflict {
        location: String,
        first: String,
        second: String,
    },

    #[error("cycle detected between flows: {0}")]
    Cycle(String),

    #[error("flow {0} was cancelled")]
    Cancelled(String),

    #[error("flow {flow} worker panicked: {message}")]
    WorkerPanic { flow: String, message: String },

    #[error("cascade failed: {}", describe_failures(failed, skipped))]
    CascadeFailed {
        failed: Vec<FlowFailure>,
        /// Flows never started because an upstream or sibling flow failed.
        skipped: Vec<FlowId>,
    },
}

impl FlowError {
    pub(crate) fn io(location: impl ToString, source: std::io::Error) -> Self {
        FlowError::Io {
            location: location.to_string(),
            source,
        }
    }
}

/// One failed flow and the error that stopped it.
#[derive(Debug)]
pub struct FlowFailure {
    pub flow: FlowId,
    pub cause: FlowError,
}

fn describe_failures(failed: &[FlowFailure], skipped: &[FlowId]) -> String {
    let mut parts: Vec<String> = failed
        .iter()
        .map(|f| format!("[{}] {}", f.flow, f.cause))
        .collect();
    if !skipped.is_empty() {
        parts.push(format!("{} flows not started", skipped.len()));
    }
    parts.join("; ")
}
