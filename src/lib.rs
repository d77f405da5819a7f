//! Field based record pipelines over text data, compiled into flows and run
//! in dependency order as cascades.

pub mod cascade;
pub mod config;
pub mod error;
pub mod flow;
pub mod operation;
pub mod pipe;
pub mod recipes;
pub mod tap;
pub mod tuple;

pub use cascade::{Cascade, CascadeConnector, CascadeStats, run_cascade};
pub use config::EngineConfig;
pub use error::{FlowError, FlowFailure, Result};
pub use flow::{CancellationToken, Flow, FlowConnector, FlowId, FlowStats};
pub use pipe::{Assembly, Pipe};
pub use tap::{Scheme, SinkMode, Tap};
pub use tuple::{FieldSet, Record, Value};
