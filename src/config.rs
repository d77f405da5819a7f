//! Engine configuration, threaded explicitly through connectors and executors.
//!
//! JSON shape (every key optional):
//! {
//!   "parallelism": 4,     // flows running at once
//!   "map_tasks": 4,       // input partitions per flow
//!   "reduce_tasks": 2,    // concurrent key ranges per aggregate
//!   "combiner": true      // pre-aggregate before the group barrier
//! }

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub parallelism: usize,
    pub map_tasks: usize,
    pub reduce_tasks: usize,
    pub combiner: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            map_tasks: 4,
            reduce_tasks: 2,
            combiner: true,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).map_err(|e| FlowError::io(path.display(), e))?;
        let config: EngineConfig = serde_json::from_str(&text).map_err(|e| {
            FlowError::Config(format!("bad config {}: {}", path.display(), e))
        })?;
        config.validate()
    }

    pub fn validate(self) -> Result<Self> {
        for (name, value) in [
            ("parallelism", self.parallelism),
            ("map_tasks", self.map_tasks),
            ("reduce_tasks", self.reduce_tasks),
        ] {
            if value == 0 {
                return Err(FlowError::Config(format!("{} must be at least 1", name)));
            }
        }
        Ok(self)
    }

    /// Single-threaded settings, handy for deterministic tests.
    pub fn serial() -> Self {
        Self {
            parallelism: 1,
            map_tasks: 1,
            reduce_tasks: 1,
            combiner: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "map_tasks": 8 }"#).unwrap();
        assert_eq!(config.map_tasks, 8);
        assert_eq!(config.reduce_tasks, EngineConfig::default().reduce_tasks);
        assert!(config.combiner);
    }

    #[test]
    fn zero_counts_are_rejected() {
        let config = EngineConfig {
            reduce_tasks: 0,
            ..EngineConfig::serial()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "parallelism": 2, "combiner": false }"#).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.parallelism, 2);
        assert!(!config.combiner);

        std::fs::write(&path, r#"{ "workers": 2 }"#).unwrap();
        assert!(EngineConfig::from_file(&path).is_err());
    }
}
