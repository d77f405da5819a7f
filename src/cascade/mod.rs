//! Cascades: sets of flows ordered by the data locations they share.
//!
//! A flow that writes a location another flow reads must finish before the
//! reader starts. Edges are inferred, never declared.

pub mod executor;
pub mod scheduler;

pub use executor::{Executor, JobHandle, JobStatus, LocalExecutor};
pub use scheduler::{CascadeStats, run_cascade};

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use crate::flow::{CancellationToken, Flow};
use crate::tap::{Location, Storage};

#[derive(Debug)]
pub struct Cascade {
    flows: Vec<Arc<Flow>>,
    /// Flows that read a sink of the flow at the same index.
    children: Vec<Vec<usize>>,
    parents: Vec<Vec<usize>>,
    config: EngineConfig,
}

impl Cascade {
    pub fn flows(&self) -> &[Arc<Flow>] {
        &self.flows
    }

    pub fn children(&self, flow: usize) -> &[usize] {
        &self.children[flow]
    }

    pub fn parents(&self, flow: usize) -> &[usize] {
        &self.parents[flow]
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Flow>> {
        self.flows.iter().find(|f| f.name() == name)
    }

    /// Run on local threads until every flow finished, one failed, or
    /// `cancel` fired.
    pub fn complete(
        &self,
        storage: Arc<dyn Storage>,
        cancel: &CancellationToken,
    ) -> Result<CascadeStats> {
        let executor = LocalExecutor::new(storage.clone(), cancel.clone());
        run_cascade(self, storage.as_ref(), &executor, cancel)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CascadeConnector {
    config: EngineConfig,
}

impl CascadeConnector {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Infer dependencies between `flows` and reject unschedulable sets:
    /// - no two flows may write the same location
    /// - dependencies must be acyclic
    pub fn connect(&self, flows: Vec<Flow>) -> Result<Cascade> {
        if flows.is_empty() {
            return Err(FlowError::Assembly("cascade has no flows".to_string()));
        }

        let (children, parents) = {
            // 1) Single writer per sink location.
            let mut writers = BTreeMap::<&Location, usize>::new();
            for (idx, flow) in flows.iter().enumerate() {
                for tap in flow.sinks() {
                    if let Some(&first) = writers.get(&tap.location) {
                        return Err(FlowError::SinkConflict {
                            location: tap.location.to_string(),
                            first: flows[first].name().to_string(),
                            second: flow.name().to_string(),
                        });
                    }
                    writers.insert(&tap.location, idx);
                }
            }

            // 2) Writer -> reader edges.
            let mut children = vec![Vec::new(); flows.len()];
            let mut parents = vec![Vec::new(); flows.len()];
            for (reader, flow) in flows.iter().enumerate() {
                if let Some(&writer) = writers.get(&flow.source().location) {
                    children[writer].push(reader);
                    parents[reader].push(writer);
                    debug!(
                        "cascade: {} feeds {} through {}",
                        flows[writer].name(),
                        flow.name(),
                        flow.source().location
                    );
                }
            }
            (children, parents)
        };

        // 3) Cycle detection (DFS coloring) from every flow, since a cycle
        // need not be reachable from a root.
        let mut marks = vec![None; flows.len()];
        let mut stack = Vec::new();
        for start in 0..flows.len() {
            stack.clear();
            visit(start, &children, &mut marks, &mut stack).map_err(|cycle| {
                let names: Vec<&str> = cycle.iter().map(|&i| flows[i].name()).collect();
                FlowError::Cycle(names.join(" -> "))
            })?;
        }

        Ok(Cascade {
            flows: flows.into_iter().map(Arc::new).collect(),
            children,
            parents,
            config: self.config.clone(),
        })
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Mark {
    Temp,
    Perm,
}

/// On a cycle, returns the path that closes it.
fn visit(
    v: usize,
    children: &[Vec<usize>],
    marks: &mut [Option<Mark>],
    stack: &mut Vec<usize>,
) -> std::result::Result<(), Vec<usize>> {
    match marks[v] {
        Some(Mark::Perm) => return Ok(()),
        Some(Mark::Temp) => {
            // v is on the current path.
            stack.push(v);
            let from = stack.iter().position(|&s| s == v).unwrap_or(0);
            return Err(stack[from..].to_vec());
        }
        None => {}
    }
    marks[v] = Some(Mark::Temp);
    stack.push(v);
    for &child in &children[v] {
        visit(child, children, marks, stack)?;
    }
    stack.pop();
    marks[v] = Some(Mark::Perm);
    Ok(())
}
