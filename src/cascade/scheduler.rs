//! Dependency-ordered execution of a cascade.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::Select;
use log::{info, warn};

use super::executor::{Executor, JobHandle, JobStatus, lost};
use super::Cascade;
use crate::error::{FlowError, FlowFailure, Result};
use crate::flow::{CancellationToken, Flow, FlowId, FlowStats};
use crate::tap::Storage;

#[derive(Debug, Default)]
pub struct CascadeStats {
    /// Flows in the order they finished.
    pub completed: Vec<(FlowId, FlowStats)>,
}

/// Run every flow of `cascade` once, parents before children.
///
/// At most `parallelism` flows run at a time. Each flow's sinks are prepared
/// (cleared in replace mode) right before it is submitted. After the first
/// failure, or once `cancel` fires, nothing new is submitted; flows already
/// running are awaited and the result lists every failure plus every flow
/// that never started.
pub fn run_cascade(
    cascade: &Cascade,
    storage: &dyn Storage,
    executor: &dyn Executor,
    cancel: &CancellationToken,
) -> Result<CascadeStats> {
    let flows = cascade.flows();
    let limit = cascade.config().parallelism.max(1);
    let mut waiting: Vec<usize> = (0..flows.len()).map(|i| cascade.parents(i).len()).collect();
    let mut ready: VecDeque<usize> = (0..flows.len()).filter(|&i| waiting[i] == 0).collect();
    let mut started = vec![false; flows.len()];
    let mut running: Vec<(usize, JobHandle)> = Vec::new();
    let mut failed: Vec<FlowFailure> = Vec::new();
    let mut stats = CascadeStats::default();

    loop {
        while failed.is_empty() && !cancel.is_cancelled() && running.len() < limit {
            let Some(next) = ready.pop_front() else {
                break;
            };
            started[next] = true;
            let flow = &flows[next];
            match submit(flow, storage, executor) {
                Ok(handle) => running.push((next, handle)),
                Err(cause) => {
                    warn!("cascade: could not start flow {}: {}", flow.name(), cause);
                    failed.push(FlowFailure {
                        flow: flow.id().clone(),
                        cause,
                    });
                }
            }
        }
        if running.is_empty() {
            break;
        }

        let (slot, status) = {
            let mut select = Select::new();
            for (_, handle) in &running {
                select.recv(handle.receiver());
            }
            let oper = select.select();
            let slot = oper.index();
            (slot, oper.recv(running[slot].1.receiver()))
        };
        let (done, handle) = running.remove(slot);
        let flow = &flows[done];
        match status.unwrap_or_else(|_| JobStatus::Failed(lost(handle.flow()))) {
            JobStatus::Succeeded(flow_stats) => {
                info!("cascade: flow {} succeeded", flow.name());
                stats.completed.push((flow.id().clone(), flow_stats));
                for &child in cascade.children(done) {
                    waiting[child] -= 1;
                    if waiting[child] == 0 {
                        ready.push_back(child);
                    }
                }
            }
            JobStatus::Failed(cause) => {
                warn!("cascade: flow {} failed: {}", flow.name(), cause);
                failed.push(FlowFailure {
                    flow: flow.id().clone(),
                    cause,
                });
            }
        }
    }

    let skipped: Vec<FlowId> = flows
        .iter()
        .zip(&started)
        .filter(|(_, started)| !**started)
        .map(|(flow, _)| flow.id().clone())
        .collect();
    if failed.is_empty() && skipped.is_empty() {
        info!("cascade: {} flows completed", stats.completed.len());
        return Ok(stats);
    }
    Err(FlowError::CascadeFailed { failed, skipped })
}

fn submit(flow: &Arc<Flow>, storage: &dyn Storage, executor: &dyn Executor) -> Result<JobHandle> {
    flow.prepare_sinks(storage)?;
    info!("cascade: submitting flow {}", flow.name());
    executor.submit(Arc::clone(flow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{CascadeConnector, LocalExecutor};
    use crate::config::EngineConfig;
    use crate::flow::FlowConnector;
    use crate::operation::{Function, Output, Selector};
    use crate::pipe::Pipe;
    use crate::tap::{MemoryStorage, Scheme, Tap};
    use crate::tuple::FieldSet;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn copy(name: &str, from: &str, to: &str) -> Flow {
        FlowConnector::new(EngineConfig::serial())
            .connect(
                name,
                Tap::new(Scheme::text_line_with(FieldSet::new(["line"]).unwrap()).unwrap(), from),
                Tap::new(Scheme::text_line(), to),
                Pipe::new(name).each(Selector::All, Function::Identity, Output::Results),
            )
            .unwrap()
    }

    /// Runs flows inline and records submission order.
    struct Recording {
        storage: Arc<MemoryStorage>,
        order: Mutex<Vec<String>>,
    }

    impl Executor for Recording {
        fn submit(&self, flow: Arc<Flow>) -> Result<JobHandle> {
            self.order.lock().push(flow.name().to_string());
            let (tx, rx) = crossbeam_channel::bounded(1);
            let status = match flow.complete(self.storage.as_ref(), &CancellationToken::new()) {
                Ok(stats) => JobStatus::Succeeded(stats),
                Err(err) => JobStatus::Failed(err),
            };
            let _ = tx.send(status);
            Ok(JobHandle::new(flow.id().clone(), rx))
        }
    }

    #[test]
    fn dependencies_run_first() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("in", ["x"]);
        let cascade = CascadeConnector::new(EngineConfig::serial())
            .connect(vec![copy("c", "b", "c"), copy("b", "a", "b"), copy("a", "in", "a")])
            .unwrap();
        let executor = Recording {
            storage: storage.clone(),
            order: Mutex::new(Vec::new()),
        };
        let stats =
            run_cascade(&cascade, storage.as_ref(), &executor, &CancellationToken::new()).unwrap();
        assert_eq!(*executor.order.lock(), vec!["a", "b", "c"]);
        assert_eq!(stats.completed.len(), 3);
        assert_eq!(storage.lines("c").unwrap(), vec!["x"]);
    }

    #[test]
    fn failure_skips_dependents() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("in", ["x"]);
        storage.deny("a");
        let cascade = CascadeConnector::new(EngineConfig::serial())
            .connect(vec![copy("a", "in", "a"), copy("b", "a", "b"), copy("z", "in", "z")])
            .unwrap();
        let err = cascade
            .complete(storage.clone(), &CancellationToken::new())
            .unwrap_err();
        match err {
            FlowError::CascadeFailed { failed, skipped } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].flow.as_str(), "a");
                assert!(matches!(failed[0].cause, FlowError::Io { .. }));
                assert!(skipped.contains(&FlowId::from("b")));
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn cancelled_cascade_starts_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("in", ["x"]);
        let cascade = CascadeConnector::default()
            .connect(vec![copy("a", "in", "a")])
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = LocalExecutor::new(storage.clone(), cancel.clone());
        let err = run_cascade(&cascade, storage.as_ref(), &executor, &cancel).unwrap_err();
        match err {
            FlowError::CascadeFailed { failed, skipped } => {
                assert!(failed.is_empty());
                assert_eq!(skipped, vec![FlowId::from("a")]);
            }
            other => panic!("unexpected {}", other),
        }
        assert!(storage.lines("a").is_none());
    }
}
