//! Job submission: where a compiled flow actually runs.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, bounded};

use crate::error::{FlowError, Result};
use crate::flow::{CancellationToken, Flow, FlowId, FlowStats};
use crate::tap::Storage;

#[derive(Debug)]
pub enum JobStatus {
    Succeeded(FlowStats),
    Failed(FlowError),
}

/// A submitted flow; resolves exactly once.
#[derive(Debug)]
pub struct JobHandle {
    flow: FlowId,
    receiver: Receiver<JobStatus>,
}

impl JobHandle {
    pub fn new(flow: FlowId, receiver: Receiver<JobStatus>) -> Self {
        Self { flow, receiver }
    }

    pub fn flow(&self) -> &FlowId {
        &self.flow
    }

    /// Block until the job reports. A job that vanished without reporting
    /// counts as failed.
    pub fn wait_for_completion(self) -> JobStatus {
        let flow = self.flow;
        self.receiver
            .recv()
            .unwrap_or_else(|_| JobStatus::Failed(lost(&flow)))
    }

    pub(crate) fn receiver(&self) -> &Receiver<JobStatus> {
        &self.receiver
    }
}

pub(crate) fn lost(flow: &FlowId) -> FlowError {
    FlowError::WorkerPanic {
        flow: flow.to_string(),
        message: "job ended without reporting a status".to_string(),
    }
}

pub trait Executor: Send + Sync {
    fn submit(&self, flow: Arc<Flow>) -> Result<JobHandle>;
}

/// Runs every submitted flow on its own named thread.
pub struct LocalExecutor {
    storage: Arc<dyn Storage>,
    cancel: CancellationToken,
}

impl LocalExecutor {
    pub fn new(storage: Arc<dyn Storage>, cancel: CancellationToken) -> Self {
        Self { storage, cancel }
    }
}

impl Executor for LocalExecutor {
    fn submit(&self, flow: Arc<Flow>) -> Result<JobHandle> {
        let (tx, rx) = bounded(1);
        let id = flow.id().clone();
        let storage = Arc::clone(&self.storage);
        let cancel = self.cancel.clone();
        thread::Builder::new()
            .name(format!("flow-{}", flow.name()))
            .spawn(move || {
                let status = match flow.complete(storage.as_ref(), &cancel) {
                    Ok(stats) => JobStatus::Succeeded(stats),
                    Err(err) => JobStatus::Failed(err),
                };
                // The scheduler may have stopped listening.
                let _ = tx.send(status);
            })
            .map_err(|e| FlowError::io(&id, e))?;
        Ok(JobHandle::new(id, rx))
    }
}
