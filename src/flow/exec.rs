//! Local execution of a compiled plan.
//!
//! Map work runs on one scoped thread per input partition. Every group is a
//! barrier: partition buffers are merged, keys sorted, and key ranges reduced
//! on scoped threads. Output order only depends on the input, never on thread
//! timing: partition order first, then key order.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::debug;

use super::plan::{Pick, Plan, StepOp};
use super::{CancellationToken, FlowStats};
use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use crate::operation::{Accumulator, Scratch};
use crate::tap::{Storage, Tap};
use crate::tuple::{Record, Value};

type Buffer = BTreeMap<Vec<Value>, Vec<Shuffled>>;

/// What crosses a group barrier for one key.
enum Shuffled {
    Record(Record),
    /// Pre-aggregated by the combiner.
    Partial(Accumulator),
}

/// Everything one worker produced.
struct Partition {
    sinks: Vec<Vec<Record>>,
    groups: Vec<Buffer>,
}

impl Partition {
    fn empty(plan: &Plan) -> Self {
        Self {
            sinks: plan.sinks.iter().map(|_| Vec::new()).collect(),
            groups: plan.groups.iter().map(|_| Buffer::new()).collect(),
        }
    }

    fn absorb(&mut self, other: Partition) {
        for (mine, theirs) in self.sinks.iter_mut().zip(other.sinks) {
            mine.extend(theirs);
        }
        for (mine, theirs) in self.groups.iter_mut().zip(other.groups) {
            for (key, items) in theirs {
                mine.entry(key).or_default().extend(items);
            }
        }
    }
}

struct Worker<'p> {
    plan: &'p Plan,
    combiner: bool,
    scratch: Vec<Scratch>,
    out: Partition,
}

impl<'p> Worker<'p> {
    fn new(plan: &'p Plan, combiner: bool) -> Self {
        let scratch = plan
            .steps
            .iter()
            .map(|step| match &step.op {
                StepOp::Each { function, .. } => function.scratch(),
                _ => Scratch::None,
            })
            .collect();
        Self {
            plan,
            combiner,
            scratch,
            out: Partition::empty(plan),
        }
    }

    /// Hand a record produced by `step` to its sinks and children.
    fn emit(&mut self, step: usize, record: Record) -> Result<()> {
        let plan = self.plan;
        let node = &plan.steps[step];
        for &sink in &node.sinks {
            self.out.sinks[sink].push(record.clone());
        }
        for &child in &node.children {
            self.process(child, record.clone())?;
        }
        Ok(())
    }

    fn process(&mut self, step: usize, record: Record) -> Result<()> {
        let plan = self.plan;
        let node = &plan.steps[step];
        match &node.op {
            StepOp::Head | StepOp::Branch => self.emit(step, record),
            StepOp::Each {
                argument,
                argument_fields,
                function,
                output,
            } => {
                let args = Record::from_parts(argument_fields.clone(), project(&record, argument));
                let mut results = Vec::new();
                function.operate(&mut self.scratch[step], &args, &mut results)?;
                for result in results {
                    let values = output
                        .iter()
                        .map(|pick| match *pick {
                            Pick::Incoming(i) => record.values()[i].clone(),
                            Pick::Result(j) => result[j].clone(),
                        })
                        .collect();
                    self.emit(step, Record::from_parts(node.outgoing.clone(), values))?;
                }
                Ok(())
            }
            StepOp::Filter {
                argument,
                argument_fields,
                filter,
            } => {
                let args = Record::from_parts(argument_fields.clone(), project(&record, argument));
                if filter.keep(&args) {
                    self.emit(step, record)?;
                }
                Ok(())
            }
            StepOp::Group {
                key,
                slot,
                aggregator,
                ..
            } => {
                let items = self.out.groups[*slot]
                    .entry(project(&record, key))
                    .or_default();
                if self.combiner {
                    match items.first_mut() {
                        Some(Shuffled::Partial(acc)) => acc.fold(&record),
                        _ => {
                            let mut acc = aggregator.start();
                            acc.fold(&record);
                            items.push(Shuffled::Partial(acc));
                        }
                    }
                } else {
                    items.push(Shuffled::Record(record));
                }
                Ok(())
            }
            StepOp::Aggregate => Err(FlowError::Assembly(format!(
                "aggregate {:?} reached without its group",
                node.name
            ))),
        }
    }

    /// Aggregate every record seen for `key` at `group` and emit the summary.
    fn reduce(&mut self, group: usize, key: Vec<Value>, items: Vec<Shuffled>) -> Result<()> {
        let plan = self.plan;
        let StepOp::Group {
            aggregate,
            aggregator,
            ..
        } = &plan.steps[group].op
        else {
            return Ok(());
        };
        let mut acc = aggregator.start();
        for item in &items {
            match item {
                Shuffled::Record(record) => acc.fold(record),
                Shuffled::Partial(partial) => acc.merge(partial),
            }
        }
        let mut values = key;
        values.extend(acc.finish());
        let record = Record::from_parts(plan.steps[*aggregate].outgoing.clone(), values);
        self.emit(*aggregate, record)
    }
}

fn project(record: &Record, positions: &[usize]) -> Vec<Value> {
    positions
        .iter()
        .map(|&p| record.values()[p].clone())
        .collect()
}

/// Run `plan` end to end and write its sinks.
///
/// Sinks are written only once every partition and every group succeeded, so
/// a failed flow leaves nothing behind from this run.
pub(crate) fn run(
    flow: &str,
    plan: &Plan,
    source: &Tap,
    config: &EngineConfig,
    storage: &dyn Storage,
    cancel: &CancellationToken,
) -> Result<FlowStats> {
    let lines = source.read_lines(storage)?;
    let lines_read = lines.len();
    let chunks = split(lines, config.map_tasks);
    debug!(
        "flow {}: mapping {} lines in {} partitions",
        flow,
        lines_read,
        chunks.len()
    );

    let partitions = fan_out(flow, chunks, |chunk, abort| {
        let mut worker = Worker::new(plan, config.combiner);
        for (offset, line) in chunk {
            if abort.load(Ordering::Relaxed) {
                break;
            }
            if cancel.is_cancelled() {
                return Err(FlowError::Cancelled(flow.to_string()));
            }
            let record = source.scheme.decode(offset, &line)?;
            for &head in &plan.heads {
                worker.emit(head, record.clone())?;
            }
        }
        Ok(worker.out)
    })?;

    let mut merged = Partition::empty(plan);
    for partition in partitions {
        merged.absorb(partition);
    }

    for (slot, &group) in plan.groups.iter().enumerate() {
        let keys: Vec<(Vec<Value>, Vec<Shuffled>)> =
            std::mem::take(&mut merged.groups[slot]).into_iter().collect();
        let ranges = split(keys, config.reduce_tasks);
        debug!(
            "flow {}: reducing group {:?} in {} ranges",
            flow,
            plan.steps[group].name,
            ranges.len()
        );
        let reduced = fan_out(flow, ranges, |range, abort| {
            let mut worker = Worker::new(plan, config.combiner);
            for (key, items) in range {
                if abort.load(Ordering::Relaxed) {
                    break;
                }
                if cancel.is_cancelled() {
                    return Err(FlowError::Cancelled(flow.to_string()));
                }
                worker.reduce(group, key, items)?;
            }
            Ok(worker.out)
        })?;
        for partition in reduced {
            merged.absorb(partition);
        }
    }

    let mut stats = FlowStats {
        lines_read,
        records_written: BTreeMap::new(),
    };
    for (binding, records) in plan.sinks.iter().zip(merged.sinks) {
        let incoming = &plan.steps[binding.step].outgoing;
        let written = binding.tap.write_records(storage, incoming, &records)?;
        debug!(
            "flow {}: wrote {} records to {}",
            flow, written, binding.tap.location
        );
        stats.records_written.insert(binding.tail.clone(), written);
    }
    Ok(stats)
}

/// Split `items` into at most `tasks` contiguous, non-empty chunks.
fn split<T>(items: Vec<T>, tasks: usize) -> Vec<Vec<T>> {
    let size = items.len().div_ceil(tasks.max(1)).max(1);
    let mut iter = items.into_iter();
    let mut chunks = Vec::new();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(size).collect();
        if chunk.is_empty() {
            return chunks;
        }
        chunks.push(chunk);
    }
}

/// Run `work` on every task in its own scoped thread.
///
/// The first failing task raises the shared abort flag so the others stop
/// early. Results come back in task order and the first error in that order
/// is returned.
fn fan_out<T, F>(flow: &str, tasks: Vec<T>, work: F) -> Result<Vec<Partition>>
where
    T: Send,
    F: Fn(T, &AtomicBool) -> Result<Partition> + Sync,
{
    let abort = AtomicBool::new(false);
    let joined: Vec<thread::Result<Result<Partition>>> = thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let work = &work;
                let abort = &abort;
                scope.spawn(move || {
                    let result = work(task, abort);
                    if result.is_err() {
                        abort.store(true, Ordering::Relaxed);
                    }
                    result
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut partitions = Vec::with_capacity(joined.len());
    for result in joined {
        match result {
            Ok(Ok(partition)) => partitions.push(partition),
            Ok(Err(err)) => return Err(err),
            Err(panic) => {
                return Err(FlowError::WorkerPanic {
                    flow: flow.to_string(),
                    message: panic_message(panic.as_ref()),
                });
            }
        }
    }
    Ok(partitions)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
