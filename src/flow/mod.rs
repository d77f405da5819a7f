//! Flows: an assembly bound to one source and its sinks, compiled and ready
//! to run.

mod exec;
mod plan;

pub use plan::PlanKind;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use crate::pipe::Assembly;
use crate::tap::{Location, SinkMode, Storage, Tap};
use plan::Plan;

/// Identity of a flow, derived from its sink locations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(String);

impl FlowId {
    fn from_sinks<'a>(locations: impl IntoIterator<Item = &'a Location>) -> Self {
        let mut names: Vec<&str> = locations.into_iter().map(Location::as_str).collect();
        names.sort_unstable();
        FlowId(names.join(","))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FlowId {
    fn from(id: &str) -> Self {
        FlowId(id.to_string())
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a flow. `FlowConnector::connect` validates every schema while
/// compiling, so there is no separate validated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Compiled,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub lines_read: usize,
    /// Records written, keyed by tail name.
    pub records_written: BTreeMap<String, usize>,
}

/// Cooperative stop signal shared by the scheduler, executors and workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Flow {
    id: FlowId,
    name: String,
    source: Tap,
    plan: Plan,
    config: EngineConfig,
    state: Mutex<FlowState>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source.location)
            .field("state", &self.state())
            .finish()
    }
}

impl Flow {
    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Tap {
        &self.source
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Tap> {
        self.plan.sinks.iter().map(|b| &b.tap)
    }

    /// The sink bound to a tail.
    pub fn sink(&self, tail: &str) -> Option<&Tap> {
        self.plan
            .sinks
            .iter()
            .find(|b| b.tail == tail)
            .map(|b| &b.tap)
    }

    pub fn plan_kind(&self) -> PlanKind {
        self.plan.kind()
    }

    pub fn state(&self) -> FlowState {
        *self.state.lock()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clear sinks left by an earlier run according to each tap's mode.
    pub fn prepare_sinks(&self, storage: &dyn Storage) -> Result<()> {
        for tap in self.sinks() {
            if !storage.exists(&tap.location)? {
                continue;
            }
            match tap.mode {
                SinkMode::Replace => {
                    info!("flow {}: deleting existing sink {}", self.name, tap.location);
                    storage.delete(&tap.location, true)?;
                }
                SinkMode::Keep => {
                    return Err(FlowError::SinkExists {
                        location: tap.location.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run the flow to completion on the calling thread.
    pub fn complete(&self, storage: &dyn Storage, cancel: &CancellationToken) -> Result<FlowStats> {
        *self.state.lock() = FlowState::Running;
        info!(
            "flow {}: starting, source {}, sinks [{}]",
            self.name, self.source.location, self.id
        );
        let result = exec::run(&self.name, &self.plan, &self.source, &self.config, storage, cancel);
        match &result {
            Ok(stats) => {
                *self.state.lock() = FlowState::Succeeded;
                info!(
                    "flow {}: completed, read {} lines, wrote {:?}",
                    self.name, stats.lines_read, stats.records_written
                );
            }
            Err(err) => {
                *self.state.lock() = FlowState::Failed;
                warn!("flow {}: failed: {}", self.name, err);
            }
        }
        result
    }
}

/// Compiles assemblies into flows with one explicit engine configuration.
#[derive(Debug, Clone, Default)]
pub struct FlowConnector {
    config: EngineConfig,
}

impl FlowConnector {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bind a single-tail assembly to one sink.
    pub fn connect(
        &self,
        name: impl Into<String>,
        source: Tap,
        sink: Tap,
        assembly: impl Into<Assembly>,
    ) -> Result<Flow> {
        let assembly = assembly.into();
        let tail = match assembly.tails() {
            [tail] => tail.name().to_string(),
            tails => {
                return Err(FlowError::Assembly(format!(
                    "one sink given for {} tails {:?}",
                    tails.len(),
                    assembly.tail_names()
                )));
            }
        };
        self.connect_many(name, source, vec![(tail, sink)], assembly)
    }

    /// Bind every named tail of `assembly` to its sink.
    pub fn connect_many(
        &self,
        name: impl Into<String>,
        source: Tap,
        sinks: Vec<(String, Tap)>,
        assembly: impl Into<Assembly>,
    ) -> Result<Flow> {
        let name = name.into();
        let plan = Plan::compile(&source, sinks, &assembly.into())?;
        let id = FlowId::from_sinks(plan.sinks.iter().map(|b| &b.tap.location));
        log::debug!("flow {}: compiled as {:?}", name, plan.kind());
        Ok(Flow {
            id,
            name,
            source,
            plan,
            config: self.config.clone(),
            state: Mutex::new(FlowState::Compiled),
        })
    }
}

/// Pair tail names with sinks, in order.
pub fn taps_map<S: Into<String>>(
    names: impl IntoIterator<Item = S>,
    taps: impl IntoIterator<Item = Tap>,
) -> Result<Vec<(String, Tap)>> {
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    let taps: Vec<Tap> = taps.into_iter().collect();
    if names.len() != taps.len() {
        return Err(FlowError::Assembly(format!(
            "{} tail names for {} taps",
            names.len(),
            taps.len()
        )));
    }
    Ok(names.into_iter().zip(taps).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Aggregator, Function, Output, RegexParser, Selector};
    use crate::pipe::Pipe;
    use crate::tap::{MemoryStorage, Scheme};
    use crate::tuple::FieldSet;
    use pretty_assertions::assert_eq;

    fn fields(names: &[&str]) -> FieldSet {
        FieldSet::new(names.iter().copied()).unwrap()
    }

    fn counting() -> Pipe {
        let parser = RegexParser::new(fields(&["user", "action"]), r"^(\w+) (\w+)$").unwrap();
        Pipe::new("actions")
            .each(fields(&["line"]), Function::Parse(parser), Output::Results)
            .group_by(fields(&["action"]))
            .every(Aggregator::count())
    }

    fn storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.insert(
            "in",
            ["ann login", "bob login", "ann logout", "cid login", "bob logout"],
        );
        storage
    }

    #[test]
    fn counts_are_independent_of_parallelism_and_combiner() {
        let storage = storage();
        let mut outputs = Vec::new();
        for (map_tasks, reduce_tasks, combiner) in [(1, 1, true), (3, 2, true), (5, 4, false)] {
            let config = EngineConfig {
                parallelism: 1,
                map_tasks,
                reduce_tasks,
                combiner,
            };
            let flow = FlowConnector::new(config)
                .connect(
                    "count",
                    Tap::new(Scheme::text_line(), "in"),
                    Tap::new(Scheme::text_line(), "out"),
                    counting(),
                )
                .unwrap();
            assert_eq!(flow.plan_kind(), PlanKind::MapReduce { groups: 1 });
            flow.prepare_sinks(&storage).unwrap();
            let stats = flow.complete(&storage, &CancellationToken::new()).unwrap();
            assert_eq!(stats.lines_read, 5);
            assert_eq!(flow.state(), FlowState::Succeeded);
            outputs.push(storage.lines("out").unwrap());
        }
        assert_eq!(outputs[0], vec!["login\t3", "logout\t2"]);
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0], outputs[2]);
    }

    #[test]
    fn chained_groups_reduce_in_order() {
        let storage = storage();
        // Users per action count: ann 2, bob 2, cid 1.
        let histogram = Pipe::new("histogram")
            .each(
                fields(&["line"]),
                Function::Parse(
                    RegexParser::new(fields(&["user", "action"]), r"^(\w+) (\w+)$").unwrap(),
                ),
                Output::Results,
            )
            .group_by(fields(&["user"]))
            .every(Aggregator::count())
            .group_by(fields(&["count"]))
            .every(Aggregator::count_as(fields(&["users"])).unwrap());

        let mut outputs = Vec::new();
        for (map_tasks, reduce_tasks, combiner) in [(1, 1, true), (3, 2, false), (2, 3, true)] {
            let config = EngineConfig {
                parallelism: 1,
                map_tasks,
                reduce_tasks,
                combiner,
            };
            let flow = FlowConnector::new(config)
                .connect(
                    "histogram",
                    Tap::new(Scheme::text_line(), "in"),
                    Tap::new(Scheme::text_line(), "out"),
                    histogram.clone(),
                )
                .unwrap();
            assert_eq!(flow.plan_kind(), PlanKind::MapReduce { groups: 2 });
            flow.prepare_sinks(&storage).unwrap();
            flow.complete(&storage, &CancellationToken::new()).unwrap();
            outputs.push(storage.lines("out").unwrap());
        }
        assert_eq!(outputs[0], vec!["1\t1", "2\t2"]);
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0], outputs[2]);
    }

    #[test]
    fn bad_line_fails_without_output() {
        let storage = storage();
        storage.insert("in", ["ann login", "not-a-match", "bob login"]);
        let flow = FlowConnector::new(EngineConfig::serial())
            .connect(
                "count",
                Tap::new(Scheme::text_line(), "in"),
                Tap::new(Scheme::text_line(), "out"),
                counting(),
            )
            .unwrap();
        let err = flow.complete(&storage, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, FlowError::Parse { .. }), "{}", err);
        assert_eq!(flow.state(), FlowState::Failed);
        assert!(!storage.exists(&"out".into()).unwrap());
    }

    #[test]
    fn keep_mode_refuses_existing_sink() {
        let storage = storage();
        storage.insert("out", ["stale"]);
        let identity = Pipe::new("copy").each(Selector::All, Function::Identity, Output::Results);
        let keep = FlowConnector::default()
            .connect(
                "copy",
                Tap::new(Scheme::text_line(), "in"),
                Tap::new(Scheme::text_line(), "out").with_mode(SinkMode::Keep),
                identity.clone(),
            )
            .unwrap();
        assert_eq!(keep.plan_kind(), PlanKind::MapOnly);
        assert!(matches!(
            keep.prepare_sinks(&storage),
            Err(FlowError::SinkExists { .. })
        ));

        let replace = FlowConnector::default()
            .connect(
                "copy",
                Tap::new(Scheme::text_line_with(fields(&["line"])).unwrap(), "in"),
                Tap::new(Scheme::text_line(), "out"),
                identity,
            )
            .unwrap();
        replace.prepare_sinks(&storage).unwrap();
        assert!(!storage.exists(&"out".into()).unwrap());
        replace.complete(&storage, &CancellationToken::new()).unwrap();
        assert_eq!(storage.lines("out").unwrap()[0], "ann login");
    }

    #[test]
    fn cancelled_flow_stops() {
        let storage = storage();
        let flow = FlowConnector::default()
            .connect(
                "count",
                Tap::new(Scheme::text_line(), "in"),
                Tap::new(Scheme::text_line(), "out"),
                counting(),
            )
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            flow.complete(&storage, &cancel),
            Err(FlowError::Cancelled(_))
        ));
    }

    #[test]
    fn ids_come_from_sorted_sinks() {
        let parsed = Pipe::new("p").each(Selector::All, Function::Identity, Output::Results);
        let sinks = taps_map(
            ["b", "a"],
            [
                Tap::new(Scheme::text_line(), "out/z"),
                Tap::new(Scheme::text_line(), "out/y/"),
            ],
        )
        .unwrap();
        let flow = FlowConnector::default()
            .connect_many(
                "two",
                Tap::new(Scheme::text_line(), "in"),
                sinks,
                vec![Pipe::branch("a", &parsed), Pipe::branch("b", &parsed)],
            )
            .unwrap();
        assert_eq!(flow.id().as_str(), "out/y,out/z");
        assert_eq!(flow.sink("b").map(|t| t.location.as_str()), Some("out/z"));
        assert!(taps_map(["a"], Vec::new()).is_err());
    }
}
