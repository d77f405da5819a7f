//! Flow compiler: binds an assembly to taps, resolves every pipe's schema and
//! produces an executable step graph.
//!
//! Steps are stored in topological order (parents before children). A plan
//! with no `Group` step runs as a single streaming pass; every `Group` adds a
//! partition-and-sort barrier in front of its aggregate.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{FlowError, Result};
use crate::operation::{Aggregator, Filter, Function, Output};
use crate::pipe::{Assembly, Pipe, PipeKind};
use crate::tap::Tap;
use crate::tuple::FieldSet;

#[derive(Debug)]
pub(crate) struct Plan {
    pub steps: Vec<Step>,
    pub heads: Vec<usize>,
    /// Group steps in execution order.
    pub groups: Vec<usize>,
    pub sinks: Vec<SinkBinding>,
}

#[derive(Debug)]
pub(crate) struct Step {
    pub name: String,
    pub outgoing: FieldSet,
    pub children: Vec<usize>,
    /// Indexes into `Plan::sinks` fed by this step.
    pub sinks: Vec<usize>,
    pub op: StepOp,
}

#[derive(Debug)]
pub(crate) enum StepOp {
    Head,
    Branch,
    Each {
        argument: Vec<usize>,
        argument_fields: FieldSet,
        function: Function,
        output: Vec<Pick>,
    },
    Filter {
        argument: Vec<usize>,
        argument_fields: FieldSet,
        filter: Filter,
    },
    Group {
        key: Vec<usize>,
        /// Position of this group in `Plan::groups`.
        slot: usize,
        aggregate: usize,
        aggregator: Aggregator,
    },
    Aggregate,
}

/// Where an outgoing value of a map step comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pick {
    Incoming(usize),
    Result(usize),
}

#[derive(Debug)]
pub(crate) struct SinkBinding {
    pub tail: String,
    pub tap: Tap,
    pub step: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    /// Source to sinks in one pass, no synchronisation point.
    MapOnly,
    /// One partition/sort barrier per group.
    MapReduce { groups: usize },
}

impl Plan {
    pub fn kind(&self) -> PlanKind {
        match self.groups.len() {
            0 => PlanKind::MapOnly,
            groups => PlanKind::MapReduce { groups },
        }
    }

    /// Validate the assembly against the source schema and bind its tails.
    ///
    /// Phases:
    /// 1) Collect the pipe DAG reachable from the tails, in topological order.
    /// 2) Resolve schemas step by step, starting from the source fields.
    /// 3) Check group/aggregate pairing.
    /// 4) Bind every tail to exactly one sink and every sink to one tail.
    pub fn compile(source: &Tap, sinks: Vec<(String, Tap)>, assembly: &Assembly) -> Result<Plan> {
        if assembly.tails().is_empty() {
            return Err(FlowError::Assembly("assembly has no tails".to_string()));
        }
        let mut tail_names = BTreeSet::new();
        for tail in assembly.tails() {
            if !tail_names.insert(tail.name()) {
                return Err(FlowError::Assembly(format!(
                    "duplicate tail name {:?}",
                    tail.name()
                )));
            }
        }

        // Phase 1: post-order walk over parents gives parents-first order.
        let mut order: Vec<Pipe> = Vec::new();
        let mut index: HashMap<usize, usize> = HashMap::new();
        for tail in assembly.tails() {
            collect(tail, &mut order, &mut index)?;
        }

        // Phase 2: resolve schemas.
        let mut steps: Vec<Step> = Vec::with_capacity(order.len());
        let mut heads = Vec::new();
        let mut groups = Vec::new();
        for (idx, pipe) in order.iter().enumerate() {
            let node = pipe.inner();
            let parents: Vec<usize> = node.parents.iter().map(|p| index[&p.id()]).collect();
            let incoming = |n: usize| steps[parents[n]].outgoing.clone();

            let (outgoing, op) = match &node.kind {
                PipeKind::Head => {
                    heads.push(idx);
                    (source.scheme.source_fields().clone(), StepOp::Head)
                }
                PipeKind::Branch => (incoming(0), StepOp::Branch),
                PipeKind::Each {
                    argument,
                    function,
                    output,
                } => {
                    let incoming = incoming(0);
                    let argument_fields = argument.resolve(&incoming).map_err(|e| at(pipe, e))?;
                    function
                        .check_arguments(&argument_fields)
                        .map_err(|e| at(pipe, e))?;
                    let declared = function.declared(&argument_fields);
                    let (outgoing, picks) =
                        resolve_output(&incoming, &argument_fields, &declared, output)
                            .map_err(|e| at(pipe, e))?;
                    let op = StepOp::Each {
                        argument: incoming.positions_of(&argument_fields)?,
                        argument_fields,
                        function: function.clone(),
                        output: picks,
                    };
                    (outgoing, op)
                }
                PipeKind::Filter { argument, filter } => {
                    let incoming = incoming(0);
                    let argument_fields = argument.resolve(&incoming).map_err(|e| at(pipe, e))?;
                    let op = StepOp::Filter {
                        argument: incoming.positions_of(&argument_fields)?,
                        argument_fields,
                        filter: filter.clone(),
                    };
                    (incoming, op)
                }
                PipeKind::GroupBy { key } => {
                    if parents.is_empty() {
                        return Err(FlowError::Assembly(format!(
                            "group {:?} has no incoming pipes",
                            pipe.name()
                        )));
                    }
                    let merged = incoming(0);
                    for n in 1..parents.len() {
                        let other = incoming(n);
                        if other != merged {
                            return Err(FlowError::Assembly(format!(
                                "group {:?} merges incompatible schemas {} and {}",
                                pipe.name(),
                                merged,
                                other
                            )));
                        }
                    }
                    let key_positions = merged.positions_of(key).map_err(|e| at(pipe, e))?;
                    groups.push(idx);
                    let op = StepOp::Group {
                        key: key_positions,
                        slot: groups.len() - 1,
                        // Filled in during phase 3.
                        aggregate: usize::MAX,
                        aggregator: Aggregator::count(),
                    };
                    (merged, op)
                }
                PipeKind::Every { aggregator } => {
                    let parent = &order[parents[0]];
                    let key = match &parent.inner().kind {
                        PipeKind::GroupBy { key } => key,
                        _ => {
                            return Err(FlowError::Assembly(format!(
                                "aggregate {:?} must follow a group, not {:?}",
                                pipe.name(),
                                parent
                            )));
                        }
                    };
                    let outgoing = key.append(aggregator.declared()).map_err(|e| at(pipe, e))?;
                    if let StepOp::Group {
                        aggregate,
                        aggregator: slot,
                        ..
                    } = &mut steps[parents[0]].op
                    {
                        if *aggregate != usize::MAX {
                            return Err(FlowError::Assembly(format!(
                                "group {:?} feeds more than one aggregate",
                                parent.name()
                            )));
                        }
                        *aggregate = idx;
                        *slot = aggregator.clone();
                    }
                    (outgoing, StepOp::Aggregate)
                }
            };

            for &p in &parents {
                steps[p].children.push(idx);
            }
            steps.push(Step {
                name: pipe.name().to_string(),
                outgoing,
                children: Vec::new(),
                sinks: Vec::new(),
                op,
            });
        }

        // Phase 3: a group only ever feeds its aggregate.
        for &g in &groups {
            let step = &steps[g];
            if let StepOp::Group { aggregate, .. } = step.op {
                if aggregate == usize::MAX || step.children != [aggregate] {
                    return Err(FlowError::Assembly(format!(
                        "group {:?} must be followed by exactly one aggregate",
                        step.name
                    )));
                }
            }
        }

        // Phase 4: bind tails and sinks one to one.
        let mut bound: BTreeMap<String, usize> = BTreeMap::new();
        let mut locations = BTreeSet::new();
        let mut bindings = Vec::with_capacity(sinks.len());
        for (tail_name, tap) in sinks {
            let tail = assembly.tail(&tail_name).ok_or_else(|| {
                FlowError::Assembly(format!(
                    "sink {} is bound to {:?}, which is not a tail of this assembly (tails: {:?})",
                    tap.location,
                    tail_name,
                    assembly.tail_names()
                ))
            })?;
            if bound.contains_key(&tail_name) {
                return Err(FlowError::Assembly(format!(
                    "tail {:?} is bound to more than one sink",
                    tail_name
                )));
            }
            if !locations.insert(tap.location.clone()) {
                return Err(FlowError::Assembly(format!(
                    "sink {} is bound to more than one tail",
                    tap.location
                )));
            }
            if tap.location == source.location {
                return Err(FlowError::Assembly(format!(
                    "sink {} is also the flow's source",
                    tap.location
                )));
            }
            let step = index[&tail.id()];
            if let StepOp::Group { .. } = steps[step].op {
                return Err(FlowError::Assembly(format!(
                    "tail {:?} ends in a group without an aggregate",
                    tail_name
                )));
            }
            if let Some(fields) = tap.scheme.sink_fields() {
                steps[step].outgoing.select(fields).map_err(|e| {
                    FlowError::SchemaMismatch(format!("sink {}: {}", tap.location, e))
                })?;
            }
            let slot = bindings.len();
            steps[step].sinks.push(slot);
            bound.insert(tail_name.clone(), slot);
            bindings.push(SinkBinding {
                tail: tail_name,
                tap,
                step,
            });
        }
        for name in assembly.tail_names() {
            if !bound.contains_key(name) {
                return Err(FlowError::Assembly(format!("tail {:?} has no sink", name)));
            }
        }

        Ok(Plan {
            steps,
            heads,
            groups,
            sinks: bindings,
        })
    }
}

fn collect(pipe: &Pipe, order: &mut Vec<Pipe>, index: &mut HashMap<usize, usize>) -> Result<()> {
    if index.contains_key(&pipe.id()) {
        return Ok(());
    }
    let mut seen = BTreeSet::new();
    for parent in &pipe.inner().parents {
        if !seen.insert(parent.id()) {
            return Err(FlowError::Assembly(format!(
                "{:?} lists parent {:?} twice",
                pipe, parent
            )));
        }
        collect(parent, order, index)?;
    }
    index.insert(pipe.id(), order.len());
    order.push(pipe.clone());
    Ok(())
}

fn at(pipe: &Pipe, err: FlowError) -> FlowError {
    match err {
        FlowError::SchemaMismatch(msg) => FlowError::SchemaMismatch(format!("{:?}: {}", pipe, msg)),
        other => other,
    }
}

fn resolve_output(
    incoming: &FieldSet,
    arguments: &FieldSet,
    declared: &FieldSet,
    output: &Output,
) -> Result<(FieldSet, Vec<Pick>)> {
    match output {
        Output::Results => Ok((
            declared.clone(),
            (0..declared.len()).map(Pick::Result).collect(),
        )),
        Output::All => {
            let fields = incoming.append(declared)?;
            let picks = (0..incoming.len())
                .map(Pick::Incoming)
                .chain((0..declared.len()).map(Pick::Result))
                .collect();
            Ok((fields, picks))
        }
        Output::Replace => {
            if arguments.len() != declared.len() {
                return Err(FlowError::SchemaMismatch(format!(
                    "cannot replace {} with {}",
                    arguments, declared
                )));
            }
            let replaced = incoming.positions_of(arguments)?;
            let mut names: Vec<&str> = incoming.iter().collect();
            let mut picks: Vec<Pick> = (0..incoming.len()).map(Pick::Incoming).collect();
            for (result, &pos) in replaced.iter().enumerate() {
                names[pos] = declared.names()[result].as_str();
                picks[pos] = Pick::Result(result);
            }
            Ok((FieldSet::new(names)?, picks))
        }
        Output::Fields(selected) => {
            let picks = selected
                .iter()
                .map(|name| {
                    declared
                        .position(name)
                        .map(Pick::Result)
                        .or_else(|| incoming.position(name).map(Pick::Incoming))
                        .ok_or_else(|| {
                            FlowError::SchemaMismatch(format!(
                                "output field {:?} is neither in {} nor in {}",
                                name, incoming, declared
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((selected.clone(), picks))
        }
    }
}
