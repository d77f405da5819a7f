//! Pipe assemblies: the logical operator DAG, before it is bound to taps.
//!
//! Pipes are immutable, cheaply clonable handles. Fan-out is expressed by
//! using the same pipe as the parent of several others; fan-in only happens at
//! a `GroupBy` over several parents. Nothing is validated here: schemas are
//! only known once a source is bound, so the flow compiler checks them.

use std::fmt;
use std::sync::Arc;

use crate::operation::{Aggregator, Filter, Function, Output, Selector};
use crate::tuple::FieldSet;

#[derive(Clone)]
pub struct Pipe(Arc<Node>);

pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) kind: PipeKind,
    pub(crate) parents: Vec<Pipe>,
}

pub(crate) enum PipeKind {
    /// Start of a branch; bound to the flow's source.
    Head,
    /// Renames the branch; records pass through untouched.
    Branch,
    Each {
        argument: Selector,
        function: Function,
        output: Output,
    },
    Filter {
        argument: Selector,
        filter: Filter,
    },
    GroupBy {
        key: FieldSet,
    },
    Every {
        aggregator: Aggregator,
    },
}

impl Pipe {
    /// A named head pipe.
    pub fn new(name: impl Into<String>) -> Self {
        Self::node(name.into(), PipeKind::Head, vec![])
    }

    /// Continue `parent` under a new name, e.g. to split a branch off.
    pub fn branch(name: impl Into<String>, parent: &Pipe) -> Self {
        Self::node(name.into(), PipeKind::Branch, vec![parent.clone()])
    }

    /// Group the records of several pipes together; all must share a schema.
    pub fn merge_group_by(name: impl Into<String>, parents: &[&Pipe], key: FieldSet) -> Self {
        Self::node(
            name.into(),
            PipeKind::GroupBy { key },
            parents.iter().map(|p| (*p).clone()).collect(),
        )
    }

    fn node(name: String, kind: PipeKind, parents: Vec<Pipe>) -> Self {
        Pipe(Arc::new(Node {
            name,
            kind,
            parents,
        }))
    }

    fn child(&self, kind: PipeKind) -> Self {
        Self::node(self.name().to_string(), kind, vec![self.clone()])
    }

    pub fn each(
        &self,
        argument: impl Into<Selector>,
        function: Function,
        output: Output,
    ) -> Self {
        self.child(PipeKind::Each {
            argument: argument.into(),
            function,
            output,
        })
    }

    pub fn filter(&self, argument: impl Into<Selector>, filter: Filter) -> Self {
        self.child(PipeKind::Filter {
            argument: argument.into(),
            filter,
        })
    }

    pub fn group_by(&self, key: FieldSet) -> Self {
        self.child(PipeKind::GroupBy { key })
    }

    /// Group under a new branch name.
    pub fn group_by_named(&self, name: impl Into<String>, key: FieldSet) -> Self {
        Self::node(name.into(), PipeKind::GroupBy { key }, vec![self.clone()])
    }

    /// Aggregate each group; output is the group key followed by the
    /// aggregator's declared fields.
    pub fn every(&self, aggregator: Aggregator) -> Self {
        self.child(PipeKind::Every { aggregator })
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub(crate) fn inner(&self) -> &Node {
        &self.0
    }

    /// Identity of the underlying node, stable across clones.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match &self.0.kind {
            PipeKind::Head => "Head",
            PipeKind::Branch => "Branch",
            PipeKind::Each { .. } => "Each",
            PipeKind::Filter { .. } => "Filter",
            PipeKind::GroupBy { .. } => "GroupBy",
            PipeKind::Every { .. } => "Every",
        }
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind_name(), self.name())
    }
}

/// A reusable unit of pipes exposing one or more named tails.
#[derive(Debug, Clone)]
pub struct Assembly {
    tails: Vec<Pipe>,
}

impl Assembly {
    pub fn new(tails: Vec<Pipe>) -> Self {
        Self { tails }
    }

    pub fn tails(&self) -> &[Pipe] {
        &self.tails
    }

    pub fn tail_names(&self) -> Vec<&str> {
        self.tails.iter().map(Pipe::name).collect()
    }

    pub fn tail(&self, name: &str) -> Option<&Pipe> {
        self.tails.iter().find(|p| p.name() == name)
    }
}

impl From<Pipe> for Assembly {
    fn from(pipe: Pipe) -> Self {
        Assembly::new(vec![pipe])
    }
}

impl From<Vec<Pipe>> for Assembly {
    fn from(tails: Vec<Pipe>) -> Self {
        Assembly::new(tails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Function;
    use pretty_assertions::assert_eq;

    #[test]
    fn names_follow_branches() {
        let head = Pipe::new("import");
        let parsed = head.each(Selector::All, Function::Identity, Output::Results);
        assert_eq!(parsed.name(), "import");

        let counted = Pipe::branch("tsCount", &parsed)
            .group_by(FieldSet::new(["line"]).unwrap())
            .every(Aggregator::count());
        assert_eq!(counted.name(), "tsCount");

        let words = parsed.group_by_named("word pipe", FieldSet::new(["line"]).unwrap());
        let assembly = Assembly::new(vec![counted.clone(), words]);
        assert_eq!(assembly.tail_names(), vec!["tsCount", "word pipe"]);
        assert_eq!(assembly.tail("tsCount").map(Pipe::id), Some(counted.id()));
        assert_eq!(format!("{:?}", counted), "Every(\"tsCount\")");
    }
}
