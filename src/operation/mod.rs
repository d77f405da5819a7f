//! Operations applied by pipes.
//!
//! The set of operations is closed: every map stage carries one `Function`
//! or `Filter` variant and every aggregate stage an `Aggregator`, so the flow
//! compiler can check them exhaustively.

pub mod aggregator;
pub mod expression;
pub mod regex;
pub mod window;

pub use aggregator::{Accumulator, Aggregator};
pub use expression::{BinOp, Expr, ExpressionFunction};
pub use self::regex::{
    Matcher, RegexFilter, RegexGenerator, RegexParser, RegexReplace, RegexSplitter,
};
pub use window::{Bucket, DateParser, Granularity};

use crate::error::{FlowError, Result};
use crate::tuple::{FieldSet, Record, Value};

/// Which incoming fields an operation sees.
#[derive(Debug, Clone, Default)]
pub enum Selector {
    #[default]
    All,
    Fields(FieldSet),
}

impl From<FieldSet> for Selector {
    fn from(fields: FieldSet) -> Self {
        Selector::Fields(fields)
    }
}

impl Selector {
    pub(crate) fn resolve(&self, incoming: &FieldSet) -> Result<FieldSet> {
        match self {
            Selector::All => Ok(incoming.clone()),
            Selector::Fields(fields) => incoming.select(fields),
        }
    }
}

/// Which fields leave a map stage.
#[derive(Debug, Clone, Default)]
pub enum Output {
    /// Only the function's declared fields.
    #[default]
    Results,
    /// Incoming fields followed by the results; names must not collide.
    All,
    /// Incoming fields with the argument fields overwritten by the results.
    Replace,
    /// Named subset of incoming + result fields (results win on a name clash).
    Fields(FieldSet),
}

#[derive(Debug, Clone)]
pub enum Function {
    Parse(RegexParser),
    Split(RegexSplitter),
    Replace(RegexReplace),
    Generate(RegexGenerator),
    Date(DateParser),
    Bucket(Bucket),
    Expression(ExpressionFunction),
    /// Pass the arguments through unchanged.
    Identity,
}

/// Per-worker mutable state for one function.
pub enum Scratch {
    None,
    Matcher(Matcher),
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Function::Parse(_) => "RegexParser",
            Function::Split(_) => "RegexSplitter",
            Function::Replace(_) => "RegexReplace",
            Function::Generate(_) => "RegexGenerator",
            Function::Date(_) => "DateParser",
            Function::Bucket(_) => "Bucket",
            Function::Expression(_) => "Expression",
            Function::Identity => "Identity",
        }
    }

    pub fn declared(&self, arguments: &FieldSet) -> FieldSet {
        match self {
            Function::Parse(f) => f.declared().clone(),
            Function::Split(f) => f.declared().clone(),
            Function::Replace(f) => f.declared().clone(),
            Function::Generate(f) => f.declared().clone(),
            Function::Date(f) => f.declared().clone(),
            Function::Bucket(f) => f.declared().clone(),
            Function::Expression(f) => f.declared().clone(),
            Function::Identity => arguments.clone(),
        }
    }

    /// Validate the argument fields this function will receive.
    pub(crate) fn check_arguments(&self, arguments: &FieldSet) -> Result<()> {
        match self {
            Function::Identity => Ok(()),
            Function::Expression(f) => {
                for name in f.expr().referenced_fields() {
                    if !arguments.contains(name) {
                        return Err(FlowError::SchemaMismatch(format!(
                            "expression references {:?}, arguments are {}",
                            name, arguments
                        )));
                    }
                }
                Ok(())
            }
            _ if arguments.len() != 1 => Err(FlowError::SchemaMismatch(format!(
                "{} takes exactly one argument field, got {}",
                self.name(),
                arguments
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn scratch(&self) -> Scratch {
        match self {
            Function::Parse(f) => Scratch::Matcher(f.matcher()),
            _ => Scratch::None,
        }
    }

    /// Apply to one argument record, appending zero or more result tuples.
    pub(crate) fn operate(
        &self,
        scratch: &mut Scratch,
        args: &Record,
        out: &mut Vec<Vec<Value>>,
    ) -> Result<()> {
        let first = || args.values()[0].to_string();
        match self {
            Function::Parse(f) => {
                let line = first();
                let values = match scratch {
                    Scratch::Matcher(m) => f.parse(m, &line)?,
                    Scratch::None => f.parse(&mut f.matcher(), &line)?,
                };
                out.push(values);
            }
            Function::Split(f) => out.push(f.split(&first())),
            Function::Replace(f) => out.push(vec![f.replace(&first())]),
            Function::Generate(f) => {
                let text = first();
                out.extend(f.generate(&text).map(|v| vec![v]));
            }
            Function::Date(f) => out.push(vec![Value::Timestamp(f.parse(&first())?)]),
            Function::Bucket(f) => out.push(vec![f.apply(&args.values()[0])?]),
            Function::Expression(f) => out.push(vec![f.expr().eval(args)?]),
            Function::Identity => out.push(args.values().to_vec()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    Regex(RegexFilter),
}

impl Filter {
    pub(crate) fn keep(&self, args: &Record) -> bool {
        match self {
            Filter::Regex(f) => f.keep(&args.to_line("\t")),
        }
    }
}
