//! Request arrival rates per second and per minute.
//!
//! Two flows: the import flow parses the raw log into `<output>/logs`; the
//! arrival rate flow reads it back and writes counts to
//! `<output>/arrivalrate/sec` and `<output>/arrivalrate/min`.

use crate::cascade::{Cascade, CascadeConnector};
use crate::error::Result;
use crate::flow::{Flow, FlowConnector, taps_map};
use crate::operation::window::APACHE_DATE_FORMAT;
use crate::operation::{
    Aggregator, Bucket, DateParser, Expr, ExpressionFunction, Function, Granularity, Output,
};
use crate::pipe::{Assembly, Pipe};
use crate::tap::{Scheme, Tap};
use crate::tuple::FieldSet;

use super::{apache_fields, apache_import, child};

#[derive(Debug, Clone)]
pub struct Paths {
    pub logs: String,
    pub per_second: String,
    pub per_minute: String,
}

impl Paths {
    pub fn under(output: &str) -> Self {
        Self {
            logs: child(output, "logs"),
            per_second: child(output, "arrivalrate/sec"),
            per_minute: child(output, "arrivalrate/min"),
        }
    }
}

/// Tails `tsCount` (ts, count) and `tmCount` (tm, count).
pub fn assembly() -> Result<Assembly> {
    let ts = FieldSet::literal(&["ts"]);
    let tm = FieldSet::literal(&["tm"]);

    let parsed = Pipe::new("arrival rate").each(
        FieldSet::literal(&["time"]),
        Function::Date(DateParser::new(ts.clone(), APACHE_DATE_FORMAT)?),
        Output::Results,
    );

    let per_second = Pipe::branch("tsCount", &parsed)
        .each(
            ts.clone(),
            Function::Bucket(Bucket::new(ts.clone(), Granularity::Second)?),
            Output::Replace,
        )
        .group_by(ts)
        .every(Aggregator::count());

    let minute = Expr::field("ts") - Expr::field("ts") % (Expr::int(60) * Expr::int(1000));
    let per_minute = Pipe::branch(
        "tmCount",
        &parsed.each(
            FieldSet::literal(&["ts"]),
            Function::Expression(ExpressionFunction::new(tm.clone(), minute)?),
            Output::Results,
        ),
    )
    .group_by(tm)
    .every(Aggregator::count());

    Ok(Assembly::new(vec![per_second, per_minute]))
}

pub fn import_flow(connector: &FlowConnector, input: &str, paths: &Paths) -> Result<Flow> {
    connector.connect(
        "import",
        Tap::new(Scheme::text_line(), input),
        Tap::new(Scheme::delimited(apache_fields()), paths.logs.as_str()),
        apache_import("import")?,
    )
}

pub fn arrival_rate_flow(connector: &FlowConnector, paths: &Paths) -> Result<Flow> {
    let sinks = taps_map(
        ["tsCount", "tmCount"],
        [
            Tap::new(Scheme::text_line(), paths.per_second.as_str()),
            Tap::new(Scheme::text_line(), paths.per_minute.as_str()),
        ],
    )?;
    connector.connect_many(
        "arrival rate",
        Tap::new(Scheme::delimited(apache_fields()), paths.logs.as_str()),
        sinks,
        assembly()?,
    )
}

pub fn cascade(
    flows: &FlowConnector,
    cascades: &CascadeConnector,
    input: &str,
    output: &str,
) -> Result<Cascade> {
    let paths = Paths::under(output);
    // Order is irrelevant; dependencies come from the shared logs location.
    cascades.connect(vec![
        arrival_rate_flow(flows, &paths)?,
        import_flow(flows, input, &paths)?,
    ])
}
