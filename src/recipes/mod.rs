//! Ready-made flows for the bundled log analysis and word count jobs.

pub mod arrival_rate;
pub mod logparser;
pub mod wordcount;

use crate::error::Result;
use crate::operation::{Function, Output, RegexParser};
use crate::pipe::Pipe;
use crate::tuple::FieldSet;

/// Apache common/combined log line.
pub const APACHE_PATTERN: &str =
    r#"^([^ ]*) +[^ ]* +[^ ]* +\[([^\]]*)\] +"([^ ]*) ([^ ]*) [^ ]*" ([^ ]*) ([^ ]*).*$"#;

pub fn apache_fields() -> FieldSet {
    FieldSet::literal(&["ip", "time", "method", "event", "status", "size"])
}

/// `line` -> the six Apache fields.
pub fn apache_import(name: &str) -> Result<Pipe> {
    let parser = RegexParser::with_groups(apache_fields(), APACHE_PATTERN, &[1, 2, 3, 4, 5, 6])?;
    Ok(Pipe::new(name).each(
        FieldSet::literal(&["line"]),
        Function::Parse(parser),
        Output::Results,
    ))
}

/// `<dir>/<name>` without doubling separators.
pub(crate) fn child(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths() {
        assert_eq!(child("out/", "logs"), "out/logs");
        assert_eq!(child("out", "arrivalrate/sec"), "out/arrivalrate/sec");
    }
}
