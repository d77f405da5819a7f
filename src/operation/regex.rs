//! Regex driven operations: field extraction, splitting, replacement,
//! tokenising and filtering.
//!
//! Patterns are compiled once when the operation is built. Each worker owns a
//! `Matcher` (reusable capture buffers) that is refilled from scratch for every
//! line, so nothing carries over between unrelated inputs.

use regex::{CaptureLocations, Regex};

use crate::error::{FlowError, Result};
use crate::tuple::{FieldSet, Value};

/// Per-worker capture buffers for one pattern.
pub type Matcher = CaptureLocations;

/// Parse a line into the declared fields using the pattern's capture groups.
///
/// Group 0 (the whole match) is never emitted. By default groups `1..=n`
/// map onto the `n` declared fields in order.
///
/// Example (Apache common log):
/// `^([^ ]*) +[^ ]* +[^ ]* +\[([^\]]*)\] +"([^ ]*) ([^ ]*) [^ ]*" ([^ ]*) ([^ ]*).*$`
#[derive(Debug, Clone)]
pub struct RegexParser {
    declared: FieldSet,
    regex: Regex,
    groups: Vec<usize>,
}

impl RegexParser {
    /// The pattern must have exactly one capture group per declared field.
    pub fn new(declared: FieldSet, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        let captures = regex.captures_len() - 1;
        if captures != declared.len() {
            return Err(FlowError::SchemaMismatch(format!(
                "pattern [{}] has {} capture groups but declares {} fields {}",
                pattern,
                captures,
                declared.len(),
                declared
            )));
        }
        let groups = (1..=captures).collect();
        Ok(Self {
            declared,
            regex,
            groups,
        })
    }

    /// Keep only the listed capture groups, one per declared field.
    pub fn with_groups(declared: FieldSet, pattern: &str, groups: &[usize]) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        if groups.len() != declared.len() {
            return Err(FlowError::SchemaMismatch(format!(
                "{} groups selected for {} fields {}",
                groups.len(),
                declared.len(),
                declared
            )));
        }
        if let Some(bad) = groups
            .iter()
            .find(|&&g| g == 0 || g >= regex.captures_len())
        {
            return Err(FlowError::SchemaMismatch(format!(
                "pattern [{}] has no capture group {}",
                pattern, bad
            )));
        }
        Ok(Self {
            declared,
            regex,
            groups: groups.to_vec(),
        })
    }

    pub fn declared(&self) -> &FieldSet {
        &self.declared
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matcher(&self) -> Matcher {
        self.regex.capture_locations()
    }

    /// Extract one value per declared field; a non-matching line is an error.
    /// Groups that did not participate in the match yield an empty string.
    pub fn parse(&self, matcher: &mut Matcher, line: &str) -> Result<Vec<Value>> {
        if self.regex.captures_read(matcher, line).is_none() {
            return Err(FlowError::Parse {
                line: line.to_string(),
                pattern: self.regex.as_str().to_string(),
            });
        }
        Ok(self
            .groups
            .iter()
            .map(|&g| match matcher.get(g) {
                Some((start, end)) => Value::from(&line[start..end]),
                None => Value::from(""),
            })
            .collect())
    }
}

/// Split a value on a delimiter pattern into the declared fields. Missing
/// trailing parts become empty strings; the last field keeps any remainder.
#[derive(Debug, Clone)]
pub struct RegexSplitter {
    declared: FieldSet,
    regex: Regex,
}

impl RegexSplitter {
    pub fn new(declared: FieldSet, delimiter: &str) -> Result<Self> {
        if declared.is_empty() {
            return Err(FlowError::SchemaMismatch(
                "splitter must declare at least one field".to_string(),
            ));
        }
        Ok(Self {
            declared,
            regex: Regex::new(delimiter)?,
        })
    }

    /// Split on tabs.
    pub fn tabs(declared: FieldSet) -> Result<Self> {
        Self::new(declared, "\t")
    }

    pub fn declared(&self) -> &FieldSet {
        &self.declared
    }

    pub fn split(&self, text: &str) -> Vec<Value> {
        let n = self.declared.len();
        let mut values: Vec<Value> = self.regex.splitn(text, n).map(Value::from).collect();
        values.resize(n, Value::from(""));
        values
    }
}

#[derive(Debug, Clone)]
pub struct RegexReplace {
    declared: FieldSet,
    regex: Regex,
    replacement: String,
    all: bool,
}

impl RegexReplace {
    /// Replace every match of `pattern` with `replacement`.
    pub fn new(declared: FieldSet, pattern: &str, replacement: &str) -> Result<Self> {
        if declared.len() != 1 {
            return Err(FlowError::SchemaMismatch(format!(
                "replace declares exactly one field, got {}",
                declared
            )));
        }
        Ok(Self {
            declared,
            regex: Regex::new(pattern)?,
            replacement: replacement.to_string(),
            all: true,
        })
    }

    pub fn first_only(mut self) -> Self {
        self.all = false;
        self
    }

    pub fn declared(&self) -> &FieldSet {
        &self.declared
    }

    pub fn replace(&self, text: &str) -> Value {
        let out = if self.all {
            self.regex.replace_all(text, self.replacement.as_str())
        } else {
            self.regex.replace(text, self.replacement.as_str())
        };
        Value::from(out.into_owned())
    }
}

/// Emit one value per match of the pattern, e.g. one per word.
#[derive(Debug, Clone)]
pub struct RegexGenerator {
    declared: FieldSet,
    regex: Regex,
}

impl RegexGenerator {
    pub fn new(declared: FieldSet, pattern: &str) -> Result<Self> {
        if declared.len() != 1 {
            return Err(FlowError::SchemaMismatch(format!(
                "generator declares exactly one field, got {}",
                declared
            )));
        }
        Ok(Self {
            declared,
            regex: Regex::new(pattern)?,
        })
    }

    pub fn declared(&self) -> &FieldSet {
        &self.declared
    }

    pub fn generate<'t>(&'t self, text: &'t str) -> impl Iterator<Item = Value> + 't {
        self.regex
            .find_iter(text)
            .filter(|m| !m.as_str().is_empty())
            .map(|m| Value::from(m.as_str()))
    }
}

/// Keep (or drop, when `remove_match`) records whose argument values, joined
/// by tabs, match the pattern.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    regex: Regex,
    remove_match: bool,
}

impl RegexFilter {
    pub fn new(pattern: &str, remove_match: bool) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            remove_match,
        })
    }

    pub fn keep(&self, text: &str) -> bool {
        self.regex.is_match(text) != self.remove_match
    }
}
