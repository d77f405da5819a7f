//! Windowing: timestamp parsing and fixed-width time buckets.

use chrono::{DateTime, NaiveDateTime};

use crate::error::{FlowError, Result};
use crate::tuple::{FieldSet, Value};

/// Apache access log time, e.g. `01/Jan/2020:00:00:00 +0000`.
pub const APACHE_DATE_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Parses text into a millisecond timestamp using a `chrono` format string.
/// Formats without an offset are read as UTC.
#[derive(Debug, Clone)]
pub struct DateParser {
    declared: FieldSet,
    format: String,
}

impl DateParser {
    pub fn new(declared: FieldSet, format: &str) -> Result<Self> {
        if declared.len() != 1 {
            return Err(FlowError::SchemaMismatch(format!(
                "date parser declares exactly one field, got {}",
                declared
            )));
        }
        Ok(Self {
            declared,
            format: format.to_string(),
        })
    }

    pub fn declared(&self) -> &FieldSet {
        &self.declared
    }

    pub fn parse(&self, text: &str) -> Result<i64> {
        let text = text.trim();
        if let Ok(ts) = DateTime::parse_from_str(text, &self.format) {
            return Ok(ts.timestamp_millis());
        }
        NaiveDateTime::parse_from_str(text, &self.format)
            .map(|naive| naive.and_utc().timestamp_millis())
            .map_err(|_| FlowError::TimestampParse {
                value: text.to_string(),
                format: self.format.clone(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    /// Arbitrary width in milliseconds.
    Millis(i64),
}

impl Granularity {
    pub fn width_ms(self) -> i64 {
        match self {
            Granularity::Millisecond => 1,
            Granularity::Second => 1_000,
            Granularity::Minute => 60_000,
            Granularity::Hour => 3_600_000,
            Granularity::Day => 86_400_000,
            Granularity::Millis(ms) => ms,
        }
    }
}

/// Start of the bucket holding `ts`: `ts - (ts mod width)`, flooring for
/// timestamps before the epoch. `None` when the start is below `i64::MIN`.
pub fn truncate(ts: i64, width_ms: i64) -> Option<i64> {
    ts.checked_sub(ts.rem_euclid(width_ms))
}

/// Derives a bucket field from a timestamp (or integer millisecond) argument.
#[derive(Debug, Clone)]
pub struct Bucket {
    declared: FieldSet,
    width_ms: i64,
}

impl Bucket {
    pub fn new(declared: FieldSet, granularity: Granularity) -> Result<Self> {
        if declared.len() != 1 {
            return Err(FlowError::SchemaMismatch(format!(
                "bucket declares exactly one field, got {}",
                declared
            )));
        }
        let width_ms = granularity.width_ms();
        if width_ms <= 0 {
            return Err(FlowError::SchemaMismatch(format!(
                "bucket width must be positive, got {}ms",
                width_ms
            )));
        }
        Ok(Self { declared, width_ms })
    }

    pub fn declared(&self) -> &FieldSet {
        &self.declared
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    pub fn apply(&self, value: &Value) -> Result<Value> {
        let ts = value.as_i64().ok_or_else(|| {
            FlowError::Expression(format!("cannot bucket non-numeric value {:?}", value))
        })?;
        let start = truncate(ts, self.width_ms).ok_or_else(|| {
            FlowError::Expression(format!("bucket of {} overflows {}ms width", ts, self.width_ms))
        })?;
        Ok(Value::Timestamp(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MIDNIGHT_2020: i64 = 1_577_836_800_000;

    fn ts_parser() -> DateParser {
        DateParser::new(FieldSet::new(["ts"]).unwrap(), APACHE_DATE_FORMAT).unwrap()
    }

    #[test]
    fn parses_apache_time() {
        let parser = ts_parser();
        assert_eq!(parser.parse("01/Jan/2020:00:00:00 +0000").unwrap(), MIDNIGHT_2020);
        assert_eq!(
            parser.parse("01/Jan/2020:01:00:30 +0100").unwrap(),
            MIDNIGHT_2020 + 30_000
        );
    }

    #[test]
    fn naive_formats_are_utc() {
        let parser = DateParser::new(FieldSet::new(["ts"]).unwrap(), "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parser.parse("2020-01-01 00:01:05").unwrap(), MIDNIGHT_2020 + 65_000);
    }

    #[test]
    fn malformed_timestamp_fails() {
        match ts_parser().parse("yesterday") {
            Err(FlowError::TimestampParse { value, format }) => {
                assert_eq!(value, "yesterday");
                assert_eq!(format, APACHE_DATE_FORMAT);
            }
            other => panic!("expected timestamp error, got {:?}", other),
        }
    }

    #[test]
    fn truncation() {
        let minute = Granularity::Minute.width_ms();
        assert_eq!(truncate(MIDNIGHT_2020 + 65_000, minute), Some(MIDNIGHT_2020 + 60_000));
        let second = Granularity::Second.width_ms();
        assert_eq!(truncate(MIDNIGHT_2020 + 30_000, second), Some(MIDNIGHT_2020 + 30_000));
        assert_eq!(truncate(-1, 1_000), Some(-1_000));

        let bucket = Bucket::new(FieldSet::new(["tm"]).unwrap(), Granularity::Minute).unwrap();
        assert_eq!(
            bucket.apply(&Value::from("1577836865000")).unwrap(),
            Value::Timestamp(MIDNIGHT_2020 + 60_000)
        );
        assert!(Bucket::new(FieldSet::new(["x"]).unwrap(), Granularity::Millis(0)).is_err());
    }

    #[test]
    fn extreme_timestamps_do_not_wrap() {
        let bucket = Bucket::new(FieldSet::new(["t"]).unwrap(), Granularity::Second).unwrap();
        match bucket.apply(&Value::from("-9223372036854775808")) {
            Err(FlowError::Expression(message)) => assert!(message.contains("overflows")),
            other => panic!("expected expression error, got {:?}", other),
        }
        assert_eq!(truncate(i64::MIN, 1), Some(i64::MIN));
        assert_eq!(
            bucket.apply(&Value::Integer(i64::MAX)).unwrap(),
            Value::Timestamp(i64::MAX - i64::MAX.rem_euclid(1_000))
        );
    }
}
