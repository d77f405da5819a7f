//! Typed expressions over argument fields.
//!
//! Built with ordinary operators instead of parsed from text:
//!
//! ```
//! use logflow::operation::Expr;
//! let minute = Expr::field("ts") - Expr::field("ts") % (Expr::int(60) * Expr::int(1000));
//! assert_eq!(minute.referenced_fields(), vec!["ts", "ts"]);
//! ```

use std::ops;

use crate::error::{FlowError, Result};
use crate::tuple::{FieldSet, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Field(String),
    Literal(Value),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// String concatenation of every part's text form.
    Concat(Vec<Expr>),
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn int(i: i64) -> Self {
        Expr::Literal(Value::Integer(i))
    }

    pub fn float(f: f64) -> Self {
        Expr::Literal(Value::Float(f))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Expr::Literal(Value::String(s.into()))
    }

    pub fn concat(parts: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Concat(parts.into_iter().collect())
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Field(name) => out.push(name),
            Expr::Literal(_) => {}
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
            Expr::Concat(parts) => parts.iter().for_each(|p| p.collect_fields(out)),
        }
    }

    pub fn eval(&self, args: &Record) -> Result<Value> {
        match self {
            Expr::Field(name) => args.get(name).cloned().ok_or_else(|| {
                FlowError::Expression(format!("unknown field {:?} in {}", name, args.fields()))
            }),
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Binary { op, lhs, rhs } => arithmetic(*op, lhs.eval(args)?, rhs.eval(args)?),
            Expr::Concat(parts) => {
                let mut s = String::new();
                for part in parts {
                    s.push_str(&part.eval(args)?.to_string());
                }
                Ok(Value::String(s))
            }
        }
    }
}

fn arithmetic(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    let is_float = matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_));
    if is_float {
        let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(non_numeric(op, &lhs, &rhs)),
        };
        let out = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Rem => a % b,
        };
        return Ok(Value::Float(out));
    }

    let (a, b) = match (lhs.as_i64(), rhs.as_i64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(non_numeric(op, &lhs, &rhs)),
    };
    let out = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => {
            return Err(FlowError::Expression(format!("{:?} by zero", op)));
        }
        BinOp::Div => a.checked_div(b),
        BinOp::Rem => a.checked_rem(b),
    }
    .ok_or_else(|| FlowError::Expression(format!("{:?} overflow on {} and {}", op, a, b)))?;

    // Shifting a timestamp keeps it a timestamp.
    let keeps_time = matches!(lhs, Value::Timestamp(_)) && matches!(op, BinOp::Add | BinOp::Sub);
    Ok(if keeps_time {
        Value::Timestamp(out)
    } else {
        Value::Integer(out)
    })
}

fn non_numeric(op: BinOp, lhs: &Value, rhs: &Value) -> FlowError {
    FlowError::Expression(format!("{:?} needs numbers, got {:?} and {:?}", op, lhs, rhs))
}

macro_rules! expr_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

expr_op!(Add, add, BinOp::Add);
expr_op!(Sub, sub, BinOp::Sub);
expr_op!(Mul, mul, BinOp::Mul);
expr_op!(Div, div, BinOp::Div);
expr_op!(Rem, rem, BinOp::Rem);

/// A function declaring one field computed from an expression.
#[derive(Debug, Clone)]
pub struct ExpressionFunction {
    declared: FieldSet,
    expr: Expr,
}

impl ExpressionFunction {
    pub fn new(declared: FieldSet, expr: Expr) -> Result<Self> {
        if declared.len() != 1 {
            return Err(FlowError::SchemaMismatch(format!(
                "expression declares exactly one field, got {}",
                declared
            )));
        }
        Ok(Self { declared, expr })
    }

    pub fn declared(&self) -> &FieldSet {
        &self.declared
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(ts: Value) -> Record {
        Record::new(FieldSet::new(["ts"]).unwrap(), vec![ts]).unwrap()
    }

    #[test]
    fn minute_truncation_expression() {
        let expr = Expr::field("ts") - Expr::field("ts") % (Expr::int(60) * Expr::int(1000));
        let got = expr.eval(&args(Value::Timestamp(1_577_836_865_000))).unwrap();
        assert_eq!(got, Value::Timestamp(1_577_836_860_000));

        // Text that reads as a number still works.
        let got = expr.eval(&args(Value::from("125000"))).unwrap();
        assert_eq!(got, Value::Integer(120_000));
    }

    #[test]
    fn errors_are_reported() {
        let div = Expr::field("ts") / Expr::int(0);
        assert!(matches!(div.eval(&args(Value::Integer(1))), Err(FlowError::Expression(_))));

        let text = Expr::field("ts") + Expr::int(1);
        assert!(matches!(text.eval(&args(Value::from("GET"))), Err(FlowError::Expression(_))));

        let missing = Expr::field("tm");
        assert!(missing.eval(&args(Value::Integer(1))).is_err());
    }

    #[test]
    fn floats_and_concat() {
        let half = Expr::field("ts") / Expr::float(2.0);
        assert_eq!(half.eval(&args(Value::Integer(3))).unwrap(), Value::Float(1.5));

        let label = Expr::concat([Expr::text("t="), Expr::field("ts")]);
        assert_eq!(label.eval(&args(Value::Integer(7))).unwrap(), Value::from("t=7"));
    }
}
