//! Dynamic values and their operator semantics.
//!
//! This is the only value type flowing through the operand stack and the
//! variable store. Lists and structures have reference semantics within a
//! single machine (`Rc<RefCell<…>>`); they never cross machines, and the
//! image-side [`Constant`](crate::image::Constant) type cannot carry them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::Fault;
use crate::image::Constant;

/// A structure instance: a fixed, pre-declared set of fields, keyed by
/// interned field id, in declaration order.
#[derive(Debug, Clone)]
pub struct StructInstance {
    pub type_name: String,
    pub fields: IndexMap<u32, Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Number(Decimal),
    Bool(bool),
    Char(char),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Struct(Rc<RefCell<StructInstance>>),
    Addr(usize),
    VarRef(u32),
    Null,
}

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        match c {
            Constant::Number(d) => Value::Number(d),
            Constant::Str(s) => Value::Str(s),
            Constant::Bool(b) => Value::Bool(b),
            Constant::Char(c) => Value::Char(c),
            Constant::Addr(a) => Value::Addr(a),
            Constant::Null => Value::Null,
        }
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Char(_) => "character",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Struct(_) => "structure",
            Value::Addr(_) => "address",
            Value::VarRef(_) => "variable reference",
            Value::Null => "null",
        }
    }

    /// `+` adds numbers; if either side is a string the other side is
    /// stringified and the result is a concatenation.
    pub fn add(self, rhs: Value) -> Result<Value, Fault> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a
                .checked_add(b)
                .map(Value::Number)
                .ok_or(Fault::NumericOverflow),
            (Value::Str(a), b) => Ok(Value::Str(format!("{a}{b}"))),
            (a, Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (a, b) => Err(Fault::TypeMismatch {
                op: "+",
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        }
    }

    pub fn sub(self, rhs: Value) -> Result<Value, Fault> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a
                .checked_sub(b)
                .map(Value::Number)
                .ok_or(Fault::NumericOverflow),
            (a, b) => Err(Fault::TypeMismatch {
                op: "-",
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        }
    }

    /// `*` multiplies numbers; a string times a number repeats the string.
    pub fn mul(self, rhs: Value) -> Result<Value, Fault> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a
                .checked_mul(b)
                .map(Value::Number)
                .ok_or(Fault::NumericOverflow),
            (Value::Str(s), Value::Number(n)) | (Value::Number(n), Value::Str(s)) => {
                let count = repeat_count(n)?;
                Ok(Value::Str(s.repeat(count)))
            }
            (a, b) => Err(Fault::TypeMismatch {
                op: "*",
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        }
    }

    /// `/` divides numbers; a string divided by a string splits the left
    /// operand on the right as separator, producing a list.
    pub fn div(self, rhs: Value) -> Result<Value, Fault> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => {
                if b.is_zero() {
                    return Err(Fault::DivisionByZero);
                }
                a.checked_div(b)
                    .map(Value::Number)
                    .ok_or(Fault::NumericOverflow)
            }
            (Value::Str(a), Value::Str(sep)) => {
                if sep.is_empty() {
                    return Err(Fault::EmptySplit);
                }
                let parts = a
                    .split(sep.as_str())
                    .map(|p| Value::Str(p.to_string()))
                    .collect();
                Ok(Value::list(parts))
            }
            (a, b) => Err(Fault::TypeMismatch {
                op: "/",
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        }
    }

    pub fn rem(self, rhs: Value) -> Result<Value, Fault> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => {
                if b.is_zero() {
                    return Err(Fault::DivisionByZero);
                }
                a.checked_rem(b)
                    .map(Value::Number)
                    .ok_or(Fault::NumericOverflow)
            }
            (a, b) => Err(Fault::TypeMismatch {
                op: "%",
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        }
    }

    pub fn neg(self) -> Result<Value, Fault> {
        match self {
            Value::Number(a) => Ok(Value::Number(-a)),
            a => Err(Fault::BadOperand {
                op: "-",
                operand: a.type_name(),
            }),
        }
    }

    /// `not` negates booleans and asks "is this number zero" of numbers.
    pub fn not(self) -> Result<Value, Fault> {
        match self {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Number(n) => Ok(Value::Bool(n.is_zero())),
            a => Err(Fault::BadOperand {
                op: "not",
                operand: a.type_name(),
            }),
        }
    }

    /// Truthiness for conditions and `and`/`or`: booleans directly,
    /// numbers by the `not`-on-numbers rule (zero is false).
    pub fn truthy(&self) -> Result<bool, Fault> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(!n.is_zero()),
            a => Err(Fault::BadOperand {
                op: "condition",
                operand: a.type_name(),
            }),
        }
    }

    pub fn lt(&self, rhs: &Value) -> Result<bool, Fault> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(a < b),
            (a, b) => Err(Fault::TypeMismatch {
                op: "<",
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        }
    }

    pub fn gt(&self, rhs: &Value) -> Result<bool, Fault> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(a > b),
            (a, b) => Err(Fault::TypeMismatch {
                op: ">",
                lhs: a.type_name(),
                rhs: b.type_name(),
            }),
        }
    }

    /// Equality. Numbers compare after rounding both sides to `scale`
    /// fractional digits, absorbing series-approximation error from the
    /// foreign math functions. Mismatched types are unequal, never a
    /// fault.
    pub fn loose_eq(&self, rhs: &Value, scale: u32) -> bool {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a.round_dp(scale) == b.round_dp(scale),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Addr(a), Value::Addr(b)) => a == b,
            (Value::VarRef(a), Value::VarRef(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y, scale))
            }
            (Value::Struct(a), Value::Struct(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.type_name == b.type_name
                    && a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(b.fields.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb, scale))
            }
            _ => false,
        }
    }

    /// Interpret a value as a zero-based element index.
    pub fn as_index(&self) -> Result<usize, Fault> {
        match self {
            Value::Number(n) => {
                if n.is_sign_negative() || !n.fract().is_zero() {
                    return Err(Fault::BadIndex);
                }
                n.to_usize().ok_or(Fault::BadIndex)
            }
            _ => Err(Fault::BadIndex),
        }
    }
}

fn repeat_count(n: Decimal) -> Result<usize, Fault> {
    if n.is_sign_negative() || !n.fract().is_zero() {
        return Err(Fault::BadRepeatCount);
    }
    n.to_usize().ok_or(Fault::BadRepeatCount)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Struct(s) => {
                let s = s.borrow();
                write!(f, "{} {{", s.type_name)?;
                for (i, (id, value)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "#{id}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Addr(a) => write!(f, "@{a}"),
            Value::VarRef(id) => write!(f, "&{id}"),
            Value::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn num(s: &str) -> Value {
        Value::Number(Decimal::from_str(s).unwrap())
    }

    fn s(text: &str) -> Value {
        Value::Str(text.to_string())
    }

    #[test]
    fn string_concat_both_ways() {
        assert_eq!(
            s("Hello!").add(s("Hi!")).unwrap().to_string(),
            "Hello!Hi!"
        );
        assert_eq!(s("Hello!").add(num("5")).unwrap().to_string(), "Hello!5");
        assert_eq!(num("5").add(s("Hi")).unwrap().to_string(), "5Hi");
    }

    #[test]
    fn string_division_splits() {
        let parts = s("He Ha He!").div(s(" ")).unwrap();
        assert_eq!(parts.to_string(), "[He, Ha, He!]");
    }

    #[test]
    fn string_repeat() {
        assert_eq!(s("2").mul(num("5")).unwrap().to_string(), "22222");
        assert!(s("2").mul(num("-1")).is_err());
        assert!(s("2").mul(num("1.5")).is_err());
    }

    #[test]
    fn division_by_zero_faults() {
        assert_eq!(num("1").div(num("0")).unwrap_err(), Fault::DivisionByZero);
        assert_eq!(num("1").rem(num("0")).unwrap_err(), Fault::DivisionByZero);
        assert_eq!(s("a b").div(s("")).unwrap_err(), Fault::EmptySplit);
    }

    #[test]
    fn not_on_numbers_tests_zero() {
        assert_eq!(num("0").not().unwrap().to_string(), "true");
        assert_eq!(num("3").not().unwrap().to_string(), "false");
        assert_eq!(Value::Bool(true).not().unwrap().to_string(), "false");
    }

    #[test]
    fn equality_uses_rounding_tolerance() {
        let a = num("0.3333333333333333333333333333");
        let b = num("0.3333333333333333333333333334");
        assert!(a.loose_eq(&b, 24));
        assert!(!a.loose_eq(&b, 28));
    }

    #[test]
    fn mismatched_types_are_unequal_not_faults() {
        assert!(!num("1").loose_eq(&s("1"), 24));
        assert!(Value::Null.loose_eq(&Value::Null, 24));
    }

    #[test]
    fn arithmetic_on_non_numbers_faults() {
        assert!(Value::Bool(true).add(num("1")).is_err());
        assert!(Value::Null.sub(num("1")).is_err());
    }

    #[test]
    fn index_conversion() {
        assert_eq!(num("2").as_index().unwrap(), 2);
        assert!(num("-1").as_index().is_err());
        assert!(num("1.5").as_index().is_err());
        assert!(s("x").as_index().is_err());
    }
}
