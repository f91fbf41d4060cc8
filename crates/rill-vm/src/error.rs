//! Runtime faults.
//!
//! A fault is fatal to the program that raised it; nothing in the core
//! recovers locally. The execution driver is the boundary that catches a
//! fault and reports it.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Fault {
    #[error("unknown opcode {op:#04x} at position {at}")]
    UnknownOpcode { op: u8, at: usize },
    #[error("corrupt image: missing payload at position {at}")]
    MissingPayload { at: usize },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("cannot apply `{op}` to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("cannot apply `{op}` to {operand}")]
    BadOperand {
        op: &'static str,
        operand: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("numeric overflow")]
    NumericOverflow,
    #[error("cannot split by an empty string")]
    EmptySplit,
    #[error("string repeat count must be a non-negative integer")]
    BadRepeatCount,
    #[error("index must be a non-negative integer")]
    BadIndex,
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("unresolved variable `{name}`")]
    UnresolvedVariable { name: String },
    #[error("cannot assign to constant `{name}`")]
    ConstAssignment { name: String },
    #[error("no field `{field}` on structure `{type_name}`")]
    UnknownField { type_name: String, field: String },
    #[error("unregistered foreign function index {index}")]
    UnknownForeign { index: u32 },
    #[error("return without a return address")]
    MissingReturnAddress,
    #[error("{0}")]
    Foreign(String),
}
