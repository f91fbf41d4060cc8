//! Compiler errors.
//!
//! A compile fault is fatal: no partial image is produced, and the
//! message names the offending token and its classification.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("unexpected {kind} `{text}`")]
    UnexpectedToken { kind: &'static str, text: String },
    #[error("malformed numeric literal `{0}`")]
    BadLiteral(String),
    #[error("undefined label `{0}`")]
    UndefinedLabel(String),
    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),
    #[error("duplicate function `{0}`")]
    DuplicateFunction(String),
    #[error("duplicate structure `{0}`")]
    DuplicateStruct(String),
    #[error("function `{name}` takes {expected} arguments, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("structure `{name}` has {fields} fields, got {got} values")]
    TooManyFields {
        name: String,
        fields: usize,
        got: usize,
    },
    #[error("no import binding for `{0}`")]
    MissingBinding(String),
    #[error("unexpected end of input")]
    UnexpectedEof,
}
