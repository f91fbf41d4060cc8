//! The bytecode image handed from the compiler to the runtime.
//!
//! The image is plain owned data (no interior mutability, no shared
//! references), so it can cross the thread boundary into a freshly
//! spawned program. Image-side constants are deliberately a smaller type
//! than runtime values: lists and structures only exist at runtime.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::instruction::RawInst;

/// A literal stored in the image's constant table.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(Decimal),
    Str(String),
    Bool(bool),
    Char(char),
    Addr(usize),
    Null,
}

/// Metadata for a `CreateVar`/`CopyVar` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDef {
    pub id: u32,
    pub name: String,
    pub is_const: bool,
}

/// Field layout for a `NewStruct` instruction, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<u32>,
}

/// Per-position payload: the literal or metadata a single instruction
/// needs beyond its inline operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Const(Constant),
    Var(VarDef),
    Struct(StructDef),
    Argc(usize),
}

/// A finalized bytecode image.
///
/// Invariant: every jump target in `code` was patched by the compiler
/// before the image was handed off; an unresolved label never reaches
/// the runtime. The final instruction is always the `End` sentinel.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub code: Vec<RawInst>,
    pub payloads: FxHashMap<usize, Payload>,
    /// Position → variable id for `SetVar`/`LoadVar`/`DeleteVar`/`CopyVar`.
    pub var_ids: FxHashMap<usize, u32>,
    /// Resolved label table, kept for the bytecode listing.
    pub labels: IndexMap<String, usize>,
    /// Interned id → name, for fault messages and memory dumps.
    pub names: Vec<String>,
}

impl Image {
    pub fn name_of(&self, id: u32) -> &str {
        self.names.get(id as usize).map(String::as_str).unwrap_or("?")
    }
}
