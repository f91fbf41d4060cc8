//! Bytecode image and stack virtual machine for the Rill language.
//!
//! The compiler hands the runtime an in-memory [`Image`]; `Machine::load`
//! translates the raw opcode bytes once into a dense, position-aligned
//! array of bound operations, so the execution loop is an array index and
//! an indirect call per step instead of an opcode decode.

pub mod error;
pub mod ffi;
pub mod image;
pub mod instruction;
pub mod machine;
pub mod store;
pub mod value;

pub use error::Fault;
pub use ffi::{ForeignFn, Natives};
pub use image::{Constant, Image, Payload, StructDef, VarDef};
pub use instruction::{Opcode, RawInst};
pub use machine::{Flow, Machine, Memory};
pub use store::{Store, Variable};
pub use value::{StructInstance, Value};
