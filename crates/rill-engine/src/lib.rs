//! Compilation pipeline and execution driver for the Rill language.
//!
//! [`compile`] is a self-contained run of the front end: lexer, then
//! classifier, then compiler. Nothing is shared between calls, so
//! concurrent compilations of independent programs never interfere.
//! [`Supervisor`] runs compiled programs, each on its own thread with its
//! own private memory, and reports the first uncaught fault.

mod driver;

pub use driver::{debug_run, run_and_wait, run_many, DebugReport, Supervisor};

use thiserror::Error;

use rill_syntax::classify::{classify, ClassifyError};
use rill_syntax::import::ImportResolver;
use rill_syntax::lexer::Lexer;
use rill_codegen::CompileError;
use rill_vm::error::Fault;
use rill_vm::image::Image;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("classify error: {0}")]
    Classify(#[from] ClassifyError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("runtime fault: {0}")]
    Fault(#[from] Fault),
}

/// Compile one source string into a finalized image.
pub fn compile(source: &str, resolver: &dyn ImportResolver) -> Result<Image, EngineError> {
    let tokens = Lexer::new(source).tokenize();
    let classified = classify(tokens, resolver)?;
    let image = rill_codegen::compile(&classified)?;
    Ok(image)
}
