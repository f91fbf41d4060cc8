//! Lexer, token definitions, and classifier/linearizer for the Rill language.
//!
//! The pipeline front end: raw source text is tokenized by [`Lexer`], then
//! [`classify`] resolves identifier roles, imports, and rewrites every
//! infix expression run into postfix order for the compiler.

pub mod classify;
pub mod import;
pub mod lexer;
pub mod token;

pub use classify::{classify, Classified, ClassifyError, ImportBinding};
pub use import::ImportResolver;
pub use lexer::Lexer;
pub use token::{Literal, Span, Token, TokenKind};
