//! Import resolution interface.
//!
//! The classifier resolves `import` directives against whatever registry
//! the embedder provides; the VM's foreign-function registry implements
//! this trait on the runtime side.

/// Resolves import directives to foreign-function indices.
pub trait ImportResolver {
    /// Resolve a single named function in a library.
    fn resolve(&self, library: &str, name: &str) -> Option<u32>;

    /// Enumerate every function a library exposes, for wildcard imports.
    /// `None` means the library itself is unknown.
    fn functions(&self, library: &str) -> Option<Vec<(String, u32)>>;
}
