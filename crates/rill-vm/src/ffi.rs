//! Foreign function registry.
//!
//! A foreign function is called by numeric index with the running machine
//! as its only argument: it pops its own arguments off the shared operand
//! stack (in push order) and pushes at most one result. Libraries are
//! flat name groups inside one registry; the classifier resolves `import`
//! directives against it through the syntax crate's resolver trait.

use crate::error::Fault;
use crate::machine::Machine;

/// A foreign function bound into the registry.
pub type ForeignFn = fn(&mut Machine) -> Result<(), Fault>;

#[derive(Debug, Clone, Default)]
pub struct Natives {
    funcs: Vec<(String, String, ForeignFn)>,
}

impl Natives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under a library name; returns its call index.
    pub fn register(&mut self, library: &str, name: &str, f: ForeignFn) -> u32 {
        let index = self.funcs.len() as u32;
        self.funcs.push((library.to_string(), name.to_string(), f));
        index
    }

    pub fn get(&self, index: u32) -> Option<ForeignFn> {
        self.funcs.get(index as usize).map(|(_, _, f)| *f)
    }

    pub fn find(&self, library: &str, name: &str) -> Option<u32> {
        self.funcs
            .iter()
            .position(|(lib, n, _)| lib == library && n == name)
            .map(|i| i as u32)
    }

    /// All functions a library exposes; `None` if the library name is
    /// unknown.
    pub fn library(&self, library: &str) -> Option<Vec<(String, u32)>> {
        let found: Vec<(String, u32)> = self
            .funcs
            .iter()
            .enumerate()
            .filter(|(_, (lib, _, _))| lib == library)
            .map(|(i, (_, n, _))| (n.clone(), i as u32))
            .collect();
        if found.is_empty() {
            None
        } else {
            Some(found)
        }
    }
}
