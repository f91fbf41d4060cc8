//! The variable store.
//!
//! A flat, creation-ordered list of live bindings. Lookup scans from the
//! most recent binding backwards, so the newest binding of an id wins —
//! that last-match-wins rule is how shadowing and recursion-local
//! rebinding behave, without a stack frame per call. Ids come from the
//! compiler's name interner; the matching `CreateVar`/`DeleteVar` pairing
//! is the compiler's responsibility, not checked here.

use crate::error::Fault;
use crate::image::VarDef;
use crate::value::Value;

/// A live variable binding.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: u32,
    pub name: String,
    pub is_const: bool,
    pub value: Value,
}

#[derive(Debug, Default)]
pub struct Store {
    vars: Vec<Variable>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh binding, initialized to null.
    pub fn create(&mut self, def: &VarDef) {
        self.vars.push(Variable {
            id: def.id,
            name: def.name.clone(),
            is_const: def.is_const,
            value: Value::Null,
        });
    }

    /// Rebind: push a fresh binding reusing an existing id. Faults if no
    /// binding with that id is live.
    pub fn copy(&mut self, def: &VarDef) -> Result<(), Fault> {
        if self.find(def.id).is_none() {
            return Err(Fault::UnresolvedVariable {
                name: def.name.clone(),
            });
        }
        self.create(def);
        Ok(())
    }

    /// Remove the most recent binding of `id`.
    pub fn delete(&mut self, id: u32, name: &str) -> Result<(), Fault> {
        match self.vars.iter().rposition(|v| v.id == id) {
            Some(at) => {
                self.vars.remove(at);
                Ok(())
            }
            None => Err(Fault::UnresolvedVariable {
                name: name.to_string(),
            }),
        }
    }

    /// Most recent binding of `id`, if any.
    pub fn find(&self, id: u32) -> Option<&Variable> {
        self.vars.iter().rev().find(|v| v.id == id)
    }

    pub fn set(&mut self, id: u32, name: &str, value: Value) -> Result<(), Fault> {
        match self.vars.iter_mut().rev().find(|v| v.id == id) {
            Some(var) => {
                if var.is_const {
                    return Err(Fault::ConstAssignment {
                        name: var.name.clone(),
                    });
                }
                var.value = value;
                Ok(())
            }
            None => Err(Fault::UnresolvedVariable {
                name: name.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn into_vec(self) -> Vec<Variable> {
        self.vars
    }

    pub fn to_vec(&self) -> Vec<Variable> {
        self.vars.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn def(id: u32, name: &str) -> VarDef {
        VarDef {
            id,
            name: name.to_string(),
            is_const: false,
        }
    }

    #[test]
    fn newest_binding_wins_and_delete_restores() {
        let mut store = Store::new();
        let outer = def(1, "i");
        store.create(&outer);
        store.set(1, "i", Value::Number(Decimal::ONE)).unwrap();

        // inner shadow
        store.create(&def(1, "i"));
        store.set(1, "i", Value::Number(Decimal::TWO)).unwrap();
        match &store.find(1).unwrap().value {
            Value::Number(n) => assert_eq!(*n, Decimal::TWO),
            other => panic!("unexpected value {other:?}"),
        }

        store.delete(1, "i").unwrap();
        match &store.find(1).unwrap().value {
            Value::Number(n) => assert_eq!(*n, Decimal::ONE),
            other => panic!("unexpected value {other:?}"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn const_bindings_reject_assignment() {
        let mut store = Store::new();
        store.create(&VarDef {
            id: 2,
            name: "pi".to_string(),
            is_const: true,
        });
        let err = store.set(2, "pi", Value::Null).unwrap_err();
        assert_eq!(
            err,
            Fault::ConstAssignment {
                name: "pi".to_string()
            }
        );
    }

    #[test]
    fn missing_id_faults() {
        let mut store = Store::new();
        assert!(store.delete(9, "ghost").is_err());
        assert!(store.set(9, "ghost", Value::Null).is_err());
        assert!(store.find(9).is_none());
    }
}
