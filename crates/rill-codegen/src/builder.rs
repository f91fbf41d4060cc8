//! Incremental image builder.
//!
//! Emission records jumps as `(label, patch position)` pairs; labels can
//! be defined after their first reference, so resolution is a final
//! fix-up over the complete list in [`ImageBuilder::finalize`]. An
//! undefined label at that point is a compile fault, never a runtime
//! condition. Finalize also appends the `End` sentinel.

use rustc_hash::FxHashMap;

use rill_vm::image::{Constant, Image, Payload, StructDef, VarDef};
use rill_vm::instruction::{Opcode, RawInst};

use crate::error::CompileError;

#[derive(Default)]
pub struct ImageBuilder {
    code: Vec<RawInst>,
    payloads: FxHashMap<usize, Payload>,
    var_ids: FxHashMap<usize, u32>,
    labels: indexmap::IndexMap<String, usize>,
    patches: Vec<(String, usize)>,
    names: Vec<String>,
    name_ids: FxHashMap<String, u32>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic, collision-free id for a name.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.name_ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.name_ids.insert(name.to_string(), id);
        id
    }

    /// Next emission position.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, op: Opcode, a: u32) -> usize {
        let pos = self.code.len();
        self.code.push(RawInst::new(op, a));
        pos
    }

    pub fn emit_const(&mut self, constant: Constant) -> usize {
        let pos = self.emit(Opcode::PushConst, 0);
        self.payloads.insert(pos, Payload::Const(constant));
        pos
    }

    pub fn emit_var(&mut self, op: Opcode, id: u32) -> usize {
        let pos = self.emit(op, 0);
        self.var_ids.insert(pos, id);
        pos
    }

    pub fn emit_create(&mut self, op: Opcode, def: VarDef) -> usize {
        let pos = self.emit(op, 0);
        self.payloads.insert(pos, Payload::Var(def));
        pos
    }

    pub fn emit_new_struct(&mut self, def: StructDef, argc: usize) -> usize {
        let pos = self.emit(Opcode::NewStruct, argc as u32);
        self.payloads.insert(pos, Payload::Struct(def));
        pos
    }

    pub fn emit_foreign(&mut self, index: u32, argc: usize) -> usize {
        let pos = self.emit(Opcode::CallForeign, index);
        self.payloads.insert(pos, Payload::Argc(argc));
        pos
    }

    /// Emit a jump whose target is resolved at finalize.
    pub fn emit_jump(&mut self, op: Opcode, label: &str) -> usize {
        let pos = self.emit(op, 0);
        self.patches.push((label.to_string(), pos));
        pos
    }

    /// Patch an already-emitted instruction's operand directly (used for
    /// return addresses, which are known once the call's jump is placed).
    pub fn patch(&mut self, pos: usize, a: u32) {
        self.code[pos].a = a;
    }

    pub fn set_label(&mut self, name: &str) -> Result<(), CompileError> {
        if self.labels.contains_key(name) {
            return Err(CompileError::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.code.len());
        Ok(())
    }

    /// Resolve every recorded patch, append the end sentinel, and hand
    /// off the image.
    pub fn finalize(mut self) -> Result<Image, CompileError> {
        for (label, pos) in &self.patches {
            let target = self
                .labels
                .get(label)
                .copied()
                .ok_or_else(|| CompileError::UndefinedLabel(label.clone()))?;
            self.code[*pos].a = target as u32;
        }
        self.code.push(RawInst::new(Opcode::End, 0));
        Ok(Image {
            code: self.code,
            payloads: self.payloads,
            var_ids: self.var_ids,
            labels: self.labels,
            names: self.names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jumps_resolve_at_finalize() {
        let mut b = ImageBuilder::new();
        let jump = b.emit_jump(Opcode::Goto, "later");
        b.emit(Opcode::Nop, 0);
        b.set_label("later").unwrap();
        b.emit(Opcode::Nop, 0);
        let image = b.finalize().unwrap();
        assert_eq!(image.code[jump].a, 2);
        assert_eq!(image.code.last().unwrap().op, Opcode::End as u8);
    }

    #[test]
    fn undefined_label_is_a_compile_fault() {
        let mut b = ImageBuilder::new();
        b.emit_jump(Opcode::Goto, "nowhere");
        let err = b.finalize().unwrap_err();
        assert_eq!(err, CompileError::UndefinedLabel("nowhere".to_string()));
    }

    #[test]
    fn interned_names_are_stable() {
        let mut b = ImageBuilder::new();
        let a = b.intern("a");
        let b2 = b.intern("b");
        assert_ne!(a, b2);
        assert_eq!(b.intern("a"), a);
    }
}
