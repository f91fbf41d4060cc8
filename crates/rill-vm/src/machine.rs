//! The virtual machine.
//!
//! Load-time assembly scans the opcode byte sequence once, translating
//! each opcode through a fixed table into a bound operation and appending
//! it to a dense, index-aligned dispatch array; the payload side tables
//! are densified into position-indexed vectors at the same time. The
//! execution loop is then an array index and an indirect call per step.
//! An unrecognized opcode byte is a load fault, never an execution-time
//! condition.

use std::fmt;

use crate::error::Fault;
use crate::ffi::Natives;
use crate::image::{Image, Payload, StructDef, VarDef};
use crate::instruction::{Opcode, RawInst};
use crate::store::{Store, Variable};
use crate::value::{StructInstance, Value};

/// What an operation tells the execution loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Advance the instruction pointer by one.
    Next,
    /// Overwrite the instruction pointer.
    Jump(usize),
    /// Stop execution.
    Halt,
}

/// A bound operation in the dispatch array.
pub type OpFn = fn(&mut Machine) -> Result<Flow, Fault>;

/// Snapshot of a machine's private memory, returned by the debug entry
/// point and included in fault reports.
#[derive(Debug, Clone)]
pub struct Memory {
    pub stack: Vec<Value>,
    pub variables: Vec<Variable>,
    pub call_trace: Vec<usize>,
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "operand stack (top first):")?;
        if self.stack.is_empty() {
            writeln!(f, "  (empty)")?;
        }
        for value in self.stack.iter().rev() {
            writeln!(f, "  {value}")?;
        }
        writeln!(f, "variables:")?;
        if self.variables.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for var in &self.variables {
            if var.is_const {
                writeln!(f, "  const {} = {}", var.name, var.value)?;
            } else {
                writeln!(f, "  {} = {}", var.name, var.value)?;
            }
        }
        writeln!(f, "call trace:")?;
        if self.call_trace.is_empty() {
            writeln!(f, "  (empty)")?;
        }
        for addr in self.call_trace.iter().rev() {
            writeln!(f, "  @{addr}")?;
        }
        Ok(())
    }
}

/// A loaded program: the dispatch array, the densified side tables, and
/// the program's private memory (operand stack, variable store, call
/// trace). Nothing here is shared with any other machine.
#[derive(Debug)]
pub struct Machine {
    ops: Vec<OpFn>,
    code: Vec<RawInst>,
    consts: Vec<Option<Value>>,
    var_defs: Vec<Option<VarDef>>,
    struct_defs: Vec<Option<StructDef>>,
    argcs: Vec<u32>,
    var_ids: Vec<u32>,
    names: Vec<String>,
    natives: Natives,
    pc: usize,
    stack: Vec<Value>,
    store: Store,
    call_trace: Vec<usize>,
    eq_scale: u32,
}

/// Sentinel for "no variable id recorded at this position".
const NO_VAR: u32 = u32::MAX;

/// Default fractional-digit rounding applied before numeric equality.
const DEFAULT_EQ_SCALE: u32 = 24;

/// The fixed table: one bound operation per instruction kind.
fn bound_op(op: Opcode) -> OpFn {
    match op {
        Opcode::Nop => Machine::op_nop,
        Opcode::PushConst => Machine::op_push_const,
        Opcode::Add => Machine::op_add,
        Opcode::Sub => Machine::op_sub,
        Opcode::Mul => Machine::op_mul,
        Opcode::Div => Machine::op_div,
        Opcode::Mod => Machine::op_mod,
        Opcode::Neg => Machine::op_neg,
        Opcode::Eq => Machine::op_eq,
        Opcode::Ne => Machine::op_ne,
        Opcode::Lt => Machine::op_lt,
        Opcode::Gt => Machine::op_gt,
        Opcode::And => Machine::op_and,
        Opcode::Or => Machine::op_or,
        Opcode::Not => Machine::op_not,
        Opcode::CreateVar => Machine::op_create_var,
        Opcode::CopyVar => Machine::op_copy_var,
        Opcode::DeleteVar => Machine::op_delete_var,
        Opcode::SetVar => Machine::op_set_var,
        Opcode::LoadVar => Machine::op_load_var,
        Opcode::NewList => Machine::op_new_list,
        Opcode::IndexGet => Machine::op_index_get,
        Opcode::IndexSet => Machine::op_index_set,
        Opcode::NewStruct => Machine::op_new_struct,
        Opcode::LoadField => Machine::op_load_field,
        Opcode::SetField => Machine::op_set_field,
        Opcode::Goto => Machine::op_goto,
        Opcode::GotoIfFalse => Machine::op_goto_if_false,
        Opcode::PushAddr => Machine::op_push_addr,
        Opcode::Ret => Machine::op_ret,
        Opcode::CallForeign => Machine::op_call_foreign,
        Opcode::Halt => Machine::op_halt,
        Opcode::End => Machine::op_halt,
    }
}

impl Machine {
    /// Load-time assembly. Fails on an unrecognized opcode byte.
    pub fn load(image: Image, natives: Natives) -> Result<Self, Fault> {
        let len = image.code.len();
        let mut ops: Vec<OpFn> = Vec::with_capacity(len);
        for (at, raw) in image.code.iter().enumerate() {
            let op = Opcode::try_from(raw.op)
                .map_err(|_| Fault::UnknownOpcode { op: raw.op, at })?;
            ops.push(bound_op(op));
        }

        let mut consts: Vec<Option<Value>> = vec![None; len];
        let mut var_defs: Vec<Option<VarDef>> = vec![None; len];
        let mut struct_defs: Vec<Option<StructDef>> = vec![None; len];
        let mut argcs: Vec<u32> = vec![0; len];
        for (pos, payload) in image.payloads {
            if pos >= len {
                continue;
            }
            match payload {
                Payload::Const(c) => consts[pos] = Some(Value::from(c)),
                Payload::Var(d) => var_defs[pos] = Some(d),
                Payload::Struct(s) => struct_defs[pos] = Some(s),
                Payload::Argc(n) => argcs[pos] = n as u32,
            }
        }
        let mut var_ids: Vec<u32> = vec![NO_VAR; len];
        for (pos, id) in image.var_ids {
            if pos < len {
                var_ids[pos] = id;
            }
        }

        Ok(Self {
            ops,
            code: image.code,
            consts,
            var_defs,
            struct_defs,
            argcs,
            var_ids,
            names: image.names,
            natives,
            pc: 0,
            stack: Vec::new(),
            store: Store::new(),
            call_trace: Vec::new(),
            eq_scale: DEFAULT_EQ_SCALE,
        })
    }

    /// Configure the fractional-digit rounding used by numeric equality.
    pub fn set_eq_scale(&mut self, scale: u32) {
        self.eq_scale = scale;
    }

    /// The fractional-digit rounding used by numeric equality.
    pub fn eq_scale(&self) -> u32 {
        self.eq_scale
    }

    /// Execute from position 0 until the halt sentinel or the end of the
    /// image. The pointer advances by one per operation unless the
    /// operation overwrites it.
    pub fn run(&mut self) -> Result<(), Fault> {
        self.pc = 0;
        while self.pc < self.ops.len() {
            let op = self.ops[self.pc];
            match op(self)? {
                Flow::Next => self.pc += 1,
                Flow::Jump(target) => self.pc = target,
                Flow::Halt => break,
            }
        }
        Ok(())
    }

    /// Snapshot the private memory for inspection or a fault report.
    pub fn memory(&self) -> Memory {
        Memory {
            stack: self.stack.clone(),
            variables: self.store.to_vec(),
            call_trace: self.call_trace.clone(),
        }
    }

    // === Handle surface for foreign functions ===

    pub fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Argument count attached to the foreign call being executed.
    pub fn arg_count(&self) -> usize {
        self.argcs.get(self.pc).copied().unwrap_or(0) as usize
    }

    /// Pop `n` values, restoring push order.
    pub fn pop_args(&mut self, n: usize) -> Result<Vec<Value>, Fault> {
        let mut args = Vec::with_capacity(n);
        for _ in 0..n {
            args.push(self.pop()?);
        }
        args.reverse();
        Ok(args)
    }

    // === Internal helpers ===

    fn pop2(&mut self) -> Result<(Value, Value), Fault> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        Ok((lhs, rhs))
    }

    fn var_id(&self) -> Result<u32, Fault> {
        match self.var_ids[self.pc] {
            NO_VAR => Err(Fault::MissingPayload { at: self.pc }),
            id => Ok(id),
        }
    }

    fn var_name(&self, id: u32) -> String {
        self.names
            .get(id as usize)
            .cloned()
            .unwrap_or_else(|| format!("#{id}"))
    }

    // === Operations ===

    fn op_nop(_m: &mut Machine) -> Result<Flow, Fault> {
        Ok(Flow::Next)
    }

    fn op_push_const(m: &mut Machine) -> Result<Flow, Fault> {
        let value = m.consts[m.pc]
            .clone()
            .ok_or(Fault::MissingPayload { at: m.pc })?;
        m.stack.push(value);
        Ok(Flow::Next)
    }

    fn op_add(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        m.stack.push(lhs.add(rhs)?);
        Ok(Flow::Next)
    }

    fn op_sub(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        m.stack.push(lhs.sub(rhs)?);
        Ok(Flow::Next)
    }

    fn op_mul(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        m.stack.push(lhs.mul(rhs)?);
        Ok(Flow::Next)
    }

    fn op_div(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        m.stack.push(lhs.div(rhs)?);
        Ok(Flow::Next)
    }

    fn op_mod(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        m.stack.push(lhs.rem(rhs)?);
        Ok(Flow::Next)
    }

    fn op_neg(m: &mut Machine) -> Result<Flow, Fault> {
        let value = m.pop()?;
        m.stack.push(value.neg()?);
        Ok(Flow::Next)
    }

    fn op_eq(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        let eq = lhs.loose_eq(&rhs, m.eq_scale);
        m.stack.push(Value::Bool(eq));
        Ok(Flow::Next)
    }

    fn op_ne(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        let eq = lhs.loose_eq(&rhs, m.eq_scale);
        m.stack.push(Value::Bool(!eq));
        Ok(Flow::Next)
    }

    fn op_lt(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        let lt = lhs.lt(&rhs)?;
        m.stack.push(Value::Bool(lt));
        Ok(Flow::Next)
    }

    fn op_gt(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        let gt = lhs.gt(&rhs)?;
        m.stack.push(Value::Bool(gt));
        Ok(Flow::Next)
    }

    fn op_and(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        let result = lhs.truthy()? && rhs.truthy()?;
        m.stack.push(Value::Bool(result));
        Ok(Flow::Next)
    }

    fn op_or(m: &mut Machine) -> Result<Flow, Fault> {
        let (lhs, rhs) = m.pop2()?;
        let result = lhs.truthy()? || rhs.truthy()?;
        m.stack.push(Value::Bool(result));
        Ok(Flow::Next)
    }

    fn op_not(m: &mut Machine) -> Result<Flow, Fault> {
        let value = m.pop()?;
        m.stack.push(value.not()?);
        Ok(Flow::Next)
    }

    fn op_create_var(m: &mut Machine) -> Result<Flow, Fault> {
        let def = m.var_defs[m.pc]
            .clone()
            .ok_or(Fault::MissingPayload { at: m.pc })?;
        m.store.create(&def);
        Ok(Flow::Next)
    }

    fn op_copy_var(m: &mut Machine) -> Result<Flow, Fault> {
        let def = m.var_defs[m.pc]
            .clone()
            .ok_or(Fault::MissingPayload { at: m.pc })?;
        m.store.copy(&def)?;
        Ok(Flow::Next)
    }

    fn op_delete_var(m: &mut Machine) -> Result<Flow, Fault> {
        let id = m.var_id()?;
        let name = m.var_name(id);
        m.store.delete(id, &name)?;
        Ok(Flow::Next)
    }

    fn op_set_var(m: &mut Machine) -> Result<Flow, Fault> {
        let id = m.var_id()?;
        let name = m.var_name(id);
        let value = m.pop()?;
        m.store.set(id, &name, value)?;
        Ok(Flow::Next)
    }

    fn op_load_var(m: &mut Machine) -> Result<Flow, Fault> {
        let id = m.var_id()?;
        let value = match m.store.find(id) {
            Some(var) => var.value.clone(),
            None => {
                let name = m.var_name(id);
                return Err(Fault::UnresolvedVariable { name });
            }
        };
        m.stack.push(value);
        Ok(Flow::Next)
    }

    fn op_new_list(m: &mut Machine) -> Result<Flow, Fault> {
        let count = m.code[m.pc].a as usize;
        let items = m.pop_args(count)?;
        m.stack.push(Value::list(items));
        Ok(Flow::Next)
    }

    fn op_index_get(m: &mut Machine) -> Result<Flow, Fault> {
        let index = m.pop()?.as_index()?;
        let target = m.pop()?;
        let value = match target {
            Value::List(items) => {
                let items = items.borrow();
                items
                    .get(index)
                    .cloned()
                    .ok_or(Fault::IndexOutOfBounds {
                        index,
                        len: items.len(),
                    })?
            }
            Value::Str(s) => s
                .chars()
                .nth(index)
                .map(Value::Char)
                .ok_or(Fault::IndexOutOfBounds {
                    index,
                    len: s.chars().count(),
                })?,
            other => {
                return Err(Fault::BadOperand {
                    op: "elemOf",
                    operand: other.type_name(),
                })
            }
        };
        m.stack.push(value);
        Ok(Flow::Next)
    }

    fn op_index_set(m: &mut Machine) -> Result<Flow, Fault> {
        let target = m.pop()?;
        let value = m.pop()?;
        let index = m.pop()?.as_index()?;
        match target {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                match items.get_mut(index) {
                    Some(slot) => *slot = value,
                    None => return Err(Fault::IndexOutOfBounds { index, len }),
                }
            }
            other => {
                return Err(Fault::BadOperand {
                    op: "setElem",
                    operand: other.type_name(),
                })
            }
        }
        Ok(Flow::Next)
    }

    fn op_new_struct(m: &mut Machine) -> Result<Flow, Fault> {
        let def = m.struct_defs[m.pc]
            .clone()
            .ok_or(Fault::MissingPayload { at: m.pc })?;
        let argc = m.code[m.pc].a as usize;
        let args = m.pop_args(argc)?;
        let mut fields = indexmap::IndexMap::with_capacity(def.fields.len());
        for (i, field) in def.fields.iter().enumerate() {
            fields.insert(*field, args.get(i).cloned().unwrap_or(Value::Null));
        }
        m.stack.push(Value::Struct(std::rc::Rc::new(
            std::cell::RefCell::new(StructInstance {
                type_name: def.name,
                fields,
            }),
        )));
        Ok(Flow::Next)
    }

    fn op_load_field(m: &mut Machine) -> Result<Flow, Fault> {
        let field = m.code[m.pc].a;
        let target = m.pop()?;
        let value = match target {
            Value::Struct(inst) => {
                let inst = inst.borrow();
                inst.fields
                    .get(&field)
                    .cloned()
                    .ok_or_else(|| Fault::UnknownField {
                        type_name: inst.type_name.clone(),
                        field: m.var_name(field),
                    })?
            }
            other => {
                return Err(Fault::BadOperand {
                    op: "field access",
                    operand: other.type_name(),
                })
            }
        };
        m.stack.push(value);
        Ok(Flow::Next)
    }

    fn op_set_field(m: &mut Machine) -> Result<Flow, Fault> {
        let field = m.code[m.pc].a;
        let target = m.pop()?;
        let value = m.pop()?;
        match target {
            Value::Struct(inst) => {
                let mut inst = inst.borrow_mut();
                match inst.fields.get_mut(&field) {
                    Some(slot) => *slot = value,
                    None => {
                        let type_name = inst.type_name.clone();
                        return Err(Fault::UnknownField {
                            type_name,
                            field: m.var_name(field),
                        });
                    }
                }
            }
            other => {
                return Err(Fault::BadOperand {
                    op: "field assignment",
                    operand: other.type_name(),
                })
            }
        }
        Ok(Flow::Next)
    }

    fn op_goto(m: &mut Machine) -> Result<Flow, Fault> {
        Ok(Flow::Jump(m.code[m.pc].a as usize))
    }

    fn op_goto_if_false(m: &mut Machine) -> Result<Flow, Fault> {
        let condition = m.pop()?;
        if condition.truthy()? {
            Ok(Flow::Next)
        } else {
            Ok(Flow::Jump(m.code[m.pc].a as usize))
        }
    }

    fn op_push_addr(m: &mut Machine) -> Result<Flow, Fault> {
        let addr = m.code[m.pc].a as usize;
        m.stack.push(Value::Addr(addr));
        m.call_trace.push(addr);
        Ok(Flow::Next)
    }

    fn op_ret(m: &mut Machine) -> Result<Flow, Fault> {
        match m.pop()? {
            Value::Addr(target) => {
                m.call_trace.pop();
                Ok(Flow::Jump(target))
            }
            // A return value sits above the address; put it back after
            // consuming the address beneath it.
            value => match m.pop()? {
                Value::Addr(target) => {
                    m.call_trace.pop();
                    m.stack.push(value);
                    Ok(Flow::Jump(target))
                }
                _ => Err(Fault::MissingReturnAddress),
            },
        }
    }

    fn op_call_foreign(m: &mut Machine) -> Result<Flow, Fault> {
        let index = m.code[m.pc].a;
        let func = m
            .natives
            .get(index)
            .ok_or(Fault::UnknownForeign { index })?;
        func(m)?;
        Ok(Flow::Next)
    }

    fn op_halt(_m: &mut Machine) -> Result<Flow, Fault> {
        Ok(Flow::Halt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Constant;
    use rust_decimal::Decimal;
    use rustc_hash::FxHashMap;

    fn number(n: i64) -> Constant {
        Constant::Number(Decimal::from(n))
    }

    struct Asm {
        code: Vec<RawInst>,
        payloads: FxHashMap<usize, Payload>,
        var_ids: FxHashMap<usize, u32>,
        names: Vec<String>,
    }

    impl Asm {
        fn new() -> Self {
            Self {
                code: Vec::new(),
                payloads: FxHashMap::default(),
                var_ids: FxHashMap::default(),
                names: Vec::new(),
            }
        }

        fn push_const(mut self, c: Constant) -> Self {
            self.payloads
                .insert(self.code.len(), Payload::Const(c));
            self.code.push(RawInst::new(Opcode::PushConst, 0));
            self
        }

        fn op(mut self, op: Opcode, a: u32) -> Self {
            self.code.push(RawInst::new(op, a));
            self
        }

        fn var_op(mut self, op: Opcode, id: u32) -> Self {
            self.var_ids.insert(self.code.len(), id);
            self.code.push(RawInst::new(op, 0));
            self
        }

        fn create(mut self, id: u32, name: &str) -> Self {
            self.payloads.insert(
                self.code.len(),
                Payload::Var(VarDef {
                    id,
                    name: name.to_string(),
                    is_const: false,
                }),
            );
            while self.names.len() <= id as usize {
                self.names.push(String::new());
            }
            self.names[id as usize] = name.to_string();
            self.code.push(RawInst::new(Opcode::CreateVar, 0));
            self
        }

        fn build(mut self) -> Image {
            self.code.push(RawInst::new(Opcode::End, 0));
            Image {
                code: self.code,
                payloads: self.payloads,
                var_ids: self.var_ids,
                labels: Default::default(),
                names: self.names,
            }
        }
    }

    fn run(image: Image) -> Machine {
        let mut machine = Machine::load(image, Natives::new()).expect("load");
        machine.run().expect("run");
        machine
    }

    #[test]
    fn arithmetic_on_the_stack() {
        let image = Asm::new()
            .push_const(number(2))
            .push_const(number(3))
            .op(Opcode::Add, 0)
            .build();
        let machine = run(image);
        let memory = machine.memory();
        assert_eq!(memory.stack.len(), 1);
        assert_eq!(memory.stack[0].to_string(), "5");
    }

    #[test]
    fn unknown_opcode_is_a_load_fault() {
        let image = Image {
            code: vec![RawInst { op: 0xEE, a: 0 }],
            ..Default::default()
        };
        let err = Machine::load(image, Natives::new()).unwrap_err();
        assert_eq!(err, Fault::UnknownOpcode { op: 0xEE, at: 0 });
    }

    #[test]
    fn stack_underflow_is_a_runtime_fault() {
        let image = Asm::new().op(Opcode::Add, 0).build();
        let mut machine = Machine::load(image, Natives::new()).unwrap();
        assert_eq!(machine.run().unwrap_err(), Fault::StackUnderflow);
    }

    #[test]
    fn conditional_jump_skips_on_false() {
        // 0: push false  1: jump-if-false -> 4  2: push 1  3: end  4: push 2  5: end
        let image = Asm::new()
            .push_const(Constant::Bool(false))
            .op(Opcode::GotoIfFalse, 4)
            .push_const(number(1))
            .op(Opcode::Halt, 0)
            .push_const(number(2))
            .build();
        let machine = run(image);
        assert_eq!(machine.memory().stack[0].to_string(), "2");
    }

    #[test]
    fn variables_create_set_load_delete() {
        let image = Asm::new()
            .create(0, "a")
            .push_const(number(7))
            .var_op(Opcode::SetVar, 0)
            .var_op(Opcode::LoadVar, 0)
            .var_op(Opcode::DeleteVar, 0)
            .build();
        let machine = run(image);
        let memory = machine.memory();
        assert_eq!(memory.stack[0].to_string(), "7");
        assert!(memory.variables.is_empty());
    }

    #[test]
    fn deleting_a_missing_variable_faults() {
        let image = Asm::new().var_op(Opcode::DeleteVar, 3).build();
        let mut machine = Machine::load(image, Natives::new()).unwrap();
        assert!(matches!(
            machine.run().unwrap_err(),
            Fault::UnresolvedVariable { .. }
        ));
    }

    #[test]
    fn return_carries_a_value_over_the_address() {
        // 0: push_addr 5  1: goto 3  2: halt  3: push 42  4: ret  5: end
        let image = Asm::new()
            .op(Opcode::PushAddr, 5)
            .op(Opcode::Goto, 3)
            .op(Opcode::Halt, 0)
            .push_const(number(42))
            .op(Opcode::Ret, 0)
            .build();
        let machine = run(image);
        let memory = machine.memory();
        assert_eq!(memory.stack.len(), 1);
        assert_eq!(memory.stack[0].to_string(), "42");
        assert!(memory.call_trace.is_empty());
    }

    #[test]
    fn unregistered_foreign_index_faults() {
        let image = Asm::new().op(Opcode::CallForeign, 9).build();
        let mut machine = Machine::load(image, Natives::new()).unwrap();
        assert_eq!(
            machine.run().unwrap_err(),
            Fault::UnknownForeign { index: 9 }
        );
    }
}
