//! Bytecode text listing.

use std::fmt::Write;

use rustc_hash::FxHashMap;

use rill_vm::image::{Constant, Image, Payload};
use rill_vm::instruction::Opcode;

/// Format an image as a position-annotated text listing.
pub fn disasm(image: &Image) -> String {
    let mut labels_at: FxHashMap<usize, Vec<&str>> = FxHashMap::default();
    for (name, pos) in &image.labels {
        labels_at.entry(*pos).or_default().push(name);
    }

    let mut out = String::new();
    for (pos, inst) in image.code.iter().enumerate() {
        if let Some(names) = labels_at.get(&pos) {
            for name in names {
                let _ = writeln!(out, "{name}:");
            }
        }
        let mnemonic = Opcode::try_from(inst.op)
            .map(|op| op.name())
            .unwrap_or("??");
        let _ = write!(out, "{pos:04}  {mnemonic:<14}");
        if inst.a != 0 {
            let _ = write!(out, " {}", inst.a);
        }
        match image.payloads.get(&pos) {
            Some(Payload::Const(c)) => {
                let _ = write!(out, " {}", format_constant(c));
            }
            Some(Payload::Var(def)) => {
                let _ = write!(out, " {}", def.name);
            }
            Some(Payload::Struct(def)) => {
                let _ = write!(out, " {}", def.name);
            }
            Some(Payload::Argc(n)) => {
                let _ = write!(out, " argc={n}");
            }
            None => {}
        }
        if let Some(id) = image.var_ids.get(&pos) {
            let _ = write!(out, " {}", image.name_of(*id));
        }
        let _ = writeln!(out);
    }
    out
}

fn format_constant(c: &Constant) -> String {
    match c {
        Constant::Number(n) => n.to_string(),
        Constant::Str(s) => format!("{s:?}"),
        Constant::Bool(b) => b.to_string(),
        Constant::Char(ch) => format!("{ch:?}"),
        Constant::Addr(a) => format!("@{a}"),
        Constant::Null => "null".to_string(),
    }
}
