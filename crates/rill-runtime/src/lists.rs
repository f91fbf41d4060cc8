//! `lists` library: growable-list helpers.

use rust_decimal::Decimal;

use rill_vm::error::Fault;
use rill_vm::ffi::Natives;
use rill_vm::machine::Machine;
use rill_vm::value::Value;

pub fn register(natives: &mut Natives) {
    natives.register("lists", "len", native_len);
    natives.register("lists", "append", native_append);
    natives.register("lists", "take", native_take);
    natives.register("lists", "contains", native_contains);
}

fn native_len(machine: &mut Machine) -> Result<(), Fault> {
    let len = match machine.pop()? {
        Value::List(items) => items.borrow().len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(Fault::BadOperand {
                op: "len",
                operand: other.type_name(),
            })
        }
    };
    machine.push(Value::Number(Decimal::from(len as u64)));
    Ok(())
}

/// `append(list, value)` grows the list in place; no result.
fn native_append(machine: &mut Machine) -> Result<(), Fault> {
    let value = machine.pop()?;
    match machine.pop()? {
        Value::List(items) => {
            items.borrow_mut().push(value);
            Ok(())
        }
        other => Err(Fault::BadOperand {
            op: "append",
            operand: other.type_name(),
        }),
    }
}

/// `take(list)` removes and returns the last element, or null when the
/// list is empty.
fn native_take(machine: &mut Machine) -> Result<(), Fault> {
    match machine.pop()? {
        Value::List(items) => {
            let taken = items.borrow_mut().pop().unwrap_or(Value::Null);
            machine.push(taken);
            Ok(())
        }
        other => Err(Fault::BadOperand {
            op: "take",
            operand: other.type_name(),
        }),
    }
}

fn native_contains(machine: &mut Machine) -> Result<(), Fault> {
    let scale = machine.eq_scale();
    let needle = machine.pop()?;
    match machine.pop()? {
        Value::List(items) => {
            let found = items.borrow().iter().any(|v| v.loose_eq(&needle, scale));
            machine.push(Value::Bool(found));
            Ok(())
        }
        other => Err(Fault::BadOperand {
            op: "contains",
            operand: other.type_name(),
        }),
    }
}
