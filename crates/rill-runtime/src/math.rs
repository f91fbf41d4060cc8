//! `math` library: numeric helpers over the fixed-point decimal type.

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;

use rill_vm::error::Fault;
use rill_vm::ffi::Natives;
use rill_vm::machine::Machine;
use rill_vm::value::Value;

pub fn register(natives: &mut Natives) {
    natives.register("math", "abs", native_abs);
    natives.register("math", "min", native_min);
    natives.register("math", "max", native_max);
    natives.register("math", "floor", native_floor);
    natives.register("math", "ceil", native_ceil);
    natives.register("math", "round", native_round);
    natives.register("math", "sqrt", native_sqrt);
}

fn number(machine: &mut Machine) -> Result<Decimal, Fault> {
    match machine.pop()? {
        Value::Number(n) => Ok(n),
        other => Err(Fault::BadOperand {
            op: "math",
            operand: other.type_name(),
        }),
    }
}

fn native_abs(machine: &mut Machine) -> Result<(), Fault> {
    let n = number(machine)?;
    machine.push(Value::Number(n.abs()));
    Ok(())
}

fn native_min(machine: &mut Machine) -> Result<(), Fault> {
    let b = number(machine)?;
    let a = number(machine)?;
    machine.push(Value::Number(a.min(b)));
    Ok(())
}

fn native_max(machine: &mut Machine) -> Result<(), Fault> {
    let b = number(machine)?;
    let a = number(machine)?;
    machine.push(Value::Number(a.max(b)));
    Ok(())
}

fn native_floor(machine: &mut Machine) -> Result<(), Fault> {
    let n = number(machine)?;
    machine.push(Value::Number(n.floor()));
    Ok(())
}

fn native_ceil(machine: &mut Machine) -> Result<(), Fault> {
    let n = number(machine)?;
    machine.push(Value::Number(n.ceil()));
    Ok(())
}

fn native_round(machine: &mut Machine) -> Result<(), Fault> {
    let n = number(machine)?;
    machine.push(Value::Number(n.round()));
    Ok(())
}

fn native_sqrt(machine: &mut Machine) -> Result<(), Fault> {
    let n = number(machine)?;
    let root = n
        .sqrt()
        .ok_or_else(|| Fault::Foreign("sqrt of a negative number".to_string()))?;
    machine.push(Value::Number(root));
    Ok(())
}
