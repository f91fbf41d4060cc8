//! `console` library: terminal I/O.

use std::io::{self, BufRead, Write};

use rill_vm::error::Fault;
use rill_vm::ffi::Natives;
use rill_vm::machine::Machine;
use rill_vm::value::Value;

pub fn register(natives: &mut Natives) {
    natives.register("console", "print", native_print);
    natives.register("console", "println", native_println);
    natives.register("console", "readline", native_readline);
}

fn joined_args(machine: &mut Machine) -> Result<String, Fault> {
    let args = machine.pop_args(machine.arg_count())?;
    Ok(args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" "))
}

fn native_print(machine: &mut Machine) -> Result<(), Fault> {
    let text = joined_args(machine)?;
    print!("{text}");
    let _ = io::stdout().flush();
    Ok(())
}

fn native_println(machine: &mut Machine) -> Result<(), Fault> {
    let text = joined_args(machine)?;
    println!("{text}");
    Ok(())
}

fn native_readline(machine: &mut Machine) -> Result<(), Fault> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| Fault::Foreign(format!("readline: {e}")))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    machine.push(Value::Str(line));
    Ok(())
}
