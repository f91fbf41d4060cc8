//! The execution driver.
//!
//! Each compiled program runs on its own thread with its own operand
//! stack, variable store, and call trace. A process-wide outstanding-
//! program counter is incremented on launch and decremented on
//! completion; `wait_all` blocks until it returns to zero. The first
//! uncaught fault across all running programs is reported once — a latch
//! suppresses every later report so output never interleaves, and the
//! same latch gates the all-succeeded message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use rill_runtime::Stdlib;
use rill_vm::error::Fault;
use rill_vm::ffi::Natives;
use rill_vm::image::Image;
use rill_vm::machine::{Machine, Memory};

use crate::EngineError;

struct Shared {
    outstanding: Mutex<usize>,
    all_done: Condvar,
    faulted: AtomicBool,
}

/// Spawns and waits on VM runtime instances.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                outstanding: Mutex::new(0),
                all_done: Condvar::new(),
                faulted: AtomicBool::new(false),
            }),
        }
    }

    /// Launch a program on its own thread. The image and registry move
    /// into the thread; the machine itself is built there and never
    /// leaves it.
    pub fn launch(&self, image: Image, natives: Natives) {
        *self.shared.outstanding.lock() += 1;
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            let outcome = run_program(image, natives);
            if let Err((fault, memory)) = outcome {
                // first fault wins; later ones stay quiet
                if !shared.faulted.swap(true, Ordering::SeqCst) {
                    eprintln!("fault: {fault}");
                    if let Some(memory) = memory {
                        eprint!("{memory}");
                    }
                }
            }
            let mut outstanding = shared.outstanding.lock();
            *outstanding -= 1;
            if *outstanding == 0 {
                shared.all_done.notify_all();
            }
        });
    }

    /// Block until every launched program has completed or faulted.
    pub fn wait_all(&self) {
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding > 0 {
            self.shared.all_done.wait(&mut outstanding);
        }
    }

    pub fn had_fault(&self) -> bool {
        self.shared.faulted.load(Ordering::SeqCst)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn run_program(image: Image, natives: Natives) -> Result<(), (Fault, Option<Memory>)> {
    let mut machine = match Machine::load(image, natives) {
        Ok(machine) => machine,
        Err(fault) => return Err((fault, None)),
    };
    match machine.run() {
        Ok(()) => Ok(()),
        Err(fault) => Err((fault, Some(machine.memory()))),
    }
}

/// Compile and run one program, block until it completes, and print the
/// elapsed time — or let the fault report speak.
pub fn run_and_wait(source: &str) -> Result<(), EngineError> {
    let stdlib = Stdlib::new();
    let image = compile_with(&stdlib, source)?;
    let supervisor = Supervisor::new();
    let start = Instant::now();
    supervisor.launch(image, stdlib.natives());
    supervisor.wait_all();
    if !supervisor.had_fault() {
        println!("completed in {:?}", start.elapsed());
    }
    Ok(())
}

/// Compile and launch a batch of programs, then block until all are
/// done. Success is only announced when no program faulted.
pub fn run_many(sources: &[String]) -> Result<(), EngineError> {
    let stdlib = Stdlib::new();
    let supervisor = Supervisor::new();
    for source in sources {
        let image = compile_with(&stdlib, source)?;
        supervisor.launch(image, stdlib.natives());
    }
    supervisor.wait_all();
    if !supervisor.had_fault() {
        println!("all programs completed successfully");
    }
    Ok(())
}

/// Result of the synchronous debug entry point.
#[derive(Debug)]
pub struct DebugReport {
    pub elapsed: Duration,
    pub memory: Memory,
}

/// Compile and execute synchronously on the calling thread, returning
/// elapsed time and the final memory state for inspection.
pub fn debug_run(source: &str) -> Result<DebugReport, EngineError> {
    let stdlib = Stdlib::new();
    let image = compile_with(&stdlib, source)?;
    let mut machine = Machine::load(image, stdlib.natives())?;
    let start = Instant::now();
    machine.run()?;
    Ok(DebugReport {
        elapsed: start.elapsed(),
        memory: machine.memory(),
    })
}

fn compile_with(stdlib: &Stdlib, source: &str) -> Result<Image, EngineError> {
    crate::compile(source, stdlib)
}
