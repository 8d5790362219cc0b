//! Backtrace demo - recurse a few levels, then print stacks
//!
//! Registers the demo's own methods, builds the symbol table in the
//! background and prints the main thread's stack from five calls deep, then
//! the stack of a parked worker thread.
//!
//! Run with: RUST_LOG=info cargo run --example main_thread

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use threadtrace::{type_metadata, SpawnedThread, ThreadRef};

struct Demo;

impl Demo {
    #[inline(never)]
    fn recurse(depth: u32) {
        if depth == 0 {
            Demo::report();
        } else {
            Demo::recurse(depth - 1);
        }
        std::hint::black_box(depth);
    }

    #[inline(never)]
    fn report() {
        println!("Main thread backtrace:");
        for line in threadtrace::capture_main_thread_symbols() {
            println!("  {line}");
        }
    }

    #[inline(never)]
    fn park(ready: mpsc::Sender<()>, stop: mpsc::Receiver<()>) {
        let _ = ready.send(());
        let _ = stop.recv();
    }
}

fn main() {
    env_logger::init();

    threadtrace::register_type(type_metadata!(Demo { recurse, report, park }));

    let build = threadtrace::initialize_symbol_table();
    if !build.wait_timeout(Duration::from_secs(5)) {
        println!("Symbol table not ready yet, using the dynamic loader");
    }

    Demo::recurse(5);

    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();
    let worker = match thread::Builder::new()
        .name("demo-worker".to_string())
        .spawn(move || Demo::park(ready_tx, stop_rx))
    {
        Ok(worker) => worker,
        Err(e) => {
            eprintln!("Could not start worker thread: {e}");
            return;
        }
    };
    let _ = ready_rx.recv();

    println!("\nWorker thread backtrace:");
    for symbol in threadtrace::capture_thread(ThreadRef::Other(&SpawnedThread::new(&worker))) {
        println!("  {}", threadtrace::global().format(&symbol));
    }

    let _ = stop_tx.send(());
    let _ = worker.join();
}
