use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use threadtrace::capture::{SignalFrameWalker, StackCapturer};
use threadtrace::symbolization::{DladdrLoader, Strategy, SymbolResolver};
use threadtrace::threads::{ProcThreadRegistry, ThreadResolver};
use threadtrace::{Backtracer, SpawnedThread, ThreadRef, Tid, TraceConfig};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn backtracer(dir: &TempDir) -> Backtracer {
    Backtracer::new(
        TraceConfig::default()
            .with_cache_dir(dir.path())
            .with_app_version("test")
            .with_reply_timeout(Duration::from_millis(500)),
    )
}

#[test]
fn test_current_thread_lines() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let tracer = backtracer(&dir);

    let lines = tracer.capture_current_thread_symbols();
    assert!(!lines.is_empty(), "the calling thread always has frames");
    for (i, line) in lines.iter().enumerate() {
        assert!(line.starts_with(&format!("{i:<4}")), "unexpected line: {line}");
        assert!(line.contains(" 0x"), "unexpected line: {line}");
        assert!(line.contains(" + "), "unexpected line: {line}");
    }
}

#[test]
fn test_spawned_thread_by_name() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let tracer = backtracer(&dir);

    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let worker = thread::Builder::new()
        .name("tt-parked".to_string())
        .spawn(move || {
            ready_tx.send(Tid::current()).unwrap();
            let _ = stop_rx.recv();
        })
        .unwrap();
    let worker_tid = ready_rx.recv().unwrap();

    let spawned = SpawnedThread::new(&worker);
    let resolver = ThreadResolver::new(ProcThreadRegistry::current());
    assert_eq!(resolver.resolve(ThreadRef::Other(&spawned)), worker_tid);

    let frames = tracer.capture_thread(ThreadRef::Other(&spawned));
    assert!(!frames.is_empty(), "parked worker should answer the capture signal");
    assert!(frames.iter().enumerate().all(|(i, f)| f.frame_index == i));

    stop_tx.send(()).unwrap();
    worker.join().unwrap();
}

#[test]
fn test_exited_thread_gives_empty_output() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let tracer = backtracer(&dir);

    let worker = thread::spawn(Tid::current);
    let gone = worker.join().unwrap();

    let capturer = StackCapturer::new(SignalFrameWalker::new(Duration::from_millis(200)));
    let addresses = capturer.capture(gone, 128);
    assert!(addresses.is_empty());

    let resolved =
        SymbolResolver::new(DladdrLoader::new()).resolve(&Strategy::LoaderBacked, &addresses);
    assert!(resolved.is_empty());
    let lines: Vec<String> = resolved.iter().map(|s| tracer.format(s)).collect();
    assert!(lines.is_empty());
}

#[test]
fn test_main_and_current_handles() {
    init_logging();
    let resolver = ThreadResolver::new(ProcThreadRegistry::current());
    assert_eq!(resolver.resolve(ThreadRef::Main).0, std::process::id());
    assert_eq!(resolver.resolve(ThreadRef::Current), Tid::current());
}
