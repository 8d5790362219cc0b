//! Frame walking primitives
//!
//! The calling thread is walked in place. Any other thread is interrupted
//! with a real-time signal whose handler walks its own stack into a static
//! buffer, which the requesting thread copies out once the handler reports
//! completion.
//!
//! ## Signal protocol
//!
//! 1. The requester takes `CAPTURE_LOCK`, so at most one capture round is in
//!    flight. It waits for any late handler still holding the buffer to
//!    release it.
//! 2. It draws a fresh generation and publishes the frame limit, then a
//!    request word packing the generation with the target TID (Release).
//! 3. It sends the signal with `tgkill`, so only the target thread runs the
//!    handler.
//! 4. The handler checks the request's TID against its own and walks into a
//!    stack-local buffer. It then claims `WRITER`, re-reads the request and
//!    copies into the static buffer only if the request is unchanged. It
//!    stores the length, then stores the request it served into `DONE`
//!    (Release) and releases `WRITER`.
//! 5. The requester polls until `DONE` holds its own request or the reply
//!    timeout passes, then clears the request. A handler from an abandoned
//!    round fails the re-read and never publishes, and a `DONE` left by one
//!    never matches a later generation.
//!
//! The handler does not allocate and takes no locks. Frame walking relies on
//! the unwinder being usable from signal context, which holds for the
//! frame-pointer and eh_frame based unwinders on Linux.

#![allow(unsafe_code)] // signal handling and raw frame buffers

use log::{debug, warn};
use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::domain::{Address, Pid, Tid, TraceError};

/// Upper bound on frames a single signal capture can record
pub const MAX_FRAMES: usize = 512;

const POLL_INTERVAL: Duration = Duration::from_micros(50);
const CLAIM_SPINS: u32 = 1 << 16;

/// Walks the frame chain of a kernel thread
///
/// Returns at most `max_depth` return addresses, innermost first.
pub trait FrameWalker: Send + Sync {
    /// # Errors
    /// Returns an error if the thread cannot be sampled
    fn walk(&self, tid: Tid, max_depth: usize) -> Result<Vec<Address>, TraceError>;
}

impl<T: FrameWalker + ?Sized> FrameWalker for Box<T> {
    fn walk(&self, tid: Tid, max_depth: usize) -> Result<Vec<Address>, TraceError> {
        (**self).walk(tid, max_depth)
    }
}

/// Walks the calling thread directly and every other thread via a signal
#[derive(Debug, Clone)]
pub struct SignalFrameWalker {
    reply_timeout: Duration,
}

impl SignalFrameWalker {
    #[must_use]
    pub fn new(reply_timeout: Duration) -> Self {
        Self { reply_timeout }
    }
}

impl Default for SignalFrameWalker {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REPLY_TIMEOUT)
    }
}

impl FrameWalker for SignalFrameWalker {
    fn walk(&self, tid: Tid, max_depth: usize) -> Result<Vec<Address>, TraceError> {
        if max_depth == 0 {
            return Ok(Vec::new());
        }
        if tid == Tid::current() {
            return Ok(walk_current(max_depth));
        }
        walk_signalled(tid, max_depth.min(MAX_FRAMES), self.reply_timeout)
    }
}

fn walk_current(max_depth: usize) -> Vec<Address> {
    let mut frames = Vec::with_capacity(max_depth.min(MAX_FRAMES));
    backtrace::trace(|frame| {
        frames.push(Address::from(frame.ip() as usize));
        frames.len() < max_depth
    });
    frames
}

/// Frame buffer written by the signal handler
struct FrameBuffer(UnsafeCell<[usize; MAX_FRAMES]>);

// SAFETY: written only by a handler that holds WRITER and still matches the
// live request, read only by the requester once DONE carries that request.
unsafe impl Sync for FrameBuffer {}

static FRAMES: FrameBuffer = FrameBuffer(UnsafeCell::new([0; MAX_FRAMES]));
/// Live request: generation in the high half, target TID in the low half
static REQUEST: AtomicU64 = AtomicU64::new(0);
static GENERATION: AtomicU32 = AtomicU32::new(0);
static LIMIT: AtomicUsize = AtomicUsize::new(0);
static LEN: AtomicUsize = AtomicUsize::new(0);
/// Request most recently served
static DONE: AtomicU64 = AtomicU64::new(0);
/// Non-zero while a handler copies into `FRAMES`
static WRITER: AtomicU64 = AtomicU64::new(0);

/// Serialises capture rounds
static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

/// Outcome of installing the handler, decided once per process
static HANDLER: OnceLock<Result<(), i32>> = OnceLock::new();

fn capture_signal() -> libc::c_int {
    libc::SIGRTMIN() + 2
}

fn request_word(generation: u32, tid: Tid) -> u64 {
    (u64::from(generation) << 32) | u64::from(tid.0)
}

#[allow(clippy::cast_possible_truncation)]
fn request_tid(request: u64) -> u32 {
    request as u32
}

extern "C" fn on_capture_signal(_: libc::c_int, _: *mut libc::siginfo_t, _: *mut c_void) {
    let request = REQUEST.load(Ordering::Acquire);
    if request == 0 {
        return;
    }
    #[allow(clippy::cast_sign_loss)]
    let own = unsafe { libc::gettid() } as u32;
    if request_tid(request) != own {
        return;
    }

    // The interrupted code may be inspecting errno
    let saved_errno = unsafe { *libc::__errno_location() };

    let limit = LIMIT.load(Ordering::Relaxed).min(MAX_FRAMES);
    let mut local = [0usize; MAX_FRAMES];
    let mut count = 0usize;
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if count >= limit {
                return false;
            }
            local[count] = frame.ip() as usize;
            count += 1;
            true
        });
    }
    publish_frames(request, &local[..count]);

    unsafe { *libc::__errno_location() = saved_errno };
}

/// Copies a handler's frames into the shared buffer if `request` is still live
///
/// Async-signal-safe: atomics and a plain copy only.
fn publish_frames(request: u64, frames: &[usize]) -> bool {
    let mut spins = 0u32;
    while WRITER.compare_exchange(0, request, Ordering::Acquire, Ordering::Relaxed).is_err() {
        // Another holder only copies a bounded buffer
        spins += 1;
        if spins > CLAIM_SPINS {
            return false;
        }
        std::hint::spin_loop();
    }
    if REQUEST.load(Ordering::Acquire) != request {
        WRITER.store(0, Ordering::Release);
        return false;
    }

    let len = frames.len().min(MAX_FRAMES);
    let buf: &mut [usize; MAX_FRAMES] = unsafe { &mut *FRAMES.0.get() };
    buf[..len].copy_from_slice(&frames[..len]);
    LEN.store(len, Ordering::Relaxed);
    DONE.store(request, Ordering::Release);
    WRITER.store(0, Ordering::Release);
    true
}

fn install_handler() -> Result<(), TraceError> {
    let outcome = HANDLER.get_or_init(|| unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_capture_signal as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(capture_signal(), &action, std::ptr::null_mut()) == 0 {
            debug!("Installed capture handler on signal {}", capture_signal());
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
        }
    });
    (*outcome).map_err(TraceError::SignalInstallFailed)
}

/// Opens a round for `tid` and returns its request word
///
/// Callers hold `CAPTURE_LOCK`.
fn begin_round(tid: Tid, limit: usize, deadline: Instant) -> Result<u64, TraceError> {
    while WRITER.load(Ordering::Acquire) != 0 {
        if Instant::now() >= deadline {
            warn!("A late capture reply still holds the frame buffer");
            return Err(TraceError::CaptureTimedOut(tid));
        }
        thread::sleep(POLL_INTERVAL);
    }

    let mut generation = GENERATION.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    if generation == 0 {
        generation = GENERATION.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    }
    let request = request_word(generation, tid);

    LEN.store(0, Ordering::Relaxed);
    LIMIT.store(limit, Ordering::Relaxed);
    REQUEST.store(request, Ordering::Release);
    Ok(request)
}

fn end_round() {
    REQUEST.store(0, Ordering::Release);
}

/// Waits for the handler to serve `request`, then copies its frames out
fn await_reply(request: u64, limit: usize, deadline: Instant) -> Option<Vec<Address>> {
    // Polled: a handler can only report through atomics, and no channel or
    // condvar wake-up is async-signal-safe.
    while DONE.load(Ordering::Acquire) != request {
        if Instant::now() >= deadline {
            end_round();
            // A handler that passed its re-check may still be finishing
            if DONE.load(Ordering::Acquire) != request {
                return None;
            }
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let len = LEN.load(Ordering::Relaxed).min(limit);
    let buf: &[usize; MAX_FRAMES] = unsafe { &*FRAMES.0.get() };
    Some(buf[..len].iter().map(|&ip| Address::from(ip)).collect())
}

fn walk_signalled(tid: Tid, limit: usize, timeout: Duration) -> Result<Vec<Address>, TraceError> {
    install_handler()?;

    let _round = CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let deadline = Instant::now() + timeout;
    let request = begin_round(tid, limit, deadline)?;

    #[allow(clippy::cast_possible_wrap)]
    let rc = unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            Pid::current().0 as libc::pid_t,
            tid.0 as libc::pid_t,
            capture_signal(),
        )
    };
    if rc != 0 {
        end_round();
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        return Err(TraceError::SignalSendFailed { tid, errno });
    }

    let frames = await_reply(request, limit, deadline);
    end_round();
    frames.ok_or_else(|| {
        warn!("{tid} did not reply within {timeout:?}");
        TraceError::CaptureTimedOut(tid)
    })
}
