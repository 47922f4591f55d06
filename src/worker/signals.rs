//! Signal handling inside a forked worker.
//!
//! The master's dispositions are reset to default for TERM/HUP/CHLD/TTIN/TTOU
//! so the master can always kill a worker. The handlers below only flip a
//! flag and write one byte to the worker's wakeup pipe.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::libc::{c_int, c_void};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static CPU_EXCEEDED: AtomicBool = AtomicBool::new(false);
static DUMP_REQUESTED: AtomicBool = AtomicBool::new(false);
static STATS_REQUESTED: AtomicBool = AtomicBool::new(false);
static WAKEUP_FD: AtomicI32 = AtomicI32::new(-1);

fn wake() {
    let fd = WAKEUP_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        // SAFETY: write(2) is async-signal-safe; a failed write only means the
        // pipe is already full.
        unsafe {
            nix::libc::write(fd, b".".as_ptr() as *const c_void, 1);
        }
    }
}

extern "C" fn on_stop(_: c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn on_cpu_limit(_: c_int) {
    CPU_EXCEEDED.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn on_dump(_: c_int) {
    DUMP_REQUESTED.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn on_stats(_: c_int) {
    STATS_REQUESTED.store(true, Ordering::SeqCst);
    wake();
}

fn set_handler(signal: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: the handlers only touch atomics and call write(2).
    unsafe { sigaction(signal, &action) }.map(|_| ())
}

/// Install the worker's dispositions. `wakeup_fd` must stay open for the
/// life of the process.
pub fn install(wakeup_fd: RawFd) -> nix::Result<()> {
    WAKEUP_FD.store(wakeup_fd, Ordering::SeqCst);
    STOP_REQUESTED.store(false, Ordering::SeqCst);
    CPU_EXCEEDED.store(false, Ordering::SeqCst);
    DUMP_REQUESTED.store(false, Ordering::SeqCst);
    STATS_REQUESTED.store(false, Ordering::SeqCst);

    for signal in [
        Signal::SIGTERM,
        Signal::SIGHUP,
        Signal::SIGCHLD,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
    ] {
        set_handler(signal, SigHandler::SigDfl)?;
    }

    set_handler(Signal::SIGINT, SigHandler::Handler(on_stop))?;
    set_handler(Signal::SIGXCPU, SigHandler::Handler(on_cpu_limit))?;
    set_handler(Signal::SIGQUIT, SigHandler::Handler(on_dump))?;
    set_handler(Signal::SIGUSR1, SigHandler::Handler(on_stats))?;
    set_handler(Signal::SIGUSR2, SigHandler::Handler(on_stats))?;
    Ok(())
}

pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

pub fn cpu_exceeded() -> bool {
    CPU_EXCEEDED.load(Ordering::SeqCst)
}

pub fn take_dump_request() -> bool {
    DUMP_REQUESTED.swap(false, Ordering::SeqCst)
}

pub fn take_stats_request() -> bool {
    STATS_REQUESTED.swap(false, Ordering::SeqCst)
}
