//! Process resource limits.
//!
//! # Responsibilities
//! - Measure the memory of a process (soft limit)
//! - Apply the address-space limit (hard limit, Linux only)
//! - Re-arm RLIMIT_CPU so the CPU budget applies per unit of work
//! - List child processes left behind at shutdown

use nix::sys::resource::{getrlimit, getrusage, setrlimit, Resource, UsageWho};
use sysinfo::{Pid, ProcessRefreshKind, System};

/// Memory used by `pid` in bytes: virtual size, or resident size on macOS
/// where the virtual size is meaningless.
pub fn memory_usage(pid: u32) -> Option<u64> {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_process_specifics(pid, ProcessRefreshKind::new().with_memory());
    system.process(pid).map(|process| {
        if cfg!(target_os = "macos") {
            process.memory()
        } else {
            process.virtual_memory()
        }
    })
}

/// True when `pid` uses more than `limit` bytes. A limit of 0 never trips.
pub fn exceeds_memory_soft(pid: u32, limit: u64) -> Option<u64> {
    if limit == 0 {
        return None;
    }
    memory_usage(pid).filter(|used| *used > limit)
}

/// Cap the address space of the current process. 0 leaves it alone.
#[cfg(target_os = "linux")]
pub fn set_memory_hard_limit(limit: u64) -> nix::Result<()> {
    if limit == 0 {
        return Ok(());
    }
    let (_, hard) = getrlimit(Resource::RLIMIT_AS)?;
    setrlimit(Resource::RLIMIT_AS, limit.min(hard), hard)
}

#[cfg(not(target_os = "linux"))]
pub fn set_memory_hard_limit(_limit: u64) -> nix::Result<()> {
    Ok(())
}

/// CPU seconds consumed so far by the current process.
pub fn cpu_time_used() -> nix::Result<u64> {
    let usage = getrusage(UsageWho::RUSAGE_SELF)?;
    let secs = usage.user_time().tv_sec() + usage.system_time().tv_sec();
    Ok(secs.max(0) as u64)
}

/// Allow `limit_time_cpu` more CPU seconds from now. 0 disables the limit.
pub fn reset_cpu_limit(limit_time_cpu: u64) -> nix::Result<()> {
    if limit_time_cpu == 0 {
        return Ok(());
    }
    let (_, hard) = getrlimit(Resource::RLIMIT_CPU)?;
    let soft = cpu_time_used()?.saturating_add(limit_time_cpu).min(hard);
    setrlimit(Resource::RLIMIT_CPU, soft, hard)
}

/// Direct children of `pid`.
pub fn child_processes(pid: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes();
    let parent = Pid::from_u32(pid);
    system
        .processes()
        .values()
        .filter(|process| process.parent() == Some(parent))
        .map(|process| process.pid().as_u32())
        .collect()
}
