//! Process re-execution after a restart request.

use std::ffi::OsString;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Flags that only make sense for the first run.
const ONE_SHOT_FLAGS: &[&str] = &["--stop-after-init", "--save", "-s"];

/// Current arguments without the program name and without one-shot flags.
pub fn stripped_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .skip(1)
        .filter(|arg| !ONE_SHOT_FLAGS.iter().any(|flag| arg == flag))
        .collect()
}

/// Replace the current process with a fresh copy of itself.
///
/// Only returns on failure.
pub fn reexec() -> io::Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e,
    };
    let args = stripped_args(std::env::args_os());
    tracing::info!(exe = %exe.display(), ?args, "Re-executing server");
    Command::new(exe).args(args).exec()
}
