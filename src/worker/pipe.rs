//! Single-byte notification pipes.
//!
//! A worker pings its watchdog pipe to tell the master it is alive; signal
//! handlers write to a wakeup pipe so a blocking poll returns early. Both
//! ends are non-blocking and close-on-exec.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

#[derive(Debug)]
pub struct Pipe {
    reader: File,
    writer: File,
}

impl Pipe {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = nix::unistd::pipe()?;
        for fd in [&reader, &writer] {
            set_nonblocking(fd)?;
            set_cloexec(fd)?;
        }
        Ok(Self {
            reader: File::from(reader),
            writer: File::from(writer),
        })
    }

    /// Write one byte. A full pipe already carries the message.
    pub fn ping(&self) -> io::Result<()> {
        match (&self.writer).write(b".") {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read everything pending. Returns the number of bytes consumed.
    pub fn drain(&self) -> io::Result<usize> {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn reader(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    pub fn writer_fd(&self) -> RawFd {
        self.writer.as_raw_fd()
    }

    /// Duplicate of the write end, for signal-hook's pipe registration.
    pub fn writer_clone(&self) -> io::Result<File> {
        self.writer.try_clone()
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            reader: self.reader.try_clone()?,
            writer: self.writer.try_clone()?,
        })
    }
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Mark a descriptor close-on-exec.
pub fn set_cloexec<F: AsRawFd>(fd: &F) -> nix::Result<()> {
    let flags = FdFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(flags | FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Wait until some of `fds` are readable or `timeout` passes.
///
/// Returns one flag per descriptor. An interrupted wait returns with every
/// flag unset so the caller can look at its signal state.
pub fn poll_readable(fds: &[BorrowedFd<'_>], timeout: Duration) -> io::Result<Vec<bool>> {
    let deadline = Instant::now() + timeout;
    let mut poll_fds: Vec<PollFd<'_>> = fds
        .iter()
        .map(|fd| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(u16::MAX as u128) as u16;
        match poll(&mut poll_fds, PollTimeout::from(millis)) {
            Ok(0) if !remaining.is_zero() && Instant::now() < deadline => continue,
            Ok(_) => break,
            Err(Errno::EINTR) => return Ok(vec![false; fds.len()]),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(poll_fds
        .iter()
        .map(|fd| {
            fd.revents()
                .map(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
                .unwrap_or(false)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_then_drain() {
        let pipe = Pipe::new().unwrap();
        pipe.ping().unwrap();
        pipe.ping().unwrap();
        assert_eq!(pipe.drain().unwrap(), 2);
        assert_eq!(pipe.drain().unwrap(), 0);
    }

    #[test]
    fn test_full_pipe_ping_is_ok() {
        let pipe = Pipe::new().unwrap();
        for _ in 0..200_000 {
            pipe.ping().unwrap();
        }
        assert!(pipe.drain().unwrap() > 0);
    }

    #[test]
    fn test_poll_reports_readable_pipe() {
        let idle = Pipe::new().unwrap();
        let busy = Pipe::new().unwrap();
        busy.ping().unwrap();

        let ready = poll_readable(&[idle.reader(), busy.reader()], Duration::from_secs(1)).unwrap();
        assert_eq!(ready, vec![false, true]);
    }

    #[test]
    fn test_poll_times_out() {
        let idle = Pipe::new().unwrap();
        let started = Instant::now();
        let ready = poll_readable(&[idle.reader()], Duration::from_millis(50)).unwrap();
        assert_eq!(ready, vec![false]);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_ends_are_cloexec() {
        let pipe = Pipe::new().unwrap();
        let flags = fcntl(pipe.reader().as_raw_fd(), FcntlArg::F_GETFD).unwrap();
        assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
    }
}
