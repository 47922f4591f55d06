//! Pid file written at startup and removed when the server exits.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Removes the file on drop, unless another process rewrote it since.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    pub fn create(path: &Path) -> io::Result<Self> {
        let pid = std::process::id();
        fs::write(path, format!("{}\n", pid))?;
        tracing::debug!(path = %path.display(), pid, "Pid file written");
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // A re-exec'd server keeps our pid and rewrites the file itself.
        if read_pid(&self.path).ok() == Some(self.pid as i32) {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
            }
        }
    }
}

pub fn read_pid(path: &Path) -> io::Result<i32> {
    let content = fs::read_to_string(path)?;
    content
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pidfile_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");

        let pidfile = PidFile::create(&path).unwrap();
        assert_eq!(read_pid(pidfile.path()).unwrap(), std::process::id() as i32);

        drop(pidfile);
        assert!(!path.exists());
    }

    #[test]
    fn test_foreign_pid_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");

        let pidfile = PidFile::create(&path).unwrap();
        fs::write(&path, "1\n").unwrap();
        drop(pidfile);

        assert_eq!(read_pid(&path).unwrap(), 1);
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");
        fs::write(&path, "abc").unwrap();

        let err = read_pid(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
