//! Single instance lock using a Unix socket.
//!
//! Two agents for the same device would fight over the sensor pins and
//! publish duplicate events under one identity. The lock is a Unix socket
//! named after the device id, which the OS releases when the process dies.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceLockError {
    #[error("another agent for device '{0}' is already running")]
    AlreadyRunning(String),

    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Held for as long as the agent runs. Dropping it removes the socket file.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock for `device_id` in the runtime directory.
    pub fn acquire(device_id: &str) -> Result<Self, InstanceLockError> {
        Self::acquire_in(&runtime_dir(), device_id)
    }

    pub fn acquire_in(dir: &Path, device_id: &str) -> Result<Self, InstanceLockError> {
        let path = socket_path(dir, device_id);

        // A socket file nobody answers on was left by a killed process.
        if path.exists() {
            if UnixStream::connect(&path).is_ok() {
                return Err(InstanceLockError::AlreadyRunning(device_id.to_string()));
            }
            let _ = std::fs::remove_file(&path);
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(InstanceLockError::AlreadyRunning(device_id.to_string()))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// `XDG_RUNTIME_DIR`, falling back to `/tmp`.
fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Socket path for `device_id`; characters unsafe in file names become `_`.
pub fn socket_path(dir: &Path, device_id: &str) -> PathBuf {
    let name: String = device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("occupancy-agent-{}.sock", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_socket_path_sanitizes_device_id() {
        assert_eq!(
            socket_path(Path::new("/run/user/1000"), "ESP32/room 1"),
            PathBuf::from("/run/user/1000/occupancy-agent-ESP32_room_1.sock")
        );
    }

    #[test]
    fn test_second_lock_for_same_device_fails() {
        let dir = TempDir::new().unwrap();
        let first = InstanceLock::acquire_in(dir.path(), "room-1").unwrap();

        assert!(matches!(
            InstanceLock::acquire_in(dir.path(), "room-1"),
            Err(InstanceLockError::AlreadyRunning(_))
        ));
        assert!(InstanceLock::acquire_in(dir.path(), "room-2").is_ok());

        drop(first);
        assert!(InstanceLock::acquire_in(dir.path(), "room-1").is_ok());
    }

    #[test]
    fn test_stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(dir.path(), "room-1");
        std::fs::write(&path, b"").unwrap();

        let lock = InstanceLock::acquire_in(dir.path(), "room-1").unwrap();
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn test_dropping_lock_removes_socket_file() {
        let dir = TempDir::new().unwrap();
        let lock = InstanceLock::acquire_in(dir.path(), "room-1").unwrap();
        let path = lock.path().to_path_buf();
        assert!(path.exists());

        drop(lock);
        assert!(!path.exists());
    }
}
