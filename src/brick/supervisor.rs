//! The Brick Supervisor itself (spec.md §4.5): `start`, `stop`, `is_running`,
//! plumbed through `PortMap` for port allocation and a pidfile advisory lock
//! for "is someone already running this brick" detection.
//!
//! Modeled on the teacher's `vmm::controller::spawn::spawn_subprocess` (piped
//! stdio subprocess launch) but, unlike a VM shim the supervisor keeps a
//! `Child` handle for, a brick's lifecycle is supervised entirely through
//! its pidfile + advisory lock: glusterd itself may restart without losing
//! track of a running brick, exactly as a `Child` handle could not survive.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use log::{info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;

use crate::volume::{Brick, Volume};

use super::socket::brick_socket_path;
use super::{BrickError, PortMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Term,
    Kill,
}

/// What `start` hands back to the caller: enough to reach the brick and to
/// regenerate its server volfile's `protocol/server` options.
#[derive(Debug, Clone)]
pub struct BrickHandle {
    pub pid: i32,
    pub port: u16,
    pub socket_path: PathBuf,
    /// `true` if the pidfile lock was already held (brick was running) and
    /// no new process was spawned (spec.md §4.5: "treat as already-running
    /// and skip to connect").
    pub reused: bool,
}

pub struct BrickSupervisor {
    portmap: PortMap,
    brick_executable: PathBuf,
    tmp_dir: PathBuf,
    /// Held pidfile locks, keyed by pidfile path. A process-local reservation:
    /// a real brick daemon would take this lock itself, but since the
    /// supervisor spawns a generic data-path executable it does not control,
    /// glusterd holds the lock on the brick's behalf for as long as it
    /// considers the brick started (spec.md §4.5: "try fopen + advisory
    /// lockf(F_TLOCK); if someone else holds the lock, treat as
    /// already-running"). Released in `stop`.
    held_locks: Mutex<HashMap<PathBuf, File>>,
}

impl BrickSupervisor {
    pub fn new(brick_executable: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            portmap: PortMap::new(),
            brick_executable: brick_executable.into(),
            tmp_dir: tmp_dir.into(),
            held_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn portmap(&self) -> &PortMap {
        &self.portmap
    }

    fn run_dir(&self, voldir: &Path) -> PathBuf {
        voldir.join("run")
    }

    fn pidfile_path(&self, voldir: &Path, brick: &Brick) -> PathBuf {
        let flattened = brick.path.trim_start_matches('/').replace('/', "-");
        self.run_dir(voldir)
            .join(format!("{}-{}.pid", brick.hostname, flattened))
    }

    /// Step 2+3 of the start protocol: open the pidfile, try an advisory
    /// `lockf(F_TLOCK)`. `Ok(Some(file))` means we now hold the lock and may
    /// spawn; `Ok(None)` means someone else holds it (brick already
    /// running); an I/O error on anything else is fatal (spec.md §4.5
    /// "Failure semantics").
    fn try_lock_pidfile(&self, path: &Path) -> Result<Option<File>, BrickError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| BrickError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| BrickError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let fd = file.as_raw_fd();
        // F_TLOCK: non-blocking exclusive advisory lock over the whole file.
        let rc = unsafe { libc::lockf(fd, libc::F_TLOCK, 0) };
        if rc == 0 {
            return Ok(Some(file));
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EAGAIN) => Ok(None),
            _ => Err(BrickError::Io {
                path: path.to_path_buf(),
                source: err,
            }),
        }
    }

    fn read_pid(path: &Path) -> Option<i32> {
        let mut contents = String::new();
        File::open(path).ok()?.read_to_string(&mut contents).ok()?;
        contents.trim().parse().ok()
    }

    /// `start(vol, brick)` (spec.md §4.5 "Start protocol").
    pub fn start(&self, vol: &Volume, brick: &Brick) -> Result<BrickHandle, BrickError> {
        let voldir = self.tmp_dir.join("vols").join(&vol.name);
        fs::create_dir_all(self.run_dir(&voldir)).map_err(|source| BrickError::Io {
            path: self.run_dir(&voldir),
            source,
        })?;

        let pidfile = self.pidfile_path(&voldir, brick);
        let key = format!("{}:{}", brick.hostname, brick.path);
        let port = self.portmap.alloc(&key)?;
        let socket_path = brick_socket_path(&voldir, &self.tmp_dir, &brick.hostname, &brick.path);

        match self.try_lock_pidfile(&pidfile)? {
            None => {
                let pid = Self::read_pid(&pidfile).unwrap_or(0);
                info!(
                    "brick {} already running (pid {}), reusing",
                    key, pid
                );
                Ok(BrickHandle {
                    pid,
                    port,
                    socket_path,
                    reused: true,
                })
            }
            Some(mut lockfile) => {
                let log_file = brick
                    .log_file
                    .clone()
                    .unwrap_or_else(|| format!("{}/bricks/{}.log", voldir.display(), key.replace(['/', ':'], "-")));

                let child = Command::new(&self.brick_executable)
                    .arg("--volfile-id").arg(format!("{}.{}.{}", vol.name, brick.hostname, brick.path.trim_start_matches('/').replace('/', "-")))
                    .arg("--pidfile").arg(&pidfile)
                    .arg("--socket").arg(&socket_path)
                    .arg("--brick-name").arg(&brick.path)
                    .arg("--log-file").arg(&log_file)
                    .arg("--xlator-option").arg(format!("{}-server.listen-port={}", vol.name, port))
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| BrickError::SpawnFailed(e.to_string()))?;

                let pid = child.id() as i32;
                lockfile
                    .write_all(format!("{}\n", pid).as_bytes())
                    .map_err(|source| BrickError::Io {
                        path: pidfile.clone(),
                        source,
                    })?;
                // Dropping `child` here (rather than holding the handle) is
                // deliberate: the brick is supervised through its pidfile,
                // not a `Child`, so glusterd can restart without losing
                // track of it. The lock stays held in `held_locks` so a
                // concurrent `start()` call observes the brick as running.
                drop(child);
                self.held_locks.lock().insert(pidfile.clone(), lockfile);
                info!("spawned brick {} as pid {} on port {}", key, pid, port);
                Ok(BrickHandle {
                    pid,
                    port,
                    socket_path,
                    reused: false,
                })
            }
        }
    }

    /// `stop(vol, brick, sig)` (spec.md §4.5 "Stop protocol").
    pub fn stop(&self, vol: &Volume, brick: &Brick, sig: StopSignal) -> Result<(), BrickError> {
        let voldir = self.tmp_dir.join("vols").join(&vol.name);
        let pidfile = self.pidfile_path(&voldir, brick);

        let pid = match Self::read_pid(&pidfile) {
            Some(pid) => pid,
            None => {
                // Pidfile-missing is not fatal: means not running.
                warn!("stop requested for {}:{} but no pidfile present", brick.hostname, brick.path);
                return Ok(());
            }
        };

        let nix_pid = Pid::from_raw(pid);
        let first = if sig == StopSignal::Kill { Signal::SIGKILL } else { Signal::SIGTERM };
        let _ = signal::kill(nix_pid, first);

        std::thread::sleep(Duration::from_millis(200));
        if process_alive(pid) {
            let _ = signal::kill(nix_pid, Signal::SIGKILL);
            std::thread::sleep(Duration::from_millis(200));
        }

        self.held_locks.lock().remove(&pidfile);
        let _ = fs::remove_file(&pidfile);
        let key = format!("{}:{}", brick.hostname, brick.path);
        let socket_path = brick_socket_path(&voldir, &self.tmp_dir, &brick.hostname, &brick.path);
        let _ = fs::remove_file(&socket_path);
        self.portmap.release(&key);
        info!("stopped brick {} (pid {})", key, pid);
        Ok(())
    }

    /// `rotate(vol, brick)`: signal a running brick to reopen its log file
    /// (spec.md's log-rotate op; SPEC_FULL.md §2 supplement). A brick with no
    /// pidfile is not running, so there is nothing to signal.
    pub fn rotate(&self, vol: &Volume, brick: &Brick) -> Result<(), BrickError> {
        let voldir = self.tmp_dir.join("vols").join(&vol.name);
        let pidfile = self.pidfile_path(&voldir, brick);
        if let Some(pid) = Self::read_pid(&pidfile) {
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGHUP);
        }
        Ok(())
    }

    /// `is_running(brick) -> (bool, pid)`.
    pub fn is_running(&self, vol: &Volume, brick: &Brick) -> (bool, Option<i32>) {
        let voldir = self.tmp_dir.join("vols").join(&vol.name);
        let pidfile = self.pidfile_path(&voldir, brick);
        match Self::read_pid(&pidfile) {
            Some(pid) => (process_alive(pid), Some(pid)),
            None => (false, None),
        }
    }
}

fn process_alive(pid: i32) -> bool {
    // kill(pid, 0) probes existence/permission without sending a signal.
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{TransportType, VolumeType};
    use tempfile::tempdir;

    #[test]
    fn stop_with_missing_pidfile_is_not_fatal() {
        let dir = tempdir().unwrap();
        let sup = BrickSupervisor::new("/bin/true", dir.path());
        let vol = Volume::new("v1", VolumeType::Distribute, TransportType::Tcp);
        let brick = Brick::new("h1", "/data/b1").unwrap();
        assert!(sup.stop(&vol, &brick, StopSignal::Term).is_ok());
    }

    #[test]
    fn is_running_false_without_pidfile() {
        let dir = tempdir().unwrap();
        let sup = BrickSupervisor::new("/bin/true", dir.path());
        let vol = Volume::new("v1", VolumeType::Distribute, TransportType::Tcp);
        let brick = Brick::new("h1", "/data/b1").unwrap();
        let (running, pid) = sup.is_running(&vol, &brick);
        assert!(!running);
        assert_eq!(pid, None);
    }
}
