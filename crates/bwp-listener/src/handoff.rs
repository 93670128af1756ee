//! Socket handoff to a successor process
//!
//! On restart the running process spawns the same executable with the same
//! arguments. Every live listener is passed as descriptors `3..3+N` with
//! `LISTEN_FDS=N`, and this process's pid in `BWP_HANDOFF_PARENT_PID`. The
//! successor serves on the inherited sockets and then sends SIGTERM to the
//! parent, which drains and exits.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::registry::ListenerRegistry;
use crate::{ListenerError, Result};

pub const LISTEN_FDS_ENV: &str = "LISTEN_FDS";
pub const PARENT_PID_ENV: &str = "BWP_HANDOFF_PARENT_PID";
pub const FIRST_INHERITED_FD: RawFd = 3;

#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// How long a successor may take to signal readiness
    pub ready_timeout: Duration,
    /// Executable to spawn; the current executable when unset
    pub program: Option<PathBuf>,
    /// Arguments for the successor; this process's arguments when unset
    pub args: Option<Vec<OsString>>,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            program: None,
            args: None,
        }
    }
}

/// Spawn a successor that inherits every live listener in `registry`.
/// Must be called inside a Tokio runtime.
pub fn spawn_successor(registry: &ListenerRegistry, config: &HandoffConfig) -> Result<Child> {
    let fds = registry.dup_for_handoff()?;
    let count = fds.len();

    let program = match &config.program {
        Some(program) => program.clone(),
        None => std::env::current_exe().map_err(ListenerError::Spawn)?,
    };
    let args: Vec<OsString> = match &config.args {
        Some(args) => args.clone(),
        None => std::env::args_os().skip(1).collect(),
    };

    // Move every source above the target range so dup2 never overwrites a
    // descriptor that still has to be copied.
    let floor = FIRST_INHERITED_FD + count as RawFd;
    let sources = fds
        .iter()
        .map(|fd| dup_above(fd.as_raw_fd(), floor))
        .collect::<io::Result<Vec<OwnedFd>>>()
        .map_err(ListenerError::Spawn)?;
    let raw_sources: Vec<RawFd> = sources.iter().map(|fd| fd.as_raw_fd()).collect();

    let mut command = Command::new(&program);
    command
        .args(&args)
        .env(LISTEN_FDS_ENV, count.to_string())
        .env(PARENT_PID_ENV, std::process::id().to_string());

    // Safety: only async-signal-safe calls run between fork and exec.
    unsafe {
        command.pre_exec(move || {
            for (offset, &source) in raw_sources.iter().enumerate() {
                let target = FIRST_INHERITED_FD + offset as RawFd;
                // dup2 leaves the target without FD_CLOEXEC
                let res = libc::dup2(source, target);
                Errno::result(res)
                    .map(drop)
                    .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(ListenerError::Spawn)?;

    info!(
        program = %program.display(),
        pid = ?child.id(),
        listeners = count,
        "Spawned successor"
    );

    // the sources were close-on-exec; our copies are no longer needed
    drop(sources);
    drop(fds);

    Ok(child)
}

/// Duplicate `fd` to the lowest free number at or above `floor`, close-on-exec
fn dup_above(fd: RawFd, floor: RawFd) -> io::Result<OwnedFd> {
    // Safety: F_DUPFD_CLOEXEC only creates a new descriptor
    let res = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) };
    let new_fd = Errno::result(res).map_err(io::Error::from)?;
    // Safety: the descriptor was just created and is owned by nobody else
    Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
}

/// Serialises restarts: at most one successor may be pending
pub struct RestartController {
    registry: Arc<ListenerRegistry>,
    config: HandoffConfig,
    in_flight: Arc<AtomicBool>,
}

impl RestartController {
    pub fn new(registry: Arc<ListenerRegistry>, config: HandoffConfig) -> Self {
        Self {
            registry,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a handoff. Refused while another successor is pending.
    ///
    /// A successor that exits clears the pending state so a later restart
    /// can be attempted. One that stays silent past the ready timeout, while
    /// this process is not yet draining, is killed first so it cannot take
    /// over alongside a later successor.
    pub fn restart(&self) -> Result<u32> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Restart requested while another restart is in flight; ignoring");
            return Err(ListenerError::RestartInFlight);
        }

        let mut child = match spawn_successor(&self.registry, &self.config) {
            Ok(child) => child,
            Err(e) => {
                self.in_flight.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let pid = child.id().unwrap_or_default();

        let in_flight = self.in_flight.clone();
        let registry = self.registry.clone();
        let ready_timeout = self.config.ready_timeout;
        tokio::spawn(async move {
            let waited = tokio::time::timeout(ready_timeout, child.wait()).await;
            match waited {
                Ok(Ok(status)) => {
                    error!(pid = pid, status = %status, "Successor exited before taking over");
                }
                Ok(Err(e)) => {
                    error!(pid = pid, error = %e, "Failed to wait for successor");
                }
                Err(_) if registry.is_draining() => {
                    info!(pid = pid, "Successor took over; leaving it running");
                }
                Err(_) => {
                    warn!(
                        pid = pid,
                        timeout_secs = ready_timeout.as_secs(),
                        "Successor did not signal readiness in time; killing it"
                    );
                    if let Err(e) = child.kill().await {
                        error!(pid = pid, error = %e, "Failed to kill silent successor");
                    }
                }
            }
            in_flight.store(false, Ordering::SeqCst);
        });

        Ok(pid)
    }

    pub fn is_restart_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }
}
