//! Listener Registry
//!
//! Owns one duplicate of every listening socket the process serves so the
//! sockets can be handed to a successor. Each entry moves through
//! `Binding -> Listening -> Draining -> Closed`; a socket received from a
//! predecessor enters as `Inherited` and serves like `Listening`.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::net::TcpListener as StdTcpListener;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::address::ListenAddress;
use crate::handoff::{FIRST_INHERITED_FD, LISTEN_FDS_ENV, PARENT_PID_ENV};
use crate::{ListenerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Binding,
    Listening,
    Inherited,
    Draining,
    Closed,
}

impl ListenerState {
    /// Still owns a socket that a successor can inherit
    pub fn is_live(self) -> bool {
        matches!(self, ListenerState::Listening | ListenerState::Inherited)
    }
}

/// A listener ready to hand to the HTTP server
#[derive(Debug)]
pub enum ServeListener {
    Tcp(tokio::net::TcpListener),
    Unix(tokio::net::UnixListener),
}

/// A socket received from a predecessor, not yet claimed by `listen`
#[derive(Debug)]
struct InheritedSocket {
    address: ListenAddress,
    fd: OwnedFd,
}

#[derive(Debug)]
struct Entry {
    address: ListenAddress,
    state: ListenerState,
    /// Taken exactly once, at close
    fd: Option<OwnedFd>,
}

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<Entry>>,
    inherited: Mutex<Vec<InheritedSocket>>,
    /// Predecessor to notify once this process serves
    parent_pid: Mutex<Option<i32>>,
    draining: AtomicBool,
}

impl ListenerRegistry {
    /// Empty registry for a process started without a predecessor
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from `LISTEN_FDS` and the handoff parent pid.
    /// Both variables are removed so they do not leak to other children.
    pub fn from_env() -> Result<Self> {
        let count = match std::env::var(LISTEN_FDS_ENV) {
            Ok(value) => value.trim().parse::<usize>().map_err(|_| ListenerError::Inherited {
                fd: FIRST_INHERITED_FD,
                reason: format!("{}={} is not a count", LISTEN_FDS_ENV, value),
            })?,
            Err(_) => 0,
        };
        let parent_pid = std::env::var(PARENT_PID_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<i32>().ok());

        std::env::remove_var(LISTEN_FDS_ENV);
        std::env::remove_var(PARENT_PID_ENV);

        let mut fds = Vec::with_capacity(count);
        for offset in 0..count {
            let fd = FIRST_INHERITED_FD + offset as RawFd;
            set_cloexec(fd).map_err(|e| ListenerError::Inherited {
                fd,
                reason: e.to_string(),
            })?;
            // Safety: the predecessor placed an open socket at this number
            // and nothing else in this process owns it.
            fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
        }

        Self::with_inherited(fds, parent_pid)
    }

    /// Build the registry from already-open listening sockets
    pub fn with_inherited(fds: Vec<OwnedFd>, parent_pid: Option<i32>) -> Result<Self> {
        let mut inherited = Vec::with_capacity(fds.len());
        for fd in fds {
            let address = socket_address(&fd)?;
            debug!(fd = fd.as_raw_fd(), address = %address, "Inherited listener");
            inherited.push(InheritedSocket { address, fd });
        }

        if !inherited.is_empty() {
            info!(count = inherited.len(), parent_pid = ?parent_pid, "Inherited listeners from predecessor");
        }

        Ok(Self {
            entries: Mutex::new(Vec::new()),
            inherited: Mutex::new(inherited),
            parent_pid: Mutex::new(parent_pid),
            draining: AtomicBool::new(false),
        })
    }

    /// Reuse an inherited socket bound to `address`, or bind a new one.
    /// Must be called inside a Tokio runtime.
    pub fn listen(&self, address: &str) -> Result<ServeListener> {
        let address = ListenAddress::parse(address)?;

        if self
            .entries
            .lock()
            .iter()
            .any(|e| e.address == address && e.state != ListenerState::Closed)
        {
            return Err(ListenerError::AlreadyRegistered(address.to_string()));
        }

        let claimed = {
            let mut inherited = self.inherited.lock();
            inherited
                .iter()
                .position(|s| s.address == address)
                .map(|i| inherited.remove(i))
        };

        if let Some(socket) = claimed {
            let serve = to_serve_listener(&address, &socket.fd)?;
            info!(address = %address, "Serving inherited listener");
            self.entries.lock().push(Entry {
                address,
                state: ListenerState::Inherited,
                fd: Some(socket.fd),
            });
            return Ok(serve);
        }

        self.entries.lock().push(Entry {
            address: address.clone(),
            state: ListenerState::Binding,
            fd: None,
        });

        let bound = bind(&address).and_then(|fd| {
            let serve = to_serve_listener(&address, &fd)?;
            Ok((fd, serve))
        });

        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|e| e.address == address && e.state == ListenerState::Binding);
        match bound {
            Ok((fd, serve)) => {
                info!(address = %address, "Listening");
                let entry = Entry {
                    address,
                    state: ListenerState::Listening,
                    fd: Some(fd),
                };
                match index {
                    Some(index) => entries[index] = entry,
                    None => entries.push(entry),
                }
                Ok(serve)
            }
            Err(e) => {
                if let Some(index) = index {
                    entries.remove(index);
                }
                Err(e)
            }
        }
    }

    /// Duplicates of every live socket, in registration order
    pub fn dup_for_handoff(&self) -> Result<Vec<OwnedFd>> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.state.is_live())
            .filter_map(|e| e.fd.as_ref())
            .map(|fd| fd.try_clone().map_err(ListenerError::from))
            .collect()
    }

    /// Mark every live listener as draining
    pub fn mark_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
        for entry in self.entries.lock().iter_mut() {
            if entry.state.is_live() {
                entry.state = ListenerState::Draining;
                debug!(address = %entry.address, "Listener draining");
            }
        }
    }

    /// Release every socket handle. Unix socket files are left in place
    /// for a successor that may still be serving on them.
    pub fn close(&self) {
        let mut closed = 0;
        for entry in self.entries.lock().iter_mut() {
            if let Some(fd) = entry.fd.take() {
                drop(fd);
                closed += 1;
            }
            entry.state = ListenerState::Closed;
        }

        // never claimed by `listen`
        let unclaimed = std::mem::take(&mut *self.inherited.lock());
        for socket in &unclaimed {
            warn!(address = %socket.address, "Closing inherited listener that was never served");
        }

        info!(closed = closed, "Listener registry closed");
    }

    /// Tell the predecessor this process is serving. Returns false when
    /// there is no predecessor or it was already notified.
    pub fn notify_ready(&self) -> Result<bool> {
        let Some(pid) = self.parent_pid.lock().take() else {
            return Ok(false);
        };

        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|source| ListenerError::Signal { pid, source })?;
        info!(parent_pid = pid, "Signalled predecessor to drain");
        Ok(true)
    }

    pub fn is_inherited(&self) -> bool {
        self.parent_pid.lock().is_some()
            || self
                .entries
                .lock()
                .iter()
                .any(|e| e.state == ListenerState::Inherited)
    }

    pub fn states(&self) -> Vec<(String, ListenerState)> {
        self.entries
            .lock()
            .iter()
            .map(|e| (e.address.to_string(), e.state))
            .collect()
    }

    /// True once `mark_draining` has run
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.state.is_live()).count()
    }

    pub fn unclaimed_inherited(&self) -> usize {
        self.inherited.lock().len()
    }
}

fn bind(address: &ListenAddress) -> Result<OwnedFd> {
    match address {
        ListenAddress::Unix(path) => {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale socket file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(ListenerError::RemoveStale {
                        path: path.clone(),
                        source,
                    })
                }
            }

            let listener = StdUnixListener::bind(path).map_err(|source| ListenerError::Bind {
                address: address.to_string(),
                source,
            })?;
            fs::set_permissions(path, fs::Permissions::from_mode(0o777)).map_err(|source| {
                ListenerError::Permissions {
                    path: path.clone(),
                    source,
                }
            })?;
            Ok(OwnedFd::from(listener))
        }
        ListenAddress::Tcp(addr) => {
            let listener = StdTcpListener::bind(addr).map_err(|source| ListenerError::Bind {
                address: address.to_string(),
                source,
            })?;
            Ok(OwnedFd::from(listener))
        }
    }
}

/// A tokio listener over a duplicate of `fd`; the registry keeps the original.
fn to_serve_listener(address: &ListenAddress, fd: &OwnedFd) -> Result<ServeListener> {
    let dup = fd.try_clone()?;
    if address.is_unix() {
        let std = StdUnixListener::from(dup);
        std.set_nonblocking(true)?;
        Ok(ServeListener::Unix(tokio::net::UnixListener::from_std(std)?))
    } else {
        let std = StdTcpListener::from(dup);
        std.set_nonblocking(true)?;
        Ok(ServeListener::Tcp(tokio::net::TcpListener::from_std(std)?))
    }
}

/// Identify an inherited socket by its bound address
fn socket_address(fd: &OwnedFd) -> Result<ListenAddress> {
    let raw = fd.as_raw_fd();
    let unusable = |reason: String| ListenerError::Inherited { fd: raw, reason };

    let duplicate = fd.try_clone()?;
    let unix = StdUnixListener::from(duplicate);
    if let Ok(local) = unix.local_addr() {
        return local
            .as_pathname()
            .map(|path| ListenAddress::Unix(path.to_path_buf()))
            .ok_or_else(|| unusable("unix socket has no path".to_string()));
    }

    let duplicate = fd.try_clone()?;
    let tcp = StdTcpListener::from(duplicate);
    match tcp.local_addr() {
        Ok(SocketAddr::V4(addr)) => Ok(ListenAddress::Tcp(addr)),
        Ok(SocketAddr::V6(addr)) => Err(unusable(format!("IPv6 socket {} is not supported", addr))),
        Err(e) => Err(unusable(e.to_string())),
    }
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // Safety: fcntl on a descriptor number has no memory effects
    let res = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    Errno::result(res).map(drop).map_err(io::Error::from)
}
