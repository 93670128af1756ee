use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("invalid listen address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to remove stale socket {path}: {source}")]
    RemoveStale { path: PathBuf, source: io::Error },

    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("failed to set permissions on {path}: {source}")]
    Permissions { path: PathBuf, source: io::Error },

    #[error("inherited descriptor {fd} is unusable: {reason}")]
    Inherited { fd: i32, reason: String },

    #[error("listener for {0} is already registered")]
    AlreadyRegistered(String),

    #[error("a restart is already in flight")]
    RestartInFlight,

    #[error("failed to spawn successor: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to signal process {pid}: {source}")]
    Signal { pid: i32, source: nix::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}
