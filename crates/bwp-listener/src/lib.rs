//! bwp listeners
//!
//! - ListenAddress: Unix path or IPv4 `host:port`
//! - ListenerRegistry: owns the process's listening sockets and their states
//! - RestartController: hands the sockets to a successor on SIGUSR2

pub mod error;
pub mod address;
pub mod registry;
pub mod handoff;

pub use error::ListenerError;
pub use address::ListenAddress;
pub use registry::{ListenerRegistry, ListenerState, ServeListener};
pub use handoff::{
    spawn_successor, HandoffConfig, RestartController, FIRST_INHERITED_FD, LISTEN_FDS_ENV,
    PARENT_PID_ENV,
};

pub type Result<T> = std::result::Result<T, ListenerError>;
