//! ListenerRegistry Tests
//!
//! Tests for:
//! - Unix socket binding, stale file removal and permissions
//! - TCP binding and bind failures
//! - Claiming inherited sockets by address
//! - Draining, closing and predecessor notification

use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use bwp_listener::{ListenerError, ListenerRegistry, ListenerState, ServeListener};

fn tcp_address(listener: &ServeListener) -> String {
    match listener {
        ServeListener::Tcp(l) => l.local_addr().unwrap().to_string(),
        ServeListener::Unix(_) => panic!("expected a TCP listener"),
    }
}

#[tokio::test]
async fn test_unix_socket_is_world_writable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bwp.sock");
    let registry = ListenerRegistry::new();

    let listener = registry.listen(path.to_str().unwrap()).unwrap();
    assert!(matches!(listener, ServeListener::Unix(_)));

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o777);
    assert_eq!(
        registry.states(),
        vec![(path.display().to_string(), ListenerState::Listening)]
    );
}

#[tokio::test]
async fn test_stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stale.sock");
    std::fs::write(&path, b"left over").unwrap();

    let registry = ListenerRegistry::new();
    let listener = registry.listen(path.to_str().unwrap()).unwrap();
    assert!(matches!(listener, ServeListener::Unix(_)));

    let client = std::os::unix::net::UnixStream::connect(&path);
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_unremovable_path_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // a directory cannot be removed with remove_file
    let path = dir.path().join("occupied");
    std::fs::create_dir(&path).unwrap();

    let registry = ListenerRegistry::new();
    let result = registry.listen(path.to_str().unwrap());
    assert!(matches!(result, Err(ListenerError::RemoveStale { .. })));
    assert!(registry.states().is_empty());
}

#[tokio::test]
async fn test_tcp_bind_and_address_in_use() {
    let registry = ListenerRegistry::new();
    let listener = registry.listen("127.0.0.1:0").unwrap();
    let address = tcp_address(&listener);

    let other = ListenerRegistry::new();
    let result = other.listen(&address);
    assert!(matches!(result, Err(ListenerError::Bind { .. })));
    assert!(other.states().is_empty());
}

#[tokio::test]
async fn test_same_address_twice_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("twice.sock");
    let registry = ListenerRegistry::new();

    registry.listen(path.to_str().unwrap()).unwrap();
    let result = registry.listen(path.to_str().unwrap());
    assert!(matches!(result, Err(ListenerError::AlreadyRegistered(_))));
}

#[tokio::test]
async fn test_invalid_address_is_refused() {
    let registry = ListenerRegistry::new();
    assert!(matches!(
        registry.listen("no-port"),
        Err(ListenerError::InvalidAddress { .. })
    ));
}

#[tokio::test]
async fn test_inherited_sockets_are_claimed_by_address() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inherit.sock");

    let predecessor = ListenerRegistry::new();
    let tcp = predecessor.listen("127.0.0.1:0").unwrap();
    let tcp_addr = tcp_address(&tcp);
    predecessor.listen(path.to_str().unwrap()).unwrap();

    let fds = predecessor.dup_for_handoff().unwrap();
    assert_eq!(fds.len(), 2);

    let successor = ListenerRegistry::with_inherited(fds, None).unwrap();
    assert_eq!(successor.unclaimed_inherited(), 2);

    let claimed = successor.listen(&tcp_addr).unwrap();
    assert_eq!(tcp_address(&claimed), tcp_addr);
    successor.listen(path.to_str().unwrap()).unwrap();

    assert_eq!(successor.unclaimed_inherited(), 0);
    assert!(successor.is_inherited());
    assert!(successor
        .states()
        .iter()
        .all(|(_, state)| *state == ListenerState::Inherited));

    // the unix socket file was not rebound
    assert!(std::os::unix::net::UnixStream::connect(&path).is_ok());
}

#[tokio::test]
async fn test_unmatched_address_binds_fresh() {
    let predecessor = ListenerRegistry::new();
    predecessor.listen("127.0.0.1:0").unwrap();

    let successor =
        ListenerRegistry::with_inherited(predecessor.dup_for_handoff().unwrap(), None).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.sock");
    successor.listen(path.to_str().unwrap()).unwrap();

    assert_eq!(successor.unclaimed_inherited(), 1);
    assert_eq!(successor.states()[0].1, ListenerState::Listening);
}

#[tokio::test]
async fn test_drain_and_close() {
    let registry = ListenerRegistry::new();
    registry.listen("127.0.0.1:0").unwrap();
    assert_eq!(registry.live_count(), 1);
    assert!(!registry.is_draining());

    registry.mark_draining();
    assert!(registry.is_draining());
    assert_eq!(registry.states()[0].1, ListenerState::Draining);
    assert_eq!(registry.live_count(), 0);
    assert!(registry.dup_for_handoff().unwrap().is_empty());

    registry.close();
    assert_eq!(registry.states()[0].1, ListenerState::Closed);

    // closing twice is harmless
    registry.close();
}

#[tokio::test]
async fn test_notify_ready_terminates_parent_once() {
    let mut parent = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = parent.id() as i32;

    let registry = ListenerRegistry::with_inherited(Vec::new(), Some(pid)).unwrap();
    assert!(registry.is_inherited());
    assert!(registry.notify_ready().unwrap());
    assert!(!registry.notify_ready().unwrap());

    let status = parent.wait().unwrap();
    assert_eq!(status.signal(), Some(libc::SIGTERM));
}
