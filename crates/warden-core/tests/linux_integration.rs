//! Integration tests for Linux debugger functionality
//!
//! These tests require:
//! - Running on Linux (`#[cfg(target_os = "linux")]`)
//! - A readable `/proc` filesystem
//! - ptrace not being fully disabled by the Yama LSM
//!
//! Tests that need to trace a live process stay tolerant about the exact
//! error, since containers and hardened kernels restrict ptrace in
//! different ways.

#[cfg(target_os = "linux")]
use warden_core::adapter::{target_event_channel, BackendAdapter, LaunchRequest};
use warden_core::error::SessionError;
#[cfg(target_os = "linux")]
use warden_core::types::ProcessId;
use warden_core::types::TargetDescriptor;
#[cfg(target_os = "linux")]
use warden_core::LocalAdapter;
#[cfg(target_os = "linux")]
use warden_core::{SessionController, SessionState};

#[cfg(target_os = "linux")]
#[test]
fn test_local_adapter_attach_invalid_pid()
{
    let (events, _inbox) = target_event_channel();
    let mut adapter = LocalAdapter::new(events);

    let result = adapter.attach(ProcessId::from(u32::MAX));
    assert!(result.is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn test_local_adapter_operations_require_attachment()
{
    let (events, _inbox) = target_event_channel();
    let mut adapter = LocalAdapter::new(events);

    // Resuming and register reads need a live tracee.
    assert!(adapter.resume().is_err());
    assert!(adapter.read_registers().is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn test_local_adapter_lists_processes_from_proc()
{
    let (events, _inbox) = target_event_channel();
    let mut adapter = LocalAdapter::new(events);

    let processes = adapter.list_processes().unwrap();
    assert!(!processes.is_empty());
    for process in &processes {
        assert!(process.pid.value() > 0);
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_launching_a_missing_binary_is_rejected()
{
    let target = TargetDescriptor::new("missing", warden_core::types::Address::ZERO, 0);
    let mut session = SessionController::local(target);

    let result = session.launch(LaunchRequest::new("/definitely/not/a/real/binary"));
    assert!(result.is_err());
    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(session.pid(), None);
}

#[test]
fn test_from_image_parses_the_test_binary()
{
    let exe = std::env::current_exe().unwrap();
    let descriptor = TargetDescriptor::from_image(&exe).unwrap();

    assert!(!descriptor.module.is_empty());
    assert!(descriptor.size > 0);
    assert_eq!(descriptor.path, exe);
}

#[test]
fn test_from_image_rejects_a_missing_file()
{
    let result = TargetDescriptor::from_image("/no/such/image");
    match result {
        Err(SessionError::InvalidImage(message)) => assert!(message.contains("/no/such/image")),
        other => panic!("expected InvalidImage, got {other:?}"),
    }
}

#[test]
fn test_from_image_rejects_a_non_object_file()
{
    let path = std::env::temp_dir().join(format!("warden-image-test-{}", std::process::id()));
    std::fs::write(&path, b"definitely not an object file").unwrap();

    let result = TargetDescriptor::from_image(&path);
    let _ = std::fs::remove_file(&path);

    match result {
        Err(SessionError::InvalidImage(_)) => {
            // Expected: unparseable bytes are not a target image
        }
        other => panic!("expected InvalidImage, got {other:?}"),
    }
}
