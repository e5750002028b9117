//! Tests for error handling

use warden_core::controller::SessionState;
use warden_core::error::{BackendError, SessionError};
use warden_core::translate::TranslateError;
use warden_core::types::{Address, ProcessId};

#[test]
fn test_backend_error_target_not_found()
{
    let error = BackendError::TargetNotFound("/bin/missing".into());
    let message = format!("{}", error);
    assert!(message.contains("not found"));
    assert!(message.contains("/bin/missing"));
}

#[test]
fn test_backend_error_permission_denied()
{
    let error = BackendError::PermissionDenied("ptrace scope forbids attach".into());
    let message = format!("{}", error);
    assert!(message.contains("Permission denied"));
}

#[test]
fn test_backend_error_already_attached()
{
    let error = BackendError::AlreadyAttached(ProcessId(4242));
    let message = format!("{}", error);
    assert!(message.contains("4242"));
}

#[test]
fn test_backend_error_transport_refused()
{
    let error = BackendError::TransportRefused("connection reset".into());
    let message = format!("{}", error);
    assert!(message.contains("Transport refused"));
}

#[test]
fn test_backend_error_unsupported()
{
    let error = BackendError::Unsupported("write_register");
    let message = format!("{}", error);
    assert!(message.contains("not supported"));
    assert!(message.contains("write_register"));
}

#[test]
fn test_backend_error_memory_access_names_the_address()
{
    let error = BackendError::MemoryAccess(Address::new(0xdead));
    let message = format!("{}", error);
    assert!(message.contains("0x000000000000dead"));
}

#[test]
fn test_backend_error_disconnected()
{
    let error = BackendError::Disconnected;
    assert_eq!(format!("{}", error), "Backend disconnected");
}

#[test]
fn test_io_error_converts_to_backend_error()
{
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
    let error: BackendError = io.into();

    match error {
        BackendError::Io(_) => {
            // Expected: io::Error should convert to the Io variant
        }
        _ => panic!("Expected Io variant"),
    }
}

#[test]
fn test_backend_error_converts_to_session_error()
{
    let error: SessionError = BackendError::Disconnected.into();

    match error {
        SessionError::Backend(BackendError::Disconnected) => {
            // Expected: transparent passthrough
        }
        _ => panic!("Expected Backend variant"),
    }
    assert_eq!(format!("{}", SessionError::from(BackendError::Disconnected)), "Backend disconnected");
}

#[test]
fn test_translate_error_converts_to_session_error()
{
    let error: SessionError = TranslateError::NotLoaded {
        module: "libshim.so".into(),
    }
    .into();

    let message = format!("{}", error);
    assert!(message.contains("libshim.so"));
    assert!(message.contains("not loaded"));
}

#[test]
fn test_command_rejected_names_command_and_state()
{
    let error = SessionError::CommandRejected {
        command: "resume",
        state: SessionState::Inactive,
    };
    let message = format!("{}", error);
    assert!(message.contains("'resume'"));
    assert!(message.contains("inactive"));
}

#[test]
fn test_invalid_image_display()
{
    let error = SessionError::InvalidImage("not an ELF file".into());
    let message = format!("{}", error);
    assert!(message.contains("Invalid target image"));
    assert!(message.contains("ELF"));
}

#[test]
fn test_is_rejection_distinguishes_state_errors()
{
    let rejected = SessionError::CommandRejected {
        command: "pause",
        state: SessionState::Stopped,
    };
    assert!(rejected.is_rejection());

    let backend: SessionError = BackendError::Disconnected.into();
    assert!(!backend.is_rejection());
}
