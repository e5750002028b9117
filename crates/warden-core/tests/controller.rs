//! Tests for the session controller state machine and stop pipeline

use std::sync::{Arc, Mutex};
use std::time::Duration;

use warden_core::adapter::replay::{
    ReplayCall, ReplayHandle, ReplayScript, ScriptedFailure, ScriptedStop,
};
use warden_core::adapter::{BackendAdapter, LaunchRequest};
use warden_core::error::{BackendError, SessionError};
use warden_core::events::SessionEvent;
use warden_core::translate::TranslateError;
use warden_core::types::{
    Address, ModuleInfo, ModuleOffset, ProcessId, ProcessInfo, RegisterId, StopReason,
    TargetDescriptor, ThreadId, ThreadInfo,
};
use warden_core::{SessionController, SessionState};

const STATIC_BASE: u64 = 0x0040_0000;
const RUNTIME_BASE: u64 = 0x0055_0000;

type Handles = Arc<Mutex<Vec<ReplayHandle>>>;
type EventLog = Arc<Mutex<Vec<SessionEvent>>>;

fn demo_target() -> TargetDescriptor
{
    TargetDescriptor::new("app", Address::new(STATIC_BASE), 0x4000)
        .with_entry(Address::new(STATIC_BASE + 0x1000))
}

fn loaded_modules() -> Vec<ModuleInfo>
{
    vec![
        ModuleInfo::new("app", Address::new(RUNTIME_BASE), 0x4000),
        ModuleInfo::new("libshim.so", Address::new(0x7f00_0000_0000), 0x10_0000),
    ]
}

/// Controller over `script`, plus one `ReplayHandle` per spawned connection
fn scripted_session(script: ReplayScript) -> (SessionController, Handles)
{
    let handles: Handles = Arc::new(Mutex::new(Vec::new()));
    let spawned = Arc::clone(&handles);
    let session = SessionController::with_factory(demo_target(), move |events| {
        let adapter = script.spawn(events);
        spawned.lock().unwrap().push(adapter.handle());
        Ok(Box::new(adapter) as Box<dyn BackendAdapter>)
    });
    (session, handles)
}

fn record_events(session: &mut SessionController) -> EventLog
{
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&log);
    session.register_sink(move |event| writer.lock().unwrap().push(event.clone()));
    log
}

fn events_of(log: &EventLog) -> Vec<SessionEvent>
{
    log.lock().unwrap().clone()
}

fn last_handle(handles: &Handles) -> ReplayHandle
{
    handles.lock().unwrap().last().cloned().expect("no adapter spawned")
}

fn set_breakpoint_calls(handle: &ReplayHandle) -> Vec<Address>
{
    handle
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ReplayCall::SetBreakpoint(address) => Some(address),
            _ => None,
        })
        .collect()
}

#[test]
fn test_new_session_is_inactive()
{
    let (session, handles) = scripted_session(ReplayScript::new());
    assert_eq!(session.state(), SessionState::Inactive);
    assert!(!session.is_connected());
    assert_eq!(session.pid(), None);
    assert_eq!(session.exit_code(), None);
    assert!(session.registers().is_none());
    assert!(session.modules().is_empty());
    assert!(handles.lock().unwrap().is_empty());
}

#[test]
fn test_resume_rejected_when_inactive()
{
    let (mut session, _handles) = scripted_session(ReplayScript::new());
    let result = session.resume();
    match result.unwrap_err() {
        SessionError::CommandRejected { command, state } => {
            assert_eq!(command, "resume");
            assert_eq!(state, SessionState::Inactive);
        }
        other => panic!("expected CommandRejected, got {other:?}"),
    }
}

#[test]
fn test_launch_rejected_while_connected()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, _handles) = scripted_session(script);
    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();

    let error = session
        .launch(LaunchRequest::new("/tmp/app"))
        .unwrap_err();
    assert!(error.is_rejection());
    let message = format!("{}", error);
    assert!(message.contains("launch"));
    assert!(message.contains("launching"));
}

#[test]
fn test_launch_failure_leaves_session_inactive()
{
    let script = ReplayScript::new()
        .with_launch_failure(ScriptedFailure::TargetNotFound("missing image".into()));
    let (mut session, _handles) = scripted_session(script);
    let log = record_events(&mut session);

    let result = session.launch(LaunchRequest::new("/tmp/missing"));
    match result.unwrap_err() {
        SessionError::Backend(BackendError::TargetNotFound(what)) => {
            assert!(what.contains("missing"));
        }
        other => panic!("expected TargetNotFound, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Inactive);
    assert!(events_of(&log).is_empty());
}

#[test]
fn test_launch_with_stop_at_entry_event_order()
{
    let script = ReplayScript::new().then_stop(
        ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
            .with_modules(loaded_modules()),
    );
    let (mut session, _handles) = scripted_session(script);
    let log = record_events(&mut session);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    assert_eq!(session.state(), SessionState::Launching);
    assert_eq!(session.process_events(), 1);

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(
        events_of(&log),
        vec![
            SessionEvent::Launching,
            SessionEvent::InitialViewRebased {
                base: Address::new(RUNTIME_BASE),
            },
            SessionEvent::TargetStopped(StopReason::InitialBreakpoint),
        ],
    );
}

#[test]
fn test_launch_auto_resumes_and_records_exit()
{
    let script = ReplayScript::new()
        .then_stop(ScriptedStop::new(
            StopReason::InitialBreakpoint,
            Address::new(RUNTIME_BASE),
        ))
        .then_exit(42);
    let (mut session, handles) = scripted_session(script);
    let log = record_events(&mut session);

    session.launch(LaunchRequest::new("/tmp/app")).unwrap();
    session.process_events();

    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(session.exit_code(), Some(42));
    assert_eq!(
        events_of(&log),
        vec![
            SessionEvent::Launching,
            SessionEvent::TargetStopped(StopReason::InitialBreakpoint),
            SessionEvent::Resuming,
            SessionEvent::TargetExited(42),
        ],
    );
    assert!(!last_handle(&handles).is_live());
}

#[test]
fn test_attach_resume_detach_event_order()
{
    let script = ReplayScript::new()
        .then_stop(ScriptedStop::new(
            StopReason::InitialBreakpoint,
            Address::new(RUNTIME_BASE),
        ))
        .then_stop(ScriptedStop::new(
            StopReason::Breakpoint,
            Address::new(RUNTIME_BASE + 0x120),
        ));
    let (mut session, handles) = scripted_session(script);
    let log = record_events(&mut session);

    session.attach(ProcessId(1234)).unwrap();
    session.process_events();
    session.resume().unwrap();
    session.process_events();
    session.detach().unwrap();

    assert_eq!(
        events_of(&log),
        vec![
            SessionEvent::Attaching,
            SessionEvent::TargetStopped(StopReason::InitialBreakpoint),
            SessionEvent::Resuming,
            SessionEvent::TargetStopped(StopReason::Breakpoint),
            SessionEvent::Detached,
        ],
    );
    assert_eq!(session.state(), SessionState::Inactive);

    let handle = last_handle(&handles);
    assert!(!handle.is_live());
    assert!(handle.calls().contains(&ReplayCall::Attach(ProcessId(1234))));
    assert!(handle.calls().contains(&ReplayCall::Detach));
}

#[test]
fn test_stop_pipeline_refreshes_context()
{
    let halt_ip = Address::new(RUNTIME_BASE + 0x1000);
    let sp = Address::new(0x7ffd_0000_0000);
    let script = ReplayScript::new().then_stop(
        ScriptedStop::new(StopReason::InitialBreakpoint, halt_ip)
            .with_sp(sp)
            .with_modules(loaded_modules())
            .with_threads(vec![
                ThreadInfo::new(ThreadId(1), halt_ip),
                ThreadInfo::new(ThreadId(2), Address::ZERO),
            ]),
    );
    let (mut session, _handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.stop_reason(), Some(StopReason::InitialBreakpoint));
    assert_eq!(session.instruction_pointer(), Some(halt_ip));
    assert_eq!(
        session.current_site(),
        Some(ModuleOffset::new("app", 0x1000)),
    );
    assert_eq!(session.modules().len(), 2);
    assert_eq!(session.threads().len(), 2);
    assert_eq!(session.active_thread(), Some(ThreadId(1)));

    let registers = session.registers().unwrap();
    assert_eq!(registers.pc, halt_ip);
    assert_eq!(registers.sp, sp);
}

#[test]
fn test_rebase_announced_once_per_connection()
{
    let script = ReplayScript::new()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
                .with_modules(loaded_modules()),
        )
        .then_stop(
            ScriptedStop::new(StopReason::Breakpoint, Address::new(RUNTIME_BASE + 0x40))
                .with_modules(loaded_modules()),
        );
    let (mut session, _handles) = scripted_session(script);
    let log = record_events(&mut session);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();
    session.resume().unwrap();
    session.process_events();

    let rebases = events_of(&log)
        .iter()
        .filter(|event| matches!(event, SessionEvent::InitialViewRebased { .. }))
        .count();
    assert_eq!(rebases, 1);
}

#[test]
fn test_reconciliation_installs_pending_sites_in_order()
{
    let script = ReplayScript::new().then_stop(
        ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
            .with_modules(loaded_modules()),
    );
    let (mut session, handles) = scripted_session(script);

    // No backend yet, so both sites stay host-side until the first stop.
    assert!(session.add_breakpoint(ModuleOffset::new("app", 0x200)));
    assert!(session.add_breakpoint(ModuleOffset::new("app", 0x100)));

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    let handle = last_handle(&handles);
    assert_eq!(
        set_breakpoint_calls(&handle),
        vec![
            Address::new(RUNTIME_BASE + 0x200),
            Address::new(RUNTIME_BASE + 0x100),
        ],
    );
    assert_eq!(handle.installed_breakpoints().len(), 2);
}

#[test]
fn test_reconciliation_waits_for_a_late_loading_module()
{
    let script = ReplayScript::new()
        // The loader has not mapped "app" yet at the first halt.
        .then_stop(ScriptedStop::new(
            StopReason::InitialBreakpoint,
            Address::new(0x7f00_1000_0000),
        ))
        .then_stop(
            ScriptedStop::new(StopReason::Pause, Address::new(RUNTIME_BASE + 0x1000))
                .with_modules(loaded_modules()),
        );
    let (mut session, handles) = scripted_session(script);
    session.add_breakpoint(ModuleOffset::new("app", 0x200));
    session.add_breakpoint(ModuleOffset::new("app", 0x100));

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    let handle = last_handle(&handles);
    assert!(set_breakpoint_calls(&handle).is_empty());
    assert!(session.breakpoints().contains(&ModuleOffset::new("app", 0x200)));

    session.resume().unwrap();
    session.process_events();

    // The module showed up by the second stop; both sites go in then.
    assert_eq!(
        set_breakpoint_calls(&handle),
        vec![
            Address::new(RUNTIME_BASE + 0x200),
            Address::new(RUNTIME_BASE + 0x100),
        ],
    );
    assert_eq!(handle.installed_breakpoints().len(), 2);
}

#[test]
fn test_reconciliation_converges_without_extra_calls()
{
    let script = ReplayScript::new()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
                .with_modules(loaded_modules()),
        )
        .then_stop(ScriptedStop::new(
            StopReason::Breakpoint,
            Address::new(RUNTIME_BASE + 0x100),
        ));
    let (mut session, handles) = scripted_session(script);
    session.add_breakpoint(ModuleOffset::new("app", 0x100));

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();
    session.resume().unwrap();
    session.process_events();

    // One install at the first stop; the second stop changes nothing.
    let handle = last_handle(&handles);
    assert_eq!(set_breakpoint_calls(&handle).len(), 1);
    assert!(!handle.calls().iter().any(|call| matches!(call, ReplayCall::ClearBreakpoint(_))));
}

#[test]
fn test_reconciliation_clears_sites_of_unloaded_modules()
{
    let script = ReplayScript::new()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
                .with_modules(loaded_modules()),
        )
        .then_stop(
            // The primary module vanished from the map.
            ScriptedStop::new(StopReason::Unknown, Address::new(0x7f00_0000_4000))
                .with_modules(vec![ModuleInfo::new(
                    "libshim.so",
                    Address::new(0x7f00_0000_0000),
                    0x10_0000,
                )]),
        );
    let (mut session, handles) = scripted_session(script);
    session.add_breakpoint(ModuleOffset::new("app", 0x100));

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();
    assert_eq!(last_handle(&handles).installed_breakpoints().len(), 1);

    session.resume().unwrap();
    session.process_events();

    let handle = last_handle(&handles);
    assert!(handle.installed_breakpoints().is_empty());
    assert!(handle
        .calls()
        .contains(&ReplayCall::ClearBreakpoint(Address::new(RUNTIME_BASE + 0x100))));
    // The site itself stays in the set for when the module returns.
    assert_eq!(session.breakpoints().len(), 1);
}

#[test]
fn test_breakpoint_changes_while_running_wait_for_the_next_stop()
{
    let script = ReplayScript::new()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
                .with_modules(loaded_modules()),
        )
        .then_stop(ScriptedStop::new(
            StopReason::Pause,
            Address::new(RUNTIME_BASE + 0x1000),
        ))
        .then_stop(ScriptedStop::new(
            StopReason::Pause,
            Address::new(RUNTIME_BASE + 0x1008),
        ));
    let (mut session, handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();
    session.resume().unwrap();

    // A running backend cannot service breakpoint requests; the set
    // changes host-side only until the target halts again.
    let site = ModuleOffset::new("app", 0x300);
    assert!(session.add_breakpoint(site.clone()));
    let handle = last_handle(&handles);
    assert!(set_breakpoint_calls(&handle).is_empty());

    session.process_events();
    assert_eq!(
        set_breakpoint_calls(&handle),
        vec![Address::new(RUNTIME_BASE + 0x300)],
    );

    session.resume().unwrap();
    assert!(session.remove_breakpoint(&site));
    assert!(!handle
        .calls()
        .iter()
        .any(|call| matches!(call, ReplayCall::ClearBreakpoint(_))));

    session.process_events();
    assert!(handle
        .calls()
        .contains(&ReplayCall::ClearBreakpoint(Address::new(RUNTIME_BASE + 0x300))));
    assert!(handle.installed_breakpoints().is_empty());
}

#[test]
fn test_breakpoint_audit_failure_skips_reconciliation()
{
    let script = ReplayScript::new()
        .with_breakpoint_list_failure()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
                .with_modules(loaded_modules()),
        );
    let (mut session, handles) = scripted_session(script);
    session.add_breakpoint(ModuleOffset::new("app", 0x100));

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    // The stop still lands; the backend just keeps its current breakpoints.
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(set_breakpoint_calls(&last_handle(&handles)).is_empty());
    assert_eq!(session.breakpoints().len(), 1);
}

#[test]
fn test_toggle_breakpoint_mirrors_while_stopped()
{
    let script = ReplayScript::new().then_stop(
        ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
            .with_modules(loaded_modules()),
    );
    let (mut session, handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    let site = ModuleOffset::new("app", 0x2a0);
    let address = Address::new(RUNTIME_BASE + 0x2a0);

    assert!(session.toggle_breakpoint(site.clone()));
    assert_eq!(last_handle(&handles).installed_breakpoints(), vec![address]);

    assert!(!session.toggle_breakpoint(site));
    assert!(last_handle(&handles).installed_breakpoints().is_empty());
    assert!(session.breakpoints().is_empty());
}

#[test]
fn test_add_breakpoint_is_idempotent()
{
    let (mut session, _handles) = scripted_session(ReplayScript::new());
    let site = ModuleOffset::new("app", 0x100);

    assert!(session.add_breakpoint(site.clone()));
    assert!(!session.add_breakpoint(site.clone()));
    assert_eq!(session.breakpoints(), vec![site]);
}

#[test]
fn test_breakpoints_survive_teardown_and_reinstall()
{
    let script = ReplayScript::new()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
                .with_modules(loaded_modules()),
        )
        .then_exit(0);
    let (mut session, handles) = scripted_session(script);
    session.add_breakpoint(ModuleOffset::new("app", 0x300));

    // First connection runs to exit.
    session.launch(LaunchRequest::new("/tmp/app")).unwrap();
    session.process_events();
    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(session.breakpoints().len(), 1);

    // A fresh launch reinstalls the surviving site on the new backend.
    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    assert_eq!(handles.lock().unwrap().len(), 2);
    assert_eq!(
        last_handle(&handles).installed_breakpoints(),
        vec![Address::new(RUNTIME_BASE + 0x300)],
    );
}

#[test]
fn test_restart_replays_saved_launch_request()
{
    let script = ReplayScript::new().then_stop(
        ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
            .with_modules(loaded_modules()),
    );
    let (mut session, handles) = scripted_session(script);
    let log = record_events(&mut session);

    let request = LaunchRequest::new("/tmp/app")
        .with_args(["--verbose"])
        .with_stop_at_entry(true);
    session.launch(request.clone()).unwrap();
    session.process_events();
    assert_eq!(session.state(), SessionState::Stopped);

    session.restart().unwrap();
    session.process_events();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(handles.lock().unwrap().len(), 2);

    let first = handles.lock().unwrap().first().cloned().unwrap();
    assert!(first.calls().contains(&ReplayCall::Quit));
    assert!(!first.is_live());

    let second = last_handle(&handles);
    assert_eq!(second.launched_with(), Some(request));

    let events = events_of(&log);
    let restart_index = events
        .iter()
        .position(|event| *event == SessionEvent::Restarting)
        .unwrap();
    assert_eq!(events[restart_index + 1], SessionEvent::Launching);
}

#[test]
fn test_restart_valid_after_target_exit()
{
    let script = ReplayScript::new()
        .then_stop(ScriptedStop::new(
            StopReason::InitialBreakpoint,
            Address::new(RUNTIME_BASE),
        ))
        .then_exit(3);
    let (mut session, handles) = scripted_session(script);

    session.launch(LaunchRequest::new("/tmp/app")).unwrap();
    session.process_events();
    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(session.exit_code(), Some(3));

    session.restart().unwrap();
    assert_eq!(session.state(), SessionState::Launching);
    assert_eq!(session.exit_code(), None);
    assert_eq!(handles.lock().unwrap().len(), 2);
}

#[test]
fn test_restart_rejected_for_attached_sessions()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, _handles) = scripted_session(script);

    session.attach(ProcessId(99)).unwrap();
    session.process_events();

    let error = session.restart().unwrap_err();
    assert!(error.is_rejection());
}

#[test]
fn test_disconnect_tears_down_session()
{
    let script = ReplayScript::new()
        .then_stop(ScriptedStop::new(
            StopReason::InitialBreakpoint,
            Address::new(RUNTIME_BASE),
        ))
        .then_disconnect();
    let (mut session, _handles) = scripted_session(script);
    let log = record_events(&mut session);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();
    session.resume().unwrap();
    session.process_events();

    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(session.exit_code(), None);
    assert!(session.registers().is_none());
    assert_eq!(
        events_of(&log).last(),
        Some(&SessionEvent::BackendDisconnected),
    );
}

#[test]
fn test_disconnect_command_keeps_the_far_side_running()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, handles) = scripted_session(script);
    let log = record_events(&mut session);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();
    assert!(session.is_connected());

    session.disconnect().unwrap();
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(events_of(&log).last(), Some(&SessionEvent::Detached));
    assert_eq!(
        last_handle(&handles).calls().last(),
        Some(&ReplayCall::Disconnect),
    );
}

#[test]
fn test_toggle_breakpoint_at_records_a_relative_site()
{
    let script = ReplayScript::new().then_stop(
        ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
            .with_modules(loaded_modules()),
    );
    let (mut session, _handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    assert!(session.toggle_breakpoint_at(Address::new(RUNTIME_BASE + 0x2a0)));
    assert_eq!(session.breakpoints(), vec![ModuleOffset::new("app", 0x2a0)]);

    assert!(!session.toggle_breakpoint_at(Address::new(RUNTIME_BASE + 0x2a0)));
    assert!(session.breakpoints().is_empty());
}

#[test]
fn test_pause_halts_running_target()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, _handles) = scripted_session(script);

    session.launch(LaunchRequest::new("/tmp/app")).unwrap();
    session.process_events();
    assert_eq!(session.state(), SessionState::Running);

    session.pause().unwrap();
    session.process_events();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.stop_reason(), Some(StopReason::Pause));
}

#[test]
fn test_step_commands_publish_their_events()
{
    let entry = Address::new(RUNTIME_BASE + 0x1000);
    let script = ReplayScript::new()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, entry)
                .with_modules(loaded_modules()),
        )
        .then_stop(ScriptedStop::new(StopReason::SingleStep, entry + 1));
    let (mut session, handles) = scripted_session(script);
    let log = record_events(&mut session);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    session.step_into().unwrap();
    session.process_events();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.stop_reason(), Some(StopReason::SingleStep));
    assert_eq!(session.instruction_pointer(), Some(entry + 1));
    assert!(events_of(&log).contains(&SessionEvent::SteppingInto));
    assert!(last_handle(&handles).calls().contains(&ReplayCall::StepInto));
}

#[test]
fn test_run_to_site_requires_loaded_module()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, _handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    // No module list was ever scripted, so the map is empty.
    let result = session.run_to_site(&ModuleOffset::new("app", 0x10));
    match result.unwrap_err() {
        SessionError::Translate(TranslateError::NotLoaded { module }) => {
            assert_eq!(module, "app");
        }
        other => panic!("expected NotLoaded, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn test_memory_commands_rejected_while_running()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, _handles) = scripted_session(script);

    session.launch(LaunchRequest::new("/tmp/app")).unwrap();
    session.process_events();
    assert_eq!(session.state(), SessionState::Running);

    let error = session.read_memory(Address::new(RUNTIME_BASE), 8).unwrap_err();
    match error {
        SessionError::CommandRejected { command, state } => {
            assert_eq!(command, "read_memory");
            assert_eq!(state, SessionState::Running);
        }
        other => panic!("expected CommandRejected, got {other:?}"),
    }
}

#[test]
fn test_memory_round_trip_through_backend()
{
    let region = Address::new(RUNTIME_BASE + 0x2000);
    let script = ReplayScript::new()
        .with_memory_region(region, vec![0u8; 16])
        .then_stop(ScriptedStop::new(
            StopReason::InitialBreakpoint,
            Address::new(RUNTIME_BASE),
        ));
    let (mut session, _handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    assert_eq!(session.write_memory(region, &[1, 2, 3, 4]).unwrap(), 4);
    assert_eq!(session.read_memory(region, 4).unwrap(), vec![1, 2, 3, 4]);

    // Past the staged region the fault carries the precise address.
    let error = session.read_memory(Address::new(RUNTIME_BASE + 0x3000), 4).unwrap_err();
    match error {
        SessionError::Backend(BackendError::MemoryAccess(address)) => {
            assert_eq!(address, Address::new(RUNTIME_BASE + 0x3000));
        }
        other => panic!("expected MemoryAccess, got {other:?}"),
    }
}

#[test]
fn test_stack_window_reads_slots_with_sentinels()
{
    let sp = Address::new(0x7ffc_0000_1000);
    let script = ReplayScript::new()
        // Only one slot's worth of stack is readable.
        .with_memory_region(sp, 0xdead_beefu32.to_le_bytes().iter().chain([0u8, 0, 0, 0].iter()).copied().collect())
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, Address::new(RUNTIME_BASE))
                .with_sp(sp),
        );
    let (mut session, _handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    let window = session.stack_window(1, 2);
    assert_eq!(window.len(), 3);
    // The word below the stack pointer is outside the staged region.
    assert_eq!(window[0].address, sp - 8);
    assert!(window[0].is_unreadable());
    assert_eq!(window[1].address, sp);
    assert_eq!(window[1].value, Some(0xdead_beef));
    assert_eq!(window[2].address, sp + 8);
    assert_eq!(window[2].value, None);
    assert!(window[2].is_unreadable());
}

#[test]
fn test_stack_window_empty_outside_stopped()
{
    let (mut session, _handles) = scripted_session(ReplayScript::new());
    assert!(session.stack_window(2, 8).is_empty());
}

#[test]
fn test_write_register_updates_cached_context()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    session.write_register(RegisterId::Pc, RUNTIME_BASE + 0x500).unwrap();
    assert_eq!(
        session.instruction_pointer(),
        Some(Address::new(RUNTIME_BASE + 0x500)),
    );
    assert!(last_handle(&handles)
        .calls()
        .contains(&ReplayCall::WriteRegister(RegisterId::Pc, RUNTIME_BASE + 0x500)));
}

#[test]
fn test_set_active_thread_switches_context()
{
    let halt_ip = Address::new(RUNTIME_BASE + 0x1000);
    let script = ReplayScript::new().then_stop(
        ScriptedStop::new(StopReason::InitialBreakpoint, halt_ip).with_threads(vec![
            ThreadInfo::new(ThreadId(1), halt_ip),
            ThreadInfo::new(ThreadId(2), Address::ZERO),
        ]),
    );
    let (mut session, _handles) = scripted_session(script);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();

    session.set_active_thread(ThreadId(2)).unwrap();
    assert_eq!(session.active_thread(), Some(ThreadId(2)));

    let error = session.set_active_thread(ThreadId(99)).unwrap_err();
    match error {
        SessionError::Backend(BackendError::OperationFailed(_)) => {}
        other => panic!("expected OperationFailed, got {other:?}"),
    }
    assert_eq!(session.active_thread(), Some(ThreadId(2)));
}

#[test]
fn test_list_processes_without_connection()
{
    let script = ReplayScript::new().with_processes(vec![
        ProcessInfo::new(ProcessId(1), "init"),
        ProcessInfo::new(ProcessId(4242), "spin_target"),
    ]);
    let (mut session, handles) = scripted_session(script);

    let processes = session.list_processes().unwrap();
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[1].name, "spin_target");

    // A throwaway adapter served the query; the session never connected.
    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(handles.lock().unwrap().len(), 1);
    assert!(!last_handle(&handles).is_live());
}

#[test]
fn test_removed_sink_stops_receiving()
{
    let (mut session, _handles) = scripted_session(ReplayScript::new());

    let first: EventLog = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&first);
    let token = session.register_sink(move |event| writer.lock().unwrap().push(event.clone()));
    let second = record_events(&mut session);

    assert!(session.remove_sink(token));
    assert!(!session.remove_sink(token));

    session.launch(LaunchRequest::new("/tmp/app")).unwrap();

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(events_of(&second), vec![SessionEvent::Launching]);
}

#[test]
fn test_quit_publishes_aborted_event()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, handles) = scripted_session(script);
    let log = record_events(&mut session);

    session
        .launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))
        .unwrap();
    session.process_events();
    session.quit().unwrap();

    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(events_of(&log).last(), Some(&SessionEvent::QuitDebugging));
    assert!(last_handle(&handles).calls().contains(&ReplayCall::Quit));
}

#[test]
fn test_detach_while_running()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, handles) = scripted_session(script);

    session.launch(LaunchRequest::new("/tmp/app")).unwrap();
    session.process_events();
    assert_eq!(session.state(), SessionState::Running);

    session.detach().unwrap();
    assert_eq!(session.state(), SessionState::Inactive);
    assert!(!last_handle(&handles).is_live());
}

#[test]
fn test_pump_events_times_out_quietly()
{
    let script = ReplayScript::new().then_stop(ScriptedStop::new(
        StopReason::InitialBreakpoint,
        Address::new(RUNTIME_BASE),
    ));
    let (mut session, _handles) = scripted_session(script);

    session.launch(LaunchRequest::new("/tmp/app")).unwrap();
    assert_eq!(session.pump_events(Duration::from_millis(10)), 1);
    // Tape exhausted: the target keeps running and nothing arrives.
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.pump_events(Duration::from_millis(10)), 0);
}
