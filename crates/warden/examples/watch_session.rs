//! Scripted session walkthrough using the replay backend.
//!
//! The replay backend needs no live target, so this example runs on any
//! platform and always behaves the same way.
//!
//! ## What this example does:
//!
//! 1. Builds a `ReplayScript` with two scripted halts and an exit
//! 2. Creates a `SessionController` over it and registers an event sink
//! 3. Adds a breakpoint before launch and watches it get installed
//! 4. Resumes through both halts and prints the final exit code
//!
//! ## Usage:
//!
//! ```bash
//! cargo run --example watch_session
//! ```

use std::time::Duration;

use warden_core::adapter::replay::{ReplayScript, ScriptedStop};
use warden_core::adapter::{BackendAdapter, LaunchRequest};
use warden_core::types::{Address, ModuleInfo, ModuleOffset, StopReason};
use warden_core::{SessionController, SessionState, TargetDescriptor};
use warden_utils::init_logging;

fn main() -> Result<(), Box<dyn std::error::Error>>
{
    init_logging()?;

    // The image claims 0x400000 but the scripted loader placed it at 0x550000
    let runtime_base = Address::new(0x0055_0000);
    let target = TargetDescriptor::new("app", Address::new(0x0040_0000), 0x4000);

    let script = ReplayScript::new()
        .then_stop(
            ScriptedStop::new(StopReason::InitialBreakpoint, runtime_base)
                .with_modules(vec![ModuleInfo::new("app", runtime_base, 0x4000)]),
        )
        .then_stop(ScriptedStop::new(StopReason::Breakpoint, runtime_base + 0x120))
        .then_exit(7);

    let mut session = SessionController::with_factory(target, move |events| {
        Ok(Box::new(script.spawn(events)) as Box<dyn BackendAdapter>)
    });

    session.register_sink(|event| println!("[event] {event}"));
    session.add_breakpoint(ModuleOffset::new("app", 0x120));

    session.launch(LaunchRequest::new("/tmp/app").with_stop_at_entry(true))?;

    while session.state() != SessionState::Inactive {
        if session.pump_events(Duration::from_secs(1)) == 0 {
            break;
        }
        if session.state() == SessionState::Stopped {
            if let Some(site) = session.current_site() {
                println!("halted at {site}");
            }
            session.resume()?;
        }
    }

    match session.exit_code() {
        Some(code) => println!("target exited with code {code}"),
        None => println!("session ended without an exit code"),
    }
    Ok(())
}
