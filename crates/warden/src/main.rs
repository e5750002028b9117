use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use warden_core::adapter::{create_local_adapter, target_event_channel, LaunchRequest};
use warden_core::registry::{self, SessionHandle};
use warden_core::types::{ModuleOffset, ProcessId};
use warden_core::{SessionController, SessionState, TargetDescriptor};
use warden_utils::{info, init_logging};

/// A session-oriented debugger controller with pluggable target backends.
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "A session-oriented debugger controller with pluggable target backends", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// List processes the local backend can attach to
    Ps,
    /// Attach to a running process, print its halted context, and detach
    Attach
    {
        /// Process ID (PID) to attach to
        pid: u32,
    },
    /// Launch a program under session control and trace it until it exits
    Launch
    {
        /// Path to the executable to launch
        program: String,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Halt at the image entry point before running
        #[arg(long, default_value_t = false)]
        stop_at_entry: bool,
        /// Breakpoint site as MODULE+OFFSET with a hex offset; repeatable
        #[arg(long = "break", value_name = "MODULE+OFFSET")]
        breakpoints: Vec<String>,
    },
}

/// Set from the Ctrl-C handler; the trace loop detaches when it sees it
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn main()
{
    // Initialize logging (reads from RUST_LOG env var)
    // Defaults to INFO level and Pretty format if not set
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let cli = Cli::parse();
    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    match cli.command {
        Commands::Ps => run_ps(),
        Commands::Attach { pid } => run_attach(ProcessId(pid)),
        Commands::Launch {
            program,
            args,
            stop_at_entry,
            breakpoints,
        } => run_launch(&program, args, stop_at_entry, &breakpoints),
    }
}

fn run_ps() -> Result<(), Box<dyn std::error::Error>>
{
    let (events, _inbox) = target_event_channel();
    let mut adapter = create_local_adapter(events)?;
    let processes = adapter.list_processes()?;

    println!("{:>8}  NAME", "PID");
    for process in &processes {
        println!("{:>8}  {}", process.pid.0, process.name);
    }
    println!("{} processes", processes.len());
    Ok(())
}

fn run_attach(pid: ProcessId) -> Result<(), Box<dyn std::error::Error>>
{
    info!("Attaching to process {}", pid);
    let exe = std::fs::read_link(format!("/proc/{}/exe", pid.0))?;
    let target = TargetDescriptor::from_image(&exe)?;

    let mut session = SessionController::local(target);
    session.register_sink(|event| println!("[event] {}", event));
    session.attach(pid)?;
    println!("Successfully attached to process {}", pid);

    // The initial halt arrives as an event
    session.pump_events(Duration::from_secs(5));
    print_halt(&mut session);

    session.detach()?;
    println!("Detached; target left running");
    Ok(())
}

fn run_launch(
    program: &str,
    args: Vec<String>,
    stop_at_entry: bool,
    breakpoints: &[String],
) -> Result<(), Box<dyn std::error::Error>>
{
    // Resolve to an absolute path before the image is parsed and launched
    let absolute = std::fs::canonicalize(program)?;
    let sites = breakpoints
        .iter()
        .map(|spec| parse_site(spec))
        .collect::<Result<Vec<_>, String>>()?;

    let target = TargetDescriptor::from_image(&absolute)?;
    let (id, handle) = registry::register_global(SessionController::local(target));

    {
        let mut session = lock(&handle);
        session.register_sink(|event| println!("[event] {}", event));
        for site in sites {
            session.add_breakpoint(site);
        }
        let request = LaunchRequest::new(&absolute)
            .with_args(args)
            .with_stop_at_entry(stop_at_entry);
        session.launch(request)?;
    }
    println!("Successfully launched program: {}", absolute.display());

    let interrupt_handle = Arc::clone(&handle);
    ctrlc::set_handler(move || {
        INTERRUPTED.store(true, Ordering::SeqCst);
        let mut session = interrupt_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if session.pause().is_ok() {
            info!("Pause requested; the target will halt shortly");
        }
    })?;

    loop {
        let mut session = lock(&handle);
        session.pump_events(Duration::from_millis(200));
        match session.state() {
            SessionState::Inactive => {
                match session.exit_code() {
                    Some(code) => println!("Target exited with code {}", code),
                    None => println!("Session ended"),
                }
                break;
            }
            SessionState::Stopped => {
                print_halt(&mut session);
                if INTERRUPTED.load(Ordering::SeqCst) {
                    session.detach()?;
                    println!("Detached; target left running");
                    break;
                }
                session.resume()?;
            }
            _ => {}
        }
    }

    registry::remove_global(id);
    Ok(())
}

/// Parse a breakpoint site written as `MODULE+OFFSET`, offset in hex
fn parse_site(spec: &str) -> Result<ModuleOffset, String>
{
    let (module, offset) = spec
        .rsplit_once('+')
        .ok_or_else(|| format!("invalid site '{}': expected MODULE+OFFSET", spec))?;
    if module.is_empty() {
        return Err(format!("invalid site '{}': empty module name", spec));
    }
    let digits = offset.trim_start_matches("0x");
    let offset = u64::from_str_radix(digits, 16)
        .map_err(|e| format!("invalid offset in '{}': {}", spec, e))?;
    Ok(ModuleOffset::new(module, offset))
}

fn print_halt(session: &mut SessionController)
{
    let reason = match session.stop_reason() {
        Some(reason) => reason,
        None => return,
    };
    println!("Stopped: {}", reason);
    if let Some(site) = session.current_site() {
        println!("  at {}", site);
    }
    if let Some(registers) = session.registers() {
        println!("  pc={} sp={}", registers.pc, registers.sp);
    }
    for slot in session.stack_window(2, 4) {
        match slot.value {
            Some(value) => println!("  stack {}: 0x{:016x}", slot.address, value),
            None => println!("  stack {}: <unreadable>", slot.address),
        }
    }
    let threads = session.threads();
    if threads.len() > 1 {
        println!("  {} threads", threads.len());
    }
}

fn lock(handle: &SessionHandle) -> MutexGuard<'_, SessionController>
{
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
