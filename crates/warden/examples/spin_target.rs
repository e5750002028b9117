/// Simple target program for debugging.
///
/// This program runs in a loop, printing its PID and a counter.
/// It's designed to be launched or attached to by the warden CLI.
///
/// The program will run indefinitely until interrupted (Ctrl+C) or killed,
/// giving you plenty of time to attach a session.
fn main()
{
    let pid = std::process::id();
    println!("Hello! I am process {pid}");
    println!("Waiting for a debugger to attach... (Press Ctrl+C to exit)");

    let mut seconds = 0u64;
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
        seconds += 1;
        if seconds % 10 == 0 {
            println!("[{pid}] still running after {seconds} seconds");
        }
    }
}
