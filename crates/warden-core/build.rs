//! Build script for warden-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (Edition 2021 = Rust 1.56.0+)
//! - Platform-specific requirements (Linux ptrace policy, etc.)
//!
//! ## Requirements
//!
//! - **Rust**: Edition 2021 (Rust 1.56.0 or newer)
//! - **Linux**: the local-process adapter uses ptrace; attach is subject to
//!   the Yama `ptrace_scope` policy
//! - **Other platforms**: the core, remote-stub, and replay backends build
//!   everywhere; only the local adapter is Linux-specific

fn main()
{
    // Check minimum Rust version
    // Edition 2021 requires Rust 1.56.0
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::parse("1.56.0").unwrap();

        if rustc_version < min_rust_version {
            panic!(
                "warden-core requires Rust {} or newer (Edition 2021), found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    #[cfg(target_os = "linux")]
    check_linux_ptrace_policy();
}

#[cfg(target_os = "linux")]
fn check_linux_ptrace_policy()
{
    // Yama ptrace_scope values:
    //   0 = unrestricted, 1 = tracer must be a parent (launch works, attach
    //   to arbitrary pids needs CAP_SYS_PTRACE), 2 = admin only, 3 = disabled
    // Launch-based debugging works under 0 and 1; warn for stricter modes.
    let Ok(raw) = std::fs::read_to_string("/proc/sys/kernel/yama/ptrace_scope") else {
        return;
    };

    match raw.trim().parse::<u8>() {
        Ok(scope) if scope >= 2 => {
            println!(
                "cargo:warning=kernel.yama.ptrace_scope is {scope}; the local-process adapter will be unable to trace targets without elevated privileges"
            );
        }
        _ => {}
    }
}
