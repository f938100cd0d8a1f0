//! External hook commands.
//!
//! # Responsibilities
//! - Run operator-supplied commands on health transitions and route changes
//! - Bound every run with a timeout
//!
//! # Design Decisions
//! - Best-effort: a failing hook is logged and never stops the caller
//! - `argv[0]` is the program, the rest are arguments; no shell involved

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

/// Default upper bound for a single hook run.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a hook to completion. Returns true if it exited successfully.
///
/// An empty `argv` is a no-op and counts as success.
pub async fn run_hook(label: &str, argv: &[String], timeout: Duration) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return true;
    };

    tracing::debug!(hook = label, command = %program, "Running hook");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match time::timeout(timeout, child).await {
        Ok(Ok(status)) if status.success() => true,
        Ok(Ok(status)) => {
            tracing::warn!(hook = label, command = %program, status = %status, "Hook exited with failure");
            false
        }
        Ok(Err(e)) => {
            tracing::warn!(hook = label, command = %program, error = %e, "Failed to start hook");
            false
        }
        Err(_) => {
            tracing::warn!(hook = label, command = %program, timeout_secs = timeout.as_secs(), "Hook timed out");
            false
        }
    }
}

/// Run a hook in the background.
pub fn spawn_hook(label: impl Into<String>, argv: Vec<String>, timeout: Duration) {
    if argv.is_empty() {
        return;
    }
    let label = label.into();
    tokio::spawn(async move {
        run_hook(&label, &argv, timeout).await;
    });
}
