//! Optional wait-for-debugger at startup (`DEBUG_MODE=true`).

use std::time::Duration;

const POLL: Duration = Duration::from_millis(500);

/// Block until a debugger attaches. Only Linux can detect attachment; elsewhere this
/// logs and returns immediately.
pub async fn wait_for_debugger() {
    tracing::warn!(pid = std::process::id(), "DEBUG_MODE set, waiting for debugger to attach");

    if !cfg!(target_os = "linux") {
        tracing::warn!("debugger detection is only supported on Linux; continuing");
        return;
    }

    loop {
        match tokio::fs::read_to_string("/proc/self/status").await {
            Ok(status) => {
                if tracer_pid(&status).is_some_and(|pid| pid != 0) {
                    tracing::info!("debugger attached");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("cannot read /proc/self/status ({e}); continuing without debugger");
                return;
            }
        }
        tokio::time::sleep(POLL).await;
    }
}

fn tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|l| l.strip_prefix("TracerPid:"))
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracer_pid() {
        let status = "Name:\ttoolsmith\nState:\tS (sleeping)\nTracerPid:\t4242\nUid:\t0\n";
        assert_eq!(tracer_pid(status), Some(4242));
        assert_eq!(tracer_pid("TracerPid:\t0\n"), Some(0));
        assert_eq!(tracer_pid("Name:\tx\n"), None);
    }
}
