//! Signal delivery
//!
//! Only called by the task that owns the `Child`, before it has been reaped,
//! so the pid (and its process group) still belong to our child.

use tokio::process::Child;
use tracing::debug;

/// Graceful termination: SIGTERM to the child's process group
#[cfg(unix)]
pub(crate) fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        send_to_group(pid, libc::SIGTERM);
    }
}

/// Forceful termination: SIGKILL to the group, then to the child itself
#[cfg(unix)]
pub(crate) fn kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        send_to_group(pid, libc::SIGKILL);
    }
    if let Err(e) = child.start_kill() {
        debug!("start_kill after SIGKILL: {}", e);
    }
}

#[cfg(unix)]
fn send_to_group(pid: u32, signal: libc::c_int) {
    let pid = pid as libc::pid_t;
    // The child leads its own group (spawned with process_group(0)).
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        let rc = unsafe { libc::kill(pid, signal) };
        if rc != 0 {
            debug!(
                "signal {} to pid {} failed: {}",
                signal,
                pid,
                std::io::Error::last_os_error()
            );
        }
    }
}

// Windows has no graceful signal; both steps kill.
#[cfg(not(unix))]
pub(crate) fn terminate(child: &mut Child) {
    kill(child)
}

#[cfg(not(unix))]
pub(crate) fn kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("start_kill failed: {}", e);
    }
}
