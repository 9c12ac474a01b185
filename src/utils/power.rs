//! Sleep prevention while a recording is running
//!
//! On macOS this holds a `caffeinate` assertion tied to our process id.
//! Elsewhere the guard is a no-op.

use std::process::Child;

/// Keeps the display and system awake until dropped
pub struct SleepGuard {
    child: Option<Child>,
}

impl SleepGuard {
    /// Acquire the assertion. Failure to spawn is logged and yields an inert guard.
    pub fn acquire() -> Self {
        Self {
            child: spawn_assertion(),
        }
    }

    pub fn is_held(&self) -> bool {
        self.child.is_some()
    }

    /// Release the assertion now
    pub fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to stop caffeinate: {}", e);
            }
            let _ = child.wait();
            tracing::debug!("Sleep prevention released");
        }
    }
}

impl Drop for SleepGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(target_os = "macos")]
fn spawn_assertion() -> Option<Child> {
    use std::process::{Command, Stdio};

    let pid = std::process::id().to_string();
    match Command::new("caffeinate")
        .args(["-d", "-i", "-w", &pid])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => {
            tracing::debug!("Sleep prevention acquired");
            Some(child)
        }
        Err(e) => {
            tracing::warn!("Failed to start caffeinate: {}", e);
            None
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn spawn_assertion() -> Option<Child> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_is_idempotent() {
        let mut guard = SleepGuard::acquire();
        guard.release();
        assert!(!guard.is_held());
        guard.release();
    }
}
