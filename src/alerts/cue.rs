use std::io::Write;

use super::AlertEvent;

/// The audible side effect of a newly triggered alert.
pub trait AlertCue: Send + Sync {
    fn play(&self, alert: &AlertEvent);
}

/// Rings the terminal bell.
pub struct TerminalBell;

impl AlertCue for TerminalBell {
    fn play(&self, _alert: &AlertEvent) {
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            tracing::debug!(error = %e, "failed to ring terminal bell");
        }
    }
}

pub struct SilentCue;

impl AlertCue for SilentCue {
    fn play(&self, _alert: &AlertEvent) {}
}
