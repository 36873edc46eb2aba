//! Operator interaction channel.
//!
//! The sequencer talks to the factory operator through whatever surface the
//! host process provides (a GUI in production). Only display and dismissal
//! cross this trait; accept/reject answers arrive as left/right function
//! button releases on the robot itself while the sequencer has an answer
//! outstanding.

/// Prompt severity, mirrored into the display styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Instruction or status.
    Info,
    /// Something needs operator attention.
    Warn,
    /// A test or invariant failed.
    Error,
}

/// Display surface for operator prompts.
pub trait OperatorConsole: Send {
    /// Show (or replace) the current prompt.
    fn show_prompt(&mut self, severity: Severity, title: &str, message: &str);

    /// Clear the current prompt.
    fn hide_prompt(&mut self);
}

/// Console that routes prompts to the log; the default when the host
/// process attaches no display.
#[derive(Debug, Default)]
pub struct LogConsole;

impl OperatorConsole for LogConsole {
    fn show_prompt(&mut self, severity: Severity, title: &str, message: &str) {
        match severity {
            Severity::Info => tracing::info!("[{title}] {message}"),
            Severity::Warn => tracing::warn!("[{title}] {message}"),
            Severity::Error => tracing::error!("[{title}] {message}"),
        }
    }

    fn hide_prompt(&mut self) {}
}
