//! Process lifecycle states.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of the supervised process.
///
/// A process handle exists exactly while the state is `Starting`, `Running`
/// or `Stopping`. Every transition path ends in one of these four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// No child process exists.
    #[default]
    Stopped,
    /// Launched, waiting for the readiness sentinel.
    Starting,
    /// Accepting commands.
    Running,
    /// Stop command sent, waiting for exit.
    Stopping,
}

impl ProcessState {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    /// True while a child process is owned by the supervisor.
    pub const fn has_process(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_stopped() {
        assert_eq!(ProcessState::default(), ProcessState::Stopped);
        assert!(!ProcessState::Stopped.has_process());
        assert!(ProcessState::Stopping.has_process());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProcessState::Running.to_string(), "running");
        assert_eq!(ProcessState::Starting.to_string(), "starting");
    }
}
