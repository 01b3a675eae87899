//! Background capture of console output.
//!
//! One task per live process drains the [`OutputSource`] into the shared
//! [`OutputBuffer`]. Beyond recognising the readiness sentinel it does not
//! interpret the text.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::handle::OutputSource;
use super::output::OutputBuffer;

/// Heuristic readiness detection.
///
/// The server counts as ready once a single console line contains every
/// token. When the window elapses without a match the supervisor proceeds
/// anyway, so this is a hint and not a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessProbe {
    /// Tokens that must all appear on the same line.
    pub tokens: Vec<String>,
    /// How long to wait for the tokens before assuming readiness.
    pub timeout: Duration,
}

impl ReadinessProbe {
    /// Creates a probe from tokens and a timeout.
    pub fn new<I, S>(tokens: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// True when `line` contains every token. An empty token list never
    /// matches; the supervisor treats it as "ready on launch".
    pub fn matches(&self, line: &str) -> bool {
        !self.tokens.is_empty() && self.tokens.iter().all(|t| line.contains(t.as_str()))
    }

    /// True when the probe has nothing to look for.
    pub fn is_disabled(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Signals fired by the capture task.
pub(crate) struct CaptureSignals {
    /// Fired on the first line matching the probe. Dropped unfired when the
    /// stream ends first.
    pub ready: Option<oneshot::Sender<()>>,
    /// Called once after the stream has ended.
    pub on_end: Box<dyn FnOnce() + Send>,
}

/// Spawns the capture task for one process.
pub(crate) fn spawn_capture(
    mut source: OutputSource,
    output: Arc<OutputBuffer>,
    probe: ReadinessProbe,
    pid: u32,
    signals: CaptureSignals,
) -> JoinHandle<()> {
    let CaptureSignals { mut ready, on_end } = signals;

    tokio::spawn(async move {
        let mut captured: u64 = 0;

        while let Some(line) = source.next_line().await {
            if ready.is_some() && probe.matches(&line) {
                if let Some(tx) = ready.take() {
                    tracing::debug!(pid = pid, line = %line, "Readiness sentinel seen");
                    let _ = tx.send(());
                }
            }
            output.append(line);
            captured += 1;
        }

        tracing::debug!(pid = pid, lines = captured, "Console stream ended");
        drop(ready);
        on_end();
    })
}
