//! Ownership of a single child process and its console streams.
//!
//! [`ProcessHandle::launch`] splits a child into two capabilities: the
//! handle itself (command sink, pid, exit control) which stays with the
//! supervisor, and an [`OutputSource`] that is moved into the capture task.

use chrono::{DateTime, Local};
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Split};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// How to launch the wrapped process.
///
/// The argument vector is opaque configuration; it is passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable name or path.
    pub program: String,
    /// Fixed argument vector.
    pub args: Vec<String>,
    /// Working directory; must exist.
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    /// Creates a launch spec with no arguments.
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// A live child process owned by the supervisor.
pub struct ProcessHandle {
    child: Child,
    stdin: Mutex<Option<ChildStdin>>,
    pid: u32,
    started_at: DateTime<Local>,
    started: Instant,
}

impl ProcessHandle {
    /// Launches the process with piped stdin, stdout and stderr.
    ///
    /// On Unix the child gets its own process group so a Ctrl-C aimed at the
    /// operator's terminal does not bypass the graceful stop command.
    pub fn launch(spec: &LaunchSpec) -> Result<(Self, OutputSource)> {
        if !spec.working_dir.is_dir() {
            return Err(Error::launch(
                &spec.program,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "working directory does not exist: {}",
                        spec.working_dir.display()
                    ),
                ),
            ));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::launch(&spec.program, e))?;

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take();
        let source = OutputSource::new(child.stdout.take(), child.stderr.take());

        tracing::info!(
            pid = pid,
            program = %spec.program,
            cwd = %spec.working_dir.display(),
            "Launched server process"
        );

        Ok((
            Self {
                child,
                stdin: Mutex::new(stdin),
                pid,
                started_at: Local::now(),
                started: Instant::now(),
            },
            source,
        ))
    }

    /// OS process id.
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Wall-clock launch time.
    pub const fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Time since launch.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Writes one line to the process's console and flushes it.
    ///
    /// A process that stops reading stdin eventually fills the pipe; the
    /// write then gives up after `timeout` with `CommandTimeout` and the
    /// channel is closed, as a partial line may already be in the pipe.
    pub async fn send_line(&self, line: &str, timeout: Duration) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        let write = async {
            let mut guard = self.stdin.lock().await;
            let stdin = guard.as_mut().ok_or(Error::ChannelClosed)?;
            if let Err(e) = write_and_flush(stdin, &bytes).await {
                tracing::debug!(pid = self.pid, error = %e, "Command channel closed");
                // A broken pipe stays broken.
                guard.take();
                return Err(Error::ChannelClosed);
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    pid = self.pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "Server console is not reading input, closing command channel"
                );
                self.stdin.lock().await.take();
                Err(Error::CommandTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            },
        }
    }

    /// Returns the exit status if the process has already exited.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Waits up to `timeout` for the process to exit.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Sends SIGKILL (or the platform equivalent) without waiting.
    ///
    /// On Unix the whole process group is killed, so a server started
    /// through a wrapper script does not outlive the wrapper.
    pub fn kill(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            // Group 0 would be our own group.
            if let Some(pgid) = i32::try_from(self.pid).ok().filter(|pid| *pid > 0) {
                match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::debug!(pid = self.pid, error = %e, "Process group kill failed, killing leader only");
                    },
                }
            }
        }
        self.child.start_kill()
    }
}

async fn write_and_flush(stdin: &mut ChildStdin, bytes: &[u8]) -> io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

/// Line stream merging the child's stdout and stderr.
pub struct OutputSource {
    stdout: Option<Split<BufReader<ChildStdout>>>,
    stderr: Option<Split<BufReader<ChildStderr>>>,
}

impl OutputSource {
    fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        Self {
            stdout: stdout.map(|s| BufReader::new(s).split(b'\n')),
            stderr: stderr.map(|s| BufReader::new(s).split(b'\n')),
        }
    }

    /// Waits for the next line from either stream.
    ///
    /// Returns `None` once both streams have ended and all buffered output
    /// has been drained. Invalid UTF-8 is replaced rather than rejected.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            let (from_stdout, read) = match (self.stdout.as_mut(), self.stderr.as_mut()) {
                (None, None) => return None,
                (Some(out), None) => (true, out.next_segment().await),
                (None, Some(err)) => (false, err.next_segment().await),
                (Some(out), Some(err)) => tokio::select! {
                    s = out.next_segment() => (true, s),
                    s = err.next_segment() => (false, s),
                },
            };

            match read {
                Ok(Some(bytes)) => return Some(decode_line(&bytes)),
                Ok(None) => self.close(from_stdout),
                Err(e) => {
                    tracing::debug!(error = %e, "Console stream read failed");
                    self.close(from_stdout);
                },
            }
        }
    }

    fn close(&mut self, stdout: bool) {
        if stdout {
            self.stdout = None;
        } else {
            self.stderr = None;
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
