//! Encoder subprocess pipe
//!
//! Owns one external encoder process and its stdin. PCM bytes are fed from
//! the capture callback thread (exactly one writer per pipe), so `feed` must
//! never block on anything but the pipe write itself and must never flood the
//! log when the process dies mid-recording.

use crate::error::{RecorderError, RecorderResult};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Grace period between the terminate signal and the hard kill
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Wait budget for the stderr drain after the process has exited. A helper
/// process that inherited the write end can keep the pipe open long after
/// the encoder itself is gone; stderr capture is best-effort and must not
/// stall finalize.
const STDERR_COLLECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of an encoder pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Spawned,
    Feeding,
    Closing,
    Exited,
}

/// Exit outcome of an encoder process (best-effort stderr capture)
#[derive(Debug, Clone)]
pub struct ExitResult {
    /// Process exit code; None when killed by a signal
    pub exit_code: Option<i32>,

    /// Captured stderr text, possibly empty
    pub stderr: String,
}

impl ExitResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One running encoder subprocess plus its input pipe.
pub struct EncoderPipe {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_rx: Option<mpsc::Receiver<Vec<u8>>>,
    state: PipeState,
    exit: Option<ExitResult>,
    write_error_logged: bool,
    logged_write_errors: u32,
}

impl EncoderPipe {
    /// Spawn the encoder with the given argument list (program as argv[0]).
    pub fn spawn(command: &[String]) -> RecorderResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| RecorderError::SpawnFailed("empty encoder command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RecorderError::EncoderNotFound(program.clone())
                } else {
                    RecorderError::SpawnFailed(format!("{}: {}", program, e))
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecorderError::SpawnFailed("failed to capture encoder stdin".into()))?;

        // Drain stderr continuously so the encoder can never block on a full
        // pipe. The drain thread is detached and hands its buffer over a
        // channel: finalize takes whatever arrived within a bounded wait, and
        // the thread is left behind if something still holds the write end.
        let stderr_rx = child.stderr.take().map(|mut pipe| {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = pipe.read_to_end(&mut buffer);
                let _ = tx.send(buffer);
            });
            rx
        });

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_rx,
            state: PipeState::Spawned,
            exit: None,
            write_error_logged: false,
            logged_write_errors: 0,
        })
    }

    pub fn state(&self) -> PipeState {
        self.state
    }

    /// Number of write errors actually logged (at most one per pipe)
    pub fn logged_write_errors(&self) -> u32 {
        self.logged_write_errors
    }

    /// Write raw PCM bytes to the encoder's stdin.
    ///
    /// Failures are non-fatal: the stdin handle is dropped so subsequent
    /// feeds become no-ops, and the error is logged exactly once per pipe.
    pub fn feed(&mut self, bytes: &[u8]) -> RecorderResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };
        if self.state == PipeState::Spawned {
            self.state = PipeState::Feeding;
        }

        match stdin.write_all(bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stdin = None;
                if !self.write_error_logged {
                    self.write_error_logged = true;
                    self.logged_write_errors += 1;
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        tracing::debug!("encoder pipe closed while feeding: {}", e);
                    } else {
                        tracing::warn!("encoder write error: {}", e);
                    }
                }
                Err(RecorderError::Io(e))
            }
        }
    }

    /// Close the encoder's stdin, signalling end of input.
    ///
    /// Tolerates an already-closed pipe.
    pub fn request_close(&mut self) {
        self.state = PipeState::Closing;
        self.stdin = None;
    }

    /// Wait for the encoder to exit, escalating to terminate then kill.
    ///
    /// Idempotent: calling again after exit returns the cached result.
    pub fn finalize(&mut self, timeout: Duration) -> RecorderResult<ExitResult> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }

        // Input must be closed before waiting or the encoder never exits
        self.stdin = None;
        if self.state != PipeState::Closing {
            self.state = PipeState::Closing;
        }

        let deadline = Instant::now() + timeout;
        let status = loop {
            match self.child.try_wait()? {
                Some(status) => break status,
                None => {
                    if Instant::now() >= deadline {
                        tracing::warn!("encoder did not exit within {:?}, terminating", timeout);
                        self.terminate();
                        std::thread::sleep(TERMINATE_GRACE);
                        if self.child.try_wait()?.is_none() {
                            tracing::warn!("encoder still alive after terminate, killing");
                            let _ = self.child.kill();
                        }
                        break self.child.wait()?;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        };

        let stderr = self
            .stderr_rx
            .take()
            .and_then(|rx| rx.recv_timeout(STDERR_COLLECT_TIMEOUT).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        let exit = ExitResult {
            exit_code: status.code(),
            stderr,
        };
        self.state = PipeState::Exited;
        self.exit = Some(exit.clone());
        Ok(exit)
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        let _ = signal::kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.kill();
    }
}

impl Drop for EncoderPipe {
    fn drop(&mut self) {
        if self.exit.is_none() {
            self.stdin = None;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_command(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn feed_close_finalize_writes_all_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("pipe.out");
        let mut pipe =
            EncoderPipe::spawn(&shell_command(&format!("cat > {}", out.display()))).unwrap();
        assert_eq!(pipe.state(), PipeState::Spawned);

        pipe.feed(b"hello ").unwrap();
        assert_eq!(pipe.state(), PipeState::Feeding);
        pipe.feed(b"world").unwrap();
        pipe.request_close();
        let exit = pipe.finalize(Duration::from_secs(5)).unwrap();

        assert_eq!(exit.exit_code, Some(0));
        assert_eq!(std::fs::read(&out).unwrap(), b"hello world");
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut pipe = EncoderPipe::spawn(&shell_command("exit 3")).unwrap();
        pipe.request_close();
        let first = pipe.finalize(Duration::from_secs(5)).unwrap();
        let second = pipe.finalize(Duration::from_millis(1)).unwrap();
        assert_eq!(first.exit_code, Some(3));
        assert_eq!(second.exit_code, Some(3));
        assert_eq!(pipe.state(), PipeState::Exited);
    }

    #[test]
    fn write_errors_are_logged_at_most_once() {
        let mut pipe = EncoderPipe::spawn(&shell_command("exit 0")).unwrap();
        // Let the process exit so every write hits a dead pipe
        std::thread::sleep(Duration::from_millis(300));

        let mut failures = 0;
        for _ in 0..5 {
            if pipe.feed(&[0u8; 4096]).is_err() {
                failures += 1;
            }
        }
        assert!(failures >= 1);
        assert_eq!(pipe.logged_write_errors(), 1);

        pipe.finalize(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn request_close_tolerates_already_closed_pipe() {
        let mut pipe = EncoderPipe::spawn(&shell_command("cat > /dev/null")).unwrap();
        pipe.request_close();
        pipe.request_close();
        let exit = pipe.finalize(Duration::from_secs(5)).unwrap();
        assert_eq!(exit.exit_code, Some(0));
    }

    #[test]
    fn finalize_escalates_on_hung_process() {
        // Ignores stdin EOF and sleeps well past the wait budget
        let mut pipe = EncoderPipe::spawn(&shell_command("sleep 30")).unwrap();
        pipe.request_close();
        let started = Instant::now();
        let exit = pipe.finalize(Duration::from_millis(200)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_ne!(exit.exit_code, Some(0));
    }

    #[test]
    fn finalize_is_not_stalled_by_an_orphaned_stderr_holder() {
        // The shell exits immediately but leaves a background child that
        // inherited the stderr write end for its whole lifetime
        let mut pipe = EncoderPipe::spawn(&shell_command("sleep 30 & exit 0")).unwrap();
        pipe.request_close();
        let started = Instant::now();
        let exit = pipe.finalize(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(exit.exit_code, Some(0));
    }

    #[test]
    fn spawn_missing_binary_reports_not_found() {
        let result = EncoderPipe::spawn(&["kvsrecorder-no-such-encoder".to_string()]);
        assert!(matches!(result, Err(RecorderError::EncoderNotFound(_))));
    }
}
