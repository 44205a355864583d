//! File status monitor
//!
//! Polls the output files on an independent timer and broadcasts their size
//! for UI progress display. Purely observational: it never touches the
//! capture or encoder paths, and a momentarily missing file is reported as
//! not-recording rather than an error.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default polling period
pub const POLL_PERIOD: Duration = Duration::from_millis(200);

/// One observation of one output file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    /// Index of the observed target (0 = primary)
    pub target: usize,

    /// Whether the file currently exists on disk
    pub recording: bool,

    /// File size in whole kilobytes
    pub size_kb: u64,
}

/// Periodic size poller for the session's output files.
pub struct FileStatusMonitor {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    status_tx: broadcast::Sender<FileStatus>,
}

impl FileStatusMonitor {
    /// Start polling the given paths every `period`.
    pub fn start(paths: Vec<PathBuf>, period: Duration) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        let running = Arc::new(AtomicBool::new(true));

        let thread_running = Arc::clone(&running);
        let thread_tx = status_tx.clone();
        let thread = std::thread::spawn(move || {
            while thread_running.load(Ordering::SeqCst) {
                for (target, path) in paths.iter().enumerate() {
                    let status = match std::fs::metadata(path) {
                        Ok(metadata) => FileStatus {
                            target,
                            recording: true,
                            size_kb: metadata.len() / 1024,
                        },
                        Err(_) => FileStatus {
                            target,
                            recording: false,
                            size_kb: 0,
                        },
                    };
                    let _ = thread_tx.send(status);
                }
                std::thread::sleep(period);
            }
        });

        Self {
            running,
            thread: Some(thread),
            status_tx,
        }
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> broadcast::Receiver<FileStatus> {
        self.status_tx.subscribe()
    }

    /// Stop polling and join the timer thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FileStatusMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for<F: Fn(&FileStatus) -> bool>(
        rx: &mut broadcast::Receiver<FileStatus>,
        predicate: F,
    ) -> Option<FileStatus> {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            match rx.try_recv() {
                Ok(status) if predicate(&status) => return Some(status),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty) => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
        None
    }

    #[test]
    fn reports_size_of_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.wav");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let mut monitor = FileStatusMonitor::start(vec![path], Duration::from_millis(20));
        let mut rx = monitor.subscribe();

        let status = wait_for(&mut rx, |s| s.recording).expect("no status received");
        assert_eq!(status.target, 0);
        assert_eq!(status.size_kb, 4);

        monitor.stop();
    }

    #[test]
    fn missing_file_reports_not_recording_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.wav");
        std::fs::write(&present, b"x").unwrap();
        let absent = dir.path().join("b.mp3");

        let mut monitor =
            FileStatusMonitor::start(vec![present, absent], Duration::from_millis(20));
        let mut rx = monitor.subscribe();

        let status = wait_for(&mut rx, |s| s.target == 1).expect("no status for target 1");
        assert!(!status.recording);
        assert_eq!(status.size_kb, 0);

        monitor.stop();
    }
}
