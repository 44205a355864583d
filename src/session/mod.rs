//! Recording session orchestration
//!
//! One `RecordingSession` coordinates the capture source, one or two encoder
//! pipes, the audit logs, and the finalize/verify/hash sequence. Per-target
//! failures are isolated: a session is considered started while at least one
//! target's encoder is running, and overall stop success follows the primary
//! target only.

pub mod state;

pub use state::{SessionConfig, SessionState, StartReport, StopReport, TargetReport};

use crate::capture::{CaptureBackend, CaptureSpec};
use crate::encoder::pipe::ExitResult;
use crate::encoder::{build_encoder_command, probe, resolve_codec, CodecDecision, EncoderPipe, OutputSpec};
use crate::integrity;
use chrono::Local;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Wait budget for an encoder's natural exit before escalation
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on encoder stderr quoted in diagnostics
const STDERR_EXCERPT_CHARS: usize = 300;

/// Seconds of recent audio kept for visualization
const RING_SECONDS: usize = 5;

/// Events emitted during a session
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recording started (session id)
    Started(String),
    /// Recording stopped (primary success)
    Stopped(bool),
    /// Non-fatal, user-visible note
    Warning(String),
    /// Session-level failure
    Error(String),
}

/// Caller-supplied decision function for unsupported companding codecs
pub type CodecPolicy = Box<dyn Fn(&str) -> CodecDecision + Send + Sync>;

struct Target {
    index: usize,
    spec: OutputSpec,
    codec: String,
    file_path: PathBuf,
    log_path: PathBuf,
    command: Vec<String>,
    pipe: Option<Arc<Mutex<EncoderPipe>>>,
}

/// Orchestrates one or two live-audio-to-encoder pipelines.
pub struct RecordingSession {
    capture: Box<dyn CaptureBackend>,
    state: SessionState,
    session_id: Option<String>,
    targets: Vec<Target>,
    start_wall: Option<chrono::DateTime<Local>>,
    start_instant: Option<Instant>,
    viz_ring: Arc<Mutex<VecDeque<i16>>>,
    event_tx: broadcast::Sender<RecordingEvent>,
    codec_policy: CodecPolicy,
}

impl RecordingSession {
    /// Create a session over the given capture backend.
    ///
    /// The default codec policy substitutes pcm_s16le for unsupported
    /// companding codecs; UI layers override it to prompt the user.
    pub fn new(capture: Box<dyn CaptureBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            capture,
            state: SessionState::Idle,
            session_id: None,
            targets: Vec::new(),
            start_wall: None,
            start_instant: None,
            viz_ring: Arc::new(Mutex::new(VecDeque::new())),
            event_tx,
            codec_policy: Box::new(|_| CodecDecision::Substitute("pcm_s16le".into())),
        }
    }

    pub fn with_codec_policy(mut self, policy: CodecPolicy) -> Self {
        self.codec_policy = policy;
        self
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Timestamp-derived session id, present while a session exists
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Wall-clock start time of the current session
    pub fn started_at(&self) -> Option<chrono::DateTime<Local>> {
        self.start_wall
    }

    /// Output file paths of the current session, primary first
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.targets.iter().map(|t| t.file_path.clone()).collect()
    }

    /// Recent captured samples for visualization (bounded ring)
    pub fn recent_samples(&self) -> Vec<i16> {
        self.viz_ring.lock().iter().copied().collect()
    }

    /// Elapsed recording time while active
    pub fn duration_ms(&self) -> u64 {
        match self.state {
            SessionState::Active | SessionState::Stopping => self
                .start_instant
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Start a recording session.
    ///
    /// Succeeds when at least one target's encoder is running; failed
    /// targets are reported through `StartReport::warnings`.
    pub fn start(&mut self, config: SessionConfig) -> crate::error::RecorderResult<StartReport> {
        if self.state != SessionState::Idle {
            return Err(crate::error::RecorderError::Session(
                "a session is already in progress".into(),
            ));
        }
        self.state = SessionState::Starting;

        match self.start_inner(config) {
            Ok(report) => {
                self.state = SessionState::Active;
                let _ = self
                    .event_tx
                    .send(RecordingEvent::Started(report.session_id.clone()));
                for warning in &report.warnings {
                    let _ = self.event_tx.send(RecordingEvent::Warning(warning.clone()));
                }
                Ok(report)
            }
            Err(e) => {
                // Start never leaves partial state behind
                self.targets.clear();
                self.session_id = None;
                self.state = SessionState::Idle;
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn start_inner(&mut self, config: SessionConfig) -> crate::error::RecorderResult<StartReport> {
        std::fs::create_dir_all(&config.output_dir).map_err(|e| {
            crate::error::RecorderError::Path(format!(
                "cannot create output directory {}: {}",
                config.output_dir.display(),
                e
            ))
        })?;

        let session_id = format!("rec_{}", Local::now().format("%Y%m%d-%H%M%S"));
        let mut warnings = Vec::new();

        let mut specs: Vec<OutputSpec> = vec![config.primary.clone()];
        if let Some(secondary) = &config.secondary {
            specs.push(secondary.clone());
        }

        let mut targets = Vec::new();
        for (index, spec) in specs.into_iter().enumerate() {
            let suffix = if index == 0 { "" } else { "_2" };
            let file_path = config
                .output_dir
                .join(format!("{}{}.{}", session_id, suffix, spec.format.extension()));
            let log_path = config
                .output_dir
                .join(format!("{}{}_log.txt", session_id, suffix));
            let program = spec.program.clone().unwrap_or_else(|| config.program.clone());

            let mut codec = spec.codec.clone();
            let mut failure = None;
            match probe::verify_available(&program) {
                Ok(()) => match probe::encoder_support(&program) {
                    Ok(support) => {
                        // Capability probe resolves the codec; substitutions
                        // are surfaced as warnings
                        let resolved = resolve_codec(&codec, &support, self.codec_policy.as_ref());
                        if let Some(warning) = resolved.warning {
                            tracing::info!("{}", warning);
                            warnings.push(warning);
                        }
                        codec = resolved.codec;
                    }
                    Err(e) => {
                        // Best-effort: the encoder itself is the final arbiter
                        tracing::debug!("capability probe failed, continuing: {}", e);
                    }
                },
                Err(e) => failure = Some(e),
            }

            let command = build_encoder_command(
                &program,
                &spec,
                &codec,
                config.sample_rate,
                config.channels,
                &file_path,
            );

            let pipe = if let Some(e) = failure {
                let note = format!(
                    "output target {} ({}) failed to start: {}",
                    index + 1,
                    spec.format,
                    e
                );
                tracing::warn!("{}", note);
                warnings.push(note);
                None
            } else {
                tracing::debug!("spawning encoder: {:?}", command);
                match EncoderPipe::spawn(&command) {
                    Ok(pipe) => Some(Arc::new(Mutex::new(pipe))),
                    Err(e) => {
                        let note = format!(
                            "output target {} ({}) failed to start: {}",
                            index + 1,
                            spec.format,
                            e
                        );
                        tracing::warn!("{}", note);
                        warnings.push(note);
                        None
                    }
                }
            };

            targets.push(Target {
                index,
                spec,
                codec,
                file_path,
                log_path,
                command,
                pipe,
            });
        }

        if targets.iter().all(|t| t.pipe.is_none()) {
            return Err(crate::error::RecorderError::SpawnFailed(format!(
                "no output target could be started: {}",
                warnings.join("; ")
            )));
        }

        // Wire the callback: bounded visualization ring plus synchronous
        // fan-out to every running pipe. The callback thread is the only
        // writer of each pipe's stdin.
        let pipes: Vec<Arc<Mutex<EncoderPipe>>> =
            targets.iter().filter_map(|t| t.pipe.clone()).collect();
        let ring = Arc::clone(&self.viz_ring);
        let ring_cap = config.sample_rate as usize * RING_SECONDS;
        ring.lock().clear();

        let spec = CaptureSpec {
            device_index: config.device_index,
            sample_rate: config.sample_rate,
            channels: config.channels,
            buffer_frames: config.buffer_frames,
        };

        let on_buffer = Box::new(move |samples: &[i16]| {
            {
                let mut ring = ring.lock();
                ring.extend(samples.iter().copied());
                let excess = ring.len().saturating_sub(ring_cap);
                if excess > 0 {
                    ring.drain(..excess);
                }
            }

            let mut bytes = Vec::with_capacity(samples.len() * 2);
            for sample in samples {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            for pipe in &pipes {
                // Write failures are non-fatal and logged once by the pipe
                let _ = pipe.lock().feed(&bytes);
            }
        });

        self.capture.open(&spec, on_buffer)?;

        let start_wall = Local::now();
        for target in targets.iter().filter(|t| t.pipe.is_some()) {
            if let Err(e) =
                integrity::create_log(&target.log_path, &target.file_path, &target.command, start_wall)
            {
                let note = format!(
                    "could not create audit log {}: {}",
                    target.log_path.display(),
                    e
                );
                tracing::warn!("{}", note);
                warnings.push(note);
            }
        }

        let started_targets = targets
            .iter()
            .filter(|t| t.pipe.is_some())
            .map(|t| t.index)
            .collect();

        tracing::info!(
            session = %session_id,
            targets = targets.len(),
            "recording started"
        );

        self.targets = targets;
        self.session_id = Some(session_id.clone());
        self.start_wall = Some(start_wall);
        self.start_instant = Some(Instant::now());

        Ok(StartReport {
            session_id,
            started_targets,
            warnings,
        })
    }

    /// Stop the session and finalize every target.
    pub fn stop(&mut self) -> crate::error::RecorderResult<StopReport> {
        if self.state != SessionState::Active {
            return Err(crate::error::RecorderError::Session(
                "no active recording to stop".into(),
            ));
        }
        self.state = SessionState::Stopping;

        match self.stop_inner() {
            Ok(report) => {
                self.state = SessionState::Finalized;
                let _ = self.event_tx.send(RecordingEvent::Stopped(report.success));
                for warning in &report.warnings {
                    let _ = self.event_tx.send(RecordingEvent::Warning(warning.clone()));
                }
                self.reset();
                Ok(report)
            }
            Err(e) => {
                // Partial log/file state is left for inspection
                self.state = SessionState::Failed;
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn stop_inner(&mut self) -> crate::error::RecorderResult<StopReport> {
        // End time first, so teardown latency never inflates the duration
        let end_wall = Local::now();
        let duration = self
            .start_instant
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);

        // Capture closes before any pipe, so nothing feeds a closing pipe
        self.capture.close();

        let mut warnings = Vec::new();
        let mut reports = Vec::new();
        let mut primary_stderr: Option<String> = None;

        for target in &mut self.targets {
            let exit = match target.pipe.take() {
                Some(pipe) => {
                    let mut pipe = pipe.lock();
                    pipe.request_close();
                    match pipe.finalize(FINALIZE_TIMEOUT) {
                        Ok(exit) => Some(exit),
                        Err(e) => {
                            warnings.push(format!(
                                "finalizing target {} failed: {}",
                                target.index + 1,
                                e
                            ));
                            None
                        }
                    }
                }
                None => None,
            };

            let size_bytes = std::fs::metadata(&target.file_path)
                .map(|m| m.len())
                .unwrap_or(0);
            let valid = size_bytes > 0;

            let hash = if valid {
                match integrity::hash_file(&target.file_path) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        warnings.push(format!(
                            "hashing {} failed: {}",
                            target.file_path.display(),
                            e
                        ));
                        None
                    }
                }
            } else {
                None
            };

            if valid {
                match integrity::update_log(&target.log_path, end_wall, hash.as_deref()) {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(
                        "audit log {} was never created",
                        target.log_path.display()
                    ),
                    Err(e) => warnings.push(format!(
                        "updating audit log {} failed: {}",
                        target.log_path.display(),
                        e
                    )),
                }
            }

            if target.index == 0 {
                primary_stderr = exit.as_ref().map(stderr_excerpt);
            }

            if let Some(exit) = &exit {
                if !exit.success() {
                    warnings.push(format!(
                        "encoder for target {} exited with {:?}: {}",
                        target.index + 1,
                        exit.exit_code,
                        stderr_excerpt(exit)
                    ));
                }
            }

            reports.push(TargetReport {
                index: target.index,
                file_path: target.file_path.clone(),
                log_path: target.log_path.clone(),
                format: target.spec.format,
                codec: target.codec.clone(),
                valid,
                size_bytes,
                hash,
                exit_code: exit.as_ref().and_then(|e| e.exit_code),
            });

            tracing::info!(
                target = target.index,
                valid,
                size_bytes,
                "target finalized"
            );
        }

        let success = reports.first().map(|r| r.valid).unwrap_or(false);

        if let Some(secondary) = reports.get(1) {
            if !secondary.valid {
                warnings.push(format!(
                    "secondary recording {} is empty or was not created",
                    secondary.file_path.display()
                ));
            }
        }

        let diagnostic = if success {
            None
        } else {
            let mut message = String::from(
                "recording was not completed successfully: the primary file is empty or was not created",
            );
            if let Some(primary) = reports.first() {
                if let Some(exit_code) = primary.exit_code {
                    message.push_str(&format!(" (encoder exit code {})", exit_code));
                }
            }
            if let Some(stderr) = primary_stderr.as_deref().filter(|s| !s.is_empty()) {
                message.push_str(&format!(": {}", stderr));
            }
            Some(message)
        };

        Ok(StopReport {
            success,
            duration_ms: duration.as_millis() as u64,
            targets: reports,
            warnings,
            diagnostic,
        })
    }

    fn reset(&mut self) {
        self.targets.clear();
        self.session_id = None;
        self.start_wall = None;
        self.start_instant = None;
        self.state = SessionState::Idle;
    }
}

fn stderr_excerpt(exit: &ExitResult) -> String {
    let text = exit.stderr.trim();
    if text.chars().count() <= STDERR_EXCERPT_CHARS {
        text.to_string()
    } else {
        let excerpt: String = text.chars().take(STDERR_EXCERPT_CHARS).collect();
        format!("{}...", excerpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::BufferCallback;
    use crate::encoder::AudioFormat;
    use crate::error::RecorderError;

    struct NullCapture;

    impl CaptureBackend for NullCapture {
        fn open(
            &mut self,
            _spec: &CaptureSpec,
            _on_buffer: BufferCallback,
        ) -> crate::error::RecorderResult<()> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn stop_without_active_session_is_an_error() {
        let mut session = RecordingSession::new(Box::new(NullCapture));
        let err = session.stop().unwrap_err();
        assert!(matches!(err, RecorderError::Session(_)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn start_fails_and_resets_when_every_encoder_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RecordingSession::new(Box::new(NullCapture));

        let mut config = SessionConfig::new(
            dir.path(),
            OutputSpec::new(AudioFormat::Wav, "pcm_s16le"),
        );
        config.program = "kvsrecorder-no-such-encoder".into();

        let err = session.start(config).unwrap_err();
        assert!(matches!(err, RecorderError::SpawnFailed(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.session_id().is_none());
        assert!(session.output_paths().is_empty());
    }

    #[test]
    fn stderr_excerpt_truncates_long_output() {
        let exit = ExitResult {
            exit_code: Some(1),
            stderr: "e".repeat(1000),
        };
        let excerpt = stderr_excerpt(&exit);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.chars().count(), STDERR_EXCERPT_CHARS + 3);
    }
}
