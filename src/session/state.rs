//! Session state and report types
//!
//! Defines the session state machine plus the configuration and outcome
//! types exchanged with the caller (UI layer or CLI harness).

use crate::encoder::{AudioFormat, OutputSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No recording in progress
    Idle,
    /// start() is validating, resolving codecs, and spawning encoders
    Starting,
    /// Capture callback is feeding encoder pipes
    Active,
    /// stop() is tearing down capture and finalizing encoders
    Stopping,
    /// All targets finalized and audit logs updated
    Finalized,
    /// start() or stop() hit an unexpected error; partial state left as-is
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Configuration for starting a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Directory receiving output files and audit logs
    pub output_dir: PathBuf,

    /// Input device index (None = host default)
    pub device_index: Option<usize>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (the pipeline records mono)
    pub channels: u16,

    /// Frames per capture buffer
    pub buffer_frames: u32,

    /// Encoder program used for targets without their own override
    pub program: String,

    /// Primary output target (always present)
    pub primary: OutputSpec,

    /// Optional secondary target for dual-format recording
    pub secondary: Option<OutputSpec>,
}

impl SessionConfig {
    /// Config with the recorder's standard capture settings
    pub fn new(output_dir: impl Into<PathBuf>, primary: OutputSpec) -> Self {
        Self {
            output_dir: output_dir.into(),
            device_index: None,
            sample_rate: 48000,
            channels: 1,
            buffer_frames: 2048,
            program: "ffmpeg".to_string(),
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: OutputSpec) -> Self {
        self.secondary = Some(secondary);
        self
    }
}

/// Outcome of a successful start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    /// Session id, timestamp-derived (e.g. "rec_20250101-120000")
    pub session_id: String,

    /// Indices of targets whose encoder actually started (0 = primary)
    pub started_targets: Vec<usize>,

    /// Non-fatal notes gathered during start (substitutions, failed targets)
    pub warnings: Vec<String>,
}

/// Finalized outcome of one output target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    /// Target index (0 = primary)
    pub index: usize,

    /// Output file path
    pub file_path: PathBuf,

    /// Sidecar audit log path
    pub log_path: PathBuf,

    /// Container format of this target
    pub format: AudioFormat,

    /// Resolved codec that was actually used
    pub codec: String,

    /// File exists and is non-empty
    pub valid: bool,

    /// Final file size in bytes (0 when invalid)
    pub size_bytes: u64,

    /// SHA-256 hex digest, present only for valid targets
    pub hash: Option<String>,

    /// Encoder exit code; None when killed or never started
    pub exit_code: Option<i32>,
}

/// Outcome of stopping a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    /// True when the primary target is valid; secondary failures are
    /// reported through `warnings` instead
    pub success: bool,

    /// Wall-clock recording duration in milliseconds
    pub duration_ms: u64,

    /// Per-target outcomes, primary first
    pub targets: Vec<TargetReport>,

    /// Non-fatal, user-visible notes (secondary failure, log IO trouble)
    pub warnings: Vec<String>,

    /// Human-readable failure detail when the primary target is invalid
    pub diagnostic: Option<String>,
}

impl StopReport {
    /// The primary target's outcome
    pub fn primary(&self) -> &TargetReport {
        &self.targets[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::AudioFormat;

    #[test]
    fn session_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionState::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn config_defaults_match_recorder_settings() {
        let config = SessionConfig::new(
            "/tmp/out",
            OutputSpec::new(AudioFormat::Wav, "pcm_s16le"),
        );
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.buffer_frames, 2048);
        assert_eq!(config.program, "ffmpeg");
        assert!(config.secondary.is_none());
    }
}
