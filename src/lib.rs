//! KVSrecorder - dual-stream microphone recording pipeline.
//!
//! Captures microphone audio and pipes it through one or two external
//! encoder processes simultaneously, producing differently-encoded output
//! files from the same callback stream, each with a sidecar audit log and
//! integrity hash. A presentation layer (GUI or CLI) sits on top; this crate
//! is the pipeline underneath it.

pub mod capture;
pub mod encoder;
pub mod error;
pub mod integrity;
pub mod monitor;
pub mod report;
pub mod session;

pub use capture::{list_input_devices, AudioDeviceInfo, CaptureBackend, CaptureSpec, CpalCapture};
pub use encoder::{AacProfile, AudioFormat, CodecDecision, EncoderPipe, ExitResult, OutputSpec};
pub use error::{ErrorResponse, RecorderError, RecorderResult};
pub use monitor::{FileStatus, FileStatusMonitor};
pub use report::{FormatMeta, ReportGenerator};
pub use session::{
    RecordingEvent, RecordingSession, SessionConfig, SessionState, StartReport, StopReport,
};
