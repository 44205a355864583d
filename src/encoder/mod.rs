//! External encoder integration
//!
//! Everything that touches the encoder binary lives here: availability and
//! capability probing, deterministic command construction, and the owning
//! wrapper around one running encoder subprocess.

pub mod command;
pub mod pipe;
pub mod probe;

pub use command::{build_encoder_command, AacProfile, AudioFormat, OutputSpec};
pub use pipe::{EncoderPipe, ExitResult, PipeState};
pub use probe::{resolve_codec, CodecDecision, ResolvedCodec};
