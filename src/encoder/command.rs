//! Encoder command construction
//!
//! Builds the full encoder argument list for one output target from its
//! format, codec, and bitrate settings. The command is deterministic so the
//! audit log can reproduce exactly what was executed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default bitrate applied to lossy targets that did not specify one
pub const DEFAULT_BITRATE: &str = "256k";

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
    M4a,
}

impl AudioFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::M4a => "m4a",
        }
    }

    /// Default codec for this format
    pub fn default_codec(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Ogg => "libvorbis",
            AudioFormat::Flac => "flac",
            AudioFormat::M4a => "aac",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" => Ok(AudioFormat::Ogg),
            "flac" => Ok(AudioFormat::Flac),
            "m4a" => Ok(AudioFormat::M4a),
            other => Err(format!("unknown audio format: {}", other)),
        }
    }
}

/// HE-AAC profile variants for libfdk_aac targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AacProfile {
    HeV1,
    HeV2,
}

impl AacProfile {
    fn flag(&self) -> &'static str {
        match self {
            AacProfile::HeV1 => "aac_he",
            AacProfile::HeV2 => "aac_he_v2",
        }
    }
}

/// One configured output of a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    /// Container format
    pub format: AudioFormat,

    /// Requested encoder identifier (may be substituted at start)
    pub codec: String,

    /// Bitrate for lossy targets (e.g. "192k"); ignored elsewhere
    pub bitrate: Option<String>,

    /// HE-AAC variant, only meaningful for libfdk_aac m4a targets
    pub aac_profile: Option<AacProfile>,

    /// Encoder program override for this target (None = session default)
    pub program: Option<String>,
}

impl OutputSpec {
    pub fn new(format: AudioFormat, codec: impl Into<String>) -> Self {
        Self {
            format,
            codec: codec.into(),
            bitrate: None,
            aac_profile: None,
            program: None,
        }
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = Some(bitrate.into());
        self
    }
}

/// Build the full encoder argument list (program included as argv[0]).
///
/// Input is always raw interleaved little-endian s16 PCM on stdin.
pub fn build_encoder_command(
    program: &str,
    spec: &OutputSpec,
    codec: &str,
    sample_rate: u32,
    channels: u16,
    output_path: &Path,
) -> Vec<String> {
    let mut command: Vec<String> = vec![
        program.to_string(),
        "-y".into(),
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        sample_rate.to_string(),
        "-ac".into(),
        channels.to_string(),
        "-i".into(),
        "pipe:0".into(),
    ];

    let bitrate = spec
        .bitrate
        .clone()
        .unwrap_or_else(|| DEFAULT_BITRATE.to_string());

    match spec.format {
        AudioFormat::Wav => {
            // Companding codecs are 8-bit and use their pcm_* encoder names
            let wav_codec = match codec {
                "alaw" => "pcm_alaw",
                "mulaw" => "pcm_mulaw",
                other => other,
            };
            command.extend(["-c:a".into(), wav_codec.to_string()]);
        }
        AudioFormat::Mp3 => {
            command.extend(["-c:a".into(), codec.to_string(), "-b:a".into(), bitrate]);
        }
        AudioFormat::Ogg => {
            if codec == "libvorbis" {
                // Vorbis is quality-driven, not bitrate-driven
                command.extend(["-c:a".into(), codec.to_string(), "-q:a".into(), "4".into()]);
            } else {
                command.extend(["-c:a".into(), codec.to_string(), "-b:a".into(), bitrate]);
            }
        }
        AudioFormat::Flac => {
            command.extend([
                "-c:a".into(),
                codec.to_string(),
                "-compression_level".into(),
                "8".into(),
            ]);
        }
        AudioFormat::M4a => {
            if codec.contains("libfdk_aac") {
                command.extend(["-c:a".into(), codec.to_string()]);
                if let Some(profile) = spec.aac_profile {
                    command.extend(["-profile:a".into(), profile.flag().to_string()]);
                }
                command.extend(["-b:a".into(), bitrate]);
            } else {
                command.extend([
                    "-c:a".into(),
                    codec.to_string(),
                    "-b:a".into(),
                    bitrate,
                    "-strict".into(),
                    "experimental".into(),
                ]);
            }
        }
    }

    command.push(output_path.to_string_lossy().to_string());
    command
}
