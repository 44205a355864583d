//! Post-recording report interface
//!
//! The PDF analysis report (waveform, spectrogram, statistics) is produced by
//! a downstream collaborator. The pipeline only guarantees it hands over a
//! valid, finalized, non-empty file path together with its format metadata.

use crate::encoder::AudioFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format metadata handed to the report generator alongside the file path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatMeta {
    pub format: AudioFormat,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Downstream consumer of a finished recording.
pub trait ReportGenerator {
    /// Produce a report for the given finalized audio file.
    ///
    /// Returns the report path on success, a human-readable message on
    /// failure. Report failure never affects recording validity.
    fn generate_report(&self, audio_path: &Path, meta: &FormatMeta) -> Result<PathBuf, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubGenerator;

    impl ReportGenerator for StubGenerator {
        fn generate_report(
            &self,
            audio_path: &Path,
            _meta: &FormatMeta,
        ) -> Result<PathBuf, String> {
            Ok(audio_path.with_extension("pdf"))
        }
    }

    #[test]
    fn report_path_sits_next_to_the_recording() {
        let meta = FormatMeta {
            format: AudioFormat::Wav,
            codec: "pcm_s16le".into(),
            sample_rate: 48000,
            channels: 1,
        };
        let path = StubGenerator
            .generate_report(Path::new("/tmp/rec_20250101-120000.wav"), &meta)
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/rec_20250101-120000.pdf"));
    }

    #[test]
    fn format_meta_serializes_camel_case() {
        let meta = FormatMeta {
            format: AudioFormat::Mp3,
            codec: "libmp3lame".into(),
            sample_rate: 44100,
            channels: 1,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("sampleRate"));
        assert!(json.contains("\"mp3\""));
    }
}
