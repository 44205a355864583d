//! Encoder availability and capability probing
//!
//! Short, timeout-bounded invocations of the encoder binary: a version probe
//! to confirm the binary is callable and an encoder-list probe whose free-text
//! output is searched by substring for each candidate codec. Codec resolution
//! (substitution table plus the caller-supplied policy for companding codecs)
//! is pure over the probe text so it can be tested without the binary.

use crate::encoder::command::AudioFormat;
use crate::error::{RecorderError, RecorderResult};
use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Probe invocations are expected to return almost immediately
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Caller decision for an unsupported companding codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecDecision {
    /// Keep the requested codec and let the encoder fail if it must
    Continue,
    /// Record with the given fallback codec instead
    Substitute(String),
}

/// Outcome of resolving one requested codec against the capability probe
#[derive(Debug, Clone)]
pub struct ResolvedCodec {
    /// Codec identifier to put in the encoder command
    pub codec: String,

    /// Human-readable note when the requested codec was changed or is risky
    pub warning: Option<String>,
}

/// Run a probe invocation, killing the process if it overruns the timeout.
fn run_probe(program: &str, arg: &str) -> RecorderResult<(bool, String)> {
    let mut child = Command::new(program)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecorderError::EncoderNotFound(program.to_string())
            } else {
                RecorderError::SpawnFailed(format!("{}: {}", program, e))
            }
        })?;

    // Drain stdout while waiting: an encoder listing can exceed the OS pipe
    // buffer, and a probe blocked on a full pipe never exits
    let stdout_rx = child.stdout.take().map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut text = String::new();
            let _ = pipe.read_to_string(&mut text);
            let _ = tx.send(text);
        });
        rx
    });

    let deadline = Instant::now() + PROBE_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RecorderError::SpawnFailed(format!(
                        "{} {} probe timed out",
                        program, arg
                    )));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => return Err(RecorderError::Io(e)),
        }
    };

    let stdout = stdout_rx
        .and_then(|rx| rx.recv_timeout(PROBE_TIMEOUT).ok())
        .unwrap_or_default();
    Ok((status.success(), stdout))
}

/// Verify the encoder binary is callable (version probe).
pub fn verify_available(program: &str) -> RecorderResult<()> {
    let (success, _) = run_probe(program, "-version")?;
    if success {
        Ok(())
    } else {
        Err(RecorderError::EncoderNotFound(program.to_string()))
    }
}

/// Fetch the encoder-list probe output as free text.
pub fn encoder_support(program: &str) -> RecorderResult<String> {
    let (success, stdout) = run_probe(program, "-encoders")?;
    if success {
        Ok(stdout)
    } else {
        Err(RecorderError::SpawnFailed(format!(
            "{} -encoders probe failed",
            program
        )))
    }
}

/// Name searched for in the encoder list for a requested codec
fn probe_name(codec: &str) -> &str {
    match codec {
        "alaw" => "pcm_alaw",
        "mulaw" => "pcm_mulaw",
        other => other,
    }
}

fn is_companding(codec: &str) -> bool {
    codec == "alaw" || codec == "mulaw"
}

/// Known-good alternative encoder names for older encoder builds
fn alternative_for(codec: &str) -> Option<&'static str> {
    match codec {
        "libmp3lame" => Some("mp3"),
        "libvorbis" => Some("vorbis"),
        "libopus" => Some("opus"),
        "aac" => Some("aac"),
        _ => None,
    }
}

/// Resolve a requested codec against the capability probe output.
///
/// `on_unsupported` is consulted only for companding codecs with no
/// substitute; other unsupported codecs keep the requested name and carry a
/// warning (the encoder itself is the final arbiter).
pub fn resolve_codec(
    requested: &str,
    support: &str,
    on_unsupported: &dyn Fn(&str) -> CodecDecision,
) -> ResolvedCodec {
    let lookup = probe_name(requested);
    if support.contains(lookup) {
        return ResolvedCodec {
            codec: requested.to_string(),
            warning: None,
        };
    }

    if !is_companding(requested) {
        if let Some(alternative) = alternative_for(lookup) {
            if support.contains(alternative) {
                return ResolvedCodec {
                    codec: alternative.to_string(),
                    warning: Some(format!(
                        "using alternative codec '{}' in place of '{}'",
                        alternative, requested
                    )),
                };
            }
        }
        return ResolvedCodec {
            codec: requested.to_string(),
            warning: Some(format!(
                "codec '{}' may not be supported by the installed encoder",
                requested
            )),
        };
    }

    match on_unsupported(requested) {
        CodecDecision::Continue => ResolvedCodec {
            codec: requested.to_string(),
            warning: Some(format!(
                "continuing with unsupported companding codec '{}'",
                requested
            )),
        },
        CodecDecision::Substitute(fallback) => ResolvedCodec {
            warning: Some(format!(
                "substituted '{}' for unsupported codec '{}'",
                fallback, requested
            )),
            codec: fallback,
        },
    }
}

/// Build the per-format codec menus from the encoder-list probe output.
///
/// The base menus always include the universally-supported codecs; optional
/// ones are appended when the probe text mentions them.
pub fn parse_codec_support(support: &str) -> BTreeMap<AudioFormat, Vec<String>> {
    let mut wav: Vec<String> = vec!["pcm_s16le".into()];
    if support.contains("pcm_s24le") {
        wav.push("pcm_s24le".into());
    }
    if support.contains("pcm_f32le") {
        wav.push("pcm_f32le".into());
    }
    if support.contains("pcm_alaw") || support.contains("alaw") {
        wav.push("alaw".into());
    }
    if support.contains("pcm_mulaw") || support.contains("mulaw") {
        wav.push("mulaw".into());
    }

    let mut ogg: Vec<String> = vec!["libvorbis".into()];
    if support.contains("libopus") {
        ogg.push("libopus".into());
    }

    let mut menus: BTreeMap<AudioFormat, Vec<String>> = BTreeMap::new();
    menus.insert(AudioFormat::Wav, wav);
    menus.insert(AudioFormat::Mp3, vec!["libmp3lame".into()]);
    menus.insert(AudioFormat::Ogg, ogg);
    menus.insert(AudioFormat::Flac, vec!["flac".into()]);
    menus.insert(AudioFormat::M4a, vec!["aac".into()]);
    menus
}

/// Probe the encoder and build the codec menus, falling back to the
/// built-in defaults when the probe fails.
pub fn available_codecs(program: &str) -> BTreeMap<AudioFormat, Vec<String>> {
    match encoder_support(program) {
        Ok(support) => parse_codec_support(&support),
        Err(e) => {
            tracing::warn!("unable to query encoder for codecs: {}", e);
            let mut menus = parse_codec_support("");
            menus.insert(
                AudioFormat::Wav,
                vec![
                    "pcm_s16le".into(),
                    "pcm_s24le".into(),
                    "pcm_f32le".into(),
                    "alaw".into(),
                    "mulaw".into(),
                ],
            );
            menus
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const FULL_SUPPORT: &str =
        "pcm_s16le pcm_s24le pcm_f32le pcm_alaw pcm_mulaw libmp3lame libvorbis libopus flac aac";

    fn no_policy(_: &str) -> CodecDecision {
        panic!("policy must not be consulted");
    }

    #[test]
    fn supported_codec_resolves_unchanged() {
        let resolved = resolve_codec("pcm_s16le", FULL_SUPPORT, &no_policy);
        assert_eq!(resolved.codec, "pcm_s16le");
        assert!(resolved.warning.is_none());
    }

    #[test]
    fn companding_codec_looks_up_pcm_name() {
        let resolved = resolve_codec("mulaw", FULL_SUPPORT, &no_policy);
        assert_eq!(resolved.codec, "mulaw");
        assert!(resolved.warning.is_none());
    }

    #[test]
    fn missing_codec_takes_known_alternative() {
        let resolved = resolve_codec("libmp3lame", "mp3 aac flac", &no_policy);
        assert_eq!(resolved.codec, "mp3");
        assert!(resolved.warning.unwrap().contains("alternative"));
    }

    #[test]
    fn unresolvable_companding_codec_consults_policy_once() {
        let calls = Cell::new(0u32);
        let seen = Cell::new(false);
        let policy = |codec: &str| {
            calls.set(calls.get() + 1);
            seen.set(codec == "mulaw");
            CodecDecision::Substitute("pcm_s16le".into())
        };
        let resolved = resolve_codec("mulaw", "pcm_s16le aac", &policy);
        assert_eq!(calls.get(), 1);
        assert!(seen.get());
        assert_eq!(resolved.codec, "pcm_s16le");
        assert!(resolved.warning.unwrap().contains("substituted"));
    }

    #[test]
    fn continue_anyway_keeps_requested_codec() {
        let policy = |_: &str| CodecDecision::Continue;
        let resolved = resolve_codec("alaw", "pcm_s16le", &policy);
        assert_eq!(resolved.codec, "alaw");
        assert!(resolved.warning.is_some());
    }

    #[test]
    fn unknown_codec_keeps_name_with_warning() {
        let resolved = resolve_codec("libfdk_aac", "pcm_s16le aac", &no_policy);
        assert_eq!(resolved.codec, "libfdk_aac");
        assert!(resolved.warning.is_some());
    }

    #[test]
    fn codec_menus_follow_probe_output() {
        let menus = parse_codec_support(FULL_SUPPORT);
        let wav = &menus[&AudioFormat::Wav];
        assert!(wav.iter().any(|c| c == "pcm_s24le"));
        assert!(wav.iter().any(|c| c == "mulaw"));
        assert!(menus[&AudioFormat::Ogg].iter().any(|c| c == "libopus"));

        let menus = parse_codec_support("pcm_s16le");
        assert_eq!(menus[&AudioFormat::Wav], vec!["pcm_s16le".to_string()]);
        assert_eq!(menus[&AudioFormat::Ogg], vec!["libvorbis".to_string()]);
    }

    #[test]
    fn missing_binary_reports_not_found() {
        let err = verify_available("kvsrecorder-no-such-encoder").unwrap_err();
        assert!(matches!(err, RecorderError::EncoderNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn encoder_listing_larger_than_a_pipe_buffer_is_read_in_full() {
        use std::os::unix::fs::PermissionsExt;

        // ~240 KB of listing, several times the OS pipe buffer
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide-listing");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             i=0\n\
             while [ $i -lt 6000 ]; do\n\
             echo \"A..... pcm_s16le     PCM signed 16-bit LE\"\n\
             i=$((i+1))\n\
             done\n",
        )
        .unwrap();
        let mut permissions = std::fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).unwrap();

        let started = Instant::now();
        let support = encoder_support(path.to_str().unwrap()).unwrap();
        assert!(started.elapsed() < PROBE_TIMEOUT);
        assert!(support.len() > 100_000);
        assert!(support.contains("pcm_s16le"));
    }
}
