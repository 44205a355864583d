//! Recording integrity
//!
//! Sidecar audit logs and file hashing. Each output file gets a
//! `<base>_log.txt` written at start with in-progress placeholders, then
//! patched in place at finalize with the end time, duration, hash, and final
//! size. The log is a flat human-readable record; nothing in the pipeline
//! parses it back except the targeted placeholder replacement below.

use crate::error::RecorderResult;
use chrono::{DateTime, Local, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const HASH_CHUNK_SIZE: usize = 4096;

/// SHA-256 of a file, read in fixed-size chunks, hex-encoded.
pub fn hash_file(path: &Path) -> RecorderResult<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Format a byte count as B/KB/MB by magnitude.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a duration as H:MM:SS.mmm.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Write the initial audit log for one output target.
///
/// End time, duration, hash, and size carry in-progress placeholders until
/// `update_log` patches them at finalize.
pub fn create_log(
    log_path: &Path,
    target_path: &Path,
    command: &[String],
    start_time: DateTime<Local>,
) -> RecorderResult<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let filename = target_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content = format!(
        "\nKVSrecorder v{version} - RECORDING LOG\n\
         ==================================\n\n\
         File Information:\n\
         ----------------\n\
         Filename: {filename}\n\
         File Path: {path}\n\
         File Size: N/A\n\
         File Hash (SHA-256): File not found\n\n\
         Recording Session:\n\
         ----------------\n\
         Start Time: {start}\n\
         End Time: In Progress\n\
         Duration: In Progress\n\n\
         Encoder Command:\n\
         ----------------\n\
         {command}\n\n\
         System Information:\n\
         ----------------\n\
         Platform: {platform}\n\
         Software Version: {version}\n\
         Log Created: {created}\n",
        version = env!("CARGO_PKG_VERSION"),
        filename = filename,
        path = target_path.display(),
        start = start_time.format(TIMESTAMP_FORMAT),
        command = command.join(" "),
        platform = std::env::consts::OS,
        created = Local::now().format(TIMESTAMP_FORMAT),
    );

    fs::write(log_path, content)?;
    Ok(())
}

/// Patch an existing audit log with the end time, duration, hash, and size.
///
/// Returns Ok(false) as a silent no-op when the log was never created.
pub fn update_log(
    log_path: &Path,
    end_time: DateTime<Local>,
    file_hash: Option<&str>,
) -> RecorderResult<bool> {
    if !log_path.exists() {
        return Ok(false);
    }

    let mut content = fs::read_to_string(log_path)?;

    let end_str = end_time.format(TIMESTAMP_FORMAT).to_string();
    content = content.replace("End Time: In Progress", &format!("End Time: {}", end_str));

    // Duration is recomputed from the logged start time so the log stays
    // self-consistent even if the caller's clock drifted
    if let Some(start_str) = field_value(&content, "Start Time:") {
        let parsed = NaiveDateTime::parse_from_str(&start_str, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(&start_str, "%Y-%m-%d %H:%M:%S"));
        if let Ok(start) = parsed {
            let elapsed = end_time.naive_local() - start;
            if let Ok(elapsed) = elapsed.to_std() {
                content = content.replace(
                    "Duration: In Progress",
                    &format!("Duration: {}", format_duration(elapsed)),
                );
            }
        }
    }

    if let Some(path_str) = field_value(&content, "File Path:") {
        let target = Path::new(&path_str);
        if let Ok(metadata) = fs::metadata(target) {
            let size_str = format!("File Size: {}", format_size(metadata.len()));
            if content.contains("File Size: N/A") {
                content = content.replace("File Size: N/A", &size_str);
            } else if let Some(existing) = line_starting_with(&content, "File Size:") {
                content = content.replace(&existing, &size_str);
            }
        }
    }

    if let Some(hash) = file_hash {
        content = content.replace(
            "File Hash (SHA-256): File not found",
            &format!("File Hash (SHA-256): {}", hash),
        );
    }

    fs::write(log_path, content)?;
    Ok(true)
}

fn field_value(content: &str, prefix: &str) -> Option<String> {
    content
        .lines()
        .find(|line| line.starts_with(prefix))
        .map(|line| line[prefix.len()..].trim().to_string())
}

fn line_starting_with(content: &str, prefix: &str) -> Option<String> {
    content
        .lines()
        .find(|line| line.starts_with(prefix))
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn hash_file_matches_known_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");

        fs::write(&path, b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn size_formatting_by_magnitude() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(StdDuration::from_millis(1500)), "00:00:01.500");
        assert_eq!(
            format_duration(StdDuration::from_secs(3600 + 2 * 60 + 3)),
            "01:02:03.000"
        );
    }

    #[test]
    fn create_then_update_leaves_no_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("rec_20250101-120000.wav");
        let log = dir.path().join("rec_20250101-120000_log.txt");
        fs::write(&target, vec![0u8; 4096]).unwrap();

        let command: Vec<String> = ["ffmpeg", "-y", "-i", "pipe:0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let start = Local::now();
        create_log(&log, &target, &command, start).unwrap();

        let initial = fs::read_to_string(&log).unwrap();
        assert!(initial.contains("End Time: In Progress"));
        assert!(initial.contains("File Hash (SHA-256): File not found"));
        assert!(initial.contains("ffmpeg -y -i pipe:0"));

        let hash = hash_file(&target).unwrap();
        let updated = update_log(&log, start + chrono::Duration::seconds(2), Some(&hash)).unwrap();
        assert!(updated);

        let content = fs::read_to_string(&log).unwrap();
        assert!(!content.contains("In Progress"));
        assert!(!content.contains("File not found"));
        assert!(!content.contains("File Size: N/A"));
        assert!(content.contains(&hash));
        assert!(content.contains("Duration: 00:00:02."));
        assert!(content.contains("File Size: 4.00 KB"));
    }

    #[test]
    fn update_missing_log_is_silent_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope_log.txt");
        let updated = update_log(&missing, Local::now(), Some("deadbeef")).unwrap();
        assert!(!updated);
    }
}
