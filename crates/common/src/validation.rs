//! Validation of client-supplied input before it reaches the filesystem or a
//! spawned ffmpeg process.

use anyhow::{anyhow, Result};
use std::path::{Component, Path};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum length for stream URLs
pub const MAX_URI_LENGTH: usize = 4096;

/// Maximum length for uploaded file names
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Current Unix time in milliseconds, 0 if the clock is before the epoch.
pub fn unix_timestamp_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as u64,
        Err(e) => {
            tracing::warn!(error = %e, "system clock is before UNIX epoch, using timestamp 0");
            0
        }
    }
}

pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} characters (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Reject URLs that are empty, oversized, or carry shell metacharacters.
pub fn validate_uri(uri: &str, field_name: &str) -> Result<()> {
    validate_non_empty(uri, field_name)?;
    validate_length(uri, MAX_URI_LENGTH, field_name)?;

    let dangerous_chars = ['`', '$', ';', '|', '&', '\n', '\r'];
    if uri.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!(
            "{} contains dangerous shell metacharacters",
            field_name
        ));
    }

    // ffmpeg reads local files too; only network schemes are accepted here
    let allowed = ["rtsp://", "rtsps://", "http://", "https://", "rtmp://"];
    if !allowed.iter().any(|scheme| uri.starts_with(scheme)) {
        return Err(anyhow!("{} must be a network stream URL", field_name));
    }

    Ok(())
}

/// Reduce a client-supplied upload name to a safe single path component.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let last = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .last()
        .ok_or_else(|| anyhow!("file name '{}' has no usable component", name))?;

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    validate_non_empty(&cleaned, "file name")?;
    validate_length(&cleaned, MAX_FILENAME_LENGTH, "file name")?;
    if cleaned.chars().all(|c| c == '.') {
        return Err(anyhow!("file name '{}' is not allowed", name));
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_uri() {
        assert!(validate_uri("rtsp://camera.local/stream1", "url").is_ok());
        assert!(validate_uri("https://example.com/live.m3u8", "url").is_ok());
        assert!(validate_uri("", "url").is_err());
        assert!(validate_uri("rtsp://cam; rm -rf /", "url").is_err());
        assert!(validate_uri("/etc/passwd", "url").is_err());
        assert!(validate_uri("file:///etc/passwd", "url").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("crowd.mp4").unwrap(), "crowd.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("my video (1).mp4").unwrap(), "my_video__1_.mp4");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("/").is_err());
    }

    #[test]
    fn test_validate_length() {
        assert!(validate_length("abc", 3, "field").is_ok());
        assert!(validate_length("abcd", 3, "field").is_err());
    }

    #[test]
    fn test_timestamp_is_positive() {
        assert!(unix_timestamp_millis() > 0);
    }
}
