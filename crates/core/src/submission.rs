//! Input validation for new experiment submissions.
//!
//! Everything here runs before a single byte is uploaded, so a rejected
//! request never leaves objects or provider jobs behind.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default cap on the combined size of all files in one submission (1 GiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1 << 30;

/// Maximum length of a group name.
const MAX_NAME_LEN: usize = 256;

/// Maximum length of a file extension, excluding the dot.
const MAX_EXTENSION_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One file received from the caller.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Client-supplied file name; only its extension is kept.
    pub file_name: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Return the extension of `file_name` including the leading dot.
///
/// Only the final path component is considered. Returns `None` when there
/// is no dot, nothing after the dot, or the suffix contains anything other
/// than ASCII alphanumerics.
pub fn file_extension(file_name: &str) -> Option<&str> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    let dot = base.rfind('.')?;
    let ext = &base[dot..];
    let suffix = &ext[1..];
    if suffix.is_empty()
        || suffix.len() > MAX_EXTENSION_LEN
        || !suffix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext)
}

/// Validate a group name and return it trimmed.
pub fn validate_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Experiment name must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Experiment name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate the pixel-scale parameter forwarded to the analysis model.
pub fn validate_microns_per_pixel(value: f64) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::Validation(format!(
            "micronsPerPixel must be a positive number, got {value}"
        )));
    }
    Ok(())
}

/// Validate the uploaded files and return each file's extension, in order.
///
/// Rejects an empty file list, any file without a recognizable extension,
/// and a combined size above `max_total_bytes`.
pub fn validate_files(
    files: &[UploadFile],
    max_total_bytes: u64,
) -> Result<Vec<String>, CoreError> {
    if files.is_empty() {
        return Err(CoreError::Validation("No files provided".into()));
    }

    let total: u64 = files.iter().map(|f| f.content.len() as u64).sum();
    if total > max_total_bytes {
        return Err(CoreError::Validation(format!(
            "Total size of all files ({total} bytes) exceeds the {max_total_bytes} byte limit"
        )));
    }

    files
        .iter()
        .map(|f| {
            file_extension(&f.file_name)
                .map(str::to_string)
                .ok_or_else(|| {
                    CoreError::Validation(format!("File {} has no extension", f.file_name))
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
