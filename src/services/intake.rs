//! Upload checks run before anything is queued.

use std::path::Path;

use image::ImageFormat;

use crate::error::{ErrorRecord, VerifyError};
use crate::models::job::JobInput;
use crate::models::label::{ReferenceError, ReferenceFields};
use crate::services::vault::{ImageVault, VaultError};

/// The two container formats TTB accepts for label submissions.
pub const ACCEPTED_FORMATS: [ImageFormat; 2] = [ImageFormat::Png, ImageFormat::Jpeg];

const ACCEPTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{filename} is empty")]
    Empty { filename: String },

    #[error("{filename} is {size} bytes, over the {limit} byte limit")]
    TooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    #[error("{filename} is not a PNG or JPEG image")]
    UnsupportedFormat { filename: String },

    #[error("invalid reference data: {0}")]
    Reference(#[from] ReferenceError),

    #[error("failed to store image: {0}")]
    Vault(#[from] VaultError),
}

impl From<IntakeError> for VerifyError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Vault(e) => VerifyError::ValidationInternalError(e.to_string()),
            other => VerifyError::InvalidInput(other.to_string()),
        }
    }
}

impl IntakeError {
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            IntakeError::Vault(e) => ErrorRecord::internal(e.to_string(), 0),
            other => ErrorRecord::invalid_input(other.to_string()),
        }
    }
}

/// Check size, extension and magic bytes. The content decides the format;
/// a recognised extension that disagrees with it is still rejected.
pub fn check_image(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<ImageFormat, IntakeError> {
    if bytes.is_empty() {
        return Err(IntakeError::Empty {
            filename: filename.to_string(),
        });
    }
    if bytes.len() > max_bytes {
        return Err(IntakeError::TooLarge {
            filename: filename.to_string(),
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let unsupported = || IntakeError::UnsupportedFormat {
        filename: filename.to_string(),
    };

    if let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) {
        if !ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return Err(unsupported());
        }
    }

    let format = image::guess_format(bytes).map_err(|_| unsupported())?;
    if ACCEPTED_FORMATS.contains(&format) {
        Ok(format)
    } else {
        Err(unsupported())
    }
}

/// Parse an optional reference payload. Blank input means "no reference".
pub fn parse_reference(raw: Option<&str>) -> Result<Option<ReferenceFields>, IntakeError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(json) => {
            let reference = ReferenceFields::from_json_str(json)?;
            Ok((!reference.is_empty()).then_some(reference))
        }
    }
}

/// Validate an upload and seal it for the job store.
pub fn prepare(
    vault: &ImageVault,
    filename: &str,
    bytes: &[u8],
    reference: Option<ReferenceFields>,
    max_bytes: usize,
) -> Result<JobInput, IntakeError> {
    let format = check_image(filename, bytes, max_bytes)?;
    let image = vault.seal(bytes)?;
    Ok(JobInput {
        filename: filename.to_string(),
        format,
        image,
        reference,
    })
}
