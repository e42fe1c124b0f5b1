//! Batch archive unpacking: one job input (or rejection) per image.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use crate::error::{ErrorRecord, VerifyError};
use crate::services::intake::{self, IntakeError};
use crate::services::store::BatchEntry;
use crate::services::vault::ImageVault;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch file is not a readable ZIP archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive contains no images")]
    NoImages,

    #[error("archive holds {count} images, the limit is {limit}")]
    TooManyImages { count: usize, limit: usize },

    #[error("archive holds {count} entries, the limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },
}

impl From<BatchError> for VerifyError {
    fn from(err: BatchError) -> Self {
        VerifyError::InvalidInput(err.to_string())
    }
}

/// Limits applied to one uploaded archive.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_images: usize,
    pub max_image_bytes: usize,
}

enum Payload {
    Bytes(Vec<u8>),
    TooLarge(u64),
    Unreadable(String),
}

struct ArchiveFile {
    name: String,
    payload: Payload,
}

/// `labels/a.png` and `labels/a.json` pair up on `labels/a`.
fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot > name.rfind('/').map_or(0, |slash| slash + 1) => &name[..dot],
        _ => name,
    }
}

fn is_reference(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".json")
}

fn is_hidden(name: &str) -> bool {
    name.starts_with("__MACOSX/") || name.rsplit('/').next().is_some_and(|base| base.starts_with('.'))
}

fn read_entries(archive_bytes: &[u8], limits: BatchLimits) -> Result<Vec<ArchiveFile>, BatchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))?;

    // folders and resource forks do not count against the cap
    let entry_limit = limits.max_images * 2;
    let counted = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && !is_hidden(name))
        .count();
    if counted > entry_limit {
        return Err(BatchError::TooManyEntries {
            count: counted,
            limit: entry_limit,
        });
    }

    let mut files = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() || is_hidden(entry.name()) {
            continue;
        }
        let name = entry.name().to_string();
        let declared = entry.size();

        let payload = if declared > limits.max_image_bytes as u64 {
            Payload::TooLarge(declared)
        } else {
            let mut bytes = Vec::with_capacity(declared as usize);
            // declared sizes can lie; never read past the limit
            match (&mut entry)
                .take(limits.max_image_bytes as u64 + 1)
                .read_to_end(&mut bytes)
            {
                Ok(n) if n > limits.max_image_bytes => Payload::TooLarge(n as u64),
                Ok(_) => Payload::Bytes(bytes),
                Err(e) => Payload::Unreadable(e.to_string()),
            }
        };
        files.push(ArchiveFile { name, payload });
    }
    Ok(files)
}

/// Unpack an archive of label images with optional same-named `.json`
/// reference files, in name order.
///
/// Archive-level problems fail the whole upload. Per-image problems become
/// rejected entries so the rest of the batch still runs.
pub fn unpack(vault: &ImageVault, archive_bytes: &[u8], limits: BatchLimits) -> Result<Vec<BatchEntry>, BatchError> {
    let files = read_entries(archive_bytes, limits)?;

    let mut references: HashMap<String, Result<String, String>> = HashMap::new();
    let mut images = Vec::new();
    for file in files {
        if is_reference(&file.name) {
            let text = match file.payload {
                Payload::Bytes(bytes) => String::from_utf8(bytes).map_err(|_| "reference file is not UTF-8".to_string()),
                Payload::TooLarge(size) => Err(format!("reference file is {size} bytes")),
                Payload::Unreadable(e) => Err(e),
            };
            references.insert(stem(&file.name).to_string(), text);
        } else {
            images.push(file);
        }
    }

    if images.is_empty() {
        return Err(BatchError::NoImages);
    }
    if images.len() > limits.max_images {
        return Err(BatchError::TooManyImages {
            count: images.len(),
            limit: limits.max_images,
        });
    }
    images.sort_by(|a, b| a.name.cmp(&b.name));

    let entries = images
        .into_iter()
        .map(|file| {
            let reference = match references.get(stem(&file.name)) {
                None => Ok(None),
                Some(Ok(json)) => intake::parse_reference(Some(json.as_str())).map_err(|e| e.to_record()),
                Some(Err(reason)) => Err(ErrorRecord::invalid_input(format!(
                    "unreadable reference for {}: {reason}",
                    file.name
                ))),
            };

            let input = reference.and_then(|reference| match file.payload {
                Payload::Bytes(bytes) => {
                    intake::prepare(vault, &file.name, &bytes, reference, limits.max_image_bytes)
                        .map_err(|e| e.to_record())
                }
                Payload::TooLarge(size) => Err(IntakeError::TooLarge {
                    filename: file.name.clone(),
                    size: size as usize,
                    limit: limits.max_image_bytes,
                }
                .to_record()),
                Payload::Unreadable(reason) => Err(ErrorRecord::invalid_input(format!(
                    "failed to read {}: {reason}",
                    file.name
                ))),
            });

            match input {
                Ok(input) => BatchEntry::Accepted(input),
                Err(error) => {
                    tracing::debug!(filename = %file.name, error = %error.message, "batch item rejected");
                    BatchEntry::Rejected {
                        filename: file.name,
                        error,
                    }
                }
            }
        })
        .collect();

    Ok(entries)
}
