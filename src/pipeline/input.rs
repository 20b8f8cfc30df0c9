//! Input resolution: turn a user-supplied path or URL into document bytes.
//!
//! The library entry points work on bytes; only the CLI starts from a path
//! or URL. Magic bytes (`%PDF`) are checked here so callers get a meaningful
//! error instead of a pdfium failure further down.

use crate::error::ConvertError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject payloads that do not start with `%PDF`.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), ConvertError> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(ConvertError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        })
    }
}

/// Load the PDF at `input`, downloading it first when it is a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Vec<u8>, ConvertError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else if input.trim().is_empty() {
        return Err(ConvertError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(input).await?
    };
    check_pdf_magic(&bytes)?;
    Ok(bytes)
}

/// Read a local file, mapping I/O failures to typed errors.
pub async fn read_local(path_str: &str) -> Result<Vec<u8>, ConvertError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ConvertError::PermissionDenied { path })
        }
        Err(_) => Err(ConvertError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ConvertError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ConvertError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ConvertError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
