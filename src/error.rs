//! Error types for the pdf2mermaid library.
//!
//! Three error types reflect three failure scopes:
//!
//! * [`ConvertError`] — **Fatal**: the conversion request cannot produce a
//!   diagram (oversized upload, not a PDF, no valid chunks with fallback
//!   disabled). Returned as `Err(ConvertError)` from the orchestrator.
//!   Validation variants map to HTTP 400, everything else to HTTP 500.
//!
//! * [`BackendError`] — a model call failed. Never surfaced directly to the
//!   caller: the orchestrator downgrades to the next strategy
//!   (multimodal → text → rules) and only wraps it in [`ConvertError::Backend`]
//!   when no fallback is left.
//!
//! * [`ChunkError`] — **Non-fatal**: one chunk of a map-reduce run failed.
//!   Stored inside [`crate::map_reduce::MapResult`] so the reduce phase can
//!   work with whatever succeeded.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2mermaid library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Validation errors (HTTP 400) ──────────────────────────────────────
    /// The request carried no document payload.
    #[error("Please upload a PDF file")]
    MissingFile,

    /// Upload exceeds the configured size cap.
    #[error("File too large ({size_mb:.2}MB), maximum supported size is {max_mb}MB")]
    FileTooLarge { size_mb: f64, max_mb: u64 },

    /// Document exceeds the configured page cap.
    #[error("PDF has too many pages ({pages}), maximum supported is {max} pages")]
    TooManyPages { pages: usize, max: usize },

    /// Payload is not a PDF (magic bytes mismatch).
    #[error("Payload is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt or unreadable: {detail}")]
    CorruptPdf { detail: String },

    /// Image entry point received something that is not an image data-URI.
    #[error("Missing or invalid image data: {reason}")]
    InvalidImage { reason: String },

    /// HTTP body content type is neither JSON nor multipart.
    #[error("Unsupported Content-Type '{content_type}'")]
    UnsupportedContentType { content_type: String },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Pipeline errors (HTTP 500) ────────────────────────────────────────
    /// Every chunk of a map-reduce run failed; nothing to synthesise.
    #[error("No valid chunks processed ({total} chunks attempted).\nFirst error: {first_error}")]
    NoValidChunks { total: usize, first_error: String },

    /// The model backend failed and no fallback remained.
    #[error("Model backend failed: {0}")]
    Backend(#[from] BackendError),

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// Conversion exceeded the caller-level timeout.
    #[error("Conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium, place the library\n\
next to the binary, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// True for errors caused by the caller's input rather than the pipeline.
    ///
    /// Validation errors are never retried and never trigger a fallback.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ConvertError::MissingFile
                | ConvertError::FileTooLarge { .. }
                | ConvertError::TooManyPages { .. }
                | ConvertError::NotAPdf { .. }
                | ConvertError::CorruptPdf { .. }
                | ConvertError::InvalidImage { .. }
                | ConvertError::UnsupportedContentType { .. }
                | ConvertError::InvalidInput { .. }
                | ConvertError::FileNotFound { .. }
                | ConvertError::PermissionDenied { .. }
        )
    }
}

/// Failure of a single completion call against the model backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// No provider credential is configured.
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    NotConfigured { provider: String, hint: String },

    /// The backend kept failing after all retries.
    #[error("Completion failed after {attempts} attempt(s): {detail}")]
    RequestFailed { attempts: u32, detail: String },

    /// The backend answered but with no content.
    #[error("Model returned an empty response")]
    EmptyResponse,
}

/// A non-fatal error for a single map-phase chunk.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The summary call for this chunk failed.
    #[error("Chunk {chunk}: summarisation failed: {detail}")]
    SummaryFailed { chunk: usize, detail: String },

    /// The summary came back blank.
    #[error("Chunk {chunk}: empty summary")]
    EmptySummary { chunk: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_too_large_display() {
        let e = ConvertError::FileTooLarge {
            size_mb: 61.234,
            max_mb: 50,
        };
        let msg = e.to_string();
        assert!(msg.contains("61.23MB"), "got: {msg}");
        assert!(msg.contains("50MB"), "got: {msg}");
    }

    #[test]
    fn validation_classification() {
        assert!(ConvertError::MissingFile.is_validation());
        assert!(ConvertError::TooManyPages { pages: 200, max: 100 }.is_validation());
        assert!(!ConvertError::NoValidChunks {
            total: 3,
            first_error: "boom".into()
        }
        .is_validation());
        assert!(!ConvertError::Internal("x".into()).is_validation());
    }

    #[test]
    fn backend_error_wraps_into_convert_error() {
        let e: ConvertError = BackendError::EmptyResponse.into();
        assert!(e.to_string().contains("empty response"));
        assert!(!e.is_validation());
    }

    #[test]
    fn chunk_error_display() {
        let e = ChunkError::SummaryFailed {
            chunk: 4,
            detail: "HTTP 503".into(),
        };
        assert!(e.to_string().contains("Chunk 4"));
        assert!(e.to_string().contains("HTTP 503"));
    }
}
