//! Progress-callback trait for map-phase events.
//!
//! Inject an [`Arc<dyn MapProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the map-reduce processor summarises each chunk. The CLI uses it
//! to drive a progress bar; a server could forward events to a channel.
//!
//! # Example
//!
//! ```rust
//! use pdf2mermaid::{ConversionConfig, MapProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl MapProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, chunk: usize, total: usize, summary_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Chunk {}/{} summarised ({} chars)", chunk + 1, total, summary_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn MapProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the map-reduce processor as it works through the chunks.
///
/// All methods default to no-ops. Chunk indices are 0-based.
///
/// # Thread safety
///
/// In parallel mode the chunk events of one batch fire concurrently.
/// Implementations must protect shared mutable state themselves
/// (e.g. `Mutex`, `AtomicUsize`).
pub trait MapProgressCallback: Send + Sync {
    /// Called once after chunking, before any summary request.
    fn on_map_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called just before the summary request for a chunk is sent.
    fn on_chunk_start(&self, chunk: usize, total_chunks: usize) {
        let _ = (chunk, total_chunks);
    }

    /// Called when a chunk was summarised.
    ///
    /// `summary_len` is the character length of the summary.
    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, summary_len: usize) {
        let _ = (chunk, total_chunks, summary_len);
    }

    /// Called when a chunk failed after all retries.
    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (chunk, total_chunks, error);
    }

    /// Called once after every chunk has been attempted.
    fn on_map_complete(&self, total_chunks: usize, valid_chunks: usize) {
        let _ = (total_chunks, valid_chunks);
    }
}

/// No-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl MapProgressCallback for NoopProgressCallback {}

/// Alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn MapProgressCallback>;
