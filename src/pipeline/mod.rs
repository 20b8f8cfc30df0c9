//! Pipeline stages for PDF-to-diagram conversion.
//!
//! Each submodule implements one transformation step, so each can be
//! tested on its own and the PDF library or model provider can be swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ (encode) ──▶ generate ──▶ llm ──▶ postprocess
//! (path/URL) (pdfium)    (base64)     (prompts)   (model)  (cleanup)
//!                                 └──▶ rules (no model / last fallback)
//! ```
//!
//! 1. [`input`]    — resolve a path or URL to PDF bytes and check the magic
//! 2. [`extract`]  — page text, image counts and page rasters; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]   — base64-wrap rasters and parse posted image data URIs
//! 4. [`generate`] — single-shot text or vision generation through the cache
//! 5. [`llm`]      — the model call with retry/backoff; the only stage with
//!    network I/O besides URL download
//! 6. [`postprocess`] — deterministic cleanup of model output
//! 7. [`rules`]    — deterministic text → flowchart heuristic

pub mod encode;
pub mod extract;
pub mod generate;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod rules;
