//! Document extraction: PDF bytes → page text, image counts, page rasters.
//!
//! [`DocumentExtractor`] is the seam between the orchestrator and the PDF
//! library. [`PdfiumExtractor`] is the production implementation; tests plug
//! in a fake.
//!
//! pdfium is not async-safe, so every call runs inside
//! `tokio::task::spawn_blocking`.

use crate::config::RenderOptions;
use crate::error::ConvertError;
use crate::pipeline::encode;
use crate::routing::{ContentUnit, ImageRef};
use async_trait::async_trait;
use edgequake_llm::ImageData;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Area estimate per page used for text density.
pub const PAGE_AREA_ESTIMATE: f64 = 1000.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub text: String,
    /// Embedded image objects on the page.
    pub image_count: usize,
    /// Page width in points.
    pub width: f32,
    /// Page height in points.
    pub height: f32,
}

/// Result of parsing a PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDocument {
    /// Page texts joined by a blank line.
    pub text: String,
    pub page_count: usize,
    pub pages: Vec<PageContent>,
    pub info: DocumentInfo,
}

impl ParsedDocument {
    pub fn from_pages(pages: Vec<PageContent>, info: DocumentInfo) -> Self {
        let text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            text,
            page_count: pages.len(),
            pages,
            info,
        }
    }

    /// The whole document as one content unit.
    pub fn document_unit(&self) -> ContentUnit {
        let images = self
            .pages
            .iter()
            .enumerate()
            .flat_map(|(page, p)| (0..p.image_count).map(move |index| ImageRef::Embedded { page, index }))
            .collect();
        ContentUnit::new(
            self.text.clone(),
            self.page_count,
            self.page_count as f64 * PAGE_AREA_ESTIMATE,
        )
        .with_images(images)
    }

    /// One content unit per page.
    pub fn page_units(&self) -> Vec<ContentUnit> {
        self.pages
            .iter()
            .enumerate()
            .map(|(page, p)| {
                let images = (0..p.image_count)
                    .map(|index| ImageRef::Embedded { page, index })
                    .collect();
                ContentUnit::new(p.text.clone(), 1, PAGE_AREA_ESTIMATE).with_images(images)
            })
            .collect()
    }
}

/// A rasterised page ready for the vision API.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub image: ImageData,
}

/// PDF text and page-image boundary.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract text, per-page image counts and metadata.
    async fn parse(&self, pdf: &[u8]) -> Result<ParsedDocument, ConvertError>;

    /// Rasterise the given 1-based pages.
    ///
    /// Pages that fail to render are skipped; an error is returned only when
    /// the document cannot be opened at all.
    async fn render_pages(
        &self,
        pdf: &[u8],
        pages: &[usize],
        options: &RenderOptions,
    ) -> Result<Vec<RenderedPage>, ConvertError>;
}

/// pdfium-backed extractor.
///
/// Binds to the library in `library_dir` when set, else `./`, else the
/// system library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    library_dir: Option<PathBuf>,
}

impl PdfiumExtractor {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    /// Use the directory named by `PDFIUM_LIB_PATH`, if set.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os("PDFIUM_LIB_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        )
    }
}

#[async_trait]
impl DocumentExtractor for PdfiumExtractor {
    async fn parse(&self, pdf: &[u8]) -> Result<ParsedDocument, ConvertError> {
        let bytes = pdf.to_vec();
        let dir = self.library_dir.clone();
        tokio::task::spawn_blocking(move || parse_blocking(dir.as_deref(), &bytes))
            .await
            .map_err(|e| ConvertError::Internal(format!("Parse task panicked: {}", e)))?
    }

    async fn render_pages(
        &self,
        pdf: &[u8],
        pages: &[usize],
        options: &RenderOptions,
    ) -> Result<Vec<RenderedPage>, ConvertError> {
        let bytes = pdf.to_vec();
        let dir = self.library_dir.clone();
        let pages = pages.to_vec();
        let options = options.clone();
        tokio::task::spawn_blocking(move || {
            render_blocking(dir.as_deref(), &bytes, &pages, &options)
        })
        .await
        .map_err(|e| ConvertError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn bind_pdfium(library_dir: Option<&Path>) -> Result<Pdfium, ConvertError> {
    let dir = library_dir.unwrap_or_else(|| Path::new("./"));
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ConvertError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn load_error(e: PdfiumError) -> ConvertError {
    ConvertError::CorruptPdf {
        detail: format!("{:?}", e),
    }
}

fn parse_blocking(library_dir: Option<&Path>, bytes: &[u8]) -> Result<ParsedDocument, ConvertError> {
    let pdfium = bind_pdfium(library_dir)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(load_error)?;

    let pages = document.pages();
    let mut contents = Vec::with_capacity(pages.len() as usize);

    for (idx, page) in pages.iter().enumerate() {
        let text = match page.text() {
            Ok(t) => t.all(),
            Err(e) => {
                warn!("Page {}: text extraction failed: {:?}", idx + 1, e);
                String::new()
            }
        };
        let image_count = page
            .objects()
            .iter()
            .filter(|o| o.object_type() == PdfPageObjectType::Image)
            .count();
        contents.push(PageContent {
            text,
            image_count,
            width: page.width().value,
            height: page.height().value,
        });
    }

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().to_string())
            .filter(|v| !v.is_empty())
    };
    let info = DocumentInfo {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        pdf_version: format!("{:?}", document.version()),
    };

    let parsed = ParsedDocument::from_pages(contents, info);
    info!(
        "PDF parsed: {} pages, {} chars",
        parsed.page_count,
        parsed.text.chars().count()
    );
    Ok(parsed)
}

fn render_blocking(
    library_dir: Option<&Path>,
    bytes: &[u8],
    page_nums: &[usize],
    options: &RenderOptions,
) -> Result<Vec<RenderedPage>, ConvertError> {
    let pdfium = bind_pdfium(library_dir)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(load_error)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let render_config = PdfRenderConfig::new().set_target_width(options.width as i32);

    let mut results = Vec::with_capacity(page_nums.len());
    for &page_num in page_nums {
        if page_num == 0 || page_num > total_pages {
            warn!(
                "Skipping page {} (out of range, total={})",
                page_num, total_pages
            );
            continue;
        }

        let page = match pages.get((page_num - 1) as u16) {
            Ok(p) => p,
            Err(e) => {
                warn!("Page {}: cannot open: {:?}", page_num, e);
                continue;
            }
        };
        let image = match page.render_with_config(&render_config) {
            Ok(bitmap) => bitmap.as_image(),
            Err(e) => {
                warn!("Page {}: rendering failed: {:?}", page_num, e);
                continue;
            }
        };
        let (width, height) = (image.width(), image.height());
        match encode::encode_page(&image, options.format) {
            Ok(data) => {
                debug!("Rendered page {} → {}x{} px", page_num, width, height);
                results.push(RenderedPage {
                    page_num,
                    width,
                    height,
                    image: data,
                });
            }
            Err(e) => warn!("Page {}: encoding failed: {}", page_num, e),
        }
    }

    Ok(results)
}
