use lopdf::Document;
use tracing::{info, warn};

use crate::error::{ReportError, Result};

/// A paginated document whose pages can be read one at a time
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Text of the zero-based page `index`
    fn page_text(&self, index: usize) -> Result<String>;
}

/// Join all pages with `\n`. A page that fails to yield text contributes an
/// empty string.
pub fn extract_text(source: &impl PageSource) -> String {
    (0..source.page_count())
        .map(|index| match source.page_text(index) {
            Ok(text) => text,
            Err(e) => {
                warn!(page = index + 1, error = %e, "Page text extraction failed, using empty text");
                String::new()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// PDF loaded into memory with lopdf
pub struct PdfDocument {
    document: Document,
    page_numbers: Vec<u32>,
}

impl PdfDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let document = Document::load_mem(bytes).map_err(|e| ReportError::Pdf(e.to_string()))?;
        let page_numbers = document.get_pages().keys().copied().collect();
        Ok(Self {
            document,
            page_numbers,
        })
    }
}

impl PageSource for PdfDocument {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn page_text(&self, index: usize) -> Result<String> {
        let page_number = self
            .page_numbers
            .get(index)
            .copied()
            .ok_or_else(|| ReportError::Pdf(format!("page {} out of range", index + 1)))?;

        self.document
            .extract_text(&[page_number])
            .map_err(|e| ReportError::Pdf(e.to_string()))
    }
}

/// Text of a whole report plus its page count
#[derive(Debug, Clone)]
pub struct ExtractedReport {
    pub text: String,
    pub page_count: usize,
}

/// Parse PDF bytes and extract the report text.
///
/// Only a document that cannot be opened at all is an error.
pub fn extract_report_text(bytes: &[u8]) -> Result<ExtractedReport> {
    let document = PdfDocument::from_bytes(bytes)?;
    let text = extract_text(&document);

    info!(
        pages = document.page_count(),
        chars = text.len(),
        "Extracted report text"
    );

    Ok(ExtractedReport {
        text,
        page_count: document.page_count(),
    })
}

/// [`extract_report_text`] off the async runtime
pub async fn extract_report_text_blocking(bytes: Vec<u8>) -> Result<ExtractedReport> {
    tokio::task::spawn_blocking(move || extract_report_text(&bytes))
        .await
        .map_err(|e| ReportError::Pdf(format!("extraction task failed: {e}")))?
}
