//! Text extraction for uploaded documents.
//!
//! PDFs go through `pdf-extract`; every other upload must be valid UTF-8
//! text. A payload is treated as PDF when its declared content type is
//! `application/pdf`, its filename ends in `.pdf`, or it starts with the
//! `%PDF-` magic bytes.

use surgisense_core::error::InputError;

pub const MIME_PDF: &str = "application/pdf";

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Returns true when the upload should be parsed as a PDF.
pub fn is_pdf(bytes: &[u8], content_type: Option<&str>, file_name: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.eq_ignore_ascii_case(MIME_PDF))
        || file_name.is_some_and(|n| n.to_ascii_lowercase().ends_with(".pdf"))
        || bytes.starts_with(PDF_MAGIC)
}

/// Extract plain text from an uploaded document.
///
/// # Errors
///
/// - [`InputError::MalformedPdf`] when a PDF cannot be parsed.
/// - [`InputError::UnsupportedContent`] when a non-PDF payload is not UTF-8.
pub fn extract_text(
    bytes: &[u8],
    content_type: Option<&str>,
    file_name: Option<&str>,
) -> Result<String, InputError> {
    if is_pdf(bytes, content_type, file_name) {
        return extract_pdf(bytes);
    }
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        InputError::UnsupportedContent(content_type.unwrap_or("application/octet-stream").to_string())
    })
}

/// Some malformed PDFs make `pdf-extract` panic; those are reported as
/// [`InputError::MalformedPdf`] like any other parse failure.
fn extract_pdf(bytes: &[u8]) -> Result<String, InputError> {
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| InputError::MalformedPdf("PDF parser aborted on malformed input".to_string()))?
        .map_err(|e| InputError::MalformedPdf(e.to_string()))
}
