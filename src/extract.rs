//! PDF upload validation and text extraction.
//!
//! Uploads are accepted only when the filename ends in `.pdf` and the body
//! starts with the PDF magic bytes. Text is extracted page by page and the
//! pages are joined with newlines.

use thiserror::Error;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Extraction and validation failures. Every variant is a client error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Only PDF files are allowed (got '{0}')")]
    NotPdf(String),
    #[error("File '{filename}' is {size} bytes; the limit is {limit} bytes")]
    TooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },
    #[error("File '{0}' is empty")]
    Empty(String),
    #[error("Error reading PDF: {0}")]
    Pdf(String),
    #[error("PDF contains no readable text")]
    NoText,
}

/// Check filename, magic bytes, and size before any processing.
pub fn validate_upload(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<(), ExtractError> {
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(ExtractError::NotPdf(filename.to_string()));
    }
    if bytes.is_empty() {
        return Err(ExtractError::Empty(filename.to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(ExtractError::TooLarge {
            filename: filename.to_string(),
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ExtractError::NotPdf(filename.to_string()));
    }
    Ok(())
}

/// Extract text from every page and concatenate with `\n`.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let text = pages.join("\n");
    if text.trim().is_empty() {
        return Err(ExtractError::NoText);
    }
    Ok(text)
}
