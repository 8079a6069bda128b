//! PDF extraction and chunking (SPEC_FULL §4.3).
//!
//! Page extraction is kept separate from chunking so the splitter can be
//! exercised without a PDF backend, and so a PDF whose pages are scanned
//! images (no text layer) degrades to empty-string pages rather than an
//! error.

use std::path::Path;

use common::{
    error::AppError,
    storage::types::chunk::{Chunk, ChunkMetadata},
};
use tracing::warn;

use crate::splitter;

/// Extracts the text of every page in the PDF at `path`, one entry per
/// page. A page with no extractable text layer yields an empty string
/// rather than failing the whole document.
pub async fn extract_pages(path: &Path) -> Result<Vec<String>, AppError> {
    let path = path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || pdf_extract::extract_text_by_pages(&path))
        .await
        .map_err(|err| AppError::Internal(format!("PDF extraction task panicked: {err}")))?
        .map_err(|err| AppError::Input(format!("failed to extract text from PDF: {err}")))?;

    Ok(pages
        .into_iter()
        .map(|page| {
            if page.trim().is_empty() {
                warn!("PDF page had no extractable text layer");
            }
            page
        })
        .collect())
}

/// Extracts and chunks a PDF document per SPEC_FULL §4.3: pages are
/// extracted, concatenated with newlines, and split via the recursive
/// paragraph → line → word-boundary splitter. An empty document (no
/// extractable text on any page) yields no chunks.
pub async fn ingest_pdf(path: &Path, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, AppError> {
    let pages = extract_pages(path).await?;
    let full_text = pages.join("\n");
    if full_text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let source = path.to_string_lossy().to_string();
    let chunks = splitter::split(&full_text, chunk_size, overlap);

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let index = i as i64 + 1;
            Chunk::new(format!("pdf_{index}"), text, ChunkMetadata::new(source.clone(), index))
        })
        .collect())
}
