//! Document ingestion: turns a PDF or CSV file into a list of `Chunk`s
//! ready for `common::storage::document_store::DocumentStore::add`.

pub mod csv_ingest;
pub mod pdf;
mod splitter;

pub use csv_ingest::ingest_csv;
pub use pdf::{extract_pages, ingest_pdf};

/// Default chunk size and overlap for [`ingest_pdf`].
pub const DEFAULT_PDF_CHUNK_SIZE: usize = 250;
pub const DEFAULT_PDF_CHUNK_OVERLAP: usize = 50;

/// Default rows grouped per chunk for [`ingest_csv`].
pub const DEFAULT_CSV_ROWS_PER_CHUNK: usize = 1;
