//! CSV table ingestion (SPEC_FULL §4.3).

use std::path::Path;

use common::{
    error::AppError,
    storage::types::chunk::{Chunk, ChunkMetadata},
};

/// Reads the CSV at `path` as a header-bearing table, decoding as UTF-8
/// with a latin-1 fallback for files that aren't valid UTF-8, renders
/// each row as `"k1: v1 k2: v2 …"` in header order, and groups
/// `rows_per_chunk` rendered rows into one chunk. A file with no headers
/// (or no rows) yields no chunks.
pub fn ingest_csv(path: &Path, rows_per_chunk: usize) -> Result<Vec<Chunk>, AppError> {
    let bytes = std::fs::read(path)?;
    let text = decode(&bytes);

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(text.as_bytes());
    let headers = match reader.headers() {
        Ok(headers) if !headers.is_empty() => headers.clone(),
        _ => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| AppError::Input(format!("malformed CSV row: {err}")))?;
        let rendered = headers
            .iter()
            .zip(record.iter())
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join(" ");
        rows.push(rendered);
    }
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let source = path.to_string_lossy().to_string();
    Ok(rows
        .chunks(rows_per_chunk.max(1))
        .enumerate()
        .map(|(i, rows)| {
            let index = i as i64 + 1;
            Chunk::new(format!("csv_{index}"), rows.join(" "), ChunkMetadata::new(source.clone(), index))
        })
        .collect())
}

/// Decodes `bytes` as UTF-8, falling back to Windows-1252 (a superset of
/// latin-1 for the printable range) when the file isn't valid UTF-8.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}
