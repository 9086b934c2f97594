use crate::error::IngestError;
use crate::models::{
    Chunk, PageRecord, Paragraph, DEFAULT_ID_PREFIX, DEFAULT_MIN_CHARS, DEFAULT_OVERLAP_RATIO,
    DEFAULT_TARGET_CHARS, PARAGRAPH_SEPARATOR, SEPARATOR_CHARS,
};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Soft ceiling on a chunk's character count.
    pub target_chars: usize,
    /// Floor below which a window keeps growing past `target_chars`.
    pub min_chars: usize,
    /// Fraction of a finished chunk re-included at the head of the next one.
    pub overlap_ratio: f64,
    pub id_prefix: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: DEFAULT_TARGET_CHARS,
            min_chars: DEFAULT_MIN_CHARS,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.target_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "target_chars must be positive".to_string(),
            ));
        }
        if self.min_chars > self.target_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "min_chars {} exceeds target_chars {}",
                self.min_chars, self.target_chars
            )));
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_ratio {} must be in [0, 1)",
                self.overlap_ratio
            )));
        }
        Ok(())
    }
}

/// Flattens page texts into paragraphs addressed by global character offsets.
///
/// The cursor advances by the separator width between paragraphs of a page
/// and between pages, including after blank pages that are not last.
pub fn explode_paragraphs(pages: &[PageRecord]) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut cursor = 0usize;
    let last_page = pages.len().saturating_sub(1);

    for (page_index, page) in pages.iter().enumerate() {
        let is_last_page = page_index == last_page;

        if page.text.trim().is_empty() {
            if !is_last_page {
                cursor += SEPARATOR_CHARS;
            }
            continue;
        }

        let parts = page
            .text
            .split(PARAGRAPH_SEPARATOR)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();

        for (part_index, part) in parts.iter().enumerate() {
            let start = cursor;
            let end = start + part.chars().count();
            paragraphs.push(Paragraph {
                page: page.page_number,
                text: (*part).to_string(),
                start,
                end,
            });
            cursor = end;
            if part_index + 1 != parts.len() {
                cursor += SEPARATOR_CHARS;
            }
        }

        if !is_last_page {
            cursor += SEPARATOR_CHARS;
        }
    }

    paragraphs
}

/// Greedily packs paragraphs starting at `start_idx`.
///
/// Returns the exclusive end index of the window and its character count
/// (paragraph lengths plus separators). The window is never empty.
pub fn collect_window(
    paragraphs: &[Paragraph],
    start_idx: usize,
    target_chars: usize,
    min_chars: usize,
) -> (usize, usize) {
    let mut char_count = 0usize;
    let mut idx = start_idx;

    while idx < paragraphs.len() {
        let has_content = idx > start_idx;
        let addition =
            paragraphs[idx].char_len() + if has_content { SEPARATOR_CHARS } else { 0 };
        let anticipated = char_count + addition;
        if has_content && anticipated > target_chars && char_count >= min_chars {
            break;
        }
        char_count = anticipated;
        idx += 1;
        if char_count >= target_chars {
            break;
        }
    }

    if idx == start_idx {
        // start_idx was out of range; only reachable through direct calls.
        let end = (start_idx + 1).min(paragraphs.len());
        let count = paragraphs.get(start_idx).map_or(0, Paragraph::char_len);
        return (end, count);
    }

    (idx, char_count)
}

/// Picks the start of the next window so that roughly
/// `char_count * overlap_ratio` trailing characters are repeated.
///
/// Falls back to `end_idx` when the walk cannot move past `start_idx`, which
/// drops the overlap for paragraphs larger than the overlap budget but always
/// makes forward progress.
pub fn advance_start(
    paragraphs: &[Paragraph],
    start_idx: usize,
    end_idx: usize,
    char_count: usize,
    overlap_ratio: f64,
) -> usize {
    if end_idx >= paragraphs.len() {
        return end_idx;
    }

    let overlap_chars = (char_count as f64 * overlap_ratio).floor() as usize;
    if overlap_chars == 0 {
        return end_idx;
    }

    let overlap_limit = paragraphs[end_idx - 1].end.saturating_sub(overlap_chars);
    let mut next_start = start_idx;
    while next_start < end_idx && paragraphs[next_start].end <= overlap_limit {
        next_start += 1;
    }

    if next_start > start_idx {
        next_start
    } else {
        end_idx
    }
}

pub fn chunk_paragraphs(paragraphs: &[Paragraph], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut start_idx = 0usize;

    while start_idx < paragraphs.len() {
        let (end_idx, char_count) =
            collect_window(paragraphs, start_idx, config.target_chars, config.min_chars);
        let window = &paragraphs[start_idx..end_idx];

        let text = window
            .iter()
            .map(|paragraph| paragraph.text.as_str())
            .collect::<Vec<_>>()
            .join(PARAGRAPH_SEPARATOR);
        let first = &window[0];
        let last = &window[window.len() - 1];

        chunks.push(Chunk {
            id: make_chunk_id(&config.id_prefix, chunks.len()),
            text,
            page_start: first.page,
            page_end: last.page,
            start_char: first.start,
            end_char: last.end,
        });

        if end_idx >= paragraphs.len() {
            break;
        }
        start_idx = advance_start(
            paragraphs,
            start_idx,
            end_idx,
            char_count,
            config.overlap_ratio,
        );
    }

    chunks
}

pub fn chunk_pages(
    pages: &[PageRecord],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;
    let paragraphs = explode_paragraphs(pages);
    Ok(chunk_paragraphs(&paragraphs, config))
}

fn make_chunk_id(prefix: &str, sequence: usize) -> String {
    format!("{prefix}-{sequence:06}")
}

pub fn load_pages(path: &Path) -> Result<Vec<PageRecord>, IngestError> {
    read_jsonl(path)
}

pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>, IngestError> {
    read_jsonl(path)
}

pub(crate) fn read_jsonl<T>(path: &Path) -> Result<Vec<T>, IngestError>
where
    T: serde::de::DeserializeOwned,
{
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|error| IngestError::MalformedRecord {
            path: path.display().to_string(),
            line: line_index + 1,
            details: error.to_string(),
        })?;
        records.push(record);
    }

    Ok(records)
}

pub(crate) fn write_jsonl<T>(path: &Path, records: &[T]) -> Result<(), IngestError>
where
    T: serde::Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads page JSONL, chunks it, and writes chunk JSONL.
pub fn build_chunk_file(
    pages_path: &Path,
    chunks_path: &Path,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let pages = load_pages(pages_path)?;
    let chunks = chunk_pages(&pages, config)?;
    write_jsonl(chunks_path, &chunks)?;

    info!(
        pages = pages.len(),
        chunks = chunks.len(),
        output = %chunks_path.display(),
        "chunk metadata written"
    );
    Ok(chunks)
}
