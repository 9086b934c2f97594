use crate::chunking::write_jsonl;
use crate::error::IngestError;
use crate::models::{ArtifactPaths, PageRecord, PARAGRAPH_SEPARATOR};
use lopdf::Document;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub trait PdfExtractor {
    /// Raw text for every physical page, in page order. Pages without text
    /// are kept as empty strings so page numbers stay aligned.
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.push(text);
        }

        if pages.iter().all(|text| text.trim().is_empty()) {
            warn!(path = %path.display(), "pdf has no readable page text");
        }

        Ok(pages)
    }
}

/// Cleans extracted page text while keeping paragraph boundaries.
///
/// Words hyphenated across a line break are merged, blank-line separated
/// blocks become paragraphs joined by `"\n\n"`, and line breaks and runs of
/// whitespace inside a block collapse to single spaces.
pub fn normalize_whitespace(raw_text: &str) -> Result<String, IngestError> {
    let hyphen_break = Regex::new(r"(\w+)-\s*\n\s*(\w+)")?;
    let block_break = Regex::new(r"\n\s*\n")?;
    let wide_space = Regex::new(r"\s{2,}")?;

    let text = raw_text.replace("\r\n", "\n").replace('\r', "\n");
    let text = hyphen_break.replace_all(&text, "${1}${2}");

    let paragraphs = block_break
        .split(&text)
        .filter_map(|block| {
            let lines = block
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>();
            if lines.is_empty() {
                return None;
            }
            Some(wide_space.replace_all(&lines.join(" "), " ").into_owned())
        })
        .collect::<Vec<_>>();

    Ok(paragraphs.join(PARAGRAPH_SEPARATOR))
}

pub fn build_page_records(
    extractor: &dyn PdfExtractor,
    pdf_path: &Path,
) -> Result<Vec<PageRecord>, IngestError> {
    extractor
        .extract_pages(pdf_path)?
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            Ok(PageRecord {
                page_number: index as u32 + 1,
                text: normalize_whitespace(&raw)?,
            })
        })
        .collect()
}

/// Writes page JSONL and the raw concatenated text for one PDF.
pub fn ingest_pdf(
    extractor: &dyn PdfExtractor,
    pdf_path: &Path,
    paths: &ArtifactPaths,
) -> Result<Vec<PageRecord>, IngestError> {
    if !pdf_path.is_file() {
        return Err(IngestError::InvalidArgument(format!(
            "missing pdf at {}",
            pdf_path.display()
        )));
    }

    let records = build_page_records(extractor, pdf_path)?;

    write_jsonl(&paths.pages, &records)?;
    let raw_document = records
        .iter()
        .filter(|record| !record.text.is_empty())
        .map(|record| record.text.as_str())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_SEPARATOR);
    if let Some(parent) = paths.raw_text.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&paths.raw_text, raw_document)?;

    info!(
        pdf = %pdf_path.display(),
        pages = records.len(),
        output = %paths.pages.display(),
        "pdf ingested"
    );
    Ok(records)
}
