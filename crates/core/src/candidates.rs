use crate::models::{Candidate, Chunk};
use std::collections::HashSet;

/// Maps raw index hits onto chunks, in index order.
///
/// Rows outside `0..chunks.len()` (the `-1` padding of short result sets)
/// are skipped, as are repeats of an id already emitted.
pub fn make_candidates(
    rows: &[i64],
    scores: &[f32],
    chunks: &[Chunk],
    preview_chars: usize,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for (&row, &score) in rows.iter().zip(scores) {
        let Some(chunk) = usize::try_from(row).ok().and_then(|row| chunks.get(row)) else {
            continue;
        };
        if !seen.insert(chunk.id.as_str()) {
            continue;
        }

        candidates.push(Candidate {
            id: chunk.id.clone(),
            score,
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            start_char: chunk.start_char,
            end_char: chunk.end_char,
            preview: make_preview(&chunk.text, preview_chars),
            text: chunk.text.clone(),
            rank: candidates.len(),
        });
    }

    candidates
}

/// First `max_chars` characters, trimmed, on a single line.
pub fn make_preview(text: &str, max_chars: usize) -> String {
    let head = match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => &text[..byte_offset],
        None => text,
    };
    head.trim().replace('\n', " ")
}

pub fn assign_ranks(candidates: &mut [Candidate]) {
    for (rank, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = rank;
    }
}
