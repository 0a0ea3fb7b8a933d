// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Target chunk size in characters.  Roughly 500 tokens per chunk keeps a
/// retrieved context block useful without flooding the prompt.
const CHUNK_CHARS: usize = 2000;

/// Split text into line-aligned chunks of roughly [`CHUNK_CHARS`] characters.
///
/// Lines are never split; a single line longer than the target becomes its
/// own chunk.  Empty input produces no chunks.
pub fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(chunk_text("").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("fn main() {}\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "fn main() {}");
    }

    #[test]
    fn long_text_splits_on_line_boundaries() {
        let line = "x".repeat(100);
        let text = (0..50).map(|_| line.clone()).collect::<Vec<_>>().join("\n");
        let chunks = chunk_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= CHUNK_CHARS + line.len());
            for l in chunk.lines() {
                assert_eq!(l.len(), 100, "lines must not be split");
            }
        }
        let total_lines: usize = chunks.iter().map(|c| c.lines().count()).sum();
        assert_eq!(total_lines, 50);
    }

    #[test]
    fn oversized_single_line_becomes_own_chunk() {
        let giant = "y".repeat(5000);
        let chunks = chunk_text(&giant);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 5000);
    }
}
