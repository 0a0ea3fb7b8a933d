// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Build the truncated preview stored inline with a tool message.
///
/// At most `max_chars` characters, cut at a line boundary so the preview
/// never ends mid-line.  When even the first line does not fit, it is cut at
/// a char boundary with an ellipsis.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut out = String::new();
    for line in text.lines() {
        let extra = line.len() + usize::from(!out.is_empty());
        if out.len() + extra > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    if out.is_empty() {
        // First line alone exceeds the budget.
        let mut cut = max_chars.saturating_sub(1);
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        out = format!("{}…", &text[..cut]);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
