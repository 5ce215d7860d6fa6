//! Transcript text normalization.
//!
//! STT finals arrive with ragged spacing, stray casing, and stuttered
//! punctuation ("ok?!", "wait..."). Normalization produces the canonical
//! form used everywhere downstream: trimmed, single-spaced, capitalized,
//! exactly one terminal punctuation mark.

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Normalizes raw transcript text. Empty or whitespace-only input yields
/// an empty string, which callers discard.
pub fn normalize_transcript(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return collapsed;
    }

    let mut out = String::with_capacity(collapsed.len() + 1);
    let mut chars = collapsed.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(chars.as_str());
    }

    // A trailing run of terminal punctuation collapses to its first mark.
    let body_len = out.trim_end_matches(is_terminal).len();
    let run_len = out.len() - body_len;
    match run_len {
        0 => out.push('.'),
        1 => {}
        _ => out.truncate(body_len + 1),
    }

    out
}
