//! Rewrites completion output into WhatsApp markup.  Pure functions, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;

// Citation markers emitted by the completion model, e.g. 【3:1†source】.
// One trailing space is consumed with the marker so removal never leaves a
// doubled space in the middle of a sentence.
static CITATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"【.*?】 ?").expect("valid regex"));

// Markdown bold spans; WhatsApp uses single asterisks for bold.
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));

/// Convert a model reply into WhatsApp-ready text.  Citation spans are
/// removed before emphasis conversion so bracketed content containing
/// asterisks is never rewritten.  Unpaired `**` markers are left untouched
/// by the non-greedy leftmost-first match.
pub fn format_for_whatsapp(text: &str) -> String {
    let stripped = CITATION_RE.replace_all(text, "");
    let stripped = stripped.trim();
    BOLD_RE.replace_all(stripped, "*$1*").into_owned()
}
