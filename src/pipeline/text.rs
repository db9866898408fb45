// Recognized-text cleanup and length policy

use once_cell::sync::Lazy;
use regex::Regex;

/// Anything that is not an ASCII letter, digit, whitespace or `. , ? !`
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s.,?!]").expect("static pattern compiles"));

/// Per-region text shorter than this is treated as OCR noise
pub const MIN_REGION_TEXT_CHARS: usize = 3;

/// Fallback text must be strictly longer than this to produce a region
pub const MIN_FALLBACK_TEXT_CHARS: usize = 3;

/// Strip disallowed characters, then trim surrounding whitespace.
pub fn clean_text(raw: &str) -> String {
    DISALLOWED.replace_all(raw, "").trim().to_string()
}

/// Region text is kept unless it is shorter than [`MIN_REGION_TEXT_CHARS`]
pub fn passes_region_filter(cleaned: &str) -> bool {
    cleaned.chars().count() >= MIN_REGION_TEXT_CHARS
}

/// Fallback text is kept only when longer than [`MIN_FALLBACK_TEXT_CHARS`]
pub fn passes_fallback_filter(cleaned: &str) -> bool {
    cleaned.chars().count() > MIN_FALLBACK_TEXT_CHARS
}
