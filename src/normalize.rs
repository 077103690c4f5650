//! Text canonicalization applied before hashing, embedding, and indexing.
//!
//! Two byte-different but canonically-equal inputs must produce the same
//! document id and the same embedding input, so the same normalization runs
//! in every one of those paths. NFC composition handles platform differences
//! in Unicode encoding of the same logical text; control and format code
//! points are stripped because they carry no retrievable content.

use unicode_normalization::UnicodeNormalization;

/// Canonicalize text: NFC composition, then drop control/format code points.
/// Newlines and tabs are kept, since they are structural in row content.
pub fn normalize(text: &str) -> String {
    text.nfc().filter(|c| !is_stripped(*c)).collect()
}

fn is_stripped(c: char) -> bool {
    if c == '\n' || c == '\t' {
        return false;
    }
    if c.is_control() {
        return true;
    }
    // Common format (Cf) code points: zero-width marks, bidi controls,
    // word joiners, BOM. Unicode ranges, not exhaustive Cf coverage.
    matches!(
        c,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{206F}'
            | '\u{FEFF}'
    )
}
