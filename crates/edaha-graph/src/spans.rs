//! Locating quoted text inside a node.
//!
//! Offsets are char (Unicode scalar) counts throughout, matching
//! [`ContextRange`](edaha_types::ContextRange).

use serde::{Deserialize, Serialize};

use edaha_types::ContextRange;

/// Half-open `[start, end)` char span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Find `needle` in `text`.
///
/// The first exact occurrence wins. Failing that, both strings are compared
/// with every whitespace run collapsed to a single space and the ends
/// trimmed, and the match is mapped back onto `text`. Quotes copied out of
/// rendered text often differ from the source only in line breaks and
/// indentation; words never join or split.
///
/// Returns `None` for an empty needle or when nothing matches.
pub fn locate(text: &str, needle: &str) -> Option<Span> {
    if needle.is_empty() {
        return None;
    }

    if let Some(byte) = text.find(needle) {
        let start = text[..byte].chars().count();
        return Some(Span::new(start, start + needle.chars().count()));
    }

    let (pattern, _) = collapse_whitespace(needle);
    if pattern.is_empty() {
        return None;
    }
    let (compact, offsets) = collapse_whitespace(text);
    if pattern.len() > compact.len() {
        return None;
    }

    let k = compact
        .windows(pattern.len())
        .position(|window| window == pattern.as_slice())?;
    // The pattern is trimmed, so both ends land on non-whitespace chars.
    Some(Span::new(offsets[k], offsets[k + pattern.len() - 1] + 1))
}

/// `s` with whitespace runs collapsed to one space and the ends trimmed,
/// plus the char index in `s` of every kept char.
fn collapse_whitespace(s: &str) -> (Vec<char>, Vec<usize>) {
    let mut chars = Vec::new();
    let mut offsets = Vec::new();
    let mut pending_space = None;
    for (i, c) in s.chars().enumerate() {
        if c.is_whitespace() {
            pending_space.get_or_insert(i);
            continue;
        }
        if let Some(at) = pending_space.take() {
            if !chars.is_empty() {
                chars.push(' ');
                offsets.push(at);
            }
        }
        chars.push(c);
        offsets.push(i);
    }
    (chars, offsets)
}

/// The text covered by a char span. Out-of-range ends are clamped.
pub fn slice_chars(text: &str, span: Span) -> &str {
    let byte_at = |pos: usize| text.char_indices().nth(pos).map_or(text.len(), |(b, _)| b);
    let start = byte_at(span.start);
    let end = byte_at(span.end.max(span.start));
    &text[start..end]
}

/// Context ranges of `old` that still hold the same quoted text, at the same
/// offsets, in `new`. Anything else no longer points at its quote.
pub fn surviving_ranges(old: &str, new: &str, ranges: &[ContextRange]) -> Vec<ContextRange> {
    let new_len = new.chars().count();
    ranges
        .iter()
        .filter(|r| {
            let span = Span::new(r.start_pos, r.end_pos);
            !span.is_empty() && span.end <= new_len && slice_chars(old, span) == slice_chars(new, span)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exact_match() {
        let span = locate("the quick brown fox", "brown").unwrap();
        assert_eq!(span, Span::new(10, 15));
        assert_eq!(slice_chars("the quick brown fox", span), "brown");
    }

    #[test]
    fn test_first_occurrence_wins() {
        assert_eq!(locate("abc abc", "abc"), Some(Span::new(0, 3)));
    }

    #[test]
    fn test_whitespace_normalized_match() {
        let text = "fn main() {\n    println!(\"hi\");\n}";
        let quote = "main() { println!(\"hi\"); }";
        let span = locate(text, quote).unwrap();
        assert_eq!(span.start, 3);
        assert_eq!(span.end, text.chars().count());
        assert_eq!(slice_chars(text, span), "main() {\n    println!(\"hi\");\n}");
    }

    #[test]
    fn test_offsets_count_chars_not_bytes() {
        let text = "naïve café au lait";
        let span = locate(text, "café").unwrap();
        assert_eq!(span, Span::new(6, 10));
        assert_eq!(slice_chars(text, span), "café");

        let spaced = locate("日本 語の テキスト", "語の  テキスト").unwrap();
        assert_eq!(spaced, Span::new(3, 10));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(locate("hello world", "goodbye"), None);
        assert_eq!(locate("hello", ""), None);
        assert_eq!(locate("hello", "   "), None);
        assert_eq!(locate("", "x"), None);
        assert_eq!(locate("ab", "a b c"), None);
    }

    #[test]
    fn test_normalized_match_keeps_word_boundaries() {
        assert_eq!(locate("foo bar", "foobar"), None);
        assert_eq!(locate("xab", "a b"), None);
        assert_eq!(locate("foo\n\tbar", " foo bar "), Some(Span::new(0, 8)));
    }

    #[test]
    fn test_surviving_ranges_after_rewrite() {
        let source = edaha_types::NodeId::new();
        let old = "Explain \"tie borrows\" again";
        let quote = ContextRange::new(source, 9, 20);
        assert_eq!(slice_chars(old, Span::new(9, 20)), "tie borrows");

        // Trailing text changed; the quote is untouched.
        let kept = surviving_ranges(old, "Explain \"tie borrows\" please", &[quote.clone()]);
        assert_eq!(kept, vec![quote.clone()]);

        // Text too short for the range.
        assert!(surviving_ranges(old, "Why?", &[quote.clone()]).is_empty());

        // Long enough, but the quote is gone.
        assert!(surviving_ranges(old, "Explain something else entirely", &[quote]).is_empty());
    }

    #[test]
    fn test_slice_chars_clamps() {
        assert_eq!(slice_chars("abc", Span::new(1, 10)), "bc");
        assert_eq!(slice_chars("abc", Span::new(5, 6)), "");
    }
}
