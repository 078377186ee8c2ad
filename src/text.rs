//! Sentence segmentation.
//!
//! Boundaries are whitespace runs that directly follow `.`, `!` or `?`. This is a
//! heuristic: abbreviations ("Dr. Smith"), decimals followed by a space and
//! punctuation inside quotes all split where a reader would not.

use once_cell::sync::Lazy;
use regex::Regex;

static SENTENCE_BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("valid regex"));

/// Split `text` into trimmed, non-empty sentences in their original order.
///
/// Terminal punctuation stays attached to its sentence. Input without any
/// boundary comes back as a single trimmed sentence; blank input yields nothing.
pub fn segment(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY_RE.find_iter(text) {
        // The punctuation mark is a single ASCII byte.
        push_trimmed(&mut sentences, &text[start..boundary.start() + 1]);
        start = boundary.end();
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, candidate: &'a str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_after_terminal_punctuation() {
        assert_eq!(segment("Hello. World!"), vec!["Hello.", "World!"]);
        assert_eq!(
            segment("Is it on? Yes!  It works.\nDone"),
            vec!["Is it on?", "Yes!", "It works.", "Done"]
        );
    }

    #[test]
    fn no_boundary_returns_whole_trimmed_text() {
        assert_eq!(segment("no punctuation"), vec!["no punctuation"]);
        assert_eq!(segment("  padded text  "), vec!["padded text"]);
    }

    #[test]
    fn blank_input_yields_nothing() {
        assert!(segment("").is_empty());
        assert!(segment(" \n\t ").is_empty());
    }

    #[test]
    fn punctuation_without_following_whitespace_does_not_split() {
        assert_eq!(segment("version 1.5 is out"), vec!["version 1.5 is out"]);
        assert_eq!(segment("Wait...what?"), vec!["Wait...what?"]);
    }

    #[test]
    fn ellipsis_keeps_one_mark_and_drops_empty_pieces() {
        assert_eq!(segment("Well... fine. "), vec!["Well...", "fine."]);
        assert_eq!(segment("! ? ."), vec!["!", "?", "."]);
    }

    #[test]
    fn resegmenting_a_sentence_is_stable() {
        let text = "First one. Second, with a comma! Third? Trailing words";
        for sentence in segment(text) {
            assert_eq!(segment(sentence), vec![sentence]);
        }
    }

    #[test]
    fn abbreviations_split_as_a_known_limitation() {
        assert_eq!(segment("Dr. Smith arrived."), vec!["Dr.", "Smith arrived."]);
    }
}
