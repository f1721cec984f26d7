//! Sentence and word timing extraction
//!
//! Turns the TTS provider's character-level alignment into sentence and
//! word spans. Segmentation honors terminal punctuation while keeping
//! decimal numbers, common abbreviations and initialisms intact; when the
//! text carries no terminal punctuation at all, the whole text becomes one
//! greedy sentence.

use spotforge_common::{Error, Result};

use crate::models::{CharTiming, SentenceTiming, WordTiming};

/// Word endings that take a period without ending the sentence
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "etc", "inc", "ltd", "co", "corp", "vs",
    "approx", "dept", "est", "no",
];

/// A sentence span in char indices (end exclusive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split text into sentences, returning char-index spans.
pub fn split_sentences(text: &str) -> Vec<SentenceSpan> {
    let chars: Vec<char> = text.chars().collect();
    let mut spans = Vec::new();
    let mut start = skip_whitespace(&chars, 0);
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '.' | '!' | '?') && is_sentence_boundary(&chars, i) {
            // Pull trailing closing quotes into the sentence
            let mut end = i + 1;
            while end < chars.len() && is_closing_quote(chars[end]) {
                end += 1;
            }
            if start < end {
                spans.push(make_span(&chars, start, end));
            }
            start = skip_whitespace(&chars, end);
            i = start;
        } else {
            i += 1;
        }
    }

    // Trailing text without terminal punctuation
    if start < chars.len() {
        let end = trim_end(&chars, chars.len());
        if start < end {
            spans.push(make_span(&chars, start, end));
        }
    }

    // Greedy fallback: punctuation-free text is one sentence
    if spans.is_empty() {
        let s = skip_whitespace(&chars, 0);
        let e = trim_end(&chars, chars.len());
        if s < e {
            spans.push(make_span(&chars, s, e));
        }
    }
    spans
}

fn make_span(chars: &[char], start: usize, end: usize) -> SentenceSpan {
    SentenceSpan {
        text: chars[start..end].iter().collect(),
        start,
        end,
    }
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn trim_end(chars: &[char], mut end: usize) -> usize {
    while end > 0 && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    end
}

fn is_closing_quote(c: char) -> bool {
    matches!(c, '"' | '\'' | '\u{201d}' | '\u{2019}' | ')' | ']')
}

/// Whether the terminal character at `i` actually ends a sentence.
fn is_sentence_boundary(chars: &[char], i: usize) -> bool {
    let c = chars[i];

    if c == '.' {
        // Decimal number: digit on both sides
        let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
        let next_digit = i + 1 < chars.len() && chars[i + 1].is_ascii_digit();
        if prev_digit && next_digit {
            return false;
        }

        // Initialism: a single uppercase letter before the period ("U.S.")
        if i > 0 && chars[i - 1].is_uppercase() {
            let before = if i >= 2 { Some(chars[i - 2]) } else { None };
            if before.is_none() || matches!(before, Some(b) if !b.is_alphabetic()) {
                return false;
            }
        }

        // Abbreviation: the word before the period is on the list
        if let Some(word) = word_before(chars, i) {
            if ABBREVIATIONS.contains(&word.to_lowercase().as_str()) {
                return false;
            }
        }
    }

    // The character after (past closing quotes) must be whitespace or the
    // end of text; this keeps URLs and mid-token punctuation intact.
    let mut next = i + 1;
    while next < chars.len() && is_closing_quote(chars[next]) {
        next += 1;
    }
    next >= chars.len() || chars[next].is_whitespace()
}

fn word_before(chars: &[char], i: usize) -> Option<String> {
    if i == 0 {
        return None;
    }
    let mut start = i;
    while start > 0 && chars[start - 1].is_alphabetic() {
        start -= 1;
    }
    if start == i {
        None
    } else {
        Some(chars[start..i].iter().collect())
    }
}

/// Sentence spans with start/end times from the character alignment.
///
/// A sentence's start is its first non-whitespace character's start time and
/// its end is its last character's end time. The alignment must cover the
/// whole text; a shorter array is an `AlignmentMismatch`.
pub fn extract_sentence_timings(
    text: &str,
    alignment: &[CharTiming],
) -> Result<Vec<SentenceTiming>> {
    let char_count = text.chars().count();
    if alignment.len() < char_count {
        return Err(Error::AlignmentMismatch(format!(
            "alignment covers {} of {} characters",
            alignment.len(),
            char_count
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut timings = Vec::new();
    for span in split_sentences(text) {
        let first = (span.start..span.end).find(|&i| !chars[i].is_whitespace());
        let last = (span.start..span.end).rev().find(|&i| !chars[i].is_whitespace());
        if let (Some(first), Some(last)) = (first, last) {
            timings.push(SentenceTiming {
                text: span.text,
                start: alignment[first].start,
                end: alignment[last].end,
            });
        }
    }
    Ok(timings)
}

/// Word spans with times, split on whitespace with the same indexing.
pub fn extract_word_timings(text: &str, alignment: &[CharTiming]) -> Result<Vec<WordTiming>> {
    let char_count = text.chars().count();
    if alignment.len() < char_count {
        return Err(Error::AlignmentMismatch(format!(
            "alignment covers {} of {} characters",
            alignment.len(),
            char_count
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        words.push(WordTiming {
            word: chars[start..i].iter().collect(),
            start: alignment[start].start,
            end: alignment[i - 1].end,
        });
    }
    Ok(words)
}

/// No-timing fallback: spread sentences proportionally over the known
/// duration by character share. Used when the provider returned no
/// alignment or a mismatched one.
pub fn estimate_sentence_timings(text: &str, total_duration: f64) -> Vec<SentenceTiming> {
    let char_count = text.chars().count().max(1) as f64;
    split_sentences(text)
        .into_iter()
        .map(|span| SentenceTiming {
            start: span.start as f64 / char_count * total_duration,
            end: span.end as f64 / char_count * total_duration,
            text: span.text,
        })
        .collect()
}

/// Word-level counterpart of `estimate_sentence_timings`.
pub fn estimate_word_timings(text: &str, total_duration: f64) -> Vec<WordTiming> {
    let chars: Vec<char> = text.chars().collect();
    let char_count = chars.len().max(1) as f64;
    let mut words = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        words.push(WordTiming {
            word: chars[start..i].iter().collect(),
            start: start as f64 / char_count * total_duration,
            end: i as f64 / char_count * total_duration,
        });
    }
    words
}
