use anyhow::{Context, Result};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Canonical form of extracted text for phrase matching: NFKC, lowercase,
/// control characters dropped, whitespace runs collapsed to one space.
pub fn normalize_text(raw: &str) -> String {
    let folded: String = raw.nfkc().collect::<String>().to_lowercase();
    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    out
}

/// Whole-phrase pattern: the phrase must not be glued to a neighbouring
/// letter, digit or combining mark, so "index ii" does not match "index iii".
pub fn phrase_pattern(phrase: &str) -> Result<Regex> {
    let normalized = normalize_text(phrase);
    let body = normalized
        .split(' ')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let pattern = format!(r"(?:^|[^\p{{L}}\p{{N}}\p{{M}}]){body}(?:$|[^\p{{L}}\p{{N}}\p{{M}}])");
    Regex::new(&pattern).with_context(|| format!("invalid phrase pattern: {phrase}"))
}

/// A fixed list of phrases, compiled once.
#[derive(Debug, Clone)]
pub struct PhraseList {
    entries: Vec<(String, Regex)>,
}

impl PhraseList {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self> {
        let entries = phrases
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| !p.trim().is_empty())
            .map(|p| Ok((p.to_string(), phrase_pattern(p)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Phrases present in already-normalized text, in list order.
    pub fn matches<'a>(&'a self, normalized: &str) -> Vec<&'a str> {
        self.entries
            .iter()
            .filter(|(_, re)| re.is_match(normalized))
            .map(|(phrase, _)| phrase.as_str())
            .collect()
    }

    pub fn first_match<'a>(&'a self, normalized: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(_, re)| re.is_match(normalized))
            .map(|(phrase, _)| phrase.as_str())
    }
}
