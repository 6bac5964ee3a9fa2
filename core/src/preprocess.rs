use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
}

/// Raw word tokens of `text`, NFKC-normalized. No filtering happens here;
/// rejection and normalization are the [`Preprocessor`]'s job.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfkc().collect::<String>();
    TOKEN_RE
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// The three independent preprocessing switches. An index and the queries
/// against it must use the same configuration, or term matching silently
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessOptions {
    pub remove_stop_words: bool,
    pub fold_accents: bool,
    pub stem: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            remove_stop_words: true,
            fold_accents: true,
            stem: false,
        }
    }
}

/// Turns raw tokens into normalized index terms, or rejects them.
///
/// The pipeline order is fixed: tokens with no alphabetic character are
/// rejected, then the token is lower-cased, checked against the stop-word
/// set, accent-folded, and stemmed. Stop words are matched on the
/// lower-cased surface form *before* accent folding, so the stop-word set
/// must carry accented entries as they occur in text.
pub struct Preprocessor {
    stop_words: HashSet<String>,
    stemmer: Option<Stemmer>,
    opts: PreprocessOptions,
}

impl Preprocessor {
    pub fn new(stop_words: HashSet<String>, language: &str, opts: PreprocessOptions) -> Result<Self> {
        let stemmer = if opts.stem {
            Some(Stemmer::create(language_algorithm(language)?))
        } else {
            None
        };
        Ok(Self {
            stop_words,
            stemmer,
            opts,
        })
    }

    /// Reads a stop-word file (comma-separated words, one or more per
    /// line) and builds a preprocessor from it.
    pub fn from_stop_words_file(
        path: &Path,
        language: &str,
        opts: PreprocessOptions,
    ) -> Result<Self> {
        Self::new(read_stop_words(path)?, language, opts)
    }

    /// Normalizes one raw token into an index term. `None` means the token
    /// is not indexed; that is a normal outcome, not an error.
    pub fn term(&self, token: &str) -> Option<String> {
        if !token.chars().any(|c| c.is_alphabetic()) {
            return None;
        }
        let lowered = token.to_lowercase();
        if self.opts.remove_stop_words && self.stop_words.contains(&lowered) {
            return None;
        }
        let folded = if self.opts.fold_accents {
            fold_accents(&lowered)
        } else {
            lowered
        };
        match &self.stemmer {
            Some(stemmer) => Some(stemmer.stem(&folded).to_string()),
            None => Some(folded),
        }
    }

    /// Term frequency map of `text`: tokenize, normalize, count. The same
    /// map shape is fed into the index for documents and into the ranking
    /// models for queries.
    pub fn term_frequencies(&self, text: &str) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        for token in tokenize(text) {
            if let Some(term) = self.term(&token) {
                *counts.entry(term).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Key under which a raw query is looked up in the relevance map:
    /// lower-cased, accents folded, whitespace joined with `_`.
    pub fn relevance_key(&self, raw_query: &str) -> String {
        raw_query
            .split_whitespace()
            .map(|word| fold_accents(&word.to_lowercase()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// The fixed diacritic table: accented vowels and the cedilla map to their
/// base Latin letter, every other character passes through.
pub fn fold_accents(term: &str) -> String {
    term.chars()
        .map(|c| match c {
            'á' | 'â' | 'ã' => 'a',
            'é' | 'ê' | 'ẽ' => 'e',
            'í' => 'i',
            'ó' | 'ô' | 'õ' => 'o',
            'ú' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn language_algorithm(language: &str) -> Result<Algorithm> {
    Ok(match language.to_lowercase().as_str() {
        "english" => Algorithm::English,
        "french" => Algorithm::French,
        "german" => Algorithm::German,
        "italian" => Algorithm::Italian,
        "portuguese" => Algorithm::Portuguese,
        "spanish" => Algorithm::Spanish,
        other => bail!("unsupported stemmer language {other:?}"),
    })
}

fn read_stop_words(path: &Path) -> Result<HashSet<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading stop-word file {}", path.display()))?;
    let mut stop_words = HashSet::new();
    for line in contents.lines() {
        for word in line.split(',') {
            let word = word.trim();
            if !word.is_empty() {
                stop_words.insert(word.to_string());
            }
        }
    }
    Ok(stop_words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(opts: PreprocessOptions) -> Preprocessor {
        Preprocessor::new(HashSet::new(), "portuguese", opts).unwrap()
    }

    #[test]
    fn rejects_tokens_without_letters() {
        let p = plain(PreprocessOptions::default());
        assert_eq!(p.term("1234"), None);
        assert_eq!(p.term("__"), None);
        assert_eq!(p.term("a1"), Some("a1".to_string()));
    }

    #[test]
    fn folds_accents_and_lowercases() {
        let p = plain(PreprocessOptions::default());
        assert_eq!(p.term("Ação"), Some("acao".to_string()));
        assert_eq!(p.term("Café"), Some("cafe".to_string()));
    }

    #[test]
    fn stop_words_match_before_accent_folding() {
        let stop: HashSet<String> = ["é".to_string()].into_iter().collect();
        let p = Preprocessor::new(stop, "portuguese", PreprocessOptions::default()).unwrap();
        assert_eq!(p.term("é"), None);
        // The folded form "e" is not in the set, so a literal "e" survives.
        assert_eq!(p.term("e"), Some("e".to_string()));
    }

    #[test]
    fn stemming_is_applied_last() {
        let opts = PreprocessOptions {
            stem: true,
            ..PreprocessOptions::default()
        };
        let p = plain(opts);
        assert_eq!(p.term("gatos"), Some("gat".to_string()));
    }

    #[test]
    fn counts_term_frequencies() {
        let p = plain(PreprocessOptions::default());
        let counts = p.term_frequencies("gato cachorro gato, 42!");
        assert_eq!(counts.get("gato"), Some(&2));
        assert_eq!(counts.get("cachorro"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn relevance_key_normalizes_the_query() {
        let p = plain(PreprocessOptions::default());
        assert_eq!(p.relevance_key("São Paulo"), "sao_paulo");
        assert_eq!(p.relevance_key("  Belo   Horizonte "), "belo_horizonte");
    }
}
