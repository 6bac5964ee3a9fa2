//! Query running and retrieval evaluation: preprocess a raw query the way
//! the corpus was preprocessed, fetch posting lists, delegate to a ranking
//! model, and score the answer against a known relevance set.

use anyhow::{bail, Context, Result};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::index::{Index, TermOccurrence};
use crate::preprocess::Preprocessor;
use crate::rank::{QueryTerm, Ranking, RankingModel};
use crate::DocId;

/// Fixed evaluation cutoffs for precision/recall reporting.
pub const EVAL_CUTOFFS: [usize; 4] = [5, 10, 20, 50];

pub struct QueryRunner<'a> {
    index: &'a dyn Index,
    preprocessor: &'a Preprocessor,
    model: Box<dyn RankingModel>,
}

impl<'a> QueryRunner<'a> {
    /// The preprocessor must be configured exactly as it was when the
    /// index was built, or query terms will not match the vocabulary.
    pub fn new(
        index: &'a dyn Index,
        preprocessor: &'a Preprocessor,
        model: Box<dyn RankingModel>,
    ) -> Self {
        Self {
            index,
            preprocessor,
            model,
        }
    }

    /// The query's term-occurrence map. Terms absent from the vocabulary
    /// are dropped here: they have an empty posting list and contribute
    /// nothing to any model.
    pub fn query_term_occurrences(&self, raw_query: &str) -> HashMap<String, QueryTerm> {
        self.preprocessor
            .term_frequencies(raw_query)
            .into_iter()
            .filter_map(|(term, term_freq)| {
                let term_id = self.index.term_id(&term)?;
                Some((term, QueryTerm { term_id, term_freq }))
            })
            .collect()
    }

    /// Posting list of each given term; unknown terms get an empty list.
    pub fn occurrence_lists<'t>(
        &self,
        terms: impl IntoIterator<Item = &'t str>,
    ) -> Result<HashMap<String, Vec<TermOccurrence>>> {
        let mut lists = HashMap::new();
        for term in terms {
            lists.insert(term.to_string(), self.index.get_occurrence_list(term)?);
        }
        Ok(lists)
    }

    /// Runs `raw_query` end to end: preprocess, fetch posting lists, rank.
    pub fn run(&self, raw_query: &str) -> Result<Ranking> {
        let query = self.query_term_occurrences(raw_query);
        let postings = self.occurrence_lists(query.keys().map(String::as_str))?;
        Ok(self.model.rank(&query, &postings))
    }
}

/// How many of the first `n` ranked documents are relevant.
pub fn count_top_n_relevant(n: usize, ranked: &[DocId], relevant: &HashSet<DocId>) -> usize {
    ranked
        .iter()
        .take(n)
        .filter(|doc_id| relevant.contains(doc_id))
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutoffMetrics {
    pub cutoff: usize,
    pub precision: f64,
    pub recall: f64,
}

/// Precision and recall within the first `n` results. Both denominators
/// are division hazards: `n` must be positive and the relevant set
/// non-empty, otherwise the metric is undefined and reported as an error.
pub fn precision_recall(
    n: usize,
    ranked: &[DocId],
    relevant: &HashSet<DocId>,
) -> Result<(f64, f64)> {
    if n == 0 {
        bail!("evaluation cutoff must be positive");
    }
    if relevant.is_empty() {
        bail!("relevant document set is empty; recall is undefined");
    }
    let hits = count_top_n_relevant(n, ranked, relevant) as f64;
    Ok((hits / n as f64, hits / relevant.len() as f64))
}

/// Precision/recall at every cutoff in [`EVAL_CUTOFFS`].
pub fn evaluate(ranked: &[DocId], relevant: &HashSet<DocId>) -> Result<Vec<CutoffMetrics>> {
    EVAL_CUTOFFS
        .iter()
        .map(|&cutoff| {
            let (precision, recall) = precision_recall(cutoff, ranked, relevant)?;
            Ok(CutoffMetrics {
                cutoff,
                precision,
                recall,
            })
        })
        .collect()
}

/// Loads every `<query_key>.dat` file in `dir`: one line of
/// comma-separated relevant doc ids per file, keyed by the file stem.
pub fn load_relevance_dir(dir: &Path) -> Result<HashMap<String, HashSet<DocId>>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("reading relevance directory {}", dir.display()))?;
    let mut relevance = HashMap::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("dat") {
            continue;
        }
        let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading relevance file {}", path.display()))?;
        let docs = parse_doc_id_list(&contents)
            .with_context(|| format!("parsing relevance file {}", path.display()))?;
        relevance.insert(key.to_string(), docs);
    }
    Ok(relevance)
}

fn parse_doc_id_list(contents: &str) -> Result<HashSet<DocId>> {
    contents
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<DocId>()
                .with_context(|| format!("invalid doc id {s:?}"))
        })
        .collect()
}

/// Loads the `doc_id;title` map used only for presenting results.
pub fn load_titles(path: &Path) -> Result<HashMap<DocId, String>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading title file {}", path.display()))?;
    let mut titles = HashMap::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((doc_id, title)) = line.split_once(';') else {
            bail!("malformed title line {}: {line:?}", line_no + 1);
        };
        let doc_id = doc_id
            .trim()
            .parse::<DocId>()
            .with_context(|| format!("invalid doc id on title line {}", line_no + 1))?;
        titles.insert(doc_id, title.trim().to_string());
    }
    Ok(titles)
}
