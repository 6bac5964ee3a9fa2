//! Ranking models over posting lists: boolean set operations and TF-IDF
//! vector-space cosine scoring.

use anyhow::Result;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::index::{Index, TermOccurrence};
use crate::{DocId, TermId};

/// `1 + log2(freq)` for a positive frequency, 0 otherwise.
pub fn tf(term_freq: u32) -> f64 {
    if term_freq > 0 {
        1.0 + f64::from(term_freq).log2()
    } else {
        0.0
    }
}

/// `log2(doc_count / docs_with_term)`, or 0 when no document carries the
/// term — the division never happens with a zero denominator.
pub fn idf(doc_count: usize, docs_with_term: usize) -> f64 {
    if docs_with_term > 0 {
        (doc_count as f64 / docs_with_term as f64).log2()
    } else {
        0.0
    }
}

/// TF-IDF weight. 0 whenever the frequency is 0, regardless of idf.
pub fn tf_idf(doc_count: usize, term_freq: u32, docs_with_term: usize) -> f64 {
    if term_freq == 0 {
        return 0.0;
    }
    tf(term_freq) * idf(doc_count, docs_with_term)
}

/// A query term after preprocessing: its id in the index and its
/// frequency within the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTerm {
    pub term_id: TermId,
    pub term_freq: u32,
}

/// Ranked answer to a query. `scores` is present only for models that
/// produce them.
#[derive(Debug, Default)]
pub struct Ranking {
    pub doc_ids: Vec<DocId>,
    pub scores: Option<HashMap<DocId, f64>>,
}

/// Orders documents for a query, given the query's term occurrences and
/// the posting list of each query term.
pub trait RankingModel {
    fn rank(
        &self,
        query: &HashMap<String, QueryTerm>,
        postings: &HashMap<String, Vec<TermOccurrence>>,
    ) -> Ranking;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
}

/// Set-operation ranking: AND intersects the document sets of the query
/// terms' posting lists, OR unions them. Produces no scores; results are
/// returned sorted ascending by doc id so the order is deterministic.
#[derive(Debug, Clone, Copy)]
pub struct BooleanRankingModel {
    pub operator: Operator,
}

impl BooleanRankingModel {
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }

    fn intersection_all(postings: &HashMap<String, Vec<TermOccurrence>>) -> Vec<DocId> {
        let mut result: Option<HashSet<DocId>> = None;
        for occurrences in postings.values() {
            let ids = doc_id_set(occurrences);
            result = Some(match result {
                Some(acc) => acc.intersection(&ids).copied().collect(),
                None => ids,
            });
        }
        sorted_ids(result.unwrap_or_default())
    }

    fn union_all(postings: &HashMap<String, Vec<TermOccurrence>>) -> Vec<DocId> {
        let mut result = HashSet::new();
        for occurrences in postings.values() {
            result.extend(occurrences.iter().map(|occ| occ.doc_id));
        }
        sorted_ids(result)
    }
}

impl RankingModel for BooleanRankingModel {
    fn rank(
        &self,
        _query: &HashMap<String, QueryTerm>,
        postings: &HashMap<String, Vec<TermOccurrence>>,
    ) -> Ranking {
        let doc_ids = match self.operator {
            Operator::And => Self::intersection_all(postings),
            Operator::Or => Self::union_all(postings),
        };
        Ranking {
            doc_ids,
            scores: None,
        }
    }
}

fn doc_id_set(occurrences: &[TermOccurrence]) -> HashSet<DocId> {
    occurrences.iter().map(|occ| occ.doc_id).collect()
}

fn sorted_ids(ids: HashSet<DocId>) -> Vec<DocId> {
    let mut ids: Vec<DocId> = ids.into_iter().collect();
    ids.sort_unstable();
    ids
}

/// Per-document Euclidean norms of the full-vocabulary TF-IDF weight
/// vectors, plus a snapshot of the document count. Computed once from a
/// finalized index; stale (and must be recomputed) if the index is ever
/// rebuilt.
#[derive(Debug)]
pub struct IndexPrecomputedStats {
    pub doc_count: usize,
    norms: HashMap<DocId, f64>,
}

impl IndexPrecomputedStats {
    /// One pass over each vocabulary term's posting list, accumulating
    /// squared weights per document. Terms absent from a document weigh 0
    /// and contribute nothing; documents containing no terms get norm 0.
    pub fn compute(index: &dyn Index) -> Result<Self> {
        let doc_count = index.document_count();
        let mut squared: HashMap<DocId, f64> = index
            .documents()
            .into_iter()
            .map(|doc_id| (doc_id, 0.0))
            .collect();
        for term in index.vocabulary() {
            let occurrences = index.get_occurrence_list(term)?;
            let docs_with_term = occurrences.len();
            for occ in &occurrences {
                let weight = tf_idf(doc_count, occ.term_freq, docs_with_term);
                if let Some(sum) = squared.get_mut(&occ.doc_id) {
                    *sum += weight * weight;
                }
            }
        }
        let norms = squared
            .into_iter()
            .map(|(doc_id, sum)| (doc_id, sum.sqrt()))
            .collect();
        Ok(Self { doc_count, norms })
    }

    pub fn norm(&self, doc_id: DocId) -> Option<f64> {
        self.norms.get(&doc_id).copied()
    }
}

/// TF-IDF cosine ranking. Query weights come from the query's own term
/// frequencies; document weights from the posting lists; the dot product
/// is normalized by the document's precomputed norm.
///
/// Documents whose accumulated score is exactly 0, or whose norm is 0,
/// are omitted from the result rather than reported with a 0 score.
/// Results order by descending score; equal scores order by ascending
/// doc id.
pub struct VectorRankingModel {
    stats: IndexPrecomputedStats,
}

impl VectorRankingModel {
    pub fn new(stats: IndexPrecomputedStats) -> Self {
        Self { stats }
    }
}

impl RankingModel for VectorRankingModel {
    fn rank(
        &self,
        query: &HashMap<String, QueryTerm>,
        postings: &HashMap<String, Vec<TermOccurrence>>,
    ) -> Ranking {
        let doc_count = self.stats.doc_count;
        let mut accumulated: HashMap<DocId, f64> = HashMap::new();
        for (term, query_term) in query {
            let Some(occurrences) = postings.get(term) else {
                continue;
            };
            if occurrences.is_empty() {
                continue;
            }
            let docs_with_term = occurrences.len();
            let query_weight = tf_idf(doc_count, query_term.term_freq, docs_with_term);
            if query_weight == 0.0 {
                continue;
            }
            for occ in occurrences {
                let doc_weight = tf_idf(doc_count, occ.term_freq, docs_with_term);
                *accumulated.entry(occ.doc_id).or_insert(0.0) += query_weight * doc_weight;
            }
        }

        let mut scores: HashMap<DocId, f64> = HashMap::new();
        for (doc_id, sum) in accumulated {
            if sum == 0.0 {
                continue;
            }
            match self.stats.norm(doc_id) {
                Some(norm) if norm > 0.0 => {
                    scores.insert(doc_id, sum / norm);
                }
                _ => {}
            }
        }

        let mut doc_ids: Vec<DocId> = scores.keys().copied().collect();
        doc_ids.sort_by(|a, b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        Ranking {
            doc_ids,
            scores: Some(scores),
        }
    }
}
