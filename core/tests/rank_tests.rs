use lupa_core::index::{HashIndex, Index, TermOccurrence};
use lupa_core::rank::{
    idf, tf, tf_idf, BooleanRankingModel, IndexPrecomputedStats, Operator, QueryTerm,
    RankingModel, VectorRankingModel,
};
use lupa_core::TermId;

use std::collections::HashMap;

fn example_index() -> HashIndex {
    let mut index = HashIndex::new();
    index.index("gato", 1, 1).unwrap();
    index.index("cachorro", 1, 1).unwrap();
    index.index("gato", 2, 1).unwrap();
    index.index("cachorro", 3, 2).unwrap();
    index.finish_indexing().unwrap();
    index
}

/// Query map + posting lists for the given terms, as a ranking model
/// receives them from the query runner.
fn model_inputs(
    index: &HashIndex,
    terms: &[(&str, u32)],
) -> (
    HashMap<String, QueryTerm>,
    HashMap<String, Vec<TermOccurrence>>,
) {
    let mut query = HashMap::new();
    let mut postings = HashMap::new();
    for &(term, term_freq) in terms {
        let Some(term_id) = index.term_id(term) else {
            continue;
        };
        query.insert(term.to_string(), QueryTerm { term_id, term_freq });
        postings.insert(term.to_string(), index.get_occurrence_list(term).unwrap());
    }
    (query, postings)
}

#[test]
fn tf_is_one_plus_log2() {
    assert_eq!(tf(0), 0.0);
    assert_eq!(tf(1), 1.0);
    assert_eq!(tf(2), 2.0);
    assert_eq!(tf(4), 3.0);
}

#[test]
fn idf_guards_against_absent_terms() {
    assert_eq!(idf(10, 0), 0.0);
    assert_eq!(idf(0, 0), 0.0);
    assert_eq!(idf(4, 1), 2.0);
    assert_eq!(idf(4, 4), 0.0);
}

#[test]
fn tf_idf_is_zero_for_zero_frequency() {
    assert_eq!(tf_idf(10, 0, 3), 0.0);
    assert_eq!(tf_idf(0, 0, 0), 0.0);
    assert_eq!(tf_idf(4, 2, 1), 4.0);
}

#[test]
fn boolean_and_intersects() {
    let index = example_index();
    let (query, postings) = model_inputs(&index, &[("gato", 1), ("cachorro", 1)]);
    let ranking = BooleanRankingModel::new(Operator::And).rank(&query, &postings);
    assert_eq!(ranking.doc_ids, vec![1]);
    assert!(ranking.scores.is_none());
}

#[test]
fn boolean_or_unions() {
    let index = example_index();
    let (query, postings) = model_inputs(&index, &[("gato", 1), ("cachorro", 1)]);
    let ranking = BooleanRankingModel::new(Operator::Or).rank(&query, &postings);
    assert_eq!(ranking.doc_ids, vec![1, 2, 3]);
}

#[test]
fn boolean_and_of_nothing_is_empty() {
    let query = HashMap::new();
    let postings = HashMap::new();
    let ranking = BooleanRankingModel::new(Operator::And).rank(&query, &postings);
    assert!(ranking.doc_ids.is_empty());
}

#[test]
fn precomputed_norms_match_hand_calculation() {
    let index = example_index();
    let stats = IndexPrecomputedStats::compute(&index).unwrap();
    assert_eq!(stats.doc_count, 3);

    // Both terms appear in 2 of 3 documents: idf = log2(3/2).
    let weight = (3.0f64 / 2.0).log2();
    let expected_doc1 = (2.0 * weight * weight).sqrt();
    let expected_doc2 = weight;
    let expected_doc3 = 2.0 * weight;
    assert!((stats.norm(1).unwrap() - expected_doc1).abs() < 1e-12);
    assert!((stats.norm(2).unwrap() - expected_doc2).abs() < 1e-12);
    assert!((stats.norm(3).unwrap() - expected_doc3).abs() < 1e-12);
    assert_eq!(stats.norm(99), None);
}

#[test]
fn vector_ranking_prefers_exact_self_match() {
    let index = example_index();
    let stats = IndexPrecomputedStats::compute(&index).unwrap();
    let model = VectorRankingModel::new(stats);

    // Query with document 3's own term bag: "cachorro cachorro".
    let (query, postings) = model_inputs(&index, &[("cachorro", 2)]);
    let ranking = model.rank(&query, &postings);
    let scores = ranking.scores.unwrap();
    let self_score = scores[&3];
    for (&doc_id, &score) in &scores {
        assert!(
            self_score >= score,
            "doc {doc_id} outranks the self-match: {score} > {self_score}"
        );
    }
    assert_eq!(ranking.doc_ids.first(), Some(&3));
}

#[test]
fn documents_without_overlap_are_omitted() {
    let index = example_index();
    let stats = IndexPrecomputedStats::compute(&index).unwrap();
    let model = VectorRankingModel::new(stats);

    let (query, postings) = model_inputs(&index, &[("gato", 1)]);
    let ranking = model.rank(&query, &postings);
    assert!(!ranking.doc_ids.contains(&3));
    assert!(!ranking.scores.unwrap().contains_key(&3));
}

#[test]
fn equal_scores_order_by_ascending_doc_id() {
    let mut index = HashIndex::new();
    index.index("sol", 1, 1).unwrap();
    index.index("sol", 2, 1).unwrap();
    index.index("lua", 3, 1).unwrap();
    index.finish_indexing().unwrap();

    let stats = IndexPrecomputedStats::compute(&index).unwrap();
    let model = VectorRankingModel::new(stats);
    let (query, postings) = model_inputs(&index, &[("sol", 1)]);
    let ranking = model.rank(&query, &postings);
    assert_eq!(ranking.doc_ids, vec![1, 2]);
}

#[test]
fn unknown_query_terms_contribute_nothing() {
    let index = example_index();
    let stats = IndexPrecomputedStats::compute(&index).unwrap();
    let model = VectorRankingModel::new(stats);

    let mut query = HashMap::new();
    query.insert(
        "peixe".to_string(),
        QueryTerm {
            term_id: 7 as TermId,
            term_freq: 1,
        },
    );
    let mut postings: HashMap<String, Vec<TermOccurrence>> = HashMap::new();
    postings.insert("peixe".to_string(), Vec::new());
    let ranking = model.rank(&query, &postings);
    assert!(ranking.doc_ids.is_empty());
}

#[test]
fn vector_scores_are_cosine_normalized() {
    let index = example_index();
    let stats = IndexPrecomputedStats::compute(&index).unwrap();
    let norm1 = stats.norm(1).unwrap();
    let model = VectorRankingModel::new(stats);

    let (query, postings) = model_inputs(&index, &[("gato", 1)]);
    let ranking = model.rank(&query, &postings);
    let scores = ranking.scores.unwrap();

    // Document 1: one shared term with tf 1 on both sides.
    let weight = (3.0f64 / 2.0).log2();
    let expected = weight * weight / norm1;
    assert!((scores[&1] - expected).abs() < 1e-12);
}
