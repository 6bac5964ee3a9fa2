use lupa_core::index::{FileIndex, HashIndex, Index, TermOccurrence, RECORD_SIZE};
use lupa_core::persist::{load_hash_index, open_file_index, save_file_index, save_hash_index};
use lupa_core::DocId;

use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

/// Three documents: "gato cachorro", "gato", "cachorro cachorro".
fn index_example_corpus(index: &mut dyn Index) {
    index.index("gato", 1, 1).unwrap();
    index.index("cachorro", 1, 1).unwrap();
    index.index("gato", 2, 1).unwrap();
    index.index("cachorro", 3, 2).unwrap();
    index.finish_indexing().unwrap();
}

fn pairs(index: &dyn Index, term: &str) -> Vec<(DocId, u32)> {
    index
        .get_occurrence_list(term)
        .unwrap()
        .into_iter()
        .map(|occ| (occ.doc_id, occ.term_freq))
        .collect()
}

fn assert_example_corpus(index: &dyn Index) {
    assert_eq!(index.vocabulary(), ["gato".to_string(), "cachorro".to_string()]);
    assert_eq!(index.term_id("gato"), Some(0));
    assert_eq!(index.term_id("cachorro"), Some(1));
    assert_eq!(index.document_count(), 3);
    assert_eq!(index.documents(), vec![1, 2, 3]);
    assert_eq!(pairs(index, "gato"), vec![(1, 1), (2, 1)]);
    assert_eq!(pairs(index, "cachorro"), vec![(1, 1), (3, 2)]);
    assert_eq!(index.document_count_with_term("gato"), 2);
    assert_eq!(index.document_count_with_term("cachorro"), 2);
    assert_eq!(index.document_count_with_term("peixe"), 0);
    assert!(index.get_occurrence_list("peixe").unwrap().is_empty());
}

#[test]
fn example_corpus_hash_index() {
    let mut index = HashIndex::new();
    index_example_corpus(&mut index);
    assert_example_corpus(&index);
}

#[test]
fn example_corpus_file_index() {
    let dir = tempdir().unwrap();
    let mut index = FileIndex::create(dir.path(), 3).unwrap();
    index_example_corpus(&mut index);
    assert_example_corpus(&index);
}

/// Per-document term bags, submitted in descending doc-id order so
/// sortedness of the read-phase lists is earned, not accidental.
fn synthetic_docs() -> Vec<(DocId, Vec<(&'static str, u32)>)> {
    let words = ["abacaxi", "bola", "casa", "dado", "estrela", "farol", "gelo"];
    let mut docs = Vec::new();
    for doc in 0..24u32 {
        let mut terms = Vec::new();
        for (offset, word) in words.iter().enumerate() {
            let freq = (doc as usize + offset) % 4;
            if freq > 0 {
                terms.push((*word, freq as u32));
            }
        }
        docs.push((100 + doc, terms));
    }
    docs.reverse();
    docs
}

fn build<I: Index>(index: &mut I) {
    for (doc_id, terms) in synthetic_docs() {
        for (term, freq) in terms {
            index.index(term, doc_id, freq).unwrap();
        }
    }
    index.finish_indexing().unwrap();
}

#[test]
fn backends_agree_for_any_buffer_capacity() {
    let mut reference = HashIndex::new();
    build(&mut reference);

    for capacity in [1usize, 7, 10_000] {
        let dir = tempdir().unwrap();
        let mut file_index = FileIndex::create(dir.path(), capacity).unwrap();
        build(&mut file_index);

        assert_eq!(file_index.document_count(), reference.document_count());
        assert_eq!(file_index.vocabulary(), reference.vocabulary());
        for term in reference.vocabulary() {
            assert_eq!(
                pairs(&file_index, term),
                pairs(&reference, term),
                "posting lists diverge for {term:?} at capacity {capacity}"
            );
            assert_eq!(
                file_index.document_count_with_term(term),
                reference.document_count_with_term(term)
            );
        }
    }
}

#[test]
fn run_file_is_globally_sorted() {
    let dir = tempdir().unwrap();
    let mut index = FileIndex::create(dir.path(), 3).unwrap();
    build(&mut index);

    let raw = fs::read(index.postings_path().unwrap()).unwrap();
    assert_eq!(raw.len() as u64 % RECORD_SIZE, 0);
    let mut cursor = Cursor::new(raw);
    let mut records = Vec::new();
    while let Some(occ) = TermOccurrence::read_from(&mut cursor).unwrap() {
        records.push(occ);
    }
    let total: usize = index
        .vocabulary()
        .iter()
        .map(|term| index.document_count_with_term(term))
        .sum();
    assert_eq!(records.len(), total);
    assert!(records.windows(2).all(|w| {
        (w[0].term_id, w[0].doc_id) < (w[1].term_id, w[1].doc_id)
    }));
}

#[test]
fn file_index_rejects_reads_before_finish() {
    let dir = tempdir().unwrap();
    let mut index = FileIndex::create(dir.path(), 4).unwrap();
    index.index("gato", 1, 1).unwrap();
    assert!(index.get_occurrence_list("gato").is_err());
}

#[test]
fn finish_is_idempotent_and_seals_the_index() {
    let dir = tempdir().unwrap();
    let mut index = FileIndex::create(dir.path(), 4).unwrap();
    index.index("gato", 1, 1).unwrap();
    index.finish_indexing().unwrap();
    index.finish_indexing().unwrap();
    assert_eq!(pairs(&index, "gato"), vec![(1, 1)]);
    assert!(index.index("gato", 2, 1).is_err());
}

#[test]
fn empty_index_finalizes_cleanly() {
    let dir = tempdir().unwrap();
    let mut index = FileIndex::create(dir.path(), 4).unwrap();
    index.finish_indexing().unwrap();
    assert_eq!(index.document_count(), 0);
    assert!(index.vocabulary().is_empty());
    assert!(index.get_occurrence_list("gato").unwrap().is_empty());
    assert!(index.postings_path().is_none());
}

#[test]
fn consecutive_submissions_for_one_document_merge() {
    let mut hash = HashIndex::new();
    hash.index("gato", 1, 1).unwrap();
    hash.index("gato", 1, 2).unwrap();
    hash.finish_indexing().unwrap();
    assert_eq!(pairs(&hash, "gato"), vec![(1, 3)]);

    let dir = tempdir().unwrap();
    let mut file = FileIndex::create(dir.path(), 4).unwrap();
    file.index("gato", 1, 1).unwrap();
    file.index("gato", 1, 2).unwrap();
    file.finish_indexing().unwrap();
    assert_eq!(pairs(&file, "gato"), vec![(1, 3)]);
}

#[test]
fn record_layout_is_twelve_big_endian_bytes() {
    let occ = TermOccurrence {
        doc_id: 0x0102_0304,
        term_id: 5,
        term_freq: 260,
    };
    let mut bytes = Vec::new();
    occ.write_to(&mut bytes).unwrap();
    assert_eq!(
        bytes,
        [1, 2, 3, 4, 0, 0, 0, 5, 0, 0, 1, 4],
        "doc id, term id, term freq, big-endian"
    );
    let back = TermOccurrence::read_from(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(back, Some(occ));
}

#[test]
fn clean_eof_is_not_an_error_but_truncation_is() {
    let empty: [u8; 0] = [];
    assert_eq!(
        TermOccurrence::read_from(&mut Cursor::new(empty)).unwrap(),
        None
    );
    let truncated = [0u8; 10];
    assert!(TermOccurrence::read_from(&mut Cursor::new(truncated)).is_err());
}

#[test]
fn hash_snapshot_round_trips() {
    let mut index = HashIndex::new();
    build(&mut index);

    let dir = tempdir().unwrap();
    let path = dir.path().join("index.bin");
    save_hash_index(&path, &index).unwrap();
    let restored = load_hash_index(&path).unwrap();

    assert_eq!(restored.vocabulary(), index.vocabulary());
    assert_eq!(restored.documents(), index.documents());
    assert_eq!(restored.document_count(), index.document_count());
    for term in index.vocabulary() {
        assert_eq!(pairs(&restored, term), pairs(&index, term));
    }
}

#[test]
fn file_index_reopens_from_its_directory() {
    let dir = tempdir().unwrap();
    let mut index = FileIndex::create(dir.path(), 5).unwrap();
    build(&mut index);
    save_file_index(&index).unwrap();

    let reopened = open_file_index(dir.path()).unwrap();
    assert_eq!(reopened.vocabulary(), index.vocabulary());
    assert_eq!(reopened.document_count(), index.document_count());
    for term in index.vocabulary() {
        assert_eq!(pairs(&reopened, term), pairs(&index, term));
        assert_eq!(
            reopened.document_count_with_term(term),
            index.document_count_with_term(term)
        );
    }
}

#[test]
fn missing_postings_file_surfaces_on_read() {
    let dir = tempdir().unwrap();
    let mut index = FileIndex::create(dir.path(), 5).unwrap();
    index_example_corpus(&mut index);
    save_file_index(&index).unwrap();
    fs::remove_file(index.postings_path().unwrap()).unwrap();
    assert!(open_file_index(dir.path()).is_err());
}
