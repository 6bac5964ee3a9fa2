//! On-disk snapshots: a versioned record format decoupled from the
//! in-memory structures, so save and load stay exact inverses across
//! releases.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::index::{FileIndex, HashIndex, TermDirectoryEntry, TermOccurrence, Vocabulary};
use crate::{DocId, TermId};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Sidecar written next to a finalized [`FileIndex`]'s postings file.
pub const FILE_INDEX_META: &str = "vocabulary.bin";

/// Human-readable build metadata written next to a persisted index.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexMeta {
    pub num_docs: u32,
    pub created_at: String,
    pub version: u32,
}

/// Snapshot record of a [`HashIndex`]. Terms are stored in id order;
/// posting lists carry (doc_id, term_freq) pairs with the term id implied
/// by position.
#[derive(Serialize, Deserialize)]
struct HashIndexSnapshot {
    version: u32,
    finished: bool,
    terms: Vec<String>,
    documents: Vec<DocId>,
    postings: Vec<Vec<(DocId, u32)>>,
}

pub fn save_hash_index(path: &Path, index: &HashIndex) -> Result<()> {
    let snapshot = HashIndexSnapshot {
        version: SNAPSHOT_VERSION,
        finished: index.finished,
        terms: index.vocab.terms.clone(),
        documents: index.documents.iter().copied().collect(),
        postings: index
            .postings
            .iter()
            .map(|list| list.iter().map(|occ| (occ.doc_id, occ.term_freq)).collect())
            .collect(),
    };
    let file =
        File::create(path).with_context(|| format!("creating snapshot {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &snapshot)
        .with_context(|| format!("serializing snapshot {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flushing snapshot {}", path.display()))?;
    Ok(())
}

pub fn load_hash_index(path: &Path) -> Result<HashIndex> {
    let file = File::open(path).with_context(|| format!("opening snapshot {}", path.display()))?;
    let snapshot: HashIndexSnapshot = bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("deserializing snapshot {}", path.display()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        bail!(
            "unsupported snapshot version {} in {} (expected {})",
            snapshot.version,
            path.display(),
            SNAPSHOT_VERSION
        );
    }
    let postings = snapshot
        .postings
        .into_iter()
        .enumerate()
        .map(|(term_id, list)| {
            list.into_iter()
                .map(|(doc_id, term_freq)| TermOccurrence {
                    doc_id,
                    term_id: term_id as TermId,
                    term_freq,
                })
                .collect()
        })
        .collect();
    Ok(HashIndex {
        vocab: Vocabulary::from_terms(snapshot.terms),
        postings,
        documents: snapshot.documents.into_iter().collect(),
        finished: snapshot.finished,
    })
}

/// Vocabulary, term directory, and document set of a finalized
/// [`FileIndex`]; together with the postings file this is everything the
/// read phase needs.
#[derive(Serialize, Deserialize)]
struct FileIndexSnapshot {
    version: u32,
    terms: Vec<String>,
    documents: Vec<DocId>,
    postings_file: String,
    directory: Vec<(u64, u32)>,
}

/// Writes the vocabulary sidecar into the index directory. The index must
/// be finalized: the term directory is not populated before that.
pub fn save_file_index(index: &FileIndex) -> Result<()> {
    if !index.finished {
        bail!("finish_indexing must run before the index is saved");
    }
    let postings_file = match &index.run_file {
        Some(path) => path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("postings path {} has no usable name", path.display()))?
            .to_string(),
        None => String::new(),
    };
    let directory = index
        .directory
        .iter()
        .map(|entry| match (entry.start_offset, entry.doc_count_with_term) {
            (Some(start), Some(count)) => Ok((start, count)),
            _ => bail!("term directory entry {} was never populated", entry.term_id),
        })
        .collect::<Result<Vec<_>>>()?;
    let snapshot = FileIndexSnapshot {
        version: SNAPSHOT_VERSION,
        terms: index.vocab.terms.clone(),
        documents: index.documents.iter().copied().collect(),
        postings_file,
        directory,
    };
    let path = index.index_dir().join(FILE_INDEX_META);
    let file =
        File::create(&path).with_context(|| format!("creating sidecar {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &snapshot)
        .with_context(|| format!("serializing sidecar {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flushing sidecar {}", path.display()))?;
    Ok(())
}

/// Reopens a finalized [`FileIndex`] from its directory, in the read-only
/// query phase.
pub fn open_file_index(dir: &Path) -> Result<FileIndex> {
    let path = dir.join(FILE_INDEX_META);
    let file = File::open(&path).with_context(|| format!("opening sidecar {}", path.display()))?;
    let snapshot: FileIndexSnapshot = bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("deserializing sidecar {}", path.display()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        bail!(
            "unsupported sidecar version {} in {} (expected {})",
            snapshot.version,
            path.display(),
            SNAPSHOT_VERSION
        );
    }
    let run_file: Option<PathBuf> = if snapshot.postings_file.is_empty() {
        None
    } else {
        let run_path = dir.join(&snapshot.postings_file);
        if !run_path.is_file() {
            bail!("postings file {} is missing", run_path.display());
        }
        Some(run_path)
    };
    let directory = snapshot
        .directory
        .into_iter()
        .enumerate()
        .map(|(term_id, (start, count))| TermDirectoryEntry {
            term_id: term_id as TermId,
            start_offset: Some(start),
            doc_count_with_term: Some(count),
        })
        .collect();
    let documents: BTreeSet<DocId> = snapshot.documents.into_iter().collect();
    Ok(FileIndex::reopen(
        dir.to_path_buf(),
        Vocabulary::from_terms(snapshot.terms),
        directory,
        documents,
        run_file,
    ))
}

pub fn save_meta(path: &Path, meta: &IndexMeta) -> Result<()> {
    let json = serde_json::to_string_pretty(meta).context("serializing index metadata")?;
    std::fs::write(path, json).with_context(|| format!("writing metadata {}", path.display()))?;
    Ok(())
}

pub fn load_meta(path: &Path) -> Result<IndexMeta> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading metadata {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing metadata {}", path.display()))
}
