//! Inverted-index backends over `(doc_id, term_id, term_freq)` postings.
//!
//! Both backends share one lifecycle: a write phase of `index` calls,
//! one `finish_indexing`, then a read-only query phase. [`HashIndex`]
//! keeps posting lists in memory; [`FileIndex`] spools postings through a
//! bounded buffer into a single sorted run file on disk, re-merging the
//! whole file on every flush.

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{DocId, TermId};

/// Serialized size of one posting record.
pub const RECORD_SIZE: u64 = 12;

/// Default capacity of the [`FileIndex`] posting buffer: postings held in
/// memory between merges, 12 bytes each.
pub const DEFAULT_BUFFER_CAPACITY: usize = 262_144;

/// One posting: `term_id` occurs in `doc_id` with frequency `term_freq`.
///
/// Orders by `(term_id, doc_id)`, the global order of a finalized
/// postings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermOccurrence {
    pub doc_id: DocId,
    pub term_id: TermId,
    pub term_freq: u32,
}

impl TermOccurrence {
    /// Writes the fixed 12-byte record: doc id, term id, term frequency,
    /// each as a big-endian u32.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.doc_id)?;
        w.write_u32::<BigEndian>(self.term_id)?;
        w.write_u32::<BigEndian>(self.term_freq)
    }

    /// Reads the next record. `Ok(None)` on a clean end of file; an error
    /// if the file ends inside a record.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Option<TermOccurrence>> {
        let mut first = [0u8; 4];
        let mut filled = 0;
        while filled < first.len() {
            let n = r.read(&mut first[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated posting record",
                ));
            }
            filled += n;
        }
        Ok(Some(TermOccurrence {
            doc_id: u32::from_be_bytes(first),
            term_id: r.read_u32::<BigEndian>()?,
            term_freq: r.read_u32::<BigEndian>()?,
        }))
    }
}

impl Ord for TermOccurrence {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.term_id, self.doc_id, self.term_freq).cmp(&(
            other.term_id,
            other.doc_id,
            other.term_freq,
        ))
    }
}

impl PartialOrd for TermOccurrence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Term dictionary: dense ids in first-seen order, never renumbered.
#[derive(Debug, Default, Clone)]
pub(crate) struct Vocabulary {
    pub(crate) terms: Vec<String>,
    ids: HashMap<String, TermId>,
}

impl Vocabulary {
    pub(crate) fn from_terms(terms: Vec<String>) -> Self {
        let ids = terms
            .iter()
            .enumerate()
            .map(|(id, term)| (term.clone(), id as TermId))
            .collect();
        Self { terms, ids }
    }

    fn get_or_insert(&mut self, term: &str) -> TermId {
        match self.ids.get(term) {
            Some(&id) => id,
            None => {
                let id = self.terms.len() as TermId;
                self.terms.push(term.to_string());
                self.ids.insert(term.to_string(), id);
                id
            }
        }
    }

    fn id(&self, term: &str) -> Option<TermId> {
        self.ids.get(term).copied()
    }
}

/// An inverted index: one write phase (`index` calls followed by
/// `finish_indexing`), then a read-only query phase.
pub trait Index {
    /// Records that `term` occurs in `doc_id` with frequency `term_freq`,
    /// assigning the term a dense id on first sight. Consecutive
    /// submissions for the same (term, document) pair merge by adding
    /// frequencies rather than creating a second posting.
    fn index(&mut self, term: &str, doc_id: DocId, term_freq: u32) -> Result<()>;

    /// Known terms in first-seen order; a term's position is its id.
    fn vocabulary(&self) -> &[String];

    fn term_id(&self, term: &str) -> Option<TermId>;

    /// Every document id ever indexed, ascending.
    fn documents(&self) -> Vec<DocId>;

    fn document_count(&self) -> usize;

    /// Postings for `term`, ascending by doc id; empty if the term is
    /// unknown. For [`FileIndex`] this must not be called before
    /// `finish_indexing`.
    fn get_occurrence_list(&self, term: &str) -> Result<Vec<TermOccurrence>>;

    /// Number of distinct documents containing `term`; 0 if unknown.
    fn document_count_with_term(&self, term: &str) -> usize;

    /// Finalizes the backend. Idempotent when nothing is pending;
    /// indexing after this is an error.
    fn finish_indexing(&mut self) -> Result<()>;
}

/// In-memory backend: each term id maps to a posting list. Unbounded
/// memory, O(1) amortized build.
#[derive(Debug, Default)]
pub struct HashIndex {
    pub(crate) vocab: Vocabulary,
    pub(crate) postings: Vec<Vec<TermOccurrence>>,
    pub(crate) documents: BTreeSet<DocId>,
    pub(crate) finished: bool,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Index for HashIndex {
    fn index(&mut self, term: &str, doc_id: DocId, term_freq: u32) -> Result<()> {
        if self.finished {
            bail!("index is finalized; no further writes are accepted");
        }
        if term.is_empty() {
            bail!("cannot index an empty term");
        }
        let term_id = self.vocab.get_or_insert(term);
        if self.postings.len() <= term_id as usize {
            self.postings.push(Vec::new());
        }
        self.documents.insert(doc_id);
        let list = &mut self.postings[term_id as usize];
        if let Some(last) = list.last_mut() {
            if last.doc_id == doc_id {
                last.term_freq += term_freq;
                return Ok(());
            }
        }
        list.push(TermOccurrence {
            doc_id,
            term_id,
            term_freq,
        });
        Ok(())
    }

    fn vocabulary(&self) -> &[String] {
        &self.vocab.terms
    }

    fn term_id(&self, term: &str) -> Option<TermId> {
        self.vocab.id(term)
    }

    fn documents(&self) -> Vec<DocId> {
        self.documents.iter().copied().collect()
    }

    fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn get_occurrence_list(&self, term: &str) -> Result<Vec<TermOccurrence>> {
        Ok(match self.vocab.id(term) {
            Some(id) => self.postings[id as usize].clone(),
            None => Vec::new(),
        })
    }

    fn document_count_with_term(&self, term: &str) -> usize {
        self.vocab
            .id(term)
            .map_or(0, |id| self.postings[id as usize].len())
    }

    /// Sorts every posting list by doc id so reads meet the ordering
    /// invariant for any document submission order.
    fn finish_indexing(&mut self) -> Result<()> {
        for list in &mut self.postings {
            list.sort_by_key(|occ| occ.doc_id);
        }
        self.finished = true;
        Ok(())
    }
}

/// Bounded FIFO of pending postings. Capacity is fixed at construction;
/// the owner flushes before pushing past it.
#[derive(Debug)]
pub(crate) struct PostingBuffer {
    entries: VecDeque<TermOccurrence>,
    capacity: usize,
}

impl PostingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push_back(&mut self, occurrence: TermOccurrence) {
        debug_assert!(self.entries.len() < self.capacity);
        self.entries.push_back(occurrence);
    }

    fn pop_front(&mut self) -> Option<TermOccurrence> {
        self.entries.pop_front()
    }

    fn back_mut(&mut self) -> Option<&mut TermOccurrence> {
        self.entries.back_mut()
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn sort(&mut self) {
        self.entries.make_contiguous().sort();
    }
}

/// Where a term's postings live in the finalized run file. Offset and
/// count are populated by `finish_indexing`; until then they are unset
/// and must not be read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermDirectoryEntry {
    pub term_id: TermId,
    pub start_offset: Option<u64>,
    pub doc_count_with_term: Option<u32>,
}

impl TermDirectoryEntry {
    fn new(term_id: TermId) -> Self {
        Self {
            term_id,
            start_offset: None,
            doc_count_with_term: None,
        }
    }
}

/// Bounded-memory backend: postings spool through a [`PostingBuffer`]
/// into a single on-disk run, kept globally sorted by `(term_id, doc_id)`
/// via a repeated two-way merge.
///
/// Every flush re-reads and rewrites the entire accumulated run, so total
/// build I/O is O(total postings × number of flushes). One sorted file is
/// all the read phase ever needs; there is no multi-level merge.
#[derive(Debug)]
pub struct FileIndex {
    pub(crate) dir: PathBuf,
    pub(crate) vocab: Vocabulary,
    pub(crate) directory: Vec<TermDirectoryEntry>,
    pub(crate) documents: BTreeSet<DocId>,
    buffer: PostingBuffer,
    pub(crate) run_file: Option<PathBuf>,
    run_counter: u32,
    pub(crate) finished: bool,
}

impl FileIndex {
    /// Creates an empty index spooling into `dir`. `buffer_capacity` is
    /// the number of postings held in memory between flushes.
    pub fn create(dir: impl AsRef<Path>, buffer_capacity: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if buffer_capacity == 0 {
            bail!("posting buffer capacity must be at least 1");
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating index directory {}", dir.display()))?;
        Ok(Self {
            dir,
            vocab: Vocabulary::default(),
            directory: Vec::new(),
            documents: BTreeSet::new(),
            buffer: PostingBuffer::new(buffer_capacity),
            run_file: None,
            run_counter: 0,
            finished: false,
        })
    }

    pub(crate) fn reopen(
        dir: PathBuf,
        vocab: Vocabulary,
        directory: Vec<TermDirectoryEntry>,
        documents: BTreeSet<DocId>,
        run_file: Option<PathBuf>,
    ) -> Self {
        Self {
            dir,
            vocab,
            directory,
            documents,
            buffer: PostingBuffer::new(DEFAULT_BUFFER_CAPACITY),
            run_file,
            run_counter: 0,
            finished: true,
        }
    }

    /// The finalized postings file, if any postings were indexed.
    pub fn postings_path(&self) -> Option<&Path> {
        self.run_file.as_deref()
    }

    pub fn index_dir(&self) -> &Path {
        &self.dir
    }

    fn run_path(&self, counter: u32) -> PathBuf {
        self.dir.join(format!("run_{counter:06}.idx"))
    }

    /// Sorts the buffered postings and two-way merges them with the
    /// previous run into a brand-new run file, then deletes the previous
    /// run. The new run is again globally sorted by `(term_id, doc_id)`.
    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort();
        let buffered = self.buffer.len();

        let next_path = self.run_path(self.run_counter + 1);
        let file = File::create(&next_path)
            .with_context(|| format!("creating run file {}", next_path.display()))?;
        let mut out = BufWriter::new(file);

        match self.run_file.as_ref() {
            Some(prev_path) => {
                let prev = File::open(prev_path)
                    .with_context(|| format!("opening run file {}", prev_path.display()))?;
                let mut reader = BufReader::new(prev);
                let mut from_file = TermOccurrence::read_from(&mut reader)?;
                let mut from_buffer = self.buffer.pop_front();
                while let (Some(file_occ), Some(buf_occ)) = (from_file, from_buffer) {
                    if buf_occ > file_occ {
                        file_occ.write_to(&mut out)?;
                        from_file = TermOccurrence::read_from(&mut reader)?;
                    } else {
                        buf_occ.write_to(&mut out)?;
                        from_buffer = self.buffer.pop_front();
                    }
                }
                while let Some(buf_occ) = from_buffer {
                    buf_occ.write_to(&mut out)?;
                    from_buffer = self.buffer.pop_front();
                }
                while let Some(file_occ) = from_file {
                    file_occ.write_to(&mut out)?;
                    from_file = TermOccurrence::read_from(&mut reader)?;
                }
            }
            None => {
                while let Some(buf_occ) = self.buffer.pop_front() {
                    buf_occ.write_to(&mut out)?;
                }
            }
        }
        out.flush()
            .with_context(|| format!("flushing run file {}", next_path.display()))?;

        if let Some(prev_path) = self.run_file.take() {
            fs::remove_file(&prev_path)
                .with_context(|| format!("removing superseded run {}", prev_path.display()))?;
        }
        self.run_counter += 1;
        self.run_file = Some(next_path);
        tracing::debug!(
            run = self.run_counter,
            postings = buffered,
            "flushed posting buffer"
        );
        Ok(())
    }

    /// One sequential scan of the sorted run. Postings for a term are
    /// contiguous, so each term's entry gets the byte offset of its first
    /// record and the count of records until the term id changes.
    fn build_directory(&mut self, run_path: &Path) -> Result<()> {
        let file = File::open(run_path)
            .with_context(|| format!("opening run file {}", run_path.display()))?;
        let mut reader = BufReader::new(file);
        let mut current: Option<(TermId, u64, u32)> = None;
        let mut pos: u64 = 0;
        while let Some(occ) =
            TermOccurrence::read_from(&mut reader).context("scanning finalized run")?
        {
            current = match current {
                Some((term_id, start, count)) if term_id == occ.term_id => {
                    Some((term_id, start, count + 1))
                }
                Some((term_id, start, count)) => {
                    self.commit_entry(term_id, start, count)?;
                    Some((occ.term_id, pos, 1))
                }
                None => Some((occ.term_id, pos, 1)),
            };
            pos += RECORD_SIZE;
        }
        if let Some((term_id, start, count)) = current {
            self.commit_entry(term_id, start, count)?;
        }
        Ok(())
    }

    fn commit_entry(&mut self, term_id: TermId, start: u64, count: u32) -> Result<()> {
        let entry = self
            .directory
            .get_mut(term_id as usize)
            .with_context(|| format!("run file contains unknown term id {term_id}"))?;
        entry.start_offset = Some(start);
        entry.doc_count_with_term = Some(count);
        Ok(())
    }
}

impl Index for FileIndex {
    fn index(&mut self, term: &str, doc_id: DocId, term_freq: u32) -> Result<()> {
        if self.finished {
            bail!("index is finalized; no further writes are accepted");
        }
        if term.is_empty() {
            bail!("cannot index an empty term");
        }
        let term_id = self.vocab.get_or_insert(term);
        if self.directory.len() <= term_id as usize {
            self.directory.push(TermDirectoryEntry::new(term_id));
        }
        self.documents.insert(doc_id);
        if let Some(last) = self.buffer.back_mut() {
            if last.term_id == term_id && last.doc_id == doc_id {
                last.term_freq += term_freq;
                return Ok(());
            }
        }
        self.buffer.push_back(TermOccurrence {
            doc_id,
            term_id,
            term_freq,
        });
        if self.buffer.is_full() {
            self.flush()?;
        }
        Ok(())
    }

    fn vocabulary(&self) -> &[String] {
        &self.vocab.terms
    }

    fn term_id(&self, term: &str) -> Option<TermId> {
        self.vocab.id(term)
    }

    fn documents(&self) -> Vec<DocId> {
        self.documents.iter().copied().collect()
    }

    fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn get_occurrence_list(&self, term: &str) -> Result<Vec<TermOccurrence>> {
        if !self.finished {
            bail!("get_occurrence_list called before finish_indexing");
        }
        let Some(term_id) = self.vocab.id(term) else {
            return Ok(Vec::new());
        };
        let entry = &self.directory[term_id as usize];
        let (Some(start), Some(count)) = (entry.start_offset, entry.doc_count_with_term) else {
            bail!("term directory entry for {term:?} was never populated");
        };
        let run_path = self
            .run_file
            .as_ref()
            .with_context(|| format!("postings file missing for term {term:?}"))?;
        let file = File::open(run_path)
            .with_context(|| format!("opening postings file {}", run_path.display()))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(start))
            .with_context(|| format!("seeking to postings for {term:?}"))?;
        let mut occurrences = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match TermOccurrence::read_from(&mut reader)? {
                Some(occ) => occurrences.push(occ),
                None => bail!("postings file ended inside the posting list for {term:?}"),
            }
        }
        Ok(occurrences)
    }

    fn document_count_with_term(&self, term: &str) -> usize {
        self.vocab.id(term).map_or(0, |id| {
            self.directory[id as usize]
                .doc_count_with_term
                .unwrap_or(0) as usize
        })
    }

    /// Flushes any remaining buffered postings into one final fully
    /// sorted run, then scans it once to populate the term directory.
    /// Calling again once finalized is a no-op.
    fn finish_indexing(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.flush()?;
        if let Some(run_path) = self.run_file.clone() {
            self.build_directory(&run_path)?;
        }
        self.finished = true;
        tracing::info!(
            terms = self.vocab.terms.len(),
            documents = self.documents.len(),
            "finalized file index"
        );
        Ok(())
    }
}
