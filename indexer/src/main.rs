use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lupa_core::index::{FileIndex, HashIndex, Index, DEFAULT_BUFFER_CAPACITY};
use lupa_core::persist::{save_file_index, save_hash_index, save_meta, IndexMeta, SNAPSHOT_VERSION};
use lupa_core::preprocess::{PreprocessOptions, Preprocessor};
use lupa_core::DocId;
use scraper::Html;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "lupa-indexer")]
#[command(about = "Build an inverted index over a corpus directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every document under the corpus directory and persist the
    /// result. Queries must later use the same preprocessing flags.
    Build {
        /// Corpus directory: `<doc_id>.html` / `<doc_id>.txt` files,
        /// walked recursively
        #[arg(long)]
        corpus: String,
        /// Output index directory
        #[arg(long)]
        output: String,
        /// Index backend
        #[arg(long, value_enum, default_value_t = Backend::File)]
        backend: Backend,
        /// Posting buffer capacity for the file backend
        #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
        buffer_capacity: usize,
        /// Stop-word file (comma-separated words); omit to disable
        /// stop-word removal
        #[arg(long)]
        stop_words: Option<PathBuf>,
        /// Keep accented characters instead of folding them
        #[arg(long, default_value_t = false)]
        keep_accents: bool,
        /// Reduce terms to their stems
        #[arg(long, default_value_t = false)]
        stem: bool,
        /// Stemmer language
        #[arg(long, default_value = "portuguese")]
        language: String,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Hash,
    File,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            corpus,
            output,
            backend,
            buffer_capacity,
            stop_words,
            keep_accents,
            stem,
            language,
        } => {
            let opts = PreprocessOptions {
                remove_stop_words: stop_words.is_some(),
                fold_accents: !keep_accents,
                stem,
            };
            let preprocessor = match &stop_words {
                Some(path) => Preprocessor::from_stop_words_file(path, &language, opts)?,
                None => Preprocessor::new(HashSet::new(), &language, opts)?,
            };
            build_index(
                Path::new(&corpus),
                Path::new(&output),
                backend,
                buffer_capacity,
                &preprocessor,
            )
        }
    }
}

fn build_index(
    corpus: &Path,
    output: &Path,
    backend: Backend,
    buffer_capacity: usize,
    preprocessor: &Preprocessor,
) -> Result<()> {
    fs::create_dir_all(output)
        .with_context(|| format!("creating output directory {}", output.display()))?;

    let started = Instant::now();
    let num_docs = match backend {
        Backend::Hash => {
            let mut index = HashIndex::new();
            index_corpus(corpus, &mut index, preprocessor)?;
            index.finish_indexing()?;
            save_hash_index(&output.join("index.bin"), &index)?;
            index.document_count()
        }
        Backend::File => {
            let mut index = FileIndex::create(output, buffer_capacity)?;
            index_corpus(corpus, &mut index, preprocessor)?;
            index.finish_indexing()?;
            save_file_index(&index)?;
            index.document_count()
        }
    };

    let meta = IndexMeta {
        num_docs: num_docs as u32,
        created_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        version: SNAPSHOT_VERSION,
    };
    save_meta(&output.join("meta.json"), &meta)?;
    tracing::info!(
        output = %output.display(),
        num_docs,
        elapsed_s = started.elapsed().as_secs_f64(),
        "index build complete"
    );
    Ok(())
}

fn index_corpus(corpus: &Path, index: &mut dyn Index, preprocessor: &Preprocessor) -> Result<()> {
    let mut indexed_docs = 0usize;
    for entry in WalkDir::new(corpus) {
        let entry = entry.with_context(|| format!("walking corpus {}", corpus.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = DocumentKind::from_path(path) else {
            continue;
        };
        let doc_id = parse_doc_id(path)?;
        let text = kind.plain_text(path)?;
        for (term, term_freq) in preprocessor.term_frequencies(&text) {
            index.index(&term, doc_id, term_freq)?;
        }
        indexed_docs += 1;
        if indexed_docs % 1000 == 0 {
            tracing::info!(indexed_docs, "indexing corpus");
        }
    }
    tracing::info!(
        documents = index.document_count(),
        terms = index.vocabulary().len(),
        "corpus walked"
    );
    Ok(())
}

#[derive(Clone, Copy)]
enum DocumentKind {
    Html,
    Text,
}

impl DocumentKind {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("html") => Some(Self::Html),
            Some("txt") => Some(Self::Text),
            _ => None,
        }
    }

    fn plain_text(self, path: &Path) -> Result<String> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading document {}", path.display()))?;
        Ok(match self {
            Self::Html => Html::parse_document(&contents)
                .root_element()
                .text()
                .collect::<Vec<_>>()
                .join(" "),
            Self::Text => contents,
        })
    }
}

/// The base filename is the document id. A recognized document whose stem
/// is not numeric aborts the build: the corpus is machine-produced, so a
/// malformed name means corruption, not stray user data.
fn parse_doc_id(path: &Path) -> Result<DocId> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("document {} has no usable filename", path.display()))?;
    stem.parse::<DocId>().with_context(|| {
        format!(
            "document filename {} does not encode a numeric doc id",
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_ids_come_from_file_stems() {
        assert_eq!(parse_doc_id(Path::new("corpus/42.html")).unwrap(), 42);
        assert!(parse_doc_id(Path::new("corpus/readme.html")).is_err());
    }

    #[test]
    fn only_recognized_extensions_are_documents() {
        assert!(DocumentKind::from_path(Path::new("7.html")).is_some());
        assert!(DocumentKind::from_path(Path::new("7.txt")).is_some());
        assert!(DocumentKind::from_path(Path::new("7.json")).is_none());
        assert!(DocumentKind::from_path(Path::new("notes")).is_none());
    }
}
