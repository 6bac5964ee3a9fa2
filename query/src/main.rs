use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lupa_core::index::Index;
use lupa_core::persist::{load_hash_index, open_file_index};
use lupa_core::preprocess::{PreprocessOptions, Preprocessor};
use lupa_core::query::{evaluate, load_relevance_dir, load_titles, QueryRunner};
use lupa_core::rank::{
    BooleanRankingModel, IndexPrecomputedStats, Operator, Ranking, RankingModel,
    VectorRankingModel,
};
use lupa_core::DocId;
use tracing_subscriber::{fmt, EnvFilter};

use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "lupa-query")]
#[command(about = "Run ranked or boolean queries against a built index", long_about = None)]
struct Args {
    /// Index directory produced by the indexer
    #[arg(long)]
    index: String,
    /// Index backend the directory was built with
    #[arg(long, value_enum, default_value_t = Backend::File)]
    backend: Backend,
    /// Ranking model
    #[arg(long, value_enum, default_value_t = Model::Vector)]
    model: Model,
    /// Directory of `<query_key>.dat` relevance files
    #[arg(long)]
    relevance: Option<PathBuf>,
    /// `doc_id;title` file for presenting results
    #[arg(long)]
    titles: Option<PathBuf>,
    /// Number of results to print
    #[arg(long, default_value_t = 10)]
    top: usize,
    /// Stop-word file; must match the one used at index time
    #[arg(long)]
    stop_words: Option<PathBuf>,
    /// Keep accented characters; must match the index-time setting
    #[arg(long, default_value_t = false)]
    keep_accents: bool,
    /// Reduce terms to their stems; must match the index-time setting
    #[arg(long, default_value_t = false)]
    stem: bool,
    /// Stemmer language
    #[arg(long, default_value = "portuguese")]
    language: String,
    /// Query text; omit to read queries from stdin, one per line
    query: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Hash,
    File,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Model {
    BooleanAnd,
    BooleanOr,
    Vector,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let opts = PreprocessOptions {
        remove_stop_words: args.stop_words.is_some(),
        fold_accents: !args.keep_accents,
        stem: args.stem,
    };
    let preprocessor = match &args.stop_words {
        Some(path) => Preprocessor::from_stop_words_file(path, &args.language, opts)?,
        None => Preprocessor::new(HashSet::new(), &args.language, opts)?,
    };

    let index_dir = Path::new(&args.index);
    let index: Box<dyn Index> = match args.backend {
        Backend::Hash => Box::new(load_hash_index(&index_dir.join("index.bin"))?),
        Backend::File => Box::new(open_file_index(index_dir)?),
    };
    tracing::info!(
        documents = index.document_count(),
        terms = index.vocabulary().len(),
        "index loaded"
    );

    let model = build_model(args.model, index.as_ref())?;
    let runner = QueryRunner::new(index.as_ref(), &preprocessor, model);

    let relevance = match &args.relevance {
        Some(dir) => load_relevance_dir(dir)?,
        None => HashMap::new(),
    };
    let titles = match &args.titles {
        Some(path) => load_titles(path)?,
        None => HashMap::new(),
    };

    match &args.query {
        Some(query) => answer(&runner, &preprocessor, query, &relevance, &titles, args.top),
        None => {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line.context("reading query from stdin")?;
                let query = line.trim();
                if query.is_empty() {
                    continue;
                }
                answer(&runner, &preprocessor, query, &relevance, &titles, args.top)?;
                print!("> ");
                io::stdout().flush().ok();
            }
            Ok(())
        }
    }
}

fn build_model(model: Model, index: &dyn Index) -> Result<Box<dyn RankingModel>> {
    Ok(match model {
        Model::BooleanAnd => Box::new(BooleanRankingModel::new(Operator::And)),
        Model::BooleanOr => Box::new(BooleanRankingModel::new(Operator::Or)),
        Model::Vector => {
            let started = Instant::now();
            let stats = IndexPrecomputedStats::compute(index)
                .context("precomputing document norms")?;
            tracing::info!(
                documents = stats.doc_count,
                elapsed_s = started.elapsed().as_secs_f64(),
                "precomputed document norms"
            );
            Box::new(VectorRankingModel::new(stats))
        }
    })
}

fn answer(
    runner: &QueryRunner,
    preprocessor: &Preprocessor,
    query: &str,
    relevance: &HashMap<String, HashSet<DocId>>,
    titles: &HashMap<DocId, String>,
    top: usize,
) -> Result<()> {
    let started = Instant::now();
    let ranking = runner.run(query)?;
    tracing::info!(
        query,
        answers = ranking.doc_ids.len(),
        elapsed_s = started.elapsed().as_secs_f64(),
        "query answered"
    );

    print_ranking(&ranking, titles, top);

    let key = preprocessor.relevance_key(query);
    if let Some(relevant) = relevance.get(&key) {
        for metrics in evaluate(&ranking.doc_ids, relevant)? {
            println!(
                "precision@{n}: {precision:.4}  recall@{n}: {recall:.4}",
                n = metrics.cutoff,
                precision = metrics.precision,
                recall = metrics.recall,
            );
        }
    }
    Ok(())
}

fn print_ranking(ranking: &Ranking, titles: &HashMap<DocId, String>, top: usize) {
    if ranking.doc_ids.is_empty() {
        println!("no results");
        return;
    }
    for (position, doc_id) in ranking.doc_ids.iter().take(top).enumerate() {
        let score = ranking
            .scores
            .as_ref()
            .and_then(|scores| scores.get(doc_id))
            .map(|score| format!(" {score:.6}"))
            .unwrap_or_default();
        match titles.get(doc_id) {
            Some(title) => println!("{:>3}. doc {doc_id}{score}  {title}", position + 1),
            None => println!("{:>3}. doc {doc_id}{score}", position + 1),
        }
    }
}
