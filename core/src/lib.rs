pub mod index;
pub mod persist;
pub mod preprocess;
pub mod query;
pub mod rank;

/// Dense term identifier, assigned in first-seen order starting at 0.
pub type TermId = u32;
/// Externally supplied document identifier.
pub type DocId = u32;

pub use index::{FileIndex, HashIndex, Index, TermOccurrence};
pub use preprocess::{PreprocessOptions, Preprocessor};
pub use query::QueryRunner;
pub use rank::{
    BooleanRankingModel, IndexPrecomputedStats, Operator, Ranking, RankingModel, VectorRankingModel,
};
