//! relop - disk-backed relational operators over CSV relations
//!
//! Computes cartesian product, set difference and left outer equi-join of
//! CSV tables that need not fit in memory, using external sorting and
//! forward-only merge scans. Each operator is a single-shot, single-threaded
//! batch transformation of one or two input files into one output file.

pub mod compare;
pub mod config;
pub mod cursor;
pub mod error;
pub mod key_pairs;
pub mod record;
/// External sort and the merge-based operators built on it
pub mod sort_merge;

pub use compare::{KeyField, RecordComparator};
pub use config::EngineConfig;
pub use error::{RelopError, Result};
pub use key_pairs::KeyPairMap;
pub use record::{Encoding, Record};
pub use sort_merge::{
    CartesianProduct, Difference, LeftOuterJoin, OperatorReport, RelationInput, SortOperator,
};
