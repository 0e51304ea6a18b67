//! Sort-merge relational operators
//!
//! Disk-backed operators built from external sort + forward merge scans.
//! Memory stays bounded by the sorter's run size plus one record per open
//! cursor.
//!
//! ## Operators
//!
//! - **Cartesian product**: no sort; the right data zone is replayed from a
//!   cursor mark once per left row
//! - **Difference** (`L - R`): both sides sorted by whole row, merged with
//!   duplicate collapse and cancellation of rows present on both sides
//! - **Left outer join**: both sides sorted by key fields, merged with replay
//!   groups so consecutive left rows sharing a key re-read the same right run
//! - **Sort**: one relation sorted by a typed key specification
//!
//! ## Phases
//!
//! Every operator moves `Init -> HeaderMerge -> DataMerge -> (Restore) ->
//! Done`, or to `Failed` from wherever an error surfaced. With order
//! preservation the merge output carries order tokens and the restore pass
//! re-sorts by them, so data rows come out in left input order.

pub mod difference;
pub mod external_sort;
pub mod outer_join;
pub mod product;
pub mod sort_op;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::EngineConfig;
use crate::cursor::RecordCursor;
use crate::error::Result;
use crate::record::{Encoding, Record, RecordWriter};

pub use difference::Difference;
pub use external_sort::{restore_input_order, ExternalSorter, SortOutcome};
pub use outer_join::LeftOuterJoin;
pub use product::CartesianProduct;
pub use sort_op::SortOperator;

/// One input relation: a CSV file whose first `header_rows` rows are passed
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInput {
    pub path: PathBuf,
    pub header_rows: usize,
}

impl RelationInput {
    pub fn new(path: impl Into<PathBuf>, header_rows: usize) -> Self {
        Self {
            path: path.into(),
            header_rows,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Init,
    HeaderMerge,
    DataMerge,
    Restore,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::HeaderMerge => "header-merge",
            Phase::DataMerge => "data-merge",
            Phase::Restore => "restore",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of one operator invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorReport {
    pub operator: String,
    pub phase: Phase,
    pub left_rows: u64,
    pub right_rows: u64,
    pub header_rows: u64,
    pub data_rows: u64,
    pub output_width: usize,
    pub order_restored: bool,
    pub sorts: Vec<SortOutcome>,
    pub elapsed_ms: u64,
}

pub(crate) struct PhaseTracker {
    operator: &'static str,
    phase: Phase,
}

impl PhaseTracker {
    pub(crate) fn enter(&mut self, next: Phase) {
        debug!("{}: {} -> {}", self.operator, self.phase, next);
        self.phase = next;
    }
}

/// Run `body` under a phase tracker, stamping the final phase and timing
/// onto its report.
pub(crate) fn run_tracked<F>(operator: &'static str, output: &Path, body: F) -> Result<OperatorReport>
where
    F: FnOnce(&mut PhaseTracker) -> Result<OperatorReport>,
{
    let start_time = Instant::now();
    let mut tracker = PhaseTracker {
        operator,
        phase: Phase::Init,
    };
    info!("{}: writing {}", operator, output.display());

    match body(&mut tracker) {
        Ok(mut report) => {
            tracker.enter(Phase::Done);
            report.operator = operator.to_string();
            report.phase = Phase::Done;
            report.elapsed_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(
                "{}: {} header rows, {} data rows, width {} ({}ms)",
                operator, report.header_rows, report.data_rows, report.output_width, report.elapsed_ms
            );
            Ok(report)
        }
        Err(e) => {
            let failed_in = tracker.phase;
            tracker.enter(Phase::Failed);
            error!("{}: failed during {}: {}", operator, failed_in, e);
            Err(e)
        }
    }
}

/// Row counts and width of a relation, from one sequential pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationScan {
    pub header_rows: u64,
    pub data_rows: u64,
    pub max_field_count: usize,
}

pub fn scan_relation(input: &RelationInput, encoding: Encoding) -> Result<RelationScan> {
    let mut scan = RelationScan::default();
    let mut cursor = RecordCursor::open(&input.path, encoding)?;
    while let Some(record) = cursor.next_record()? {
        scan.max_field_count = scan.max_field_count.max(record.len());
        if scan.header_rows < input.header_rows as u64 {
            scan.header_rows += 1;
        } else {
            scan.data_rows += 1;
        }
    }
    Ok(scan)
}

/// Zip `left_rows` header rows of `left` with `right_rows` of `right`; the
/// shorter side contributes empty rows. Returns the rows written.
pub(crate) fn merge_headers<F>(
    left: &mut RecordCursor,
    left_rows: u64,
    right: &mut RecordCursor,
    right_rows: u64,
    writer: &mut RecordWriter,
    mut project: F,
) -> Result<u64>
where
    F: for<'r> FnMut(&'r [String], &'r [String], &mut Vec<&'r str>),
{
    let empty: Record = Vec::new();
    let rows = left_rows.max(right_rows);
    for row in 0..rows {
        let l = if row < left_rows { left.next_record()? } else { None };
        let r = if row < right_rows { right.next_record()? } else { None };
        let mut fields = Vec::new();
        project(
            l.as_deref().unwrap_or(&empty),
            r.as_deref().unwrap_or(&empty),
            &mut fields,
        );
        writer.write_fields(fields)?;
    }
    Ok(rows)
}

/// Where a merge writes: the final output, or an intermediate temp file
/// that a restore pass turns into the final output.
pub(crate) fn merge_target(
    config: &EngineConfig,
    keep_order: bool,
    output: &Path,
    prefix: &str,
) -> Result<(Option<NamedTempFile>, RecordWriter)> {
    if keep_order {
        let temp = config.temp_file(prefix)?;
        let writer = external_sort::temp_writer(config, &temp)?;
        Ok((Some(temp), writer))
    } else {
        Ok((None, RecordWriter::create(output, config.encoding)?))
    }
}
