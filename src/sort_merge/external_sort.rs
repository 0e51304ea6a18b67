//! External merge sort of a CSV relation's data zone
//!
//! 1. Copy the first `H` rows (header zone) to the destination untouched
//! 2. Read data rows into a run of at most `run_size` rows, optionally
//!    prefixing each with its order token (1, 2, 3, ...)
//! 3. Sort each run in memory; if everything fit in one run write it out
//!    directly, otherwise spill runs to temp files
//! 4. K-way merge the runs with a min-heap, in extra passes when there are
//!    more runs than `merge_fan_in`
//!
//! Keys are extracted once per row, so rows are compared by `SortKey`
//! without re-parsing. Sorting is not stable.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempPath};

use crate::compare::{KeyField, RecordComparator, SortKey};
use crate::config::EngineConfig;
use crate::cursor::RecordCursor;
use crate::error::{IoContext, Result};
use crate::record::{Record, RecordWriter};

/// What one sort saw and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOutcome {
    pub total_rows: u64,
    pub header_rows: u64,
    pub sorted_rows: u64,
    /// Widest source row, header rows included, order tokens excluded
    pub max_field_count: usize,
    pub runs_spilled: usize,
    pub merge_passes: usize,
}

struct Keyed {
    key: SortKey,
    record: Record,
}

/// Heap entry for the k-way merge (min-heap by key, then run index)
struct HeapItem {
    key: SortKey,
    run: usize,
    record: Record,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.run.cmp(&self.run))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

pub struct ExternalSorter<'a> {
    config: &'a EngineConfig,
    comparator: RecordComparator,
    header_rows: usize,
    inject_order_token: bool,
    strip_leading_fields: usize,
}

impl<'a> ExternalSorter<'a> {
    pub fn new(config: &'a EngineConfig, comparator: RecordComparator) -> Self {
        Self {
            config,
            comparator,
            header_rows: 0,
            inject_order_token: false,
            strip_leading_fields: 0,
        }
    }

    pub fn header_rows(mut self, rows: usize) -> Self {
        self.header_rows = rows;
        self
    }

    /// Prefix every data row with its 1-based position. The comparator sees
    /// the prefixed row, so its field indices must account for the token.
    pub fn inject_order_token(mut self, inject: bool) -> Self {
        self.inject_order_token = inject;
        self
    }

    /// Drop this many leading fields from each data row when writing the
    /// final output.
    pub fn strip_leading_fields(mut self, fields: usize) -> Self {
        self.strip_leading_fields = fields;
        self
    }

    pub fn sort(&self, source: &Path, dest: &Path) -> Result<SortOutcome> {
        let writer = RecordWriter::create(dest, self.config.encoding)?;
        self.sort_into(source, writer)
    }

    /// Sort into a fresh temp file that is deleted when the guard drops.
    pub fn sort_to_temp(&self, source: &Path, prefix: &str) -> Result<(NamedTempFile, SortOutcome)> {
        let temp = self.config.temp_file(prefix)?;
        let writer = temp_writer(self.config, &temp)?;
        let outcome = self.sort_into(source, writer)?;
        Ok((temp, outcome))
    }

    fn sort_into(&self, source: &Path, mut writer: RecordWriter) -> Result<SortOutcome> {
        let start_time = Instant::now();
        let mut outcome = SortOutcome::default();
        let mut cursor = RecordCursor::open(source, self.config.encoding)?;

        while outcome.header_rows < self.header_rows as u64 {
            let Some(record) = cursor.next_record()? else {
                break;
            };
            outcome.max_field_count = outcome.max_field_count.max(record.len());
            writer.write_record(&record)?;
            outcome.header_rows += 1;
        }

        let run_size = self.config.run_size.max(1);
        let mut run: Vec<Keyed> = Vec::with_capacity(run_size.min(8192));
        // closed paths: a run holds no descriptor until it is merged
        let mut runs: Vec<TempPath> = Vec::new();

        while let Some(mut record) = cursor.next_record()? {
            outcome.max_field_count = outcome.max_field_count.max(record.len());
            outcome.sorted_rows += 1;
            if self.inject_order_token {
                record.insert(0, outcome.sorted_rows.to_string());
            }
            let key = self.comparator.key(&record)?;
            if run.len() >= run_size {
                runs.push(self.spill(&mut run, runs.len())?);
            }
            run.push(Keyed { key, record });
        }
        cursor.close();
        outcome.total_rows = outcome.header_rows + outcome.sorted_rows;

        if runs.is_empty() {
            run.sort_unstable_by(|a, b| a.key.cmp(&b.key));
            for keyed in &run {
                self.write_data_row(&mut writer, &keyed.record, self.strip_leading_fields)?;
            }
        } else {
            if !run.is_empty() {
                runs.push(self.spill(&mut run, runs.len())?);
            }
            drop(run);
            outcome.runs_spilled = runs.len();

            let fan_in = self.config.merge_fan_in.max(2);
            while runs.len() > fan_in {
                outcome.merge_passes += 1;
                let mut merged = Vec::with_capacity(runs.len().div_ceil(fan_in));
                for group in runs.chunks(fan_in) {
                    let temp = self.config.temp_file("relop-merge-")?;
                    let mut group_writer = temp_writer(self.config, &temp)?;
                    self.merge_runs(group, &mut group_writer, 0)?;
                    group_writer.finish()?;
                    merged.push(temp.into_temp_path());
                }
                debug!(
                    "Merge pass {}: {} runs -> {} runs",
                    outcome.merge_passes,
                    runs.len(),
                    merged.len()
                );
                // exhausted runs are deleted here
                runs = merged;
            }
            outcome.merge_passes += 1;
            self.merge_runs(&runs, &mut writer, self.strip_leading_fields)?;
        }

        let written = writer.finish()?;
        debug_assert_eq!(written, outcome.total_rows);
        info!(
            "Sorted {}: {} header rows, {} data rows, {} runs, {} merge passes, max width {} ({:.1}ms)",
            source.display(),
            outcome.header_rows,
            outcome.sorted_rows,
            outcome.runs_spilled,
            outcome.merge_passes,
            outcome.max_field_count,
            start_time.elapsed().as_secs_f64() * 1000.0
        );
        Ok(outcome)
    }

    /// Sort `run` in memory and write it to a temp file, leaving `run` empty.
    fn spill(&self, run: &mut Vec<Keyed>, index: usize) -> Result<TempPath> {
        run.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        let temp = self.config.temp_file("relop-run-")?;
        let mut writer = temp_writer(self.config, &temp)?;
        for keyed in run.drain(..) {
            writer.write_record(&keyed.record)?;
        }
        let rows = writer.finish()?;
        debug!("Spilled run {}: {} rows to {}", index, rows, temp.path().display());
        Ok(temp.into_temp_path())
    }

    fn merge_runs(&self, runs: &[TempPath], writer: &mut RecordWriter, strip: usize) -> Result<()> {
        let mut cursors = runs
            .iter()
            .map(|run| RecordCursor::open(run, self.config.encoding))
            .collect::<Result<Vec<_>>>()?;
        let mut heap = BinaryHeap::with_capacity(cursors.len());

        for (run, cursor) in cursors.iter_mut().enumerate() {
            if let Some(record) = cursor.next_record()? {
                heap.push(HeapItem {
                    key: self.comparator.key(&record)?,
                    run,
                    record,
                });
            }
        }

        while let Some(item) = heap.pop() {
            self.write_data_row(writer, &item.record, strip)?;
            if let Some(record) = cursors[item.run].next_record()? {
                heap.push(HeapItem {
                    key: self.comparator.key(&record)?,
                    run: item.run,
                    record,
                });
            }
        }
        Ok(())
    }

    fn write_data_row(&self, writer: &mut RecordWriter, record: &[String], strip: usize) -> Result<()> {
        writer.write_fields(record.iter().skip(strip).map(String::as_str))
    }
}

pub(crate) fn temp_writer(config: &EngineConfig, temp: &NamedTempFile) -> Result<RecordWriter> {
    let file = temp.as_file().try_clone().at(temp.path())?;
    Ok(RecordWriter::from_file(file, temp.path(), config.encoding))
}

/// Re-sort an intermediate relation whose data rows start with
/// `token_fields` order tokens, by those tokens, and write it to `output`
/// without them.
pub fn restore_input_order(
    config: &EngineConfig,
    intermediate: &Path,
    header_rows: usize,
    token_fields: usize,
    output: &Path,
) -> Result<SortOutcome> {
    let comparator = RecordComparator::new((0..token_fields).map(KeyField::Decimal).collect());
    ExternalSorter::new(config, comparator)
        .header_rows(header_rows)
        .strip_leading_fields(token_fields)
        .sort(intermediate, output)
}
