//! Set difference `L - R` over whole rows
//!
//! Both sides are sorted by the full row. The merge emits each left row
//! that has no equal right row, once per group of equal left rows. Rows are
//! equal when they match field by field after padding with empty strings.
//!
//! With order preservation the left side carries an order token, which also
//! breaks ties so the earliest duplicate is the one emitted; the emitted rows
//! are then re-sorted by token and the token stripped.
//!
//! Output rows carry only left columns, so only the left header rows are
//! written; the right header rows are skipped.

use std::cmp::Ordering;
use std::path::Path;

use crate::compare::{KeyField, RecordComparator, SortKey};
use crate::config::EngineConfig;
use crate::cursor::RecordCursor;
use crate::error::Result;

use super::external_sort::{restore_input_order, ExternalSorter};
use super::{merge_target, run_tracked, OperatorReport, Phase, PhaseTracker, RelationInput};

#[derive(Debug, Clone)]
pub struct Difference {
    pub left: RelationInput,
    pub right: RelationInput,
    pub keep_order: bool,
}

fn peek_key(cursor: &mut RecordCursor, comparator: &RecordComparator) -> Result<Option<SortKey>> {
    match cursor.peek()? {
        Some(record) => Ok(Some(comparator.key(record)?)),
        None => Ok(None),
    }
}

impl Difference {
    pub fn new(left: RelationInput, right: RelationInput, keep_order: bool) -> Self {
        Self {
            left,
            right,
            keep_order,
        }
    }

    pub fn run(&self, config: &EngineConfig, output: &Path) -> Result<OperatorReport> {
        run_tracked("difference", output, |phases| self.execute(config, output, phases))
    }

    fn execute(&self, config: &EngineConfig, output: &Path, phases: &mut PhaseTracker) -> Result<OperatorReport> {
        let token_fields = usize::from(self.keep_order);

        let mut left_order = RecordComparator::lexicographic_from(token_fields);
        if self.keep_order {
            left_order = left_order.then(KeyField::Decimal(0));
        }
        let (left_sorted, left_outcome) = ExternalSorter::new(config, left_order)
            .header_rows(self.left.header_rows)
            .inject_order_token(self.keep_order)
            .sort_to_temp(&self.left.path, "relop-diff-left-")?;
        let (right_sorted, right_outcome) = ExternalSorter::new(config, RecordComparator::lexicographic())
            .header_rows(self.right.header_rows)
            .sort_to_temp(&self.right.path, "relop-diff-right-")?;

        let width = left_outcome.max_field_count;
        let (intermediate, mut writer) = merge_target(config, self.keep_order, output, "relop-diff-merged-")?;
        let mut left = RecordCursor::open(left_sorted.path(), config.encoding)?;
        let mut right = RecordCursor::open(right_sorted.path(), config.encoding)?;

        phases.enter(Phase::HeaderMerge);
        for _ in 0..left_outcome.header_rows {
            if let Some(header) = left.next_record()? {
                writer.write_record(&header)?;
            }
        }
        right.skip_records(right_outcome.header_rows as usize)?;

        phases.enter(Phase::DataMerge);
        let left_key = RecordComparator::lexicographic_from(token_fields);
        let right_key = RecordComparator::lexicographic();
        let mut current_right = peek_key(&mut right, &right_key)?;
        let mut data_rows = 0u64;

        while let Some(row) = left.next_record()? {
            let key = left_key.key(&row)?;

            let mut cancelled = false;
            while let Some(rk) = current_right.as_ref() {
                match rk.cmp(&key) {
                    Ordering::Less => {
                        right.next_record()?;
                        current_right = peek_key(&mut right, &right_key)?;
                    }
                    Ordering::Equal => {
                        cancelled = true;
                        break;
                    }
                    Ordering::Greater => break,
                }
            }
            if !cancelled {
                writer.write_padded(&row, width + token_fields)?;
                data_rows += 1;
            }

            // collapse duplicates: skip the rest of this left group
            while peek_key(&mut left, &left_key)?.as_ref() == Some(&key) {
                left.next_record()?;
            }
        }
        writer.finish()?;
        drop(left);
        drop(right);

        let mut report = OperatorReport {
            left_rows: left_outcome.sorted_rows,
            right_rows: right_outcome.sorted_rows,
            header_rows: left_outcome.header_rows,
            data_rows,
            output_width: width,
            sorts: vec![left_outcome, right_outcome],
            ..Default::default()
        };

        if let Some(intermediate) = intermediate {
            phases.enter(Phase::Restore);
            let restored = restore_input_order(
                config,
                intermediate.path(),
                report.header_rows as usize,
                token_fields,
                output,
            )?;
            report.sorts.push(restored);
            report.order_restored = true;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_difference(left: &str, right: &str, left_header: usize, right_header: usize, keep_order: bool) -> (String, OperatorReport) {
        let dir = tempfile::tempdir().unwrap();
        let l = dir.path().join("l.csv");
        let r = dir.path().join("r.csv");
        std::fs::write(&l, left).unwrap();
        std::fs::write(&r, right).unwrap();
        let out = dir.path().join("out.csv");
        let config = EngineConfig::default().with_temp_dir(dir.path()).with_run_size(2);
        let report = Difference::new(RelationInput::new(&l, left_header), RelationInput::new(&r, right_header), keep_order)
            .run(&config, &out)
            .unwrap();
        (std::fs::read_to_string(&out).unwrap(), report)
    }

    #[test]
    fn test_whole_row_difference() {
        let (out, report) = run_difference("a,1\nb,2\n", "b,X\nc,Y\n", 0, 0, false);
        assert_eq!(out, "a,1\nb,2\n");
        assert_eq!(report.data_rows, 2);

        let (out, _) = run_difference("a,1\nb,2\n", "b,2\nc,Y\n", 0, 0, false);
        assert_eq!(out, "a,1\n");
    }

    #[test]
    fn test_duplicates_collapse_and_cancel() {
        let (out, _) = run_difference("b\na\nb\nc\nc\nc\n", "c\nd\n", 0, 0, false);
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn test_padding_makes_short_rows_equal() {
        let (out, _) = run_difference("a\nb,1\n", "a,,\n", 0, 0, false);
        assert_eq!(out, "b,1\n");
    }

    #[test]
    fn test_output_padded_to_left_width() {
        let (out, report) = run_difference("x\ny,1,2\n", "", 0, 0, false);
        assert_eq!(out, "x,,\ny,1,2\n");
        assert_eq!(report.output_width, 3);
    }

    #[test]
    fn test_headers_come_from_left_only() {
        let (out, report) = run_difference("id,v\nz,1\na,2\n", "ID\nHEADER\na,2\n", 1, 2, false);
        assert_eq!(out, "id,v\nz,1\n");
        assert_eq!(report.header_rows, 1);
    }

    #[test]
    fn test_keep_order_restores_first_occurrence_order() {
        let (out, report) = run_difference("h\nd\nb\na\nd\nc\nb\n", "H\nc\n", 1, 1, true);
        assert_eq!(out, "h\nd\nb\na\n");
        assert!(report.order_restored);
        assert_eq!(report.phase, Phase::Done);
        assert_eq!(report.sorts.len(), 3);
    }
}
