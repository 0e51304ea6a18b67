//! Left outer equi-join
//!
//! Both sides are sorted by their key fields and merged forward. Right rows
//! sharing a key form a run; when the merge finds a run it marks the right
//! cursor at its first row, so any following left rows with the same key
//! rewind to the mark and replay the run instead of buffering it.
//!
//! Every left row appears at least once: once per matching right row, or
//! once with blank right columns. Right key columns are never written, and
//! right rows without a left match never appear.
//!
//! With order preservation both sides carry order tokens. Merged rows start
//! with the left and right token; the restore pass sorts by both and strips
//! them, giving left input order with matches in right input order.

use std::cmp::Ordering;
use std::path::Path;

use log::debug;

use crate::compare::{KeyField, SortKey};
use crate::config::EngineConfig;
use crate::cursor::RecordCursor;
use crate::error::Result;
use crate::key_pairs::KeyPairMap;
use crate::record::{field, padded, RecordWriter};

use super::external_sort::{restore_input_order, ExternalSorter};
use super::{
    merge_headers, merge_target, run_tracked, scan_relation, OperatorReport, Phase, PhaseTracker,
    RelationInput,
};

#[derive(Debug, Clone)]
pub struct LeftOuterJoin {
    pub left: RelationInput,
    pub right: RelationInput,
    keys: KeyPairMap,
    pub keep_order: bool,
}

/// Output layout shared by every emitted row.
struct JoinLayout<'k> {
    keys: &'k KeyPairMap,
    left_max: usize,
    right_max: usize,
}

impl JoinLayout<'_> {
    fn emit(&self, writer: &mut RecordWriter, left: &[String], right: Option<&[String]>) -> Result<()> {
        let mut fields = Vec::new();
        if self.keys.token_fields() > 0 {
            fields.push(field(left, 0));
            fields.push(right.map_or("", |r| field(r, 0)));
        }
        self.keys.write_left_record(left, self.left_max, &mut fields);
        match right {
            Some(r) => self.keys.write_right_record(r, self.right_max, &mut fields),
            None => self.keys.write_blank_right(self.right_max, &mut fields),
        }
        writer.write_fields(fields)
    }
}

impl LeftOuterJoin {
    /// Parses `key_spec` right away so a bad specification fails before any
    /// file is touched.
    pub fn new(left: RelationInput, right: RelationInput, key_spec: &str, keep_order: bool) -> Result<Self> {
        Ok(Self {
            left,
            right,
            keys: KeyPairMap::parse(key_spec, keep_order)?,
            keep_order,
        })
    }

    pub fn keys(&self) -> &KeyPairMap {
        &self.keys
    }

    pub fn run(&self, config: &EngineConfig, output: &Path) -> Result<OperatorReport> {
        run_tracked("left-join", output, |phases| self.execute(config, output, phases))
    }

    fn execute(&self, config: &EngineConfig, output: &Path, phases: &mut PhaseTracker) -> Result<OperatorReport> {
        // widths are needed before sorting: pairs beyond the left width are
        // dropped and must not influence the sort order
        let left_scan = scan_relation(&self.left, config.encoding)?;
        let right_scan = scan_relation(&self.right, config.encoding)?;
        let mut keys = self.keys.clone();
        keys.restruct_by_max_field_count(left_scan.max_field_count, right_scan.max_field_count)?;

        let mut left_order = keys.left_comparator();
        let mut right_order = keys.right_comparator();
        if self.keep_order {
            left_order = left_order.then(KeyField::Decimal(0));
            right_order = right_order.then(KeyField::Decimal(0));
        }
        let (left_sorted, left_outcome) = ExternalSorter::new(config, left_order)
            .header_rows(self.left.header_rows)
            .inject_order_token(self.keep_order)
            .sort_to_temp(&self.left.path, "relop-join-left-")?;
        let (right_sorted, right_outcome) = ExternalSorter::new(config, right_order)
            .header_rows(self.right.header_rows)
            .inject_order_token(self.keep_order)
            .sort_to_temp(&self.right.path, "relop-join-right-")?;

        let layout = JoinLayout {
            keys: &keys,
            left_max: left_outcome.max_field_count,
            right_max: right_outcome.max_field_count,
        };
        let (intermediate, mut writer) = merge_target(config, self.keep_order, output, "relop-join-merged-")?;
        let mut left = RecordCursor::open(left_sorted.path(), config.encoding)?;
        let mut right = RecordCursor::open(right_sorted.path(), config.encoding)?;

        phases.enter(Phase::HeaderMerge);
        let header_rows = merge_headers(
            &mut left,
            left_outcome.header_rows,
            &mut right,
            right_outcome.header_rows,
            &mut writer,
            |l, r, out| {
                out.extend(padded(l, layout.left_max));
                keys.write_right_header(r, layout.right_max, out);
            },
        )?;

        phases.enter(Phase::DataMerge);
        let left_key = keys.left_comparator();
        let right_key = keys.right_comparator();
        // key of the right run the cursor mark points at
        let mut marked_run: Option<SortKey> = None;
        let mut data_rows = 0u64;
        let mut matched_left = 0u64;

        while let Some(row) = left.next_record()? {
            let key = left_key.key(&row)?;

            let matched = if marked_run.as_ref() == Some(&key) {
                right.seek_to_marked_read_position()?;
                true
            } else {
                marked_run = None;
                loop {
                    let ordering = match right.peek()? {
                        Some(candidate) => right_key.key(candidate)?.cmp(&key),
                        None => break false,
                    };
                    match ordering {
                        Ordering::Less => {
                            right.next_record()?;
                        }
                        Ordering::Equal => {
                            right.mark_next_read_position();
                            marked_run = Some(key.clone());
                            break true;
                        }
                        Ordering::Greater => break false,
                    }
                }
            };

            if !matched {
                layout.emit(&mut writer, &row, None)?;
                data_rows += 1;
                continue;
            }

            matched_left += 1;
            loop {
                let in_run = match right.peek()? {
                    Some(candidate) => right_key.key(candidate)? == key,
                    None => false,
                };
                if !in_run {
                    break;
                }
                let Some(match_row) = right.next_record()? else {
                    break;
                };
                layout.emit(&mut writer, &row, Some(&match_row))?;
                data_rows += 1;
            }
        }
        writer.finish()?;
        drop(left);
        drop(right);

        let mut report = OperatorReport {
            left_rows: left_outcome.sorted_rows,
            right_rows: right_outcome.sorted_rows,
            header_rows,
            data_rows,
            output_width: layout.left_max + keys.right_width_excluding_keys(layout.right_max),
            sorts: vec![left_outcome, right_outcome],
            ..Default::default()
        };
        debug!(
            "left-join: {} of {} left rows matched",
            matched_left,
            report.left_rows
        );

        if let Some(intermediate) = intermediate {
            phases.enter(Phase::Restore);
            let restored = restore_input_order(
                config,
                intermediate.path(),
                header_rows as usize,
                2 * keys.token_fields(),
                output,
            )?;
            report.sorts.push(restored);
            report.order_restored = true;
        }
        Ok(report)
    }
}
