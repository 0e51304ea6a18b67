//! Cartesian product `L x R`
//!
//! No keys and no sorting. Both inputs are scanned once for their widths,
//! then the right cursor is marked at the start of its data zone and
//! rewound to that mark for every left data row.

use std::path::Path;

use crate::config::EngineConfig;
use crate::cursor::RecordCursor;
use crate::error::Result;
use crate::record::{padded, RecordWriter};

use super::{merge_headers, run_tracked, scan_relation, OperatorReport, Phase, PhaseTracker, RelationInput};

#[derive(Debug, Clone)]
pub struct CartesianProduct {
    pub left: RelationInput,
    pub right: RelationInput,
}

impl CartesianProduct {
    pub fn new(left: RelationInput, right: RelationInput) -> Self {
        Self { left, right }
    }

    pub fn run(&self, config: &EngineConfig, output: &Path) -> Result<OperatorReport> {
        run_tracked("product", output, |phases| self.execute(config, output, phases))
    }

    fn execute(&self, config: &EngineConfig, output: &Path, phases: &mut PhaseTracker) -> Result<OperatorReport> {
        let left_scan = scan_relation(&self.left, config.encoding)?;
        let right_scan = scan_relation(&self.right, config.encoding)?;
        let left_max = left_scan.max_field_count;
        let right_max = right_scan.max_field_count;

        let mut left = RecordCursor::open(&self.left.path, config.encoding)?;
        let mut right = RecordCursor::open(&self.right.path, config.encoding)?;
        let mut writer = RecordWriter::create(output, config.encoding)?;

        phases.enter(Phase::HeaderMerge);
        let header_rows = merge_headers(
            &mut left,
            left_scan.header_rows,
            &mut right,
            right_scan.header_rows,
            &mut writer,
            |l, r, out| {
                out.extend(padded(l, left_max));
                out.extend(padded(r, right_max));
            },
        )?;

        phases.enter(Phase::DataMerge);
        right.mark_next_read_position();
        let mut data_rows = 0u64;
        if right_scan.data_rows > 0 {
            while let Some(l) = left.next_record()? {
                right.seek_to_marked_read_position()?;
                while let Some(r) = right.next_record()? {
                    writer.write_fields(padded(&l, left_max).chain(padded(&r, right_max)))?;
                    data_rows += 1;
                }
            }
        }
        writer.finish()?;

        Ok(OperatorReport {
            left_rows: left_scan.data_rows,
            right_rows: right_scan.data_rows,
            header_rows,
            data_rows,
            output_width: left_max + right_max,
            ..Default::default()
        })
    }
}
