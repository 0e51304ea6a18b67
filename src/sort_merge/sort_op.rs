//! Standalone sort of one relation by a typed key specification.

use std::path::Path;

use crate::compare::RecordComparator;
use crate::config::EngineConfig;
use crate::error::Result;

use super::external_sort::ExternalSorter;
use super::{run_tracked, OperatorReport, Phase, PhaseTracker, RelationInput};

#[derive(Debug, Clone)]
pub struct SortOperator {
    pub input: RelationInput,
    comparator: RecordComparator,
}

impl SortOperator {
    /// `sort_spec` is `"idx:type,..."` (1-based, `string` or `decimal`).
    pub fn new(input: RelationInput, sort_spec: &str) -> Result<Self> {
        Ok(Self::with_comparator(input, RecordComparator::parse_typed(sort_spec)?))
    }

    pub fn with_comparator(input: RelationInput, comparator: RecordComparator) -> Self {
        Self { input, comparator }
    }

    pub fn run(&self, config: &EngineConfig, output: &Path) -> Result<OperatorReport> {
        run_tracked("sort", output, |phases| self.execute(config, output, phases))
    }

    fn execute(&self, config: &EngineConfig, output: &Path, phases: &mut PhaseTracker) -> Result<OperatorReport> {
        // the sorter copies the header zone and merges data in one call
        phases.enter(Phase::DataMerge);
        let outcome = ExternalSorter::new(config, self.comparator.clone())
            .header_rows(self.input.header_rows)
            .sort(&self.input.path, output)?;
        Ok(OperatorReport {
            left_rows: outcome.sorted_rows,
            header_rows: outcome.header_rows,
            data_rows: outcome.sorted_rows,
            output_width: outcome.max_field_count,
            sorts: vec![outcome],
            ..Default::default()
        })
    }
}
