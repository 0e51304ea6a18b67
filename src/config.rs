//! Engine configuration
//!
//! One `EngineConfig` is shared by every sorter and operator of an
//! invocation. Values come from defaults, then environment variables, then
//! whatever the caller (usually the CLI) overrides explicitly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RelopError, Result};
use crate::record::Encoding;

/// Rows held in memory per sorted run before spilling.
pub const DEFAULT_RUN_SIZE: usize = 100_000;
/// Runs merged at once; more runs trigger intermediate merge passes.
pub const DEFAULT_MERGE_FAN_IN: usize = 64;

pub const ENV_TEMP_DIR: &str = "RELOP_TEMP_DIR";
pub const ENV_RUN_SIZE: &str = "RELOP_RUN_SIZE";
pub const ENV_MERGE_FAN_IN: &str = "RELOP_MERGE_FAN_IN";
pub const ENV_ENCODING: &str = "RELOP_ENCODING";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for spilled runs and intermediate files; system temp dir if unset
    pub temp_dir: Option<PathBuf>,
    pub run_size: usize,
    pub merge_fan_in: usize,
    pub encoding: Encoding,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            run_size: DEFAULT_RUN_SIZE,
            merge_fan_in: DEFAULT_MERGE_FAN_IN,
            encoding: Encoding::Utf8,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `RELOP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(ENV_TEMP_DIR) {
            if !dir.is_empty() {
                config.temp_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(value) = std::env::var(ENV_RUN_SIZE) {
            config.run_size = parse_positive(ENV_RUN_SIZE, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_MERGE_FAN_IN) {
            config.merge_fan_in = parse_positive(ENV_MERGE_FAN_IN, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_ENCODING) {
            config.encoding = value.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_run_size(mut self, run_size: usize) -> Self {
        self.run_size = run_size;
        self
    }

    pub fn with_merge_fan_in(mut self, fan_in: usize) -> Self {
        self.merge_fan_in = fan_in;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_size == 0 {
            return Err(RelopError::InvalidArgument {
                name: "run size",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.merge_fan_in < 2 {
            return Err(RelopError::InvalidArgument {
                name: "merge fan-in",
                value: self.merge_fan_in.to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        Ok(())
    }

    /// Named temp file in the configured directory, removed when dropped.
    pub(crate) fn temp_file(&self, prefix: &str) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".csv");
        match &self.temp_dir {
            Some(dir) => builder
                .tempfile_in(dir)
                .map_err(|e| RelopError::io(dir.clone(), e)),
            None => builder
                .tempfile()
                .map_err(|e| RelopError::io(std::env::temp_dir(), e)),
        }
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| RelopError::InvalidArgument {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Header ("skip") row count from a decimal string. Empty means 0 and
/// negative values clamp to 0.
pub fn parse_skip_rows(value: &str) -> Result<usize> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let parsed = trimmed
        .parse::<i64>()
        .map_err(|e| RelopError::InvalidArgument {
            name: "skip rows",
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    Ok(usize::try_from(parsed.max(0)).unwrap_or(usize::MAX))
}

/// Keep-order flag: `true` in any letter case, everything else is false.
pub fn parse_keep_order(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_rows_defaults_and_clamps() {
        assert_eq!(parse_skip_rows("").unwrap(), 0);
        assert_eq!(parse_skip_rows("3").unwrap(), 3);
        assert_eq!(parse_skip_rows(" 2 ").unwrap(), 2);
        assert_eq!(parse_skip_rows("-5").unwrap(), 0);
        assert!(parse_skip_rows("two").is_err());
    }

    #[test]
    fn test_keep_order_flag() {
        assert!(parse_keep_order("true"));
        assert!(parse_keep_order("TRUE"));
        assert!(!parse_keep_order("false"));
        assert!(!parse_keep_order("yes"));
        assert!(!parse_keep_order(""));
    }

    #[test]
    fn test_validate_rejects_degenerate_sizes() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::default().with_run_size(0).validate().is_err());
        assert!(EngineConfig::default().with_merge_fan_in(1).validate().is_err());
    }

    #[test]
    fn test_temp_file_lands_in_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default().with_temp_dir(dir.path());
        let file = config.temp_file("relop-test-").unwrap();
        assert!(file.path().starts_with(dir.path()));
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }
}
