//! Error taxonomy for the operator engine
//!
//! Configuration errors are raised before any I/O starts where the input
//! allows it. I/O errors abort the running operator immediately. Temp-file
//! cleanup does not depend on which of these happened.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelopError>;

#[derive(Debug, Error)]
pub enum RelopError {
    /// Malformed key specification such as `"1=2,3=1"`.
    #[error("invalid key specification at position {position} ({token:?}): {reason}")]
    KeySpec {
        /// 1-based character position of the offending token
        position: usize,
        token: String,
        reason: String,
    },

    #[error("no valid key pairs remain{}", detail_suffix(.0))]
    NoKeyPairs(String),

    /// Malformed typed sort specification such as `"2:decimal,1:string"`.
    #[error("invalid sort specification entry {entry:?}: {reason}")]
    SortSpec { entry: String, reason: String },

    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidArgument {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("field {field} holds {value:?}, which is not a decimal number")]
    InvalidDecimal { field: usize, value: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: line {line} is not valid {encoding}", .path.display())]
    Encoding {
        path: PathBuf,
        line: u64,
        encoding: &'static str,
    },

    #[error("cannot encode {ch:?} as {encoding}")]
    Unencodable { ch: char, encoding: &'static str },

    #[error("{}: seek requested without a marked read position", .path.display())]
    NoMark { path: PathBuf },
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({})", detail)
    }
}

impl RelopError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RelopError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the caller's configuration rather than I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RelopError::KeySpec { .. }
                | RelopError::NoKeyPairs(_)
                | RelopError::SortSpec { .. }
                | RelopError::InvalidArgument { .. }
                | RelopError::InvalidDecimal { .. }
        )
    }
}

/// Attach a path to a bare `io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| RelopError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_spec_message_names_position() {
        let err = RelopError::KeySpec {
            position: 4,
            token: "x".to_string(),
            reason: "unexpected character".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("position 4"));
        assert!(msg.contains("\"x\""));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_no_key_pairs_detail() {
        assert_eq!(
            RelopError::NoKeyPairs(String::new()).to_string(),
            "no valid key pairs remain"
        );
        assert_eq!(
            RelopError::NoKeyPairs("left width 2".into()).to_string(),
            "no valid key pairs remain (left width 2)"
        );
    }

    #[test]
    fn test_io_is_not_configuration() {
        let err = RelopError::io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("/nope"));
    }
}
