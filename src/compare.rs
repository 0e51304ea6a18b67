//! Record comparators
//!
//! A comparator is an ordered list of key fields. Keys are extracted from a
//! record once into an owned [`SortKey`], so decimal parsing (the only
//! fallible step) happens when the key is built and every later comparison
//! is a plain `Ord` comparison.

use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::error::{RelopError, Result};
use crate::record::field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyField {
    /// Every field from this index to the end, compared as strings; the
    /// shorter record is padded with empty strings.
    Tail(usize),
    /// One field compared as a string.
    Text(usize),
    /// One field compared as an arbitrary precision decimal. Empty sorts
    /// first.
    Decimal(usize),
}

impl KeyField {
    pub fn index(self) -> usize {
        match self {
            KeyField::Tail(i) | KeyField::Text(i) | KeyField::Decimal(i) => i,
        }
    }

    /// Same kind of key, `by` fields further right.
    pub fn shifted(self, by: usize) -> Self {
        match self {
            KeyField::Tail(i) => KeyField::Tail(i + by),
            KeyField::Text(i) => KeyField::Text(i + by),
            KeyField::Decimal(i) => KeyField::Decimal(i + by),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyValue {
    Empty,
    Text(String),
    Decimal(BigDecimal),
    /// Trailing empty fields are trimmed, which makes `Vec` ordering equal
    /// to padded comparison.
    Fields(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey(pub Vec<KeyValue>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordComparator {
    keys: Vec<KeyField>,
}

impl RecordComparator {
    pub fn new(keys: Vec<KeyField>) -> Self {
        Self { keys }
    }

    /// Compares everything as equal.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whole-record string comparison.
    pub fn lexicographic() -> Self {
        Self::lexicographic_from(0)
    }

    pub fn lexicographic_from(first: usize) -> Self {
        Self::new(vec![KeyField::Tail(first)])
    }

    pub fn lexicographic_field(index: usize) -> Self {
        Self::new(vec![KeyField::Text(index)])
    }

    /// Parse `"idx:type,idx:type"` with 1-based indices and
    /// `type` one of `string` or `decimal`. A bare index means `string`.
    pub fn parse_typed(spec: &str) -> Result<Self> {
        let mut keys = Vec::new();
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                if spec.trim().is_empty() {
                    break;
                }
                return Err(RelopError::SortSpec {
                    entry: entry.to_string(),
                    reason: "empty entry".to_string(),
                });
            }
            let (index, kind) = match entry.split_once(':') {
                Some((index, kind)) => (index.trim(), kind.trim()),
                None => (entry, "string"),
            };
            let position = index
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| RelopError::SortSpec {
                    entry: entry.to_string(),
                    reason: "field number must be a positive integer".to_string(),
                })?;
            let key = match kind.to_ascii_lowercase().as_str() {
                "string" | "str" | "text" => KeyField::Text(position - 1),
                "decimal" | "num" | "number" => KeyField::Decimal(position - 1),
                other => {
                    return Err(RelopError::SortSpec {
                        entry: entry.to_string(),
                        reason: format!("unknown type {:?}, expected string or decimal", other),
                    })
                }
            };
            keys.push(key);
        }
        Ok(Self::new(keys))
    }

    /// Append a lower-priority key.
    pub fn then(mut self, key: KeyField) -> Self {
        self.keys.push(key);
        self
    }

    pub fn keys(&self) -> &[KeyField] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, record: &[String]) -> Result<SortKey> {
        let mut values = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            values.push(match *key {
                KeyField::Tail(first) => {
                    let mut fields: Vec<String> =
                        record.iter().skip(first).cloned().collect();
                    while fields.last().is_some_and(|f| f.is_empty()) {
                        fields.pop();
                    }
                    KeyValue::Fields(fields)
                }
                KeyField::Text(i) => KeyValue::Text(field(record, i).to_string()),
                KeyField::Decimal(i) => decimal_value(i, field(record, i))?,
            });
        }
        Ok(SortKey(values))
    }

    pub fn compare(&self, a: &[String], b: &[String]) -> Result<Ordering> {
        Ok(self.key(a)?.cmp(&self.key(b)?))
    }
}

fn decimal_value(index: usize, raw: &str) -> Result<KeyValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(KeyValue::Empty);
    }
    BigDecimal::from_str(trimmed)
        .map(|d| KeyValue::Decimal(d.normalized()))
        .map_err(|_| RelopError::InvalidDecimal {
            field: index + 1,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lexicographic_pads_short_records() {
        let cmp = RecordComparator::lexicographic();
        assert_eq!(cmp.compare(&rec(&["a"]), &rec(&["a", ""])).unwrap(), Ordering::Equal);
        assert_eq!(cmp.compare(&rec(&["a"]), &rec(&["a", "b"])).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&rec(&["b"]), &rec(&["a", "z"])).unwrap(), Ordering::Greater);
        assert_eq!(cmp.compare(&rec(&[]), &rec(&["", ""])).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_lexicographic_from_ignores_leading_fields() {
        let cmp = RecordComparator::lexicographic_from(1);
        assert_eq!(cmp.compare(&rec(&["9", "x"]), &rec(&["1", "x"])).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_single_field_comparator() {
        let cmp = RecordComparator::lexicographic_field(1);
        assert_eq!(cmp.compare(&rec(&["z", "a"]), &rec(&["a", "b"])).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&rec(&["z"]), &rec(&["a", ""])).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_typed_decimal_orders_numerically() {
        let cmp = RecordComparator::parse_typed("1:decimal").unwrap();
        assert_eq!(cmp.compare(&rec(&["9"]), &rec(&["10"])).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&rec(&["1.50"]), &rec(&["1.5"])).unwrap(), Ordering::Equal);
        assert_eq!(cmp.compare(&rec(&["-2"]), &rec(&["1e1"])).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&rec(&[""]), &rec(&["-100"])).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_decimal_keys_beyond_machine_precision() {
        let cmp = RecordComparator::parse_typed("1:decimal").unwrap();
        assert_eq!(
            cmp.compare(&rec(&["100000000000000000000000000000"]), &rec(&["1"])).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            cmp.compare(&rec(&["1E+30"]), &rec(&["999999999999999999999999999999"])).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            cmp.compare(&rec(&["1e30"]), &rec(&["1000000000000000000000000000000.0"])).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            cmp.compare(
                &rec(&["0.10000000000000000000000000001"]),
                &rec(&["0.10000000000000000000000000002"])
            )
            .unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_typed_first_difference_wins() {
        let cmp = RecordComparator::parse_typed("2:string, 1:decimal").unwrap();
        assert_eq!(
            cmp.keys(),
            &[KeyField::Text(1), KeyField::Decimal(0)]
        );
        assert_eq!(cmp.compare(&rec(&["2", "a"]), &rec(&["1", "b"])).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&rec(&["2", "a"]), &rec(&["10", "a"])).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_empty_spec_is_always_equal() {
        let cmp = RecordComparator::parse_typed("").unwrap();
        assert!(cmp.is_empty());
        assert_eq!(cmp.compare(&rec(&["a"]), &rec(&["b"])).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_bad_specs_are_rejected() {
        assert!(RecordComparator::parse_typed("0:string").is_err());
        assert!(RecordComparator::parse_typed("x:string").is_err());
        assert!(RecordComparator::parse_typed("1:date").is_err());
        assert!(RecordComparator::parse_typed("1:string,").is_err());
    }

    #[test]
    fn test_unparseable_decimal_is_an_error() {
        let cmp = RecordComparator::parse_typed("1:decimal").unwrap();
        match cmp.key(&rec(&["abc"])) {
            Err(RelopError::InvalidDecimal { field, value }) => {
                assert_eq!(field, 1);
                assert_eq!(value, "abc");
            }
            other => panic!("expected InvalidDecimal, got {:?}", other),
        }
    }

    #[test]
    fn test_then_adds_tie_breaker() {
        let cmp = RecordComparator::lexicographic_from(1).then(KeyField::Decimal(0));
        assert_eq!(cmp.compare(&rec(&["2", "a"]), &rec(&["10", "a"])).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&rec(&["2", "b"]), &rec(&["10", "a"])).unwrap(), Ordering::Greater);
    }
}
