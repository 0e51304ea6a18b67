//! Join key specification: `"L=R,L=R,..."`
//!
//! Field numbers are 1-based in the specification and 0-based in the map.
//! When order-preservation tokens are injected every record gains a leading
//! token field, so the map shifts its indices by that many fields and the
//! projection helpers drop them again.

use std::collections::BTreeMap;

use log::warn;

use crate::compare::{KeyField, RecordComparator};
use crate::error::{RelopError, Result};
use crate::record::field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    FieldNumber,
    Equal,
    Comma,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    /// 1-based character position of the first character
    position: usize,
}

fn tokenize(spec: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut chars = spec.char_indices().enumerate().peekable();

    while let Some((char_pos, (byte_pos, ch))) = chars.next() {
        let position = char_pos + 1;
        let kind = match ch {
            ' ' => continue,
            '=' => TokenKind::Equal,
            ',' => TokenKind::Comma,
            '0'..='9' | '-' | '+' => {
                let mut end = byte_pos + ch.len_utf8();
                while let Some(&(_, (next_byte, next))) = chars.peek() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                    end = next_byte + next.len_utf8();
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::FieldNumber,
                    text: &spec[byte_pos..end],
                    position,
                });
                continue;
            }
            _ => {
                return Err(RelopError::KeySpec {
                    position,
                    token: ch.to_string(),
                    reason: "unexpected character".to_string(),
                })
            }
        };
        tokens.push(Token {
            kind,
            text: &spec[byte_pos..byte_pos + ch.len_utf8()],
            position,
        });
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair {
    /// 0-based left field index, token-shifted
    pub left: usize,
    /// 0-based right field index, token-shifted
    pub right: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairMap {
    pairs: Vec<KeyPair>,
    by_left: BTreeMap<usize, usize>,
    by_right: BTreeMap<usize, usize>,
    token_fields: usize,
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    end_position: usize,
    max_field: i64,
}

impl<'a> Parser<'a> {
    fn next(&mut self, expected: TokenKind, what: &str) -> Result<Token<'a>> {
        match self.tokens.get(self.pos) {
            Some(token) if token.kind == expected => {
                self.pos += 1;
                Ok(*token)
            }
            Some(token) => Err(RelopError::KeySpec {
                position: token.position,
                token: token.text.to_string(),
                reason: format!("expected {}", what),
            }),
            None => Err(RelopError::KeySpec {
                position: self.end_position,
                token: String::new(),
                reason: format!("unexpected end of specification, expected {}", what),
            }),
        }
    }

    fn field_number(&mut self) -> Result<(usize, Token<'a>)> {
        let token = self.next(TokenKind::FieldNumber, "a field number")?;
        let invalid = |reason: String| RelopError::KeySpec {
            position: token.position,
            token: token.text.to_string(),
            reason,
        };
        let value = match token.text.parse::<i64>() {
            Ok(v) => v,
            Err(_) if token.text.trim_start_matches(['+', '-']).is_empty() => {
                return Err(invalid("field number has no digits".to_string()))
            }
            Err(_) if token.text.starts_with('-') => {
                return Err(invalid("field number must be positive".to_string()))
            }
            Err(_) => {
                return Err(invalid(format!(
                    "field number exceeds the maximum {}",
                    self.max_field
                )))
            }
        };
        if value <= 0 {
            return Err(invalid("field number must be positive".to_string()));
        }
        if value > self.max_field {
            return Err(invalid(format!(
                "field number exceeds the maximum {}",
                self.max_field
            )));
        }
        Ok(((value - 1) as usize, token))
    }
}

impl KeyPairMap {
    /// Parse a key specification. With `preserve_order` the indices are
    /// shifted past one injected token field on each side.
    pub fn parse(spec: &str, preserve_order: bool) -> Result<Self> {
        let tokens = tokenize(spec)?;
        if tokens.is_empty() {
            return Err(RelopError::NoKeyPairs("key specification is empty".to_string()));
        }
        let max_field = if preserve_order {
            i64::from(i32::MAX) - 1
        } else {
            i64::from(i32::MAX)
        };
        let mut parser = Parser {
            tokens,
            pos: 0,
            end_position: spec.chars().count() + 1,
            max_field,
        };

        let mut raw = Vec::new();
        loop {
            let left = parser.field_number()?;
            parser.next(TokenKind::Equal, "'='")?;
            let right = parser.field_number()?;
            raw.push((left, right));
            if parser.pos == parser.tokens.len() {
                break;
            }
            parser.next(TokenKind::Comma, "','")?;
        }

        for (i, ((left, token), _)) in raw.iter().enumerate() {
            if raw[..i].iter().any(|((other, _), _)| other == left) {
                return Err(RelopError::KeySpec {
                    position: token.position,
                    token: token.text.to_string(),
                    reason: "left field number is used more than once".to_string(),
                });
            }
        }
        for (i, (_, (right, token))) in raw.iter().enumerate() {
            if raw[..i].iter().any(|(_, (other, _))| other == right) {
                return Err(RelopError::KeySpec {
                    position: token.position,
                    token: token.text.to_string(),
                    reason: "right field number is used more than once".to_string(),
                });
            }
        }

        let token_fields = usize::from(preserve_order);
        let pairs = raw
            .into_iter()
            .map(|((left, _), (right, _))| KeyPair {
                left: left + token_fields,
                right: right + token_fields,
            })
            .collect();
        Ok(Self::from_pairs(pairs, token_fields))
    }

    fn from_pairs(pairs: Vec<KeyPair>, token_fields: usize) -> Self {
        let by_left = pairs.iter().enumerate().map(|(i, p)| (p.left, i)).collect();
        let by_right = pairs.iter().enumerate().map(|(i, p)| (p.right, i)).collect();
        Self {
            pairs,
            by_left,
            by_right,
            token_fields,
        }
    }

    pub fn pairs(&self) -> &[KeyPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Leading token fields each side carries (0 or 1).
    pub fn token_fields(&self) -> usize {
        self.token_fields
    }

    pub fn left_pair(&self, left: usize) -> Option<&KeyPair> {
        self.by_left.get(&left).map(|&i| &self.pairs[i])
    }

    pub fn right_pair(&self, right: usize) -> Option<&KeyPair> {
        self.by_right.get(&right).map(|&i| &self.pairs[i])
    }

    /// Drop pairs whose left field lies beyond the left relation's observed
    /// width (`left_max` counts source fields, without tokens). Fails if no
    /// pair survives.
    pub fn restruct_by_max_field_count(&mut self, left_max: usize, right_max: usize) -> Result<()> {
        let limit = left_max + self.token_fields;
        let (kept, dropped): (Vec<KeyPair>, Vec<KeyPair>) =
            self.pairs.iter().copied().partition(|p| p.left < limit);
        for pair in &dropped {
            warn!(
                "Dropping key pair {}={}: left relation has only {} fields",
                pair.left + 1 - self.token_fields,
                pair.right + 1 - self.token_fields,
                left_max
            );
        }
        if kept.is_empty() {
            return Err(RelopError::NoKeyPairs(format!(
                "left relation width {}, right relation width {}",
                left_max, right_max
            )));
        }
        *self = Self::from_pairs(kept, self.token_fields);
        Ok(())
    }

    /// Right output width once key columns inside `right_max` are suppressed.
    pub fn right_width_excluding_keys(&self, right_max: usize) -> usize {
        let suppressed = self
            .pairs
            .iter()
            .filter(|p| p.right - self.token_fields < right_max)
            .count();
        right_max - suppressed
    }

    /// Left data fields (tokens dropped), padded to `left_max`.
    pub fn write_left_record<'a>(&self, record: &'a [String], left_max: usize, out: &mut Vec<&'a str>) {
        for i in 0..left_max.max(record.len().saturating_sub(self.token_fields)) {
            out.push(field(record, i + self.token_fields));
        }
    }

    /// Right data fields without tokens and key columns, padded to the
    /// suppressed width of `right_max`.
    pub fn write_right_record<'a>(&self, record: &'a [String], right_max: usize, out: &mut Vec<&'a str>) {
        self.project_right(record, self.token_fields, right_max, out);
    }

    /// Header rows never carry tokens; key columns are suppressed the same
    /// way as in data rows so the columns line up.
    pub fn write_right_header<'a>(&self, record: &'a [String], right_max: usize, out: &mut Vec<&'a str>) {
        self.project_right(record, 0, right_max, out);
    }

    fn project_right<'a>(&self, record: &'a [String], skip: usize, right_max: usize, out: &mut Vec<&'a str>) {
        let width = right_max.max(record.len().saturating_sub(skip));
        for i in 0..width {
            if self.by_right.contains_key(&(i + self.token_fields)) {
                continue;
            }
            out.push(field(record, i + skip));
        }
    }

    /// Blank right side for an unmatched left row.
    pub fn write_blank_right(&self, right_max: usize, out: &mut Vec<&str>) {
        out.extend(std::iter::repeat("").take(self.right_width_excluding_keys(right_max)));
    }

    /// String comparator over the left key fields, in pair order.
    pub fn left_comparator(&self) -> RecordComparator {
        RecordComparator::new(self.pairs.iter().map(|p| KeyField::Text(p.left)).collect())
    }

    pub fn right_comparator(&self) -> RecordComparator {
        RecordComparator::new(self.pairs.iter().map(|p| KeyField::Text(p.right)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    fn key_spec_error(spec: &str, preserve: bool) -> (usize, String, String) {
        match KeyPairMap::parse(spec, preserve) {
            Err(RelopError::KeySpec { position, token, reason }) => (position, token, reason),
            other => panic!("expected KeySpec error for {:?}, got {:?}", spec, other),
        }
    }

    #[test]
    fn test_parse_pairs_zero_based() {
        let map = KeyPairMap::parse("1=2, 3 = 1", false).unwrap();
        assert_eq!(
            map.pairs(),
            &[KeyPair { left: 0, right: 1 }, KeyPair { left: 2, right: 0 }]
        );
        assert_eq!(map.left_pair(2), Some(&KeyPair { left: 2, right: 0 }));
        assert_eq!(map.right_pair(1), Some(&KeyPair { left: 0, right: 1 }));
        assert!(map.left_pair(1).is_none());
    }

    #[test]
    fn test_parse_shifts_for_order_tokens() {
        let map = KeyPairMap::parse("1=1", true).unwrap();
        assert_eq!(map.pairs(), &[KeyPair { left: 1, right: 1 }]);
        assert_eq!(map.token_fields(), 1);
    }

    #[test]
    fn test_syntax_errors_name_position() {
        assert_eq!(key_spec_error("1=2;", false).0, 4);
        assert_eq!(key_spec_error("1=2,", false).0, 5);
        let (position, token, _) = key_spec_error("1,2", false);
        assert_eq!((position, token.as_str()), (2, ","));
        let (position, _, reason) = key_spec_error("=2", false);
        assert_eq!(position, 1);
        assert!(reason.contains("field number"));
    }

    #[test]
    fn test_number_range_checks() {
        let (position, _, reason) = key_spec_error("0=1", false);
        assert_eq!(position, 1);
        assert!(reason.contains("positive"));
        assert!(key_spec_error("1=-3", false).2.contains("positive"));
        assert!(KeyPairMap::parse("2147483647=1", false).is_ok());
        assert!(key_spec_error("2147483647=1", true).2.contains("maximum"));
        assert!(key_spec_error("99999999999999999999=1", false).2.contains("maximum"));
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let (position, token, reason) = key_spec_error("1=1,1=2", false);
        assert_eq!((position, token.as_str()), (5, "1"));
        assert!(reason.contains("left"));
        let (position, _, reason) = key_spec_error("1=1,2=1", false);
        assert_eq!(position, 7);
        assert!(reason.contains("right"));
    }

    #[test]
    fn test_empty_spec_is_error() {
        assert!(matches!(KeyPairMap::parse("", false), Err(RelopError::NoKeyPairs(_))));
        assert!(matches!(KeyPairMap::parse("   ", false), Err(RelopError::NoKeyPairs(_))));
    }

    #[test]
    fn test_restruct_drops_out_of_range_pairs() {
        let mut map = KeyPairMap::parse("1=1,5=2", false).unwrap();
        map.restruct_by_max_field_count(3, 3).unwrap();
        assert_eq!(map.pairs(), &[KeyPair { left: 0, right: 0 }]);
        assert!(map.right_pair(1).is_none());

        let mut map = KeyPairMap::parse("4=1", true).unwrap();
        assert!(matches!(
            map.restruct_by_max_field_count(2, 2),
            Err(RelopError::NoKeyPairs(_))
        ));
    }

    #[test]
    fn test_projection_suppresses_right_keys() {
        let map = KeyPairMap::parse("1=1", false).unwrap();
        assert_eq!(map.right_width_excluding_keys(2), 1);

        let left = rec(&["b"]);
        let right = rec(&["b", "X"]);
        let mut out = Vec::new();
        map.write_left_record(&left, 2, &mut out);
        map.write_right_record(&right, 2, &mut out);
        assert_eq!(out, vec!["b", "", "X"]);

        let unmatched = rec(&["a", "1"]);
        let mut blank = Vec::new();
        map.write_left_record(&unmatched, 2, &mut blank);
        map.write_blank_right(2, &mut blank);
        assert_eq!(blank, vec!["a", "1", ""]);
    }

    #[test]
    fn test_projection_drops_tokens() {
        let map = KeyPairMap::parse("2=1", true).unwrap();
        let left = rec(&["7", "x", "k"]);
        let right = rec(&["3", "k", "r1", "r2"]);
        let mut out = Vec::new();
        map.write_left_record(&left, 2, &mut out);
        map.write_right_record(&right, 3, &mut out);
        assert_eq!(out, vec!["x", "k", "r1", "r2"]);
        assert_eq!(map.right_width_excluding_keys(3), 2);
    }

    #[test]
    fn test_key_beyond_right_width_not_suppressed() {
        let map = KeyPairMap::parse("1=5", false).unwrap();
        assert_eq!(map.right_width_excluding_keys(2), 2);
    }

    #[test]
    fn test_comparators_follow_pair_order() {
        let map = KeyPairMap::parse("3=1,1=2", false).unwrap();
        assert_eq!(map.left_comparator().keys(), &[KeyField::Text(2), KeyField::Text(0)]);
        assert_eq!(map.right_comparator().keys(), &[KeyField::Text(0), KeyField::Text(1)]);
    }
}
