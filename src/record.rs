//! Records and the CSV line codec
//!
//! A record is one CSV line split into string fields. Relations are ragged:
//! records may carry fewer fields than the widest record, and every writer
//! path pads (never truncates) to a declared width.
//!
//! Dialect: comma delimiter, one record per line (`\n` or `\r\n`), quoted
//! fields (`"a,b"`, `""` as an escaped quote) accepted within a line. The
//! writer quotes only fields that need it, so unquoted input is written back
//! byte-for-byte.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, RelopError, Result};

pub type Record = Vec<String>;

/// Field `index` of `record`, or `""` past its end.
pub fn field(record: &[String], index: usize) -> &str {
    record.get(index).map(String::as_str).unwrap_or("")
}

/// Character encoding applied to every file an invocation reads or writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1: one byte per char, code points U+0000..=U+00FF
    Latin1,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
        }
    }

    /// `None` when the bytes are not valid in this encoding.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Encoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    pub fn encode_into(self, text: &str, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Encoding::Utf8 => out.extend_from_slice(text.as_bytes()),
            Encoding::Latin1 => {
                for ch in text.chars() {
                    let byte = u8::try_from(u32::from(ch)).map_err(|_| RelopError::Unencodable {
                        ch,
                        encoding: self.name(),
                    })?;
                    out.push(byte);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = RelopError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Ok(Encoding::Latin1),
            _ => Err(RelopError::InvalidArgument {
                name: "encoding",
                value: s.to_string(),
                reason: "expected utf-8 or latin1".to_string(),
            }),
        }
    }
}

/// Split one CSV line (without its terminator) into fields.
pub fn parse_line(line: &str) -> Record {
    if line.is_empty() {
        return Vec::new();
    }
    let bytes = line.as_bytes();
    if memchr::memchr(b'"', bytes).is_none() {
        let mut fields = Vec::with_capacity(memchr::memchr_iter(b',', bytes).count() + 1);
        let mut start = 0;
        for pos in memchr::memchr_iter(b',', bytes) {
            fields.push(line[start..pos].to_string());
            start = pos + 1;
        }
        fields.push(line[start..].to_string());
        return fields;
    }
    parse_quoted(line)
}

fn parse_quoted(line: &str) -> Record {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
            continue;
        }
        match ch {
            ',' => {
                fields.push(std::mem::take(&mut current));
                at_field_start = true;
                continue;
            }
            '"' if at_field_start => in_quotes = true,
            _ => current.push(ch),
        }
        at_field_start = false;
    }
    fields.push(current);
    fields
}

fn needs_quotes(field: &str) -> bool {
    let bytes = field.as_bytes();
    memchr::memchr3(b',', b'"', b'\n', bytes).is_some() || memchr::memchr(b'\r', bytes).is_some()
}

/// Append `fields` as one CSV line (without terminator) to `out`.
pub fn format_fields<'a, I>(fields: I, out: &mut String)
where
    I: IntoIterator<Item = &'a str>,
{
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if needs_quotes(field) {
            out.push('"');
            for ch in field.chars() {
                if ch == '"' {
                    out.push('"');
                }
                out.push(ch);
            }
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
}

/// `fields` followed by empty strings up to `width`.
pub fn padded(fields: &[String], width: usize) -> impl Iterator<Item = &str> {
    fields
        .iter()
        .map(String::as_str)
        .chain(std::iter::repeat("").take(width.saturating_sub(fields.len())))
}

/// Buffered CSV writer in the configured encoding.
pub struct RecordWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    encoding: Encoding,
    line: String,
    bytes: Vec<u8>,
    rows_written: u64,
}

impl RecordWriter {
    pub fn create(path: &Path, encoding: Encoding) -> Result<Self> {
        let file = File::create(path).at(path)?;
        Ok(Self::from_file(file, path, encoding))
    }

    /// Wrap an already-open file, e.g. the handle of a temp file.
    pub fn from_file(file: File, path: &Path, encoding: Encoding) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(1024 * 1024, file),
            encoding,
            line: String::new(),
            bytes: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn write_fields<'a, I>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.line.clear();
        format_fields(fields, &mut self.line);
        self.line.push('\n');
        self.bytes.clear();
        self.encoding.encode_into(&self.line, &mut self.bytes)?;
        self.writer.write_all(&self.bytes).at(&self.path)?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn write_record(&mut self, record: &[String]) -> Result<()> {
        self.write_fields(record.iter().map(String::as_str))
    }

    /// Write `record` widened with empty fields to `width`.
    pub fn write_padded(&mut self, record: &[String], width: usize) -> Result<()> {
        self.write_fields(padded(record, width))
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close; returns the number of rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush().at(&self.path)?;
        Ok(self.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: &[&str]) -> Record {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_plain_line() {
        assert_eq!(parse_line("a,b,c"), rec(&["a", "b", "c"]));
        assert_eq!(parse_line("a,,c,"), rec(&["a", "", "c", ""]));
        assert_eq!(parse_line(""), Record::new());
        assert_eq!(parse_line(","), rec(&["", ""]));
    }

    #[test]
    fn test_parse_quoted_fields() {
        assert_eq!(parse_line("\"a,b\",c"), rec(&["a,b", "c"]));
        assert_eq!(parse_line("\"say \"\"hi\"\"\",x"), rec(&["say \"hi\"", "x"]));
        assert_eq!(parse_line("\"\",z"), rec(&["", "z"]));
        // a quote that does not open a field is literal
        assert_eq!(parse_line("ab\"c,d"), rec(&["ab\"c", "d"]));
    }

    #[test]
    fn test_format_quotes_only_when_needed() {
        let mut out = String::new();
        format_fields(["plain", "with,comma", "q\"uote", ""], &mut out);
        assert_eq!(out, "plain,\"with,comma\",\"q\"\"uote\",");
        assert_eq!(parse_line(&out), rec(&["plain", "with,comma", "q\"uote", ""]));
    }

    #[test]
    fn test_padded_never_truncates() {
        let r = rec(&["a", "b", "c"]);
        assert_eq!(padded(&r, 5).collect::<Vec<_>>(), vec!["a", "b", "c", "", ""]);
        assert_eq!(padded(&r, 2).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_field_past_end_is_empty() {
        let r = rec(&["a"]);
        assert_eq!(field(&r, 0), "a");
        assert_eq!(field(&r, 3), "");
    }

    #[test]
    fn test_latin1_round_trip_and_rejects_wide_chars() {
        let mut out = Vec::new();
        Encoding::Latin1.encode_into("café", &mut out).unwrap();
        assert_eq!(out, vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(Encoding::Latin1.decode(&out).unwrap(), "café");
        assert!(Encoding::Latin1.encode_into("€", &mut Vec::new()).is_err());
        assert!(Encoding::Utf8.decode(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_encoding_names_parse() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("iso-8859-1".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert!("ebcdic".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_writer_pads_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut writer = RecordWriter::create(&path, Encoding::Utf8).unwrap();
        writer.write_padded(&rec(&["a"]), 3).unwrap();
        writer.write_record(&rec(&["x", "y,z"])).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,,\nx,\"y,z\"\n");
    }
}
