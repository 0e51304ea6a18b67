//! Forward-only CSV cursor with a single replay checkpoint
//!
//! The cursor reads one record ahead so callers can test `has_next` and
//! `peek` without consuming. `mark_next_read_position` remembers the byte
//! offset of the next unread record; `seek_to_marked_read_position` rewinds
//! the file to it, making that record and everything after it readable
//! again. Only one mark exists; marking again replaces it. Memory stays at
//! one record plus the read buffer regardless of how often a range is
//! replayed.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{IoContext, RelopError, Result};
use crate::record::{parse_line, Encoding, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    offset: u64,
    line: u64,
}

#[derive(Debug)]
struct Pending {
    start: Checkpoint,
    record: Record,
}

pub struct RecordCursor {
    path: PathBuf,
    reader: BufReader<File>,
    encoding: Encoding,
    /// Position just past the last line pulled from the reader
    position: Checkpoint,
    pending: Option<Pending>,
    mark: Option<Checkpoint>,
    exhausted: bool,
    rows_read: u64,
    buf: Vec<u8>,
}

impl RecordCursor {
    pub fn open(path: &Path, encoding: Encoding) -> Result<Self> {
        let file = File::open(path).at(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::with_capacity(256 * 1024, file),
            encoding,
            position: Checkpoint { offset: 0, line: 0 },
            pending: None,
            mark: None,
            exhausted: false,
            rows_read: 0,
            buf: Vec::new(),
        })
    }

    fn fill(&mut self) -> Result<()> {
        if self.pending.is_some() || self.exhausted {
            return Ok(());
        }
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).at(&self.path)?;
        if n == 0 {
            self.exhausted = true;
            return Ok(());
        }
        let start = self.position;
        self.position = Checkpoint {
            offset: start.offset + n as u64,
            line: start.line + 1,
        };

        let mut line = &self.buf[..];
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let text = self.encoding.decode(line).ok_or_else(|| RelopError::Encoding {
            path: self.path.clone(),
            line: self.position.line,
            encoding: self.encoding.name(),
        })?;
        self.pending = Some(Pending {
            start,
            record: parse_line(&text),
        });
        Ok(())
    }

    pub fn has_next(&mut self) -> Result<bool> {
        self.fill()?;
        Ok(self.pending.is_some())
    }

    /// The next record without consuming it.
    pub fn peek(&mut self) -> Result<Option<&Record>> {
        self.fill()?;
        Ok(self.pending.as_ref().map(|p| &p.record))
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        self.fill()?;
        Ok(self.pending.take().map(|p| {
            self.rows_read += 1;
            p.record
        }))
    }

    /// Consume up to `count` records, returning how many were skipped.
    pub fn skip_records(&mut self, count: usize) -> Result<usize> {
        let mut skipped = 0;
        while skipped < count && self.next_record()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Remember the offset of the next unread record, replacing any
    /// earlier mark.
    pub fn mark_next_read_position(&mut self) {
        let next = match &self.pending {
            Some(p) => p.start,
            None => self.position,
        };
        self.mark = Some(next);
    }

    /// Rewind to the marked record. The mark stays set, so the same range
    /// can be replayed again.
    pub fn seek_to_marked_read_position(&mut self) -> Result<()> {
        let mark = self.mark.ok_or_else(|| RelopError::NoMark {
            path: self.path.clone(),
        })?;
        self.reader.seek(SeekFrom::Start(mark.offset)).at(&self.path)?;
        self.position = mark;
        self.pending = None;
        self.exhausted = false;
        Ok(())
    }

    pub fn has_mark(&self) -> bool {
        self.mark.is_some()
    }

    /// Records handed out by `next_record`, replays included.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(self) {}
}

impl Iterator for RecordCursor {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
