//! The escape layer: typed marks inside an otherwise-arbitrary byte
//! stream, per spec.md §4.4.
//!
//! Marker format: 5 fixed magic bytes + 1 type byte. Any 5-byte sequence
//! in the user data that matches the magic is escaped by inserting a
//! `NotASequence` type byte right after it, so a reader can always tell
//! real markers from incidental occurrences in payload bytes.

use std::collections::HashSet;

use crate::error::{CoreError, CoreResult};
use crate::stream::{ByteStream, SkipDirection};

pub const MAGIC: [u8; 5] = *b"\xAD\xFD\xEA\x77\x21";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkType {
    NotASequence = 0,
    FileData = 1,
    Ea = 2,
    CatalogueStart = 3,
    DataName = 4,
    FileCrc = 5,
    EaCrc = 6,
    Changed = 7,
    Dirty = 8,
    FailedBackup = 9,
    Fsa = 10,
    FsaCrc = 11,
    DeltaSignature = 12,
}

impl MarkType {
    fn from_byte(b: u8) -> CoreResult<Self>
    {
        use MarkType::*;
        Ok(match b {
            0 => NotASequence,
            1 => FileData,
            2 => Ea,
            3 => CatalogueStart,
            4 => DataName,
            5 => FileCrc,
            6 => EaCrc,
            7 => Changed,
            8 => Dirty,
            9 => FailedBackup,
            10 => Fsa,
            11 => FsaCrc,
            12 => DeltaSignature,
            other => return Err(CoreError::data(format!("unknown escape mark type {other}"))),
        })
    }
}

/// Writer half: scans outgoing bytes for accidental magic occurrences and
/// escapes them; `add_mark` inserts a real typed marker between records.
pub struct EscapeWriter<S> {
    inner: S,
    /// Bytes of the magic matched so far in the current write call, used
    /// to detect a magic sequence split across two `write` calls.
    tail_match: usize,
}

impl<S: ByteStream> EscapeWriter<S> {
    pub fn new(inner: S) -> Self
    {
        Self {
            inner,
            tail_match: 0,
        }
    }

    pub fn into_inner(self) -> S
    {
        self.inner
    }

    pub fn add_mark(&mut self, mark: MarkType) -> CoreResult<()>
    {
        self.flush_tail()?;
        self.inner.write(&MAGIC)?;
        self.inner.write(&[mark as u8])?;
        Ok(())
    }

    /// Writes user data, escaping accidental magic occurrences.
    pub fn write_data(&mut self, data: &[u8]) -> CoreResult<()>
    {
        let mut i = 0;
        while i < data.len() {
            let remaining_magic = MAGIC.len() - self.tail_match;
            let can_match = remaining_magic.min(data.len() - i);
            if data[i..i + can_match] == MAGIC[self.tail_match..self.tail_match + can_match] {
                self.tail_match += can_match;
                i += can_match;
                if self.tail_match == MAGIC.len() {
                    self.inner.write(&MAGIC)?;
                    self.inner.write(&[MarkType::NotASequence as u8])?;
                    self.tail_match = 0;
                }
            } else {
                if self.tail_match > 0 {
                    self.inner.write(&MAGIC[..self.tail_match])?;
                    self.tail_match = 0;
                    continue;
                }
                self.inner.write(&data[i..i + 1])?;
                i += 1;
            }
        }
        Ok(())
    }

    /// Flushes any partially-matched magic tail as literal bytes. Call
    /// before dropping or before reading back what was written.
    pub fn flush_tail(&mut self) -> CoreResult<()>
    {
        if self.tail_match > 0 {
            self.inner.write(&MAGIC[..self.tail_match])?;
            self.tail_match = 0;
        }
        Ok(())
    }

    pub fn terminate(&mut self) -> CoreResult<()>
    {
        self.flush_tail()?;
        self.inner.terminate()
    }
}

/// Reader half. Scanning is streaming and tolerant of partial matches at
/// buffer boundaries.
pub struct EscapeReader<S> {
    inner: S,
    /// Not skippable forward in write mode per spec.md §4.4; reading only
    /// needs the underlying stream's own skip.
    unjumpable: HashSet<MarkType>,
    /// A marker found while draining pending data for a previous `next()`
    /// call, held until the caller asks again.
    pending_mark: Option<MarkType>,
    /// Bytes read ahead while tentatively matching the magic that must be
    /// rescanned from their own first byte after the match failed, so a
    /// new magic occurrence starting one byte later is never missed.
    pushback: std::collections::VecDeque<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    Mark(MarkType),
    Eof,
}

impl<S: ByteStream> EscapeReader<S> {
    pub fn new(inner: S) -> Self
    {
        Self {
            inner,
            unjumpable: HashSet::new(),
            pending_mark: None,
            pushback: std::collections::VecDeque::new(),
        }
    }

    pub fn into_inner(self) -> S
    {
        self.inner
    }

    pub fn remove_unjumpable_mark(&mut self, mark: MarkType)
    {
        self.unjumpable.remove(&mark);
    }

    pub fn add_unjumpable_mark(&mut self, mark: MarkType)
    {
        self.unjumpable.insert(mark);
    }

    /// Reads the next chunk of data, stopping at (and consuming) the next
    /// marker other than `NotASequence`; a `NotASequence` marker is
    /// transparently resolved into literal magic bytes in the data
    /// stream.
    pub fn next(&mut self) -> CoreResult<ReadOutcome>
    {
        if let Some(mark) = self.pending_mark.take() {
            return Ok(ReadOutcome::Mark(mark));
        }
        let mut data = Vec::new();
        loop {
            let byte = match self.read_byte()? {
                Some(b) => b,
                None => {
                    return Ok(if data.is_empty() {
                        ReadOutcome::Eof
                    } else {
                        ReadOutcome::Data(data)
                    })
                }
            };
            if byte != MAGIC[0] {
                data.push(byte);
                continue;
            }
            // Tentatively matching the magic: read up to 4 more bytes,
            // stopping at the first one that breaks the match. Every byte
            // read here, whether the match succeeds or not, must remain
            // available for rescanning: a mismatch doesn't mean none of
            // these bytes start a genuine magic occurrence of their own.
            let mut window = Vec::with_capacity(4);
            let mut matched = true;
            for expected in &MAGIC[1..] {
                match self.read_byte()? {
                    Some(b) => {
                        window.push(b);
                        if b != *expected {
                            matched = false;
                            break;
                        }
                    }
                    None => {
                        matched = false;
                        break;
                    }
                }
            }
            if !matched || window.len() < 4 {
                data.push(byte);
                for b in window.into_iter().rev() {
                    self.pushback.push_front(b);
                }
                continue;
            }
            let type_byte = match self.read_byte()? {
                Some(b) => b,
                None => return Err(CoreError::data("escape mark truncated before type byte")),
            };
            let mark = MarkType::from_byte(type_byte)?;
            if mark == MarkType::NotASequence {
                data.extend_from_slice(&MAGIC);
                continue;
            }
            if !data.is_empty() {
                // Marker found but we already have data pending: report
                // the data first, let the caller call `next` again to get
                // the marker. We cannot push the marker back onto `inner`
                // in a generic way, so buffer it for the following call.
                self.pending_mark = Some(mark);
                return Ok(ReadOutcome::Data(data));
            }
            return Ok(ReadOutcome::Mark(mark));
        }
    }

    /// Reads one byte, preferring anything rescanned back via `pushback`
    /// over a fresh read from `inner`. Returns `None` at end of stream.
    fn read_byte(&mut self) -> CoreResult<Option<u8>>
    {
        if let Some(b) = self.pushback.pop_front() {
            return Ok(Some(b));
        }
        let mut byte = [0u8; 1];
        let n = self.inner.read(&mut byte)?;
        Ok(if n == 0 { None } else { Some(byte[0]) })
    }

    /// Reports whether the next item to be read is a marker of the given
    /// type, without consuming user data ahead of it (only meaningful
    /// right after a previous `next()` returned `Data`, since we buffer
    /// at most one pending mark).
    pub fn next_to_read_is_mark(&self, mark: MarkType) -> bool
    {
        self.pending_mark == Some(mark)
    }

    /// Skips forward, consuming data, until `mark` is found (and
    /// consumed). If `allow_jump` is false and an unrelated unjumpable
    /// mark is crossed first, this fails instead of silently skipping
    /// over it.
    pub fn skip_to_next_mark(&mut self, mark: MarkType, allow_jump: bool) -> CoreResult<()>
    {
        if let Some(pending) = self.pending_mark.take() {
            if pending == mark {
                return Ok(());
            }
            if !allow_jump && self.unjumpable.contains(&pending) {
                return Err(CoreError::data(format!(
                    "crossed unjumpable mark while seeking {mark:?}"
                )));
            }
        }
        loop {
            match self.next()? {
                ReadOutcome::Eof => {
                    return Err(CoreError::data(format!("mark {mark:?} not found before eof")))
                }
                ReadOutcome::Data(_) => continue,
                ReadOutcome::Mark(found) => {
                    if found == mark {
                        return Ok(());
                    }
                    if !allow_jump && self.unjumpable.contains(&found) {
                        return Err(CoreError::data(format!(
                            "crossed unjumpable mark {found:?} while seeking {mark:?}"
                        )));
                    }
                }
            }
        }
    }
}
