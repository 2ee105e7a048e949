//! An adaptive read-or-write buffer placed in front of any [`ByteStream`],
//! per spec.md §4.2.
//!
//! The cache observes its own hit rate and grows (up to a cap) or shrinks
//! the buffer accordingly. It never holds both read and write state at
//! once: switching mode flushes (write) or discards (read) the other
//! side first.

use super::{ByteStream, Mode, SkipDirection};
use crate::error::CoreResult;

const DEFAULT_CAP: usize = 4096;
const MIN_CAP: usize = 512;
const MAX_CAP: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheMode {
    Idle,
    Reading,
    Writing,
}

pub struct Cache<S: ByteStream> {
    inner: S,
    mode: CacheMode,
    buf: Vec<u8>,
    /// Absolute stream offset corresponding to `buf[0]`.
    buf_base: u64,
    /// Index into `buf` of the next byte to read, or the next free slot
    /// to write.
    cursor: usize,
    cap: usize,
    hits: u64,
    misses: u64,
}

impl<S: ByteStream> Cache<S> {
    pub fn new(inner: S) -> Self
    {
        Self {
            inner,
            mode: CacheMode::Idle,
            buf: Vec::new(),
            buf_base: 0,
            cursor: 0,
            cap: DEFAULT_CAP,
            hits: 0,
            misses: 0,
        }
    }

    fn note_hit(&mut self)
    {
        self.hits += 1;
        // A sustained high hit rate means the caller reads in small
        // chunks against a steady window: shrink down towards min cap
        // only loosely tracked, grow on the miss side below.
    }

    fn note_miss(&mut self)
    {
        self.misses += 1;
        if self.misses > self.hits && self.cap < MAX_CAP {
            self.cap = (self.cap * 2).min(MAX_CAP);
        } else if self.hits > self.misses * 4 && self.cap > MIN_CAP {
            self.cap = (self.cap / 2).max(MIN_CAP);
        }
    }

    fn flush_write(&mut self) -> CoreResult<()>
    {
        if self.mode == CacheMode::Writing && !self.buf.is_empty() {
            self.inner.skip(self.buf_base)?;
            self.inner.write(&self.buf)?;
        }
        self.buf.clear();
        self.cursor = 0;
        Ok(())
    }

    /// Drops the read buffer. The underlying stream sits at `buf_base +
    /// buf.len()` (everything buffered has already been read from it), so
    /// if the caller only consumed up to `cursor`, it must be seeked back
    /// to the logical position before anything else reads or writes
    /// through `inner` directly.
    fn discard_read(&mut self) -> CoreResult<()>
    {
        if self.cursor != self.buf.len() {
            self.inner.skip(self.buf_base + self.cursor as u64)?;
        }
        self.buf.clear();
        self.cursor = 0;
        Ok(())
    }

    fn settle_idle(&mut self) -> CoreResult<()>
    {
        match self.mode {
            CacheMode::Writing => self.flush_write()?,
            CacheMode::Reading => self.discard_read()?,
            CacheMode::Idle => {}
        }
        self.mode = CacheMode::Idle;
        Ok(())
    }

    fn refill(&mut self) -> CoreResult<()>
    {
        self.buf_base = self.inner.get_position()?;
        self.buf.resize(self.cap, 0);
        let n = {
            let mut total = 0;
            loop {
                let got = self.inner.read(&mut self.buf[total..])?;
                if got == 0 {
                    break;
                }
                total += got;
                if total == self.buf.len() {
                    break;
                }
            }
            total
        };
        self.buf.truncate(n);
        self.cursor = 0;
        Ok(())
    }
}

impl<S: ByteStream> ByteStream for Cache<S> {
    fn read(&mut self, out: &mut [u8]) -> CoreResult<usize>
    {
        if self.mode == CacheMode::Writing {
            self.flush_write()?;
            self.mode = CacheMode::Idle;
        }
        if self.mode == CacheMode::Idle {
            self.mode = CacheMode::Reading;
            self.refill()?;
        }
        if self.cursor >= self.buf.len() {
            self.note_miss();
            self.refill()?;
            if self.buf.is_empty() {
                return Ok(0);
            }
        } else {
            self.note_hit();
        }
        let avail = self.buf.len() - self.cursor;
        let n = avail.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> CoreResult<()>
    {
        if self.mode == CacheMode::Reading {
            self.discard_read()?;
            self.mode = CacheMode::Idle;
        }
        if self.mode == CacheMode::Idle {
            self.mode = CacheMode::Writing;
            self.buf_base = self.inner.get_position()?;
            self.buf.clear();
            self.cursor = 0;
        }

        let mut remaining = buf;
        while !remaining.is_empty() {
            let room = self.cap.saturating_sub(self.cursor);
            if room == 0 {
                self.flush_write()?;
                self.mode = CacheMode::Writing;
                self.buf_base = self.inner.get_position()?;
                continue;
            }
            let take = room.min(remaining.len());
            let end = self.cursor + take;
            // `cursor` may sit before the buffer's current end (a `skip`
            // landed inside the already-buffered range): overwrite there
            // instead of appending, only growing `buf` past its end.
            if end > self.buf.len() {
                self.buf.resize(end, 0);
            }
            self.buf[self.cursor..end].copy_from_slice(&remaining[..take]);
            self.cursor = end;
            remaining = &remaining[take..];
        }
        Ok(())
    }

    fn skip(&mut self, abs_offset: u64) -> CoreResult<bool>
    {
        match self.mode {
            CacheMode::Reading => {
                let buf_end = self.buf_base + self.buf.len() as u64;
                if abs_offset >= self.buf_base && abs_offset <= buf_end {
                    self.cursor = (abs_offset - self.buf_base) as usize;
                    return Ok(true);
                }
                self.discard_read()?;
                self.mode = CacheMode::Idle;
            }
            CacheMode::Writing => {
                let buf_end = self.buf_base + self.buf.len() as u64;
                if abs_offset >= self.buf_base && abs_offset <= buf_end {
                    self.cursor = (abs_offset - self.buf_base) as usize;
                    return Ok(true);
                }
                self.flush_write()?;
                self.mode = CacheMode::Idle;
            }
            CacheMode::Idle => {}
        }
        self.inner.skip(abs_offset)
    }

    fn skip_to_eof(&mut self) -> CoreResult<bool>
    {
        self.settle_idle()?;
        self.inner.skip_to_eof()
    }

    fn skippable(&self, direction: SkipDirection, amount: u64) -> bool
    {
        self.inner.skippable(direction, amount)
    }

    fn get_position(&mut self) -> CoreResult<u64>
    {
        Ok(self.buf_base + self.cursor as u64)
    }

    fn terminate(&mut self) -> CoreResult<()>
    {
        self.settle_idle()?;
        self.inner.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mem::MemStream;

    #[test]
    fn write_then_read_through_cache()
    {
        let mut c = Cache::new(MemStream::new(Mode::ReadWrite));
        c.write(b"hello cache world").unwrap();
        c.skip(0).unwrap();
        let mut buf = [0u8; 5];
        c.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn skip_within_buffer_moves_pointer_only()
    {
        let mut c = Cache::new(MemStream::new(Mode::ReadWrite));
        c.write(b"0123456789").unwrap();
        c.skip(0).unwrap();
        let mut buf = [0u8; 10];
        c.read(&mut buf).unwrap();
        assert_eq!(&buf, b"0123456789");
        c.skip(3).unwrap();
        let mut two = [0u8; 2];
        c.read(&mut two).unwrap();
        assert_eq!(&two, b"34");
    }

    #[test]
    fn skip_back_into_buffer_overwrites_in_place()
    {
        let mut c = Cache::new(MemStream::new(Mode::ReadWrite));
        c.write(b"0123456789").unwrap();
        // Still inside the buffered region: must overwrite bytes 3-4, not
        // append past them.
        c.skip(3).unwrap();
        c.write(b"XY").unwrap();
        c.terminate().unwrap();

        let mut reader = Cache::new(c.inner);
        reader.skip(0).unwrap();
        let mut out = [0u8; 10];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"012XY56789");
    }

    #[test]
    fn mode_switch_flushes_pending_write()
    {
        let mut c = Cache::new(MemStream::new(Mode::ReadWrite));
        c.write(b"abc").unwrap();
        c.skip(0).unwrap();
        let mut buf = [0u8; 3];
        c.read(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn write_after_partial_read_lands_at_logical_cursor()
    {
        // The refill buffers the whole stream ahead of the cursor; writing
        // right after a partial read must not fall back to the far end of
        // what got buffered.
        let mut c = Cache::new(MemStream::new(Mode::ReadWrite));
        c.write(b"0123456789").unwrap();
        c.terminate().unwrap();

        let mut c = Cache::new(c.inner);
        let mut head = [0u8; 3];
        c.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"012");
        c.write(b"XY").unwrap();
        c.terminate().unwrap();

        let mut reader = Cache::new(c.inner);
        reader.skip(0).unwrap();
        let mut out = [0u8; 10];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"012XY56789");
    }
}
