//! An in-memory [`ByteStream`] backed by a growable `Vec<u8>`.
//!
//! Used pervasively by this crate's tests in place of real slice files,
//! the way `fsfill`'s tests build a [`Bitmap`] straight from a byte slice
//! instead of a file.

use super::{ByteStream, Mode, SkipDirection};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Default)]
pub struct MemStream {
    data: Vec<u8>,
    pos: usize,
    mode: Mode,
}

impl MemStream {
    pub fn new(mode: Mode) -> Self
    {
        Self {
            data: Vec::new(),
            pos: 0,
            mode,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self
    {
        Self {
            data,
            pos: 0,
            mode: Mode::Read,
        }
    }

    pub fn into_vec(self) -> Vec<u8>
    {
        self.data
    }

    pub fn as_slice(&self) -> &[u8]
    {
        &self.data
    }
}

impl ByteStream for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize>
    {
        if self.mode == Mode::Write {
            return Err(CoreError::range("stream opened write-only"));
        }
        let remaining = self.data.len().saturating_sub(self.pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> CoreResult<()>
    {
        if self.mode == Mode::Read {
            return Err(CoreError::range("stream opened read-only"));
        }
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn skip(&mut self, abs_offset: u64) -> CoreResult<bool>
    {
        self.pos = abs_offset as usize;
        Ok(true)
    }

    fn skip_to_eof(&mut self) -> CoreResult<bool>
    {
        self.pos = self.data.len();
        Ok(true)
    }

    fn skippable(&self, _direction: SkipDirection, _amount: u64) -> bool
    {
        true
    }

    fn truncate(&mut self, abs_offset: u64) -> CoreResult<()>
    {
        self.data.truncate(abs_offset as usize);
        if self.pos > self.data.len() {
            self.pos = self.data.len();
        }
        Ok(())
    }

    fn get_position(&mut self) -> CoreResult<u64>
    {
        Ok(self.pos as u64)
    }

    fn terminate(&mut self) -> CoreResult<()>
    {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back()
    {
        let mut s = MemStream::new(Mode::ReadWrite);
        s.write(b"hello world").unwrap();
        s.skip(0).unwrap();
        let mut buf = [0u8; 5];
        let n = s.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn truncate_shrinks_and_clamps_position()
    {
        let mut s = MemStream::new(Mode::ReadWrite);
        s.write(b"0123456789").unwrap();
        s.truncate(4).unwrap();
        assert_eq!(s.as_slice(), b"0123");
        assert_eq!(s.get_position().unwrap(), 4);
    }
}
