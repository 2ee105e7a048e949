//! A [`ByteStream`] backed by a real `std::fs::File`, used by the sar
//! layer for actual slice files on disk.

use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom, Write as _};

use super::{ByteStream, SkipDirection};
use crate::error::CoreResult;

#[derive(Debug)]
pub struct FileStream {
    file: File,
}

impl FileStream {
    pub fn new(file: File) -> Self
    {
        Self { file }
    }

    pub fn into_inner(self) -> File
    {
        self.file
    }
}

impl ByteStream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize>
    {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> CoreResult<()>
    {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn skip(&mut self, abs_offset: u64) -> CoreResult<bool>
    {
        self.file.seek(SeekFrom::Start(abs_offset))?;
        Ok(true)
    }

    fn skip_to_eof(&mut self) -> CoreResult<bool>
    {
        self.file.seek(SeekFrom::End(0))?;
        Ok(true)
    }

    fn skippable(&self, _direction: SkipDirection, _amount: u64) -> bool
    {
        // Regular files support arbitrary seeks in both directions.
        true
    }

    fn truncate(&mut self, abs_offset: u64) -> CoreResult<()>
    {
        self.file.set_len(abs_offset)?;
        Ok(())
    }

    fn get_position(&mut self) -> CoreResult<u64>
    {
        Ok(self.file.stream_position()?)
    }

    fn terminate(&mut self) -> CoreResult<()>
    {
        self.file.flush()?;
        Ok(())
    }
}
