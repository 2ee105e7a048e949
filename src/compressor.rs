//! Streaming block compressor, per spec.md §4.7.
//!
//! The clear stream is split into bounded blocks; each block is
//! compressed independently so `suspend_compression`/`resume_compression`
//! can bracket a region (the catalogue, or FSA data) that must be
//! readable without replaying the whole stream's decompression context.
//! Every `flush` (forced by suspend or by crossing [`BLOCK_MAX`]) ends the
//! current `flate2` encoder and starts a fresh one on the next block, so
//! the dictionary is reinitialised at every such boundary — spec.md's
//! "reset points" requirement falls out of the block framing for free.
//!
//! Block format on the wire: `tag(u8) clear_len(u32 BE) stored_len(u32 BE)
//! bytes[stored_len]`. `tag` is 0 for a raw (uncompressed) block, 1 for
//! gzip. bzip2 and lz4 are named in spec.md's algorithm list but no crate
//! for them is in this workspace's dependency stack (see DESIGN.md); they
//! report `CoreError::Feature`, matching spec.md §7's "operation requires
//! a build-time feature that is absent".

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{CoreError, CoreResult};
use crate::stream::{ByteStream, SkipDirection};

/// Compression algorithm id, carried in the archive header (spec.md §3.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionAlgo {
    None = 0,
    Gzip = 1,
    Bzip2 = 2,
    Lz4 = 3,
}

impl CompressionAlgo {
    pub fn from_tag(tag: u8) -> CoreResult<Self>
    {
        Ok(match tag {
            0 => CompressionAlgo::None,
            1 => CompressionAlgo::Gzip,
            2 => CompressionAlgo::Bzip2,
            3 => CompressionAlgo::Lz4,
            other => return Err(CoreError::data(format!("unknown compression algo id {other}"))),
        })
    }

    pub fn tag(self) -> u8
    {
        self as u8
    }
}

/// Clear bytes buffered per block before a compression pass is attempted.
/// Chosen to match the tronconneuse's own framing granularity so the two
/// layers, when stacked, don't produce wildly mismatched I/O sizes.
const BLOCK_MAX: usize = 64 * 1024;

const TAG_RAW: u8 = 0;
const TAG_GZIP: u8 = 1;

fn compress_block(algo: CompressionAlgo, level: u32, clear: &[u8]) -> CoreResult<(u8, Vec<u8>)>
{
    match algo {
        CompressionAlgo::None => Ok((TAG_RAW, clear.to_vec())),
        CompressionAlgo::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), Compression::new(level));
            enc.write_all(clear)?;
            let compressed = enc.finish()?;
            if compressed.len() < clear.len() {
                Ok((TAG_GZIP, compressed))
            } else {
                Ok((TAG_RAW, clear.to_vec()))
            }
        }
        CompressionAlgo::Bzip2 => Err(CoreError::Feature("bzip2 compression".to_string())),
        CompressionAlgo::Lz4 => Err(CoreError::Feature("lz4 compression".to_string())),
    }
}

fn decompress_block(tag: u8, stored: &[u8], clear_len: usize) -> CoreResult<Vec<u8>>
{
    match tag {
        TAG_RAW => Ok(stored.to_vec()),
        TAG_GZIP => {
            let mut dec = GzDecoder::new(stored);
            let mut out = Vec::with_capacity(clear_len);
            dec.read_to_end(&mut out)?;
            Ok(out)
        }
        other => Err(CoreError::data(format!("unknown compression block tag {other}"))),
    }
}

/// Wraps a downstream [`ByteStream`] with block compression on write.
pub struct CompressionWriter<S> {
    inner: S,
    algo: CompressionAlgo,
    level: u32,
    buffer: Vec<u8>,
    suspended: bool,
}

impl<S: ByteStream> CompressionWriter<S> {
    pub fn new(inner: S, algo: CompressionAlgo, level: u32) -> Self
    {
        Self {
            inner,
            algo,
            level,
            buffer: Vec::with_capacity(BLOCK_MAX),
            suspended: false,
        }
    }

    pub fn into_inner(self) -> S
    {
        self.inner
    }

    /// Forces the current buffer out as one block, ending the compression
    /// context so a reader can start fresh decompression right after it —
    /// used both internally (block rollover) and for `suspend_compression`.
    fn flush_block(&mut self) -> CoreResult<()>
    {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let clear = std::mem::take(&mut self.buffer);
        let (tag, stored) = if self.suspended {
            (TAG_RAW, clear.clone())
        } else {
            compress_block(self.algo, self.level, &clear)?
        };
        self.write_raw_block(tag, clear.len() as u32, &stored)
    }

    fn write_raw_block(&mut self, tag: u8, clear_len: u32, stored: &[u8]) -> CoreResult<()>
    {
        let mut header = Vec::with_capacity(9);
        header.write_u8(tag)?;
        header.write_u32::<BigEndian>(clear_len)?;
        header.write_u32::<BigEndian>(stored.len() as u32)?;
        self.inner.write(&header)?;
        self.inner.write(stored)?;
        Ok(())
    }

    /// Per spec.md §4.7: writes immediately following this call are passed
    /// through uncompressed until [`Self::resume_compression`], so a
    /// differently-compressed region (the catalogue, uncompressed FSA) can
    /// be interleaved without disturbing the payload's own compression
    /// regime.
    pub fn suspend_compression(&mut self) -> CoreResult<()>
    {
        self.flush_block()?;
        self.suspended = true;
        Ok(())
    }

    pub fn resume_compression(&mut self) -> CoreResult<()>
    {
        self.flush_block()?;
        self.suspended = false;
        Ok(())
    }
}

impl<S: ByteStream> ByteStream for CompressionWriter<S> {
    fn read(&mut self, _buf: &mut [u8]) -> CoreResult<usize>
    {
        Err(CoreError::range("compression writer opened write-only"))
    }

    fn write(&mut self, data: &[u8]) -> CoreResult<()>
    {
        if matches!(self.algo, CompressionAlgo::Bzip2 | CompressionAlgo::Lz4) {
            return Err(CoreError::Feature(format!("{:?} compression", self.algo)));
        }
        let mut offset = 0;
        while offset < data.len() {
            let room = BLOCK_MAX - self.buffer.len();
            let take = room.min(data.len() - offset);
            self.buffer.extend_from_slice(&data[offset..offset + take]);
            offset += take;
            if self.buffer.len() == BLOCK_MAX {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    fn skip(&mut self, _abs_offset: u64) -> CoreResult<bool>
    {
        Ok(false)
    }

    fn skip_to_eof(&mut self) -> CoreResult<bool>
    {
        self.inner.skip_to_eof()
    }

    fn skippable(&self, _direction: SkipDirection, _amount: u64) -> bool
    {
        false
    }

    fn get_position(&mut self) -> CoreResult<u64>
    {
        self.inner.get_position()
    }

    fn terminate(&mut self) -> CoreResult<()>
    {
        self.flush_block()?;
        self.inner.terminate()
    }
}

/// Wraps a downstream [`ByteStream`] with block decompression on read.
pub struct CompressionReader<S> {
    inner: S,
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
}

impl<S: ByteStream> CompressionReader<S> {
    pub fn new(inner: S) -> Self
    {
        Self {
            inner,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
        }
    }

    pub fn into_inner(self) -> S
    {
        self.inner
    }

    fn fill_next_block(&mut self) -> CoreResult<bool>
    {
        let mut header = [0u8; 9];
        let n = self.read_fill_inner(&mut header)?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        if n != header.len() {
            return Err(CoreError::data("compressed stream truncated mid-header"));
        }
        let tag = header[0];
        let clear_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let stored_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
        let mut stored = vec![0u8; stored_len];
        self.inner.read_exact(&mut stored)?;
        self.pending = decompress_block(tag, &stored, clear_len)?;
        self.pending_pos = 0;
        Ok(true)
    }

    fn read_fill_inner(&mut self, buf: &mut [u8]) -> CoreResult<usize>
    {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl<S: ByteStream> ByteStream for CompressionReader<S> {
    fn read(&mut self, out: &mut [u8]) -> CoreResult<usize>
    {
        if self.pending_pos >= self.pending.len() {
            if self.eof {
                return Ok(0);
            }
            if !self.fill_next_block()? {
                return Ok(0);
            }
        }
        let n = (self.pending.len() - self.pending_pos).min(out.len());
        out[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
        self.pending_pos += n;
        Ok(n)
    }

    fn write(&mut self, _data: &[u8]) -> CoreResult<()>
    {
        Err(CoreError::range("compression reader opened read-only"))
    }

    fn skip(&mut self, _abs_offset: u64) -> CoreResult<bool>
    {
        Ok(false)
    }

    fn skip_to_eof(&mut self) -> CoreResult<bool>
    {
        self.inner.skip_to_eof()
    }

    fn skippable(&self, _direction: SkipDirection, _amount: u64) -> bool
    {
        false
    }

    fn get_position(&mut self) -> CoreResult<u64>
    {
        self.inner.get_position()
    }

    fn terminate(&mut self) -> CoreResult<()>
    {
        self.inner.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mem::MemStream;
    use crate::stream::Mode;

    fn roundtrip(algo: CompressionAlgo, data: &[u8]) -> Vec<u8>
    {
        let mem = MemStream::new(Mode::ReadWrite);
        let mut w = CompressionWriter::new(mem, algo, 6);
        w.write(data).unwrap();
        w.terminate().unwrap();
        let mut mem = w.into_inner();
        mem.skip(0).unwrap();
        let mut r = CompressionReader::new(mem);
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn gzip_roundtrips_compressible_data()
    {
        let data = vec![b'a'; 10_000];
        assert_eq!(roundtrip(CompressionAlgo::Gzip, &data), data);
    }

    #[test]
    fn none_roundtrips_incompressible_data()
    {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        assert_eq!(roundtrip(CompressionAlgo::None, &data), data);
    }

    #[test]
    fn suspend_resume_brackets_a_raw_region()
    {
        let mem = MemStream::new(Mode::ReadWrite);
        let mut w = CompressionWriter::new(mem, CompressionAlgo::Gzip, 6);
        w.write(&vec![b'x'; 2000]).unwrap();
        w.suspend_compression().unwrap();
        w.write(b"uncompressed marker region").unwrap();
        w.resume_compression().unwrap();
        w.write(&vec![b'y'; 2000]).unwrap();
        w.terminate().unwrap();

        let mut mem = w.into_inner();
        mem.skip(0).unwrap();
        let mut r = CompressionReader::new(mem);
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        let mut expected = vec![b'x'; 2000];
        expected.extend_from_slice(b"uncompressed marker region");
        expected.extend_from_slice(&vec![b'y'; 2000]);
        assert_eq!(out, expected);
    }

    #[test]
    fn bzip2_reports_feature_unavailable()
    {
        let mem = MemStream::new(Mode::ReadWrite);
        let mut w = CompressionWriter::new(mem, CompressionAlgo::Bzip2, 6);
        assert!(w.write(b"data").is_err());
    }
}
