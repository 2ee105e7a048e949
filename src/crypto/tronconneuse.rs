//! Sequential block cipher frame, per spec.md §4.5.
//!
//! The clear stream is partitioned into fixed-size clear blocks. Each is
//! encrypted independently so `skip(clear_offset)` only needs to decrypt
//! one block, not the whole prefix.

use crate::crypto::{decrypt_block, encrypt_block, encrypted_block_size_for, CipherAlgo};
use crate::error::{CoreError, CoreResult};
use crate::stream::{ByteStream, Mode, SkipDirection};

/// Callback that, given the underlying reader, returns the first offset
/// (in the *underlying* stream) that is not encrypted — spec.md §4.5
/// "Trailing clear data".
pub type TrailingClearLocator<'a> = dyn FnMut(&mut dyn ByteStream) -> CoreResult<u64> + 'a;

pub struct Tronconneuse<'a, S> {
    inner: S,
    key: [u8; 32],
    algo: CipherAlgo,
    clear_block_size: usize,
    initial_shift: u64,
    mode: Mode,
    /// Cached decrypted block and the clear-offset of its first byte.
    block_cache: Option<(u64, Vec<u8>)>,
    position: u64,
    trailing_clear: Option<&'a mut TrailingClearLocator<'a>>,
    /// Clear bytes accumulated for `pending_block`, not yet flushed; a
    /// block is only encrypted and emitted once it holds
    /// `clear_block_size` bytes or [`Self::terminate`]/a `skip` moves
    /// writing to a different block, so two `write` calls landing in the
    /// same clear block don't each re-encrypt from scratch and clobber
    /// each other.
    pending_write: Vec<u8>,
    /// Which clear block `pending_write` belongs to; `None` when nothing
    /// is buffered.
    pending_block: Option<u64>,
}

impl<'a, S: ByteStream> Tronconneuse<'a, S> {
    pub fn new(
        inner: S,
        key: [u8; 32],
        algo: CipherAlgo,
        clear_block_size: usize,
        initial_shift: u64,
        mode: Mode,
    ) -> Self
    {
        Self {
            inner,
            key,
            algo,
            clear_block_size,
            initial_shift,
            mode,
            block_cache: None,
            position: 0,
            trailing_clear: None,
            pending_write: Vec::new(),
            pending_block: None,
        }
    }

    pub fn set_trailing_clear_locator(&mut self, locator: &'a mut TrailingClearLocator<'a>)
    {
        self.trailing_clear = Some(locator);
    }

    pub fn into_inner(self) -> S
    {
        self.inner
    }

    fn encrypted_block_len(&self) -> usize
    {
        encrypted_block_size_for(self.clear_block_size, self.algo)
    }

    fn block_offset(&self, block_num: u64) -> u64
    {
        self.initial_shift + block_num * self.encrypted_block_len() as u64
    }

    /// Encrypts and emits whatever clear bytes are buffered in
    /// `pending_write` as one block — a full `clear_block_size` block
    /// once it fills, a short final one from [`ByteStream::terminate`],
    /// or whatever is buffered when a `skip` moves writing to a
    /// different block. A no-op if nothing is buffered.
    fn flush_pending_block(&mut self) -> CoreResult<()>
    {
        let block_num = match self.pending_block {
            Some(n) => n,
            None => return Ok(()),
        };
        let encrypted = encrypt_block(&self.key, block_num, &self.pending_write, self.algo)?;
        let block_offset = self.block_offset(block_num);
        self.inner.skip(block_offset)?;
        self.inner.write(&encrypted)?;
        self.pending_write.clear();
        self.pending_block = None;
        if block_num == self.block_cache.as_ref().map(|(n, _)| *n).unwrap_or(u64::MAX) {
            self.block_cache = None;
        }
        Ok(())
    }

    /// The already-written clear bytes of `block_num`, padded/truncated
    /// to `len` — used when a `write` lands inside a block at a
    /// non-zero offset (a `skip` repositioned to the block's middle) so
    /// the bytes before that offset aren't lost when the block is
    /// eventually re-encrypted as a whole. A block that doesn't exist
    /// yet (writing past current end-of-stream) reads back as zeros; a
    /// block that exists but fails to decrypt (corruption, wrong key) is
    /// a real error and must not be mistaken for the former.
    fn existing_block_prefix(&mut self, block_num: u64, len: usize) -> CoreResult<Vec<u8>>
    {
        let offset = self.block_offset(block_num);
        self.inner.skip_to_eof()?;
        let end = self.inner.get_position()?;
        let mut buf = vec![0u8; len];
        if offset >= end {
            return Ok(buf);
        }
        let existing = self.load_block(block_num)?;
        let n = existing.len().min(len);
        buf[..n].copy_from_slice(&existing[..n]);
        Ok(buf)
    }

    fn load_block(&mut self, block_num: u64) -> CoreResult<&[u8]>
    {
        if let Some((cached_num, _)) = &self.block_cache {
            if *cached_num == block_num {
                return Ok(&self.block_cache.as_ref().unwrap().1);
            }
        }
        let offset = self.block_offset(block_num);
        self.inner.skip(offset)?;
        let mut ciphertext = vec![0u8; self.encrypted_block_len()];
        let n = {
            let mut filled = 0;
            loop {
                let got = self.inner.read(&mut ciphertext[filled..])?;
                if got == 0 {
                    break filled;
                }
                filled += got;
                if filled == ciphertext.len() {
                    break filled;
                }
            }
        };
        ciphertext.truncate(n);

        let clear = match decrypt_block(&self.key, block_num, &ciphertext, self.algo) {
            Ok(c) => c,
            Err(e) => {
                if let Some(locator) = self.trailing_clear.as_deref_mut() {
                    let clear_start = locator(&mut self.inner)?;
                    if offset >= clear_start {
                        // Fully within the declared trailing-clear region:
                        // not a corruption, just unencrypted tail data.
                        ciphertext
                    } else if offset + ciphertext.len() as u64 > clear_start {
                        let boundary = (clear_start - offset) as usize;
                        let truncated = &ciphertext[..boundary.min(ciphertext.len())];
                        decrypt_block(&self.key, block_num, truncated, self.algo)?
                    } else {
                        // Fully within the ciphered area: fatal per
                        // spec.md §4.5 "Contract on failure".
                        return Err(e);
                    }
                } else {
                    return Err(e);
                }
            }
        };
        self.block_cache = Some((block_num, clear));
        Ok(&self.block_cache.as_ref().unwrap().1)
    }
}

impl<'a, S: ByteStream> ByteStream for Tronconneuse<'a, S> {
    fn read(&mut self, out: &mut [u8]) -> CoreResult<usize>
    {
        if self.mode == Mode::Write {
            return Err(CoreError::range("tronconneuse opened write-only"));
        }
        let block_num = self.position / self.clear_block_size as u64;
        let in_block = (self.position % self.clear_block_size as u64) as usize;

        // The current block may still be sitting unflushed in
        // `pending_write` (read-after-write on a `ReadWrite` stream,
        // before `terminate`); the underlying stream has nothing for it
        // yet, so serve it directly instead of going through `load_block`.
        if self.pending_block == Some(block_num) {
            if in_block >= self.pending_write.len() {
                return Ok(0);
            }
            let n = (self.pending_write.len() - in_block).min(out.len());
            out[..n].copy_from_slice(&self.pending_write[in_block..in_block + n]);
            self.position += n as u64;
            return Ok(n);
        }

        let block = self.load_block(block_num)?;
        if in_block >= block.len() {
            return Ok(0);
        }
        let n = (block.len() - in_block).min(out.len());
        out[..n].copy_from_slice(&block[in_block..in_block + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> CoreResult<()>
    {
        if self.mode == Mode::Read {
            return Err(CoreError::range("tronconneuse opened read-only"));
        }
        let mut offset = 0;
        while offset < data.len() {
            let block_num = self.position / self.clear_block_size as u64;
            let in_block = (self.position % self.clear_block_size as u64) as usize;

            // `position` moved to a different block than the one
            // buffered (sequential rollover, or an explicit `skip`):
            // flush the old one and, if this write doesn't start at the
            // new block's first byte, pull back its already-written
            // prefix so re-encrypting the whole block doesn't lose it.
            if self.pending_block != Some(block_num) {
                self.flush_pending_block()?;
                self.pending_write = if in_block > 0 {
                    self.existing_block_prefix(block_num, in_block)?
                } else {
                    Vec::new()
                };
                self.pending_block = Some(block_num);
            }

            let space = self.clear_block_size - self.pending_write.len();
            let take = space.min(data.len() - offset);
            self.pending_write.extend_from_slice(&data[offset..offset + take]);
            offset += take;
            self.position += take as u64;
            if self.pending_write.len() == self.clear_block_size {
                self.flush_pending_block()?;
            }
        }
        Ok(())
    }

    fn skip(&mut self, abs_offset: u64) -> CoreResult<bool>
    {
        self.position = abs_offset;
        Ok(true)
    }

    fn skip_to_eof(&mut self) -> CoreResult<bool>
    {
        self.inner.skip_to_eof()?;
        let end = self.inner.get_position()?;
        let body = end.saturating_sub(self.initial_shift);
        let encrypted_len = self.encrypted_block_len() as u64;
        let full_blocks = body / encrypted_len;
        let mut remainder = body % encrypted_len;
        if remainder > 0 {
            // A short final block still carries the full per-block
            // overhead (the GCM tag); strip it so the computed clear
            // length doesn't overshoot by `TAG_LEN`.
            let overhead = encrypted_len - self.clear_block_size as u64;
            remainder = remainder.saturating_sub(overhead);
        }
        self.position = full_blocks * self.clear_block_size as u64 + remainder;
        Ok(true)
    }

    fn skippable(&self, _direction: SkipDirection, _amount: u64) -> bool
    {
        true
    }

    fn get_position(&mut self) -> CoreResult<u64>
    {
        Ok(self.position)
    }

    fn terminate(&mut self) -> CoreResult<()>
    {
        self.flush_pending_block()?;
        self.inner.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mem::MemStream;

    fn make_stream(key: [u8; 32], clear_block_size: usize) -> Tronconneuse<'static, MemStream>
    {
        Tronconneuse::new(
            MemStream::new(Mode::ReadWrite),
            key,
            CipherAlgo::Aes256Gcm,
            clear_block_size,
            0,
            Mode::ReadWrite,
        )
    }

    #[test]
    fn seek_commutes_with_read()
    {
        let key = [5u8; 32];
        let mut t = make_stream(key, 16);
        let data: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        t.write(&data).unwrap();

        t.skip(0).unwrap();
        let mut whole = vec![0u8; data.len()];
        t.read_exact(&mut whole).unwrap();
        assert_eq!(whole, data);

        let offset = 37;
        let n = 20;
        t.skip(offset).unwrap();
        let mut tail = vec![0u8; n];
        t.read_exact(&mut tail).unwrap();
        assert_eq!(tail, data[offset as usize..offset as usize + n]);
    }

    /// Two `write` calls whose combined bytes fit in a single clear block
    /// (the shape `compressor.rs` uses: a short header, then the body)
    /// must not have the second overwrite the first's portion of the
    /// block.
    #[test]
    fn sequential_writes_into_one_block_do_not_clobber()
    {
        let key = [9u8; 32];
        let mut t = make_stream(key, 32);
        let header = vec![0xAAu8; 9];
        let body = vec![0xBBu8; 17];
        t.write(&header).unwrap();
        t.write(&body).unwrap();
        t.terminate().unwrap();

        t.skip(0).unwrap();
        let mut all = vec![0u8; header.len() + body.len()];
        t.read_exact(&mut all).unwrap();
        assert_eq!(&all[..9], &header[..]);
        assert_eq!(&all[9..], &body[..]);
    }

    /// A `skip` back to an already-flushed block followed by a `write`
    /// must overwrite that block in place, not land on whatever block
    /// comes after the last one written.
    #[test]
    fn skip_back_and_write_overwrites_correct_block()
    {
        let key = [3u8; 32];
        let mut t = make_stream(key, 16);
        t.write(&[0xAAu8; 16]).unwrap();
        t.write(&[0xBBu8; 16]).unwrap();

        t.skip(0).unwrap();
        t.write(&[0xCCu8; 16]).unwrap();
        t.terminate().unwrap();

        t.skip(0).unwrap();
        let mut all = vec![0u8; 32];
        t.read_exact(&mut all).unwrap();
        assert_eq!(&all[..16], &[0xCCu8; 16][..]);
        assert_eq!(&all[16..], &[0xBBu8; 16][..]);
    }

    #[test]
    fn deterministic_ciphertext()
    {
        let key = [1u8; 32];
        let mut t1 = make_stream(key, 8);
        let mut t2 = make_stream(key, 8);
        let data = b"0123456789abcdef0123456789abcdef".to_vec();
        t1.write(&data).unwrap();
        t2.write(&data).unwrap();
        assert_eq!(t1.inner.as_slice(), t2.inner.as_slice());
    }
}
