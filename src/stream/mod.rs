//! Uniform byte-stream abstraction, per spec.md §4.1.
//!
//! Every layer in the stack (cache, sar, escape, tronconneuse, compressor)
//! is both a [`ByteStream`] consumer and a [`ByteStream`] implementor, so
//! they compose without the caller knowing how many layers sit below.

pub mod cache;
pub mod file;
pub mod mem;

use crate::error::CoreResult;

/// Which side of a stream a caller opened it for. A stream created
/// `ReadWrite` may still refuse to mix reads and writes without an
/// intervening `skip` — individual layers document their own rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Read,
    Write,
    ReadWrite,
}

/// The direction passed to [`ByteStream::skippable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipDirection {
    Forward,
    Backward,
}

pub trait ByteStream {
    /// Reads up to `buf.len()` bytes, returning how many were read. A
    /// short read is only legal at end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize>;

    /// Reads exactly `buf.len()` bytes or fails.
    fn read_exact(&mut self, buf: &mut [u8]) -> CoreResult<()>
    {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(crate::error::CoreError::data(
                    "unexpected end of stream".to_string(),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Writes all of `buf`; must complete or fail, never short-write.
    fn write(&mut self, buf: &[u8]) -> CoreResult<()>;

    /// Seeks to an absolute offset. Returns `false` if the offset could
    /// not be honoured (e.g. past a medium that hasn't been supplied yet).
    fn skip(&mut self, abs_offset: u64) -> CoreResult<bool>;

    /// Seeks by a signed offset relative to the current position.
    fn skip_relative(&mut self, delta: i64) -> CoreResult<bool>
    {
        let cur = self.get_position()?;
        let target = if delta >= 0 {
            cur.checked_add(delta as u64)
        } else {
            cur.checked_sub((-delta) as u64)
        };
        match target {
            Some(t) => self.skip(t),
            None => Ok(false),
        }
    }

    /// Seeks to end-of-stream.
    fn skip_to_eof(&mut self) -> CoreResult<bool>;

    /// Introspection: can the downstream skip `amount` bytes in
    /// `direction` cheaply (without reading/discarding through it)?
    fn skippable(&self, direction: SkipDirection, amount: u64) -> bool;

    /// Advisory prefetch; implementors may ignore this.
    fn read_ahead(&mut self, _amount: u64) -> CoreResult<()>
    {
        Ok(())
    }

    /// Truncates the stream at `abs_offset`. Optional; the default
    /// reports the feature as unavailable.
    fn truncate(&mut self, _abs_offset: u64) -> CoreResult<()>
    {
        Err(crate::error::CoreError::Feature(
            "truncate not supported by this stream".to_string(),
        ))
    }

    fn get_position(&mut self) -> CoreResult<u64>;

    /// Idempotent: flushes, releases all thread/OS resources. Layers that
    /// run background workers (the parallel cipher) must be explicitly
    /// terminated before being dropped — `Drop` only best-effort-cleans,
    /// per spec.md §9's note on exceptions crossing destructors.
    fn terminate(&mut self) -> CoreResult<()>;
}
