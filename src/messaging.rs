//! Typed-message framing for cross-thread/cross-process dialogue, per
//! spec.md §4.12 and SPEC_FULL.md §3 item 4.
//!
//! Used by (a) the parallel cipher's feedback channel in spirit (that one
//! runs over `crossbeam-channel`, not this wire format, since it never
//! leaves the process) and (b) the "slave mode" where one process reads
//! an archive and a second drives it over two pipes, each end wrapping a
//! [`ByteStream`] in a [`MessageWriter`]/[`MessageReader`] pair.
//!
//! Each frame on the wire is a `u8` kind tag, a `u32` big-endian body
//! length, then the body itself. Fixed-size kinds carry an empty body;
//! variable ones are encoded through [`crate::wire`]. `sync_write` is the
//! one kind whose payload is unbounded, so it gets the "-begin" framing
//! the original splits large bodies over: [`send_sync_write`] chunks at
//! [`CHUNK_LEN`] and [`recv_sync_write`] reassembles.

use crate::error::{CoreError, CoreResult};
use crate::stream::ByteStream;
use crate::wire;

/// Matches [`crate::stream::SkipDirection`] but kept local so this module
/// doesn't need that trait's other types in scope at every call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl From<crate::stream::SkipDirection> for Direction {
    fn from(d: crate::stream::SkipDirection) -> Self
    {
        match d {
            crate::stream::SkipDirection::Forward => Direction::Forward,
            crate::stream::SkipDirection::Backward => Direction::Backward,
        }
    }
}

/// A single frame exchanged between the two ends of a slave-mode session.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Read,
    ReadAhead(u64),
    ReadEof,
    SyncWrite(Vec<u8>),
    /// Signals that more `SyncWrite` frames carrying the same logical
    /// write follow; reassembly ends at the first empty-bodied one.
    SyncWriteBegin(Vec<u8>),
    Skip(u64),
    SkipToEof,
    SkipForward(u64),
    SkipBackward(u64),
    SkipDone,
    Skippable(Direction, u64),
    SkippableAck(bool),
    GetPosition,
    PositionAck(u64),
    Exception(String),
    EndOfXmit,
    StopReadahead,
    ReadaheadStopped,
}

/// Frames larger than a `sync_write` sends are split across this many
/// bytes per frame, the way the original keeps the underlying pipe's
/// buffer from needing an unbounded allocation.
pub const CHUNK_LEN: usize = 64 * 1024;

fn encode(msg: &Message) -> CoreResult<(u8, Vec<u8>)>
{
    Ok(match msg {
        Message::Read => (0, Vec::new()),
        Message::ReadAhead(amount) => (1, wire::serialize(amount)?),
        Message::ReadEof => (2, Vec::new()),
        Message::SyncWrite(data) => (3, data.clone()),
        Message::SyncWriteBegin(data) => (4, data.clone()),
        Message::Skip(abs) => (5, wire::serialize(abs)?),
        Message::SkipToEof => (6, Vec::new()),
        Message::SkipForward(n) => (7, wire::serialize(n)?),
        Message::SkipBackward(n) => (8, wire::serialize(n)?),
        Message::SkipDone => (9, Vec::new()),
        Message::Skippable(dir, amount) => {
            let dir_tag: u8 = match dir {
                Direction::Forward => 0,
                Direction::Backward => 1,
            };
            (10, wire::serialize(&(dir_tag, *amount))?)
        }
        Message::SkippableAck(ok) => (11, wire::serialize(ok)?),
        Message::GetPosition => (12, Vec::new()),
        Message::PositionAck(pos) => (13, wire::serialize(pos)?),
        Message::Exception(text) => (14, wire::serialize(text)?),
        Message::EndOfXmit => (15, Vec::new()),
        Message::StopReadahead => (16, Vec::new()),
        Message::ReadaheadStopped => (17, Vec::new()),
    })
}

fn decode(tag: u8, body: &[u8]) -> CoreResult<Message>
{
    Ok(match tag {
        0 => Message::Read,
        1 => Message::ReadAhead(wire::deserialize(body)?),
        2 => Message::ReadEof,
        3 => Message::SyncWrite(body.to_vec()),
        4 => Message::SyncWriteBegin(body.to_vec()),
        5 => Message::Skip(wire::deserialize(body)?),
        6 => Message::SkipToEof,
        7 => Message::SkipForward(wire::deserialize(body)?),
        8 => Message::SkipBackward(wire::deserialize(body)?),
        9 => Message::SkipDone,
        10 => {
            let (dir_tag, amount): (u8, u64) = wire::deserialize(body)?;
            let dir = match dir_tag {
                0 => Direction::Forward,
                1 => Direction::Backward,
                other => return Err(CoreError::data(format!("bad skip direction tag {other}"))),
            };
            Message::Skippable(dir, amount)
        }
        11 => Message::SkippableAck(wire::deserialize(body)?),
        12 => Message::GetPosition,
        13 => Message::PositionAck(wire::deserialize(body)?),
        14 => Message::Exception(wire::deserialize(body)?),
        15 => Message::EndOfXmit,
        16 => Message::StopReadahead,
        17 => Message::ReadaheadStopped,
        other => return Err(CoreError::data(format!("unknown message kind tag {other}"))),
    })
}

/// Writes frames onto any [`ByteStream`] (a pipe, a socket, or in tests an
/// in-memory buffer).
pub struct MessageWriter<S: ByteStream> {
    inner: S,
}

impl<S: ByteStream> MessageWriter<S> {
    pub fn new(inner: S) -> Self
    {
        Self { inner }
    }

    pub fn into_inner(self) -> S
    {
        self.inner
    }

    pub fn send(&mut self, msg: &Message) -> CoreResult<()>
    {
        let (tag, body) = encode(msg)?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::Limit("message body exceeds 4 GiB".to_string()))?;
        self.inner.write(&[tag])?;
        self.inner.write(&len.to_be_bytes())?;
        self.inner.write(&body)?;
        Ok(())
    }
}

/// Reads frames back off a [`ByteStream`].
pub struct MessageReader<S: ByteStream> {
    inner: S,
}

impl<S: ByteStream> MessageReader<S> {
    pub fn new(inner: S) -> Self
    {
        Self { inner }
    }

    pub fn into_inner(self) -> S
    {
        self.inner
    }

    pub fn recv(&mut self) -> CoreResult<Message>
    {
        let mut tag = [0u8; 1];
        self.inner.read_exact(&mut tag)?;
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body)?;
        decode(tag[0], &body)
    }
}

/// Sends `data` as one or more `sync_write` frames, chunking at
/// [`CHUNK_LEN`] and prefixing with `sync_write-begin` when it doesn't
/// fit in one frame.
pub fn send_sync_write<S: ByteStream>(w: &mut MessageWriter<S>, data: &[u8]) -> CoreResult<()>
{
    if data.len() <= CHUNK_LEN {
        return w.send(&Message::SyncWrite(data.to_vec()));
    }
    let mut chunks = data.chunks(CHUNK_LEN);
    w.send(&Message::SyncWriteBegin(chunks.next().unwrap().to_vec()))?;
    for chunk in chunks {
        w.send(&Message::SyncWrite(chunk.to_vec()))?;
    }
    // An empty frame unambiguously ends the transfer even when the data
    // length is an exact multiple of CHUNK_LEN.
    w.send(&Message::SyncWrite(Vec::new()))
}

/// The receiving half of [`send_sync_write`].
pub fn recv_sync_write<S: ByteStream>(r: &mut MessageReader<S>) -> CoreResult<Vec<u8>>
{
    match r.recv()? {
        Message::SyncWrite(data) => Ok(data),
        Message::SyncWriteBegin(first) => {
            let mut out = first;
            loop {
                match r.recv()? {
                    Message::SyncWrite(chunk) if chunk.is_empty() => break,
                    Message::SyncWrite(chunk) => out.extend_from_slice(&chunk),
                    other => {
                        return Err(CoreError::bug(
                            "messaging_sync_write",
                            format!("unexpected message mid-transfer: {other:?}"),
                        ))
                    }
                }
            }
            Ok(out)
        }
        other => Err(CoreError::data(format!("expected sync_write, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mem::MemStream;
    use crate::stream::Mode;

    #[test]
    fn small_messages_roundtrip()
    {
        let mut w = MessageWriter::new(MemStream::new(Mode::ReadWrite));
        w.send(&Message::Read).unwrap();
        w.send(&Message::Skip(4096)).unwrap();
        w.send(&Message::Skippable(Direction::Backward, 12)).unwrap();
        w.send(&Message::Exception("disk full".to_string())).unwrap();
        w.send(&Message::EndOfXmit).unwrap();

        let mut inner = w.into_inner();
        inner.skip(0).unwrap();
        let mut r = MessageReader::new(inner);
        assert_eq!(r.recv().unwrap(), Message::Read);
        assert_eq!(r.recv().unwrap(), Message::Skip(4096));
        assert_eq!(r.recv().unwrap(), Message::Skippable(Direction::Backward, 12));
        assert_eq!(r.recv().unwrap(), Message::Exception("disk full".to_string()));
        assert_eq!(r.recv().unwrap(), Message::EndOfXmit);
    }

    #[test]
    fn sync_write_below_chunk_len_is_a_single_frame()
    {
        let mut w = MessageWriter::new(MemStream::new(Mode::ReadWrite));
        send_sync_write(&mut w, b"small payload").unwrap();
        let mut inner = w.into_inner();
        inner.skip(0).unwrap();
        let mut r = MessageReader::new(inner);
        assert_eq!(recv_sync_write(&mut r).unwrap(), b"small payload".to_vec());
    }

    #[test]
    fn sync_write_spanning_multiple_frames_reassembles()
    {
        let data: Vec<u8> = (0..(CHUNK_LEN * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let mut w = MessageWriter::new(MemStream::new(Mode::ReadWrite));
        send_sync_write(&mut w, &data).unwrap();
        let mut inner = w.into_inner();
        inner.skip(0).unwrap();
        let mut r = MessageReader::new(inner);
        assert_eq!(recv_sync_write(&mut r).unwrap(), data);
    }

    #[test]
    fn sync_write_exact_multiple_of_chunk_len_still_terminates()
    {
        let data = vec![7u8; CHUNK_LEN * 2];
        let mut w = MessageWriter::new(MemStream::new(Mode::ReadWrite));
        send_sync_write(&mut w, &data).unwrap();
        let mut inner = w.into_inner();
        inner.skip(0).unwrap();
        let mut r = MessageReader::new(inner);
        assert_eq!(recv_sync_write(&mut r).unwrap(), data);
    }
}
