//! Parallel block cipher frame, per spec.md §4.6.
//!
//! Same contract as the sequential [`super::tronconneuse::Tronconneuse`],
//! backed by a feeder thread, a fixed pool of worker threads, and a
//! drainer, talking over two bounded `crossbeam-channel` queues. Grounded
//! on `dswd-zvault`'s plain `crossbeam` dependency — the closest domain
//! sibling (a deduplicating backup tool) in the whole retrieval pack —
//! generalized here from its ad hoc worker spawns into the
//! feeder/worker/drainer topology spec.md names explicitly.
//!
//! [`ParallelDecryptor`] and [`ParallelEncryptor`] are thin, direction-
//! specific faces on the same [`ParallelCipherEngine`]: the feeder reads
//! encrypted blocks from below (decrypt) or takes clear blocks from the
//! caller (encrypt), N workers run the matching `cipher_op`, and the
//! drainer hands finished blocks back to the caller in submission order
//! through [`ParallelCipherEngine::next_block`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::crypto::{decrypt_block, encrypt_block, encrypted_block_size_for, CipherAlgo};
use crate::error::{CoreError, CoreResult};

/// Control flags exchanged on the queues instead of data, per spec.md
/// §4.6 "Control flags".
#[derive(Clone, Debug)]
enum Segment {
    Normal { index: u64, data: Vec<u8> },
    Stop,
    Eof,
    Die,
    DataError { index: u64, message: String },
    ExceptionBelow(String),
    ExceptionWorker(String),
}

/// A cipher block operation, matched by [`decrypt_block`] and
/// [`encrypt_block`]'s shared signature so one worker loop serves both
/// directions.
type CipherOp = fn(&[u8; 32], u64, &[u8], CipherAlgo) -> CoreResult<Vec<u8>>;

/// Heap capacity formula from spec.md §4.6: `2*ratelier + N + ratelier +
/// 2`, `ratelier` being the queue capacity. Exposed as a named constant
/// per spec.md §9 open question (b): "the port should expose it as a
/// constant and retest."
pub fn heap_capacity(ratelier: usize, workers: usize) -> usize
{
    2 * ratelier + workers + ratelier + 2
}

/// Feeds `blocks` onto `tx` in order, one `Eof` per worker once
/// exhausted so the multi-consumer scatter queue wakes every worker
/// (not just whichever happens to dequeue a single sentinel). Bails out
/// early, without the trailing `Eof`s, once `stop_flag` is raised by a
/// [`ParallelCipherEngine::seek`] in progress — the new feeder spawned
/// there takes over emitting `Eof` for the repositioned run.
fn spawn_feeder(
    tx: Sender<Segment>,
    stop_flag: Arc<AtomicBool>,
    workers: usize,
    mut blocks: impl Iterator<Item = (u64, Vec<u8>)> + Send + 'static,
) -> thread::JoinHandle<()>
{
    thread::spawn(move || {
        for (index, data) in &mut blocks {
            if stop_flag.load(Ordering::Acquire) {
                return;
            }
            if tx.send(Segment::Normal { index, data }).is_err() {
                return;
            }
        }
        for _ in 0..workers {
            let _ = tx.send(Segment::Eof);
        }
    })
}

/// Runs `cipher_op` over every `Normal` segment it receives until `Die`
/// or the scatter queue closes. `Eof` is forwarded to the gather queue
/// rather than treated as a reason to exit, since a [`ParallelCipherEngine::seek`]
/// may still reposition the feeder and send more work; only `Die` (sent
/// by [`ParallelCipherEngine::terminate`]) ends the thread. `Stop` is
/// acknowledged on the gather queue and then parks at `barrier` until
/// the seek in progress releases it.
fn spawn_worker(
    rx: Receiver<Segment>,
    tx: Sender<Segment>,
    barrier: Arc<Barrier>,
    key: [u8; 32],
    algo: CipherAlgo,
    cipher_op: CipherOp,
) -> thread::JoinHandle<()>
{
    thread::spawn(move || loop {
        match rx.recv() {
            Ok(Segment::Normal { index, data }) => match cipher_op(&key, index, &data, algo) {
                Ok(out) => {
                    if tx.send(Segment::Normal { index, data: out }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Segment::DataError {
                        index,
                        message: e.to_string(),
                    });
                }
            },
            Ok(Segment::Eof) => {
                let _ = tx.send(Segment::Eof);
            }
            Ok(Segment::Stop) => {
                let _ = tx.send(Segment::Stop);
                barrier.wait();
            }
            Ok(Segment::Die) | Err(_) => return,
            Ok(other) => {
                let _ = tx.send(other);
            }
        }
    })
}

/// The feeder/worker/drainer engine shared by [`ParallelDecryptor`] and
/// [`ParallelEncryptor`]; the only thing that differs between the two
/// directions is which [`CipherOp`] the workers run.
struct ParallelCipherEngine {
    key: [u8; 32],
    algo: CipherAlgo,
    cipher_op: CipherOp,
    scatter_tx: Sender<Segment>,
    scatter_rx: Receiver<Segment>,
    gather_rx: Receiver<Segment>,
    barrier: Arc<Barrier>,
    stop_flag: Arc<AtomicBool>,
    /// `handles[0]` is always the current feeder; the rest are workers.
    handles: Vec<thread::JoinHandle<()>>,
    workers: usize,
    next_index: u64,
    total_blocks: u64,
    pending: BTreeMap<u64, Vec<u8>>,
    died: bool,
}

impl ParallelCipherEngine {
    fn spawn(
        key: [u8; 32],
        algo: CipherAlgo,
        cipher_op: CipherOp,
        ratelier: usize,
        workers: usize,
        total_blocks: u64,
        blocks: impl Iterator<Item = (u64, Vec<u8>)> + Send + 'static,
    ) -> Self
    {
        let (scatter_tx, scatter_rx) = bounded::<Segment>(ratelier);
        let (gather_tx, gather_rx) = bounded::<Segment>(ratelier);
        let barrier = Arc::new(Barrier::new(workers + 1));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let feeder = spawn_feeder(scatter_tx.clone(), Arc::clone(&stop_flag), workers, blocks);
        let mut handles = vec![feeder];
        for _ in 0..workers {
            handles.push(spawn_worker(
                scatter_rx.clone(),
                gather_tx.clone(),
                Arc::clone(&barrier),
                key,
                algo,
                cipher_op,
            ));
        }

        Self {
            key,
            algo,
            cipher_op,
            scatter_tx,
            scatter_rx,
            gather_rx,
            barrier,
            stop_flag,
            handles,
            workers,
            next_index: 0,
            total_blocks,
            pending: BTreeMap::new(),
            died: false,
        }
    }

    /// Delivers blocks in increasing block-index order, per spec.md
    /// §4.6 "Ordering" — decrypted clear blocks on the read side,
    /// finished ciphertext in submission order on the write side.
    fn next_block(&mut self) -> CoreResult<Option<Vec<u8>>>
    {
        if self.died {
            return Err(CoreError::bug("parallel_cipher_ordering", "engine already died"));
        }
        if self.next_index >= self.total_blocks {
            return Ok(None);
        }
        loop {
            if let Some(data) = self.pending.remove(&self.next_index) {
                self.next_index += 1;
                return Ok(Some(data));
            }
            match self.gather_rx.recv() {
                Ok(Segment::Normal { index, data }) => {
                    self.pending.insert(index, data);
                }
                Ok(Segment::Eof) => continue,
                Ok(Segment::DataError { index, message }) => {
                    self.died = true;
                    return Err(CoreError::data(format!("block {index}: {message}")));
                }
                Ok(Segment::ExceptionWorker(msg)) | Ok(Segment::ExceptionBelow(msg)) => {
                    self.died = true;
                    return Err(CoreError::bug("parallel_cipher_worker", msg));
                }
                Ok(Segment::Stop) | Ok(Segment::Die) => continue,
                Err(_) => return Ok(None),
            }
        }
    }

    /// Implements spec.md §4.6 "Seek semantics on reads": raises `stop`,
    /// drains one ack per worker plus whatever the old feeder had
    /// already queued, flushes the scatter queue, repositions the
    /// feeder at `new_next_index`, and resumes.
    ///
    /// Callers only need this when the target offset falls outside the
    /// region already queued or produced; a target still covered by
    /// `pending` should just keep calling [`Self::next_block`] instead
    /// (popping from the gather queue without stopping workers).
    fn seek(
        &mut self,
        new_next_index: u64,
        new_total_blocks: u64,
        new_blocks: impl Iterator<Item = (u64, Vec<u8>)> + Send + 'static,
    ) -> CoreResult<()>
    {
        if self.died {
            return Err(CoreError::bug("parallel_cipher_ordering", "engine already died"));
        }

        self.stop_flag.store(true, Ordering::Release);
        for _ in 0..self.workers {
            let _ = self.scatter_tx.send(Segment::Stop);
        }

        let mut acks = 0;
        while acks < self.workers {
            match self.gather_rx.recv() {
                Ok(Segment::Stop) => acks += 1,
                Ok(Segment::Normal { index, data }) => {
                    self.pending.insert(index, data);
                }
                Ok(Segment::Eof) | Ok(Segment::Die) => {}
                Ok(Segment::DataError { index, message }) => {
                    self.died = true;
                    return Err(CoreError::data(format!("block {index}: {message}")));
                }
                Ok(Segment::ExceptionWorker(msg)) | Ok(Segment::ExceptionBelow(msg)) => {
                    self.died = true;
                    return Err(CoreError::bug("parallel_cipher_worker", msg));
                }
                Err(_) => {
                    self.died = true;
                    return Err(CoreError::bug("parallel_cipher_ordering", "gather queue closed during seek"));
                }
            }
        }

        // Every worker is now parked at the barrier: nothing is reading
        // the scatter queue, so draining it here cannot race a worker
        // picking up a stale block meant for the old position.
        while self.scatter_rx.try_recv().is_ok() {}

        let old_feeder = self.handles.remove(0);
        let _ = old_feeder.join();

        self.pending.clear();
        self.next_index = new_next_index;
        self.total_blocks = new_total_blocks;
        self.stop_flag.store(false, Ordering::Release);

        let feeder = spawn_feeder(self.scatter_tx.clone(), Arc::clone(&self.stop_flag), self.workers, new_blocks);
        self.handles.insert(0, feeder);

        self.barrier.wait();
        Ok(())
    }

    /// Sends `die` to all workers and joins every thread, per spec.md
    /// §4.6 "Cancellation".
    fn terminate(mut self) -> CoreResult<()>
    {
        for _ in 0..self.workers {
            let _ = self.scatter_tx.send(Segment::Die);
        }
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
        Ok(())
    }
}

/// A parallel decrypting reader: the feeder reads encrypted blocks from
/// `source`, N workers decrypt, the drainer reassembles them in order.
pub struct ParallelDecryptor {
    engine: ParallelCipherEngine,
    clear_block_size: usize,
}

impl ParallelDecryptor {
    /// Spawns `workers` decrypting threads plus a feeder that reads
    /// `blocks` (already-chunked ciphertext) in order and pushes them to
    /// the scatter queue.
    ///
    /// `total_blocks` must equal the number of items `blocks` yields: it
    /// is how [`Self::next_block`] tells "a fast worker's `Eof` arrived
    /// early" apart from "every block has actually been produced",
    /// without which the two are indistinguishable from the gather side.
    pub fn spawn(
        key: [u8; 32],
        algo: CipherAlgo,
        clear_block_size: usize,
        ratelier: usize,
        workers: usize,
        total_blocks: u64,
        blocks: impl Iterator<Item = (u64, Vec<u8>)> + Send + 'static,
    ) -> Self
    {
        Self {
            engine: ParallelCipherEngine::spawn(key, algo, decrypt_block, ratelier, workers, total_blocks, blocks),
            clear_block_size,
        }
    }

    pub fn next_block(&mut self) -> CoreResult<Option<Vec<u8>>>
    {
        self.engine.next_block()
    }

    pub fn clear_block_size(&self) -> usize
    {
        self.clear_block_size
    }

    /// Repositions the feeder to read `new_blocks` (ciphertext starting
    /// at `new_next_index`) instead of wherever the current feeder was,
    /// per spec.md §4.6 "Seek semantics on reads".
    pub fn seek(
        &mut self,
        new_next_index: u64,
        new_total_blocks: u64,
        new_blocks: impl Iterator<Item = (u64, Vec<u8>)> + Send + 'static,
    ) -> CoreResult<()>
    {
        self.engine.seek(new_next_index, new_total_blocks, new_blocks)
    }

    pub fn terminate(self) -> CoreResult<()>
    {
        self.engine.terminate()
    }
}

/// A parallel encrypting writer: the feeder takes clear blocks from the
/// caller, N workers encrypt, the drainer hands finished ciphertext
/// back in submission order for the caller to write out — same contract
/// as [`ParallelDecryptor`], mirrored per spec.md §4.6 component table
/// entry 7 ("same contract as (6)").
pub struct ParallelEncryptor {
    engine: ParallelCipherEngine,
    clear_block_size: usize,
    algo: CipherAlgo,
}

impl ParallelEncryptor {
    /// Spawns `workers` encrypting threads plus a feeder that takes
    /// `blocks` (clear data, already chunked to `clear_block_size` by
    /// the caller) in submission order.
    pub fn spawn(
        key: [u8; 32],
        algo: CipherAlgo,
        clear_block_size: usize,
        ratelier: usize,
        workers: usize,
        total_blocks: u64,
        blocks: impl Iterator<Item = (u64, Vec<u8>)> + Send + 'static,
    ) -> Self
    {
        Self {
            engine: ParallelCipherEngine::spawn(key, algo, encrypt_block, ratelier, workers, total_blocks, blocks),
            clear_block_size,
            algo,
        }
    }

    /// Delivers finished ciphertext blocks in submission order, per
    /// spec.md §4.6 "Ordering" — "on write side, block index is
    /// assigned at submission."
    pub fn next_block(&mut self) -> CoreResult<Option<Vec<u8>>>
    {
        self.engine.next_block()
    }

    pub fn clear_block_size(&self) -> usize
    {
        self.clear_block_size
    }

    pub fn encrypted_block_size(&self) -> usize
    {
        encrypted_block_size_for(self.clear_block_size, self.algo)
    }

    /// Repositions the feeder to take `new_blocks` (clear data starting
    /// at `new_next_index`) instead of wherever the current feeder was,
    /// per spec.md §4.6 "Seek semantics on reads" (the write side uses
    /// the same stop/resume handshake when the caller reseeks).
    pub fn seek(
        &mut self,
        new_next_index: u64,
        new_total_blocks: u64,
        new_blocks: impl Iterator<Item = (u64, Vec<u8>)> + Send + 'static,
    ) -> CoreResult<()>
    {
        self.engine.seek(new_next_index, new_total_blocks, new_blocks)
    }

    pub fn terminate(self) -> CoreResult<()>
    {
        self.engine.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_block, encrypt_block};

    #[test]
    fn equivalent_to_sequential_decryption()
    {
        let key = [11u8; 32];
        let algo = CipherAlgo::Aes256Gcm;
        let clear_block_size = 32usize;
        let clear: Vec<u8> = (0..10 * clear_block_size as u32).map(|i| (i % 250) as u8).collect();

        let mut encrypted_blocks = Vec::new();
        for (i, chunk) in clear.chunks(clear_block_size).enumerate() {
            let c = encrypt_block(&key, i as u64, chunk, algo).unwrap();
            encrypted_blocks.push((i as u64, c));
        }

        let expected: Vec<Vec<u8>> = clear.chunks(clear_block_size).map(|c| c.to_vec()).collect();

        let total = encrypted_blocks.len() as u64;
        let mut decryptor = ParallelDecryptor::spawn(
            key,
            algo,
            clear_block_size,
            4,
            4,
            total,
            encrypted_blocks.into_iter(),
        );

        let mut got = Vec::new();
        while let Some(block) = decryptor.next_block().unwrap() {
            got.push(block);
        }
        decryptor.terminate().unwrap();

        assert_eq!(got, expected);
    }

    #[test]
    fn equivalent_to_sequential_encryption()
    {
        let key = [17u8; 32];
        let algo = CipherAlgo::Aes256Gcm;
        let clear_block_size = 24usize;
        let clear: Vec<u8> = (0..8 * clear_block_size as u32).map(|i| (i % 200) as u8).collect();

        let clear_blocks: Vec<(u64, Vec<u8>)> = clear
            .chunks(clear_block_size)
            .enumerate()
            .map(|(i, c)| (i as u64, c.to_vec()))
            .collect();

        let expected: Vec<Vec<u8>> = clear_blocks
            .iter()
            .map(|(i, c)| encrypt_block(&key, *i, c, algo).unwrap())
            .collect();

        let total = clear_blocks.len() as u64;
        let mut encryptor = ParallelEncryptor::spawn(
            key,
            algo,
            clear_block_size,
            3,
            3,
            total,
            clear_blocks.into_iter(),
        );

        let mut got = Vec::new();
        while let Some(block) = encryptor.next_block().unwrap() {
            got.push(block);
        }
        encryptor.terminate().unwrap();

        assert_eq!(got, expected);
        // Ciphertext isn't directly comparable to clear input, but it
        // must round-trip back through the sequential decrypter.
        for (i, (c, e)) in got.iter().zip(expected.iter()).enumerate() {
            assert_eq!(c, e);
            assert_eq!(decrypt_block(&key, i as u64, c, algo).unwrap(), clear_blocks_clear(&clear, clear_block_size, i));
        }
    }

    fn clear_blocks_clear(clear: &[u8], clear_block_size: usize, index: usize) -> Vec<u8>
    {
        clear.chunks(clear_block_size).nth(index).unwrap().to_vec()
    }

    #[test]
    fn heap_capacity_matches_formula()
    {
        assert_eq!(heap_capacity(4, 4), 2 * 4 + 4 + 4 + 2);
    }

    /// A `skip` landing outside the already-queued region stops all
    /// workers, drains their acks, and repositions the feeder — per
    /// spec.md §4.6 "Seek semantics on reads". This reads blocks 0-1,
    /// then reseeks straight to block 4, skipping 2-3 entirely.
    #[test]
    fn seek_skips_ahead_and_resumes_from_new_position()
    {
        let key = [23u8; 32];
        let algo = CipherAlgo::Aes256Gcm;
        let clear_block_size = 16usize;
        let clear: Vec<u8> = (0..6 * clear_block_size as u32).map(|i| (i % 200) as u8).collect();

        let expected: Vec<Vec<u8>> = clear.chunks(clear_block_size).map(|c| c.to_vec()).collect();
        let encrypted: Vec<(u64, Vec<u8>)> = expected
            .iter()
            .enumerate()
            .map(|(i, c)| (i as u64, encrypt_block(&key, i as u64, c, algo).unwrap()))
            .collect();

        // Only the first two blocks are handed to the initial feeder, as
        // if a caller had only queued up through the point of a skip.
        let first_run = encrypted[..2].to_vec();
        let mut decryptor = ParallelDecryptor::spawn(key, algo, clear_block_size, 2, 2, 6, first_run.into_iter());

        assert_eq!(decryptor.next_block().unwrap(), Some(expected[0].clone()));
        assert_eq!(decryptor.next_block().unwrap(), Some(expected[1].clone()));

        let resumed = encrypted[4..].to_vec();
        decryptor.seek(4, 6, resumed.into_iter()).unwrap();

        assert_eq!(decryptor.next_block().unwrap(), Some(expected[4].clone()));
        assert_eq!(decryptor.next_block().unwrap(), Some(expected[5].clone()));
        assert_eq!(decryptor.next_block().unwrap(), None);

        decryptor.terminate().unwrap();
    }
}
