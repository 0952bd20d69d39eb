//! The parallel chunk pipeline.
//!
//! One producer reads chunks and hands them to N workers in strict
//! round-robin order; one writer collects results in the same order, so
//! output sequence equals input sequence regardless of per-chunk timing.
//!
//! The classic three-semaphore handshake (start / done / write-done) maps
//! onto bounded(1) channels: `start` carries the input buffer by move (the
//! zero-copy pointer swap), `done` carries the framed result to the writer,
//! and `free` returns the spent buffer pair to the producer. Each `free`
//! channel is pre-loaded once so the first cycle is unblocked. Global dedup
//! adds a ring of unit-token channels that serializes index access across
//! workers in chunk order.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{bounded, Receiver, Sender};

pub mod controller;
pub mod producer;
pub mod worker;
pub mod writer;

use crate::types::PcError;

/// A chunk travelling producer -> worker.
pub(crate) struct ChunkJob {
    pub id: u64,
    /// Compress: raw input bytes. Decompress: the framed chunk minus the
    /// length field (checksum | mac | flags | payload | original size).
    pub data: Vec<u8>,
    /// Recycled output buffer.
    pub seg: Vec<u8>,
    /// Compress only: absolute uncompressed offset of this chunk.
    pub file_offset: u64,
    /// Decompress only: the wire compressed length.
    pub wire_len: u64,
}

/// A finished chunk travelling worker -> writer. `len == 0` is the cancel
/// sentinel: the worker hit a fatal error and recorded it.
pub(crate) struct ChunkDone {
    pub id: u64,
    pub seg: Vec<u8>,
    pub spare: Vec<u8>,
    pub len: usize,
}

/// Producer-side endpoints. Dropping them closes the start channels, which
/// is how end-of-input (and cancellation) reaches the workers.
pub(crate) struct ProducerLink {
    pub start_tx: Sender<ChunkJob>,
    pub free_rx: Receiver<(Vec<u8>, Vec<u8>)>,
}

/// Writer-side endpoints.
pub(crate) struct WriterLink {
    pub done_rx: Receiver<ChunkDone>,
    pub free_tx: Sender<(Vec<u8>, Vec<u8>)>,
}

/// Endpoints handed to the worker itself.
pub(crate) struct WorkerPort {
    pub start_rx: Receiver<ChunkJob>,
    pub done_tx: Sender<ChunkDone>,
    /// Global dedup: this worker's index token and the next worker's.
    pub index_rx: Option<Receiver<()>>,
    pub index_tx: Option<Sender<()>>,
}

/// Build the channel mesh for `n` workers. When `ring` is set the index
/// token ring is created with worker 0's token pre-loaded; `ring_to_writer`
/// hands the forwarding side to the writer (decompression) instead of the
/// workers (compression).
pub(crate) fn build_links(
    n: usize,
    ring: bool,
    ring_to_writer: bool,
) -> (
    Vec<ProducerLink>,
    Vec<WriterLink>,
    Vec<WorkerPort>,
    Vec<Sender<()>>,
) {
    let mut producer_links = Vec::with_capacity(n);
    let mut writer_links = Vec::with_capacity(n);
    let mut ports = Vec::with_capacity(n);

    let mut ring_tx = Vec::new();
    let mut ring_rx = Vec::new();
    if ring {
        for _ in 0..n {
            let (tx, rx) = bounded::<()>(1);
            ring_tx.push(tx);
            ring_rx.push(rx);
        }
        // The first worker does not wait to access the index.
        ring_tx[0].send(()).unwrap();
    }

    for i in 0..n {
        let (start_tx, start_rx) = bounded::<ChunkJob>(1);
        let (done_tx, done_rx) = bounded::<ChunkDone>(1);
        let (free_tx, free_rx) = bounded::<(Vec<u8>, Vec<u8>)>(1);
        // Pre-load so the first producer cycle is unblocked.
        free_tx.send((Vec::new(), Vec::new())).unwrap();

        let index_rx = if ring { Some(ring_rx.remove(0)) } else { None };
        let index_tx = if ring && !ring_to_writer {
            Some(ring_tx[(i + 1) % n].clone())
        } else {
            None
        };

        producer_links.push(ProducerLink { start_tx, free_rx });
        writer_links.push(WriterLink { done_rx, free_tx });
        ports.push(WorkerPort {
            start_rx,
            done_tx,
            index_rx,
            index_tx,
        });
    }

    let writer_ring = if ring && ring_to_writer { ring_tx } else { Vec::new() };
    (producer_links, writer_links, ports, writer_ring)
}

/// First fatal error wins; later ones are dropped.
pub(crate) type ErrSlot = Arc<Mutex<Option<PcError>>>;

pub(crate) fn record_error(slot: &ErrSlot, cancel: &AtomicBool, err: PcError) {
    tracing::error!("{}", err);
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
    }
    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
}

/// Run statistics, shown with `-C`.
#[derive(Debug, Clone)]
pub struct Stats {
    pub chunks: u64,
    pub largest: u64,
    pub smallest: u64,
    pub total: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            chunks: 0,
            largest: 0,
            smallest: u64::MAX,
            total: 0,
        }
    }
}

impl Stats {
    pub fn record(&mut self, len: u64) {
        self.chunks += 1;
        self.largest = self.largest.max(len);
        self.smallest = self.smallest.min(len);
        self.total += len;
    }

    pub fn display(&self, chunksize: u64) {
        if self.chunks == 0 {
            return;
        }
        let pct = |v: u64| (v as f64 / chunksize as f64) * 100.0;
        eprintln!("\nCompression Statistics");
        eprintln!("======================");
        eprintln!("Total chunks           : {}", self.chunks);
        eprintln!(
            "Best compressed chunk  : {}({:.2}%)",
            crate::utils::bytes_to_size(self.smallest),
            pct(self.smallest)
        );
        eprintln!(
            "Worst compressed chunk : {}({:.2}%)",
            crate::utils::bytes_to_size(self.largest),
            pct(self.largest)
        );
        let avg = self.total / self.chunks;
        eprintln!(
            "Avg compressed chunk   : {}({:.2}%)\n",
            crate::utils::bytes_to_size(avg),
            pct(avg)
        );
    }
}
