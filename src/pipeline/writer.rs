//! Ordered writer.
//!
//! Walks the worker array in the same round-robin order the producer used,
//! so the output byte stream is in chunk-id order no matter how long any
//! individual chunk took. A zero-length result is the cancel sentinel: the
//! writer cascades the cancellation and exits.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::Sender;

use crate::pipeline::{record_error, ErrSlot, Stats, WriterLink};
use crate::types::PcError;

pub(crate) struct WriterCfg {
    /// Record per-chunk sizes (compression side).
    pub collect_stats: bool,
    /// Decompression with global dedup: forward each worker's ring token
    /// after its chunk is safely on disk.
    pub ring_next: Vec<Sender<()>>,
}

/// Returns the stats collected. On any failure the cancel flag is set and
/// the error recorded before returning.
pub(crate) fn run_writer<W: Write>(
    out: &mut W,
    links: Vec<WriterLink>,
    cancel: &AtomicBool,
    errs: &ErrSlot,
    wcfg: WriterCfg,
) -> Stats {
    let n = links.len();
    let mut stats = Stats::default();

    'outer: loop {
        for (i, link) in links.iter().enumerate() {
            let done = match link.done_rx.recv() {
                Ok(d) => d,
                // Channel closed: the pipeline drained (or died; the cancel
                // flag distinguishes the two for the controller).
                Err(_) => break 'outer,
            };

            if done.len == 0 {
                // Cancel cascade; the worker already recorded its error.
                cancel.store(true, Ordering::SeqCst);
                break 'outer;
            }

            if let Err(e) = out.write_all(&done.seg[..done.len]) {
                record_error(errs, cancel, PcError::Io(e));
                break 'outer;
            }

            if wcfg.collect_stats {
                stats.record(done.len as u64);
            }

            // The chunk is on disk: let the next worker at the shared index.
            if !wcfg.ring_next.is_empty() {
                let _ = wcfg.ring_next[(i + 1) % n].send(());
            }

            // Free the worker slot for the producer.
            let _ = link.free_tx.send((done.spare, done.seg));
        }
    }
    stats
}
