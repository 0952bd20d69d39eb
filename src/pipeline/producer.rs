//! Chunk producers.
//!
//! Compression reads fixed-size chunks through a single read-ahead buffer:
//! wait for a worker's free slot, swap buffers, dispatch, then read the
//! next chunk while the worker runs. With rabin splitting the read is
//! boundary-adjusted and the tail beyond the last cut point carries over
//! to the head of the next chunk.
//!
//! Decompression reads framed chunks: length first, then the body sized by
//! it, with the oversize gate applied before any allocation grows.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::config::PipelineConfig;
use crate::constants::{CHUNK_FLAG_SZ, COMPRESSED_CHUNKSZ};
use crate::container::ChunkError;
use crate::dedup::rabin::RabinChunker;
use crate::pipeline::{record_error, ChunkJob, ErrSlot, ProducerLink, Stats};
use crate::types::PcError;

/// Fill `buf` up to `chunksize`, starting with any carried-over tail. With
/// a splitter, full reads are truncated at the last rabin boundary and the
/// remainder becomes the next carry.
fn read_chunk<R: Read>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    carry: &mut Vec<u8>,
    chunksize: usize,
    splitter: Option<&RabinChunker>,
) -> std::io::Result<()> {
    buf.clear();
    buf.append(carry);

    let start = buf.len();
    buf.resize(chunksize, 0);
    let mut filled = start;
    while filled < chunksize {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);

    // Only a full chunk gets boundary-adjusted; the final short chunk ends
    // at EOF regardless of boundaries.
    if filled == chunksize {
        if let Some(chunker) = splitter {
            if let Some(cut) = chunker.last_boundary(buf) {
                carry.extend_from_slice(&buf[cut..]);
                buf.truncate(cut);
            }
        }
    }
    Ok(())
}

/// Compression producer. Consumes the links; dropping them on return is
/// what tells the workers the input is exhausted. Returns the number of
/// chunks dispatched.
pub(crate) fn run_compress_producer<R: Read>(
    reader: &mut R,
    links: Vec<ProducerLink>,
    cfg: &Arc<PipelineConfig>,
    cancel: &AtomicBool,
    errs: &ErrSlot,
) -> u64 {
    let splitter = if cfg.rabin_split {
        Some(RabinChunker::new(cfg.rab_blk_index))
    } else {
        None
    };
    let chunksize = cfg.chunksize as usize;

    let mut read_buf = Vec::new();
    let mut carry = Vec::new();
    let mut id = 0u64;
    let mut file_offset = 0u64;

    // Read the first chunk before entering the worker loop.
    if let Err(e) = read_chunk(reader, &mut read_buf, &mut carry, chunksize, splitter.as_ref()) {
        record_error(errs, cancel, PcError::Io(e));
        return 0;
    }

    'outer: loop {
        for link in &links {
            if cancel.load(Ordering::SeqCst) {
                break 'outer;
            }
            // Wait for this worker's previous chunk to be fully written.
            let (spare_in, spare_seg) = match link.free_rx.recv() {
                Ok(pair) => pair,
                Err(_) => break 'outer,
            };
            if read_buf.is_empty() {
                break 'outer;
            }

            let data = std::mem::replace(&mut read_buf, spare_in);
            let rbytes = data.len() as u64;
            if link
                .start_tx
                .send(ChunkJob {
                    id,
                    data,
                    seg: spare_seg,
                    file_offset,
                    wire_len: 0,
                })
                .is_err()
            {
                break 'outer;
            }
            id += 1;
            file_offset += rbytes;

            if cfg.single_chunk {
                read_buf.clear();
                continue;
            }
            // Read ahead while the worker runs.
            if let Err(e) =
                read_chunk(reader, &mut read_buf, &mut carry, chunksize, splitter.as_ref())
            {
                record_error(errs, cancel, PcError::Io(e));
                break 'outer;
            }
        }
    }
    id
}

/// Decompression producer: parses chunk headers and dispatches bodies.
/// Returns the number of chunks dispatched.
pub(crate) fn run_decompress_producer<R: Read>(
    reader: &mut R,
    links: Vec<ProducerLink>,
    cfg: &Arc<PipelineConfig>,
    cancel: &AtomicBool,
    errs: &ErrSlot,
    stats: &mut Stats,
) -> u64 {
    let max_len = cfg.chunksize + crate::constants::MAX_CHUNK_OVERRUN;
    let mut id = 0u64;

    'outer: loop {
        for link in &links {
            if cancel.load(Ordering::SeqCst) {
                break 'outer;
            }
            let (spare_data, spare_seg) = match link.free_rx.recv() {
                Ok(pair) => pair,
                Err(_) => break 'outer,
            };

            let mut len_be = [0u8; COMPRESSED_CHUNKSZ];
            if let Err(e) = reader.read_exact(&mut len_be) {
                let err = match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => {
                        PcError::Chunk(ChunkError::IncompleteHeader { chunk: id })
                    }
                    _ => PcError::Io(e),
                };
                record_error(errs, cancel, err);
                break 'outer;
            }
            let len_cmp = BigEndian::read_u64(&len_be);

            // Zero compressed length is the end-of-stream trailer.
            if len_cmp == 0 {
                break 'outer;
            }
            if len_cmp > max_len {
                record_error(
                    errs,
                    cancel,
                    PcError::Chunk(ChunkError::Oversize {
                        chunk: id,
                        len_cmp,
                        max: max_len,
                    }),
                );
                break 'outer;
            }

            let body = len_cmp as usize + cfg.cksum_bytes + cfg.mac_bytes + CHUNK_FLAG_SZ;
            let mut data = spare_data;
            data.clear();
            data.resize(body, 0);
            if let Err(e) = reader.read_exact(&mut data) {
                let err = match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => {
                        PcError::Chunk(ChunkError::Incomplete { chunk: id })
                    }
                    _ => PcError::Io(e),
                };
                record_error(errs, cancel, err);
                break 'outer;
            }

            stats.record(len_cmp);
            if link
                .start_tx
                .send(ChunkJob {
                    id,
                    data,
                    seg: spare_seg,
                    file_offset: 0,
                    wire_len: len_cmp,
                })
                .is_err()
            {
                break 'outer;
            }
            id += 1;
        }
    }
    id
}
