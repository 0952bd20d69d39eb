//! Worker tasks: the per-chunk transform pipeline.
//!
//! Compression: checksum -> dedup -> preprocess -> backend -> encrypt ->
//! frame -> authenticate. Decompression inverts strictly, verifying
//! authentication before touching the payload and the plaintext checksum
//! after reconstruction.
//!
//! Buffer discipline: the input buffer arrives by move, the frame is built
//! in the recycled `seg` buffer, and both leave through the writer. The
//! worker keeps scratch buffers for the dedup region and index staging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::checksum::compute_checksum;
use crate::codec::{self, Codec};
use crate::config::PipelineConfig;
use crate::constants::chunk_flags::{
    ADAPT_MASK, ADAPT_SHIFT, CHSIZE_MASK, CHUNK_FLAG_DEDUP, CHUNK_FLAG_PREPROC, COMPRESSED,
};
use crate::constants::{CHUNK_FLAG_SZ, COMPRESSED_CHUNKSZ, ORIGINAL_CHUNKSZ};
use crate::container::ChunkError;
use crate::crypto::{ChunkMac, CryptoCtx};
use crate::dedup::{transpose, DedupCtx, DedupError, DedupHdr, DEDUP_HDR_SIZE};
use crate::pipeline::{record_error, ChunkDone, ChunkJob, ErrSlot, WorkerPort};
use crate::preproc::Preprocessor;
use crate::types::PcError;

pub(crate) struct Worker {
    cfg: Arc<PipelineConfig>,
    codec: Box<dyn Codec>,
    pre: Preprocessor,
    dedup: Option<DedupCtx>,
    mac: Option<ChunkMac>,
    crypto: Option<Arc<CryptoCtx>>,
    scratch: Vec<u8>,
    tmp: Vec<u8>,
    cancel: Arc<AtomicBool>,
    errs: ErrSlot,
}

struct PayloadOutcome {
    compressed: bool,
    preproc: bool,
    sub: u8,
    len: usize,
}

/// Compress `src`, appending the payload to `seg`. Preprocessing (when
/// enabled) subsumes the backend call and its own fallback; otherwise the
/// backend result is kept only when it shrank.
fn compress_payload(
    codec: &mut dyn Codec,
    pre: &mut Preprocessor,
    src: &[u8],
    seg: &mut Vec<u8>,
) -> PayloadOutcome {
    let mark = seg.len();
    if pre.enabled() {
        if let Some(r) = pre.compress(codec, src, seg) {
            return PayloadOutcome {
                compressed: true,
                preproc: true,
                sub: r.adapt_sub,
                len: seg.len() - mark,
            };
        }
        // Preprocess produced nothing usable: store verbatim.
        seg.extend_from_slice(src);
        return PayloadOutcome {
            compressed: false,
            preproc: false,
            sub: 0,
            len: src.len(),
        };
    }
    match codec.compress(src, seg) {
        Ok(sub) if seg.len() - mark < src.len() => PayloadOutcome {
            compressed: true,
            preproc: false,
            sub,
            len: seg.len() - mark,
        },
        _ => {
            seg.truncate(mark);
            seg.extend_from_slice(src);
            PayloadOutcome {
                compressed: false,
                preproc: false,
                sub: 0,
                len: src.len(),
            }
        }
    }
}

impl Worker {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        crypto: Option<Arc<CryptoCtx>>,
        dedup: Option<DedupCtx>,
        cancel: Arc<AtomicBool>,
        errs: ErrSlot,
    ) -> Result<Self, PcError> {
        let codec = codec::create(cfg.codec, cfg.level, cfg.chunksize)?;
        let props = codec::props(cfg.codec, cfg.level, cfg.chunksize);
        let pre = Preprocessor::new(
            cfg.lzp,
            if cfg.delta2 { props.delta2_span } else { 0 },
            cfg.level,
        );
        let mac = match &crypto {
            Some(ctx) => Some(ChunkMac::new_hmac(cfg.cksum, ctx)?),
            None => None,
        };
        Ok(Self {
            cfg,
            codec,
            pre,
            dedup,
            mac,
            crypto,
            scratch: Vec::new(),
            tmp: Vec::new(),
            cancel,
            errs,
        })
    }

    fn sentinel(id: u64) -> ChunkDone {
        ChunkDone {
            id,
            seg: Vec::new(),
            spare: Vec::new(),
            len: 0,
        }
    }

    pub fn run_compress(mut self, port: WorkerPort) {
        while let Ok(job) = port.start_rx.recv() {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            let id = job.id;
            match self.compress_chunk(job, &port) {
                Ok(done) => {
                    if port.done_tx.send(done).is_err() {
                        break;
                    }
                }
                Err(PcError::Cancelled) => break,
                Err(e) => {
                    record_error(&self.errs, &self.cancel, e);
                    let _ = port.done_tx.send(Self::sentinel(id));
                    break;
                }
            }
        }
    }

    pub fn run_decompress(mut self, port: WorkerPort) {
        while let Ok(job) = port.start_rx.recv() {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            let id = job.id;
            match self.decompress_chunk(job, &port) {
                Ok(done) => {
                    if port.done_tx.send(done).is_err() {
                        break;
                    }
                }
                Err(PcError::Cancelled) => break,
                Err(e) => {
                    record_error(&self.errs, &self.cancel, e);
                    let _ = port.done_tx.send(Self::sentinel(id));
                    break;
                }
            }
        }
    }

    fn compress_chunk(&mut self, job: ChunkJob, port: &WorkerPort) -> Result<ChunkDone, PcError> {
        let ChunkJob {
            id,
            data,
            mut seg,
            file_offset,
            ..
        } = job;
        let cfg = Arc::clone(&self.cfg);
        let rbytes = data.len();
        let hdr_len = COMPRESSED_CHUNKSZ + cfg.cksum_bytes + cfg.mac_bytes + CHUNK_FLAG_SZ;

        seg.clear();
        seg.resize(hdr_len, 0);

        let mut ty: u8 = 0;
        let mut adapt_sub: u8 = 0;

        // Plaintext digest; under crypto the HMAC carries all integrity.
        let digest = if self.crypto.is_none() {
            Some(compute_checksum(cfg.cksum, &data, cfg.single_chunk))
        } else {
            None
        };

        let mut dedup_valid = false;
        if let Some(ctx) = self.dedup.as_mut() {
            ctx.file_offset = file_offset;
            // Global dedup: index access is serialized across workers in
            // round-robin order by the token ring.
            if let Some(rx) = &port.index_rx {
                rx.recv().map_err(|_| PcError::Cancelled)?;
            }
            let index_sz = ctx.dedupe_compress(&data, &mut self.scratch);
            if let Some(tx) = &port.index_tx {
                let _ = tx.send(());
            }

            if ctx.valid {
                dedup_valid = true;
                let hdr = DedupHdr::decode(&self.scratch).map_err(PcError::Dedup)?;
                let index_raw = &self.scratch[DEDUP_HDR_SIZE..DEDUP_HDR_SIZE + index_sz];
                let data_part = &self.scratch[DEDUP_HDR_SIZE + index_sz..];

                // Byte-transpose the index so its entropy clusters, then
                // try to shrink it independently of the data.
                transpose(index_raw, &mut self.tmp, 4, true);

                let dhdr_pos = seg.len();
                seg.extend_from_slice(&self.scratch[..DEDUP_HDR_SIZE]);
                let index_cmp_len = match codec::lzma::compress_index(&self.tmp) {
                    Some(c) => {
                        seg.extend_from_slice(&c);
                        c.len()
                    }
                    None => {
                        seg.extend_from_slice(&self.tmp);
                        self.tmp.len()
                    }
                };

                let data_mark = seg.len();
                let out = compress_payload(self.codec.as_mut(), &mut self.pre, data_part, &mut seg);
                let data_cmp_len = if out.compressed && out.len < data_part.len() {
                    ty |= COMPRESSED;
                    if out.preproc {
                        ty |= CHUNK_FLAG_PREPROC;
                    }
                    adapt_sub = out.sub;
                    out.len
                } else if out.compressed {
                    // Encoded form did not shrink the data part after all.
                    seg.truncate(data_mark);
                    seg.extend_from_slice(data_part);
                    data_part.len()
                } else {
                    out.len
                };

                let mut h2 = hdr;
                h2.index_sz_cmp = index_cmp_len as u64;
                h2.data_sz_cmp = data_cmp_len as u64;
                h2.encode(&mut seg[dhdr_pos..dhdr_pos + DEDUP_HDR_SIZE]);
                ty |= CHUNK_FLAG_DEDUP;
            }
        }

        if !dedup_valid {
            let out = compress_payload(self.codec.as_mut(), &mut self.pre, &data, &mut seg);
            if out.compressed && out.len < rbytes {
                ty |= COMPRESSED;
                if out.preproc {
                    ty |= CHUNK_FLAG_PREPROC;
                }
                adapt_sub = out.sub;
            } else if out.compressed {
                // Compressed form did not shrink the chunk after all.
                seg.truncate(hdr_len);
                seg.extend_from_slice(&data);
            }
        }

        // Encrypt the payload in place; length-preserving by construction.
        if let Some(ctx) = &self.crypto {
            ctx.crypto_buf(&mut seg[hdr_len..], id)?;
        }

        // Frame: compressed length, plaintext digest, flags, optional
        // trailing original size for short chunks.
        let mut len_cmp = (seg.len() - hdr_len) as u64;
        BigEndian::write_u64(&mut seg[..COMPRESSED_CHUNKSZ], len_cmp);
        if let Some(d) = &digest {
            seg[COMPRESSED_CHUNKSZ..COMPRESSED_CHUNKSZ + cfg.cksum_bytes].copy_from_slice(d);
        }
        if cfg.codec.is_adaptive() {
            ty |= (adapt_sub << ADAPT_SHIFT) & ADAPT_MASK;
        }
        if (rbytes as u64) < cfg.chunksize {
            ty |= CHSIZE_MASK;
            seg.extend_from_slice(&(rbytes as u64).to_be_bytes());
            len_cmp += ORIGINAL_CHUNKSZ as u64;
            BigEndian::write_u64(&mut seg[..COMPRESSED_CHUNKSZ], len_cmp);
        }
        let flag_pos = COMPRESSED_CHUNKSZ + cfg.cksum_bytes + cfg.mac_bytes;
        seg[flag_pos] = ty;

        // Authenticate the full framed chunk; the mac slot is still zero.
        let mac_off = COMPRESSED_CHUNKSZ + cfg.cksum_bytes;
        match &mut self.mac {
            Some(m) => {
                m.update(&seg);
                let tag = m.finalize();
                seg[mac_off..mac_off + cfg.mac_bytes].copy_from_slice(&tag);
            }
            None => {
                let crc = crc32fast::hash(&seg);
                BigEndian::write_u32(&mut seg[mac_off..mac_off + 4], crc);
            }
        }

        Ok(ChunkDone {
            id,
            len: seg.len(),
            seg,
            spare: data,
        })
    }

    fn decompress_chunk(&mut self, job: ChunkJob, port: &WorkerPort) -> Result<ChunkDone, PcError> {
        let ChunkJob {
            id,
            mut data,
            mut seg,
            wire_len,
            ..
        } = job;
        let cfg = Arc::clone(&self.cfg);
        seg.clear();

        let flag_off = cfg.cksum_bytes + cfg.mac_bytes;
        let payload_off = flag_off + CHUNK_FLAG_SZ;
        if data.len() < payload_off + wire_len as usize {
            return Err(PcError::Chunk(ChunkError::Incomplete { chunk: id }));
        }
        let ty = data[flag_off];
        let known = CHSIZE_MASK | ADAPT_MASK | CHUNK_FLAG_PREPROC | CHUNK_FLAG_DEDUP | COMPRESSED;
        if ty & !known != 0 {
            return Err(PcError::Chunk(ChunkError::BadFlags { chunk: id, flags: ty }));
        }

        let mut payload_len = wire_len as usize;
        let mut expected = cfg.chunksize;
        if ty & CHSIZE_MASK != 0 {
            if payload_len < ORIGINAL_CHUNKSZ {
                return Err(PcError::Chunk(ChunkError::Incomplete { chunk: id }));
            }
            payload_len -= ORIGINAL_CHUNKSZ;
            let n = data.len();
            expected = BigEndian::read_u64(&data[n - ORIGINAL_CHUNKSZ..]);
            if expected > cfg.chunksize {
                return Err(PcError::Chunk(ChunkError::Oversize {
                    chunk: id,
                    len_cmp: expected,
                    max: cfg.chunksize,
                }));
            }
        }

        // Verify authentication before touching the payload.
        let mac_off = cfg.cksum_bytes;
        let stored = data[mac_off..mac_off + cfg.mac_bytes].to_vec();
        data[mac_off..mac_off + cfg.mac_bytes].fill(0);
        let len_be = wire_len.to_be_bytes();
        let ok = match &mut self.mac {
            Some(m) => {
                m.update(&len_be);
                m.update(&data);
                m.finalize() == stored
            }
            None => {
                let mut h = crc32fast::Hasher::new();
                h.update(&len_be);
                h.update(&data);
                h.finalize().to_be_bytes()[..] == stored[..]
            }
        };
        if !ok {
            return Err(PcError::Chunk(ChunkError::AuthMismatch { chunk: id }));
        }

        if let Some(ctx) = &self.crypto {
            ctx.crypto_buf(&mut data[payload_off..payload_off + payload_len], id)?;
        }
        let payload = &data[payload_off..payload_off + payload_len];

        if ty & CHUNK_FLAG_DEDUP != 0 {
            let hdr = DedupHdr::decode(payload).map_err(PcError::Dedup)?;
            let isz_cmp = hdr.index_sz_cmp as usize;
            let dsz_cmp = hdr.data_sz_cmp as usize;
            if DEDUP_HDR_SIZE + isz_cmp + dsz_cmp != payload_len {
                return Err(PcError::Dedup(DedupError::Corrupt("region size mismatch")));
            }
            let index_cmp = &payload[DEDUP_HDR_SIZE..DEDUP_HDR_SIZE + isz_cmp];
            let data_cmp = &payload[DEDUP_HDR_SIZE + isz_cmp..];

            // Uncompress the data part first; only then the index. The
            // index inverse-transposes back to entry order.
            self.scratch.clear();
            if ty & COMPRESSED != 0 {
                if ty & CHUNK_FLAG_PREPROC != 0 {
                    self.pre
                        .decompress(self.codec.as_mut(), data_cmp, &mut self.scratch, ty)
                        .map_err(PcError::Preproc)?;
                } else {
                    self.codec
                        .decompress(data_cmp, &mut self.scratch, hdr.data_sz as usize, ty)
                        .map_err(PcError::Codec)?;
                }
            } else {
                self.scratch.extend_from_slice(data_cmp);
            }
            if self.scratch.len() != hdr.data_sz as usize {
                return Err(PcError::Dedup(DedupError::Corrupt("data size mismatch")));
            }

            let decompressed_index;
            let transposed: &[u8] = if hdr.index_sz_cmp < hdr.index_sz {
                decompressed_index =
                    codec::lzma::decompress_index(index_cmp, hdr.index_sz as usize)
                        .map_err(PcError::Codec)?;
                if decompressed_index.len() != hdr.index_sz as usize {
                    return Err(PcError::Dedup(DedupError::Corrupt("index size mismatch")));
                }
                &decompressed_index
            } else {
                index_cmp
            };
            transpose(transposed, &mut self.tmp, 4, false);

            // Global dedup recovery reads earlier plaintext from the output
            // file, so it must wait its turn in the ring.
            if let Some(rx) = &port.index_rx {
                rx.recv().map_err(|_| PcError::Cancelled)?;
            }
            let ctx = self
                .dedup
                .as_mut()
                .ok_or(PcError::Chunk(ChunkError::BadFlags { chunk: id, flags: ty }))?;
            ctx.dedupe_decompress(id, &hdr, &self.tmp, &self.scratch, &mut seg)
                .map_err(PcError::Dedup)?;
        } else {
            if ty & COMPRESSED != 0 {
                if ty & CHUNK_FLAG_PREPROC != 0 {
                    self.pre
                        .decompress(self.codec.as_mut(), payload, &mut seg, ty)
                        .map_err(PcError::Preproc)?;
                } else {
                    self.codec
                        .decompress(payload, &mut seg, expected as usize, ty)
                        .map_err(PcError::Codec)?;
                }
            } else {
                seg.extend_from_slice(payload);
            }
            // Not deduped, but the ring token must still advance. Taking it
            // after decompression keeps concurrency with the previous
            // worker's recovery.
            if let Some(rx) = &port.index_rx {
                rx.recv().map_err(|_| PcError::Cancelled)?;
            }
            if seg.len() as u64 != expected {
                return Err(PcError::Chunk(ChunkError::Incomplete { chunk: id }));
            }
        }

        // Re-verify the plaintext digest in non-crypto mode; the HMAC has
        // already authenticated everything otherwise.
        if self.crypto.is_none() {
            let d = compute_checksum(cfg.cksum, &seg, cfg.single_chunk);
            if d[..] != data[..cfg.cksum_bytes] {
                return Err(PcError::ChecksumMismatch { chunk: id });
            }
        }

        Ok(ChunkDone {
            id,
            len: seg.len(),
            seg,
            spare: data,
        })
    }
}
