//! Block deduplication within (and optionally across) chunks.
//!
//! A chunk is split into blocks at rabin boundaries (or fixed boundaries),
//! each block is fingerprinted, and repeats are replaced by index entries.
//! The index table and the unique data are compressed separately: index
//! values would pollute the backend dictionary, and a byte transpose of the
//! table clusters its entropy first.
//!
//! Dedup region layout: `[header 44][index][data]`, where the index holds
//! one u32 entry per block followed by a ref table. Entry encoding:
//!
//! ```text
//! bit 31 clear:           unique block, low bits = length
//! bit 31 set:             duplicate; bit 30 = global ref, bit 29 = delta
//!   in-chunk:             low bits = earlier block number
//!   global / delta:       low bits = slot into the ref table
//! ref table entry:        offset u64 (absolute stream offset, or base
//!                         block number for delta) + len u32
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder};

pub mod rabin;

use crate::config::DedupMode;
use rabin::RabinChunker;

pub const DEDUP_HDR_SIZE: usize = 44;

const ENTRY_DUP: u32 = 1 << 31;
const ENTRY_GLOBAL: u32 = 1 << 30;
const ENTRY_DELTA: u32 = 1 << 29;
const ENTRY_VAL: u32 = (1 << 29) - 1;

const REF_ENTRY_SIZE: usize = 12;

#[derive(Debug)]
pub enum DedupError {
    RecoveryFailed { chunk: u64 },
    Corrupt(&'static str),
    Io(String),
}

impl std::fmt::Display for DedupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupError::RecoveryFailed { chunk } => {
                write!(f, "chunk {}, dedup recovery failed", chunk)
            }
            DedupError::Corrupt(what) => write!(f, "corrupt dedup region: {}", what),
            DedupError::Io(msg) => write!(f, "dedup I/O failure: {}", msg),
        }
    }
}

impl std::error::Error for DedupError {}

/// Fixed-size header in front of every dedup region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupHdr {
    pub blknum: u32,
    pub index_sz: u64,
    pub index_sz_cmp: u64,
    pub data_sz: u64,
    pub data_sz_cmp: u64,
    pub orig_chunksize: u64,
}

impl DedupHdr {
    pub fn encode(&self, out: &mut [u8]) {
        BigEndian::write_u32(&mut out[0..4], self.blknum);
        BigEndian::write_u64(&mut out[4..12], self.index_sz);
        BigEndian::write_u64(&mut out[12..20], self.index_sz_cmp);
        BigEndian::write_u64(&mut out[20..28], self.data_sz);
        BigEndian::write_u64(&mut out[28..36], self.data_sz_cmp);
        BigEndian::write_u64(&mut out[36..44], self.orig_chunksize);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DedupError> {
        if buf.len() < DEDUP_HDR_SIZE {
            return Err(DedupError::Corrupt("header truncated"));
        }
        Ok(Self {
            blknum: BigEndian::read_u32(&buf[0..4]),
            index_sz: BigEndian::read_u64(&buf[4..12]),
            index_sz_cmp: BigEndian::read_u64(&buf[12..20]),
            data_sz: BigEndian::read_u64(&buf[20..28]),
            data_sz_cmp: BigEndian::read_u64(&buf[28..36]),
            orig_chunksize: BigEndian::read_u64(&buf[36..44]),
        })
    }
}

/// Delta-encoding similarity level (-E / -EE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaSim {
    /// At least 60% similarity.
    Normal,
    /// At least 40% similarity.
    Extra,
}

/// Index shared across chunks for global dedup, keyed by block fingerprint.
/// Access is already serialized by the worker token ring; the mutex only
/// satisfies the compiler's aliasing rules.
#[derive(Default)]
pub struct GlobalIndex {
    map: Mutex<HashMap<[u8; 32], (u64, u32)>>,
}

impl GlobalIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lookup(&self, hash: &[u8; 32]) -> Option<(u64, u32)> {
        self.map.lock().unwrap().get(hash).copied()
    }

    fn insert(&self, hash: [u8; 32], offset: u64, len: u32) {
        self.map.lock().unwrap().entry(hash).or_insert((offset, len));
    }
}

/// Per-worker dedup context.
pub struct DedupCtx {
    mode: DedupMode,
    chunker: RabinChunker,
    delta: Option<DeltaSim>,
    global: Option<Arc<GlobalIndex>>,
    /// Absolute uncompressed offset of the chunk being processed.
    pub file_offset: u64,
    /// Set by `dedupe_compress`: the region actually shrank the chunk.
    pub valid: bool,
    out_file: Option<File>,
    entries: Vec<u32>,
    refs: Vec<(u64, u32)>,
    data: Vec<u8>,
}

impl DedupCtx {
    pub fn new(
        mode: DedupMode,
        blk_index: u32,
        delta: Option<DeltaSim>,
        global: Option<Arc<GlobalIndex>>,
    ) -> Self {
        Self {
            mode,
            chunker: RabinChunker::new(blk_index),
            delta,
            global,
            file_offset: 0,
            valid: false,
            out_file: None,
            entries: Vec::new(),
            refs: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Global-dedup decompression re-reads earlier plaintext from the
    /// output file through its own handle.
    pub fn set_out_file(&mut self, f: File) {
        self.out_file = Some(f);
    }

    pub fn reset(&mut self) {
        self.valid = false;
        self.entries.clear();
        self.refs.clear();
        self.data.clear();
    }

    fn blocks(&self, src: &[u8]) -> Vec<(usize, usize)> {
        match self.mode {
            DedupMode::Fixed => {
                let blk = self.chunker.avg();
                let mut out = Vec::with_capacity(src.len() / blk + 1);
                let mut pos = 0;
                while pos < src.len() {
                    let len = blk.min(src.len() - pos);
                    out.push((pos, len));
                    pos += len;
                }
                out
            }
            _ => self.chunker.split(src),
        }
    }

    /// Build the dedup region for `src` into `out` (cleared). Sets `valid`
    /// when the region is smaller than the original chunk; on failure the
    /// caller falls back to the raw buffer without copying. Returns the
    /// uncompressed index size.
    pub fn dedupe_compress(&mut self, src: &[u8], out: &mut Vec<u8>) -> usize {
        self.reset();
        out.clear();

        let blocks = self.blocks(src);
        if blocks.len() < 2 {
            return 0;
        }

        let mut local: HashMap<[u8; 32], u32> = HashMap::with_capacity(blocks.len());
        let mut sketches: HashMap<[u8; 32], u32> = HashMap::new();

        for (no, &(start, len)) in blocks.iter().enumerate() {
            let no = no as u32;
            let block = &src[start..start + len];
            let hash = *blake3::hash(block).as_bytes();

            if let Some(&base) = local.get(&hash) {
                self.entries.push(ENTRY_DUP | base);
                continue;
            }

            if let Some(global) = &self.global {
                if let Some((off, glen)) = global.lookup(&hash) {
                    if glen as usize == len && off + glen as u64 <= self.file_offset {
                        let slot = self.refs.len() as u32;
                        self.refs.push((off, glen));
                        self.entries.push(ENTRY_DUP | ENTRY_GLOBAL | slot);
                        continue;
                    }
                }
            }

            if let Some(sim) = self.delta {
                let sketch = block_sketch(block, sim);
                if let Some(&base) = sketches.get(&sketch) {
                    let (bstart, blen) = blocks[base as usize];
                    let slot = self.refs.len() as u32;
                    self.refs.push((base as u64, len as u32));
                    self.entries.push(ENTRY_DUP | ENTRY_DELTA | slot);
                    let base_block = &src[bstart..bstart + blen];
                    for i in 0..len {
                        let b = base_block.get(i).copied().unwrap_or(0);
                        self.data.push(block[i].wrapping_sub(b));
                    }
                    local.insert(hash, no);
                    continue;
                }
                sketches.insert(sketch, no);
            }

            self.entries.push(len as u32);
            self.data.extend_from_slice(block);
            local.insert(hash, no);
            if let Some(global) = &self.global {
                global.insert(hash, self.file_offset + start as u64, len as u32);
            }
        }

        let index_sz = self.entries.len() * 4 + self.refs.len() * REF_ENTRY_SIZE;
        let total = DEDUP_HDR_SIZE + index_sz + self.data.len();
        if total >= src.len() {
            return 0;
        }
        self.valid = true;

        let hdr = DedupHdr {
            blknum: self.entries.len() as u32,
            index_sz: index_sz as u64,
            index_sz_cmp: index_sz as u64,
            data_sz: self.data.len() as u64,
            data_sz_cmp: self.data.len() as u64,
            orig_chunksize: src.len() as u64,
        };
        out.resize(DEDUP_HDR_SIZE, 0);
        hdr.encode(&mut out[..DEDUP_HDR_SIZE]);
        for e in &self.entries {
            out.extend_from_slice(&e.to_be_bytes());
        }
        for (off, len) in &self.refs {
            out.extend_from_slice(&off.to_be_bytes());
            out.extend_from_slice(&len.to_be_bytes());
        }
        out.extend_from_slice(&self.data);
        index_sz
    }

    /// Rebuild the original chunk from `[index][data]`, appending to `out`.
    pub fn dedupe_decompress(
        &mut self,
        chunk_id: u64,
        hdr: &DedupHdr,
        index: &[u8],
        data: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), DedupError> {
        let blknum = hdr.blknum as usize;
        if index.len() != hdr.index_sz as usize || blknum * 4 > index.len() {
            return Err(DedupError::Corrupt("index size mismatch"));
        }
        let refs = &index[blknum * 4..];
        if refs.len() % REF_ENTRY_SIZE != 0 {
            return Err(DedupError::Corrupt("ragged ref table"));
        }
        let nrefs = refs.len() / REF_ENTRY_SIZE;

        let base = out.len();
        let mut blocks: Vec<(usize, usize)> = Vec::with_capacity(blknum);
        let mut dpos = 0usize;

        for e in 0..blknum {
            let entry = BigEndian::read_u32(&index[e * 4..e * 4 + 4]);
            let start = out.len();

            if entry & ENTRY_DUP == 0 {
                let len = entry as usize;
                if dpos + len > data.len() {
                    return Err(DedupError::Corrupt("unique block overruns data"));
                }
                out.extend_from_slice(&data[dpos..dpos + len]);
                dpos += len;
                blocks.push((start, len));
                continue;
            }

            if entry & ENTRY_GLOBAL != 0 {
                let slot = (entry & ENTRY_VAL) as usize;
                if slot >= nrefs {
                    return Err(DedupError::Corrupt("global ref out of range"));
                }
                let off = BigEndian::read_u64(&refs[slot * 12..slot * 12 + 8]);
                let len = BigEndian::read_u32(&refs[slot * 12 + 8..slot * 12 + 12]) as usize;
                let file = self
                    .out_file
                    .as_ref()
                    .ok_or(DedupError::Corrupt("global ref without output handle"))?;
                let pos = out.len();
                out.resize(pos + len, 0);
                file.read_exact_at(&mut out[pos..], off)
                    .map_err(|e| DedupError::Io(e.to_string()))?;
                blocks.push((start, len));
                continue;
            }

            if entry & ENTRY_DELTA != 0 {
                let slot = (entry & ENTRY_VAL) as usize;
                if slot >= nrefs {
                    return Err(DedupError::Corrupt("delta ref out of range"));
                }
                let bno = BigEndian::read_u64(&refs[slot * 12..slot * 12 + 8]) as usize;
                let len = BigEndian::read_u32(&refs[slot * 12 + 8..slot * 12 + 12]) as usize;
                if bno >= blocks.len() {
                    return Err(DedupError::Corrupt("delta base not yet decoded"));
                }
                if dpos + len > data.len() {
                    return Err(DedupError::Corrupt("delta block overruns data"));
                }
                let (bstart, blen) = blocks[bno];
                for i in 0..len {
                    let b = if i < blen { out[bstart + i] } else { 0 };
                    out.push(data[dpos + i].wrapping_add(b));
                }
                dpos += len;
                blocks.push((start, len));
                continue;
            }

            // In-chunk duplicate.
            let bno = (entry & ENTRY_VAL) as usize;
            if bno >= blocks.len() {
                return Err(DedupError::Corrupt("duplicate references later block"));
            }
            let (bstart, blen) = blocks[bno];
            out.extend_from_within(bstart..bstart + blen);
            blocks.push((start, blen));
        }

        if dpos != data.len() || (out.len() - base) as u64 != hdr.orig_chunksize {
            self.valid = false;
            return Err(DedupError::RecoveryFailed { chunk: chunk_id });
        }
        self.valid = true;
        Ok(())
    }
}

fn block_sketch(block: &[u8], sim: DeltaSim) -> [u8; 32] {
    // Sample every Nth byte; a looser stride accepts less similar pairs.
    let stride = match sim {
        DeltaSim::Normal => 8,
        DeltaSim::Extra => 16,
    };
    let mut hasher = blake3::Hasher::new();
    let mut i = 0;
    while i < block.len() {
        hasher.update(&[block[i]]);
        i += stride;
    }
    hasher.update(&(block.len() / 64).to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Matrix transpose of a byte buffer viewed as rows of `elem` bytes.
/// Forward clusters the i-th byte of every element together; inverse
/// restores the original layout. `len` must be a multiple of `elem`.
pub fn transpose(src: &[u8], dst: &mut Vec<u8>, elem: usize, forward: bool) {
    debug_assert_eq!(src.len() % elem, 0);
    let rows = src.len() / elem;
    dst.clear();
    dst.resize(src.len(), 0);
    for row in 0..rows {
        for col in 0..elem {
            if forward {
                dst[col * rows + row] = src[row * elem + col];
            } else {
                dst[row * elem + col] = src[col * rows + row];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive(n: usize) -> Vec<u8> {
        // 64K of noise repeated, so cross-block duplicates exist.
        let mut x = 0xDEADBEEFu32;
        let base: Vec<u8> = (0..65536)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                (x >> 8) as u8
            })
            .collect();
        base.iter().copied().cycle().take(n).collect()
    }

    #[test]
    fn hdr_round_trip() {
        let hdr = DedupHdr {
            blknum: 42,
            index_sz: 168,
            index_sz_cmp: 100,
            data_sz: 9000,
            data_sz_cmp: 4000,
            orig_chunksize: 65536,
        };
        let mut buf = vec![0u8; DEDUP_HDR_SIZE];
        hdr.encode(&mut buf);
        assert_eq!(DedupHdr::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn transpose_is_invertible() {
        let src: Vec<u8> = (0..48u8).collect();
        let mut fwd = Vec::new();
        transpose(&src, &mut fwd, 4, true);
        assert_ne!(fwd, src);
        let mut back = Vec::new();
        transpose(&fwd, &mut back, 4, false);
        assert_eq!(back, src);
    }

    fn round_trip(mode: DedupMode, data: &[u8]) {
        let mut ctx = DedupCtx::new(mode, 1, None, None);
        let mut region = Vec::new();
        ctx.dedupe_compress(data, &mut region);
        assert!(ctx.valid, "expected reduction on repetitive input");
        assert!(region.len() < data.len());

        let hdr = DedupHdr::decode(&region).unwrap();
        let index = &region[DEDUP_HDR_SIZE..DEDUP_HDR_SIZE + hdr.index_sz as usize];
        let data_part = &region[DEDUP_HDR_SIZE + hdr.index_sz as usize..];
        let mut out = Vec::new();
        ctx.dedupe_decompress(0, &hdr, index, data_part, &mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn segmented_round_trip() {
        round_trip(DedupMode::Segmented, &repetitive(400_000));
    }

    #[test]
    fn fixed_round_trip() {
        round_trip(DedupMode::Fixed, &repetitive(400_000));
    }

    #[test]
    fn delta_round_trip() {
        // Near-duplicate blocks: repeats with sparse byte edits.
        let mut data = repetitive(300_000);
        for i in (1000..data.len()).step_by(70_000) {
            data[i] ^= 0x5A;
        }
        let mut ctx = DedupCtx::new(DedupMode::Segmented, 1, Some(DeltaSim::Normal), None);
        let mut region = Vec::new();
        ctx.dedupe_compress(&data, &mut region);
        assert!(ctx.valid);

        let hdr = DedupHdr::decode(&region).unwrap();
        let index = &region[DEDUP_HDR_SIZE..DEDUP_HDR_SIZE + hdr.index_sz as usize];
        let data_part = &region[DEDUP_HDR_SIZE + hdr.index_sz as usize..];
        let mut out = Vec::new();
        ctx.dedupe_decompress(0, &hdr, index, data_part, &mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn incompressible_input_is_invalid() {
        let mut x = 7u64;
        let noise: Vec<u8> = (0..100_000)
            .map(|_| {
                x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
                (x >> 33) as u8
            })
            .collect();
        let mut ctx = DedupCtx::new(DedupMode::Segmented, 1, None, None);
        let mut region = Vec::new();
        ctx.dedupe_compress(&noise, &mut region);
        assert!(!ctx.valid);
    }

    #[test]
    fn corrupt_index_is_rejected() {
        let data = repetitive(200_000);
        let mut ctx = DedupCtx::new(DedupMode::Segmented, 1, None, None);
        let mut region = Vec::new();
        ctx.dedupe_compress(&data, &mut region);
        let hdr = DedupHdr::decode(&region).unwrap();
        let mut index =
            region[DEDUP_HDR_SIZE..DEDUP_HDR_SIZE + hdr.index_sz as usize].to_vec();
        // Point a duplicate entry at a block that does not exist yet.
        index[..4].copy_from_slice(&(ENTRY_DUP | 1000).to_be_bytes());
        let data_part = &region[DEDUP_HDR_SIZE + hdr.index_sz as usize..];
        let mut out = Vec::new();
        assert!(ctx
            .dedupe_decompress(0, &hdr, &index, data_part, &mut out)
            .is_err());
    }
}
