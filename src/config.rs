//! Pipeline configuration.
//!
//! Everything the workers need to know, gathered once at startup and
//! shared immutably. The only mutable global state in the whole pipeline
//! is the cancel flag (one `AtomicBool`).

use std::path::PathBuf;

use crate::checksum::{self, ChecksumKind};
use crate::codec::CodecId;
use crate::constants::{
    DEFAULT_CHUNKSIZE, DEFAULT_KEYLEN, DEFAULT_LEVEL, MAX_LEVEL, MIN_CHUNK,
};
use crate::crypto::{mac, CryptoAlg};
use crate::dedup::rabin::DEFAULT_BLK_INDEX;
use crate::dedup::DeltaSim;
use crate::types::PcError;
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    None,
    /// Content-defined boundaries, per-chunk index.
    Segmented,
    /// Fixed-size blocks, per-chunk index.
    Fixed,
    /// Content-defined boundaries, file-wide index.
    Global,
}

impl DedupMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, DedupMode::None)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub codec: CodecId,
    pub level: u32,
    pub chunksize: u64,
    pub nthreads: usize,

    pub dedup: DedupMode,
    pub rab_blk_index: u32,
    /// Split producer chunks at rabin boundaries.
    pub rabin_split: bool,
    pub delta_sim: Option<DeltaSim>,

    pub lzp: bool,
    pub delta2: bool,

    pub cksum: ChecksumKind,
    pub cksum_bytes: usize,
    pub mac_bytes: usize,

    pub encrypt: Option<CryptoAlg>,
    pub keylen: usize,
    pub pwd_file: Option<PathBuf>,

    pub pipe_mode: bool,
    pub single_chunk: bool,

    pub show_mem_stats: bool,
    pub show_cmp_stats: bool,

    /// Spill directory for pipe-mode dedup state.
    pub scratch_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cksum = checksum::DEFAULT_CKSUM;
        Self {
            codec: CodecId::Zlib,
            level: DEFAULT_LEVEL,
            chunksize: DEFAULT_CHUNKSIZE,
            nthreads: 0,
            dedup: DedupMode::None,
            rab_blk_index: DEFAULT_BLK_INDEX,
            rabin_split: false,
            delta_sim: None,
            lzp: false,
            delta2: false,
            cksum,
            cksum_bytes: cksum.cksum_bytes(),
            mac_bytes: mac::mac_bytes(cksum, false),
            encrypt: None,
            keylen: DEFAULT_KEYLEN,
            pwd_file: None,
            pipe_mode: false,
            single_chunk: false,
            show_mem_stats: false,
            show_cmp_stats: false,
            scratch_dir: utils::scratch_dir(),
        }
    }
}

impl PipelineConfig {
    /// Fix up the derived integrity widths. With crypto the plaintext
    /// checksum disappears from the wire and the HMAC takes its width;
    /// without crypto the authenticator is a CRC32.
    pub fn finish(&mut self) {
        if self.encrypt.is_some() {
            self.cksum_bytes = 0;
            self.mac_bytes = mac::mac_bytes(self.cksum, true);
        } else {
            self.cksum_bytes = self.cksum.cksum_bytes();
            self.mac_bytes = mac::mac_bytes(self.cksum, false);
        }
    }

    /// Option sanity checks, mirrored on both compress and decompress.
    pub fn validate(&self, compressing: bool) -> Result<(), PcError> {
        let bad = |msg: String| Err(PcError::Config(msg));

        if self.level > MAX_LEVEL {
            return bad(format!("compression level should be in range 0 - {}", MAX_LEVEL));
        }
        if self.chunksize < MIN_CHUNK {
            return bad(format!("minimum chunk size is {}", MIN_CHUNK));
        }
        let ram_cap = utils::eighty_pct(utils::total_ram());
        if self.chunksize > ram_cap {
            return bad("chunk size must not exceed 80% of total RAM".to_string());
        }
        if !(1..=256).contains(&self.nthreads) && self.nthreads != 0 {
            return bad("thread count should be in range 1 - 256".to_string());
        }
        if !(1..=5).contains(&self.rab_blk_index) {
            return bad("average dedupe block size must be in range 1 (4k) - 5 (64k)".to_string());
        }
        if self.dedup.enabled() && !compressing {
            return bad("deduplication is only used during compression".to_string());
        }
        if self.dedup == DedupMode::Fixed
            && (self.delta_sim.is_some() || self.rabin_split)
        {
            return bad(
                "rabin deduplication and fixed-block deduplication are mutually exclusive"
                    .to_string(),
            );
        }
        if self.dedup == DedupMode::Global {
            if self.pipe_mode {
                return bad("global deduplication is not supported in pipe mode".to_string());
            }
            if self.delta_sim.is_some() {
                return bad("global deduplication does not support delta encoding".to_string());
            }
        }
        if let Some(_alg) = self.encrypt {
            if !compressing {
                return bad("encryption only makes sense when compressing".to_string());
            }
            if self.pipe_mode && self.pwd_file.is_none() {
                return bad("pipe mode requires password to be provided in a file".to_string());
            }
            if self.keylen != 16 && self.keylen != 32 {
                return bad("encryption key length should be 16 or 32".to_string());
            }
            if !self.cksum.can_mac() {
                return bad(format!(
                    "checksum {} cannot key an HMAC; pick a digest kind",
                    self.cksum.name()
                ));
            }
        }
        if !self.codec.is_available() {
            return bad(format!(
                "{} is not built into this configuration",
                self.codec.tag()
            ));
        }
        Ok(())
    }

    /// Worst-case framed chunk size, used for buffer reservations and the
    /// memory stats display.
    pub fn compressed_chunksize(&self, buf_extra: u64) -> u64 {
        use crate::constants::{CHUNK_FLAG_SZ, COMPRESSED_CHUNKSZ, ORIGINAL_CHUNKSZ};
        let hdr = COMPRESSED_CHUNKSZ
            + self.cksum_bytes
            + self.mac_bytes
            + CHUNK_FLAG_SZ
            + ORIGINAL_CHUNKSZ;
        self.chunksize + hdr as u64 + buf_extra + crate::dedup::DEDUP_HDR_SIZE as u64
    }

    /// Thread count resolution: explicit setting capped by online CPUs,
    /// shrunk when the file has fewer chunks than threads, forced to one
    /// for single-chunk archives.
    pub fn resolve_threads(&mut self, file_size: Option<u64>) {
        let online = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut n = if self.nthreads > 0 && self.nthreads < online {
            self.nthreads
        } else {
            online
        };
        if let Some(size) = file_size {
            if size <= self.chunksize {
                self.single_chunk = true;
                n = 1;
            } else {
                let chunks = size.div_ceil(self.chunksize) as usize;
                n = n.min(chunks);
            }
        }
        self.nthreads = n.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let mut cfg = PipelineConfig::default();
        cfg.resolve_threads(None);
        cfg.validate(true).unwrap();
    }

    #[test]
    fn crypto_clears_checksum_bytes() {
        let mut cfg = PipelineConfig {
            encrypt: Some(CryptoAlg::Aes),
            ..Default::default()
        };
        cfg.finish();
        assert_eq!(cfg.cksum_bytes, 0);
        assert_eq!(cfg.mac_bytes, 32);

        cfg.encrypt = None;
        cfg.finish();
        assert_eq!(cfg.cksum_bytes, 32);
        assert_eq!(cfg.mac_bytes, 4);
    }

    #[test]
    fn global_dedup_rejects_pipe_mode() {
        let mut cfg = PipelineConfig {
            dedup: DedupMode::Global,
            pipe_mode: true,
            ..Default::default()
        };
        cfg.resolve_threads(None);
        assert!(cfg.validate(true).is_err());
    }

    #[test]
    fn single_chunk_detection() {
        let mut cfg = PipelineConfig::default();
        cfg.resolve_threads(Some(1024));
        assert!(cfg.single_chunk);
        assert_eq!(cfg.nthreads, 1);

        let mut cfg = PipelineConfig::default();
        cfg.resolve_threads(Some(cfg.chunksize * 3));
        assert!(!cfg.single_chunk);
        assert!(cfg.nthreads <= 3);
    }
}
