//! Header structs and container error types.

use std::fmt;

use crate::checksum::ChecksumKind;
use crate::codec::CodecId;
use crate::config::{DedupMode, PipelineConfig};
use crate::constants::{flags, MAX_CHUNK_OVERRUN, MIN_VERSION, VERSION};
use crate::crypto::CryptoAlg;

/// Crypto material carried in the header when encryption is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoHeader {
    pub alg: CryptoAlg,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub keylen: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub codec: CodecId,
    pub version: u16,
    pub flags: u16,
    pub chunksize: u64,
    pub level: u32,
    pub crypto: Option<CryptoHeader>,
}

impl FileHeader {
    /// Assemble the header for a new archive from the resolved config.
    pub fn from_config(cfg: &PipelineConfig, crypto: Option<CryptoHeader>) -> Self {
        let mut f = cfg.cksum.code() & flags::CKSUM_MASK;
        match cfg.dedup {
            DedupMode::None => {}
            DedupMode::Segmented => f |= flags::FLAG_DEDUP,
            DedupMode::Fixed => f |= flags::FLAG_DEDUP_FIXED,
            DedupMode::Global => f |= flags::FLAG_DEDUP | flags::FLAG_DEDUP_FIXED,
        }
        if cfg.single_chunk {
            f |= flags::FLAG_SINGLE_CHUNK;
        }
        if let Some(c) = &crypto {
            f |= c.alg as u16;
        }
        Self {
            codec: cfg.codec,
            version: VERSION,
            flags: f,
            chunksize: cfg.chunksize,
            level: cfg.level,
            crypto,
        }
    }

    pub fn cksum(&self) -> Result<ChecksumKind, HeaderError> {
        ChecksumKind::from_code(self.flags & flags::CKSUM_MASK)
            .map_err(|_| HeaderError::UnknownChecksum {
                code: self.flags & flags::CKSUM_MASK,
            })
    }

    pub fn dedup_mode(&self) -> Result<DedupMode, HeaderError> {
        let d = self.flags & flags::FLAG_DEDUP != 0;
        let fixed = self.flags & flags::FLAG_DEDUP_FIXED != 0;
        Ok(match (d, fixed) {
            (false, false) => DedupMode::None,
            (true, false) => DedupMode::Segmented,
            (false, true) => DedupMode::Fixed,
            (true, true) => {
                // Global dedup postdates version 7 archives.
                if self.version <= 7 {
                    return Err(HeaderError::InvalidDedupFlags { flags: self.flags });
                }
                DedupMode::Global
            }
        })
    }

    pub fn single_chunk(&self) -> bool {
        self.flags & flags::FLAG_SINGLE_CHUNK != 0
    }

    pub fn crypto_alg(&self) -> Result<Option<CryptoAlg>, HeaderError> {
        let raw = self.flags & flags::MASK_CRYPTO_ALG;
        if raw == 0 {
            return Ok(None);
        }
        CryptoAlg::from_flags(raw)
            .map(Some)
            .map_err(|_| HeaderError::UnknownCrypto { code: raw })
    }

    /// Hard cap on the wire length of one compressed chunk.
    pub fn max_chunk_len(&self) -> u64 {
        self.chunksize + MAX_CHUNK_OVERRUN
    }
}

#[derive(Debug)]
pub enum HeaderError {
    Truncated,
    /// Algorithm tag did not resolve; not an archive we produced.
    NotPcompress,
    VersionNewer { have: u16, capability: u16 },
    VersionTooOld { have: u16, min: u16 },
    ChunkSizeTooLarge { have: u64, cap: u64 },
    InvalidLevel { have: u32 },
    UnknownChecksum { code: u16 },
    UnknownCrypto { code: u16 },
    InvalidDedupFlags { flags: u16 },
    BadSaltLen { have: u32 },
    /// Header HMAC or CRC32 verification failed.
    AuthMismatch,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HeaderError::*;
        match self {
            Truncated => write!(f, "truncated file header"),
            NotPcompress => write!(f, "not a pcompressed file"),
            VersionNewer { have, capability } => write!(
                f,
                "cannot handle newer archive version {}, capability {}",
                have, capability
            ),
            VersionTooOld { have, min } => {
                write!(f, "unsupported version: {} (minimum {})", have, min)
            }
            ChunkSizeTooLarge { have, cap } => write!(
                f,
                "chunk size {} must not exceed 80% of total RAM ({})",
                have, cap
            ),
            InvalidLevel { have } => write!(f, "invalid compression level in header: {}", have),
            UnknownChecksum { code } => write!(
                f,
                "invalid checksum algorithm code: {}. File corrupt ?",
                code
            ),
            UnknownCrypto { code } => write!(
                f,
                "invalid encryption algorithm code: {}. File corrupt ?",
                code
            ),
            InvalidDedupFlags { flags } => {
                write!(f, "invalid file deduplication flags: {:#x}", flags)
            }
            BadSaltLen { have } => write!(f, "implausible salt length: {}", have),
            AuthMismatch => write!(
                f,
                "header verification failed! File tampered or wrong password"
            ),
        }
    }
}

impl std::error::Error for HeaderError {}

/// Version window check, applied before anything else is trusted.
pub fn check_version(version: u16) -> Result<(), HeaderError> {
    if version > VERSION {
        return Err(HeaderError::VersionNewer {
            have: version,
            capability: VERSION,
        });
    }
    if version < MIN_VERSION {
        return Err(HeaderError::VersionTooOld {
            have: version,
            min: MIN_VERSION,
        });
    }
    Ok(())
}

#[derive(Debug)]
pub enum ChunkError {
    /// Chunk header shorter than the fixed fields.
    IncompleteHeader { chunk: u64 },
    /// Payload shorter than the header claims.
    Incomplete { chunk: u64 },
    /// len_cmp exceeds chunksize + slack; corrupt or hostile.
    Oversize { chunk: u64, len_cmp: u64, max: u64 },
    /// HMAC or CRC32 over the framed chunk did not match.
    AuthMismatch { chunk: u64 },
    /// Flag byte carries bits no decoder understands.
    BadFlags { chunk: u64, flags: u8 },
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ChunkError::*;
        match self {
            IncompleteHeader { chunk } => {
                write!(f, "incomplete chunk {} header, file corrupt", chunk)
            }
            Incomplete { chunk } => write!(f, "incomplete chunk {}, file corrupt", chunk),
            Oversize { chunk, len_cmp, max } => write!(
                f,
                "compressed length too big for chunk {}: {} > {}",
                chunk, len_cmp, max
            ),
            AuthMismatch { chunk } => {
                write!(f, "chunk {}, authentication verification failed", chunk)
            }
            BadFlags { chunk, flags } => {
                write!(f, "chunk {}, invalid flag byte: {:#x}", chunk, flags)
            }
        }
    }
}

impl std::error::Error for ChunkError {}
