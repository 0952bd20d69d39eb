//! Wire-level constants shared by the container codec and the pipeline.

/// Current archive format version. Decoders accept `MIN_VERSION..=VERSION`.
pub const VERSION: u16 = 8;
pub const MIN_VERSION: u16 = VERSION - 3;

/// Algorithm tag field width in the file header (ASCII, zero padded).
pub const ALGO_SZ: usize = 8;

/// Chunks are 5MB by default.
pub const DEFAULT_CHUNKSIZE: u64 = 5 * 1024 * 1024;
pub const MIN_CHUNK: u64 = 4096;

/// A compressed chunk may exceed the chunk size by at most this much
/// (codec bookkeeping). Anything larger on the wire is corrupt.
pub const MAX_CHUNK_OVERRUN: u64 = 256;

/// Width of the compressed-length field in a chunk header.
pub const COMPRESSED_CHUNKSZ: usize = 8;
/// Width of the trailing original-size field (present under CHSIZE_MASK).
pub const ORIGINAL_CHUNKSZ: usize = 8;
/// Width of the chunk flags byte.
pub const CHUNK_FLAG_SZ: usize = 1;

pub const MAX_LEVEL: u32 = 14;
pub const DEFAULT_LEVEL: u32 = 6;

pub const DEFAULT_KEYLEN: usize = 32;
/// Archives older than version 7 carry no keylen field.
pub const OLD_KEYLEN: usize = 32;
pub const MAX_PW_LEN: usize = 95;

/// Extension appended to the source file name on compression.
pub const COMP_EXTN: &str = ".pz";

/// File header flag bits (u16, big-endian on the wire).
pub mod flags {
    /// Low bits carry the checksum kind code.
    pub const CKSUM_MASK: u16 = 0x0007;
    pub const FLAG_DEDUP: u16 = 0x0008;
    /// Alone: fixed-block dedup. Together with FLAG_DEDUP: global dedup.
    pub const FLAG_DEDUP_FIXED: u16 = 0x0010;
    pub const FLAG_SINGLE_CHUNK: u16 = 0x0020;
    pub const MASK_CRYPTO_ALG: u16 = 0x00C0;
}

/// Chunk flag byte bits, MSB first.
pub mod chunk_flags {
    /// Original chunk length appended (chunk shorter than chunksize).
    pub const CHSIZE_MASK: u8 = 0x80;
    /// Bits 6-4 carry the adaptive sub-codec id; 0 when non-adaptive.
    pub const ADAPT_SHIFT: u8 = 4;
    pub const ADAPT_MASK: u8 = 0x70;
    pub const CHUNK_FLAG_PREPROC: u8 = 0x08;
    pub const CHUNK_FLAG_DEDUP: u8 = 0x04;
    pub const COMPRESSED: u8 = 0x01;
}

/// Preprocess type byte prepended to a preprocessed payload.
pub mod preproc_flags {
    pub const PREPROC_TYPE_LZP: u8 = 0x01;
    pub const PREPROC_TYPE_DELTA2: u8 = 0x02;
    /// The backend actually compressed the preprocessed buffer.
    pub const PREPROC_COMPRESSED: u8 = 0x80;
}

/// Encryption algorithm codes stored in the header flags field.
pub mod crypto_ids {
    pub const CRYPTO_ALG_AES: u16 = 0x0040;
    pub const CRYPTO_ALG_SALSA20: u16 = 0x0080;
}

/// Nonce widths.
pub const AES_NONCE_LEN: usize = 8;
pub const XSALSA20_NONCE_LEN: usize = 24;
pub const CRYPTO_SALT_LEN: usize = 32;

/// PBKDF2 iteration count for password key derivation.
pub const KDF_ROUNDS: u32 = 50_000;
