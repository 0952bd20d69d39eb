//! Unified pipeline error covering I/O, container, codec, crypto, dedup and
//! preprocessing failures.
//!
//! Ergonomic `From<T>` impls enable `?` across the pipeline; messages are
//! stable and name the failing stage (and chunk id where known) so the
//! diagnostics on standard error are actionable.

use std::io;

use crate::codec::CodecError;
use crate::container::{ChunkError, HeaderError};
use crate::crypto::CryptoError;
use crate::dedup::DedupError;
use crate::preproc::PreprocError;

#[derive(Debug)]
pub enum PcError {
    /// I/O error, including short reads (`UnexpectedEof`).
    Io(io::Error),

    /// Invalid CLI option or option combination.
    Config(String),

    /// File header parse or verification failure.
    Header(HeaderError),

    /// Chunk frame parse, bounds or authentication failure.
    Chunk(ChunkError),

    /// Backend compression/decompression failure.
    Codec(CodecError),

    /// Encryption, key derivation or password failure.
    Crypto(CryptoError),

    /// Dedup or dedup recovery failure.
    Dedup(DedupError),

    /// Preprocessor failure.
    Preproc(PreprocError),

    /// Plaintext checksum mismatch after decompression.
    ChecksumMismatch { chunk: u64 },

    /// The operation was cancelled by a failure in another task.
    Cancelled,
}

impl std::fmt::Display for PcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PcError::Io(e) => write!(f, "I/O error: {}", e),
            PcError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            PcError::Header(e) => write!(f, "header error: {}", e),
            PcError::Chunk(e) => write!(f, "chunk error: {}", e),
            PcError::Codec(e) => write!(f, "codec error: {}", e),
            PcError::Crypto(e) => write!(f, "crypto error: {}", e),
            PcError::Dedup(e) => write!(f, "dedup error: {}", e),
            PcError::Preproc(e) => write!(f, "preprocess error: {}", e),
            PcError::ChecksumMismatch { chunk } => {
                write!(f, "chunk {}, checksums do not match", chunk)
            }
            PcError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for PcError {}

impl From<io::Error> for PcError {
    fn from(e: io::Error) -> Self {
        PcError::Io(e)
    }
}

impl From<HeaderError> for PcError {
    fn from(e: HeaderError) -> Self {
        PcError::Header(e)
    }
}

impl From<ChunkError> for PcError {
    fn from(e: ChunkError) -> Self {
        PcError::Chunk(e)
    }
}

impl From<CodecError> for PcError {
    fn from(e: CodecError) -> Self {
        PcError::Codec(e)
    }
}

impl From<CryptoError> for PcError {
    fn from(e: CryptoError) -> Self {
        PcError::Crypto(e)
    }
}

impl From<DedupError> for PcError {
    fn from(e: DedupError) -> Self {
        PcError::Dedup(e)
    }
}

impl From<PreprocError> for PcError {
    fn from(e: PreprocError) -> Self {
        PcError::Preproc(e)
    }
}
