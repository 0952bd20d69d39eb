//! Codec registry.
//!
//! Resolves an algorithm tag to a backend and constructs per-worker codec
//! instances. Adaptive modes wrap several backends and record the winning
//! sub-codec in the chunk flag byte (bits 6-4); decompression dispatches on
//! those bits.

use std::fmt;

pub mod adapt;
pub mod bzip2;
pub mod lz4;
pub mod lzfx;
pub mod lzma;
pub mod none;
pub mod zlib;
pub mod zstd;

use crate::constants::ALGO_SZ;

/// Backend identifiers. The tag written to the file header is the full
/// name; resolution accepts any string starting with the shortest unique
/// prefix, mirroring the header field which is zero padded to 8 bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodecId {
    Lzfx,
    Lz4,
    Zlib,
    Lzma,
    LzmaMt,
    Bzip2,
    Ppmd,
    Libbsc,
    Zstd,
    Adapt,
    Adapt2,
    None,
}

/// Resolution table. Order matters: lzmaMt before lzma, adapt2 before adapt.
const RESOLVE: &[(&str, usize, CodecId)] = &[
    ("zlib", 4, CodecId::Zlib),
    ("lzmaMt", 6, CodecId::LzmaMt),
    ("lzma", 4, CodecId::Lzma),
    ("bzip2", 5, CodecId::Bzip2),
    ("ppmd", 4, CodecId::Ppmd),
    ("lzfx", 4, CodecId::Lzfx),
    ("lz4", 3, CodecId::Lz4),
    ("none", 4, CodecId::None),
    ("adapt2", 6, CodecId::Adapt2),
    ("adapt", 5, CodecId::Adapt),
    ("libbsc", 6, CodecId::Libbsc),
    ("zstd", 4, CodecId::Zstd),
];

impl CodecId {
    pub fn resolve(name: &str) -> Result<Self, CodecError> {
        let bytes = name.as_bytes();
        for (tag, min, id) in RESOLVE {
            if bytes.len() >= *min && &bytes[..*min] == &tag.as_bytes()[..*min] {
                return Ok(*id);
            }
        }
        Err(CodecError::UnknownAlgorithm(name.to_string()))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            CodecId::Lzfx => "lzfx",
            CodecId::Lz4 => "lz4",
            CodecId::Zlib => "zlib",
            CodecId::Lzma => "lzma",
            CodecId::LzmaMt => "lzmaMt",
            CodecId::Bzip2 => "bzip2",
            CodecId::Ppmd => "ppmd",
            CodecId::Libbsc => "libbsc",
            CodecId::Zstd => "zstd",
            CodecId::Adapt => "adapt",
            CodecId::Adapt2 => "adapt2",
            CodecId::None => "none",
        }
    }

    /// The 8-byte zero-padded tag field for the file header.
    pub fn tag_field(&self) -> [u8; ALGO_SZ] {
        let mut out = [0u8; ALGO_SZ];
        let tag = self.tag().as_bytes();
        out[..tag.len()].copy_from_slice(tag);
        out
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self, CodecId::Adapt | CodecId::Adapt2)
    }

    /// ppmd and libbsc were optional C-library backends in earlier builds;
    /// the names resolve but the backends are not built in.
    pub fn is_available(&self) -> bool {
        !matches!(self, CodecId::Ppmd | CodecId::Libbsc)
    }
}

/// Per-codec properties consulted by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct CodecProps {
    /// Delta2 stride; 0 disables Delta2 for this backend.
    pub delta2_span: usize,
    /// Worst-case growth headroom for buffer sizing.
    pub buf_extra: u64,
    /// Threads the backend consumes internally (partitioned out of the
    /// pipeline thread budget).
    pub backend_threads: usize,
}

pub fn props(id: CodecId, _level: u32, chunksize: u64) -> CodecProps {
    let (delta2_span, buf_extra) = match id {
        CodecId::Lzfx => (50, chunksize / 16 + 64),
        CodecId::Lz4 => (100, chunksize / 255 + 16),
        CodecId::None => (0, 0),
        _ => (100, chunksize / 1000 + 128),
    };
    CodecProps {
        delta2_span,
        buf_extra,
        backend_threads: 1,
    }
}

/// A chunk compression backend. Both directions append to `dst` (callers
/// build framed payloads behind prefix bytes). `compress` returns the
/// adaptive sub-codec id (0 for plain backends); whether the result is kept
/// is the caller's decision (no-gain fallback). `decompress` dispatches on
/// the chunk flag byte for adaptive modes; `dst_hint` is the expected
/// plaintext length.
pub trait Codec: Send {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError>;
    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        dst_hint: usize,
        flags: u8,
    ) -> Result<(), CodecError>;
}

pub fn create(id: CodecId, level: u32, chunksize: u64) -> Result<Box<dyn Codec>, CodecError> {
    match id {
        CodecId::Lzfx => Ok(Box::new(lzfx::LzfxCodec::new(level))),
        CodecId::Lz4 => Ok(Box::new(lz4::Lz4Codec::new())),
        CodecId::Zlib => Ok(Box::new(zlib::ZlibCodec::new(level))),
        CodecId::Lzma | CodecId::LzmaMt => Ok(Box::new(lzma::LzmaCodec::new())),
        CodecId::Bzip2 => Ok(Box::new(bzip2::Bzip2Codec::new(level))),
        CodecId::Zstd => Ok(Box::new(zstd::ZstdCodec::new(level))),
        CodecId::None => Ok(Box::new(none::NoneCodec)),
        CodecId::Adapt => Ok(Box::new(adapt::AdaptCodec::new(level, chunksize, false)?)),
        CodecId::Adapt2 => Ok(Box::new(adapt::AdaptCodec::new(level, chunksize, true)?)),
        CodecId::Ppmd | CodecId::Libbsc => Err(CodecError::NotBuilt {
            name: id.tag(),
        }),
    }
}

#[derive(Debug)]
pub enum CodecError {
    UnknownAlgorithm(String),
    NotBuilt { name: &'static str },
    ProcessFailed { codec: &'static str, msg: String },
    Corrupt { codec: &'static str },
    UnknownSubCodec { id: u8 },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CodecError::*;
        match self {
            UnknownAlgorithm(name) => write!(f, "unknown algorithm: {}", name),
            NotBuilt { name } => write!(f, "{} is not built into this configuration", name),
            ProcessFailed { codec, msg } => write!(f, "codec {} failed: {}", codec, msg),
            Corrupt { codec } => write!(f, "codec {}: corrupt compressed data", codec),
            UnknownSubCodec { id } => write!(f, "unknown adaptive sub-codec id: {}", id),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_longer_tags() {
        assert_eq!(CodecId::resolve("lzmaMt").unwrap(), CodecId::LzmaMt);
        assert_eq!(CodecId::resolve("lzma").unwrap(), CodecId::Lzma);
        assert_eq!(CodecId::resolve("adapt2").unwrap(), CodecId::Adapt2);
        assert_eq!(CodecId::resolve("adapt").unwrap(), CodecId::Adapt);
    }

    #[test]
    fn resolve_accepts_padded_header_tags() {
        let field = CodecId::Bzip2.tag_field();
        let name = String::from_utf8_lossy(&field);
        assert_eq!(CodecId::resolve(&name).unwrap(), CodecId::Bzip2);
    }

    #[test]
    fn resolve_rejects_garbage() {
        assert!(CodecId::resolve("brotli").is_err());
        assert!(CodecId::resolve("").is_err());
    }

    #[test]
    fn unavailable_backends_error_on_create() {
        assert!(matches!(
            create(CodecId::Ppmd, 6, 1 << 20),
            Err(CodecError::NotBuilt { .. })
        ));
    }
}
