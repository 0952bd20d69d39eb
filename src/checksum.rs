//! Chunk checksum kinds and digest computation.
//!
//! The checksum kind is recorded in the file header flags and sized per
//! kind; under encryption the plaintext checksum is dropped entirely and
//! the HMAC of the same kind takes over (see `crypto::mac`).

use std::fmt;
use std::thread;

use num_enum::TryFromPrimitive;
use sha2::{Digest as _, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

use crate::utils::enum_name_or_hex;

/// Supported checksum kinds. Codes are stored in the header flag bits.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
pub enum ChecksumKind {
    Crc32 = 0x0001,
    Sha256 = 0x0002,
    Sha512 = 0x0003,
    Sha3_256 = 0x0004,
    Sha3_512 = 0x0005,
    Blake3 = 0x0006,
}

pub const DEFAULT_CKSUM: ChecksumKind = ChecksumKind::Sha256;

/// Segment count for the single-chunk tree hash.
const TREE_SEGMENTS: usize = 4;
/// Below this the tree hash degenerates to a plain digest.
const TREE_MIN: usize = 4096;

#[derive(Debug)]
pub enum ChecksumError {
    UnknownKind { raw: u16 },
    UnknownName(String),
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumError::UnknownKind { raw } => write!(
                f,
                "unknown checksum code: {}",
                enum_name_or_hex::<ChecksumKind>(*raw)
            ),
            ChecksumError::UnknownName(name) => write!(f, "unknown checksum type: {}", name),
        }
    }
}

impl std::error::Error for ChecksumError {}

impl ChecksumKind {
    pub fn from_code(raw: u16) -> Result<Self, ChecksumError> {
        Self::try_from_primitive(raw).map_err(|_| ChecksumError::UnknownKind { raw })
    }

    pub fn from_name(name: &str) -> Result<Self, ChecksumError> {
        match name.to_ascii_uppercase().as_str() {
            "CRC32" => Ok(ChecksumKind::Crc32),
            "SHA256" => Ok(ChecksumKind::Sha256),
            "SHA512" => Ok(ChecksumKind::Sha512),
            "SHA3-256" | "SHA3_256" => Ok(ChecksumKind::Sha3_256),
            "SHA3-512" | "SHA3_512" => Ok(ChecksumKind::Sha3_512),
            "BLAKE3" => Ok(ChecksumKind::Blake3),
            _ => Err(ChecksumError::UnknownName(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChecksumKind::Crc32 => "CRC32",
            ChecksumKind::Sha256 => "SHA256",
            ChecksumKind::Sha512 => "SHA512",
            ChecksumKind::Sha3_256 => "SHA3-256",
            ChecksumKind::Sha3_512 => "SHA3-512",
            ChecksumKind::Blake3 => "BLAKE3",
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Digest width in bytes.
    pub fn cksum_bytes(&self) -> usize {
        match self {
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Sha256 | ChecksumKind::Sha3_256 | ChecksumKind::Blake3 => 32,
            ChecksumKind::Sha512 | ChecksumKind::Sha3_512 => 64,
        }
    }

    /// CRC32 cannot key an HMAC; digests can.
    pub fn can_mac(&self) -> bool {
        !matches!(self, ChecksumKind::Crc32)
    }

    pub fn list() -> &'static [ChecksumKind] {
        &[
            ChecksumKind::Crc32,
            ChecksumKind::Sha256,
            ChecksumKind::Sha512,
            ChecksumKind::Sha3_256,
            ChecksumKind::Sha3_512,
            ChecksumKind::Blake3,
        ]
    }
}

fn digest_once(kind: ChecksumKind, data: &[u8]) -> Vec<u8> {
    match kind {
        ChecksumKind::Crc32 => crc32fast::hash(data).to_be_bytes().to_vec(),
        ChecksumKind::Sha256 => Sha256::digest(data).to_vec(),
        ChecksumKind::Sha512 => Sha512::digest(data).to_vec(),
        ChecksumKind::Sha3_256 => Sha3_256::digest(data).to_vec(),
        ChecksumKind::Sha3_512 => Sha3_512::digest(data).to_vec(),
        ChecksumKind::Blake3 => blake3::hash(data).as_bytes().to_vec(),
    }
}

/// Compute the chunk checksum. With `tree` set (single-chunk mode) the
/// buffer is split into fixed segments hashed in parallel and the root
/// digest is taken over the concatenated leaf digests. CRC32 is always
/// single-pass.
pub fn compute_checksum(kind: ChecksumKind, data: &[u8], tree: bool) -> Vec<u8> {
    if !tree || kind == ChecksumKind::Crc32 || data.len() < TREE_MIN {
        return digest_once(kind, data);
    }

    let seg = data.len().div_ceil(TREE_SEGMENTS);
    let leaves: Vec<Vec<u8>> = thread::scope(|scope| {
        let handles: Vec<_> = data
            .chunks(seg)
            .map(|part| scope.spawn(move || digest_once(kind, part)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut concat = Vec::with_capacity(leaves.len() * kind.cksum_bytes());
    for leaf in &leaves {
        concat.extend_from_slice(leaf);
    }
    digest_once(kind, &concat)
}
