//! Chunk and header authentication.
//!
//! With encryption the authenticator is an HMAC keyed from the derived
//! session key, in the digest family selected by the checksum kind; without
//! encryption it degrades to a CRC32. Both cover the full framed region
//! with the mac slot zeroed.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};
use zeroize::Zeroizing;

use crate::checksum::ChecksumKind;
use crate::crypto::{CryptoCtx, CryptoError};

enum MacState {
    Crc32(crc32fast::Hasher),
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
    Sha3_256(Hmac<Sha3_256>),
    Sha3_512(Hmac<Sha3_512>),
    Blake3(blake3::Hasher),
}

/// Streaming authenticator, reinitialized per chunk.
pub struct ChunkMac {
    kind: ChecksumKind,
    key: Zeroizing<Vec<u8>>,
    state: MacState,
}

/// Authenticator width on the wire: the digest width under crypto, a CRC32
/// otherwise.
pub fn mac_bytes(kind: ChecksumKind, crypto: bool) -> usize {
    if crypto {
        kind.cksum_bytes()
    } else {
        4
    }
}

fn make_state(kind: ChecksumKind, key: &[u8]) -> Result<MacState, CryptoError> {
    let bad_key = |_| CryptoError::Failure("HMAC key setup failed".to_string());
    Ok(match kind {
        ChecksumKind::Crc32 => {
            return Err(CryptoError::Failure(
                "CRC32 cannot key an HMAC; pick a digest checksum".to_string(),
            ))
        }
        ChecksumKind::Sha256 => MacState::Sha256(Hmac::new_from_slice(key).map_err(bad_key)?),
        ChecksumKind::Sha512 => MacState::Sha512(Hmac::new_from_slice(key).map_err(bad_key)?),
        ChecksumKind::Sha3_256 => MacState::Sha3_256(Hmac::new_from_slice(key).map_err(bad_key)?),
        ChecksumKind::Sha3_512 => MacState::Sha3_512(Hmac::new_from_slice(key).map_err(bad_key)?),
        ChecksumKind::Blake3 => {
            // BLAKE3 is keyed natively; fold arbitrary key lengths to 32.
            let k = blake3::derive_key("pcompress chunk mac v1", key);
            MacState::Blake3(blake3::Hasher::new_keyed(&k))
        }
    })
}

impl ChunkMac {
    /// CRC32 authenticator for the non-crypto path.
    pub fn new_crc32() -> Self {
        Self {
            kind: ChecksumKind::Crc32,
            key: Zeroizing::new(Vec::new()),
            state: MacState::Crc32(crc32fast::Hasher::new()),
        }
    }

    /// HMAC authenticator keyed from the crypto context.
    pub fn new_hmac(kind: ChecksumKind, ctx: &CryptoCtx) -> Result<Self, CryptoError> {
        let key = Zeroizing::new(ctx.mac_key().to_vec());
        let state = make_state(kind, &key)?;
        Ok(Self { kind, key, state })
    }

    pub fn reinit(&mut self) {
        self.state = match self.kind {
            ChecksumKind::Crc32 => MacState::Crc32(crc32fast::Hasher::new()),
            // The key was validated at construction.
            _ => make_state(self.kind, &self.key).unwrap(),
        };
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            MacState::Crc32(h) => h.update(data),
            MacState::Sha256(h) => h.update(data),
            MacState::Sha512(h) => h.update(data),
            MacState::Sha3_256(h) => h.update(data),
            MacState::Sha3_512(h) => h.update(data),
            MacState::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Serialize the authenticator and reset for the next chunk.
    pub fn finalize(&mut self) -> Vec<u8> {
        let out = match &mut self.state {
            MacState::Crc32(h) => h.clone().finalize().to_be_bytes().to_vec(),
            MacState::Sha256(h) => h.clone().finalize().into_bytes().to_vec(),
            MacState::Sha512(h) => h.clone().finalize().into_bytes().to_vec(),
            MacState::Sha3_256(h) => h.clone().finalize().into_bytes().to_vec(),
            MacState::Sha3_512(h) => h.clone().finalize().into_bytes().to_vec(),
            MacState::Blake3(h) => h.finalize().as_bytes().to_vec(),
        };
        self.reinit();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoAlg;

    #[test]
    fn crc32_matches_one_shot() {
        let mut mac = ChunkMac::new_crc32();
        mac.update(b"hello ");
        mac.update(b"world");
        let got = mac.finalize();
        assert_eq!(got, crc32fast::hash(b"hello world").to_be_bytes());
    }

    #[test]
    fn reinit_gives_identical_macs() {
        let ctx = CryptoCtx::new_encrypt(CryptoAlg::Aes, b"pw", 32).unwrap();
        let mut mac = ChunkMac::new_hmac(ChecksumKind::Sha256, &ctx).unwrap();
        mac.update(b"chunk data");
        let a = mac.finalize();
        mac.update(b"chunk data");
        let b = mac.finalize();
        assert_eq!(a, b);
        assert_eq!(a.len(), mac_bytes(ChecksumKind::Sha256, true));
    }

    #[test]
    fn blake3_keyed_mode_works() {
        let ctx = CryptoCtx::new_encrypt(CryptoAlg::Salsa20, b"pw", 32).unwrap();
        let mut mac = ChunkMac::new_hmac(ChecksumKind::Blake3, &ctx).unwrap();
        mac.update(b"x");
        assert_eq!(mac.finalize().len(), 32);
    }

    #[test]
    fn crc32_kind_cannot_key_hmac() {
        let ctx = CryptoCtx::new_encrypt(CryptoAlg::Aes, b"pw", 32).unwrap();
        assert!(ChunkMac::new_hmac(ChecksumKind::Crc32, &ctx).is_err());
    }
}
