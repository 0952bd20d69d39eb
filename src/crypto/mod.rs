//! Chunk encryption.
//!
//! AES-CTR and XSalsa20, both run as stream ciphers so encryption is
//! in-place and length-preserving; all integrity comes from the chunk HMAC
//! (see `mac`). Session keys are derived from the password with PBKDF2 over
//! a per-run random salt. Password and key material are scrubbed on drop.

use std::fmt;

use aes::{Aes128, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr64BE;
use num_enum::TryFromPrimitive;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use salsa20::XSalsa20;
use sha2::Sha256;
use zeroize::Zeroizing;

pub mod mac;
pub mod password;

pub use mac::ChunkMac;

use crate::constants::{
    crypto_ids, AES_NONCE_LEN, CRYPTO_SALT_LEN, KDF_ROUNDS, XSALSA20_NONCE_LEN,
};
use crate::utils::enum_name_or_hex;

type Aes128Ctr = Ctr64BE<Aes128>;
type Aes256Ctr = Ctr64BE<Aes256>;

#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
pub enum CryptoAlg {
    Aes = crypto_ids::CRYPTO_ALG_AES,
    Salsa20 = crypto_ids::CRYPTO_ALG_SALSA20,
}

impl CryptoAlg {
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name.to_ascii_uppercase().as_str() {
            "AES" => Ok(CryptoAlg::Aes),
            "SALSA20" => Ok(CryptoAlg::Salsa20),
            _ => Err(CryptoError::UnknownAlgName(name.to_string())),
        }
    }

    pub fn from_flags(raw: u16) -> Result<Self, CryptoError> {
        Self::try_from_primitive(raw).map_err(|_| CryptoError::UnsupportedAlg { raw })
    }

    pub fn nonce_len(&self) -> usize {
        match self {
            CryptoAlg::Aes => AES_NONCE_LEN,
            CryptoAlg::Salsa20 => XSALSA20_NONCE_LEN,
        }
    }

    /// Key width the cipher actually consumes. XSalsa20 keys are fixed at
    /// 32 bytes regardless of the requested length.
    fn cipher_keylen(&self, keylen: usize) -> usize {
        match self {
            CryptoAlg::Aes => keylen,
            CryptoAlg::Salsa20 => 32,
        }
    }
}

/// Read-only after construction; shared by every worker.
pub struct CryptoCtx {
    alg: CryptoAlg,
    keylen: usize,
    key: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    nonce: Vec<u8>,
}

impl CryptoCtx {
    /// Fresh salt and nonce for a new archive.
    pub fn new_encrypt(alg: CryptoAlg, pw: &[u8], keylen: usize) -> Result<Self, CryptoError> {
        if keylen != 16 && keylen != 32 {
            return Err(CryptoError::InvalidKeyLen { have: keylen });
        }
        let mut salt = vec![0u8; CRYPTO_SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = vec![0u8; alg.nonce_len()];
        OsRng.fill_bytes(&mut nonce);
        Self::derive(alg, pw, keylen, salt, nonce)
    }

    /// Salt and nonce recovered from the file header.
    pub fn new_decrypt(
        alg: CryptoAlg,
        pw: &[u8],
        keylen: usize,
        salt: Vec<u8>,
        nonce: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        if keylen != 16 && keylen != 32 {
            return Err(CryptoError::InvalidKeyLen { have: keylen });
        }
        if nonce.len() != alg.nonce_len() {
            return Err(CryptoError::Failure("nonce length mismatch".to_string()));
        }
        Self::derive(alg, pw, keylen, salt, nonce)
    }

    fn derive(
        alg: CryptoAlg,
        pw: &[u8],
        keylen: usize,
        salt: Vec<u8>,
        nonce: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        let mut key = Zeroizing::new(vec![0u8; alg.cipher_keylen(keylen)]);
        pbkdf2_hmac::<Sha256>(pw, &salt, KDF_ROUNDS, &mut key);
        Ok(Self {
            alg,
            keylen,
            key,
            salt,
            nonce,
        })
    }

    pub fn alg(&self) -> CryptoAlg {
        self.alg
    }

    pub fn keylen(&self) -> usize {
        self.keylen
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub(crate) fn mac_key(&self) -> &[u8] {
        &self.key
    }

    /// Encrypt or decrypt `buf` in place (CTR mode is an involution). The
    /// chunk id separates keystreams: AES places it in the upper half of
    /// the counter block, XSalsa20 folds it into the nonce tail.
    pub fn crypto_buf(&self, buf: &mut [u8], id: u64) -> Result<(), CryptoError> {
        match self.alg {
            CryptoAlg::Aes => {
                let mut iv = [0u8; 16];
                iv[..8].copy_from_slice(&self.nonce);
                iv[8..].copy_from_slice(&((id & 0xffff_ffff) << 32).to_be_bytes());
                match self.keylen {
                    16 => {
                        let mut cipher = Aes128Ctr::new_from_slices(&self.key, &iv)
                            .map_err(|_| CryptoError::InvalidKeyLen { have: self.keylen })?;
                        cipher.apply_keystream(buf);
                    }
                    32 => {
                        let mut cipher = Aes256Ctr::new_from_slices(&self.key, &iv)
                            .map_err(|_| CryptoError::InvalidKeyLen { have: self.keylen })?;
                        cipher.apply_keystream(buf);
                    }
                    other => return Err(CryptoError::InvalidKeyLen { have: other }),
                }
            }
            CryptoAlg::Salsa20 => {
                let mut nonce = [0u8; XSALSA20_NONCE_LEN];
                nonce.copy_from_slice(&self.nonce);
                for (n, b) in nonce[16..].iter_mut().zip(id.to_be_bytes()) {
                    *n ^= b;
                }
                let mut cipher = XSalsa20::new_from_slices(&self.key, &nonce)
                    .map_err(|_| CryptoError::InvalidKeyLen { have: self.key.len() })?;
                cipher.apply_keystream(buf);
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum CryptoError {
    UnknownAlgName(String),
    UnsupportedAlg { raw: u16 },
    InvalidKeyLen { have: usize },
    PasswordUnavailable(String),
    Failure(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CryptoError::*;
        match self {
            UnknownAlgName(name) => {
                write!(f, "invalid encryption algorithm: {} (AES or SALSA20)", name)
            }
            UnsupportedAlg { raw } => write!(
                f,
                "invalid encryption algorithm code: {}",
                enum_name_or_hex::<CryptoAlg>(*raw)
            ),
            InvalidKeyLen { have } => write!(f, "key length should be 16 or 32, got {}", have),
            PasswordUnavailable(msg) => write!(f, "failed to get password: {}", msg),
            Failure(msg) => write!(f, "crypto failure: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_buf_is_length_preserving_involution() {
        for alg in [CryptoAlg::Aes, CryptoAlg::Salsa20] {
            let ctx = CryptoCtx::new_encrypt(alg, b"hunter2", 32).unwrap();
            let orig: Vec<u8> = (0..=255).cycle().take(5000).collect();
            let mut buf = orig.clone();
            ctx.crypto_buf(&mut buf, 3).unwrap();
            assert_eq!(buf.len(), orig.len());
            assert_ne!(buf, orig);
            ctx.crypto_buf(&mut buf, 3).unwrap();
            assert_eq!(buf, orig);
        }
    }

    #[test]
    fn chunk_ids_separate_keystreams() {
        let ctx = CryptoCtx::new_encrypt(CryptoAlg::Aes, b"pw", 16).unwrap();
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        ctx.crypto_buf(&mut a, 0).unwrap();
        ctx.crypto_buf(&mut b, 1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_password_derives_different_key() {
        let salt = vec![9u8; CRYPTO_SALT_LEN];
        let nonce = vec![1u8; AES_NONCE_LEN];
        let a =
            CryptoCtx::new_decrypt(CryptoAlg::Aes, b"right", 32, salt.clone(), nonce.clone())
                .unwrap();
        let b = CryptoCtx::new_decrypt(CryptoAlg::Aes, b"wrong", 32, salt, nonce).unwrap();
        let mut x = vec![0u8; 32];
        let mut y = vec![0u8; 32];
        a.crypto_buf(&mut x, 0).unwrap();
        b.crypto_buf(&mut y, 0).unwrap();
        assert_ne!(x, y);
    }
}
