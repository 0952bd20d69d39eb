//! Container format: file header, chunk framing constants and trailer.
//!
//! The file header is assembled in one contiguous buffer so the
//! authenticator (HMAC under crypto, CRC32 otherwise) is computed over the
//! exact bytes that hit the wire, and verified the same way on decode
//! before any payload is touched.

pub mod decode;
pub mod encode;
pub mod types;

pub use decode::{read_header, verify_header_crc, verify_header_hmac, RawHeader};
pub use encode::{encode_header, write_header, write_trailer};
pub use types::{ChunkError, CryptoHeader, FileHeader, HeaderError};
