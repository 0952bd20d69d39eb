//! Header and trailer serialization.

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::container::types::FileHeader;
use crate::crypto::ChunkMac;

/// Serialize the pre-authentication header bytes in one contiguous buffer.
pub fn encode_header(h: &FileHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&h.codec.tag_field());
    out.write_u16::<BigEndian>(h.version).unwrap();
    out.write_u16::<BigEndian>(h.flags).unwrap();
    out.write_u64::<BigEndian>(h.chunksize).unwrap();
    out.write_u32::<BigEndian>(h.level).unwrap();
    if let Some(c) = &h.crypto {
        out.write_u32::<BigEndian>(c.salt.len() as u32).unwrap();
        out.extend_from_slice(&c.salt);
        out.extend_from_slice(&c.nonce);
        out.write_u32::<BigEndian>(c.keylen).unwrap();
    }
    out
}

/// Write the header followed by its authenticator: an HMAC over the header
/// bytes when a mac is supplied (crypto), a big-endian CRC32 otherwise.
pub fn write_header<W: Write>(
    w: &mut W,
    h: &FileHeader,
    hmac: Option<&mut ChunkMac>,
) -> io::Result<()> {
    let bytes = encode_header(h);
    w.write_all(&bytes)?;
    match hmac {
        Some(mac) => {
            mac.update(&bytes);
            let tag = mac.finalize();
            w.write_all(&tag)?;
        }
        None => {
            let crc = crc32fast::hash(&bytes);
            w.write_u32::<BigEndian>(crc)?;
        }
    }
    Ok(())
}

/// End-of-stream marker: a zero compressed length.
pub fn write_trailer<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_u64::<BigEndian>(0)
}
