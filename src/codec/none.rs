//! Pass-through backend. Only meaningful together with dedup so the dedup
//! structure can be post-processed by an external utility; chunks always
//! end up flagged uncompressed.

use crate::codec::{Codec, CodecError};

pub struct NoneCodec;

impl Codec for NoneCodec {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError> {
        dst.extend_from_slice(src);
        Ok(0)
    }

    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        _dst_hint: usize,
        _flags: u8,
    ) -> Result<(), CodecError> {
        dst.extend_from_slice(src);
        Ok(())
    }
}
