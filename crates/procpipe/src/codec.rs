use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Decodes a byte stream into UTF-8 text pieces as soon as they are complete.
///
/// A code point split across reads is held back until its remaining bytes
/// arrive. Invalid sequences are an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match std::str::from_utf8(src) {
            Ok(s) => {
                let out = s.to_owned();
                src.clear();
                Ok(Some(out))
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                if valid == 0 {
                    return Ok(None);
                }

                let out = String::from_utf8_lossy(&src[..valid]).into_owned();
                src.advance(valid);
                Ok(Some(out))
            }
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(text) => Ok(Some(text)),
            // a truncated code point at end-of-stream
            None if !src.is_empty() => {
                let out = String::from_utf8_lossy(src).into_owned();
                src.clear();
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }
}
