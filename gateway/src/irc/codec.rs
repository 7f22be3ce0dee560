//! Frames the upstream byte stream into CRLF-terminated IRC lines.
//!
//! The decoder yields raw line bytes without the terminator; character set
//! decoding happens later so an encoding switch only affects lines that have
//! not been handed out yet.
use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Hard cap on buffered bytes that contain no line terminator yet.
pub const MAX_BUFFERED_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum LineCodecError {
    #[error("unterminated line exceeds {MAX_BUFFERED_BYTES} bytes")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Default)]
pub struct IrcLineCodec {
    // Bytes before this offset are known not to start a CRLF
    next_index: usize,
}

impl Decoder for IrcLineCodec {
    type Item = BytesMut;
    type Error = LineCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.next_index.min(src.len());
        match src[start..].windows(2).position(|w| w == b"\r\n") {
            Some(offset) => {
                let line = src.split_to(start + offset);
                src.advance(2);
                self.next_index = 0;
                Ok(Some(line))
            }
            None => {
                if src.len() > MAX_BUFFERED_BYTES {
                    return Err(LineCodecError::LineTooLong);
                }
                // A trailing CR may still be completed by the next read
                self.next_index = src.len().saturating_sub(1);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                // A partial line at EOF is discarded
                src.clear();
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<Vec<u8>> for IrcLineCodec {
    type Error = LineCodecError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(&item);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
