//! Line framing for the econ protocol.
//!
//! Game servers echo player names verbatim, so a line may carry bytes that are
//! not valid UTF-8. Such lines are decoded lossily. Lines longer than
//! [`MAX_LINE_LENGTH`] are dropped and reading resumes at the next newline.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Longest line accepted from the server, excluding the newline.
pub const MAX_LINE_LENGTH: usize = 8192;

/// A codec that frames econ lines on `\n`, tolerating a trailing `\r`.
#[derive(Debug, Default)]
pub struct EconCodec {
    /// Buffer offset already scanned for a newline.
    next_index: usize,
    /// Set while skipping the rest of an overlong line.
    discarding: bool,
}

impl EconCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn decode_lossy(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for EconCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match newline {
                Some(pos) if self.discarding => {
                    src.advance(pos + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                None if self.discarding => {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                Some(pos) if pos > MAX_LINE_LENGTH => {
                    warn!("⚠️ Dropping econ line of {} bytes (limit {})", pos, MAX_LINE_LENGTH);
                    src.advance(pos + 1);
                    self.next_index = 0;
                }
                Some(pos) => {
                    let line = src.split_to(pos + 1);
                    self.next_index = 0;
                    return Ok(Some(decode_lossy(&line[..pos])));
                }
                None if src.len() > MAX_LINE_LENGTH => {
                    warn!("⚠️ Dropping econ line longer than {} bytes", MAX_LINE_LENGTH);
                    self.discarding = true;
                }
                None => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        self.next_index = 0;
        Ok(Some(decode_lossy(&rest)))
    }
}

impl Encoder<String> for EconCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
