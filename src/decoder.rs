//! Incremental text decoding for readable streams with an encoding set.

use crate::chunk::Encoding;
use smallvec::SmallVec;
use std::borrow::Cow;

/// Decodes a byte stream into text chunk by chunk.
///
/// UTF-8 sequences split across chunk boundaries are held back until the
/// remaining bytes arrive, so every emitted string is complete.
///
/// # Example
///
/// ```rust
/// use sluice::chunk::Encoding;
/// use sluice::decoder::StringDecoder;
///
/// let mut decoder = StringDecoder::new(Encoding::Utf8);
/// let euro = "€".as_bytes();
/// assert_eq!(decoder.write(&euro[..1]), "");
/// assert_eq!(decoder.write(&euro[1..]), "€");
/// assert_eq!(decoder.end(), None);
/// ```
#[derive(Debug, Clone)]
pub struct StringDecoder {
    encoding: Encoding,
    pending: SmallVec<[u8; 4]>,
}

impl StringDecoder {
    /// Create a decoder for `encoding`.
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            pending: SmallVec::new(),
        }
    }

    /// The encoding being decoded.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode the next chunk of bytes.
    pub fn write(&mut self, bytes: &[u8]) -> String {
        if self.encoding != Encoding::Utf8 {
            return self.encoding.decode(bytes);
        }

        let input: Cow<'_, [u8]> = if self.pending.is_empty() {
            Cow::Borrowed(bytes)
        } else {
            let mut joined = self.pending.to_vec();
            joined.extend_from_slice(bytes);
            self.pending.clear();
            Cow::Owned(joined)
        };

        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            // Incomplete trailing sequence
                            self.pending.extend_from_slice(&rest[valid..]);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush any held-back bytes.
    ///
    /// An incomplete trailing sequence decodes to U+FFFD.
    pub fn end(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_passthrough_ascii_text() {
        let mut decoder = StringDecoder::new(Encoding::Utf8);
        assert_eq!(decoder.write(b"hello"), "hello");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_reassembles_split_sequence() {
        let mut decoder = StringDecoder::new(Encoding::Utf8);
        let bytes = "a😀b".as_bytes();
        // Split inside the 4-byte emoji
        assert_eq!(decoder.write(&bytes[..3]), "a");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.write(&bytes[3..]), "😀b");
        assert_eq!(decoder.end(), None);
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = StringDecoder::new(Encoding::Utf8);
        assert_eq!(decoder.write(&[b'a', 0xff, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_flushes_incomplete_tail() {
        let mut decoder = StringDecoder::new(Encoding::Utf8);
        assert_eq!(decoder.write(&[0xe2, 0x82]), "");
        assert_eq!(decoder.end().as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn test_decoder_hex() {
        let mut decoder = StringDecoder::new(Encoding::Hex);
        assert_eq!(decoder.write(&[0x01, 0xab]), "01ab");
    }
}
