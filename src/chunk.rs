//! Chunk types: the unit of data moved through streams.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// A unit of data handed from a producer to a stream.
///
/// Chunks are immutable once created:
/// - `Bytes`: a byte buffer (cheap to clone, reference counted)
/// - `Text`: a string that has not yet been encoded to bytes
/// - `Object`: an arbitrary value, only meaningful in object mode
///
/// # Example
///
/// ```rust
/// use sluice::chunk::Chunk;
///
/// let bytes = Chunk::from(&b"hello"[..]);
/// assert_eq!(bytes.len(), 5);
///
/// let text = Chunk::from("héllo");
/// assert_eq!(text.len(), 6); // measured in UTF-8 bytes
///
/// let obj = Chunk::object(42u32);
/// assert_eq!(obj.len(), 1);
/// assert_eq!(obj.downcast_ref::<u32>(), Some(&42));
/// ```
#[derive(Clone)]
pub enum Chunk {
    /// Raw bytes.
    Bytes(Bytes),
    /// A string, measured by its UTF-8 byte length.
    Text(String),
    /// An opaque value for object-mode streams.
    Object(ObjectChunk),
}

/// Type-erased, shared, immutable value carried by object-mode streams.
#[derive(Clone)]
pub struct ObjectChunk(Rc<dyn Any>);

impl ObjectChunk {
    /// Wrap a value.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the value as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Check whether two handles point at the same value.
    pub fn ptr_eq(&self, other: &ObjectChunk) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObjectChunk(..)")
    }
}

impl Chunk {
    /// Create an object chunk.
    pub fn object<T: Any>(value: T) -> Self {
        Chunk::Object(ObjectChunk::new(value))
    }

    /// Measured length: bytes for `Bytes`/`Text`, 1 for `Object`.
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(b) => b.len(),
            Chunk::Text(s) => s.len(),
            Chunk::Object(_) => 1,
        }
    }

    /// Check if the chunk carries no data.
    ///
    /// Objects are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Chunk::Bytes(b) => b.is_empty(),
            Chunk::Text(s) => s.is_empty(),
            Chunk::Object(_) => false,
        }
    }

    /// Check if this is an object chunk.
    pub fn is_object(&self) -> bool {
        matches!(self, Chunk::Object(_))
    }

    /// View the payload as bytes (`Text` yields its UTF-8 encoding).
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Chunk::Bytes(b) => Some(b),
            Chunk::Text(s) => Some(s.as_bytes()),
            Chunk::Object(_) => None,
        }
    }

    /// View the payload as text, if it is a `Text` chunk.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Chunk::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow an object payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Chunk::Object(o) => o.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Convert a `Text` chunk into bytes using `encoding`.
    ///
    /// `Bytes` and `Object` chunks are returned unchanged.
    pub fn encode(self, encoding: Encoding) -> Result<Chunk> {
        match self {
            Chunk::Text(s) => encoding.encode(&s).map(Chunk::Bytes),
            other => Ok(other),
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Chunk::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Chunk::Object(o) => o.fmt(f),
        }
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Chunk::Bytes(a), Chunk::Bytes(b)) => a == b,
            (Chunk::Text(a), Chunk::Text(b)) => a == b,
            (Chunk::Object(a), Chunk::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Bytes> for Chunk {
    fn from(b: Bytes) -> Self {
        Chunk::Bytes(b)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Chunk {
    fn from(v: &[u8]) -> Self {
        Chunk::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Text(s)
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Text(s.to_owned())
    }
}

// ============================================================================
// Encodings
// ============================================================================

/// Character encodings understood by text conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8 (default).
    #[default]
    Utf8,
    /// ISO-8859-1, one byte per code point (`binary` alias).
    Latin1,
    /// 7-bit ASCII.
    Ascii,
    /// Lowercase hexadecimal, two characters per byte.
    Hex,
}

impl Encoding {
    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Latin1 => "latin1",
            Encoding::Ascii => "ascii",
            Encoding::Hex => "hex",
        }
    }

    /// Encode a string into bytes.
    ///
    /// Latin-1 and ASCII keep the low byte of each code point. Malformed hex
    /// input is rejected with [`Error::InvalidChunk`].
    pub fn encode(&self, s: &str) -> Result<Bytes> {
        match self {
            Encoding::Utf8 => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Encoding::Latin1 | Encoding::Ascii => Ok(s.chars().map(|c| c as u32 as u8).collect()),
            Encoding::Hex => hex::decode(s)
                .map(Bytes::from)
                .map_err(|_| Error::InvalidChunk("hex")),
        }
    }

    /// Decode a complete byte sequence.
    ///
    /// Invalid UTF-8 is replaced with U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Ascii => bytes.iter().map(|&b| (b & 0x7f) as char).collect(),
            Encoding::Hex => hex::encode(bytes),
        }
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            "ascii" => Ok(Encoding::Ascii),
            "hex" => Ok(Encoding::Hex),
            _ => Err(Error::UnknownEncoding(s.to_owned())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_lengths() {
        assert_eq!(Chunk::from("hello").len(), 5);
        assert_eq!(Chunk::from(vec![0u8; 16]).len(), 16);
        assert_eq!(Chunk::object("anything").len(), 1);
        assert!(Chunk::from("").is_empty());
        assert!(!Chunk::object(()).is_empty());
    }

    #[test]
    fn test_object_equality_is_identity() {
        let a = Chunk::object(1u8);
        let b = a.clone();
        let c = Chunk::object(1u8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_encode_text_chunk() {
        let chunk = Chunk::from("abc").encode(Encoding::Utf8).unwrap();
        assert_eq!(chunk, Chunk::Bytes(Bytes::from_static(b"abc")));

        let hex = Chunk::from("00ff10").encode(Encoding::Hex).unwrap();
        assert_eq!(hex.as_bytes(), Some(&[0x00, 0xff, 0x10][..]));
    }

    #[test]
    fn test_encoding_roundtrip_latin1() {
        let bytes = Encoding::Latin1.encode("é").unwrap();
        assert_eq!(&bytes[..], &[0xe9]);
        assert_eq!(Encoding::Latin1.decode(&bytes), "é");
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("binary".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert!(matches!(
            "ebcdic".parse::<Encoding>(),
            Err(Error::UnknownEncoding(_))
        ));
    }

    #[test]
    fn test_hex_decode() {
        assert_eq!(Encoding::Hex.decode(&[0xde, 0xad]), "dead");
    }

    #[test]
    fn test_malformed_hex_is_rejected() {
        assert!(matches!(Encoding::Hex.encode("abzz"), Err(Error::InvalidChunk("hex"))));
        assert!(matches!(Encoding::Hex.encode("abc"), Err(Error::InvalidChunk("hex"))));
        assert!(matches!(
            Chunk::from("zz").encode(Encoding::Hex),
            Err(Error::InvalidChunk("hex"))
        ));
    }
}
