use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chanio::Error;

/// A growable byte buffer with an independent read position.
///
/// ```text
/// +-------------------+------------------+------------------+
/// | discardable bytes |  readable bytes  |  writable bytes  |
/// +-------------------+------------------+------------------+
/// 0      <=      reader_index   <=   writer_index    <=    capacity
/// ```
///
/// The buffer is deliberately not `Clone`: it moves from stage to stage, and
/// [`ByteBuffer::duplicate`] makes an explicit copy of the readable region.
#[derive(Default)]
pub struct ByteBuffer {
    buf: BytesMut,
    reader_index: usize,
}

impl ByteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer that can hold `capacity` bytes without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            reader_index: 0,
        }
    }

    /// Position of the next byte to read.
    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    /// Position of the next byte to write.
    pub fn writer_index(&self) -> usize {
        self.buf.len()
    }

    /// Bytes the buffer can hold before it has to grow.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Number of bytes between the reader and the writer index.
    pub fn readable_bytes(&self) -> usize {
        self.buf.len() - self.reader_index
    }

    /// Whether nothing is left to read.
    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    /// The readable region.
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.reader_index..]
    }

    /// Appends bytes at the writer index, growing as needed.
    pub fn write_bytes(&mut self, src: &[u8]) {
        self.buf.put_slice(src);
    }

    /// Appends the UTF-8 encoding of `s`.
    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Moves all readable bytes of `other` into this buffer.
    pub fn write_buffer(&mut self, other: ByteBuffer) {
        self.write_bytes(other.readable());
    }

    /// Reads exactly `len` bytes, or returns `None` and reads nothing if fewer are readable.
    pub fn read_bytes(&mut self, len: usize) -> Option<Bytes> {
        if len > self.readable_bytes() {
            return None;
        }
        let out = Bytes::copy_from_slice(&self.buf[self.reader_index..self.reader_index + len]);
        self.reader_index += len;
        Some(out)
    }

    /// Reads exactly `len` bytes as UTF-8.
    ///
    /// Returns `Ok(None)` when fewer than `len` bytes are readable and
    /// `Err(CodecDecode)` when they are not valid UTF-8; in both cases the
    /// reader index is left where it was.
    pub fn read_string(&mut self, len: usize) -> Result<Option<String>, Error> {
        if len > self.readable_bytes() {
            return Ok(None);
        }
        let start = self.reader_index;
        let s = std::str::from_utf8(&self.buf[start..start + len])
            .map_err(|err| Error::CodecDecode(format!("invalid utf-8: {}", err)))?
            .to_string();
        self.reader_index += len;
        Ok(Some(s))
    }

    /// Skips up to `len` readable bytes.
    pub fn advance(&mut self, len: usize) {
        self.reader_index += len.min(self.readable_bytes());
    }

    /// Drops the bytes before the reader index and moves the readable region to the front.
    pub fn discard_read_bytes(&mut self) {
        if self.reader_index > 0 {
            self.buf.advance(self.reader_index);
            self.reader_index = 0;
        }
    }

    /// Drops every byte and resets both indices.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.reader_index = 0;
    }

    /// Copies the readable region into a new, independent buffer.
    pub fn duplicate(&self) -> ByteBuffer {
        ByteBuffer::from(self.readable())
    }

    /// Consumes the buffer, returning its readable region.
    pub fn into_bytes(mut self) -> Bytes {
        self.discard_read_bytes();
        self.buf.freeze()
    }

    /// Consumes the buffer, returning its readable region as a mutable buffer.
    pub fn into_bytes_mut(mut self) -> BytesMut {
        self.discard_read_bytes();
        self.buf
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("reader_index", &self.reader_index)
            .field("writer_index", &self.writer_index())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.readable() == other.readable()
    }
}

impl Eq for ByteBuffer {}

impl From<&[u8]> for ByteBuffer {
    fn from(src: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(src),
            reader_index: 0,
        }
    }
}

impl From<&str> for ByteBuffer {
    fn from(src: &str) -> Self {
        Self::from(src.as_bytes())
    }
}

impl From<String> for ByteBuffer {
    fn from(src: String) -> Self {
        Self::from(src.into_bytes())
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(src: Vec<u8>) -> Self {
        Self {
            buf: BytesMut::from(&src[..]),
            reader_index: 0,
        }
    }
}

impl From<BytesMut> for ByteBuffer {
    fn from(buf: BytesMut) -> Self {
        Self {
            buf,
            reader_index: 0,
        }
    }
}

impl From<Bytes> for ByteBuffer {
    fn from(src: Bytes) -> Self {
        Self::from(&src[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_indices(buf: &ByteBuffer) {
        assert!(buf.reader_index() <= buf.writer_index());
        assert!(buf.writer_index() <= buf.capacity());
        assert_eq!(
            buf.readable_bytes(),
            buf.writer_index() - buf.reader_index()
        );
    }

    #[test]
    fn test_write_then_read() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.write_string("hello ");
        buf.write_bytes(b"world");
        assert_indices(&buf);
        assert_eq!(buf.readable_bytes(), 11);

        assert_eq!(buf.read_string(5).unwrap(), Some("hello".to_string()));
        assert_indices(&buf);
        assert_eq!(buf.read_bytes(1), Some(Bytes::from_static(b" ")));
        assert_eq!(buf.readable(), b"world");
    }

    #[test]
    fn test_short_read_leaves_reader_index() {
        let mut buf = ByteBuffer::from("abc");
        assert_eq!(buf.read_bytes(4), None);
        assert_eq!(buf.read_string(4).unwrap(), None);
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.readable_bytes(), 3);
    }

    #[test]
    fn test_read_string_rejects_invalid_utf8() {
        let mut buf = ByteBuffer::from(vec![0x61, 0xff, 0x62]);
        assert!(matches!(buf.read_string(3), Err(Error::CodecDecode(_))));
        assert_eq!(buf.reader_index(), 0);
    }

    #[test]
    fn test_discard_read_bytes() {
        let mut buf = ByteBuffer::from("0123456789");
        buf.advance(4);
        assert_eq!(buf.reader_index(), 4);

        buf.discard_read_bytes();
        assert_indices(&buf);
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.writer_index(), 6);
        assert_eq!(buf.readable(), b"456789");

        buf.advance(100);
        assert!(buf.is_empty());
        assert_indices(&buf);
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut buf = ByteBuffer::from("abcdef");
        buf.advance(2);
        let mut copy = buf.duplicate();
        assert_eq!(copy, buf);

        copy.advance(2);
        copy.write_string("gh");
        assert_eq!(buf.readable(), b"cdef");
        assert_eq!(copy.readable(), b"efgh");
        assert_eq!(buf.into_bytes(), Bytes::from_static(b"cdef"));
    }
}
