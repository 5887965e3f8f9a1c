//! C1 — Dynamic byte buffer.
//!
//! A growable append-only byte container with an embedded read cursor, the
//! foundation every codec in this crate is built on (§4.1). Offset-addressable
//! rather than ring-buffered, since interior `remove(off, len)` and `[i]`
//! index access both need random access a head/tail ring can't give cheaply.
//! A plain `Vec<u8>` with an explicit cursor field does the job directly.

use crate::error::{Error, Result};
use std::io;

/// A growable sequence of bytes with a logical size and a read cursor, both
/// bounded by `0 <= offset <= size <= capacity`.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    size: usize,
    offset: usize,
}

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        Buffer {
            data: Vec::new(),
            size: 0,
            offset: 0,
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: Vec::with_capacity(capacity),
            size: 0,
            offset: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes not yet consumed by the read cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    /// The full logical contents, `data[0..size]`.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// The unread tail of the logical contents, `data[offset..size]`.
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.data[self.offset..self.size]
    }

    /// Grows capacity to at least `min_capacity`, doubling current capacity
    /// when that would satisfy the request (§4.1 growth policy: `max(requested,
    /// 2*current)`).
    pub fn reserve(&mut self, min_capacity: usize) {
        let current = self.data.capacity();
        if min_capacity <= current {
            return;
        }
        let target = min_capacity.max(current.saturating_mul(2)).max(1);
        self.data.reserve(target - self.data.len());
    }

    /// Appends raw bytes to the buffer, growing capacity as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve(self.size + bytes.len());
        if self.data.len() < self.size {
            self.data.resize(self.size, 0);
        }
        self.data.truncate(self.size);
        self.data.extend_from_slice(bytes);
        self.size += bytes.len();
    }

    /// Appends a sub-slice `bytes[off..off+len]`.
    pub fn append_slice(&mut self, bytes: &[u8], off: usize, len: usize) -> Result<()> {
        if off.checked_add(len).map_or(true, |end| end > bytes.len()) {
            return Err(Error::Misuse("append range out of bounds"));
        }
        self.append(&bytes[off..off + len]);
        Ok(())
    }

    /// Appends UTF-8 text.
    #[inline]
    pub fn append_str(&mut self, text: &str) {
        self.append(text.as_bytes());
    }

    /// Sets the logical size to `n`, reserving capacity and clamping the
    /// cursor so it never exceeds the new size.
    pub fn resize(&mut self, n: usize) {
        self.reserve(n);
        if self.data.len() < n {
            self.data.resize(n, 0);
        }
        self.size = n;
        self.offset = self.offset.min(self.size);
    }

    /// Resets size and cursor to zero. Capacity is retained.
    #[inline]
    pub fn clear(&mut self) {
        self.size = 0;
        self.offset = 0;
    }

    /// Removes `len` bytes starting at `off`, shifting later bytes down and
    /// adjusting the cursor so it keeps pointing at the same logical byte
    /// (§4.1): past the removed region it shifts down by `len`; inside it, it
    /// clamps to `off`; before it, it is unaffected.
    pub fn remove(&mut self, off: usize, len: usize) -> Result<()> {
        if off > self.size || len > self.size - off {
            return Err(Error::Misuse("remove range out of bounds"));
        }
        self.data.drain(off..off + len);
        self.size -= len;

        self.offset = if self.offset > off + len {
            self.offset - len
        } else if self.offset > off {
            off
        } else {
            self.offset
        };
        self.offset = self.offset.min(self.size);
        Ok(())
    }

    /// Extracts `data[off..off+len]` as a UTF-8 string.
    pub fn extract_string(&self, off: usize, len: usize) -> Result<String> {
        if off.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(Error::Misuse("extract range out of bounds"));
        }
        String::from_utf8(self.data[off..off + len].to_vec())
            .map_err(|_| Error::Misuse("extract range is not valid utf-8"))
    }

    /// Advances the read cursor by `count` bytes, clamped to `size`.
    #[inline]
    pub fn shift(&mut self, count: usize) {
        self.offset = (self.offset + count).min(self.size);
    }

    /// Moves the read cursor back by `count` bytes, clamped to zero.
    #[inline]
    pub fn unshift(&mut self, count: usize) {
        self.offset = self.offset.saturating_sub(count);
    }

    /// Byte at logical index `i`.
    #[inline]
    pub fn get(&self, i: usize) -> Option<u8> {
        if i < self.size {
            Some(self.data[i])
        } else {
            None
        }
    }

    /// Reads from `reader` directly into the free tail capacity of the
    /// buffer, growing it first if there's no room, then extends the logical
    /// size by however many bytes were read.
    pub fn ingress<R: io::Read>(&mut self, reader: &mut R, want: usize) -> io::Result<usize> {
        self.reserve(self.size + want);
        let start = self.size;
        self.data.resize((start + want).max(self.data.len()), 0);
        let n = reader.read(&mut self.data[start..start + want])?;
        self.data.truncate(start + n);
        self.size = start + n;
        Ok(n)
    }

    /// Writes the unread tail to `writer`, advancing the cursor by however
    /// many bytes were accepted.
    pub fn egress<W: io::Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let n = writer.write(self.unread())?;
        self.shift(n);
        Ok(n)
    }
}

impl std::ops::Index<usize> for Buffer {
    type Output = u8;

    #[inline]
    fn index(&self, i: usize) -> &u8 {
        &self.data[..self.size][i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_valid_utf8() {
        let mut buf = Buffer::new();
        buf.append_str("hello world");
        assert_eq!(buf.extract_string(0, buf.size()).unwrap(), "hello world");
    }

    #[test]
    fn roundtrip_byte_for_byte() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut buf = Buffer::new();
        buf.clear();
        buf.append(&data);
        assert_eq!(buf.data(), &data[..]);
    }

    #[test]
    fn growth_is_monotonic_and_covers_total() {
        let mut buf = Buffer::new();
        let mut total = 0;
        for chunk in [3, 10, 1, 200, 4000] {
            let bytes = vec![7u8; chunk];
            let prev_cap = buf.capacity();
            buf.append(&bytes);
            total += chunk;
            assert!(buf.capacity() >= total);
            assert!(buf.capacity() >= prev_cap);
        }
    }

    #[test]
    fn reserve_doubles_when_that_satisfies_request() {
        let mut buf = Buffer::with_capacity(16);
        buf.reserve(20);
        assert_eq!(buf.capacity(), 32);
    }

    #[test]
    fn reserve_takes_the_larger_request_when_doubling_is_not_enough() {
        let mut buf = Buffer::with_capacity(16);
        buf.reserve(100);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn remove_before_cursor_is_unaffected() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789");
        buf.shift(8);
        buf.remove(0, 2).unwrap();
        assert_eq!(buf.offset(), 6);
        assert_eq!(buf.data(), b"23456789");
    }

    #[test]
    fn remove_spanning_cursor_clamps_to_offset() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789");
        buf.shift(5);
        buf.remove(3, 4).unwrap();
        assert_eq!(buf.offset(), 3);
        assert_eq!(buf.data(), b"012789");
    }

    #[test]
    fn remove_after_cursor_shifts_down() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789");
        buf.shift(2);
        buf.remove(5, 3).unwrap();
        assert_eq!(buf.offset(), 2);
        assert_eq!(buf.data(), b"01234789");
    }

    #[test]
    fn out_of_range_extract_is_misuse() {
        let mut buf = Buffer::new();
        buf.append(b"abc");
        assert!(matches!(buf.extract_string(1, 10), Err(Error::Misuse(_))));
    }

    #[test]
    fn resize_clamps_offset() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789");
        buf.shift(8);
        buf.resize(4);
        assert_eq!(buf.offset(), 4);
        assert_eq!(buf.size(), 4);
    }

    #[test]
    fn clear_resets_size_and_offset() {
        let mut buf = Buffer::new();
        buf.append(b"abcdef");
        buf.shift(3);
        buf.clear();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.offset(), 0);
    }

    #[test]
    fn ingress_reads_into_tail_and_extends_size() {
        let mut buf = Buffer::new();
        let mut src: &[u8] = b"payload";
        let n = buf.ingress(&mut src, 32).unwrap();
        assert_eq!(n, 7);
        assert_eq!(buf.data(), b"payload");
    }

    #[test]
    fn egress_writes_unread_and_advances_cursor() {
        let mut buf = Buffer::new();
        buf.append(b"payload");
        let mut dst = Vec::new();
        let n = buf.egress(&mut dst).unwrap();
        assert_eq!(n, 7);
        assert_eq!(dst, b"payload");
        assert_eq!(buf.offset(), 7);
    }
}
