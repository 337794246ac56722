//! Little-endian binary streams.
//!
//! A [`StreamWriter`] appends to a growable in-memory buffer. It keeps a write
//! cursor that normally sits at the end of the data, but it can also write at
//! an explicit offset without moving the cursor (used to backpatch length
//! fields) or have its cursor moved past the end. Either way the buffer grows
//! to fit and any gap is zero-filled.
//!
//! A [`StreamReader`] consumes a fixed byte slice with a cursor. Every read
//! checks bounds first and fails with [`CodecError::TruncatedData`] rather than
//! returning partial values.
//!
//! All integers are little-endian regardless of host byte order, so streams
//! written on one machine decode identically on any other.

use crate::CodecError;

// ---------------------------------------------------------------------------
// StreamWriter
// ---------------------------------------------------------------------------

macro_rules! le_writers {
    ($($name:ident, $name_at:ident: $ty:ty;)*) => {
        $(
            #[doc = concat!("Append a little-endian `", stringify!($ty), "` at the cursor.")]
            pub fn $name(&mut self, value: $ty) -> Result<(), CodecError> {
                self.bytes(&value.to_le_bytes())
            }

            #[doc = concat!("Write a little-endian `", stringify!($ty), "` at `offset` without moving the cursor.")]
            pub fn $name_at(&mut self, offset: usize, value: $ty) -> Result<(), CodecError> {
                self.write_at(offset, &value.to_le_bytes())
            }
        )*
    };
}

/// Growable write buffer with a cursor.
///
/// The logical length is the high-water mark of everything written so far,
/// which may be larger than the cursor after a positioned write or a
/// [`set_pos`](Self::set_pos) backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamWriter {
    buf: Vec<u8>,
    pos: usize,
}

impl StreamWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Create an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Current cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor. Moving past the end is allowed; the next write
    /// zero-fills the gap.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Logical length of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer and return its buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write `bytes` at `offset`, growing (and zero-filling) as needed.
    ///
    /// The cursor is not moved. After the call the logical length is at least
    /// `offset + bytes.len()`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), CodecError> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or(CodecError::OutOfMemory {
                requested: usize::MAX,
            })?;
        if end > self.buf.len() {
            let grow = end - self.buf.len();
            self.buf
                .try_reserve(grow)
                .map_err(|_| CodecError::OutOfMemory { requested: grow })?;
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Append raw bytes at the cursor, with no length prefix or terminator.
    pub fn bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.write_at(self.pos, bytes)?;
        self.pos += bytes.len();
        Ok(())
    }

    le_writers! {
        u8, u8_at: u8;
        u16, u16_at: u16;
        u32, u32_at: u32;
        u64, u64_at: u64;
        i8, i8_at: i8;
        i16, i16_at: i16;
        i32, i32_at: i32;
        i64, i64_at: i64;
    }

    /// Append a string as its UTF-8 bytes followed by a single NUL.
    pub fn cstr(&mut self, s: &str) -> Result<(), CodecError> {
        if let Some(position) = s.bytes().position(|b| b == 0) {
            return Err(CodecError::InteriorNul { position });
        }
        self.bytes(s.as_bytes())?;
        self.u8(0)
    }

    /// Append an opaque buffer prefixed with its `u32` length.
    pub fn blob(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(data.len()).map_err(|_| CodecError::OutOfMemory {
            requested: data.len(),
        })?;
        self.u32(len)?;
        self.bytes(data)
    }
}

// ---------------------------------------------------------------------------
// StreamReader
// ---------------------------------------------------------------------------

macro_rules! le_readers {
    ($($name:ident: $ty:ty;)*) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "`.")]
            pub fn $name(&mut self) -> Result<$ty, CodecError> {
                Ok(<$ty>::from_le_bytes(self.array()?))
            }
        )*
    };
}

/// Cursor over a fixed byte slice.
#[derive(Debug, Clone)]
pub struct StreamReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    /// Start reading `data` from offset 0.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor. Positions past the end are rejected.
    pub fn set_pos(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.data.len() {
            return Err(CodecError::TruncatedData {
                offset: self.data.len(),
                needed: pos - self.data.len(),
                available: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Total length of the underlying slice.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying slice is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the cursor reached the end.
    pub fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Fail with [`CodecError::TrailingData`] unless every byte was consumed.
    pub fn expect_end(&self) -> Result<(), CodecError> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(CodecError::TrailingData {
                offset: self.pos,
                remaining: self.remaining(),
            })
        }
    }

    /// Consume exactly `len` raw bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let available = self.remaining();
        if len > available {
            return Err(CodecError::TruncatedData {
                offset: self.pos,
                needed: len,
                available,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    le_readers! {
        u8: u8;
        u16: u16;
        u32: u32;
        u64: u64;
        i8: i8;
        i16: i16;
        i32: i32;
        i64: i64;
    }

    /// Read a NUL-terminated UTF-8 string. The terminator is consumed but not
    /// returned. Running out of bytes before the terminator is
    /// `TruncatedData`.
    pub fn cstr(&mut self) -> Result<&'a str, CodecError> {
        let start = self.pos;
        let rest = &self.data[start..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::TruncatedData {
                offset: start,
                needed: rest.len() + 1,
                available: rest.len(),
            })?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| CodecError::InvalidUtf8 { offset: start })?;
        self.pos += len + 1;
        Ok(text)
    }

    /// Read an opaque buffer written by [`StreamWriter::blob`].
    pub fn blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    /// Split off a reader over the next `len` bytes and advance past them.
    ///
    /// Offsets reported by the sub-reader are relative to its own start.
    pub fn sub_reader(&mut self, len: usize) -> Result<StreamReader<'a>, CodecError> {
        Ok(StreamReader::new(self.bytes(len)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
