//! Hearth Codec -- portable binary streams and the versioned packet protocol.
//!
//! Everything the simulation persists (save games, replays, sync hashes) goes
//! through the two halves of this crate:
//!
//! - [`stream`]: [`StreamWriter`](stream::StreamWriter) appends little-endian
//!   primitives to a growable buffer (with positioned writes for backpatching),
//!   and [`StreamReader`](stream::StreamReader) consumes them with a cursor,
//!   failing with [`CodecError::TruncatedData`] instead of reading garbage.
//! - [`packet`]: the convention that every serialized unit starts with a
//!   `u16` format version, and that readers reject versions they do not know.
//!
//! # Quick Start
//!
//! ```
//! use hearth_codec::prelude::*;
//!
//! let mut w = StreamWriter::new();
//! w.u16(1).unwrap();
//! w.i32(-42).unwrap();
//! w.cstr("barracks").unwrap();
//!
//! let bytes = w.into_bytes();
//! let mut r = StreamReader::new(&bytes);
//! assert_eq!(r.u16().unwrap(), 1);
//! assert_eq!(r.i32().unwrap(), -42);
//! assert_eq!(r.cstr().unwrap(), "barracks");
//! assert!(r.is_at_end());
//! ```

#![deny(unsafe_code)]

pub mod packet;
pub mod stream;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while encoding or decoding binary streams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A read needed more bytes than the buffer holds.
    #[error("truncated data: needed {needed} byte(s) at offset {offset}, only {available} available")]
    TruncatedData {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The write buffer could not grow.
    #[error("out of memory while growing write buffer by {requested} byte(s)")]
    OutOfMemory { requested: usize },

    /// A string was not valid UTF-8.
    #[error("invalid UTF-8 in string starting at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// A string passed to a NUL-terminated write contained a NUL byte.
    #[error("string contains an interior NUL byte at position {position}")]
    InteriorNul { position: usize },

    /// A bounded reader was not fully consumed.
    #[error("{remaining} unread byte(s) left at offset {offset}")]
    TrailingData { offset: usize, remaining: usize },

    /// A packet carried a version tag this build cannot interpret.
    #[error("unsupported packet version {tag} (this build reads versions 1..={newest})")]
    UnsupportedVersion { tag: u16, newest: u16 },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::packet::{read_version, unsupported, write_version, Packet, PacketVersion};
    pub use crate::stream::{StreamReader, StreamWriter};
    pub use crate::CodecError;
}
