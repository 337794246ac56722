//! The versioned packet protocol.
//!
//! Every persisted unit -- a save-game section, a command payload, an entity's
//! state -- starts with a `u16` version tag written little-endian, followed by
//! the payload for that version. Readers `match` on the tag:
//!
//! - the current version decodes with the current layout,
//! - an older version decodes with its old layout and is migrated in memory,
//! - anything else fails with [`CodecError::UnsupportedVersion`].
//!
//! Version 0 is never a valid format version. Where a packet is optional, a
//! leading 0 means "absent" instead (see [`Packet::read_optional`]).
//!
//! # Example
//!
//! ```
//! use hearth_codec::prelude::*;
//! use hearth_codec::packet::unsupported;
//!
//! #[derive(Debug, PartialEq)]
//! struct Stockpile { wood: i32, stone: i32 }
//!
//! impl Packet for Stockpile {
//!     const VERSION: PacketVersion = 2;
//!
//!     fn write_payload(&self, w: &mut StreamWriter) -> Result<(), CodecError> {
//!         w.i32(self.wood)?;
//!         w.i32(self.stone)
//!     }
//!
//!     fn read_payload(version: PacketVersion, r: &mut StreamReader<'_>) -> Result<Self, CodecError> {
//!         match version {
//!             2 => Ok(Self { wood: r.i32()?, stone: r.i32()? }),
//!             // Version 1 predates stone.
//!             1 => Ok(Self { wood: r.i32()?, stone: 0 }),
//!             other => Err(unsupported(other, Self::VERSION)),
//!         }
//!     }
//! }
//!
//! let mut w = StreamWriter::new();
//! Stockpile { wood: 5, stone: 3 }.write_packet(&mut w).unwrap();
//! let bytes = w.into_bytes();
//! let decoded = Stockpile::read_packet(&mut StreamReader::new(&bytes)).unwrap();
//! assert_eq!(decoded, Stockpile { wood: 5, stone: 3 });
//! ```

use crate::stream::{StreamReader, StreamWriter};
use crate::CodecError;

/// A packet format version. Never 0.
pub type PacketVersion = u16;

/// Build the error for a version tag outside `1..=newest`.
pub fn unsupported(tag: PacketVersion, newest: PacketVersion) -> CodecError {
    CodecError::UnsupportedVersion { tag, newest }
}

/// Write a version tag.
///
/// # Panics
///
/// Panics if `version` is 0; that tag is reserved for "absent".
pub fn write_version(w: &mut StreamWriter, version: PacketVersion) -> Result<(), CodecError> {
    assert!(version != 0, "packet version 0 is reserved for absent values");
    w.u16(version)
}

/// Read a version tag and check it is in `1..=newest`.
///
/// Callers still `match` on the returned tag to pick a layout; this only
/// guarantees they never see 0 or a version newer than they understand.
pub fn read_version(
    r: &mut StreamReader<'_>,
    newest: PacketVersion,
) -> Result<PacketVersion, CodecError> {
    let tag = r.u16()?;
    if tag == 0 || tag > newest {
        return Err(unsupported(tag, newest));
    }
    Ok(tag)
}

/// Like [`read_version`], but a 0 tag means the value is absent.
pub fn read_optional_version(
    r: &mut StreamReader<'_>,
    newest: PacketVersion,
) -> Result<Option<PacketVersion>, CodecError> {
    let tag = r.u16()?;
    if tag == 0 {
        return Ok(None);
    }
    if tag > newest {
        return Err(unsupported(tag, newest));
    }
    Ok(Some(tag))
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A self-contained value that persists itself with a version tag.
///
/// Implementors describe the payload only; the provided methods handle the
/// tag. Types whose decoding needs outside context (such as entity references)
/// follow the same convention by hand with [`write_version`] and
/// [`read_version`].
pub trait Packet: Sized {
    /// The version written by this build. Also the newest version it reads.
    const VERSION: PacketVersion;

    /// Write the payload in the current layout.
    fn write_payload(&self, w: &mut StreamWriter) -> Result<(), CodecError>;

    /// Decode a payload written with `version`, migrating older layouts.
    ///
    /// `version` is already known to be in `1..=VERSION`.
    fn read_payload(version: PacketVersion, r: &mut StreamReader<'_>) -> Result<Self, CodecError>;

    /// Write the version tag followed by the payload.
    fn write_packet(&self, w: &mut StreamWriter) -> Result<(), CodecError> {
        write_version(w, Self::VERSION)?;
        self.write_payload(w)
    }

    /// Read a version tag and the matching payload.
    fn read_packet(r: &mut StreamReader<'_>) -> Result<Self, CodecError> {
        let version = read_version(r, Self::VERSION)?;
        Self::read_payload(version, r)
    }

    /// Write `value`, or a bare 0 tag when it is `None`.
    fn write_optional(value: Option<&Self>, w: &mut StreamWriter) -> Result<(), CodecError> {
        match value {
            Some(v) => v.write_packet(w),
            None => w.u16(0),
        }
    }

    /// Read a packet written by [`write_optional`](Self::write_optional).
    fn read_optional(r: &mut StreamReader<'_>) -> Result<Option<Self>, CodecError> {
        match read_optional_version(r, Self::VERSION)? {
            Some(version) => Self::read_payload(version, r).map(Some),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
