//! Entity serial numbers.
//!
//! A [`Serial`] is the stable identity of a simulated entity for the whole
//! run. Serials are handed out by the [`EntityRegistry`](crate::registry::EntityRegistry)
//! in strictly increasing order starting at 1 and are never reused, so a
//! serial that once named a dead entity can never come to name another one.
//!
//! On the wire a serial is a little-endian `u32` where 0 means "no entity".
//! In memory the "no entity" case is `Option<Serial>::None`; the
//! `NonZeroU32` niche keeps that the same size as a bare `u32`.

use std::fmt;
use std::num::NonZeroU32;

use hearth_codec::stream::StreamWriter;
use hearth_codec::CodecError;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Serial
// ---------------------------------------------------------------------------

/// Unique, never-reused identity of a simulated entity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Serial(NonZeroU32);

impl Serial {
    /// The first serial a fresh registry hands out.
    pub const FIRST: Serial = Serial(NonZeroU32::MIN);

    /// Wrap a raw value. Returns `None` for 0.
    #[inline]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// The raw (non-zero) value.
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Encode an optional serial as its wire value (0 for `None`).
    #[inline]
    pub fn to_wire(serial: Option<Serial>) -> u32 {
        serial.map_or(0, Serial::get)
    }

    /// Decode a wire value (0 becomes `None`).
    #[inline]
    pub fn from_wire(raw: u32) -> Option<Serial> {
        Serial::new(raw)
    }

    /// Write this serial as a `u32`.
    pub fn write(self, w: &mut StreamWriter) -> Result<(), CodecError> {
        w.u32(self.get())
    }

    /// The serial after this one, or `None` if the counter would overflow.
    #[inline]
    pub fn next(self) -> Option<Serial> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serial({})", self.get())
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.get())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
