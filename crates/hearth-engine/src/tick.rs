//! Simulation time.
//!
//! The simulation advances in discrete ticks. A [`Tick`] is a `u32` counter
//! that starts at 0 in a fresh world and is persisted as a plain `u32` in
//! save games and replay records.

use std::fmt;

use hearth_codec::stream::{StreamReader, StreamWriter};
use hearth_codec::CodecError;
use serde::{Deserialize, Serialize};

/// A point in simulation time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(pub u32);

impl Tick {
    /// The first tick of a fresh world.
    pub const ZERO: Tick = Tick(0);

    /// The last representable tick.
    pub const MAX: Tick = Tick(u32::MAX);

    /// The raw counter value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// `self + delta`, clamped at [`Tick::MAX`].
    pub fn saturating_add(self, delta: u32) -> Tick {
        Tick(self.0.saturating_add(delta))
    }

    /// `self + delta`, or `None` on overflow.
    pub fn checked_add(self, delta: u32) -> Option<Tick> {
        self.0.checked_add(delta).map(Tick)
    }

    /// Write as a little-endian `u32`.
    pub fn write(self, w: &mut StreamWriter) -> Result<(), CodecError> {
        w.u32(self.0)
    }

    /// Read a tick written by [`write`](Self::write).
    pub fn read(r: &mut StreamReader<'_>) -> Result<Tick, CodecError> {
        r.u32().map(Tick)
    }
}

impl fmt::Debug for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tick({})", self.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl From<u32> for Tick {
    fn from(raw: u32) -> Self {
        Tick(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_counter() {
        assert!(Tick(3) < Tick(10));
        assert_eq!(Tick::ZERO, Tick::default());
        assert_eq!(Tick::MAX.saturating_add(5), Tick::MAX);
        assert_eq!(Tick(7).checked_add(3), Some(Tick(10)));
        assert_eq!(Tick::MAX.checked_add(1), None);
    }

    #[test]
    fn wire_form_is_u32_le() {
        let mut w = StreamWriter::new();
        Tick(0x0102_0304).write(&mut w).unwrap();
        assert_eq!(w.as_bytes(), &[4, 3, 2, 1]);
        let bytes = w.into_bytes();
        assert_eq!(Tick::read(&mut StreamReader::new(&bytes)).unwrap(), Tick(0x0102_0304));
    }

    #[test]
    fn display_and_debug() {
        assert_eq!(Tick(12).to_string(), "t12");
        assert_eq!(format!("{:?}", Tick(12)), "Tick(12)");
    }
}
