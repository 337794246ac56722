//! Hearth Objects -- stable identity for simulated entities.
//!
//! Every unit, building, road or battle in the simulation is an [`Entity`]
//! owned by the [`EntityRegistry`] and identified by a [`Serial`]. Serials are
//! assigned in strictly increasing order and never reused, and objects refer
//! to each other only through [`WeakHandle`]s, which resolve through the
//! registry on every access. A handle to a destroyed entity therefore resolves
//! to "absent" instead of dangling, and serials survive save/load unchanged.
//!
//! # Quick Start
//!
//! ```
//! use hearth_objects::prelude::*;
//! use hearth_codec::prelude::*;
//!
//! #[derive(Debug)]
//! struct Soldier { hp: u32 }
//!
//! impl Entity for Soldier {
//!     fn kind_name(&self) -> &'static str { "soldier" }
//!     fn save(&self, w: &mut StreamWriter, _ctx: &SaveContext<'_>) -> Result<(), CodecError> {
//!         write_version(w, 1)?;
//!         w.u32(self.hp)
//!     }
//! }
//!
//! let mut registry = EntityRegistry::new();
//! let a = registry.register(Soldier { hp: 10 });
//! let b = registry.register(Soldier { hp: 12 });
//! assert_eq!((a.get(), b.get()), (1, 2));
//!
//! let target: WeakHandle<Soldier> = registry.handle(b);
//! assert_eq!(target.resolve(&registry).map(|s| s.hp), Some(12));
//!
//! registry.unregister(b);
//! assert!(target.resolve(&registry).is_none());
//! assert_eq!(registry.all_serials_ordered(), vec![a]);
//! ```

#![deny(unsafe_code)]

pub mod context;
pub mod entity;
pub mod handle;
pub mod registry;
pub mod serial;

use hearth_codec::CodecError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while restoring entities and entity references.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// The underlying stream was malformed, truncated, or from a newer build.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A packet referenced a serial that is not part of the current load.
    #[error("reference to entity {0} which is not part of this load")]
    DanglingReferenceAtLoad(serial::Serial),

    /// No loader is registered for an entity kind found in the save.
    #[error("no loader registered for entity kind '{0}'")]
    UnknownEntityKind(String),

    /// Two saved entities claim the same serial.
    #[error("entity serial {0} appears more than once")]
    DuplicateSerial(serial::Serial),

    /// A saved entity's serial is not below the saved serial counter.
    #[error("entity serial {serial} is not below the serial counter {next}")]
    SerialBeyondCounter {
        serial: serial::Serial,
        next: serial::Serial,
    },

    /// The saved serial counter is 0.
    #[error("invalid serial counter {raw}")]
    InvalidSerialCounter { raw: u32 },

    /// Restoring the serial counter would move it backwards.
    #[error("serial counter cannot move back from {current} to {requested}")]
    SerialCounterRewind {
        current: serial::Serial,
        requested: serial::Serial,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::context::{EntityLoadFn, EntityLoaders, LoadContext, SaveContext};
    pub use crate::entity::{AsAny, Entity};
    pub use crate::handle::{AnyHandle, WeakHandle};
    pub use crate::registry::EntityRegistry;
    pub use crate::serial::Serial;
    pub use crate::ObjectError;
}
