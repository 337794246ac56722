//! Hearth Engine -- deterministic command scheduling, save games and replays.
//!
//! The engine is built around three ideas:
//!
//! 1. **Commands are the only way time moves.** Every change to the world is
//!    a [`Command`](command::Command) due at some [`Tick`](tick::Tick). The
//!    [`World`](world::World) executes queued commands in a total order
//!    (due tick, then enqueue serial), so the same inputs give the same
//!    results on every machine.
//! 2. **Everything round-trips.** Entities and queued commands are written
//!    through the versioned packet protocol of `hearth-codec`;
//!    [`savegame`] turns a world into named sections and back, preserving
//!    entity serials, counters, the tick and the RNG state.
//! 3. **Determinism is checked, not assumed.** [`replay`] records the
//!    commands issued to a world together with periodic state digests, and
//!    playback fails loudly at the first tick where the replayed world
//!    diverges.
//!
//! # Quick Start
//!
//! ```
//! use hearth_engine::prelude::*;
//!
//! let mut world = World::new(SimConfig::default());
//! world.enqueue(Box::new(DestroyCommand::new(Tick(5), AnyHandle::empty())));
//! assert_eq!(world.run_until(Tick(10)), 1);
//! assert_eq!(world.tick(), Tick(10));
//!
//! let mut store = MemoryStore::new();
//! savegame::save(&world, &mut store).unwrap();
//! let loaded = savegame::load(&store, &Catalog::new(), SimConfig::default()).unwrap();
//! assert_eq!(loaded.state_hash().unwrap(), world.state_hash().unwrap());
//! ```

#![deny(unsafe_code)]

pub mod catalog;
pub mod command;
pub mod config;
pub mod logging;
pub mod replay;
pub mod savegame;
pub mod scheduler;
pub mod storage;
pub mod tick;
pub mod world;

use std::io;

use hearth_codec::CodecError;
use hearth_objects::ObjectError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while saving, loading or replaying.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Malformed, truncated or too-new data.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A dangling reference, unknown entity kind or serial conflict.
    #[error(transparent)]
    Object(#[from] ObjectError),

    /// No loader is registered for a command kind found in the data.
    #[error("no loader registered for command kind {0}")]
    UnknownCommandKind(u32),

    /// A required section is absent from the store.
    #[error("section '{0}' is missing")]
    MissingSection(String),

    /// The store failed to read or write a section.
    #[error("storage error on section '{section}'")]
    Storage {
        section: String,
        #[source]
        source: io::Error,
    },

    /// The persisted RNG state could not be encoded or decoded.
    #[error("invalid RNG state")]
    RngState(#[source] serde_json::Error),

    /// Data that decodes but contradicts itself.
    #[error("corrupt section '{section}': {detail}")]
    Corrupt { section: String, detail: String },
}

impl PersistError {
    /// Wrap a store error for `section`; a missing section becomes
    /// [`PersistError::MissingSection`].
    pub fn storage(section: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            PersistError::MissingSection(section.to_owned())
        } else {
            PersistError::Storage {
                section: section.to_owned(),
                source,
            }
        }
    }

    /// The codec error behind this error, whether it surfaced directly or
    /// while decoding an entity reference.
    pub fn codec_error(&self) -> Option<&CodecError> {
        match self {
            PersistError::Codec(err) | PersistError::Object(ObjectError::Codec(err)) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::catalog::Catalog;
    pub use crate::command::{Command, CommandFactory, CommandKind, CommandLoadFn, DestroyCommand};
    pub use crate::config::SimConfig;
    pub use crate::replay::{ReplayOutcome, ReplayRecorder};
    pub use crate::savegame;
    pub use crate::scheduler::{CommandSerial, Scheduler};
    pub use crate::storage::{ByteStore, DirStore, MemoryStore};
    pub use crate::tick::Tick;
    pub use crate::world::World;
    pub use crate::PersistError;

    pub use hearth_codec::prelude::*;
    pub use hearth_objects::prelude::*;
}
