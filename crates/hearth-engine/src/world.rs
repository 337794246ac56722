//! The simulation world and its tick loop.
//!
//! A [`World`] owns the entity registry, the command scheduler, a seeded
//! random number generator and the current tick. Simulation advances only by
//! executing due commands: [`World::run_until`] pops every command due at or
//! before the target tick, in `(due, enqueue serial)` order, and moves the
//! world tick forward to each command's due time before executing it.
//!
//! # Determinism
//!
//! Given the same starting state and the same enqueued commands, two worlds
//! end in the same state on any machine:
//!
//! - Execution order is the scheduler's total order; nothing depends on
//!   allocation addresses or hash-map iteration.
//! - Randomness comes only from [`World::rng_mut`], a `Pcg32` seeded from
//!   [`SimConfig::seed`] and persisted in save games.
//! - [`World::state_hash`] digests the canonical save sections, so any
//!   divergence in entities, queued commands, tick or RNG shows up in it.

use std::fmt;

use rand::SeedableRng;
use rand_pcg::Pcg32;
use tracing::{debug, info, trace, warn};

use hearth_objects::entity::Entity;
use hearth_objects::registry::EntityRegistry;
use hearth_objects::serial::Serial;

use crate::command::Command;
use crate::config::SimConfig;
use crate::savegame;
use crate::scheduler::{CommandSerial, Scheduled, Scheduler};
use crate::storage::MemoryStore;
use crate::tick::Tick;
use crate::PersistError;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Entities, pending commands and simulation time.
///
/// Dropping a world that still holds entities logs the same warning as
/// [`World::shutdown`].
pub struct World {
    registry: EntityRegistry,
    scheduler: Scheduler,
    rng: Pcg32,
    tick: Tick,
    config: SimConfig,
}

impl World {
    /// A fresh world at tick 0 with its RNG seeded from `config.seed`.
    pub fn new(config: SimConfig) -> Self {
        Self {
            registry: EntityRegistry::new(),
            scheduler: Scheduler::new(),
            rng: Pcg32::seed_from_u64(config.seed),
            tick: Tick::ZERO,
            config,
        }
    }

    /// Assemble a world from loaded parts.
    pub(crate) fn from_parts(
        registry: EntityRegistry,
        scheduler: Scheduler,
        rng: Pcg32,
        tick: Tick,
        config: SimConfig,
    ) -> Self {
        Self {
            registry,
            scheduler,
            rng,
            tick,
            config,
        }
    }

    // -- accessors ------------------------------------------------------------

    /// The current tick.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// The configuration this world was created or loaded with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Mutable access to the entity registry.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    /// The command queue (read-only; enqueue through [`World::enqueue`]).
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The world's random number generator.
    pub fn rng(&self) -> &Pcg32 {
        &self.rng
    }

    /// Draw randomness from the world's generator. Never use any other source
    /// inside simulation code.
    pub fn rng_mut(&mut self) -> &mut Pcg32 {
        &mut self.rng
    }

    /// Shorthand for `registry_mut().register(entity)`.
    pub fn spawn<E: Entity>(&mut self, entity: E) -> Serial {
        self.registry.register(entity)
    }

    // -- simulation -----------------------------------------------------------

    /// Queue a command and return its enqueue serial.
    pub fn enqueue(&mut self, command: Box<dyn Command>) -> CommandSerial {
        let due = command.due_time();
        let kind = command.kind();
        let serial = self.scheduler.enqueue(command);
        trace!(
            serial = serial.get(),
            kind = kind.get(),
            due = due.get(),
            "command enqueued"
        );
        serial
    }

    /// Execute every command due at or before `target`, then set the world
    /// tick to `target` if it is ahead. Returns the number of commands
    /// executed.
    ///
    /// Commands enqueued while running are executed in the same call when
    /// they fall due by `target`. A command due before the current tick runs
    /// at the current tick with a warning.
    ///
    /// A command that panics aborts the run; the panic is not caught.
    pub fn run_until(&mut self, target: Tick) -> usize {
        let mut executed = 0;
        while let Some(Scheduled {
            due,
            serial,
            command,
        }) = self.scheduler.pop_due(target)
        {
            if due < self.tick {
                warn!(
                    serial = serial.get(),
                    kind = command.kind().get(),
                    due = due.get(),
                    tick = self.tick.get(),
                    "command scheduled in the past; executing at current tick"
                );
            } else {
                self.tick = due;
            }
            trace!(
                serial = serial.get(),
                kind = command.kind().get(),
                tick = self.tick.get(),
                "executing command"
            );
            command.execute(self);
            executed += 1;
        }
        if target > self.tick {
            self.tick = target;
        }
        executed
    }

    /// Advance by one tick.
    pub fn step(&mut self) -> usize {
        self.run_until(self.tick.saturating_add(1))
    }

    /// Drop every queued command without executing it.
    pub fn flush(&mut self) -> usize {
        self.scheduler.flush()
    }

    /// Tear the world down. Warns if entities are still registered and
    /// returns how many were.
    pub fn shutdown(mut self) -> usize {
        let dropped = self.scheduler.flush();
        let live = self.registry.warn_if_not_empty();
        self.registry.clear();
        info!(
            tick = self.tick.get(),
            live,
            dropped_commands = dropped,
            "world shut down"
        );
        live
    }

    // -- hashing --------------------------------------------------------------

    /// BLAKE3 digest of the world's canonical save sections.
    ///
    /// Covers the header (tick, serial counter, RNG state), every entity and
    /// every queued command. Two worlds with equal digests save to identical
    /// bytes.
    pub fn state_digest(&self) -> Result<blake3::Hash, PersistError> {
        let mut store = MemoryStore::new();
        savegame::save(self, &mut store)?;
        let mut hasher = blake3::Hasher::new();
        for (name, bytes) in store.iter() {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        let digest = hasher.finalize();
        debug!(tick = self.tick.get(), hash = %digest.to_hex(), "state hashed");
        Ok(digest)
    }

    /// Hex form of [`state_digest`](Self::state_digest).
    pub fn state_hash(&self) -> Result<String, PersistError> {
        Ok(self.state_digest()?.to_hex().to_string())
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.registry.warn_if_not_empty();
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.tick)
            .field("entities", &self.registry.len())
            .field("queued", &self.scheduler.len())
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
