//! The entity registry: serial allocation and ownership of live entities.
//!
//! [`EntityRegistry`] hands out [`Serial`]s from a counter that only moves
//! forward. Unlike a generational allocator it never recycles a slot, so an
//! old serial can only ever resolve to the entity it was issued for, or to
//! nothing.
//!
//! Storage is a hash map for O(1) lookup. Its iteration order is never exposed:
//! every walk over the registry goes through [`EntityRegistry::all_serials_ordered`].

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::entity::Entity;
use crate::handle::WeakHandle;
use crate::serial::Serial;
use crate::ObjectError;

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Owns every live entity, keyed by serial.
#[derive(Debug)]
pub struct EntityRegistry {
    /// Live entities.
    entities: HashMap<Serial, Box<dyn Entity>>,
    /// The serial the next `register` call hands out.
    next: Serial,
}

impl EntityRegistry {
    /// Create an empty registry whose first serial is 1.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next: Serial::FIRST,
        }
    }

    /// Take ownership of `entity` and assign it the next serial.
    pub fn register<E: Entity>(&mut self, entity: E) -> Serial {
        self.register_boxed(Box::new(entity))
    }

    /// Like [`register`](Self::register) for an already boxed entity.
    ///
    /// # Panics
    ///
    /// Panics when the 32-bit serial space is exhausted. Continuing would mean
    /// reusing serials, which the whole identity scheme forbids.
    pub fn register_boxed(&mut self, entity: Box<dyn Entity>) -> Serial {
        let serial = self.next;
        self.next = serial
            .next()
            .unwrap_or_else(|| panic!("entity serial space exhausted after {serial}"));
        trace!(serial = serial.get(), kind = entity.kind_name(), "entity registered");
        self.entities.insert(serial, entity);
        serial
    }

    /// Remove the entity with `serial` and hand it back.
    ///
    /// Unregistering a serial that is not live is a no-op returning `None`.
    /// The serial is never handed out again either way.
    pub fn unregister(&mut self, serial: Serial) -> Option<Box<dyn Entity>> {
        let removed = self.entities.remove(&serial);
        if let Some(entity) = &removed {
            trace!(serial = serial.get(), kind = entity.kind_name(), "entity unregistered");
        }
        removed
    }

    /// Look up a live entity.
    pub fn get(&self, serial: Serial) -> Option<&(dyn Entity + 'static)> {
        self.entities.get(&serial).map(|e| e.as_ref())
    }

    /// Look up a live entity mutably.
    pub fn get_mut(&mut self, serial: Serial) -> Option<&mut (dyn Entity + 'static)> {
        self.entities.get_mut(&serial).map(|e| e.as_mut())
    }

    /// Look up a live entity by wire value; 0 resolves to `None`.
    pub fn get_wire(&self, raw: u32) -> Option<&(dyn Entity + 'static)> {
        Serial::from_wire(raw).and_then(|s| self.get(s))
    }

    /// Look up a live entity of type `T`. Entities of another type are
    /// reported as absent.
    pub fn get_as<T: Entity>(&self, serial: Serial) -> Option<&T> {
        self.get(serial).and_then(|e| e.downcast_ref::<T>())
    }

    /// Mutable variant of [`get_as`](Self::get_as).
    pub fn get_as_mut<T: Entity>(&mut self, serial: Serial) -> Option<&mut T> {
        self.get_mut(serial).and_then(|e| e.downcast_mut::<T>())
    }

    /// Whether `serial` is live.
    pub fn contains(&self, serial: Serial) -> bool {
        self.entities.contains_key(&serial)
    }

    /// A typed handle to `serial`.
    pub fn handle<T: Entity>(&self, serial: Serial) -> WeakHandle<T> {
        WeakHandle::new(serial)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is live.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Every live serial in ascending order.
    pub fn all_serials_ordered(&self) -> Vec<Serial> {
        let mut serials: Vec<Serial> = self.entities.keys().copied().collect();
        serials.sort_unstable();
        serials
    }

    /// The serial the next [`register`](Self::register) call will assign.
    pub fn next_serial(&self) -> Serial {
        self.next
    }

    /// Drop every entity. The serial counter keeps its value.
    pub fn clear(&mut self) {
        if !self.entities.is_empty() {
            trace!(count = self.entities.len(), "registry cleared");
        }
        self.entities.clear();
    }

    /// Report a non-empty registry at teardown. Returns the number of entities
    /// still live.
    pub fn warn_if_not_empty(&self) -> usize {
        let live = self.entities.len();
        if live > 0 {
            let first = self.all_serials_ordered().into_iter().take(8).collect::<Vec<_>>();
            warn!(live, first_serials = ?first, "entity registry not empty at shutdown");
        }
        live
    }

    // -- load support ---------------------------------------------------------

    /// Restore the serial counter from a save game.
    ///
    /// Must run before any entity is resurrected with
    /// [`insert_loaded`](Self::insert_loaded), and the counter may only move
    /// forward.
    pub fn restore_next_serial(&mut self, raw: u32) -> Result<(), ObjectError> {
        let next = Serial::new(raw).ok_or(ObjectError::InvalidSerialCounter { raw })?;
        if next < self.next {
            return Err(ObjectError::SerialCounterRewind {
                current: self.next,
                requested: next,
            });
        }
        self.next = next;
        Ok(())
    }

    /// Resurrect a saved entity under its original serial.
    ///
    /// The serial must be below the restored counter and not already live.
    pub fn insert_loaded(
        &mut self,
        serial: Serial,
        entity: Box<dyn Entity>,
    ) -> Result<(), ObjectError> {
        if serial >= self.next {
            return Err(ObjectError::SerialBeyondCounter {
                serial,
                next: self.next,
            });
        }
        if self.entities.contains_key(&serial) {
            return Err(ObjectError::DuplicateSerial(serial));
        }
        trace!(serial = serial.get(), kind = entity.kind_name(), "entity loaded");
        self.entities.insert(serial, entity);
        Ok(())
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
