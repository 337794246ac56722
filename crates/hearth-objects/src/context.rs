//! Save and load contexts for entity references, and the entity loader table.
//!
//! Writers and readers of commands and entities never see raw pointers; they
//! see serials. Two rules keep those serials honest across a save/load cycle:
//!
//! - When saving, a handle whose target is no longer live is written as 0
//!   ([`SaveContext::write_handle`]), so a save never contains a serial that
//!   does not exist in it.
//! - When loading, every non-zero serial must name an entity that is part of
//!   the current load pass (or, during replay playback, an entity that is live
//!   in the world). Anything else fails the packet with
//!   [`ObjectError::DanglingReferenceAtLoad`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use hearth_codec::stream::{StreamReader, StreamWriter};
use hearth_codec::CodecError;

use crate::entity::Entity;
use crate::handle::WeakHandle;
use crate::registry::EntityRegistry;
use crate::serial::Serial;
use crate::ObjectError;

// ---------------------------------------------------------------------------
// SaveContext
// ---------------------------------------------------------------------------

/// Read-only view of the registry handed to writers.
#[derive(Clone, Copy)]
pub struct SaveContext<'a> {
    registry: &'a EntityRegistry,
}

impl<'a> SaveContext<'a> {
    /// Wrap the registry being saved.
    pub fn new(registry: &'a EntityRegistry) -> Self {
        Self { registry }
    }

    /// The registry being saved.
    pub fn registry(&self) -> &'a EntityRegistry {
        self.registry
    }

    /// Write a handle as a `u32` serial, or 0 if its target is not live.
    pub fn write_handle<T: ?Sized>(
        &self,
        w: &mut StreamWriter,
        handle: &WeakHandle<T>,
    ) -> Result<(), CodecError> {
        let live = handle.serial().filter(|s| self.registry.contains(*s));
        w.u32(Serial::to_wire(live))
    }
}

impl fmt::Debug for SaveContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveContext")
            .field("live", &self.registry.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LoadContext
// ---------------------------------------------------------------------------

/// Where the set of resolvable serials comes from.
#[derive(Debug, Clone, Copy)]
enum KnownSerials<'a> {
    /// Serials being resurrected by the current load pass.
    Loading(&'a BTreeSet<Serial>),
    /// Serials live in a running world (replay playback).
    Live(&'a EntityRegistry),
}

/// Validates entity references while decoding.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    known: KnownSerials<'a>,
}

impl<'a> LoadContext<'a> {
    /// References must name one of `serials`.
    pub fn loading(serials: &'a BTreeSet<Serial>) -> Self {
        Self {
            known: KnownSerials::Loading(serials),
        }
    }

    /// References must name an entity live in `registry`.
    pub fn live(registry: &'a EntityRegistry) -> Self {
        Self {
            known: KnownSerials::Live(registry),
        }
    }

    /// Whether `serial` may be referenced.
    pub fn knows(&self, serial: Serial) -> bool {
        match self.known {
            KnownSerials::Loading(set) => set.contains(&serial),
            KnownSerials::Live(registry) => registry.contains(serial),
        }
    }

    /// Validate a wire serial: 0 is `None`, a known serial is `Some`, anything
    /// else is a dangling reference.
    pub fn resolve_wire(&self, raw: u32) -> Result<Option<Serial>, ObjectError> {
        match Serial::from_wire(raw) {
            None => Ok(None),
            Some(serial) if self.knows(serial) => Ok(Some(serial)),
            Some(serial) => Err(ObjectError::DanglingReferenceAtLoad(serial)),
        }
    }

    /// Read a `u32` serial and validate it.
    pub fn read_serial(&self, r: &mut StreamReader<'_>) -> Result<Option<Serial>, ObjectError> {
        let raw = r.u32()?;
        self.resolve_wire(raw)
    }

    /// Read a handle written by [`SaveContext::write_handle`].
    pub fn read_handle<T: ?Sized>(
        &self,
        r: &mut StreamReader<'_>,
    ) -> Result<WeakHandle<T>, ObjectError> {
        Ok(WeakHandle::from_serial(self.read_serial(r)?))
    }
}

// ---------------------------------------------------------------------------
// EntityLoaders
// ---------------------------------------------------------------------------

/// Decodes one entity from its saved packet (version tag included).
pub type EntityLoadFn =
    fn(&mut StreamReader<'_>, &LoadContext<'_>) -> Result<Box<dyn Entity>, ObjectError>;

/// Table from entity kind name to loader.
///
/// The save-game reader consults this table for every entity section; an
/// unknown kind aborts the load.
#[derive(Default, Clone)]
pub struct EntityLoaders {
    loaders: BTreeMap<&'static str, EntityLoadFn>,
}

impl EntityLoaders {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            loaders: BTreeMap::new(),
        }
    }

    /// Register the loader for `kind_name`.
    ///
    /// # Panics
    ///
    /// Panics if `kind_name` is empty, contains `/` or NUL, or is already
    /// registered.
    pub fn register(&mut self, kind_name: &'static str, loader: EntityLoadFn) {
        assert!(
            !kind_name.is_empty() && !kind_name.contains(['/', '\0']),
            "invalid entity kind name: {kind_name:?}"
        );
        assert!(
            !self.loaders.contains_key(kind_name),
            "duplicate entity kind: {kind_name:?}"
        );
        self.loaders.insert(kind_name, loader);
    }

    /// The loader for `kind_name`.
    pub fn get(&self, kind_name: &str) -> Option<EntityLoadFn> {
        self.loaders.get(kind_name).copied()
    }

    /// Decode an entity of `kind_name`.
    pub fn load(
        &self,
        kind_name: &str,
        r: &mut StreamReader<'_>,
        ctx: &LoadContext<'_>,
    ) -> Result<Box<dyn Entity>, ObjectError> {
        let loader = self
            .get(kind_name)
            .ok_or_else(|| ObjectError::UnknownEntityKind(kind_name.to_owned()))?;
        loader(r, ctx)
    }

    /// Registered kind names, ascending.
    pub fn kind_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.loaders.keys().copied()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Whether no kind is registered.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl fmt::Debug for EntityLoaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.loaders.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_codec::packet::{read_version, unsupported, write_version};

    #[derive(Debug)]
    struct Carrier {
        home: WeakHandle<Warehouse>,
    }

    impl Entity for Carrier {
        fn kind_name(&self) -> &'static str {
            "carrier"
        }

        fn save(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError> {
            write_version(w, 1)?;
            ctx.write_handle(w, &self.home)
        }
    }

    fn load_carrier(
        r: &mut StreamReader<'_>,
        ctx: &LoadContext<'_>,
    ) -> Result<Box<dyn Entity>, ObjectError> {
        match read_version(r, 1)? {
            1 => Ok(Box::new(Carrier {
                home: ctx.read_handle(r)?,
            })),
            other => Err(unsupported(other, 1).into()),
        }
    }

    #[derive(Debug)]
    struct Warehouse;

    impl Entity for Warehouse {
        fn kind_name(&self) -> &'static str {
            "warehouse"
        }

        fn save(&self, w: &mut StreamWriter, _ctx: &SaveContext<'_>) -> Result<(), CodecError> {
            write_version(w, 1)
        }
    }

    #[test]
    fn dead_reference_is_saved_as_zero() {
        let mut reg = EntityRegistry::new();
        let home = reg.register(Warehouse);
        let carrier = Carrier {
            home: reg.handle(home),
        };
        reg.unregister(home);

        let mut w = StreamWriter::new();
        carrier.save(&mut w, &SaveContext::new(&reg)).unwrap();
        assert_eq!(w.as_bytes(), &[1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn known_reference_loads() {
        let known: BTreeSet<Serial> = [Serial::new(4).unwrap()].into_iter().collect();
        let bytes = [1u8, 0, 4, 0, 0, 0];
        let mut loaders = EntityLoaders::new();
        loaders.register("carrier", load_carrier);
        let entity = loaders
            .load("carrier", &mut StreamReader::new(&bytes), &LoadContext::loading(&known))
            .unwrap();
        let carrier = entity.downcast_ref::<Carrier>().unwrap();
        assert_eq!(carrier.home.serial(), Serial::new(4));
    }

    #[test]
    fn unknown_reference_is_dangling() {
        let known = BTreeSet::new();
        let bytes = [1u8, 0, 7, 0, 0, 0];
        let err = load_carrier(&mut StreamReader::new(&bytes), &LoadContext::loading(&known))
            .unwrap_err();
        assert!(matches!(err, ObjectError::DanglingReferenceAtLoad(s) if s.get() == 7));
    }

    #[test]
    fn zero_reference_is_absent_not_dangling() {
        let known = BTreeSet::new();
        let ctx = LoadContext::loading(&known);
        assert_eq!(ctx.resolve_wire(0).unwrap(), None);
    }

    #[test]
    fn live_context_checks_registry() {
        let mut reg = EntityRegistry::new();
        let s = reg.register(Warehouse);
        let ctx = LoadContext::live(&reg);
        assert_eq!(ctx.resolve_wire(s.get()).unwrap(), Some(s));
        assert!(ctx.resolve_wire(s.get() + 1).is_err());
    }

    #[test]
    fn unknown_kind_is_reported() {
        let loaders = EntityLoaders::new();
        let known = BTreeSet::new();
        let err = loaders
            .load("dragon", &mut StreamReader::new(&[]), &LoadContext::loading(&known))
            .unwrap_err();
        assert!(matches!(err, ObjectError::UnknownEntityKind(k) if k == "dragon"));
    }

    #[test]
    #[should_panic(expected = "duplicate entity kind")]
    fn duplicate_kind_panics() {
        let mut loaders = EntityLoaders::new();
        loaders.register("carrier", load_carrier);
        loaders.register("carrier", load_carrier);
    }
}
