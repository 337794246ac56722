//! Weak, serial-based references between simulated objects.
//!
//! A [`WeakHandle<T>`] is how a command or an entity refers to another entity.
//! It stores only a serial, carries no ownership and never keeps its target
//! alive. Every access goes through the registry, so a handle whose target
//! was unregistered resolves to `None` -- it can never observe a stale or
//! reused object because serials are never reissued.
//!
//! [`WeakHandle::get`] additionally clears the handle the first time its
//! target is found missing; that is the only way a handle's serial changes.
//!
//! ```
//! use hearth_objects::prelude::*;
//! # use hearth_codec::prelude::*;
//! # #[derive(Debug)]
//! # struct Flag;
//! # impl Entity for Flag {
//! #     fn kind_name(&self) -> &'static str { "flag" }
//! #     fn save(&self, w: &mut StreamWriter, _: &SaveContext<'_>) -> Result<(), CodecError> { w.u16(1) }
//! # }
//!
//! let mut registry = EntityRegistry::new();
//! let serial = registry.register(Flag);
//! let mut handle: WeakHandle<Flag> = registry.handle(serial);
//! assert!(handle.resolve(&registry).is_some());
//!
//! registry.unregister(serial);
//! assert!(handle.get(&registry).is_none());
//! assert!(handle.is_empty());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::entity::Entity;
use crate::registry::EntityRegistry;
use crate::serial::Serial;

// ---------------------------------------------------------------------------
// WeakHandle
// ---------------------------------------------------------------------------

/// Non-owning reference to an entity of type `T`, by serial.
///
/// `WeakHandle<dyn Entity>` (alias [`AnyHandle`]) refers to an entity of any
/// type.
pub struct WeakHandle<T: ?Sized> {
    serial: Option<Serial>,
    _marker: PhantomData<fn() -> *const T>,
}

/// Handle to an entity of any type.
pub type AnyHandle = WeakHandle<dyn Entity>;

impl<T: ?Sized> WeakHandle<T> {
    /// A handle to `serial`.
    pub fn new(serial: Serial) -> Self {
        Self::from_serial(Some(serial))
    }

    /// A handle that refers to nothing.
    pub fn empty() -> Self {
        Self::from_serial(None)
    }

    /// A handle from an optional serial.
    pub fn from_serial(serial: Option<Serial>) -> Self {
        Self {
            serial,
            _marker: PhantomData,
        }
    }

    /// The referenced serial, `None` for an empty handle.
    pub fn serial(&self) -> Option<Serial> {
        self.serial
    }

    /// The wire form of the serial (0 when empty).
    pub fn to_wire(&self) -> u32 {
        Serial::to_wire(self.serial)
    }

    /// Whether the handle refers to nothing.
    pub fn is_empty(&self) -> bool {
        self.serial.is_none()
    }

    /// Make the handle refer to nothing.
    pub fn clear(&mut self) {
        self.serial = None;
    }

    /// Forget the static type.
    pub fn erase(&self) -> AnyHandle {
        WeakHandle::from_serial(self.serial)
    }
}

impl<T: Entity> WeakHandle<T> {
    /// Resolve to the target if it is live and of type `T`.
    pub fn resolve<'r>(&self, registry: &'r EntityRegistry) -> Option<&'r T> {
        self.serial.and_then(|s| registry.get_as::<T>(s))
    }

    /// Mutable variant of [`resolve`](Self::resolve).
    pub fn resolve_mut<'r>(&self, registry: &'r mut EntityRegistry) -> Option<&'r mut T> {
        self.serial.and_then(move |s| registry.get_as_mut::<T>(s))
    }

    /// Resolve, clearing the handle if the target is gone.
    pub fn get<'r>(&mut self, registry: &'r EntityRegistry) -> Option<&'r T> {
        let found = self.resolve(registry);
        if found.is_none() {
            self.serial = None;
        }
        found
    }

    /// Whether the target is live and of type `T`.
    pub fn is_alive(&self, registry: &EntityRegistry) -> bool {
        self.resolve(registry).is_some()
    }
}

impl WeakHandle<dyn Entity> {
    /// Resolve to the target, whatever its type.
    pub fn resolve_dyn<'r>(&self, registry: &'r EntityRegistry) -> Option<&'r (dyn Entity + 'static)> {
        self.serial.and_then(|s| registry.get(s))
    }

    /// Whether the target is live.
    pub fn is_alive_dyn(&self, registry: &EntityRegistry) -> bool {
        self.serial.is_some_and(|s| registry.contains(s))
    }
}

// Manual impls: the derives would require `T: Clone` etc., which a handle
// does not need since it never holds a `T`.

impl<T: ?Sized> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for WeakHandle<T> {}

impl<T: ?Sized> PartialEq for WeakHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl<T: ?Sized> Eq for WeakHandle<T> {}

impl<T: ?Sized> Hash for WeakHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

impl<T: ?Sized> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.serial {
            Some(s) => write!(f, "WeakHandle({})", s.get()),
            None => f.write_str("WeakHandle(empty)"),
        }
    }
}

impl<T: ?Sized> From<Serial> for WeakHandle<T> {
    fn from(serial: Serial) -> Self {
        Self::new(serial)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
