//! The [`Entity`] trait implemented by every simulated object.
//!
//! Units, buildings, roads, flags and battles all live in the
//! [`EntityRegistry`](crate::registry::EntityRegistry) as `Box<dyn Entity>`.
//! The trait only covers what the core needs: a stable kind name (which names
//! the save-game section the entity is written to) and a way to persist its
//! state. Typed access goes through [`AsAny`] downcasts.

use std::any::Any;
use std::fmt;

use hearth_codec::stream::StreamWriter;
use hearth_codec::CodecError;

use crate::context::SaveContext;

// ---------------------------------------------------------------------------
// AsAny
// ---------------------------------------------------------------------------

/// Upcast to [`Any`] for downcasting trait objects.
///
/// Blanket-implemented for every `'static` type; entity authors never
/// implement it by hand.
pub trait AsAny: Any {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Borrow as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A simulated object owned by the registry.
///
/// `save` follows the packet convention: write a version tag first, then the
/// payload. References to other entities must be written through
/// [`SaveContext::write_handle`] so that dead targets are stored as "absent".
pub trait Entity: AsAny + fmt::Debug {
    /// Stable kind name, e.g. `"soldier"`. Entities are saved into one
    /// section per kind, and the loader table is keyed by this name.
    fn kind_name(&self) -> &'static str;

    /// Persist this entity's state.
    fn save(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError>;
}

impl dyn Entity {
    /// Downcast to a concrete entity type.
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutably downcast to a concrete entity type.
    pub fn downcast_mut<T: Entity>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Whether this entity is a `T`.
    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }
}
