//! Everything a load needs to turn bytes back into objects.
//!
//! A [`Catalog`] pairs the [`CommandFactory`] with the entity loader table.
//! Gameplay code builds one at startup, registers every command kind and
//! entity kind it defines, and passes it to [`savegame::load`](crate::savegame::load)
//! and [`replay`](crate::replay::replay).

use hearth_objects::context::{EntityLoadFn, EntityLoaders};

use crate::command::{CommandFactory, CommandKind, CommandLoadFn};

/// Command and entity loaders known to this build.
#[derive(Debug, Default)]
pub struct Catalog {
    commands: CommandFactory,
    entities: EntityLoaders,
}

impl Catalog {
    /// A catalog with the built-in command kinds and no entity kinds.
    pub fn new() -> Self {
        Self {
            commands: CommandFactory::new(),
            entities: EntityLoaders::new(),
        }
    }

    /// Register a command loader. See [`CommandFactory::register`].
    pub fn register_command(
        &mut self,
        kind: CommandKind,
        name: &'static str,
        loader: CommandLoadFn,
    ) -> &mut Self {
        self.commands.register(kind, name, loader);
        self
    }

    /// Register an entity loader. See [`EntityLoaders::register`].
    pub fn register_entity(&mut self, kind_name: &'static str, loader: EntityLoadFn) -> &mut Self {
        self.entities.register(kind_name, loader);
        self
    }

    /// The command loaders.
    pub fn commands(&self) -> &CommandFactory {
        &self.commands
    }

    /// The entity loaders.
    pub fn entities(&self) -> &EntityLoaders {
        &self.entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DestroyCommand;

    #[test]
    fn new_catalog_knows_destroy_only() {
        let catalog = Catalog::new();
        assert!(catalog.commands().contains(CommandKind::DESTROY));
        assert_eq!(catalog.commands().len(), 1);
        assert!(catalog.entities().is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate command kind")]
    fn registering_builtin_again_panics() {
        Catalog::new().register_command(CommandKind::DESTROY, "destroy", DestroyCommand::load);
    }
}
