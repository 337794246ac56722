//! Deferred mutations of the world.
//!
//! Gameplay never mutates entities directly from outside the tick loop. It
//! builds a [`Command`], stamps it with the tick it is due at, and hands it to
//! the scheduler. When simulation time reaches that tick the scheduler pops the
//! command and calls [`Command::execute`], which consumes it.
//!
//! Commands refer to entities through [`WeakHandle`](hearth_objects::handle::WeakHandle)s.
//! A handle whose target was unregistered before the command runs resolves to
//! `None`, and the command decides what that means (usually: nothing happens).
//!
//! Every command type has a stable [`CommandKind`] id. Save games and replay
//! logs record the kind in front of each command's packet, and a
//! [`CommandFactory`] maps the kind back to a loader when reading. Kind 0 is
//! reserved for the end-of-stream marker of replay logs.

use std::collections::BTreeMap;
use std::fmt;

use hearth_codec::packet::{read_version, unsupported, write_version, PacketVersion};
use hearth_codec::stream::{StreamReader, StreamWriter};
use hearth_codec::CodecError;
use hearth_objects::context::{LoadContext, SaveContext};
use hearth_objects::handle::AnyHandle;
use tracing::{debug, trace};

use crate::tick::Tick;
use crate::world::World;
use crate::PersistError;

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

/// Stable numeric id of a command type, written in front of every persisted
/// command.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandKind(pub u32);

impl CommandKind {
    /// Marks the end of a replay command stream. Never a real command.
    pub const END_OF_STREAM: CommandKind = CommandKind(0);

    /// The built-in [`DestroyCommand`].
    pub const DESTROY: CommandKind = CommandKind(1);

    /// The raw id.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandKind({})", self.0)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A deferred, serializable mutation of the world.
pub trait Command: fmt::Debug {
    /// The stable kind id used to find this command's loader.
    fn kind(&self) -> CommandKind;

    /// The tick at which the command becomes due. Must not change while the
    /// command is queued.
    fn due_time(&self) -> Tick;

    /// Run the command. It may mutate entities, register or unregister them,
    /// and enqueue further commands.
    fn execute(self: Box<Self>, world: &mut World);

    /// Write the command's packet (version tag first). Entity references go
    /// through [`SaveContext::write_handle`].
    fn write(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError>;
}

/// Decodes one command from its packet.
pub type CommandLoadFn =
    fn(&mut StreamReader<'_>, &LoadContext<'_>) -> Result<Box<dyn Command>, PersistError>;

// ---------------------------------------------------------------------------
// CommandFactory
// ---------------------------------------------------------------------------

struct Registration {
    name: &'static str,
    loader: CommandLoadFn,
}

/// Table from [`CommandKind`] to loader.
///
/// [`CommandFactory::new`] already knows the built-in [`DestroyCommand`];
/// gameplay kinds are added with [`register`](Self::register).
pub struct CommandFactory {
    kinds: BTreeMap<CommandKind, Registration>,
}

impl CommandFactory {
    /// A factory with the built-in kinds registered.
    pub fn new() -> Self {
        let mut factory = Self::empty();
        factory.register(CommandKind::DESTROY, "destroy", DestroyCommand::load);
        factory
    }

    /// A factory with nothing registered, not even the built-ins.
    pub fn empty() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    /// Register the loader for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is the reserved end-of-stream id 0 or is already
    /// registered. Both are programming errors in the catalog setup.
    pub fn register(&mut self, kind: CommandKind, name: &'static str, loader: CommandLoadFn) {
        assert!(
            kind != CommandKind::END_OF_STREAM,
            "command kind 0 is reserved for the end of replay streams"
        );
        if let Some(existing) = self.kinds.get(&kind) {
            panic!(
                "duplicate command kind {kind}: '{name}' collides with '{}'",
                existing.name
            );
        }
        trace!(kind = kind.get(), name, "command kind registered");
        self.kinds.insert(kind, Registration { name, loader });
    }

    /// Whether `kind` has a loader.
    pub fn contains(&self, kind: CommandKind) -> bool {
        self.kinds.contains_key(&kind)
    }

    /// The registered name of `kind`.
    pub fn name_of(&self, kind: CommandKind) -> Option<&'static str> {
        self.kinds.get(&kind).map(|r| r.name)
    }

    /// Decode a command of `kind` from `r`.
    pub fn read(
        &self,
        kind: CommandKind,
        r: &mut StreamReader<'_>,
        ctx: &LoadContext<'_>,
    ) -> Result<Box<dyn Command>, PersistError> {
        let registration = self
            .kinds
            .get(&kind)
            .ok_or(PersistError::UnknownCommandKind(kind.get()))?;
        let command = (registration.loader)(r, ctx)?;
        if command.kind() != kind {
            return Err(PersistError::Corrupt {
                section: registration.name.to_owned(),
                detail: format!("loader for kind {kind} produced kind {}", command.kind()),
            });
        }
        Ok(command)
    }

    /// Registered kinds, ascending.
    pub fn kinds(&self) -> impl Iterator<Item = CommandKind> + '_ {
        self.kinds.keys().copied()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for CommandFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.kinds.iter().map(|(k, r)| (k.get(), r.name)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DestroyCommand
// ---------------------------------------------------------------------------

/// Unregisters an entity when it becomes due. A no-op if the target is
/// already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyCommand {
    due: Tick,
    target: AnyHandle,
}

impl DestroyCommand {
    const VERSION: PacketVersion = 1;

    /// Destroy `target` at `due`.
    pub fn new(due: Tick, target: impl Into<AnyHandle>) -> Self {
        Self {
            due,
            target: target.into(),
        }
    }

    /// The entity to destroy.
    pub fn target(&self) -> AnyHandle {
        self.target
    }

    /// Loader registered under [`CommandKind::DESTROY`].
    pub fn load(
        r: &mut StreamReader<'_>,
        ctx: &LoadContext<'_>,
    ) -> Result<Box<dyn Command>, PersistError> {
        match read_version(r, Self::VERSION)? {
            1 => {
                let due = Tick::read(r)?;
                let target = ctx.read_handle(r)?;
                Ok(Box::new(Self { due, target }))
            }
            other => Err(unsupported(other, Self::VERSION).into()),
        }
    }
}

impl Command for DestroyCommand {
    fn kind(&self) -> CommandKind {
        CommandKind::DESTROY
    }

    fn due_time(&self) -> Tick {
        self.due
    }

    fn execute(self: Box<Self>, world: &mut World) {
        let Some(serial) = self.target.serial() else {
            return;
        };
        match world.registry_mut().unregister(serial) {
            Some(entity) => debug!(
                serial = serial.get(),
                kind = entity.kind_name(),
                tick = world.tick().get(),
                "entity destroyed"
            ),
            None => trace!(serial = serial.get(), "destroy target already gone"),
        }
    }

    fn write(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError> {
        write_version(w, Self::VERSION)?;
        self.due.write(w)?;
        ctx.write_handle(w, &self.target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
