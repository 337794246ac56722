//! Save games: the whole world as a set of named sections.
//!
//! # Layout
//!
//! | section | contents |
//! |---|---|
//! | `header` | version 2: tick, next entity serial, live entity count, RNG state blob, entity kinds present |
//! | `commands` | version 1: next command serial, count, then `kind u32, serial u32, packet` per command in execution order |
//! | `entities/<kind>` | version 1: count, then `serial u32, length u32, packet` per entity in ascending serial order |
//!
//! Every section starts with its own `u16` version, and every entity and
//! command packet starts with the version of its own type, so each part of
//! the format can evolve independently.
//!
//! # Loading
//!
//! Entities may refer to each other in any direction, so loading runs in
//! two passes. The first pass reads only the record frames of every entity
//! section and collects the set of serials being resurrected. The second
//! pass decodes each packet in ascending serial order against that set;
//! any reference outside it fails the load with
//! [`ObjectError::DanglingReferenceAtLoad`](hearth_objects::ObjectError::DanglingReferenceAtLoad).
//! Commands are decoded last, against the same set.
//!
//! Sections are written entities first and header last, so a store whose
//! header is readable holds a complete save.

use std::collections::{BTreeMap, BTreeSet};

use hearth_codec::packet::{read_version, unsupported, write_version, Packet, PacketVersion};
use hearth_codec::stream::{StreamReader, StreamWriter};
use hearth_codec::CodecError;
use hearth_objects::context::{LoadContext, SaveContext};
use hearth_objects::registry::EntityRegistry;
use hearth_objects::serial::Serial;
use hearth_objects::ObjectError;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::command::CommandKind;
use crate::config::SimConfig;
use crate::scheduler::{CommandSerial, Scheduler};
use crate::storage::ByteStore;
use crate::tick::Tick;
use crate::world::World;
use crate::PersistError;

/// Name of the header section.
pub const HEADER_SECTION: &str = "header";
/// Name of the command queue section.
pub const COMMANDS_SECTION: &str = "commands";
/// Prefix of the per-kind entity sections.
pub const ENTITY_SECTION_PREFIX: &str = "entities/";

const COMMANDS_VERSION: PacketVersion = 1;
const ENTITIES_VERSION: PacketVersion = 1;

/// Section name holding entities of `kind`.
pub fn entity_section(kind: &str) -> String {
    format!("{ENTITY_SECTION_PREFIX}{kind}")
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Contents of the `header` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    pub tick: Tick,
    pub next_entity_serial: u32,
    pub entity_count: u32,
    /// Serialized RNG state. Absent in version 1 headers.
    pub rng_state: Option<Vec<u8>>,
    /// Kinds that have an entity section, ascending.
    pub kinds: Vec<String>,
}

impl Packet for SaveHeader {
    const VERSION: PacketVersion = 2;

    fn write_payload(&self, w: &mut StreamWriter) -> Result<(), CodecError> {
        self.tick.write(w)?;
        w.u32(self.next_entity_serial)?;
        w.u32(self.entity_count)?;
        w.blob(self.rng_state.as_deref().unwrap_or_default())?;
        write_strings(w, &self.kinds)
    }

    fn read_payload(version: PacketVersion, r: &mut StreamReader<'_>) -> Result<Self, CodecError> {
        match version {
            1 | 2 => {
                let tick = Tick::read(r)?;
                let next_entity_serial = r.u32()?;
                let entity_count = r.u32()?;
                let rng_state = if version >= 2 {
                    Some(r.blob()?.to_vec())
                } else {
                    None
                };
                let kinds = read_strings(r)?;
                Ok(Self {
                    tick,
                    next_entity_serial,
                    entity_count,
                    rng_state,
                    kinds,
                })
            }
            other => Err(unsupported(other, Self::VERSION)),
        }
    }
}

fn write_strings(w: &mut StreamWriter, items: &[String]) -> Result<(), CodecError> {
    w.u32(len_u32(items.len())?)?;
    items.iter().try_for_each(|s| w.cstr(s))
}

fn read_strings(r: &mut StreamReader<'_>) -> Result<Vec<String>, CodecError> {
    let count = r.u32()?;
    (0..count).map(|_| r.cstr().map(str::to_owned)).collect()
}

fn len_u32(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::OutOfMemory { requested: len })
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

/// What a save wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
    pub entities: usize,
    pub commands: usize,
    pub sections: usize,
}

/// Serialize `world` into `store`.
///
/// The result is canonical: equal worlds produce byte-identical sections,
/// regardless of the order entities were registered or commands enqueued in
/// memory.
pub fn save(world: &World, store: &mut dyn ByteStore) -> Result<SaveSummary, PersistError> {
    let registry = world.registry();
    let ctx = SaveContext::new(registry);

    let mut by_kind: BTreeMap<&'static str, Vec<Serial>> = BTreeMap::new();
    for serial in registry.all_serials_ordered() {
        if let Some(entity) = registry.get(serial) {
            by_kind.entry(entity.kind_name()).or_default().push(serial);
        }
    }

    let mut entity_count = 0usize;
    for (kind, serials) in &by_kind {
        let bytes = write_entity_section(registry, &ctx, serials)?;
        let name = entity_section(kind);
        write_section(store, &name, &bytes)?;
        debug!(section = %name, entities = serials.len(), bytes = bytes.len(), "entity section saved");
        entity_count += serials.len();
    }

    let commands = world.scheduler().ordered_commands();
    let mut w = StreamWriter::new();
    write_version(&mut w, COMMANDS_VERSION)?;
    w.u32(world.scheduler().next_command_serial().get())?;
    w.u32(len_u32(commands.len())?)?;
    for (serial, command) in &commands {
        w.u32(command.kind().get())?;
        w.u32(serial.get())?;
        command.write(&mut w, &ctx)?;
    }
    write_section(store, COMMANDS_SECTION, w.as_bytes())?;

    let header = SaveHeader {
        tick: world.tick(),
        next_entity_serial: registry.next_serial().get(),
        entity_count: len_u32(entity_count)?,
        rng_state: Some(serde_json::to_vec(world.rng()).map_err(PersistError::RngState)?),
        kinds: by_kind.keys().map(|k| (*k).to_owned()).collect(),
    };
    let mut w = StreamWriter::new();
    header.write_packet(&mut w)?;
    write_section(store, HEADER_SECTION, w.as_bytes())?;

    let summary = SaveSummary {
        entities: entity_count,
        commands: commands.len(),
        sections: by_kind.len() + 2,
    };
    debug!(
        tick = world.tick().get(),
        entities = summary.entities,
        commands = summary.commands,
        "world saved"
    );
    Ok(summary)
}

fn write_entity_section(
    registry: &EntityRegistry,
    ctx: &SaveContext<'_>,
    serials: &[Serial],
) -> Result<Vec<u8>, PersistError> {
    let mut w = StreamWriter::new();
    write_version(&mut w, ENTITIES_VERSION)?;
    w.u32(len_u32(serials.len())?)?;
    for serial in serials {
        let Some(entity) = registry.get(*serial) else {
            continue;
        };
        serial.write(&mut w)?;
        let length_at = w.pos();
        w.u32(0)?;
        let start = w.pos();
        entity.save(&mut w, ctx)?;
        let length = len_u32(w.pos() - start)?;
        w.u32_at(length_at, length)?;
    }
    Ok(w.into_bytes())
}

fn write_section(store: &mut dyn ByteStore, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
    store
        .write(name, bytes)
        .map_err(|source| PersistError::storage(name, source))
}

pub(crate) fn read_section(store: &dyn ByteStore, name: &str) -> Result<Vec<u8>, PersistError> {
    store
        .read(name)
        .map_err(|source| PersistError::storage(name, source))
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read just the header of a save.
pub fn read_header(store: &dyn ByteStore) -> Result<SaveHeader, PersistError> {
    let bytes = read_section(store, HEADER_SECTION)?;
    let mut r = StreamReader::new(&bytes);
    let header = SaveHeader::read_packet(&mut r)?;
    r.expect_end()?;
    Ok(header)
}

/// Rebuild a world from `store`.
///
/// Serials, the serial counters, the tick and the RNG state come back exactly
/// as saved. A version 1 header carries no RNG state; the generator is then
/// seeded from `config.seed`.
pub fn load(store: &dyn ByteStore, catalog: &Catalog, config: SimConfig) -> Result<World, PersistError> {
    let header = read_header(store)?;

    for kind in &header.kinds {
        if catalog.entities().get(kind).is_none() {
            return Err(ObjectError::UnknownEntityKind(kind.clone()).into());
        }
    }

    let mut registry = EntityRegistry::new();
    registry.restore_next_serial(header.next_entity_serial)?;

    // Pass 1: frame every record and collect the serials being loaded.
    let mut sections = Vec::with_capacity(header.kinds.len());
    for kind in &header.kinds {
        sections.push((kind.as_str(), read_section(store, &entity_section(kind))?));
    }
    let mut framed: BTreeMap<Serial, (&str, &[u8])> = BTreeMap::new();
    for (kind, bytes) in &sections {
        frame_entity_section(kind, bytes, &mut framed)?;
    }
    if framed.len() != header.entity_count as usize {
        return Err(PersistError::Corrupt {
            section: HEADER_SECTION.to_owned(),
            detail: format!(
                "header announces {} entities, sections hold {}",
                header.entity_count,
                framed.len()
            ),
        });
    }
    let known: BTreeSet<Serial> = framed.keys().copied().collect();
    let ctx = LoadContext::loading(&known);

    // Pass 2: decode in ascending serial order.
    for (serial, (kind, payload)) in &framed {
        let mut r = StreamReader::new(payload);
        let entity = catalog.entities().load(kind, &mut r, &ctx)?;
        r.expect_end()?;
        if entity.kind_name() != *kind {
            return Err(PersistError::Corrupt {
                section: entity_section(kind),
                detail: format!("entity {serial} decoded as kind '{}'", entity.kind_name()),
            });
        }
        registry.insert_loaded(*serial, entity)?;
    }

    let scheduler = load_commands(store, catalog, &ctx)?;

    let rng = match &header.rng_state {
        Some(state) => serde_json::from_slice(state).map_err(PersistError::RngState)?,
        None => {
            debug!(seed = config.seed, "version 1 header has no RNG state; reseeding");
            Pcg32::seed_from_u64(config.seed)
        }
    };

    info!(
        tick = header.tick.get(),
        entities = registry.len(),
        commands = scheduler.len(),
        "world loaded"
    );
    Ok(World::from_parts(registry, scheduler, rng, header.tick, config))
}

/// Replace the contents of `world` with the save in `store`.
///
/// The world's queue is flushed and its entities dropped before reading. On
/// error the world is left in that flushed, empty state.
pub fn load_into(world: &mut World, store: &dyn ByteStore, catalog: &Catalog) -> Result<(), PersistError> {
    world.flush();
    world.registry_mut().clear();
    let config = world.config().clone();
    *world = load(store, catalog, config)?;
    Ok(())
}

fn frame_entity_section<'a>(
    kind: &'a str,
    bytes: &'a [u8],
    framed: &mut BTreeMap<Serial, (&'a str, &'a [u8])>,
) -> Result<(), PersistError> {
    let mut r = StreamReader::new(bytes);
    read_version(&mut r, ENTITIES_VERSION)?;
    let count = r.u32()?;
    for _ in 0..count {
        let raw = r.u32()?;
        let serial = Serial::new(raw).ok_or_else(|| PersistError::Corrupt {
            section: entity_section(kind),
            detail: "entity serial 0".to_owned(),
        })?;
        let length = r.u32()? as usize;
        let payload = r.bytes(length)?;
        if framed.insert(serial, (kind, payload)).is_some() {
            return Err(ObjectError::DuplicateSerial(serial).into());
        }
    }
    r.expect_end()?;
    Ok(())
}

fn load_commands(
    store: &dyn ByteStore,
    catalog: &Catalog,
    ctx: &LoadContext<'_>,
) -> Result<Scheduler, PersistError> {
    let bytes = read_section(store, COMMANDS_SECTION)?;
    let mut r = StreamReader::new(&bytes);
    read_version(&mut r, COMMANDS_VERSION)?;
    let next_serial = r.u32()?;
    let count = r.u32()?;

    let mut entries = Vec::new();
    for _ in 0..count {
        let kind = CommandKind(r.u32()?);
        let serial = CommandSerial(r.u32()?);
        let command = catalog.commands().read(kind, &mut r, ctx)?;
        entries.push((serial, command));
    }
    r.expect_end()?;

    let mut scheduler = Scheduler::new();
    scheduler.restore(next_serial, entries)?;
    Ok(scheduler)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
