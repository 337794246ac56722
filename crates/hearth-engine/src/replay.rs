//! Deterministic replay: record the commands fed into a world, then play
//! them back and verify the world ends up in the same state.
//!
//! A replay is a set of sections in a [`ByteStore`]:
//!
//! | section | contents |
//! |---|---|
//! | `replay/header` | version 1: start tick, sync interval, seed |
//! | `replay/initial/...` | a full save game of the world when recording started |
//! | `replay/commands` | stream version, then one record per issued command, then an end marker |
//! | `replay/sync` | version 1, then `(tick u32, 32-byte BLAKE3 state digest)` checkpoints |
//!
//! A command record is `tick u32, kind u32, enqueue serial u32, packet`,
//! where `tick` is the world tick when the command was issued. The end marker
//! is a record with kind 0 and serial 0 whose tick field holds the tick the
//! recording ended at.
//!
//! # Recording
//!
//! ```
//! use hearth_engine::prelude::*;
//! use hearth_engine::replay::{replay, ReplayRecorder};
//!
//! let config = SimConfig::default().with_sync_interval(10);
//! let mut world = World::new(config.clone());
//! let mut recorder = ReplayRecorder::start(&world).unwrap();
//! recorder.advance(&mut world, Tick(25)).unwrap();
//!
//! let mut store = MemoryStore::new();
//! recorder.finish(&mut store).unwrap();
//!
//! let outcome = replay(&store, &Catalog::new(), config).unwrap();
//! assert!(outcome.completed);
//! assert!(outcome.first_divergence.is_none());
//! assert_eq!(outcome.world.tick(), Tick(25));
//! ```
//!
//! # Playback
//!
//! [`replay`] loads the initial save, then for each record advances the world
//! to the record's tick and enqueues the decoded command. The recorder runs
//! the world to the current tick before writing each record, so commands due
//! at a record's tick have executed at the same point on both sides. Because a
//! command's entity references are only meaningful in the world as it was
//! when the command was issued, each record is decoded lazily against the
//! live registry ([`LoadContext::live`]) right before it is fed. Sync
//! checkpoints are verified as the world passes them; the first mismatch
//! stops playback.

use std::iter::Peekable;
use std::vec;

use hearth_codec::packet::{read_version, unsupported, Packet, PacketVersion};
use hearth_codec::stream::{StreamReader, StreamWriter};
use hearth_codec::CodecError;
use hearth_objects::context::{LoadContext, SaveContext};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::command::{Command, CommandKind};
use crate::config::SimConfig;
use crate::savegame::{self, read_section};
use crate::scheduler::CommandSerial;
use crate::storage::{copy_prefixed, ByteStore, MemoryStore};
use crate::tick::Tick;
use crate::world::World;
use crate::PersistError;

/// Name of the replay header section.
pub const HEADER_SECTION: &str = "replay/header";
/// Prefix under which the initial save game is stored.
pub const INITIAL_PREFIX: &str = "replay/initial/";
/// Name of the command record section.
pub const COMMANDS_SECTION: &str = "replay/commands";
/// Name of the sync checkpoint section.
pub const SYNC_SECTION: &str = "replay/sync";

const COMMANDS_VERSION: PacketVersion = 1;
const SYNC_VERSION: PacketVersion = 1;

/// Bytes in a record header, and in the end marker.
const RECORD_HEADER_LEN: usize = 12;

// ---------------------------------------------------------------------------
// ReplayHeader
// ---------------------------------------------------------------------------

/// Contents of the `replay/header` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayHeader {
    pub start_tick: Tick,
    pub sync_interval: u32,
    pub seed: u64,
}

impl Packet for ReplayHeader {
    const VERSION: PacketVersion = 1;

    fn write_payload(&self, w: &mut StreamWriter) -> Result<(), CodecError> {
        self.start_tick.write(w)?;
        w.u32(self.sync_interval)?;
        w.u64(self.seed)
    }

    fn read_payload(version: PacketVersion, r: &mut StreamReader<'_>) -> Result<Self, CodecError> {
        match version {
            1 => Ok(Self {
                start_tick: Tick::read(r)?,
                sync_interval: r.u32()?,
                seed: r.u64()?,
            }),
            other => Err(unsupported(other, Self::VERSION)),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncCheckpoint
// ---------------------------------------------------------------------------

/// State digest of the recorded world at a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub tick: Tick,
    pub hash: [u8; 32],
}

/// Decode the `replay/sync` section.
pub fn read_checkpoints(bytes: &[u8]) -> Result<Vec<SyncCheckpoint>, PersistError> {
    let mut r = StreamReader::new(bytes);
    read_version(&mut r, SYNC_VERSION)?;
    let mut checkpoints = Vec::new();
    while !r.is_at_end() {
        let tick = Tick::read(&mut r)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(r.bytes(32)?);
        checkpoints.push(SyncCheckpoint { tick, hash });
    }
    Ok(checkpoints)
}

// ---------------------------------------------------------------------------
// ReplayRecorder
// ---------------------------------------------------------------------------

/// Records the commands issued to a world.
///
/// All commands that should be part of the replay must go through
/// [`issue`](Self::issue), and all time must advance through
/// [`advance`](Self::advance). Commands that executing commands enqueue by
/// themselves are not recorded; playback regenerates them.
#[derive(Debug)]
pub struct ReplayRecorder {
    header: ReplayHeader,
    initial: MemoryStore,
    /// Stream version plus every record so far. The cursor sits right after
    /// the last record, where the end marker goes.
    commands: StreamWriter,
    sync: StreamWriter,
    records: u32,
    checkpoints: u32,
    end_tick: Tick,
    next_checkpoint: Option<Tick>,
}

impl ReplayRecorder {
    /// Begin recording `world` from its current state.
    pub fn start(world: &World) -> Result<Self, PersistError> {
        let mut initial = MemoryStore::new();
        savegame::save(world, &mut initial)?;

        let mut commands = StreamWriter::new();
        commands.u16(COMMANDS_VERSION)?;
        let mut sync = StreamWriter::new();
        sync.u16(SYNC_VERSION)?;

        let header = ReplayHeader {
            start_tick: world.tick(),
            sync_interval: world.config().sync_interval,
            seed: world.config().seed,
        };
        debug!(
            start = header.start_tick.get(),
            sync_interval = header.sync_interval,
            "replay recording started"
        );
        Ok(Self {
            header,
            initial,
            commands,
            sync,
            records: 0,
            checkpoints: 0,
            end_tick: world.tick(),
            next_checkpoint: first_checkpoint_after(world.tick(), header.sync_interval),
        })
    }

    /// Record `command` as issued at the world's current tick, then enqueue
    /// it. Returns the enqueue serial.
    ///
    /// Commands already due at the current tick run first, as they will on
    /// playback before this record is fed.
    pub fn issue(
        &mut self,
        world: &mut World,
        command: Box<dyn Command>,
    ) -> Result<CommandSerial, PersistError> {
        world.run_until(world.tick());
        let serial = world.scheduler().next_command_serial();
        let record_start = self.commands.pos();
        let written = self.write_record(world, serial, command.as_ref());
        if let Err(err) = written {
            self.commands.set_pos(record_start);
            return Err(err);
        }
        self.records += 1;
        self.end_tick = self.end_tick.max(world.tick());
        let assigned = world.enqueue(command);
        debug_assert_eq!(assigned, serial);
        Ok(assigned)
    }

    fn write_record(
        &mut self,
        world: &World,
        serial: CommandSerial,
        command: &dyn Command,
    ) -> Result<(), PersistError> {
        let w = &mut self.commands;
        world.tick().write(w)?;
        w.u32(command.kind().get())?;
        w.u32(serial.get())?;
        command.write(w, &SaveContext::new(world.registry()))?;
        Ok(())
    }

    /// Run `world` up to `target`, taking a sync checkpoint at every multiple
    /// of the sync interval on the way. Returns the number of commands
    /// executed.
    pub fn advance(&mut self, world: &mut World, target: Tick) -> Result<usize, PersistError> {
        let interval = self.header.sync_interval;
        let mut executed = 0;
        while let Some(checkpoint) = self.next_checkpoint {
            if checkpoint > target {
                break;
            }
            if checkpoint >= world.tick() {
                executed += world.run_until(checkpoint);
                self.checkpoint(world)?;
            }
            self.next_checkpoint = checkpoint.checked_add(interval);
        }
        executed += world.run_until(target);
        self.end_tick = self.end_tick.max(world.tick());
        Ok(executed)
    }

    fn checkpoint(&mut self, world: &World) -> Result<(), PersistError> {
        let digest = world.state_digest()?;
        world.tick().write(&mut self.sync)?;
        self.sync.bytes(digest.as_bytes())?;
        self.checkpoints += 1;
        Ok(())
    }

    /// Number of commands recorded so far.
    pub fn records(&self) -> u32 {
        self.records
    }

    /// Write everything recorded so far to `store` as a complete replay.
    ///
    /// Recording can continue afterwards; a later flush overwrites the
    /// sections with the longer log.
    pub fn flush(&mut self, store: &mut dyn ByteStore) -> Result<(), PersistError> {
        let mut w = StreamWriter::new();
        self.header.write_packet(&mut w)?;
        write_section(store, HEADER_SECTION, w.as_bytes())?;

        copy_prefixed(&self.initial, store, INITIAL_PREFIX)
            .map_err(|source| PersistError::storage(INITIAL_PREFIX, source))?;

        // The end marker goes after the last record without moving the
        // cursor, so the next record overwrites it.
        let end = self.commands.pos();
        self.commands.u32_at(end, self.end_tick.get())?;
        self.commands.u32_at(end + 4, CommandKind::END_OF_STREAM.get())?;
        self.commands.u32_at(end + 8, 0)?;
        write_section(
            store,
            COMMANDS_SECTION,
            &self.commands.as_bytes()[..end + RECORD_HEADER_LEN],
        )?;

        write_section(store, SYNC_SECTION, self.sync.as_bytes())?;
        debug!(
            records = self.records,
            checkpoints = self.checkpoints,
            end = self.end_tick.get(),
            "replay flushed"
        );
        Ok(())
    }

    /// Flush and stop recording.
    pub fn finish(mut self, store: &mut dyn ByteStore) -> Result<ReplaySummary, PersistError> {
        self.flush(store)?;
        let summary = ReplaySummary {
            start_tick: self.header.start_tick,
            end_tick: self.end_tick,
            records: self.records,
            checkpoints: self.checkpoints,
        };
        info!(
            start = summary.start_tick.get(),
            end = summary.end_tick.get(),
            records = summary.records,
            checkpoints = summary.checkpoints,
            "replay recorded"
        );
        Ok(summary)
    }
}

/// What a finished recording contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub start_tick: Tick,
    pub end_tick: Tick,
    pub records: u32,
    pub checkpoints: u32,
}

fn first_checkpoint_after(tick: Tick, interval: u32) -> Option<Tick> {
    if interval == 0 {
        return None;
    }
    (tick.get() / interval + 1)
        .checked_mul(interval)
        .map(Tick)
}

fn write_section(store: &mut dyn ByteStore, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
    store
        .write(name, bytes)
        .map_err(|source| PersistError::storage(name, source))
}

// ---------------------------------------------------------------------------
// ReplayReader
// ---------------------------------------------------------------------------

/// Fixed-size front of a command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub tick: Tick,
    pub kind: CommandKind,
    pub serial: CommandSerial,
}

/// One step of a replay command stream.
#[derive(Debug)]
pub enum ReplayEvent {
    /// A command issued at `tick`.
    Command {
        tick: Tick,
        serial: CommandSerial,
        command: Box<dyn Command>,
    },
    /// The recording ended at `tick`.
    End { tick: Tick },
}

/// Reads a `replay/commands` section record by record.
#[derive(Debug)]
pub struct ReplayReader<'a> {
    r: StreamReader<'a>,
    finished: bool,
}

impl<'a> ReplayReader<'a> {
    /// Start reading a command stream, checking its version.
    pub fn new(bytes: &'a [u8]) -> Result<Self, PersistError> {
        let mut r = StreamReader::new(bytes);
        read_version(&mut r, COMMANDS_VERSION)?;
        Ok(Self { r, finished: false })
    }

    /// Whether the end marker has been read.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the fixed part of the next record. After the end marker, nothing
    /// may follow.
    pub fn next_header(&mut self) -> Result<RecordHeader, PersistError> {
        let header = RecordHeader {
            tick: Tick::read(&mut self.r)?,
            kind: CommandKind(self.r.u32()?),
            serial: CommandSerial(self.r.u32()?),
        };
        if header.kind == CommandKind::END_OF_STREAM {
            self.finished = true;
            self.r.expect_end()?;
        }
        Ok(header)
    }

    /// Decode the packet of the record whose header was just read, resolving
    /// entity references against `world`'s live registry.
    pub fn read_command(
        &mut self,
        header: &RecordHeader,
        world: &World,
        catalog: &Catalog,
    ) -> Result<Box<dyn Command>, PersistError> {
        let ctx = LoadContext::live(world.registry());
        catalog.commands().read(header.kind, &mut self.r, &ctx)
    }

    /// Read the next record in full against `world`.
    pub fn next_event(&mut self, world: &World, catalog: &Catalog) -> Result<ReplayEvent, PersistError> {
        let header = self.next_header()?;
        if header.kind == CommandKind::END_OF_STREAM {
            return Ok(ReplayEvent::End { tick: header.tick });
        }
        let command = self.read_command(&header, world, catalog)?;
        Ok(ReplayEvent::Command {
            tick: header.tick,
            serial: header.serial,
            command,
        })
    }
}

/// The end tick carried by the end marker of a `replay/commands` section.
///
/// The marker is the last record of a flushed log, so this reads only the
/// final bytes and needs no world to decode against.
pub fn recorded_end_tick(bytes: &[u8]) -> Result<Tick, PersistError> {
    let minimum = 2 + RECORD_HEADER_LEN;
    if bytes.len() < minimum {
        return Err(CodecError::TruncatedData {
            offset: 0,
            needed: minimum,
            available: bytes.len(),
        }
        .into());
    }
    let mut r = StreamReader::new(&bytes[bytes.len() - RECORD_HEADER_LEN..]);
    let tick = Tick::read(&mut r)?;
    let kind = CommandKind(r.u32()?);
    let serial = r.u32()?;
    if kind != CommandKind::END_OF_STREAM || serial != 0 {
        return Err(PersistError::Corrupt {
            section: COMMANDS_SECTION.to_owned(),
            detail: "log does not finish with an end marker".to_owned(),
        });
    }
    Ok(tick)
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// A sync checkpoint whose digest did not match during playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayDivergence {
    pub tick: Tick,
    /// Hex digest recorded in the replay.
    pub expected_hash: String,
    /// Hex digest computed during playback.
    pub actual_hash: String,
}

/// The result of [`replay`].
#[derive(Debug)]
pub struct ReplayOutcome {
    /// The world as playback left it.
    pub world: World,
    /// Whether playback reached the end marker without divergence.
    pub completed: bool,
    /// Number of recorded commands enqueued.
    pub commands_fed: u32,
    /// Number of sync checkpoints that matched.
    pub checkpoints_verified: u32,
    /// The tick the recording ended at, also when playback stopped early.
    pub end_tick: Tick,
    /// The first mismatching checkpoint, if any.
    pub first_divergence: Option<ReplayDivergence>,
}

/// Play back the replay in `store`.
///
/// Restores the initial save, feeds each recorded command at its recorded
/// tick and advances to the end tick, checking every sync checkpoint on the
/// way. Playback stops at the first divergence and reports it in the
/// outcome; malformed data is an error.
pub fn replay(store: &dyn ByteStore, catalog: &Catalog, config: SimConfig) -> Result<ReplayOutcome, PersistError> {
    let header_bytes = read_section(store, HEADER_SECTION)?;
    let mut r = StreamReader::new(&header_bytes);
    let header = ReplayHeader::read_packet(&mut r)?;
    r.expect_end()?;

    let checkpoints = read_checkpoints(&read_section(store, SYNC_SECTION)?)?;
    let command_bytes = read_section(store, COMMANDS_SECTION)?;
    let mut reader = ReplayReader::new(&command_bytes)?;
    let end_tick = recorded_end_tick(&command_bytes)?;

    let initial = MemoryStore::extract_prefixed(store, INITIAL_PREFIX)
        .map_err(|source| PersistError::storage(INITIAL_PREFIX, source))?;
    let world = savegame::load(&initial, catalog, config)?;
    if world.tick() != header.start_tick {
        return Err(PersistError::Corrupt {
            section: HEADER_SECTION.to_owned(),
            detail: format!(
                "start tick {} does not match initial save tick {}",
                header.start_tick,
                world.tick()
            ),
        });
    }

    let mut playback = Playback {
        world,
        checkpoints: checkpoints.into_iter().peekable(),
        verified: 0,
    };
    let mut fed = 0u32;

    loop {
        let record = reader.next_header()?;
        if let Some(divergence) = playback.advance_to(record.tick)? {
            return Ok(playback.into_outcome(false, fed, end_tick, Some(divergence)));
        }
        if record.kind == CommandKind::END_OF_STREAM {
            info!(
                end = record.tick.get(),
                commands = fed,
                checkpoints = playback.verified,
                "replay completed"
            );
            return Ok(playback.into_outcome(true, fed, end_tick, None));
        }

        let command = reader.read_command(&record, &playback.world, catalog)?;
        let assigned = playback.world.enqueue(command);
        if assigned != record.serial {
            warn!(
                recorded = record.serial.get(),
                assigned = assigned.get(),
                tick = record.tick.get(),
                "replayed command received a different enqueue serial"
            );
        }
        fed += 1;
    }
}

struct Playback {
    world: World,
    checkpoints: Peekable<vec::IntoIter<SyncCheckpoint>>,
    verified: u32,
}

impl Playback {
    /// Advance to `target`, verifying every checkpoint at or before it.
    fn advance_to(&mut self, target: Tick) -> Result<Option<ReplayDivergence>, PersistError> {
        while let Some(checkpoint) = self.checkpoints.next_if(|c| c.tick <= target) {
            self.world.run_until(checkpoint.tick);
            let actual = self.world.state_digest()?;
            if actual.as_bytes() != &checkpoint.hash {
                let divergence = ReplayDivergence {
                    tick: checkpoint.tick,
                    expected_hash: blake3::Hash::from(checkpoint.hash).to_hex().to_string(),
                    actual_hash: actual.to_hex().to_string(),
                };
                warn!(
                    tick = divergence.tick.get(),
                    expected = %divergence.expected_hash,
                    actual = %divergence.actual_hash,
                    "replay diverged"
                );
                return Ok(Some(divergence));
            }
            self.verified += 1;
        }
        self.world.run_until(target);
        Ok(None)
    }

    fn into_outcome(
        self,
        completed: bool,
        commands_fed: u32,
        end_tick: Tick,
        first_divergence: Option<ReplayDivergence>,
    ) -> ReplayOutcome {
        ReplayOutcome {
            world: self.world,
            completed,
            commands_fed,
            checkpoints_verified: self.verified,
            end_tick,
            first_divergence,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoints_fall_on_interval_multiples() {
        assert_eq!(first_checkpoint_after(Tick(0), 10), Some(Tick(10)));
        assert_eq!(first_checkpoint_after(Tick(10), 10), Some(Tick(20)));
        assert_eq!(first_checkpoint_after(Tick(13), 10), Some(Tick(20)));
        assert_eq!(first_checkpoint_after(Tick(5), 0), None);
        assert_eq!(first_checkpoint_after(Tick(u32::MAX - 1), 10), None);
    }

    #[test]
    fn empty_recording_has_only_end_marker() {
        let mut world = World::new(SimConfig::default());
        world.run_until(Tick(3));
        let recorder = ReplayRecorder::start(&world).unwrap();
        let mut store = MemoryStore::new();
        let summary = recorder.finish(&mut store).unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(
            store.get(COMMANDS_SECTION).unwrap(),
            &[1, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(store.get(SYNC_SECTION).unwrap(), &[1, 0]);
        assert!(store.get("replay/initial/header").is_some());
    }

    #[test]
    fn advance_records_sync_checkpoints() {
        let config = SimConfig::default().with_sync_interval(4);
        let mut world = World::new(config);
        let mut recorder = ReplayRecorder::start(&world).unwrap();
        recorder.advance(&mut world, Tick(9)).unwrap();
        let mut store = MemoryStore::new();
        let summary = recorder.finish(&mut store).unwrap();
        assert_eq!(summary.checkpoints, 2);
        let checkpoints = read_checkpoints(store.get(SYNC_SECTION).unwrap()).unwrap();
        let ticks: Vec<Tick> = checkpoints.iter().map(|c| c.tick).collect();
        assert_eq!(ticks, vec![Tick(4), Tick(8)]);
    }

    #[test]
    fn reader_rejects_bytes_after_end_marker() {
        let bytes = [1u8, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 99];
        let mut reader = ReplayReader::new(&bytes).unwrap();
        let err = reader.next_header().unwrap_err();
        assert!(matches!(
            err,
            PersistError::Codec(CodecError::TrailingData { remaining: 1, .. })
        ));
    }

    #[test]
    fn end_tick_is_read_from_the_final_marker() {
        let marker_only = [1u8, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(recorded_end_tick(&marker_only).unwrap(), Tick(3));

        // A log cut before its end marker.
        let cut = [1u8, 0, 2, 0, 0, 0, 100, 0, 0, 0, 1, 0, 0, 0, 1, 0];
        assert!(matches!(
            recorded_end_tick(&cut).unwrap_err(),
            PersistError::Corrupt { .. }
        ));
        assert!(matches!(
            recorded_end_tick(&[1, 0, 3]).unwrap_err(),
            PersistError::Codec(CodecError::TruncatedData { available: 3, .. })
        ));
    }

    #[test]
    fn unknown_stream_version_is_rejected() {
        let bytes = [2u8, 0];
        assert!(matches!(
            ReplayReader::new(&bytes).unwrap_err(),
            PersistError::Codec(CodecError::UnsupportedVersion { tag: 2, newest: 1 })
        ));
    }
}
