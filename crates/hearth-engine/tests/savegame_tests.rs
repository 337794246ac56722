//! Integration tests for save games: round trips, canonical output, version
//! handling and every fatal load error.

mod common;

use common::*;
use hearth_engine::prelude::*;
use hearth_engine::savegame::{self, COMMANDS_SECTION, HEADER_SECTION};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Two squads facing each other across a tower, with attacks and heals queued.
fn skirmish(seed: u64) -> World {
    let mut world = World::new(SimConfig::default().with_seed(seed));
    let reds: Vec<Serial> = (0..3).map(|i| world.spawn(Soldier::new(20 + i))).collect();
    let blues: Vec<Serial> = (0..3).map(|i| world.spawn(Soldier::new(25 - i))).collect();
    for (red, blue) in reds.iter().zip(&blues) {
        world.registry_mut().get_as_mut::<Soldier>(*red).unwrap().rival = WeakHandle::new(*blue);
        world.registry_mut().get_as_mut::<Soldier>(*blue).unwrap().rival = WeakHandle::new(*red);
    }
    world.spawn(Tower {
        name: "keep".to_owned(),
        garrison: reds.iter().map(|s| WeakHandle::new(*s)).collect(),
    });

    for round in 0..4u32 {
        for (red, blue) in reds.iter().zip(&blues) {
            world.enqueue(Box::new(Attack::new(10 + round * 5, *red, *blue, 4).with_jitter(3)));
            world.enqueue(Box::new(Attack::new(10 + round * 5, *blue, *red, 4).with_jitter(3)));
        }
    }
    world.enqueue(Box::new(Heal::new(12, reds[0], 2).repeating(5, 3)));
    world.enqueue(Box::new(DestroyCommand::new(Tick(40), blues[2])));
    world
}

fn saved(world: &World) -> MemoryStore {
    let mut store = MemoryStore::new();
    savegame::save(world, &mut store).unwrap();
    store
}

fn load(store: &MemoryStore) -> Result<World, PersistError> {
    savegame::load(store, &catalog(), SimConfig::default())
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn round_trip_preserves_state_hash() {
    let world = skirmish(7);
    let loaded = load(&saved(&world)).unwrap();
    assert_eq!(loaded.state_hash().unwrap(), world.state_hash().unwrap());
    assert_eq!(loaded.tick(), world.tick());
    assert_eq!(queue_view(&loaded), queue_view(&world));
}

#[test]
fn loaded_world_continues_identically() {
    let mut original = skirmish(11);
    original.run_until(Tick(17));
    let mut loaded = load(&saved(&original)).unwrap();

    original.run_until(Tick(60));
    loaded.run_until(Tick(60));
    assert_eq!(loaded.state_hash().unwrap(), original.state_hash().unwrap());
}

#[test]
fn counters_resume_after_load() {
    let mut world = skirmish(3);
    world.run_until(Tick(20));
    let mut loaded = load(&saved(&world)).unwrap();

    assert_eq!(
        loaded.scheduler().next_command_serial(),
        world.scheduler().next_command_serial()
    );
    let next_entity = world.registry().next_serial();
    assert_eq!(loaded.spawn(Soldier::new(1)), next_entity);
    assert_eq!(
        loaded.enqueue(Box::new(Heal::new(30, next_entity, 1))),
        world.scheduler().next_command_serial()
    );
}

#[test]
fn handles_across_kinds_are_restored() {
    let world = skirmish(1);
    let loaded = load(&saved(&world)).unwrap();
    let tower = loaded
        .registry()
        .get_as::<Tower>(serial(7))
        .expect("tower loaded");
    assert_eq!(tower.name, "keep");
    let garrison: Vec<_> = tower.garrison.iter().map(|h| h.serial()).collect();
    assert_eq!(garrison, vec![Some(serial(1)), Some(serial(2)), Some(serial(3))]);
    assert_eq!(soldier(&loaded, serial(1)).unwrap().rival.serial(), Some(serial(4)));
    assert_eq!(soldier(&loaded, serial(4)).unwrap().rival.serial(), Some(serial(1)));
}

#[test]
fn dead_references_are_saved_as_absent() {
    let mut world = skirmish(5);
    world.registry_mut().unregister(serial(4));
    let mut loaded = load(&saved(&world)).unwrap();
    assert!(soldier(&loaded, serial(1)).unwrap().rival.is_empty());
    // Attacks on the dead soldier were saved with an absent target too.
    loaded.run_until(Tick(60));
    assert!(soldier(&loaded, serial(4)).is_none());
}

#[test]
fn equal_worlds_save_identical_bytes() {
    assert_eq!(saved(&skirmish(9)), saved(&skirmish(9)));
    assert_ne!(saved(&skirmish(9)), saved(&skirmish(10)));
}

#[test]
fn sections_are_named_by_kind() {
    let store = saved(&skirmish(2));
    assert_eq!(
        store.names().unwrap(),
        vec!["commands", "entities/soldier", "entities/tower", "header"]
    );
    let header = savegame::read_header(&store).unwrap();
    assert_eq!(header.entity_count, 7);
    assert_eq!(header.next_entity_serial, 8);
    assert_eq!(header.kinds, vec!["soldier", "tower"]);
}

#[test]
fn dir_store_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut store = DirStore::create(dir.path().join("slot1")).unwrap();
    let world = skirmish(21);
    savegame::save(&world, &mut store).unwrap();

    let loaded = savegame::load(&store, &catalog(), SimConfig::default()).unwrap();
    assert_eq!(loaded.state_hash().unwrap(), world.state_hash().unwrap());
    assert!(dir.path().join("slot1/entities/soldier").is_file());
}

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

#[test]
fn version_one_attack_is_migrated() {
    let mut world = World::new(SimConfig::default());
    let a = world.spawn(Soldier::new(10));
    let b = world.spawn(Soldier::new(10));
    let mut store = saved(&world);

    let attack = Attack::new(4, a, b, 6).with_jitter(50);
    let mut w = StreamWriter::new();
    write_version(&mut w, 1).unwrap();
    w.u32(2).unwrap();
    w.u32(1).unwrap();
    w.u32(ATTACK.get()).unwrap();
    w.u32(1).unwrap();
    attack.write_v1(&mut w, &SaveContext::new(world.registry())).unwrap();
    store.write(COMMANDS_SECTION, w.as_bytes()).unwrap();

    let mut loaded = load(&store).unwrap();
    assert_eq!(loaded.run_until(Tick(4)), 1);
    // Version 1 had no jitter, so the damage is exact.
    assert_eq!(soldier(&loaded, b).unwrap().hp, 4);
}

#[test]
fn newer_entity_version_is_rejected() {
    let mut store = saved(&skirmish(4));
    // First soldier record: section version, count, serial, length, then the packet.
    store.get_mut("entities/soldier").unwrap()[14] = 2;
    let err = load(&store).unwrap_err();
    assert!(matches!(
        err,
        PersistError::Object(ObjectError::Codec(CodecError::UnsupportedVersion { tag: 2, newest: 1 }))
    ));
}

#[test]
fn newer_header_version_is_rejected() {
    let mut store = saved(&skirmish(4));
    store.get_mut(HEADER_SECTION).unwrap()[0] = 3;
    let err = load(&store).unwrap_err();
    assert!(matches!(
        err,
        PersistError::Codec(CodecError::UnsupportedVersion { tag: 3, newest: 2 })
    ));
}

// ---------------------------------------------------------------------------
// Fatal errors
// ---------------------------------------------------------------------------

#[test]
fn unknown_command_kind_aborts_load() {
    let store = saved(&skirmish(4));
    let mut partial = Catalog::new();
    partial
        .register_entity("soldier", load_soldier)
        .register_entity("tower", load_tower)
        .register_command(ATTACK, "attack", Attack::load);
    let err = savegame::load(&store, &partial, SimConfig::default()).unwrap_err();
    assert!(matches!(err, PersistError::UnknownCommandKind(101)));
}

#[test]
fn unknown_entity_kind_aborts_load() {
    let store = saved(&skirmish(4));
    let mut partial = Catalog::new();
    partial.register_entity("soldier", load_soldier);
    let err = savegame::load(&store, &partial, SimConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        PersistError::Object(ObjectError::UnknownEntityKind(ref kind)) if kind == "tower"
    ));
}

#[test]
fn reference_outside_the_save_is_dangling() {
    let mut world = World::new(SimConfig::default());
    world.spawn(Soldier::new(10));
    let mut store = saved(&world);
    let section = store.get_mut("entities/soldier").unwrap();
    let rival_at = section.len() - 4;
    section[rival_at..].copy_from_slice(&9u32.to_le_bytes());

    let err = load(&store).unwrap_err();
    assert!(matches!(
        err,
        PersistError::Object(ObjectError::DanglingReferenceAtLoad(s)) if s.get() == 9
    ));
}

#[test]
fn duplicate_serial_across_sections_aborts_load() {
    let mut world = World::new(SimConfig::default());
    world.spawn(Soldier::new(10));
    world.spawn(Tower {
        name: "gate".to_owned(),
        garrison: Vec::new(),
    });
    let mut store = saved(&world);
    store.get_mut("entities/tower").unwrap()[6..10].copy_from_slice(&1u32.to_le_bytes());

    let err = load(&store).unwrap_err();
    assert!(matches!(
        err,
        PersistError::Object(ObjectError::DuplicateSerial(s)) if s.get() == 1
    ));
}

#[test]
fn truncated_section_aborts_load() {
    let mut store = saved(&skirmish(4));
    let commands = store.get_mut(COMMANDS_SECTION).unwrap();
    commands.truncate(commands.len() - 3);
    let err = load(&store).unwrap_err();
    assert!(matches!(
        err.codec_error(),
        Some(CodecError::TruncatedData { .. })
    ));
}

#[test]
fn header_cut_inside_kind_name_is_truncated() {
    let mut store = saved(&skirmish(4));
    let header = store.get_mut(HEADER_SECTION).unwrap();
    assert!(header.ends_with(b"tower\0"));
    header.truncate(header.len() - 3);
    let err = load(&store).unwrap_err();
    assert!(matches!(
        err,
        PersistError::Codec(CodecError::TruncatedData { available: 3, .. })
    ));
}

#[test]
fn missing_section_aborts_load() {
    let mut store = saved(&skirmish(4));
    store.remove(COMMANDS_SECTION);
    let err = load(&store).unwrap_err();
    assert!(matches!(err, PersistError::MissingSection(ref s) if s == "commands"));

    let mut store = saved(&skirmish(4));
    store.remove("entities/tower");
    let err = load(&store).unwrap_err();
    assert!(matches!(err, PersistError::MissingSection(ref s) if s == "entities/tower"));
}
