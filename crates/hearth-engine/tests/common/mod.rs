//! Gameplay fixtures shared by the integration tests: a small skirmish with
//! soldiers, towers, attacks and heals.

#![allow(dead_code)]

use hearth_engine::prelude::*;
use rand::Rng;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Soldier {
    pub hp: u32,
    pub kills: u32,
    pub rival: WeakHandle<Soldier>,
}

impl Soldier {
    pub fn new(hp: u32) -> Self {
        Self {
            hp,
            kills: 0,
            rival: WeakHandle::empty(),
        }
    }
}

impl Entity for Soldier {
    fn kind_name(&self) -> &'static str {
        "soldier"
    }

    fn save(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError> {
        write_version(w, 1)?;
        w.u32(self.hp)?;
        w.u32(self.kills)?;
        ctx.write_handle(w, &self.rival)
    }
}

pub fn load_soldier(
    r: &mut StreamReader<'_>,
    ctx: &LoadContext<'_>,
) -> Result<Box<dyn Entity>, ObjectError> {
    match read_version(r, 1)? {
        1 => Ok(Box::new(Soldier {
            hp: r.u32()?,
            kills: r.u32()?,
            rival: ctx.read_handle(r)?,
        })),
        other => Err(unsupported(other, 1).into()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tower {
    pub name: String,
    pub garrison: Vec<WeakHandle<Soldier>>,
}

impl Entity for Tower {
    fn kind_name(&self) -> &'static str {
        "tower"
    }

    fn save(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError> {
        write_version(w, 1)?;
        w.cstr(&self.name)?;
        w.u32(self.garrison.len() as u32)?;
        for member in &self.garrison {
            ctx.write_handle(w, member)?;
        }
        Ok(())
    }
}

pub fn load_tower(
    r: &mut StreamReader<'_>,
    ctx: &LoadContext<'_>,
) -> Result<Box<dyn Entity>, ObjectError> {
    match read_version(r, 1)? {
        1 => {
            let name = r.cstr()?.to_owned();
            let count = r.u32()?;
            let garrison = (0..count)
                .map(|_| ctx.read_handle(r))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Box::new(Tower { name, garrison }))
        }
        other => Err(unsupported(other, 1).into()),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub const ATTACK: CommandKind = CommandKind(100);
pub const HEAL: CommandKind = CommandKind(101);
pub const RECRUIT: CommandKind = CommandKind(102);

/// `attacker` hits `target` for `damage` plus a random bonus in
/// `0..=jitter`. A dead target is unregistered and credited to the attacker.
/// Nothing happens if either side is already gone.
#[derive(Debug, Clone, PartialEq)]
pub struct Attack {
    pub due: Tick,
    pub attacker: WeakHandle<Soldier>,
    pub target: WeakHandle<Soldier>,
    pub damage: u32,
    pub jitter: u32,
}

impl Attack {
    pub const VERSION: PacketVersion = 2;

    pub fn new(due: u32, attacker: Serial, target: Serial, damage: u32) -> Self {
        Self {
            due: Tick(due),
            attacker: WeakHandle::new(attacker),
            target: WeakHandle::new(target),
            damage,
            jitter: 0,
        }
    }

    pub fn with_jitter(mut self, jitter: u32) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn load(
        r: &mut StreamReader<'_>,
        ctx: &LoadContext<'_>,
    ) -> Result<Box<dyn Command>, PersistError> {
        let version = read_version(r, Self::VERSION)?;
        let due = Tick::read(r)?;
        let attacker = ctx.read_handle(r)?;
        let target = ctx.read_handle(r)?;
        let damage = r.u32()?;
        let jitter = match version {
            1 => 0,
            2 => r.u32()?,
            other => return Err(unsupported(other, Self::VERSION).into()),
        };
        Ok(Box::new(Self {
            due,
            attacker,
            target,
            damage,
            jitter,
        }))
    }

    /// The version 1 layout, as older builds wrote it.
    pub fn write_v1(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError> {
        write_version(w, 1)?;
        self.due.write(w)?;
        ctx.write_handle(w, &self.attacker)?;
        ctx.write_handle(w, &self.target)?;
        w.u32(self.damage)
    }
}

impl Command for Attack {
    fn kind(&self) -> CommandKind {
        ATTACK
    }

    fn due_time(&self) -> Tick {
        self.due
    }

    fn execute(self: Box<Self>, world: &mut World) {
        if !self.attacker.is_alive(world.registry()) {
            return;
        }
        let bonus = if self.jitter > 0 {
            world.rng_mut().gen_range(0..=self.jitter)
        } else {
            0
        };
        let Some(target) = self.target.resolve_mut(world.registry_mut()) else {
            return;
        };
        target.hp = target.hp.saturating_sub(self.damage + bonus);
        if target.hp > 0 {
            return;
        }
        if let Some(serial) = self.target.serial() {
            world.registry_mut().unregister(serial);
        }
        if let Some(attacker) = self.attacker.resolve_mut(world.registry_mut()) {
            attacker.kills += 1;
        }
    }

    fn write(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError> {
        write_version(w, Self::VERSION)?;
        self.due.write(w)?;
        ctx.write_handle(w, &self.attacker)?;
        ctx.write_handle(w, &self.target)?;
        w.u32(self.damage)?;
        w.u32(self.jitter)
    }
}

/// Restores `amount` hp to `target`, then repeats every `period` ticks while
/// `remaining` is non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Heal {
    pub due: Tick,
    pub target: WeakHandle<Soldier>,
    pub amount: u32,
    pub period: u32,
    pub remaining: u32,
}

impl Heal {
    pub fn new(due: u32, target: Serial, amount: u32) -> Self {
        Self {
            due: Tick(due),
            target: WeakHandle::new(target),
            amount,
            period: 0,
            remaining: 0,
        }
    }

    pub fn repeating(mut self, period: u32, remaining: u32) -> Self {
        self.period = period;
        self.remaining = remaining;
        self
    }

    pub fn load(
        r: &mut StreamReader<'_>,
        ctx: &LoadContext<'_>,
    ) -> Result<Box<dyn Command>, PersistError> {
        match read_version(r, 1)? {
            1 => Ok(Box::new(Self {
                due: Tick::read(r)?,
                target: ctx.read_handle(r)?,
                amount: r.u32()?,
                period: r.u32()?,
                remaining: r.u32()?,
            })),
            other => Err(unsupported(other, 1).into()),
        }
    }
}

impl Command for Heal {
    fn kind(&self) -> CommandKind {
        HEAL
    }

    fn due_time(&self) -> Tick {
        self.due
    }

    fn execute(self: Box<Self>, world: &mut World) {
        // A heal on a dead soldier also ends the repetition.
        let Some(target) = self.target.resolve_mut(world.registry_mut()) else {
            return;
        };
        target.hp += self.amount;
        if self.remaining > 0 {
            world.enqueue(Box::new(Heal {
                due: self.due.saturating_add(self.period),
                remaining: self.remaining - 1,
                ..*self
            }));
        }
    }

    fn write(&self, w: &mut StreamWriter, ctx: &SaveContext<'_>) -> Result<(), CodecError> {
        write_version(w, 1)?;
        self.due.write(w)?;
        ctx.write_handle(w, &self.target)?;
        w.u32(self.amount)?;
        w.u32(self.period)?;
        w.u32(self.remaining)
    }
}

/// Registers a new soldier when it becomes due.
#[derive(Debug, Clone, PartialEq)]
pub struct Recruit {
    pub due: Tick,
    pub hp: u32,
}

impl Recruit {
    pub fn load(
        r: &mut StreamReader<'_>,
        _ctx: &LoadContext<'_>,
    ) -> Result<Box<dyn Command>, PersistError> {
        match read_version(r, 1)? {
            1 => Ok(Box::new(Self {
                due: Tick::read(r)?,
                hp: r.u32()?,
            })),
            other => Err(unsupported(other, 1).into()),
        }
    }
}

impl Command for Recruit {
    fn kind(&self) -> CommandKind {
        RECRUIT
    }

    fn due_time(&self) -> Tick {
        self.due
    }

    fn execute(self: Box<Self>, world: &mut World) {
        world.spawn(Soldier::new(self.hp));
    }

    fn write(&self, w: &mut StreamWriter, _ctx: &SaveContext<'_>) -> Result<(), CodecError> {
        write_version(w, 1)?;
        self.due.write(w)?;
        w.u32(self.hp)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .register_entity("soldier", load_soldier)
        .register_entity("tower", load_tower)
        .register_command(ATTACK, "attack", Attack::load)
        .register_command(HEAL, "heal", Heal::load)
        .register_command(RECRUIT, "recruit", Recruit::load);
    catalog
}

pub fn soldier(world: &World, serial: Serial) -> Option<&Soldier> {
    world.registry().get_as::<Soldier>(serial)
}

pub fn serial(raw: u32) -> Serial {
    Serial::new(raw).unwrap()
}

/// Queued commands as `(due, serial, kind)`, in execution order.
pub fn queue_view(world: &World) -> Vec<(u32, u32, u32)> {
    world
        .scheduler()
        .pending()
        .iter()
        .map(|p| (p.due.get(), p.serial.get(), p.kind.get()))
        .collect()
}
