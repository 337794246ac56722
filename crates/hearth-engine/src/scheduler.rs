//! The command queue.
//!
//! [`Scheduler`] keeps pending commands in a min-heap ordered by
//! `(due tick, enqueue serial)`. The enqueue serial comes from the scheduler's
//! own counter, which only moves forward and survives save/load, so two
//! commands due at the same tick always run in the order they were enqueued,
//! on every machine and after every reload. Nothing else (allocation
//! addresses, hash order, command contents) takes part in the ordering.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;

use tracing::debug;

use crate::command::{Command, CommandKind};
use crate::tick::Tick;
use crate::PersistError;

// ---------------------------------------------------------------------------
// CommandSerial
// ---------------------------------------------------------------------------

/// Enqueue order of a command. Assigned by [`Scheduler::enqueue`], starting
/// at 1.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandSerial(pub u32);

impl CommandSerial {
    /// The serial of the first command ever enqueued.
    pub const FIRST: CommandSerial = CommandSerial(1);

    /// The raw value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for CommandSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandSerial({})", self.0)
    }
}

impl fmt::Display for CommandSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// A command taken off the queue, with the key it was ordered by.
#[derive(Debug)]
pub struct Scheduled {
    pub due: Tick,
    pub serial: CommandSerial,
    pub command: Box<dyn Command>,
}

/// Summary of a queued command, as listed by [`Scheduler::pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub due: Tick,
    pub serial: CommandSerial,
    pub kind: CommandKind,
}

struct QueuedCommand {
    due: Tick,
    serial: CommandSerial,
    command: Box<dyn Command>,
}

impl QueuedCommand {
    fn key(&self) -> (Tick, CommandSerial) {
        (self.due, self.serial)
    }
}

impl PartialEq for QueuedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedCommand {}

impl PartialOrd for QueuedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Priority queue of pending commands.
pub struct Scheduler {
    queue: BinaryHeap<Reverse<QueuedCommand>>,
    next_serial: CommandSerial,
}

impl Scheduler {
    /// An empty queue whose first enqueue serial is 1.
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            next_serial: CommandSerial::FIRST,
        }
    }

    /// Queue `command` under the next enqueue serial and return that serial.
    ///
    /// The due tick is read once, here.
    ///
    /// # Panics
    ///
    /// Panics when the 32-bit enqueue serial space is exhausted.
    pub fn enqueue(&mut self, command: Box<dyn Command>) -> CommandSerial {
        let serial = self.next_serial;
        let next = serial
            .0
            .checked_add(1)
            .unwrap_or_else(|| panic!("command serial space exhausted after {serial}"));
        self.next_serial = CommandSerial(next);
        self.push(serial, command);
        serial
    }

    fn push(&mut self, serial: CommandSerial, command: Box<dyn Command>) {
        let due = command.due_time();
        self.queue.push(Reverse(QueuedCommand {
            due,
            serial,
            command,
        }));
    }

    /// Remove and return the earliest command if it is due at or before `now`.
    pub fn pop_due(&mut self, now: Tick) -> Option<Scheduled> {
        if self.peek_due_time()? > now {
            return None;
        }
        self.queue.pop().map(|Reverse(q)| Scheduled {
            due: q.due,
            serial: q.serial,
            command: q.command,
        })
    }

    /// Due tick of the earliest queued command.
    pub fn peek_due_time(&self) -> Option<Tick> {
        self.queue.peek().map(|Reverse(q)| q.due)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The serial the next [`enqueue`](Self::enqueue) will assign.
    pub fn next_command_serial(&self) -> CommandSerial {
        self.next_serial
    }

    /// Drop every queued command without running it. Returns how many were
    /// dropped. The serial counter keeps its value.
    pub fn flush(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "command queue flushed");
        }
        dropped
    }

    /// Queued commands in execution order.
    pub fn pending(&self) -> Vec<PendingCommand> {
        self.ordered()
            .into_iter()
            .map(|q| PendingCommand {
                due: q.due,
                serial: q.serial,
                kind: q.command.kind(),
            })
            .collect()
    }

    /// Queued commands with their serials, in execution order.
    pub(crate) fn ordered_commands(&self) -> Vec<(CommandSerial, &dyn Command)> {
        self.ordered()
            .into_iter()
            .map(|q| (q.serial, q.command.as_ref()))
            .collect()
    }

    fn ordered(&self) -> Vec<&QueuedCommand> {
        let mut entries: Vec<&QueuedCommand> = self.queue.iter().map(|Reverse(q)| q).collect();
        entries.sort_unstable_by_key(|q| q.key());
        entries
    }

    // -- load support ---------------------------------------------------------

    /// Install a saved queue and its serial counter. The queue must be empty.
    ///
    /// Every saved serial must lie in `1..next_serial` and appear once.
    pub(crate) fn restore(
        &mut self,
        next_serial: u32,
        entries: Vec<(CommandSerial, Box<dyn Command>)>,
    ) -> Result<(), PersistError> {
        if next_serial == 0 || !self.queue.is_empty() {
            return Err(corrupt(format!(
                "cannot restore command serial counter {next_serial}"
            )));
        }
        let next = CommandSerial(next_serial);
        let mut queued = Vec::with_capacity(entries.len());
        for (serial, command) in entries {
            if serial.0 == 0 || serial >= next {
                return Err(corrupt(format!(
                    "command serial {serial} is outside 1..{next_serial}"
                )));
            }
            queued.push(QueuedCommand {
                due: command.due_time(),
                serial,
                command,
            });
        }
        queued.sort_unstable_by_key(|q| q.serial);
        if let Some(pair) = queued.windows(2).find(|pair| pair[0].serial == pair[1].serial) {
            return Err(corrupt(format!(
                "command serial {} appears more than once",
                pair[0].serial
            )));
        }
        self.next_serial = next;
        self.queue = queued.into_iter().map(Reverse).collect();
        Ok(())
    }
}

fn corrupt(detail: String) -> PersistError {
    PersistError::Corrupt {
        section: "commands".to_owned(),
        detail,
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.queue.len())
            .field("next_serial", &self.next_serial)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
