//! Recording register bus for protocol tests.
//!
//! Keeps every register access in order and reconstructs the jobs staged
//! between TRIGGER pulses, so tests can check framing and ordering rules
//! over the full submission trace.

use crate::command::{Command, CommandFlags, Operation, SlotId};
use crate::regs::{Register, RegisterBus};
use crate::wait::WaitEvent;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Write(Register, u32),
    Read(Register, u32),
    Wait,
    Shutdown,
}

/// A job as seen on the bus at TRIGGER time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedJob {
    pub command: Command,
    pub input: Option<u32>,
    pub bytes: Option<u32>,
    pub output: Option<u32>,
    pub cache: Option<u32>,
    pub cast: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Job(RecordedJob),
    Wait,
}

#[derive(Default)]
pub struct RecordingBus {
    accesses: Vec<Access>,
    next_id: u32,
    waits: u32,
    /// Number of negative ACQUIRE reads returned before the next success.
    pub busy_polls: u32,
}

impl RecordingBus {
    pub fn accesses(&self) -> &[Access] {
        &self.accesses
    }

    pub fn clear(&mut self) {
        self.accesses.clear();
    }

    pub fn waits(&self) -> u32 {
        self.waits
    }

    pub fn mark_shutdown(&mut self) {
        self.accesses.push(Access::Shutdown);
    }

    /// Jobs and completion waits in the order they happened.
    pub fn events(&self) -> Vec<TraceEvent> {
        let mut staged: HashMap<Register, u32> = HashMap::new();
        let mut events = Vec::new();

        for access in &self.accesses {
            match *access {
                Access::Write(Register::Trigger, _) => {
                    let word = staged.remove(&Register::Commands).unwrap_or(0);
                    let command = Command::decode(word).unwrap_or(Command::new(
                        Operation::Full,
                        Default::default(),
                        SlotId(0),
                    ));
                    events.push(TraceEvent::Job(RecordedJob {
                        command,
                        input: staged.remove(&Register::InAddr),
                        bytes: staged.remove(&Register::TotLen),
                        output: staged.remove(&Register::OutAddr),
                        cache: staged.remove(&Register::CacheBaseAddr),
                        cast: staged.remove(&Register::CastCtrl),
                    }));
                    staged.clear();
                }
                Access::Write(Register::SoftClear, _) => staged.clear(),
                Access::Write(reg, value) => {
                    staged.insert(reg, value);
                }
                Access::Wait => events.push(TraceEvent::Wait),
                Access::Read(..) | Access::Shutdown => {}
            }
        }
        events
    }

    pub fn jobs(&self) -> Vec<RecordedJob> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TraceEvent::Job(job) => Some(job),
                TraceEvent::Wait => None,
            })
            .collect()
    }
}

impl RegisterBus for RecordingBus {
    fn write(&mut self, reg: Register, value: u32) {
        self.accesses.push(Access::Write(reg, value));
    }

    fn read(&mut self, reg: Register) -> u32 {
        let value = match reg {
            Register::Acquire if self.busy_polls > 0 => {
                self.busy_polls -= 1;
                u32::MAX
            }
            Register::Acquire => {
                let id = self.next_id;
                self.next_id = (self.next_id + 1) % 16;
                id
            }
            Register::Finished => self.waits,
            _ => 0,
        };
        if reg != Register::Acquire {
            self.accesses.push(Access::Read(reg, value));
        }
        value
    }
}

/// Completes the oldest job instantly and records the wait.
pub struct RecordingEvents;

impl WaitEvent<RecordingBus> for RecordingEvents {
    fn wait(&mut self, bus: &mut RecordingBus) {
        bus.waits += 1;
        bus.accesses.push(Access::Wait);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Free,
    Reserved,
    Finalizing(u64),
    Settled,
}

/// Replays a trace against the slot rules of the hardware.
///
/// Completions are assumed to arrive in issue order, one per wait. Returns
/// a description of the first violation found.
pub fn check_protocol(events: &[TraceEvent], slot_count: usize) -> Result<(), String> {
    let mut slots = vec![Observed::Free; slot_count];
    let mut issued: u64 = 0;
    let mut completed: u64 = 0;

    for (index, event) in events.iter().enumerate() {
        let job = match event {
            TraceEvent::Wait => {
                completed += 1;
                if completed > issued {
                    return Err(format!("event {index}: wait with no job outstanding"));
                }
                continue;
            }
            TraceEvent::Job(job) => job,
        };

        let flags = job.command.flags;
        let slot = job.command.slot.index();
        if job.command.operation != Operation::NoOp {
            issued += 1;
        }

        match job.command.operation {
            Operation::NoOp | Operation::Full => {}
            Operation::Accumulate => {
                let Some(state) = slots.get_mut(slot) else {
                    return Err(format!("event {index}: slot {slot} out of range"));
                };
                let expected = if flags.contains(CommandFlags::ACQUIRE_SLOT) {
                    Observed::Free
                } else {
                    Observed::Reserved
                };
                if *state != expected {
                    return Err(format!(
                        "event {index}: accumulate on slot {slot} in state {state:?}"
                    ));
                }
                *state = if flags.contains(CommandFlags::LAST) {
                    Observed::Finalizing(issued)
                } else {
                    Observed::Reserved
                };
            }
            Operation::Divide => {
                let Some(state) = slots.get_mut(slot) else {
                    return Err(format!("event {index}: slot {slot} out of range"));
                };
                match *state {
                    Observed::Finalizing(last) if last <= completed => {}
                    Observed::Settled => {}
                    other => {
                        return Err(format!(
                            "event {index}: divide on slot {slot} in state {other:?}"
                        ));
                    }
                }
                *state = if flags.contains(CommandFlags::LAST) {
                    Observed::Free
                } else {
                    Observed::Settled
                };
            }
        }
    }

    match slots.iter().position(|s| *s != Observed::Free) {
        Some(slot) => Err(format!("slot {slot} still held at end of trace")),
        None => Ok(()),
    }
}
