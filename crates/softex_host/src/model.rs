//! Functional model of the softmax accelerator.
//!
//! The model sits behind the same [`RegisterBus`] the firmware drives over
//! MMIO. Triggered jobs enter a bounded issue queue and run in order. The
//! model makes progress whenever software would otherwise stall: an
//! ACQUIRE on a full queue, a FINISHED poll, or a completion wait each run
//! the job at the head of the queue.
//!
//! Every accepted job is checked against the slot rules at TRIGGER time.
//! Breaches are recorded as [`Violation`]s rather than aborting, so a whole
//! run can be inspected afterwards.

use crate::arena::Memory;
use crate::element;
use softex_core::command::{Command, CommandFlags, Operation, SlotId};
use softex_core::format::{CastConfig, ElementFormat};
use softex_core::regs::{Register, RegisterBus};
use softex_core::wait::WaitEvent;
use std::collections::VecDeque;
use std::fmt;

/// Job ids handed out by ACQUIRE wrap at this value.
const JOB_IDS: u32 = 256;

/// Value of RUNNING_JOB while the queue is empty.
pub const IDLE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    /// Accumulation slots implemented.
    pub slot_count: usize,
    /// Jobs the issue queue holds before ACQUIRE reports busy.
    pub queue_depth: usize,
    /// Keep every register access for later inspection.
    pub record_trace: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            slot_count: 2,
            queue_depth: 2,
            record_trace: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAccess {
    Write(Register, u32),
    Read(Register, u32),
}

/// A protocol breach observed by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    TriggerWithoutAcquire,
    MalformedCommand { job: u32, word: u32 },
    SlotOutOfRange { job: u32, slot: SlotId },
    SlotBusy { job: u32, slot: SlotId },
    SlotNotReserved { job: u32, slot: SlotId },
    DivideBeforeCompletion { job: u32, slot: SlotId },
    Unmapped { job: u32, addr: u32, bytes: u32 },
    SoftClearWhileBusy { pending: usize },
    WaitWhileIdle,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::TriggerWithoutAcquire => write!(f, "TRIGGER without a granted job id"),
            Violation::MalformedCommand { job, word } => {
                write!(f, "job {job}: malformed command word {word:#010x}")
            }
            Violation::SlotOutOfRange { job, slot } => write!(f, "job {job}: {slot} does not exist"),
            Violation::SlotBusy { job, slot } => {
                write!(f, "job {job}: ACQUIRE_SLOT on {slot} which is still in use")
            }
            Violation::SlotNotReserved { job, slot } => {
                write!(f, "job {job}: {slot} is not in the expected phase")
            }
            Violation::DivideBeforeCompletion { job, slot } => write!(
                f,
                "job {job}: divide on {slot} before its LAST accumulation was observed complete"
            ),
            Violation::Unmapped { job, addr, bytes } => {
                write!(f, "job {job}: {bytes} bytes at {addr:#010x} are not mapped")
            }
            Violation::SoftClearWhileBusy { pending } => {
                write!(f, "SOFT_CLEAR with {pending} jobs in flight")
            }
            Violation::WaitWhileIdle => write!(f, "completion awaited with an empty queue"),
        }
    }
}

/// Counters over the model's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub accepted: u64,
    pub executed: u64,
    pub busy_acquires: u64,
    pub elements: u64,
}

/// Slot lifecycle as seen from submitted jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Free,
    Reserved,
    Finalizing(u64),
    Settled,
}

/// Online maximum and rescaled exponential sum.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    max: f32,
    sum: f32,
}

impl Accumulator {
    const EMPTY: Self = Self {
        max: f32::NEG_INFINITY,
        sum: 0.0,
    };

    fn push(&mut self, x: f32) {
        if x > self.max {
            self.sum = self.sum * (self.max - x).exp() + 1.0;
            self.max = x;
        } else {
            self.sum += (x - self.max).exp();
        }
    }

    fn normalize(&self, x: f32) -> f32 {
        (x - self.max).exp() / self.sum
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Staged {
    in_addr: u32,
    out_addr: u32,
    tot_len: u32,
    commands: u32,
    cache: u32,
    cast: u32,
}

#[derive(Debug, Clone, Copy)]
struct QueuedJob {
    id: u32,
    command: Command,
    regs: Staged,
}

/// Software stand-in for the accelerator.
pub struct SoftexModel {
    config: ModelConfig,
    memory: Memory,
    staged: Staged,
    queue: VecDeque<QueuedJob>,
    granted: Option<u32>,
    next_id: u32,
    /// Event-raising jobs accepted.
    accepted: u64,
    /// Event-raising jobs executed.
    completed: u64,
    /// Completions software has seen, through a wait or a FINISHED read.
    observed: u64,
    finished: u32,
    phases: Vec<Phase>,
    accumulators: Vec<Accumulator>,
    cache: Option<u32>,
    violations: Vec<Violation>,
    trace: Vec<BusAccess>,
    stats: ModelStats,
    halted: bool,
}

impl SoftexModel {
    pub fn new(config: ModelConfig, memory: Memory) -> Self {
        Self {
            config,
            memory,
            staged: Staged::default(),
            queue: VecDeque::with_capacity(config.queue_depth),
            granted: None,
            next_id: 0,
            accepted: 0,
            completed: 0,
            observed: 0,
            finished: 0,
            phases: vec![Phase::Free; config.slot_count],
            accumulators: vec![Accumulator::EMPTY; config.slot_count],
            cache: None,
            violations: Vec::new(),
            trace: Vec::new(),
            stats: ModelStats::default(),
            halted: false,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn trace(&self) -> &[BusAccess] {
        &self.trace
    }

    pub fn stats(&self) -> ModelStats {
        self.stats
    }

    /// Cache address latched by the last SET_CACHE_ADDR job.
    pub fn cache_addr(&self) -> Option<u32> {
        self.cache
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Shutdown primitive: marks the end of the simulation.
    pub fn halt(&mut self) {
        if !self.queue.is_empty() {
            log::warn!("halted with {} jobs still queued", self.queue.len());
        }
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Runs queued jobs until one more completion is available, then
    /// consumes it.
    pub fn wait_event(&mut self) {
        while self.completed <= self.observed {
            if self.queue.is_empty() {
                // Real hardware would stall here forever.
                self.violations.push(Violation::WaitWhileIdle);
                return;
            }
            self.step();
        }
        self.observed += 1;
    }

    fn violation(&mut self, violation: Violation) {
        log::warn!("protocol violation: {}", violation);
        self.violations.push(violation);
    }

    fn soft_clear(&mut self) {
        if !self.queue.is_empty() {
            let pending = self.queue.len();
            self.violation(Violation::SoftClearWhileBusy { pending });
        }
        self.queue.clear();
        self.staged = Staged::default();
        self.granted = None;
        self.accepted = 0;
        self.completed = 0;
        self.observed = 0;
        self.finished = 0;
        self.phases.fill(Phase::Free);
        self.accumulators.fill(Accumulator::EMPTY);
        self.cache = None;
    }

    fn acquire(&mut self) -> u32 {
        if let Some(id) = self.granted {
            return id;
        }
        if self.queue.len() >= self.config.queue_depth {
            self.stats.busy_acquires += 1;
            self.step();
            return u32::MAX;
        }
        let id = self.next_id;
        self.granted = Some(id);
        id
    }

    fn accept(&mut self) {
        let Some(id) = self.granted.take() else {
            self.violation(Violation::TriggerWithoutAcquire);
            return;
        };
        self.next_id = (self.next_id + 1) % JOB_IDS;

        let word = self.staged.commands;
        let command = match Command::decode(word) {
            Ok(command) => command,
            Err(_) => {
                self.violation(Violation::MalformedCommand { job: id, word });
                return;
            }
        };

        self.check_slot_order(id, &command);
        if command.operation != Operation::NoOp {
            self.accepted += 1;
        }
        self.stats.accepted += 1;
        self.queue.push_back(QueuedJob {
            id,
            command,
            regs: self.staged,
        });
        log::trace!("accepted job {}: {:?} on {}", id, command.operation, command.slot);
    }

    fn check_slot_order(&mut self, job: u32, command: &Command) {
        let slot = command.slot;
        let flags = command.flags;
        let last = flags.contains(CommandFlags::LAST);
        // Sequence number this job will complete as.
        let seq = self.accepted + 1;
        let observed = self.observed;

        if !matches!(command.operation, Operation::Accumulate | Operation::Divide) {
            return;
        }
        let Some(phase) = self.phases.get_mut(slot.index()) else {
            self.violation(Violation::SlotOutOfRange { job, slot });
            return;
        };

        let breach = match command.operation {
            Operation::Accumulate => {
                let first = flags.contains(CommandFlags::ACQUIRE_SLOT);
                let breach = match (first, *phase) {
                    (true, Phase::Free) | (false, Phase::Reserved) => None,
                    (true, _) => Some(Violation::SlotBusy { job, slot }),
                    (false, _) => Some(Violation::SlotNotReserved { job, slot }),
                };
                *phase = if last { Phase::Finalizing(seq) } else { Phase::Reserved };
                breach
            }
            _ => {
                let breach = match *phase {
                    Phase::Finalizing(done) if done <= observed => None,
                    Phase::Settled => None,
                    Phase::Finalizing(_) => Some(Violation::DivideBeforeCompletion { job, slot }),
                    _ => Some(Violation::SlotNotReserved { job, slot }),
                };
                *phase = if last { Phase::Free } else { Phase::Settled };
                breach
            }
        };
        if let Some(breach) = breach {
            self.violation(breach);
        }
    }

    /// Runs the job at the head of the queue, if any.
    fn step(&mut self) {
        let Some(job) = self.queue.pop_front() else {
            return;
        };
        self.execute(&job);
        self.stats.executed += 1;
        if job.command.operation != Operation::NoOp {
            self.completed += 1;
            self.finished = self.finished.wrapping_add(1);
        }
    }

    fn formats(job: &QueuedJob) -> (ElementFormat, ElementFormat) {
        let cast = CastConfig::decode(job.regs.cast);
        let flags = job.command.flags;
        let input = if flags.contains(CommandFlags::INT_INPUT) {
            cast.input()
        } else {
            ElementFormat::Bf16
        };
        let output = if flags.contains(CommandFlags::INT_OUTPUT) {
            cast.output()
        } else {
            ElementFormat::Bf16
        };
        (input, output)
    }

    fn execute(&mut self, job: &QueuedJob) {
        let command = job.command;
        if command.flags.contains(CommandFlags::SET_CACHE_ADDR) {
            self.cache = Some(job.regs.cache);
        }
        if command.operation == Operation::NoOp {
            return;
        }

        let (input_format, output_format) = Self::formats(job);
        let Some(scores) = self.read_scores(job, input_format) else {
            return;
        };
        self.stats.elements += scores.len() as u64;

        match command.operation {
            Operation::Accumulate => {
                let Some(acc) = self.accumulators.get_mut(command.slot.index()) else {
                    return;
                };
                if command.flags.contains(CommandFlags::ACQUIRE_SLOT) {
                    *acc = Accumulator::EMPTY;
                }
                scores.iter().for_each(|&x| acc.push(x));
            }
            Operation::Divide => {
                let Some(acc) = self.accumulators.get(command.slot.index()).copied() else {
                    return;
                };
                self.write_outputs(job, &acc, &scores, output_format);
            }
            Operation::Full => {
                let mut acc = Accumulator::EMPTY;
                scores.iter().for_each(|&x| acc.push(x));
                self.write_outputs(job, &acc, &scores, output_format);
            }
            Operation::NoOp => {}
        }
    }

    fn read_scores(&mut self, job: &QueuedJob, format: ElementFormat) -> Option<Vec<f32>> {
        let width = format.width_bytes();
        let Staged {
            in_addr, tot_len, ..
        } = job.regs;
        if !self.memory.is_mapped(in_addr, tot_len) {
            self.violation(Violation::Unmapped {
                job: job.id,
                addr: in_addr,
                bytes: tot_len,
            });
            return None;
        }
        (0..tot_len / width)
            .map(|i| {
                self.memory
                    .read_element(in_addr + i * width, width)
                    .map(|raw| element::score_value(raw, format))
            })
            .collect()
    }

    fn write_outputs(
        &mut self,
        job: &QueuedJob,
        acc: &Accumulator,
        scores: &[f32],
        format: ElementFormat,
    ) {
        let width = format.width_bytes();
        let addr = job.regs.out_addr;
        let bytes = scores.len() as u32 * width;
        if !self.memory.is_mapped(addr, bytes) {
            self.violation(Violation::Unmapped {
                job: job.id,
                addr,
                bytes,
            });
            return;
        }
        for (i, &x) in scores.iter().enumerate() {
            let raw = element::encode_probability(acc.normalize(x) as f64, format);
            self.memory.write_element(addr + i as u32 * width, width, raw);
        }
    }
}

impl RegisterBus for SoftexModel {
    fn write(&mut self, reg: Register, value: u32) {
        if self.config.record_trace {
            self.trace.push(BusAccess::Write(reg, value));
        }
        match reg {
            Register::Trigger => self.accept(),
            Register::SoftClear => self.soft_clear(),
            Register::InAddr => self.staged.in_addr = value,
            Register::OutAddr => self.staged.out_addr = value,
            Register::TotLen => self.staged.tot_len = value,
            Register::Commands => self.staged.commands = value,
            Register::CacheBaseAddr => self.staged.cache = value,
            Register::CastCtrl => self.staged.cast = value,
            Register::Acquire | Register::Finished | Register::Status | Register::RunningJob => {
                log::warn!("write of {:#x} to read-only {:?} ignored", value, reg);
            }
        }
    }

    fn read(&mut self, reg: Register) -> u32 {
        let value = match reg {
            Register::Acquire => self.acquire(),
            Register::Finished => {
                self.step();
                self.observed = self.completed;
                self.finished
            }
            Register::Status => self.queue.len() as u32,
            Register::RunningJob => self.queue.front().map_or(IDLE, |job| job.id),
            Register::InAddr => self.staged.in_addr,
            Register::OutAddr => self.staged.out_addr,
            Register::TotLen => self.staged.tot_len,
            Register::Commands => self.staged.commands,
            Register::CacheBaseAddr => self.staged.cache,
            Register::CastCtrl => self.staged.cast,
            Register::Trigger | Register::SoftClear => 0,
        };
        if self.config.record_trace {
            self.trace.push(BusAccess::Read(reg, value));
        }
        value
    }
}

/// Wait backend that lets the model run until the next completion.
#[derive(Debug, Default)]
pub struct ModelEvents;

impl WaitEvent<SoftexModel> for ModelEvents {
    fn wait(&mut self, bus: &mut SoftexModel) {
        bus.wait_event();
    }
}
