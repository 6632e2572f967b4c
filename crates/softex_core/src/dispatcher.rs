//! Acquire, configure and trigger state machine.
//!
//! Every job follows the same handshake: spin on ACQUIRE until the issue
//! queue has a free entry, stage the job in the register block, and pulse
//! TRIGGER. The hardware then runs asynchronously and raises one completion
//! event per data job, in issue order. The dispatcher counts issued and
//! completed jobs so that slot leases can be settled only once the LAST
//! accumulation job of their vector is known to be done.

use crate::chunk::Span;
use crate::command::{Command, CommandFlags, Operation, SlotId};
use crate::config::DriverConfig;
use crate::format::CastConfig;
use crate::regs::{Register, RegisterBus};
use crate::slot::{Accumulating, CacheRegion, Finalizing, JobSeq, Settled, SlotManager, VectorTag};
use crate::wait::WaitEvent;
use crate::SoftexError;

/// One accelerator-issuable unit of work.
///
/// Jobs are only built inside this crate, from slot leases, so a job that
/// violates phase ordering cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    command: Command,
    input: Option<Span>,
    output: Option<u32>,
    cache: Option<u32>,
    cast: Option<CastConfig>,
}

impl Job {
    fn data(
        operation: Operation,
        flags: CommandFlags,
        slot: SlotId,
        input: Span,
        output: Option<u32>,
        cast: Option<CastConfig>,
    ) -> Self {
        let int_input = cast.is_some_and(|c| c.input().is_int());
        let int_output = output.is_some() && cast.is_some_and(|c| c.output().is_int());
        let flags = flags
            .with(CommandFlags::INT_INPUT, int_input)
            .with(CommandFlags::INT_OUTPUT, int_output);

        Self {
            command: Command::new(operation, flags, slot),
            input: Some(input),
            output,
            cache: None,
            cast: if int_input || int_output { cast } else { None },
        }
    }

    fn with_cache(mut self, region: Option<CacheRegion>) -> Self {
        if let Some(region) = region {
            self.command.flags |= CommandFlags::SET_CACHE_ADDR;
            self.cache = Some(region.addr());
        }
        self
    }

    fn configuration(region: CacheRegion) -> Self {
        Self {
            command: Command::new(Operation::NoOp, CommandFlags::SET_CACHE_ADDR, SlotId(0)),
            input: None,
            output: None,
            cache: Some(region.addr()),
            cast: None,
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn input(&self) -> Option<Span> {
        self.input
    }

    pub fn output(&self) -> Option<u32> {
        self.output
    }

    pub fn cache(&self) -> Option<u32> {
        self.cache
    }

    pub fn cast(&self) -> Option<CastConfig> {
        self.cast
    }

    /// Configuration-only jobs complete without raising an event.
    pub fn raises_event(&self) -> bool {
        self.command.operation != Operation::NoOp
    }
}

/// A free issue queue entry, obtained from [`Dispatcher::acquire`] and
/// consumed by [`Dispatcher::submit`].
#[derive(Debug)]
pub struct IssueTicket {
    id: u32,
}

impl IssueTicket {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Counters accumulated over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub jobs: u64,
    pub configuration_jobs: u64,
    pub waits: u64,
    pub acquire_polls: u64,
}

/// Issues jobs to the accelerator and tracks their completion.
pub struct Dispatcher<B: RegisterBus, W: WaitEvent<B>> {
    bus: B,
    waiter: W,
    slots: SlotManager,
    cast: Option<CastConfig>,
    issued: JobSeq,
    completed: JobSeq,
    stats: DispatchStats,
}

impl<B: RegisterBus, W: WaitEvent<B>> Dispatcher<B, W> {
    /// Opens a session: validates `config` and soft-clears the hardware.
    ///
    /// Taking the bus by value makes the soft clear the only one of the
    /// session, issued before any job.
    pub fn new(mut bus: B, waiter: W, config: &DriverConfig) -> Result<Self, SoftexError> {
        config.validate()?;
        let slots = SlotManager::new(config.slot_count)?;

        bus.soft_clear();
        log::debug!(
            "session opened: {} slots, depth {}, split {:?}",
            config.slot_count,
            config.depth,
            config.split
        );

        Ok(Self {
            bus,
            waiter,
            slots,
            cast: config.cast(),
            issued: 0,
            completed: 0,
            stats: DispatchStats::default(),
        })
    }

    /// Spins on ACQUIRE until the hardware reports a free queue entry.
    pub fn acquire(&mut self) -> IssueTicket {
        let mut polls: u64 = 0;
        let id = loop {
            let id = self.bus.try_acquire();
            if id >= 0 {
                break id as u32;
            }
            polls += 1;
            core::hint::spin_loop();
        };

        self.stats.acquire_polls += polls;
        log::trace!("acquired job {} after {} polls", id, polls);
        IssueTicket { id }
    }

    /// Stages `job` in the register block and triggers it.
    ///
    /// Registers are written in the order IN_ADDR, OUT_ADDR, TOT_LEN,
    /// CACHE_BASE_ADDR, CAST_CTRL, COMMANDS, skipping those the job does
    /// not use. Returns the job's completion sequence number, or `None` for
    /// a configuration job.
    pub fn submit(&mut self, ticket: IssueTicket, job: Job) -> Option<JobSeq> {
        if let Some(input) = job.input {
            self.bus.write(Register::InAddr, input.addr);
        }
        if let Some(output) = job.output {
            self.bus.write(Register::OutAddr, output);
        }
        if let Some(input) = job.input {
            self.bus.write(Register::TotLen, input.bytes);
        }
        if let Some(cache) = job.cache {
            self.bus.write(Register::CacheBaseAddr, cache);
        }
        if let Some(cast) = job.cast {
            self.bus.write(Register::CastCtrl, cast.encode());
        }
        let word = job.command.encode();
        self.bus.write(Register::Commands, word);
        self.bus.trigger();

        log::debug!(
            "job {}: {:?} {} cmd={:#010x} in={:?} out={:?}",
            ticket.id,
            job.command.operation,
            job.command.slot,
            word,
            job.input,
            job.output
        );

        if job.raises_event() {
            self.stats.jobs += 1;
            self.issued += 1;
            Some(self.issued)
        } else {
            self.stats.configuration_jobs += 1;
            None
        }
    }

    /// Blocks until the oldest outstanding job completes.
    pub fn await_completion(&mut self) {
        if self.outstanding() == 0 {
            log::warn!("completion awaited with no job outstanding");
            return;
        }
        self.waiter.wait(&mut self.bus);
        self.completed += 1;
        self.stats.waits += 1;
    }

    /// Waits for every outstanding job.
    pub fn drain(&mut self) {
        while self.outstanding() > 0 {
            self.await_completion();
        }
    }

    /// Jobs submitted whose completion has not been observed.
    pub fn outstanding(&self) -> u64 {
        self.issued - self.completed
    }

    pub fn completed(&self) -> JobSeq {
        self.completed
    }

    /// Reserves a slot for the accumulation of `vector`.
    pub fn reserve(&mut self, vector: VectorTag) -> Result<Accumulating, SoftexError> {
        self.slots.reserve(vector)
    }

    /// Issues a non-final accumulation chunk. The slot's first chunk
    /// carries ACQUIRE_SLOT.
    pub fn accumulate(&mut self, lease: &mut Accumulating, input: Span) -> JobSeq {
        let job = self.accumulation_job(lease, input, CommandFlags::empty());
        let ticket = self.acquire();
        self.submit(ticket, job).unwrap_or(self.issued)
    }

    /// Issues the LAST accumulation chunk and hands the slot over to the
    /// finalizing state.
    pub fn accumulate_last(&mut self, mut lease: Accumulating, input: Span) -> Finalizing {
        let job = self.accumulation_job(&mut lease, input, CommandFlags::LAST);
        let ticket = self.acquire();
        let seq = self.submit(ticket, job).unwrap_or(self.issued);
        self.slots.finalize(lease, seq)
    }

    fn accumulation_job(&self, lease: &mut Accumulating, input: Span, flags: CommandFlags) -> Job {
        let (fresh, cache) = lease.take_first();
        let flags = flags.with(CommandFlags::ACQUIRE_SLOT, fresh);
        Job::data(Operation::Accumulate, flags, lease.slot(), input, None, self.cast).with_cache(cache)
    }

    /// Promotes a finalizing slot if its LAST accumulation job has
    /// completed, handing the lease back otherwise.
    pub fn settle(&mut self, lease: Finalizing) -> Result<Settled, Finalizing> {
        self.slots.settle(lease, self.completed)
    }

    /// Waits until the LAST accumulation job of `lease` completes, then
    /// settles it.
    pub fn settle_blocking(&mut self, mut lease: Finalizing) -> Settled {
        loop {
            match self.settle(lease) {
                Ok(settled) => return settled,
                Err(pending) => {
                    lease = pending;
                    self.await_completion();
                }
            }
        }
    }

    /// Issues a non-final divide chunk on a settled slot.
    pub fn divide(&mut self, lease: &Settled, input: Span, output: Span) -> JobSeq {
        let job = Job::data(
            Operation::Divide,
            CommandFlags::empty(),
            lease.slot(),
            input,
            Some(output.addr),
            self.cast,
        );
        let ticket = self.acquire();
        self.submit(ticket, job).unwrap_or(self.issued)
    }

    /// Issues the LAST divide chunk and returns the slot to the pool.
    pub fn divide_last(&mut self, lease: Settled, input: Span, output: Span) -> JobSeq {
        let job = Job::data(
            Operation::Divide,
            CommandFlags::LAST,
            lease.slot(),
            input,
            Some(output.addr),
            self.cast,
        );
        let ticket = self.acquire();
        let seq = self.submit(ticket, job).unwrap_or(self.issued);
        self.slots.release(lease);
        seq
    }

    /// Issues a job that runs both phases on `input` in one go, without
    /// any slot bookkeeping.
    pub fn single_shot(&mut self, input: Span, output: Span) -> JobSeq {
        let job = Job::data(
            Operation::Full,
            CommandFlags::empty(),
            SlotId(0),
            input,
            Some(output.addr),
            self.cast,
        );
        let ticket = self.acquire();
        self.submit(ticket, job).unwrap_or(self.issued)
    }

    /// Claims the run's cache address for folding into a first
    /// accumulation job.
    pub fn claim_cache(&mut self, addr: u32) -> Result<CacheRegion, SoftexError> {
        self.slots.claim_cache(addr)
    }

    /// Issues a dedicated configuration job latching the run's cache
    /// address.
    pub fn configure_cache(&mut self, addr: u32) -> Result<(), SoftexError> {
        let region = self.slots.claim_cache(addr)?;
        let ticket = self.acquire();
        self.submit(ticket, Job::configuration(region));
        Ok(())
    }

    /// Ends the current pipelined run.
    pub fn end_run(&mut self) {
        self.slots.end_run();
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[cfg(test)]
    pub(crate) fn bus_mut_for_test(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Reads STATUS, FINISHED and RUNNING_JOB for diagnostics.
    pub fn diagnostics(&mut self) -> Diagnostics {
        let diag = Diagnostics {
            status: self.bus.status(),
            finished: self.bus.finished(),
            running_job: self.bus.running_job(),
        };
        log::debug!("{:?}", diag);
        diag
    }

    /// Waits for every outstanding job, then runs the platform's shutdown
    /// primitive.
    pub fn shutdown<F: FnOnce(&mut B)>(mut self, hook: F) -> (B, W) {
        self.drain();
        log::info!(
            "session closed: {} jobs, {} waits, {} acquire polls",
            self.stats.jobs,
            self.stats.waits,
            self.stats.acquire_polls
        );
        hook(&mut self.bus);
        (self.bus, self.waiter)
    }
}

/// Snapshot of the status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    pub status: u32,
    pub finished: u32,
    pub running_job: u32,
}
