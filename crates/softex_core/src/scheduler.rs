//! Pipelined scheduling of many independent softmax computations.
//!
//! Vectors are processed in groups of `depth` members, one slot each. Within
//! a group, every chunk round issues that chunk for all members back to back
//! and only then waits one completion per issued job, so each acquire
//! overlaps the execution of the jobs queued before it. All members finish
//! accumulation (and their slots settle) before any member starts dividing.
//! A final group shorter than `depth` just runs shorter inner loops.

use crate::chunk::{ChunkPlan, SplitPolicy, Vector};
use crate::config::DriverConfig;
use crate::dispatcher::Dispatcher;
use crate::regs::RegisterBus;
use crate::slot::{Accumulating, Finalizing, Settled, VectorTag};
use crate::static_vec::StaticVec;
use crate::wait::WaitEvent;
use crate::{MAX_SLOTS, SoftexError};

/// One softmax to compute: read `input`, write normalized `output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Softmax {
    input: Vector,
    output: Vector,
}

impl Softmax {
    pub fn new(input: Vector, output: Vector) -> Result<Self, SoftexError> {
        if input.is_empty() {
            return Err(SoftexError::EmptyVector);
        }
        if input.len() != output.len() {
            return Err(SoftexError::OutputLengthMismatch {
                input: input.len(),
                output: output.len(),
            });
        }
        Ok(Self { input, output })
    }

    pub fn input(&self) -> &Vector {
        &self.input
    }

    pub fn output(&self) -> &Vector {
        &self.output
    }
}

/// What a run issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub vectors: usize,
    pub groups: usize,
    pub jobs: u64,
    pub waits: u64,
}

struct Member<'a> {
    task: &'a Softmax,
    plan: ChunkPlan,
}

/// Issues softmax work through a [`Dispatcher`].
pub struct Scheduler {
    config: DriverConfig,
}

impl Scheduler {
    pub fn new(config: DriverConfig) -> Result<Self, SoftexError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Runs the two-phase protocol over `work`.
    ///
    /// With a cache address, a multi-vector run first issues a dedicated
    /// configuration job; a single-vector run folds the address into its
    /// first accumulation job instead.
    pub fn run<B: RegisterBus, W: WaitEvent<B>>(
        &self,
        dispatcher: &mut Dispatcher<B, W>,
        work: &[Softmax],
        cache: Option<u32>,
    ) -> Result<RunSummary, SoftexError> {
        let before = dispatcher.stats();
        let mut folded_cache = None;

        match cache {
            Some(addr) if work.len() == 1 => folded_cache = Some(dispatcher.claim_cache(addr)?),
            Some(addr) => dispatcher.configure_cache(addr)?,
            None => {}
        }

        let mut groups = 0;
        for (index, group) in work.chunks(self.config.depth).enumerate() {
            let first_tag = (index * self.config.depth) as VectorTag;
            let mut members: StaticVec<Member<'_>, MAX_SLOTS> = StaticVec::new();
            for task in group {
                let _ = members.push(Member {
                    task,
                    plan: task.input.chunks(self.config.split),
                });
            }

            let mut leases: StaticVec<Option<Accumulating>, MAX_SLOTS> = StaticVec::new();
            for offset in 0..members.len() {
                let mut lease = dispatcher.reserve(first_tag + offset as VectorTag)?;
                if let Some(region) = folded_cache.take() {
                    lease.attach_cache(region);
                }
                let _ = leases.push(Some(lease));
            }

            let settled = Self::accumulate_group(dispatcher, &members, &mut leases);
            Self::divide_group(dispatcher, &members, settled);
            groups += 1;
        }

        dispatcher.end_run();
        let after = dispatcher.stats();
        let summary = RunSummary {
            vectors: work.len(),
            groups,
            jobs: after.jobs - before.jobs,
            waits: after.waits - before.waits,
        };
        log::info!(
            "run finished: {} vectors in {} groups, {} jobs",
            summary.vectors,
            summary.groups,
            summary.jobs
        );
        Ok(summary)
    }

    fn accumulate_group<B: RegisterBus, W: WaitEvent<B>>(
        dispatcher: &mut Dispatcher<B, W>,
        members: &[Member<'_>],
        leases: &mut [Option<Accumulating>],
    ) -> StaticVec<Option<Settled>, MAX_SLOTS> {
        let mut finalizing: StaticVec<Option<Finalizing>, MAX_SLOTS> = StaticVec::new();
        for _ in members {
            let _ = finalizing.push(None);
        }
        let rounds = members.iter().map(|m| m.plan.len()).max().unwrap_or(0);

        for round in 0..rounds {
            let mut issued = 0;
            let slots = leases.iter_mut().zip(finalizing.iter_mut());
            for (member, (lease, finalized)) in members.iter().zip(slots) {
                let Some(chunk) = member.plan.get(round) else {
                    continue;
                };
                let span = member.task.input.span(chunk);

                if member.plan.is_last(round) {
                    if let Some(lease) = lease.take() {
                        *finalized = Some(dispatcher.accumulate_last(lease, span));
                    }
                } else if let Some(lease) = lease.as_mut() {
                    dispatcher.accumulate(lease, span);
                }
                issued += 1;
            }

            log::debug!("accumulation round {}: {} jobs issued", round, issued);
            for _ in 0..issued {
                dispatcher.await_completion();
            }
        }

        // Phase barrier: every LAST accumulation of the group has completed.
        let mut settled = StaticVec::new();
        for lease in finalizing.iter_mut() {
            let _ = settled.push(lease.take().map(|l| dispatcher.settle_blocking(l)));
        }
        log::debug!("phase barrier: {} slots settled", settled.len());
        settled
    }

    fn divide_group<B: RegisterBus, W: WaitEvent<B>>(
        dispatcher: &mut Dispatcher<B, W>,
        members: &[Member<'_>],
        mut settled: StaticVec<Option<Settled>, MAX_SLOTS>,
    ) {
        let rounds = members.iter().map(|m| m.plan.len()).max().unwrap_or(0);

        for round in 0..rounds {
            let mut issued = 0;
            for (member, slot) in members.iter().zip(settled.iter_mut()) {
                let Some(chunk) = member.plan.get(round) else {
                    continue;
                };
                let input = member.task.input.span(chunk);
                let output = member.task.output.span(chunk);

                if member.plan.is_last(round) {
                    if let Some(lease) = slot.take() {
                        dispatcher.divide_last(lease, input, output);
                    }
                } else if let Some(lease) = slot.as_ref() {
                    dispatcher.divide(lease, input, output);
                }
                issued += 1;
            }

            log::debug!("normalization round {}: {} jobs issued", round, issued);
            for _ in 0..issued {
                dispatcher.await_completion();
            }
        }
    }

    /// Issues one full softmax job per vector, `depth` jobs at a time.
    pub fn run_single_shot<B: RegisterBus, W: WaitEvent<B>>(
        &self,
        dispatcher: &mut Dispatcher<B, W>,
        work: &[Softmax],
    ) -> Result<RunSummary, SoftexError> {
        let before = dispatcher.stats();
        let mut groups = 0;

        for group in work.chunks(self.config.depth) {
            for task in group {
                let whole = task.input.chunks(SplitPolicy::Never);
                if let Some(chunk) = whole.get(0) {
                    dispatcher.single_shot(task.input.span(chunk), task.output.span(chunk));
                }
            }
            for _ in group {
                dispatcher.await_completion();
            }
            groups += 1;
        }

        let after = dispatcher.stats();
        Ok(RunSummary {
            vectors: work.len(),
            groups,
            jobs: after.jobs - before.jobs,
            waits: after.waits - before.waits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandFlags, Operation, SlotId};
    use crate::format::ElementFormat;
    use crate::testing::{RecordedJob, RecordingBus, RecordingEvents, TraceEvent, check_protocol};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn session(config: &DriverConfig) -> (Scheduler, Dispatcher<RecordingBus, RecordingEvents>) {
        let dispatcher = Dispatcher::new(RecordingBus::default(), RecordingEvents, config).unwrap();
        (Scheduler::new(*config).unwrap(), dispatcher)
    }

    fn softmax(addr: u32, out: u32, len: u32) -> Softmax {
        let fmt = ElementFormat::Bf16;
        Softmax::new(
            Vector::new(addr, len, fmt).unwrap(),
            Vector::new(out, len, fmt).unwrap(),
        )
        .unwrap()
    }

    fn job(event: &TraceEvent) -> &RecordedJob {
        match event {
            TraceEvent::Job(job) => job,
            TraceEvent::Wait => panic!("expected a job, found a wait"),
        }
    }

    #[test]
    fn rejects_empty_and_mismatched_vectors() {
        let fmt = ElementFormat::Bf16;
        let empty = Vector::new(0x1000, 0, fmt).unwrap();
        let four = Vector::new(0x1000, 4, fmt).unwrap();
        let five = Vector::new(0x2000, 5, fmt).unwrap();

        assert_eq!(Softmax::new(empty, empty), Err(SoftexError::EmptyVector));
        assert_eq!(
            Softmax::new(four, five),
            Err(SoftexError::OutputLengthMismatch {
                input: 4,
                output: 5
            })
        );
    }

    #[test]
    fn single_vector_depth_one() {
        let config = DriverConfig {
            slot_count: 1,
            depth: 1,
            ..DriverConfig::default()
        };
        let (scheduler, mut d) = session(&config);
        let work = [softmax(0x1000, 0x1C01_0000, 128)];

        let summary = scheduler.run(&mut d, &work, None).unwrap();
        assert_eq!(summary.jobs, 4);
        assert_eq!(summary.waits, 4);
        assert_eq!(summary.groups, 1);

        let events = d.bus().events();
        assert_eq!(events.len(), 8);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(matches!(event, TraceEvent::Wait), i % 2 == 1);
        }

        let jobs = d.bus().jobs();
        let expected = [
            (Operation::Accumulate, CommandFlags::ACQUIRE_SLOT, 0x1000, None),
            (Operation::Accumulate, CommandFlags::LAST, 0x1080, None),
            (Operation::Divide, CommandFlags::empty(), 0x1000, Some(0x1C01_0000)),
            (Operation::Divide, CommandFlags::LAST, 0x1080, Some(0x1C01_0080)),
        ];
        for (job, (op, flags, input, output)) in jobs.iter().zip(expected) {
            assert_eq!(job.command.operation, op);
            assert_eq!(job.command.flags, flags);
            assert_eq!(job.command.slot, SlotId(0));
            assert_eq!(job.input, Some(input));
            assert_eq!(job.bytes, Some(128));
            assert_eq!(job.output, output);
        }
        assert_eq!(d.slots().in_use(), 0);
    }

    #[test]
    fn groups_finish_before_next_group_starts() {
        let (scheduler, mut d) = session(&DriverConfig::default());
        let work: Vec<Softmax> = (0..4)
            .map(|i| softmax(0x1000 + i * 0x100, 0x8000 + i * 0x100, 16))
            .collect();

        let summary = scheduler.run(&mut d, &work, None).unwrap();
        assert_eq!(summary.groups, 2);
        assert_eq!(summary.jobs, 16);

        let events = d.bus().events();
        check_protocol(&events, 2).unwrap();

        // Each group is acc, acc, W, W, acc, acc, W, W, div, div, ...
        let per_group = 16;
        assert_eq!(events.len(), 2 * per_group);
        for (g, group) in events.chunks(per_group).enumerate() {
            let ops: Vec<Operation> = group
                .iter()
                .filter_map(|e| match e {
                    TraceEvent::Job(j) => Some(j.command.operation),
                    TraceEvent::Wait => None,
                })
                .collect();
            assert_eq!(&ops[..4], &[Operation::Accumulate; 4]);
            assert_eq!(&ops[4..], &[Operation::Divide; 4]);

            let first = job(&group[0]);
            assert_eq!(first.input, Some(0x1000 + g as u32 * 0x200));
            assert_eq!(first.command.slot, SlotId(0));
            assert_eq!(job(&group[1]).command.slot, SlotId(1));
            assert!(matches!(group[2], TraceEvent::Wait));
        }
    }

    #[test]
    fn mixed_chunk_counts_keep_slots_matched() {
        let (scheduler, mut d) = session(&DriverConfig::default());
        let work = [softmax(0x1000, 0x8000, 1), softmax(0x2000, 0x9000, 8)];

        scheduler.run(&mut d, &work, None).unwrap();
        let events = d.bus().events();
        check_protocol(&events, 2).unwrap();

        for job in d.bus().jobs() {
            if job.command.operation != Operation::Divide {
                continue;
            }
            let (input, output) = match job.command.slot {
                SlotId(0) => (0x1000, 0x8000),
                _ => (0x2000, 0x9000),
            };
            let offset = job.input.unwrap() - input;
            assert_eq!(job.output, Some(output + offset));
        }
    }

    #[test]
    fn single_vector_folds_cache_into_first_job() {
        let (scheduler, mut d) = session(&DriverConfig::default());
        let work = [softmax(0x1000, 0x8000, 64)];

        scheduler.run(&mut d, &work, Some(0x1080)).unwrap();
        let jobs = d.bus().jobs();
        assert_eq!(jobs.len(), 4);
        assert!(jobs[0].command.flags.contains(CommandFlags::SET_CACHE_ADDR));
        assert_eq!(jobs[0].cache, Some(0x1080));
        assert!(jobs[1..].iter().all(|j| j.cache.is_none()));
    }

    #[test]
    fn multi_vector_run_configures_cache_first() {
        let (scheduler, mut d) = session(&DriverConfig::default());
        let work = [softmax(0x1000, 0x8000, 8), softmax(0x2000, 0x9000, 8)];

        let summary = scheduler.run(&mut d, &work, Some(0x4000)).unwrap();
        assert_eq!(summary.jobs, 8);
        assert_eq!(d.stats().configuration_jobs, 1);

        let events = d.bus().events();
        let config = job(&events[0]);
        assert_eq!(config.command.operation, Operation::NoOp);
        assert_eq!(config.cache, Some(0x4000));
        // No wait for the configuration job.
        assert!(matches!(events[1], TraceEvent::Job(_)));
        check_protocol(&events, 2).unwrap();

        // The run ended, so the next run may configure again.
        scheduler.run(&mut d, &work, Some(0x5000)).unwrap();
    }

    #[test]
    fn single_shot_waits_per_group() {
        let (scheduler, mut d) = session(&DriverConfig::default());
        let work: Vec<Softmax> = (0..3)
            .map(|i| softmax(0x1000 + i * 0x100, 0x8000 + i * 0x100, 32))
            .collect();

        let summary = scheduler.run_single_shot(&mut d, &work).unwrap();
        assert_eq!(summary.jobs, 3);
        assert_eq!(summary.groups, 2);

        let events = d.bus().events();
        let shape: Vec<bool> = events.iter().map(|e| matches!(e, TraceEvent::Wait)).collect();
        assert_eq!(shape, vec![false, false, true, true, false, true]);
        assert!(
            d.bus()
                .jobs()
                .iter()
                .all(|j| j.command.operation == Operation::Full && j.bytes == Some(64))
        );
    }

    #[test]
    fn random_workloads_follow_slot_rules() {
        let mut rng = StdRng::seed_from_u64(0x50f7);

        for _ in 0..200 {
            let slot_count = rng.gen_range(1..=8);
            let depth = rng.gen_range(1..=slot_count);
            let split = match rng.gen_range(0..3) {
                0 => SplitPolicy::Never,
                1 => SplitPolicy::Always,
                _ => SplitPolicy::Above(rng.gen_range(0..256)),
            };
            let config = DriverConfig {
                slot_count,
                depth,
                split,
                ..DriverConfig::default()
            };
            let (scheduler, mut d) = session(&config);

            let count = rng.gen_range(1..12u32);
            let work: Vec<Softmax> = (0..count)
                .map(|i| softmax(0x1_0000 * (i + 1), 0x100_0000 + 0x1_0000 * i, rng.gen_range(1..300)))
                .collect();

            let summary = scheduler.run(&mut d, &work, None).unwrap();
            let events = d.bus().events();
            check_protocol(&events, slot_count).unwrap();
            assert_eq!(summary.jobs, summary.waits);
            assert_eq!(d.outstanding(), 0);

            // Chunks cover each vector exactly, in address order.
            for task in &work {
                let input = task.input();
                for op in [Operation::Accumulate, Operation::Divide] {
                    let mut next = input.addr();
                    for job in d.bus().jobs() {
                        if job.command.operation != op || job.input.is_none_or(|a| a < input.addr())
                        {
                            continue;
                        }
                        let addr = job.input.unwrap_or(0);
                        if addr >= input.addr() + input.byte_len() {
                            continue;
                        }
                        assert_eq!(addr, next);
                        next += job.bytes.unwrap_or(0);
                    }
                    assert_eq!(next, input.addr() + input.byte_len());
                }
            }
        }
    }
}
