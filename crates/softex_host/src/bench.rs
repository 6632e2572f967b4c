//! Runs a workload through the driver and the functional model.
//!
//! Lays the score vectors out in model memory the way the cluster program
//! does (scores in L2 followed by the cache area, outputs in L1), runs the
//! scheduler over them and compares every output element with the
//! double-precision reference.

use crate::arena::{Memory, Region};
use crate::element;
use crate::golden;
use crate::model::{BusAccess, ModelConfig, ModelEvents, ModelStats, SoftexModel, Violation};
use crate::stats::ErrorStats;
use anyhow::{Result, bail};
use softex_common::mmio::L1_OUTPUT_BASE;
use softex_core::chunk::Vector;
use softex_core::config::DriverConfig;
use softex_core::dispatcher::{DispatchStats, Dispatcher};
use softex_core::format::ElementFormat;
use softex_core::scheduler::{RunSummary, Scheduler, Softmax};
use softex_core::wait::{Spin, WaitEvent};
use softex_io::header::ScoreSet;
use std::time::{Duration, Instant};

/// Base of the model's L2 region holding the score vectors.
pub const L2_BASE: u32 = 0x1000_0000;

/// Cache bytes reserved per slot after the scores.
const CACHE_BYTES_PER_SLOT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Two-phase jobs, pipelined across slots.
    Pipelined,
    /// One full-softmax job per vector.
    SingleShot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Model-driven completion events.
    Event,
    /// Polling of the FINISHED register.
    Spin,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub driver: DriverConfig,
    pub queue_depth: usize,
    pub mode: Mode,
    pub backend: Backend,
    pub cache: bool,
    pub record_trace: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            queue_depth: 2,
            mode: Mode::Pipelined,
            backend: Backend::Event,
            cache: false,
            record_trace: false,
        }
    }
}

/// Raw score vectors of equal length.
#[derive(Debug, Clone)]
pub struct Workload {
    pub length: u32,
    pub vectors: Vec<Vec<u32>>,
}

impl Workload {
    pub fn from_scores(set: &ScoreSet, format: ElementFormat) -> Result<Self> {
        if set.fmt_width != format.width_bytes() {
            bail!(
                "header stores {}-byte elements but {:?} needs {}",
                set.fmt_width,
                format,
                format.width_bytes()
            );
        }
        Ok(Self {
            length: set.length,
            vectors: set.iter().map(<[u32]>::to_vec).collect(),
        })
    }
}

pub struct Outcome {
    pub summary: RunSummary,
    pub dispatch: DispatchStats,
    pub model: ModelStats,
    pub outputs: Vec<Vec<u32>>,
    pub denominators: Vec<f64>,
    pub errors: ErrorStats,
    pub violations: Vec<Violation>,
    pub trace: Vec<BusAccess>,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn passed(&self, tolerance: u32) -> bool {
        self.violations.is_empty() && self.errors.within(tolerance)
    }
}

struct Layout {
    tasks: Vec<Softmax>,
    cache: Option<u32>,
}

fn build_memory(workload: &Workload, options: &RunOptions) -> Result<(Memory, Layout)> {
    let input_format = options.driver.input_format;
    let output_format = options.driver.output_format;
    let count = workload.vectors.len() as u32;
    let in_bytes = workload.length * input_format.width_bytes();
    let out_bytes = workload.length * output_format.width_bytes();
    let cache_bytes = CACHE_BYTES_PER_SLOT * options.driver.slot_count as u32;

    let mut l2 = Region::new("l2", L2_BASE, in_bytes * count + cache_bytes + 4);
    let mut l1 = Region::new("l1", L1_OUTPUT_BASE as u32, out_bytes * count);
    let mut memory = Memory::new();

    let mut tasks = Vec::with_capacity(workload.vectors.len());
    let mut inputs = Vec::with_capacity(workload.vectors.len());
    for raw in &workload.vectors {
        if raw.len() as u32 != workload.length {
            bail!("vector of {} elements in a workload of length {}", raw.len(), workload.length);
        }
        let in_addr = l2.alloc(in_bytes, 1)?;
        let out_addr = l1.alloc(out_bytes, 1)?;
        let input = Vector::new(in_addr, workload.length, input_format)?;
        let output = Vector::new(out_addr, workload.length, output_format)?;
        tasks.push(Softmax::new(input, output)?);
        inputs.push(in_addr);
    }
    // The cache area directly follows the scores.
    let cache = if options.cache {
        Some(l2.alloc(cache_bytes, 4)?)
    } else {
        None
    };

    memory.add_region(l2)?;
    memory.add_region(l1)?;
    for (addr, raw) in inputs.iter().zip(&workload.vectors) {
        memory.load(*addr, input_format.width_bytes(), raw)?;
    }
    Ok((memory, Layout { tasks, cache }))
}

fn drive<W: WaitEvent<SoftexModel>>(
    model: SoftexModel,
    waiter: W,
    options: &RunOptions,
    layout: &Layout,
) -> Result<(RunSummary, DispatchStats, SoftexModel)> {
    let mut dispatcher = Dispatcher::new(model, waiter, &options.driver)?;
    let scheduler = Scheduler::new(options.driver)?;

    let summary = match options.mode {
        Mode::Pipelined => scheduler.run(&mut dispatcher, &layout.tasks, layout.cache)?,
        Mode::SingleShot => scheduler.run_single_shot(&mut dispatcher, &layout.tasks)?,
    };
    let diag = dispatcher.diagnostics();
    log::debug!("after run: {:?}", diag);

    let dispatch = dispatcher.stats();
    let (model, _) = dispatcher.shutdown(|model| model.halt());
    if model.pending() != 0 || !model.is_halted() {
        bail!("model still holds {} jobs after shutdown", model.pending());
    }
    log::debug!("model halted, cache at {:?}", model.cache_addr());
    Ok((summary, dispatch, model))
}

/// Runs `workload` and checks it against the reference.
pub fn execute(workload: &Workload, options: &RunOptions) -> Result<Outcome> {
    let (memory, layout) = build_memory(workload, options)?;
    let model = SoftexModel::new(
        ModelConfig {
            slot_count: options.driver.slot_count,
            queue_depth: options.queue_depth,
            record_trace: options.record_trace,
        },
        memory,
    );

    let start = Instant::now();
    let (summary, dispatch, model) = match options.backend {
        Backend::Event => drive(model, ModelEvents, options, &layout)?,
        Backend::Spin => drive(model, Spin::default(), options, &layout)?,
    };
    let elapsed = start.elapsed();

    let input_format = options.driver.input_format;
    let output_format = options.driver.output_format;
    let mut errors = ErrorStats::new();
    let mut outputs = Vec::with_capacity(layout.tasks.len());
    let mut denominators = Vec::with_capacity(layout.tasks.len());

    for (task, raw) in layout.tasks.iter().zip(&workload.vectors) {
        let out = task.output();
        let produced = model
            .memory()
            .dump(out.addr(), output_format.width_bytes(), out.len())?;

        let scores: Vec<f64> = raw
            .iter()
            .map(|&r| element::score_value(r, input_format) as f64)
            .collect();
        let (reference, denominator) = golden::softmax(&scores);

        for (&got, &want) in produced.iter().zip(&reference) {
            let expected = element::encode_probability(want, output_format);
            let value = element::probability_value(got, output_format);
            errors.update((value - want).abs(), element::ulp_distance(got, expected));
        }
        outputs.push(produced);
        denominators.push(denominator);
    }

    Ok(Outcome {
        summary,
        dispatch,
        model: model.stats(),
        outputs,
        denominators,
        errors,
        violations: model.violations().to_vec(),
        trace: model.trace().to_vec(),
        elapsed,
    })
}
