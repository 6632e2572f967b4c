#![no_std]
#![no_main]

use core::arch::global_asm;
use core::cell::UnsafeCell;
use drivers::accelerator::{self, Wfi};
use log::LevelFilter;
use softex_common::mmio::L1_OUTPUT_BASE;
use softex_core::SoftexError;
use softex_core::chunk::{SplitPolicy, Vector};
use softex_core::config::DriverConfig;
use softex_core::dispatcher::Dispatcher;
use softex_core::format::ElementFormat;
use softex_core::regs::Mmio;
use softex_core::scheduler::{Scheduler, Softmax};
use softex_core::static_vec::StaticVec;

mod console;
mod drivers;

mod bench_data {
    include!(concat!(env!("OUT_DIR"), "/bench_data.rs"));
}

global_asm!(include_str!("entry.S"));

const CONFIG: DriverConfig = DriverConfig {
    slot_count: 2,
    depth: 2,
    split: SplitPolicy::Always,
    input_format: ElementFormat::Bf16,
    output_format: ElementFormat::Bf16,
};

/// Accepted distance from the golden outputs, in bf16 LSBs.
const TOLERANCE: u16 = 2;

const ELEMENT_BYTES: usize = 2;
const TOTAL: usize = bench_data::LENGTH as usize * bench_data::N_VECTORS;
const CACHE_WORDS: usize = 16 * CONFIG.slot_count;

/// Scores followed directly by the accelerator's cache area.
#[repr(C)]
struct L2Data {
    scores: [u16; TOTAL],
    cache: [u32; CACHE_WORDS],
}

struct GlobalCell<T>(UnsafeCell<T>);
unsafe impl<T> Sync for GlobalCell<T> {}

impl<T> GlobalCell<T> {
    const fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }

    fn as_ptr(&self) -> *mut T {
        self.0.get()
    }
}

// The accelerator writes the cache area, so the block lives in .data.
static L2: GlobalCell<L2Data> = GlobalCell::new(L2Data {
    scores: bench_data::SCORES,
    cache: [0; CACHE_WORDS],
});

fn tasks() -> Result<StaticVec<Softmax, { bench_data::N_VECTORS }>, SoftexError> {
    let scores = unsafe { core::ptr::addr_of!((*L2.as_ptr()).scores) } as usize;
    let vector_bytes = bench_data::LENGTH as usize * ELEMENT_BYTES;

    let mut tasks = StaticVec::new();
    for i in 0..bench_data::N_VECTORS {
        let input = Vector::new(
            (scores + i * vector_bytes) as u32,
            bench_data::LENGTH,
            CONFIG.input_format,
        )?;
        let output = Vector::new(
            (L1_OUTPUT_BASE + i * vector_bytes) as u32,
            bench_data::LENGTH,
            CONFIG.output_format,
        )?;
        let _ = tasks.push(Softmax::new(input, output)?);
    }
    Ok(tasks)
}

fn schedule(dispatcher: &mut Dispatcher<Mmio, Wfi>) -> Result<(), SoftexError> {
    let work = tasks()?;
    let cache = unsafe { core::ptr::addr_of!((*L2.as_ptr()).cache) } as u32;

    let summary = Scheduler::new(CONFIG)?.run(dispatcher, &work, Some(cache))?;
    console::println!(
        "[SOFTEX] {} vectors, {} groups, {} jobs",
        summary.vectors,
        summary.groups,
        summary.jobs
    );
    Ok(())
}

/// Counts outputs further than [`TOLERANCE`] from the golden values.
fn verify() -> usize {
    let mut errors = 0;
    for (i, &want) in bench_data::GOLDEN.iter().enumerate() {
        let got = accelerator::read_output(L1_OUTPUT_BASE + i * ELEMENT_BYTES);
        if got.abs_diff(want) > TOLERANCE {
            if errors == 0 {
                log::error!("element {}: got {:#06x}, expected {:#06x}", i, got, want);
            }
            errors += 1;
        }
    }
    errors
}

fn fail(err: SoftexError) -> ! {
    log::error!("driver error: {}", err);
    accelerator::end_of_computation(1);
    park()
}

fn park() -> ! {
    loop {
        unsafe { riscv::asm::wfi() };
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kmain() -> ! {
    console::init(LevelFilter::Info);
    console::println!("[BOOT] softmax benchmark, {} x {}", bench_data::N_VECTORS, bench_data::LENGTH);

    let mut dispatcher = match Dispatcher::new(accelerator::open(), Wfi, &CONFIG) {
        Ok(dispatcher) => dispatcher,
        Err(err) => fail(err),
    };
    if let Err(err) = schedule(&mut dispatcher) {
        fail(err);
    }

    let errors = verify();
    console::println!("[SOFTEX] {} / {} outputs off by more than {} LSB", errors, TOTAL, TOLERANCE);

    let status = if errors == 0 { 0 } else { 1 };
    dispatcher.shutdown(|_| accelerator::end_of_computation(status));
    park()
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    console::println!("PANIC: {}", info);
    accelerator::end_of_computation(1);
    park()
}
