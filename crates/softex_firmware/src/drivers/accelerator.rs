//! Platform glue for the softmax accelerator.
//!
//! The register protocol lives in `softex_core`; this module only supplies
//! the pieces that depend on the cluster: where the register window is, how
//! the core sleeps until a completion event, and how the run is ended.

use softex_common::mmio::{EOC_ADDR, SOFTEX_BASE};
use softex_core::regs::{Mmio, RegisterBus};
use softex_core::wait::WaitEvent;

/// Halts the core until the accelerator's completion event.
///
/// The event line is wired to the core's interrupt input, so a single
/// `wfi` returns once per finished job.
pub struct Wfi;

impl<B: RegisterBus + ?Sized> WaitEvent<B> for Wfi {
    #[inline(always)]
    fn wait(&mut self, _bus: &mut B) {
        unsafe { riscv::asm::wfi() };
    }
}

/// Opens the accelerator's register window.
///
/// Must be called once: the returned bus is the only issuer.
pub fn open() -> Mmio {
    unsafe { Mmio::new(SOFTEX_BASE) }
}

/// Signals end of computation to the simulation platform.
pub fn end_of_computation(status: u32) {
    unsafe { (EOC_ADDR as *mut u32).write_volatile(status) };
}

/// Reads one 16-bit output element written by the accelerator.
#[inline(always)]
pub fn read_output(addr: usize) -> u16 {
    unsafe { (addr as *const u16).read_volatile() }
}
