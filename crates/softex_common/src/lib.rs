//! Common definitions shared across the softmax accelerator driver stack.
//!
//! This crate provides the memory map of the accelerator's control port, the
//! bit layout of the command and cast control words, and the platform
//! addresses used by the firmware and the host-side functional model.

#![no_std]

// Memory-mapped I/O address space definitions for the accelerator.
//
// Offsets are in bytes relative to the accelerator base address. The control
// block sits at the start of the window and the per-job register block starts
// at `REG_OFFS`. These values must match the hardware's register file.
pub mod mmio {
    /// Base address of the accelerator's register window on the reference
    /// cluster platform.
    pub const SOFTEX_BASE: usize = 0x0010_0000;

    /// Write-only pulse register. Any value starts the job staged in the
    /// register block.
    pub const TRIGGER: usize = 0x00;

    /// Reads a non-negative job id when the issue queue has a free entry,
    /// a negative value otherwise.
    pub const ACQUIRE: usize = 0x04;

    /// Completion register.
    pub const FINISHED: usize = 0x08;

    /// Hardware status register.
    pub const STATUS: usize = 0x0C;

    /// Id of the job currently being executed.
    pub const RUNNING_JOB: usize = 0x10;

    /// Write-only reset of every in-flight job and slot.
    pub const SOFT_CLEAR: usize = 0x14;

    /// Start of the per-job register block.
    pub const REG_OFFS: usize = 0x20;

    /// Input buffer address of the staged job.
    pub const IN_ADDR: usize = REG_OFFS;

    /// Output buffer address of the staged job.
    pub const OUT_ADDR: usize = REG_OFFS + 0x04;

    /// Total length of the staged job, in bytes.
    pub const TOT_LEN: usize = REG_OFFS + 0x08;

    /// Encoded command word of the staged job.
    pub const COMMANDS: usize = REG_OFFS + 0x0C;

    /// Scratch region used by the accelerator to spill intermediates.
    pub const CACHE_BASE_ADDR: usize = REG_OFFS + 0x10;

    /// Integer cast configuration of the staged job.
    pub const CAST_CTRL: usize = REG_OFFS + 0x14;

    /// Size of the register window in bytes.
    pub const WINDOW_LEN: usize = REG_OFFS + 0x18;

    /// End-of-computation register of the simulation platform. Writing any
    /// value terminates the run.
    pub const EOC_ADDR: usize = 0x8000_0000;

    /// Transmit register of the platform's console UART.
    pub const UART_BASE: usize = 0x1A10_0000;

    /// Start of the cluster's L1 scratchpad where the reference programs
    /// place normalized outputs.
    pub const L1_OUTPUT_BASE: usize = 0x1C01_0000;
}

/// Bit layout of the 32-bit command word.
///
/// The low byte carries operation and framing flags; the slot id occupies
/// the upper half-word.
pub mod cmd {
    /// Accumulation phase only.
    pub const ACC_ONLY: u32 = 0x0000_0001;

    /// Normalization (division) phase only.
    pub const DIV_ONLY: u32 = 0x0000_0002;

    /// Reserve a fresh accumulation slot for this job.
    pub const ACQUIRE_SLOT: u32 = 0x0000_0004;

    /// Final chunk of the current phase for this slot.
    pub const LAST: u32 = 0x0000_0008;

    /// Latch CACHE_BASE_ADDR for this and following jobs.
    pub const SET_CACHE_ADDR: u32 = 0x0000_0010;

    /// Configuration-only job, no data is processed.
    pub const NO_OP: u32 = 0x0000_0020;

    /// Input elements are integers described by CAST_CTRL.
    pub const INT_INPUT: u32 = 0x0000_0040;

    /// Output elements are integers described by CAST_CTRL.
    pub const INT_OUTPUT: u32 = 0x0000_0080;

    /// Every flag the hardware defines.
    pub const KNOWN_MASK: u32 = 0x0000_00FF;

    /// Shift of the slot id within the command word.
    pub const SLOT_SHIFT: u32 = 16;
}

/// Bit layout of the CAST_CTRL register.
pub mod cast {
    /// Mask of a 7-bit integer width field.
    pub const WIDTH_MASK: u32 = 0x7F;

    /// Largest integer width the cast unit accepts.
    pub const MAX_WIDTH: u8 = 127;

    /// Shift of the input width field.
    pub const INPUT_WIDTH_SHIFT: u32 = 0;

    /// Input signedness bit.
    pub const INPUT_SIGNED: u32 = 1 << 7;

    /// Shift of the output width field.
    pub const OUTPUT_WIDTH_SHIFT: u32 = 8;

    /// Output signedness bit.
    pub const OUTPUT_SIGNED: u32 = 1 << 15;
}
