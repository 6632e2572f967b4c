//! Job dispatch protocol for the softmax reduction accelerator.
//!
//! This crate drives a fixed-function accelerator that computes softmax in
//! two phases: an accumulation phase that reduces a score vector into a
//! per-slot running maximum and sum, and a normalization phase that divides
//! every exponentiated score by that sum. Software sequences jobs through a
//! handful of memory-mapped registers. All modules are `no_std` and can be
//! used from bare-metal firmware as well as from host-side simulation.

#![cfg_attr(not(test), no_std)]

use core::fmt;

/// Score vectors and the two-chunk split of oversized vectors.
///
/// A vector is identified by its base address and element count. Vectors
/// that exceed the accelerator's internal capacity are framed as two
/// address-ordered chunks that share the same slot state.
pub mod chunk;

/// Command word and cast word encoding.
///
/// Pure functions that pack an operation, its framing flags and the slot id
/// into the 32-bit COMMANDS register, and an integer cast configuration into
/// CAST_CTRL. Also decodes command words back into their parts.
pub mod command;

/// Driver configuration.
pub mod config;

/// Acquire, configure and trigger state machine.
///
/// Owns the register bus, the completion wait backend and the slot manager.
/// All jobs reach the hardware through the dispatcher, and every job is
/// built from a typed slot lease so that phase ordering cannot be violated.
pub mod dispatcher;

/// Element formats and the integer cast configuration.
pub mod format;

/// Register map and bus abstraction.
///
/// Typed single-word access to the accelerator's control, status and job
/// registers, with a volatile MMIO implementation for real hardware.
pub mod regs;

/// Multi-vector pipelined scheduling.
///
/// Issues groups of independent vectors across the accelerator's slots so
/// that acquire latency is hidden behind the execution of jobs already
/// submitted, with phase barriers between accumulation and normalization.
pub mod scheduler;

/// Hardware accumulation slots and their lifetime.
///
/// Each slot moves through reserved, finalizing and settled states. The
/// transitions are carried by non-clonable lease types so that a divide job
/// can only be built for a slot whose accumulation has completed.
pub mod slot;

/// Stack-allocated vector with compile-time fixed capacity.
///
/// Holds the per-group slot leases in the scheduler without heap allocation.
pub mod static_vec;

/// Completion wait backends.
///
/// The accelerator signals job completion through an event. How the core
/// waits for it is pluggable: spin on the FINISHED register, halt until
/// interrupt on RISC-V, or drive a software model.
pub mod wait;

#[cfg(test)]
mod testing;

/// Maximum number of hardware slots the driver can track.
pub const MAX_SLOTS: usize = 16;

/// Error types returned by the driver.
///
/// Every variant describes a configuration or input problem detected before
/// any register is written. Protocol ordering is enforced by the lease types
/// and never surfaces here at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftexError {
    /// The pipeline depth is zero or larger than the number of slots, or
    /// the slot count exceeds [`MAX_SLOTS`].
    InvalidDepth { depth: usize, slots: usize },

    /// Every slot is already associated with a vector.
    SlotsExhausted,

    /// The cache region was already configured for the current run.
    CacheAlreadyConfigured,

    /// An integer format width is zero or does not fit the 7-bit field.
    CastWidthOutOfRange(u8),

    /// An output vector does not have as many elements as its input.
    OutputLengthMismatch { input: u32, output: u32 },

    /// A vector's byte length does not fit the 32-bit TOT_LEN register.
    LengthOverflow,

    /// A vector has no elements; the hardware has no zero-length job.
    EmptyVector,
}

impl fmt::Display for SoftexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftexError::InvalidDepth { depth, slots } => {
                write!(f, "pipeline depth {depth} is invalid for {slots} slots")
            }
            SoftexError::SlotsExhausted => write!(f, "no free accumulation slot"),
            SoftexError::CacheAlreadyConfigured => {
                write!(f, "cache region already configured for this run")
            }
            SoftexError::CastWidthOutOfRange(bits) => {
                write!(f, "integer width {bits} is outside 1..=127")
            }
            SoftexError::OutputLengthMismatch { input, output } => write!(
                f,
                "output holds {output} elements but input holds {input}"
            ),
            SoftexError::LengthOverflow => write!(f, "vector length overflows TOT_LEN"),
            SoftexError::EmptyVector => write!(f, "vector has no elements"),
        }
    }
}

impl core::error::Error for SoftexError {}
