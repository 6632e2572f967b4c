//! Command word encoding for the COMMANDS register.
//!
//! A command word selects the operation of a job, its framing flags and the
//! slot it operates on. Operation bits are mutually exclusive: a job either
//! accumulates, divides, only configures the accelerator, or (with no
//! operation bit set) runs both phases back to back in a single shot.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};
use softex_common::cmd;

/// Operation performed by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Both phases on a vector that fits a single job.
    Full,
    /// Exponentiate and sum into a slot.
    Accumulate,
    /// Exponentiate and divide by a slot's finalized sum.
    Divide,
    /// Configuration only, no data is read or written.
    NoOp,
}

impl Operation {
    const fn bits(self) -> u32 {
        match self {
            Operation::Full => 0,
            Operation::Accumulate => cmd::ACC_ONLY,
            Operation::Divide => cmd::DIV_ONLY,
            Operation::NoOp => cmd::NO_OP,
        }
    }
}

/// Framing flags of a command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags(u32);

impl CommandFlags {
    pub const ACQUIRE_SLOT: Self = Self(cmd::ACQUIRE_SLOT);
    pub const LAST: Self = Self(cmd::LAST);
    pub const SET_CACHE_ADDR: Self = Self(cmd::SET_CACHE_ADDR);
    pub const INT_INPUT: Self = Self(cmd::INT_INPUT);
    pub const INT_OUTPUT: Self = Self(cmd::INT_OUTPUT);

    const MASK: u32 = cmd::ACQUIRE_SLOT
        | cmd::LAST
        | cmd::SET_CACHE_ADDR
        | cmd::INT_INPUT
        | cmd::INT_OUTPUT;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `self` with `other` set when `on` is true.
    pub const fn with(self, other: Self, on: bool) -> Self {
        if on { Self(self.0 | other.0) } else { self }
    }
}

impl BitOr for CommandFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CommandFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Identifier of a hardware accumulation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SlotId(pub u16);

impl SlotId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// A decoded command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub operation: Operation,
    pub flags: CommandFlags,
    pub slot: SlotId,
}

/// Reasons a word is not a valid command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// More than one operation bit is set.
    ConflictingOperation(u32),
    /// Bits outside the defined flag set are set in the low half-word.
    UnknownBits(u32),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::ConflictingOperation(word) => {
                write!(f, "command {word:#010x} sets more than one operation")
            }
            CommandError::UnknownBits(word) => {
                write!(f, "command {word:#010x} sets undefined bits")
            }
        }
    }
}

impl core::error::Error for CommandError {}

impl Command {
    pub const fn new(operation: Operation, flags: CommandFlags, slot: SlotId) -> Self {
        Self {
            operation,
            flags,
            slot,
        }
    }

    /// Packs the command into the 32-bit COMMANDS word.
    ///
    /// The slot id occupies bits 16..32.
    pub const fn encode(&self) -> u32 {
        self.operation.bits() | self.flags.bits() | ((self.slot.0 as u32) << cmd::SLOT_SHIFT)
    }

    /// Unpacks a COMMANDS word.
    pub fn decode(word: u32) -> Result<Self, CommandError> {
        let low = word & 0xFFFF;
        if low & !cmd::KNOWN_MASK != 0 {
            return Err(CommandError::UnknownBits(word));
        }

        let op_bits = low & (cmd::ACC_ONLY | cmd::DIV_ONLY | cmd::NO_OP);
        let operation = match op_bits {
            0 => Operation::Full,
            cmd::ACC_ONLY => Operation::Accumulate,
            cmd::DIV_ONLY => Operation::Divide,
            cmd::NO_OP => Operation::NoOp,
            _ => return Err(CommandError::ConflictingOperation(word)),
        };

        Ok(Self {
            operation,
            flags: CommandFlags(low & CommandFlags::MASK),
            slot: SlotId((word >> cmd::SLOT_SHIFT) as u16),
        })
    }
}
