//! Register map and bus abstraction for the accelerator's control port.
//!
//! The accelerator exposes a small window of 32-bit registers. Software
//! stages a job in the register block and pulses TRIGGER; status and
//! handshake registers live in the control block at the start of the window.

use core::sync::atomic::{Ordering, fence};
use softex_common::mmio;

/// Registers of the accelerator's control port.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Trigger = mmio::TRIGGER,
    Acquire = mmio::ACQUIRE,
    Finished = mmio::FINISHED,
    Status = mmio::STATUS,
    RunningJob = mmio::RUNNING_JOB,
    SoftClear = mmio::SOFT_CLEAR,
    InAddr = mmio::IN_ADDR,
    OutAddr = mmio::OUT_ADDR,
    TotLen = mmio::TOT_LEN,
    Commands = mmio::COMMANDS,
    CacheBaseAddr = mmio::CACHE_BASE_ADDR,
    CastCtrl = mmio::CAST_CTRL,
}

impl Register {
    /// Byte offset of the register from the accelerator base.
    #[inline(always)]
    pub const fn offset(self) -> usize {
        self as usize
    }

    /// Looks up the register at a byte offset.
    pub fn from_offset(offset: usize) -> Option<Self> {
        let reg = match offset {
            mmio::TRIGGER => Register::Trigger,
            mmio::ACQUIRE => Register::Acquire,
            mmio::FINISHED => Register::Finished,
            mmio::STATUS => Register::Status,
            mmio::RUNNING_JOB => Register::RunningJob,
            mmio::SOFT_CLEAR => Register::SoftClear,
            mmio::IN_ADDR => Register::InAddr,
            mmio::OUT_ADDR => Register::OutAddr,
            mmio::TOT_LEN => Register::TotLen,
            mmio::COMMANDS => Register::Commands,
            mmio::CACHE_BASE_ADDR => Register::CacheBaseAddr,
            mmio::CAST_CTRL => Register::CastCtrl,
            _ => return None,
        };
        Some(reg)
    }
}

/// Single-word access to the accelerator's registers.
///
/// Implementations perform exactly one bus transaction per call, with no
/// buffering and no retry. A failed transaction is outside the protocol's
/// responsibility. Helpers for the handshake registers are provided on top
/// of `read` and `write`.
pub trait RegisterBus {
    /// Stores `value` into `reg`.
    fn write(&mut self, reg: Register, value: u32);

    /// Loads the current value of `reg`.
    fn read(&mut self, reg: Register) -> u32;

    /// Resets every in-flight job and slot.
    ///
    /// Must be issued once per session before the first job and never while
    /// jobs are outstanding; the dispatcher guarantees both by issuing it in
    /// its constructor.
    fn soft_clear(&mut self) {
        self.write(Register::SoftClear, 0);
    }

    /// Starts the job currently staged in the register block.
    fn trigger(&mut self) {
        self.write(Register::Trigger, 0);
    }

    /// Polls the issue queue once. Non-negative values are job ids.
    fn try_acquire(&mut self) -> i32 {
        self.read(Register::Acquire) as i32
    }

    fn status(&mut self) -> u32 {
        self.read(Register::Status)
    }

    fn finished(&mut self) -> u32 {
        self.read(Register::Finished)
    }

    fn running_job(&mut self) -> u32 {
        self.read(Register::RunningJob)
    }
}

/// Volatile memory-mapped access to a physical accelerator.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Creates a bus for the register window at `base`.
    ///
    /// # Safety
    ///
    /// * `base` must be the address of the accelerator's register window,
    ///   mapped uncached and valid for 32-bit volatile accesses over
    ///   `mmio::WINDOW_LEN` bytes.
    /// * No other `Mmio` for the same window may exist while this one is
    ///   alive, since the protocol assumes a single issuing thread.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

impl RegisterBus for Mmio {
    #[inline(always)]
    fn write(&mut self, reg: Register, value: u32) {
        let ptr = (self.base + reg.offset()) as *mut u32;

        // Staged job registers must be visible before the trigger pulse.
        if reg == Register::Trigger {
            fence(Ordering::Release);
        }

        unsafe {
            ptr.write_volatile(value);
        }
        log::trace!("{:?} <- {:#010x}", reg, value);
    }

    #[inline(always)]
    fn read(&mut self, reg: Register) -> u32 {
        let ptr = (self.base + reg.offset()) as *const u32;
        let value = unsafe { ptr.read_volatile() };
        fence(Ordering::Acquire);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_match_register_map() {
        assert_eq!(Register::Trigger.offset(), 0x00);
        assert_eq!(Register::Acquire.offset(), 0x04);
        assert_eq!(Register::SoftClear.offset(), 0x14);
        assert_eq!(Register::InAddr.offset(), 0x20);
        assert_eq!(Register::Commands.offset(), 0x2C);
        assert_eq!(Register::CastCtrl.offset(), 0x34);
    }

    #[test]
    fn from_offset_inverts_offset() {
        for reg in [
            Register::Trigger,
            Register::Acquire,
            Register::Finished,
            Register::Status,
            Register::RunningJob,
            Register::SoftClear,
            Register::InAddr,
            Register::OutAddr,
            Register::TotLen,
            Register::Commands,
            Register::CacheBaseAddr,
            Register::CastCtrl,
        ] {
            assert_eq!(Register::from_offset(reg.offset()), Some(reg));
        }
        assert_eq!(Register::from_offset(0x18), None);
    }

    #[test]
    fn mmio_writes_land_in_window() {
        let mut window = [0u32; mmio::WINDOW_LEN / 4];
        let mut bus = unsafe { Mmio::new(window.as_mut_ptr() as usize) };

        bus.write(Register::TotLen, 256);
        bus.write(Register::Commands, 0x0001_0009);

        assert_eq!(bus.read(Register::TotLen), 256);
        assert_eq!(window[mmio::COMMANDS / 4], 0x0001_0009);
    }
}
