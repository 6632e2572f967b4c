//! Completion wait backends.
//!
//! The accelerator raises one completion event per finished data job. The
//! dispatcher blocks on these events through a [`WaitEvent`] backend, which
//! receives the register bus so that polling backends can read status
//! registers while event-driven backends simply halt the core.

use crate::regs::RegisterBus;

/// Blocks the caller until the next completion event.
///
/// There is no timeout and no cancellation: an accelerator that never
/// completes stalls the caller permanently.
pub trait WaitEvent<B: RegisterBus + ?Sized> {
    fn wait(&mut self, bus: &mut B);
}

/// Busy-polls the FINISHED register until it moves past the events already
/// consumed.
///
/// Suitable for platforms without an event line wired to the core. FINISHED
/// counts completed jobs, so each call consumes exactly one completion even
/// when several finished between two polls.
#[derive(Debug, Default)]
pub struct Spin {
    consumed: u32,
}

impl Spin {
    /// Starts from a known FINISHED value, typically read right after the
    /// soft clear.
    pub fn starting_at(finished: u32) -> Self {
        Self { consumed: finished }
    }
}

impl<B: RegisterBus + ?Sized> WaitEvent<B> for Spin {
    fn wait(&mut self, bus: &mut B) {
        let mut polls: u64 = 0;
        loop {
            if bus.finished() != self.consumed {
                self.consumed = self.consumed.wrapping_add(1);
                break;
            }
            polls += 1;
            core::hint::spin_loop();
        }
        log::trace!("completion after {} polls", polls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::Register;

    struct Counter {
        reads: u32,
        bump_after: u32,
        value: u32,
    }

    impl RegisterBus for Counter {
        fn write(&mut self, _reg: Register, _value: u32) {}

        fn read(&mut self, reg: Register) -> u32 {
            assert_eq!(reg, Register::Finished);
            self.reads += 1;
            if self.reads % self.bump_after == 0 {
                self.value += 1;
            }
            self.value
        }
    }

    #[test]
    fn spin_consumes_one_change_per_wait() {
        let mut bus = Counter {
            reads: 0,
            bump_after: 5,
            value: 0,
        };
        let mut spin = Spin::default();

        spin.wait(&mut bus);
        assert_eq!(bus.value, 1);
        assert_eq!(bus.reads, 5);

        spin.wait(&mut bus);
        assert_eq!(bus.value, 2);
        assert_eq!(bus.reads, 10);
    }

    #[test]
    fn spin_consumes_burst_one_at_a_time() {
        let mut bus = Counter {
            reads: 0,
            bump_after: 1,
            value: 2,
        };
        let mut spin = Spin::default();

        // FINISHED already reads 3 on the first poll: three events pending.
        spin.wait(&mut bus);
        spin.wait(&mut bus);
        spin.wait(&mut bus);
        assert_eq!(bus.reads, 3);
    }
}
