//! Platform peripherals reached through memory-mapped I/O.

pub mod accelerator;
