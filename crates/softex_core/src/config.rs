//! Static configuration of a driver session.

use crate::chunk::SplitPolicy;
use crate::format::{CastConfig, ElementFormat};
use crate::{MAX_SLOTS, SoftexError};

/// Parameters of a dispatch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Number of accumulation slots implemented by the hardware.
    pub slot_count: usize,

    /// Number of vectors kept in flight together. At most `slot_count`.
    pub depth: usize,

    /// When vectors are split into two chunks.
    pub split: SplitPolicy,

    /// Format of the score inputs.
    pub input_format: ElementFormat,

    /// Format of the normalized outputs.
    pub output_format: ElementFormat,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            slot_count: 2,
            depth: 2,
            split: SplitPolicy::Always,
            input_format: ElementFormat::Bf16,
            output_format: ElementFormat::Bf16,
        }
    }
}

impl DriverConfig {
    /// Checks the depth against the slot pool.
    pub fn validate(&self) -> Result<(), SoftexError> {
        if self.slot_count == 0
            || self.slot_count > MAX_SLOTS
            || self.depth == 0
            || self.depth > self.slot_count
        {
            return Err(SoftexError::InvalidDepth {
                depth: self.depth,
                slots: self.slot_count,
            });
        }
        Ok(())
    }

    /// Cast configuration carried by every data job of the session.
    pub fn cast(&self) -> Option<CastConfig> {
        CastConfig::new(self.input_format, self.output_format)
    }
}
