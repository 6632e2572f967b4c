//! Element formats and the integer cast configuration.

use crate::SoftexError;
use softex_common::cast;

/// Storage format of a score or output element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementFormat {
    /// 16-bit brain floating point, the accelerator's native format.
    #[default]
    Bf16,

    /// Integer of `bits` significant bits, converted by the cast unit.
    Int { bits: u8, signed: bool },
}

impl ElementFormat {
    /// Builds an integer format, validating the width against the 7-bit
    /// CAST_CTRL field.
    pub fn int(bits: u8, signed: bool) -> Result<Self, SoftexError> {
        if bits == 0 || bits > cast::MAX_WIDTH {
            return Err(SoftexError::CastWidthOutOfRange(bits));
        }
        Ok(ElementFormat::Int { bits, signed })
    }

    /// Size in bytes of one stored element.
    ///
    /// Integers are stored in the smallest power-of-two container that
    /// holds their width.
    pub const fn width_bytes(self) -> u32 {
        match self {
            ElementFormat::Bf16 => 2,
            ElementFormat::Int { bits, .. } if bits <= 8 => 1,
            ElementFormat::Int { bits, .. } if bits <= 16 => 2,
            ElementFormat::Int { .. } => 4,
        }
    }

    pub const fn is_int(self) -> bool {
        matches!(self, ElementFormat::Int { .. })
    }

    /// Packs this format into one half of the cast word.
    const fn cast_field(self) -> u32 {
        match self {
            ElementFormat::Bf16 => 0,
            ElementFormat::Int { bits, signed } => {
                let sign = if signed { 1 << 7 } else { 0 };
                (bits as u32 & cast::WIDTH_MASK) | sign
            }
        }
    }

    /// Inverse of `cast_field`. A zero width means the native format.
    const fn from_cast_field(field: u32) -> Self {
        let bits = (field & cast::WIDTH_MASK) as u8;
        if bits == 0 {
            ElementFormat::Bf16
        } else {
            ElementFormat::Int {
                bits,
                signed: field & (1 << 7) != 0,
            }
        }
    }
}

/// Integer cast configuration written to CAST_CTRL.
///
/// Only exists when at least one side of the job is an integer format, so a
/// job carries `Option<CastConfig>` and the INT_INPUT / INT_OUTPUT command
/// flags follow from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastConfig {
    input: ElementFormat,
    output: ElementFormat,
}

impl CastConfig {
    /// Returns `None` when neither side needs the cast unit.
    pub fn new(input: ElementFormat, output: ElementFormat) -> Option<Self> {
        if input.is_int() || output.is_int() {
            Some(Self { input, output })
        } else {
            None
        }
    }

    pub fn input(&self) -> ElementFormat {
        self.input
    }

    pub fn output(&self) -> ElementFormat {
        self.output
    }

    /// Packs the configuration into the CAST_CTRL word.
    ///
    /// Layout: bits\[6:0\] input width, bit 7 input signed, bits\[14:8\]
    /// output width, bit 15 output signed. A native-format side encodes as
    /// zero.
    pub const fn encode(&self) -> u32 {
        (self.input.cast_field() << cast::INPUT_WIDTH_SHIFT)
            | (self.output.cast_field() << cast::OUTPUT_WIDTH_SHIFT)
    }

    /// Unpacks a CAST_CTRL word.
    pub const fn decode(word: u32) -> Self {
        Self {
            input: ElementFormat::from_cast_field(word >> cast::INPUT_WIDTH_SHIFT),
            output: ElementFormat::from_cast_field(word >> cast::OUTPUT_WIDTH_SHIFT),
        }
    }
}
