//! Score vectors and their framing into jobs.
//!
//! The accelerator streams a job's input from a start address for a given
//! number of bytes. A vector larger than the hardware's internal capacity is
//! split into exactly two chunks, issued in address order against the same
//! slot so that the second chunk continues the first one's accumulation.

use crate::SoftexError;
use crate::format::ElementFormat;

/// A contiguous buffer of elements in the accelerator's address space.
///
/// Used both for score inputs and for normalized outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vector {
    addr: u32,
    len: u32,
    format: ElementFormat,
}

impl Vector {
    /// Describes `len` elements of `format` starting at `addr`.
    ///
    /// Fails when the byte length does not fit in TOT_LEN or the buffer
    /// would wrap the 32-bit address space.
    pub fn new(addr: u32, len: u32, format: ElementFormat) -> Result<Self, SoftexError> {
        let bytes = len
            .checked_mul(format.width_bytes())
            .ok_or(SoftexError::LengthOverflow)?;
        addr.checked_add(bytes).ok_or(SoftexError::LengthOverflow)?;
        Ok(Self { addr, len, format })
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Number of elements.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn format(&self) -> ElementFormat {
        self.format
    }

    pub fn byte_len(&self) -> u32 {
        self.len * self.format.width_bytes()
    }

    /// Address and byte length of `chunk` within this buffer.
    pub fn span(&self, chunk: Chunk) -> Span {
        let width = self.format.width_bytes();
        Span {
            addr: self.addr + chunk.start * width,
            bytes: chunk.len * width,
        }
    }

    /// Frames the vector into one or two chunks according to `policy`.
    pub fn chunks(&self, policy: SplitPolicy) -> ChunkPlan {
        let whole = Chunk {
            start: 0,
            len: self.len,
        };

        if !policy.splits(self.byte_len()) {
            return ChunkPlan::single(whole);
        }

        // floor(N*W / (2*W)) * W bytes, i.e. floor(N / 2) elements.
        let first_len = self.len / 2;
        if first_len == 0 {
            return ChunkPlan::single(whole);
        }

        ChunkPlan {
            first: Chunk {
                start: 0,
                len: first_len,
            },
            second: Some(Chunk {
                start: first_len,
                len: self.len - first_len,
            }),
        }
    }
}

/// A contiguous range of elements of a vector, in element units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: u32,
    pub len: u32,
}

/// Address and byte length programmed into IN_ADDR / OUT_ADDR and TOT_LEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub addr: u32,
    pub bytes: u32,
}

/// When a vector is split into two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitPolicy {
    /// Every vector is issued as a single chunk.
    Never,
    /// Every vector of two or more elements is split.
    #[default]
    Always,
    /// Vectors longer than the given number of bytes are split.
    Above(u32),
}

impl SplitPolicy {
    fn splits(self, bytes: u32) -> bool {
        match self {
            SplitPolicy::Never => false,
            SplitPolicy::Always => true,
            SplitPolicy::Above(capacity) => bytes > capacity,
        }
    }
}

/// The one or two chunks a vector is issued as, in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    first: Chunk,
    second: Option<Chunk>,
}

impl ChunkPlan {
    fn single(chunk: Chunk) -> Self {
        Self {
            first: chunk,
            second: None,
        }
    }

    pub fn len(&self) -> usize {
        if self.second.is_some() { 2 } else { 1 }
    }

    pub fn is_split(&self) -> bool {
        self.second.is_some()
    }

    /// Chunk at position `index`, if the plan has that many.
    pub fn get(&self, index: usize) -> Option<Chunk> {
        match index {
            0 => Some(self.first),
            1 => self.second,
            _ => None,
        }
    }

    /// Whether `index` is the chunk that must carry the LAST flag.
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Chunk> + '_ {
        core::iter::once(self.first).chain(self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bf16(addr: u32, len: u32) -> Vector {
        Vector::new(addr, len, ElementFormat::Bf16).unwrap()
    }

    #[test]
    fn even_vector_splits_in_halves() {
        let v = bf16(0x1000, 128);
        let plan = v.chunks(SplitPolicy::Always);

        assert_eq!(plan.len(), 2);
        assert_eq!(v.span(plan.get(0).unwrap()), Span { addr: 0x1000, bytes: 128 });
        assert_eq!(v.span(plan.get(1).unwrap()), Span { addr: 0x1080, bytes: 128 });
    }

    #[test]
    fn odd_vector_puts_remainder_in_second_chunk() {
        let v = bf16(0x2000, 1023);
        let plan = v.chunks(SplitPolicy::Always);
        let first = plan.get(0).unwrap();
        let second = plan.get(1).unwrap();

        assert_eq!(first.len, 511);
        assert_eq!(second.len, 512);
        assert_eq!(v.span(first).bytes, 1023 * 2 / 4 * 2);
        assert_eq!(v.span(first).bytes + v.span(second).bytes, v.byte_len());
    }

    #[test]
    fn chunk_lengths_sum_and_stay_ordered() {
        for len in 0..300u32 {
            for format in [
                ElementFormat::Bf16,
                ElementFormat::int(8, true).unwrap(),
                ElementFormat::int(20, false).unwrap(),
            ] {
                let v = Vector::new(0x100, len, format).unwrap();
                let plan = v.chunks(SplitPolicy::Always);
                let spans: Vec<Span> = plan.iter().map(|c| v.span(c)).collect();

                let total: u32 = spans.iter().map(|s| s.bytes).sum();
                assert_eq!(total, v.byte_len());
                for pair in spans.windows(2) {
                    assert_eq!(pair[0].addr + pair[0].bytes, pair[1].addr);
                }
                assert!(plan.is_last(plan.len() - 1));
            }
        }
    }

    #[test]
    fn tiny_vectors_are_never_split() {
        assert!(!bf16(0, 1).chunks(SplitPolicy::Always).is_split());
        assert!(!bf16(0, 0).chunks(SplitPolicy::Always).is_split());
    }

    #[test]
    fn capacity_policy() {
        let v = bf16(0, 64);
        assert!(!v.chunks(SplitPolicy::Above(128)).is_split());
        assert!(v.chunks(SplitPolicy::Above(127)).is_split());
        assert!(!v.chunks(SplitPolicy::Never).is_split());
    }

    #[test]
    fn overflow_is_rejected() {
        assert_eq!(
            Vector::new(0, u32::MAX, ElementFormat::Bf16),
            Err(SoftexError::LengthOverflow)
        );
        assert_eq!(
            Vector::new(0xFFFF_FF00, 0x100, ElementFormat::Bf16),
            Err(SoftexError::LengthOverflow)
        );
    }
}
