//! Byte-addressed memory seen by the functional model.
//!
//! Memory is a set of non-overlapping regions, each backed by a `Vec<u8>`
//! and handed out with a bump pointer. Allocations are never freed; a
//! workload builds its regions, loads its inputs and drops everything at
//! the end.

use anyhow::{Result, bail};

/// One contiguous region of the model's address space.
pub struct Region {
    name: &'static str,
    base: u32,
    bytes: Vec<u8>,
    next: u32,
}

impl Region {
    pub fn new(name: &'static str, base: u32, size: u32) -> Self {
        Self {
            name,
            base,
            bytes: vec![0; size as usize],
            next: 0,
        }
    }

    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Reserves `bytes` bytes aligned to `align` and returns their address.
    pub fn alloc(&mut self, bytes: u32, align: u32) -> Result<u32> {
        let align = align.max(1);
        let start = (self.next + align - 1) & !(align - 1);
        let end = start as u64 + bytes as u64;
        if end > self.bytes.len() as u64 {
            bail!(
                "region `{}` exhausted: {} bytes requested, {} free",
                self.name,
                bytes,
                self.size().saturating_sub(start)
            );
        }
        self.next = end as u32;
        Ok(self.base + start)
    }

    fn contains(&self, addr: u32, len: u32) -> bool {
        let start = addr as u64;
        let base = self.base as u64;
        start >= base && start + len as u64 <= base + self.bytes.len() as u64
    }
}

#[derive(Default)]
pub struct Memory {
    regions: Vec<Region>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&mut self, region: Region) -> Result<()> {
        let start = region.base as u64;
        let end = start + region.bytes.len() as u64;
        for other in &self.regions {
            let o_start = other.base as u64;
            let o_end = o_start + other.bytes.len() as u64;
            if start < o_end && o_start < end {
                bail!("region `{}` overlaps `{}`", region.name, other.name);
            }
        }
        log::debug!(
            "region `{}` at {:#010x}, {} bytes",
            region.name,
            region.base,
            region.bytes.len()
        );
        self.regions.push(region);
        Ok(())
    }

    fn slice(&self, addr: u32, len: u32) -> Option<&[u8]> {
        let region = self.regions.iter().find(|r| r.contains(addr, len))?;
        let offset = (addr - region.base) as usize;
        Some(&region.bytes[offset..offset + len as usize])
    }

    fn slice_mut(&mut self, addr: u32, len: u32) -> Option<&mut [u8]> {
        let region = self.regions.iter_mut().find(|r| r.contains(addr, len))?;
        let offset = (addr - region.base) as usize;
        Some(&mut region.bytes[offset..offset + len as usize])
    }

    /// Whether `[addr, addr + len)` lies inside one region.
    pub fn is_mapped(&self, addr: u32, len: u32) -> bool {
        self.slice(addr, len).is_some()
    }

    /// Reads one little-endian element of `width` bytes.
    pub fn read_element(&self, addr: u32, width: u32) -> Option<u32> {
        let bytes = self.slice(addr, width)?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32),
        )
    }

    pub fn write_element(&mut self, addr: u32, width: u32, value: u32) -> bool {
        match self.slice_mut(addr, width) {
            Some(bytes) => {
                for (i, b) in bytes.iter_mut().enumerate() {
                    *b = (value >> (8 * i)) as u8;
                }
                true
            }
            None => false,
        }
    }

    /// Stores `values` as consecutive elements starting at `addr`.
    pub fn load(&mut self, addr: u32, width: u32, values: &[u32]) -> Result<()> {
        for (i, &v) in values.iter().enumerate() {
            let at = addr + i as u32 * width;
            if !self.write_element(at, width, v) {
                bail!("address {:#010x} is not mapped", at);
            }
        }
        Ok(())
    }

    /// Reads `count` consecutive elements starting at `addr`.
    pub fn dump(&self, addr: u32, width: u32, count: u32) -> Result<Vec<u32>> {
        (0..count)
            .map(|i| {
                let at = addr + i * width;
                match self.read_element(at, width) {
                    Some(v) => Ok(v),
                    None => bail!("address {:#010x} is not mapped", at),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_is_aligned() {
        let mut region = Region::new("l2", 0x1000, 64);
        assert_eq!(region.alloc(3, 1).unwrap(), 0x1000);
        assert_eq!(region.alloc(4, 4).unwrap(), 0x1004);
        assert!(region.alloc(64, 4).is_err());
        assert_eq!(region.alloc(56, 4).unwrap(), 0x1008);
    }

    #[test]
    fn elements_are_little_endian() {
        let mut memory = Memory::new();
        memory.add_region(Region::new("l1", 0x2000, 16)).unwrap();

        memory.load(0x2000, 2, &[0x3f80, 0x1234]).unwrap();
        assert_eq!(memory.read_element(0x2000, 1), Some(0x80));
        assert_eq!(memory.read_element(0x2002, 2), Some(0x1234));
        assert_eq!(memory.dump(0x2000, 2, 2).unwrap(), vec![0x3f80, 0x1234]);
    }

    #[test]
    fn accesses_cannot_straddle_regions() {
        let mut memory = Memory::new();
        memory.add_region(Region::new("a", 0x0, 8)).unwrap();
        memory.add_region(Region::new("b", 0x8, 8)).unwrap();

        assert!(memory.is_mapped(0x4, 4));
        assert!(!memory.is_mapped(0x6, 4));
        assert!(!memory.write_element(0x10, 1, 0));
        assert!(memory.add_region(Region::new("c", 0xC, 8)).is_err());
    }
}
