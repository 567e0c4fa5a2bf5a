//! Memory regions: flash, RAM, the MMIO window, and bit-band alias
//! windows. These are the leaf containers the address space (C4)
//! dispatches to.

use vhsim_target::AddressRange;

use crate::error::{Error, Result};

fn decode_le(bytes: &[u8], size: u8) -> u32 {
    let mut value = 0u32;
    for (i, b) in bytes.iter().take(size as usize).enumerate() {
        value |= (*b as u32) << (8 * i);
    }
    value
}

fn encode_le(value: u32, size: u8) -> Vec<u8> {
    (0..size).map(|i| ((value >> (8 * i)) & 0xFF) as u8).collect()
}

/// Read-only, image-loadable flash.
pub struct FlashMemory {
    range: AddressRange,
    data: Vec<u8>,
}

impl FlashMemory {
    pub fn new(range: AddressRange) -> Self {
        Self {
            data: vec![0u8; range.size as usize],
            range,
        }
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// Writes `image` starting at offset 0, zero-filling the remainder
    /// of flash. Used once at firmware load; fails if the image does
    /// not fit.
    pub fn load_image(&mut self, image: &[u8]) -> Result<()> {
        if image.len() > self.data.len() {
            return Err(Error::bounds(format!(
                "firmware image of {} bytes exceeds flash size {}",
                image.len(),
                self.data.len()
            )));
        }
        self.data[..image.len()].copy_from_slice(image);
        self.data[image.len()..].fill(0);
        Ok(())
    }

    /// Programs `bytes` at `addr`, leaving the rest of flash untouched.
    /// Used by the debug protocol's `write_mem`, which addresses an
    /// arbitrary offset rather than reloading the whole image.
    pub fn program(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let offset = self.block_offset(addr, bytes.len() as u32)?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read(&self, addr: u32, size: u8) -> Result<u32> {
        let offset = self.offset_for(addr, size)?;
        Ok(decode_le(&self.data[offset..offset + size as usize], size))
    }

    pub fn write(&mut self, addr: u32, _size: u8, _value: u32) -> Result<()> {
        Err(Error::MemoryPermission { address: addr })
    }

    /// Raw byte slice used by the CPU to mirror flash into the
    /// execution engine, and by the debug server's bulk memory reads.
    pub fn read_block(&self, addr: u32, len: u32) -> Result<&[u8]> {
        let offset = self.block_offset(addr, len)?;
        Ok(&self.data[offset..offset + len as usize])
    }

    pub fn reset(&mut self) {
        // Flash is not cleared on reset: it holds the loaded firmware image.
    }

    fn offset_for(&self, addr: u32, size: u8) -> Result<usize> {
        if !self.range.contains_range(addr, size as u32) {
            return Err(Error::bounds(format!(
                "flash access at {addr:#010x}+{size} exceeds region {:#010x}..{:#010x}",
                self.range.base,
                self.range.end()
            )));
        }
        Ok((addr - self.range.base) as usize)
    }

    fn block_offset(&self, addr: u32, len: u32) -> Result<usize> {
        if !self.range.contains_range(addr, len) {
            return Err(Error::bounds(format!(
                "flash block read at {addr:#010x}+{len} exceeds region"
            )));
        }
        Ok((addr - self.range.base) as usize)
    }
}

/// Read/write RAM, zeroed on reset.
pub struct RamMemory {
    range: AddressRange,
    data: Vec<u8>,
    name: String,
}

impl RamMemory {
    pub fn new(range: AddressRange, name: impl Into<String>) -> Self {
        Self {
            data: vec![0u8; range.size as usize],
            range,
            name: name.into(),
        }
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&self, addr: u32, size: u8) -> Result<u32> {
        let offset = self.offset_for(addr, size)?;
        Ok(decode_le(&self.data[offset..offset + size as usize], size))
    }

    pub fn write(&mut self, addr: u32, size: u8, value: u32) -> Result<()> {
        let offset = self.offset_for(addr, size)?;
        let bytes = encode_le(value, size);
        self.data[offset..offset + size as usize].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn read_block(&self, addr: u32, len: u32) -> Result<&[u8]> {
        if !self.range.contains_range(addr, len) {
            return Err(Error::bounds(format!(
                "RAM block read at {addr:#010x}+{len} exceeds region"
            )));
        }
        let offset = (addr - self.range.base) as usize;
        Ok(&self.data[offset..offset + len as usize])
    }

    pub fn write_block(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        if !self.range.contains_range(addr, bytes.len() as u32) {
            return Err(Error::bounds(format!(
                "RAM block write at {addr:#010x}+{} exceeds region",
                bytes.len()
            )));
        }
        let offset = (addr - self.range.base) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    fn offset_for(&self, addr: u32, size: u8) -> Result<usize> {
        if !self.range.contains_range(addr, size as u32) {
            return Err(Error::bounds(format!(
                "RAM access at {addr:#010x}+{size} exceeds region {:#010x}..{:#010x}",
                self.range.base,
                self.range.end()
            )));
        }
        Ok((addr - self.range.base) as usize)
    }
}

/// A purely declarative MMIO window. Direct reads/writes are a
/// programming error; every access is routed through the address space
/// to a registered peripheral.
pub struct MmioWindow {
    range: AddressRange,
}

impl MmioWindow {
    pub fn new(range: AddressRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }
}

/// A bit-band alias window: `alias` addresses translate onto single
/// bits of `target`.
pub struct BitBandRegion {
    alias: AddressRange,
    target: AddressRange,
    target_is_peripheral: bool,
}

impl BitBandRegion {
    pub fn new(alias: AddressRange, target: AddressRange, target_is_peripheral: bool) -> Self {
        Self {
            alias,
            target,
            target_is_peripheral,
        }
    }

    pub fn alias(&self) -> AddressRange {
        self.alias
    }

    pub fn target_is_peripheral(&self) -> bool {
        self.target_is_peripheral
    }

    /// Translates an alias address into `(target_addr, bit_index)`.
    pub fn translate(&self, alias_addr: u32) -> Result<(u32, u8)> {
        if !self.alias.contains_point(alias_addr) {
            return Err(Error::bounds(format!(
                "bit-band alias address {alias_addr:#010x} outside alias window {:#010x}..{:#010x}",
                self.alias.base,
                self.alias.end()
            )));
        }
        let off = alias_addr - self.alias.base;
        let target_offset = (off / 32) * 4;
        let bit_index = ((off % 32) / 4) as u8;
        let target_addr = self.target.base + target_offset;
        if !self.target.contains_range(target_addr, 4) {
            return Err(Error::bounds(format!(
                "bit-band target address {target_addr:#010x} outside target region"
            )));
        }
        Ok((target_addr, bit_index))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flash_round_trip_and_permission() {
        let mut flash = FlashMemory::new(AddressRange::new(0x0800_0000, 256));
        let mut image = vec![0u8; 256];
        image[0..4].copy_from_slice(&[0x00, 0x10, 0x00, 0x20]);
        image[4..8].copy_from_slice(&[0x01, 0x01, 0x00, 0x08]);
        flash.load_image(&image).unwrap();

        assert_eq!(flash.read(0x0800_0000, 4).unwrap(), 0x2000_1000);
        assert_eq!(flash.read(0x0800_0004, 4).unwrap(), 0x0800_0101);
        assert!(matches!(
            flash.write(0x0800_0000, 4, 0),
            Err(Error::MemoryPermission { .. })
        ));
    }

    #[test]
    fn flash_program_preserves_surrounding_bytes() {
        let mut flash = FlashMemory::new(AddressRange::new(0x0800_0000, 256));
        let mut image = vec![0xAAu8; 256];
        flash.load_image(&image).unwrap();
        image[0x10..0x14].copy_from_slice(&[1, 2, 3, 4]);

        flash.program(0x0800_0010, &[1, 2, 3, 4]).unwrap();

        assert_eq!(flash.read_block(0x0800_0000, 256).unwrap(), &image[..]);
        assert!(matches!(
            flash.program(0x0800_00F0, &[0u8; 32]),
            Err(Error::MemoryBounds { .. })
        ));
    }

    #[test]
    fn ram_aligned_round_trip() {
        let mut ram = RamMemory::new(AddressRange::new(0x2000_0000, 0x1000), "SRAM");
        ram.write(0x2000_0010, 4, 0xDEAD_BEEF).unwrap();
        assert_eq!(ram.read(0x2000_0010, 4).unwrap(), 0xDEAD_BEEF);
        assert_eq!(ram.read(0x2000_0010, 1).unwrap(), 0xEF);
        assert_eq!(ram.read(0x2000_0013, 1).unwrap(), 0xDE);
    }

    #[test]
    fn ram_reset_zeroes() {
        let mut ram = RamMemory::new(AddressRange::new(0x2000_0000, 0x10), "SRAM");
        ram.write(0x2000_0000, 4, 0xFFFF_FFFF).unwrap();
        ram.reset();
        assert_eq!(ram.read(0x2000_0000, 4).unwrap(), 0);
    }

    #[test]
    fn bitband_translate_and_locality() {
        let alias = AddressRange::new(0x2200_0000, 0x0200_0000);
        let target = AddressRange::new(0x2000_0000, 0x10_0000);
        let bb = BitBandRegion::new(alias, target, false);

        let (t, bit) = bb.translate(0x2200_0000 + 12).unwrap();
        assert_eq!(t, 0x2000_0000);
        assert_eq!(bit, 3);
    }
}
