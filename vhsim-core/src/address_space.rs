//! The single arbiter mapping any 32-bit address to a region or
//! peripheral (C4).

use vhsim_target::AddressRange;

use crate::error::{Error, Result};
use crate::peripheral::Peripheral;
use crate::region::{BitBandRegion, FlashMemory, MmioWindow, RamMemory};

/// A `(base, size, peripheral)` record installed in the address space.
/// Mappings are kept sorted by base and are disjoint by construction.
struct PeripheralMapping {
    base: u32,
    size: u32,
    name: String,
    peripheral: Box<dyn Peripheral>,
}

impl PeripheralMapping {
    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.base.saturating_add(self.size)
    }

    fn end(&self) -> u32 {
        self.base.saturating_add(self.size)
    }
}

/// An introspection record describing one installed region or
/// peripheral mapping, used by `get_memory_map`.
#[derive(Debug, Clone)]
pub struct MemoryMapEntry {
    pub name: String,
    pub base: u32,
    pub size: u32,
}

fn validate_access(addr: u32, size: u8) -> Result<()> {
    match size {
        1 | 2 | 4 => {}
        other => {
            return Err(Error::Programming(format!(
                "invalid access size: {other}"
            )))
        }
    }
    if size > 1 && addr % size as u32 != 0 {
        return Err(Error::MemoryAlignment { address: addr, size });
    }
    Ok(())
}

pub struct AddressSpace {
    flash: FlashMemory,
    sram: RamMemory,
    mmio: MmioWindow,
    bitband_regions: Vec<BitBandRegion>,
    mappings: Vec<PeripheralMapping>,
}

impl AddressSpace {
    pub fn new(
        flash: FlashMemory,
        sram: RamMemory,
        mmio: MmioWindow,
        bitband_regions: Vec<BitBandRegion>,
    ) -> Self {
        Self {
            flash,
            sram,
            mmio,
            bitband_regions,
            mappings: Vec::new(),
        }
    }

    pub fn flash(&self) -> &FlashMemory {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut FlashMemory {
        &mut self.flash
    }

    pub fn sram(&self) -> &RamMemory {
        &self.sram
    }

    pub fn sram_mut(&mut self) -> &mut RamMemory {
        &mut self.sram
    }

    pub fn mmio_range(&self) -> AddressRange {
        self.mmio.range()
    }

    /// Installs a peripheral at `[base, base + size)`. Rejects zero
    /// size, ranges outside the MMIO window, and overlaps with any
    /// already-registered neighbor.
    pub fn register_peripheral(
        &mut self,
        base: u32,
        size: u32,
        peripheral: Box<dyn Peripheral>,
    ) -> Result<()> {
        if size == 0 {
            return Err(Error::Programming(
                "peripheral mapping size must be non-zero".into(),
            ));
        }
        if !self.mmio.range().contains_range(base, size) {
            return Err(Error::Programming(format!(
                "peripheral mapping {base:#010x}+{size:#x} lies outside the MMIO window"
            )));
        }

        let insert_at = self
            .mappings
            .partition_point(|m| m.base < base);

        if let Some(prev) = insert_at.checked_sub(1).and_then(|i| self.mappings.get(i)) {
            if prev.end() > base {
                return Err(Error::Programming(format!(
                    "peripheral mapping {base:#010x}+{size:#x} overlaps {}",
                    prev.name
                )));
            }
        }
        if let Some(next) = self.mappings.get(insert_at) {
            if base + size > next.base {
                return Err(Error::Programming(format!(
                    "peripheral mapping {base:#010x}+{size:#x} overlaps {}",
                    next.name
                )));
            }
        }

        let name = peripheral.name().to_string();
        self.mappings.insert(
            insert_at,
            PeripheralMapping {
                base,
                size,
                name,
                peripheral,
            },
        );
        Ok(())
    }

    fn find_mapping(&mut self, addr: u32) -> Option<&mut PeripheralMapping> {
        let idx = self.mappings.partition_point(|m| m.base <= addr);
        if idx == 0 {
            return None;
        }
        let candidate = &mut self.mappings[idx - 1];
        if candidate.contains(addr) {
            Some(candidate)
        } else {
            None
        }
    }

    pub fn read(&mut self, addr: u32, size: u8) -> Result<u32> {
        validate_access(addr, size)?;

        if let Some(bb_idx) = self.bitband_index_for(addr) {
            if size != 4 {
                return Err(Error::MemoryAlignment { address: addr, size });
            }
            let (target_addr, bit) = self.bitband_regions[bb_idx].translate(addr)?;
            let is_peripheral = self.bitband_regions[bb_idx].target_is_peripheral();
            let word = if is_peripheral {
                self.read_mmio(target_addr, 4)?
            } else {
                self.sram.read(target_addr, 4)?
            };
            return Ok((word >> bit) & 1);
        }

        if self.flash.range().contains_point(addr) {
            return self.flash.read(addr, size);
        }
        if self.sram.range().contains_point(addr) {
            return self.sram.read(addr, size);
        }
        if self.mmio.range().contains_point(addr) {
            return self.read_mmio(addr, size);
        }
        Err(Error::access(addr, "address is not mapped"))
    }

    pub fn write(&mut self, addr: u32, size: u8, value: u32) -> Result<()> {
        validate_access(addr, size)?;

        if let Some(bb_idx) = self.bitband_index_for(addr) {
            if size != 4 {
                return Err(Error::MemoryAlignment { address: addr, size });
            }
            let (target_addr, bit) = self.bitband_regions[bb_idx].translate(addr)?;
            let is_peripheral = self.bitband_regions[bb_idx].target_is_peripheral();
            let word = if is_peripheral {
                self.read_mmio(target_addr, 4)?
            } else {
                self.sram.read(target_addr, 4)?
            };
            let bit_mask = 1u32 << bit;
            let new_word = if value & 1 != 0 {
                word | bit_mask
            } else {
                word & !bit_mask
            };
            return if is_peripheral {
                self.write_mmio(target_addr, 4, new_word)
            } else {
                self.sram.write(target_addr, 4, new_word)
            };
        }

        if self.flash.range().contains_point(addr) {
            return self.flash.write(addr, size, value);
        }
        if self.sram.range().contains_point(addr) {
            return self.sram.write(addr, size, value);
        }
        if self.mmio.range().contains_point(addr) {
            return self.write_mmio(addr, size, value);
        }
        Err(Error::access(addr, "address is not mapped"))
    }

    fn bitband_index_for(&self, addr: u32) -> Option<usize> {
        self.bitband_regions
            .iter()
            .position(|r| r.alias().contains_point(addr))
    }

    fn read_mmio(&mut self, addr: u32, size: u8) -> Result<u32> {
        match self.find_mapping(addr) {
            Some(mapping) => mapping.peripheral.read(addr - mapping.base, size),
            None => Err(Error::access(addr, "no peripheral registered at address")),
        }
    }

    fn write_mmio(&mut self, addr: u32, size: u8, value: u32) -> Result<()> {
        match self.find_mapping(addr) {
            Some(mapping) => mapping.peripheral.write(addr - mapping.base, size, value),
            None => Err(Error::access(addr, "no peripheral registered at address")),
        }
    }

    pub fn reset(&mut self) {
        self.flash.reset();
        self.sram.reset();
        for mapping in &mut self.mappings {
            mapping.peripheral.reset();
        }
    }

    pub fn tick(&mut self, cycles: u64) {
        for mapping in &mut self.mappings {
            mapping.peripheral.tick(cycles);
        }
    }

    /// Reads a contiguous byte block from flash or RAM only; used to
    /// seed the execution engine and to serve bulk debug reads.
    pub fn read_block(&self, addr: u32, len: u32) -> Result<Vec<u8>> {
        if self.flash.range().contains_range(addr, len) {
            return Ok(self.flash.read_block(addr, len)?.to_vec());
        }
        if self.sram.range().contains_range(addr, len) {
            return Ok(self.sram.read_block(addr, len)?.to_vec());
        }
        Err(Error::bounds(format!(
            "read_block at {addr:#010x}+{len} is not contiguous flash or RAM"
        )))
    }

    pub fn write_block(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        if self.sram.range().contains_range(addr, bytes.len() as u32) {
            return self.sram.write_block(addr, bytes);
        }
        if self.flash.range().contains_range(addr, bytes.len() as u32) {
            return self.flash.program(addr, bytes);
        }
        Err(Error::bounds(format!(
            "write_block at {addr:#010x}+{} is not contiguous flash or RAM",
            bytes.len()
        )))
    }

    /// Introspection view of every installed region and peripheral
    /// mapping, sorted by base address.
    pub fn get_memory_map(&self) -> Vec<MemoryMapEntry> {
        let mut entries = vec![
            MemoryMapEntry {
                name: "flash".into(),
                base: self.flash.range().base,
                size: self.flash.range().size,
            },
            MemoryMapEntry {
                name: self.sram.name().to_string(),
                base: self.sram.range().base,
                size: self.sram.range().size,
            },
            MemoryMapEntry {
                name: "mmio".into(),
                base: self.mmio.range().base,
                size: self.mmio.range().size,
            },
        ];
        for mapping in &self.mappings {
            entries.push(MemoryMapEntry {
                name: mapping.name.clone(),
                base: mapping.base,
                size: mapping.size,
            });
        }
        entries.sort_by_key(|e| e.base);
        entries
    }
}
