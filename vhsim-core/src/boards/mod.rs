//! Concrete board factories (C7) and the bundled default registry.
//!
//! Each submodule owns one board family's wiring plus its bundled
//! default configuration (a YAML document embedded with
//! `include_str!`, mirroring the per-variant `config.yaml` each board
//! directory carried in the source tree this crate emulates).

mod stm32f4;
mod tm4c123;

use std::path::Path;

use vhsim_target::{AddressRange, BoardConfig, MemoryConfig};

use crate::address_space::AddressSpace;
use crate::board::{Board, BoardRegistry};
use crate::cpu::{Engine, UnicornEngine};
use crate::error::Result;
use crate::region::{BitBandRegion, FlashMemory, MmioWindow, RamMemory};

/// Builds a populated `BoardRegistry` with every board family this
/// crate ships registered under its canonical name.
pub fn default_registry() -> Result<BoardRegistry> {
    let mut registry = BoardRegistry::new();
    registry.register("stm32f4", Box::new(stm32f4::create))?;
    registry.register("tm4c123", Box::new(tm4c123::create))?;
    Ok(registry)
}

/// Assembles the flash/SRAM/MMIO regions and the two bit-band alias
/// regions from a memory configuration record.
fn build_address_space(mem: &MemoryConfig) -> AddressSpace {
    let flash = FlashMemory::new(AddressRange::new(mem.flash_base, mem.flash_size));
    let sram = RamMemory::new(AddressRange::new(mem.sram_base, mem.sram_size), "SRAM");
    let mmio = MmioWindow::new(AddressRange::new(mem.periph_base, mem.periph_size));

    let bitband_sram = BitBandRegion::new(
        AddressRange::new(mem.bitband_sram_base, mem.bitband_sram_size),
        AddressRange::new(mem.sram_base, mem.sram_size),
        false,
    );
    let bitband_periph = BitBandRegion::new(
        AddressRange::new(mem.bitband_periph_base, mem.bitband_periph_size),
        AddressRange::new(mem.periph_base, mem.periph_size),
        true,
    );

    AddressSpace::new(flash, sram, mmio, vec![bitband_sram, bitband_periph])
}

/// Creates a real Unicorn-backed engine, boxed as `dyn Engine` for
/// `Board::new`.
fn build_engine() -> Result<Box<dyn Engine>> {
    Ok(Box::new(UnicornEngine::new()?))
}

/// Sums every configured pin mask into the single data mask the
/// GPIO models validate reads/writes against.
fn pin_data_mask(cfg: &BoardConfig) -> Result<u32> {
    let mask = cfg.pins.pin_masks.values().fold(0u32, |acc, m| acc | m);
    if mask == 0 {
        return Err(crate::error::Error::Configuration(
            vhsim_target::ConfigError::InvalidSchema(
                "gpio pin mask is empty; check pins.pin_masks".into(),
            ),
        ));
    }
    Ok(mask)
}

fn resolve_config(
    board_name: &str,
    bundled_default: &str,
    path: Option<&Path>,
) -> Result<BoardConfig> {
    match path {
        Some(path) => vhsim_target::load_config(board_name, path).map_err(Into::into),
        None => vhsim_target::load_config_from_yaml_str(board_name, bundled_default)
            .map_err(Into::into),
    }
}
