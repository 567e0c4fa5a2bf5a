//! Generic SYSCTL/RCC peripheral: a config-driven table of named
//! registers with no enforced clock-gating semantics.

use std::collections::HashMap;

use vhsim_target::SysCtlConfig;

use crate::error::Result;
use crate::peripheral::Peripheral;
use crate::register::{Register, RegisterFile};

fn infer_size(registers: &HashMap<String, u32>) -> u32 {
    let max_offset = registers.values().copied().max().unwrap_or(0);
    let size = max_offset + 4;
    size.div_ceil(0x100) * 0x100
}

pub struct SysCtl {
    name: String,
    size: u32,
    registers: RegisterFile,
}

impl SysCtl {
    pub fn new(cfg: &SysCtlConfig, name: impl Into<String>) -> Self {
        let size = infer_size(&cfg.registers);
        let mut registers = RegisterFile::new();
        for &offset in cfg.registers.values() {
            // Duplicate-named registers with distinct offsets are fine;
            // duplicate offsets would be a config bug and are rejected
            // by RegisterFile::add at construction time.
            if registers.get_mut(offset).is_none() {
                let _ = registers.add(Register::simple(offset, 0));
            }
        }
        Self {
            name: name.into(),
            size,
            registers,
        }
    }
}

impl Peripheral for SysCtl {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn read(&mut self, offset: u32, size: u8) -> Result<u32> {
        self.registers.read(offset, size, 0)
    }

    fn write(&mut self, offset: u32, size: u8, value: u32) -> Result<()> {
        self.registers.write(offset, size, value)
    }

    fn reset(&mut self) {
        self.registers.reset();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cfg() -> SysCtlConfig {
        let mut registers = HashMap::new();
        registers.insert("RCGCGPIO".to_string(), 0x608);
        SysCtlConfig { base: 0x400FE000, registers }
    }

    #[test]
    fn size_rounds_up_to_0x100() {
        let sysctl = SysCtl::new(&cfg(), "SYSCTL");
        assert_eq!(sysctl.size(), 0x700);
    }

    #[test]
    fn read_write_round_trip() {
        let mut sysctl = SysCtl::new(&cfg(), "SYSCTL");
        sysctl.write(0x608, 4, 0x20).unwrap();
        assert_eq!(sysctl.read(0x608, 4).unwrap(), 0x20);
    }
}
