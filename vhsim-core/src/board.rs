//! Board composition (C7): assembling the address space, CPU,
//! peripherals, clock, and interrupt controller from a configuration
//! record into one running machine, plus the process-wide board
//! registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address_space::{AddressSpace, MemoryMapEntry};
use crate::clock::Clock;
use crate::cpu::{CortexM, CpuSnapshot, Engine};
use crate::error::{Error, Result};
use crate::interrupt::InterruptController;
use crate::peripheral::Peripheral;

/// A named, size-bounded read/write/reset/tick memory access model for
/// introspection tools (the direct-offset model for STM32, the
/// bit-banded model for TM4C).
pub trait MemoryAccessModel: Send {
    fn describe(&self) -> &str;
}

pub struct DirectAccessModel {
    description: String,
}

impl DirectAccessModel {
    pub fn new(gpio_base: u32) -> Self {
        Self {
            description: format!("direct register offset mapping from base {gpio_base:#010x}"),
        }
    }
}

impl MemoryAccessModel for DirectAccessModel {
    fn describe(&self) -> &str {
        &self.description
    }
}

pub struct BitBandedAccessModel {
    description: String,
}

impl BitBandedAccessModel {
    pub fn new(bitband_base: u32) -> Self {
        Self {
            description: format!("bit-banded access via alias base {bitband_base:#010x}"),
        }
    }
}

impl MemoryAccessModel for BitBandedAccessModel {
    fn describe(&self) -> &str {
        &self.description
    }
}

/// A fully-assembled, runnable machine.
pub struct Board {
    name: String,
    address_space: Arc<Mutex<AddressSpace>>,
    cpu: CortexM<Box<dyn Engine>>,
    clock: Clock,
    interrupt_ctrl: Arc<InterruptController>,
    peripherals: HashMap<String, u32>, // name -> base address, for introspection
    memory_access_model: Box<dyn MemoryAccessModel>,
}

impl Board {
    pub fn new(
        name: impl Into<String>,
        address_space: AddressSpace,
        mut engine: Box<dyn Engine>,
        clock_frequency: u64,
        memory_access_model: Box<dyn MemoryAccessModel>,
    ) -> Result<Self> {
        let name = name.into();
        let mmio_range = address_space.mmio_range();
        let flash_range = address_space.flash().range();
        let sram_range = address_space.sram().range();

        engine.map(flash_range.base, flash_range.size)?;
        engine.map(sram_range.base, sram_range.size)?;
        engine.map(mmio_range.base, mmio_range.size)?;

        let address_space = Arc::new(Mutex::new(address_space));
        let mut cpu = CortexM::new(engine, address_space.clone());
        cpu.install_mmio_hook(mmio_range.base, mmio_range.end())?;

        let clock = Clock::new(clock_frequency)?;
        let interrupt_ctrl = Arc::new(InterruptController::new());
        interrupt_ctrl.attach_cpu(cpu.interrupt_sink());

        tracing::info!(board = %name, "board constructed");

        Ok(Self {
            name,
            address_space,
            cpu,
            clock,
            interrupt_ctrl,
            peripherals: HashMap::new(),
            memory_access_model,
        })
    }

    pub fn register_peripheral(
        &mut self,
        base: u32,
        size: u32,
        mut peripheral: Box<dyn Peripheral>,
    ) -> Result<()> {
        let name = peripheral.name().to_string();
        peripheral.attach_interrupt_controller(self.interrupt_ctrl.clone());
        self.address_space
            .lock()
            .register_peripheral(base, size, peripheral)?;
        self.peripherals.insert(name, base);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base address of the named peripheral, if one is registered.
    pub fn peripheral_base(&self, name: &str) -> Option<u32> {
        self.peripherals.get(name).copied()
    }

    /// Names of every registered peripheral.
    pub fn peripheral_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peripherals.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn cpu(&self) -> &CortexM<Box<dyn Engine>> {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut CortexM<Box<dyn Engine>> {
        &mut self.cpu
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn interrupt_ctrl(&self) -> &Arc<InterruptController> {
        &self.interrupt_ctrl
    }

    pub fn memory_access_model(&self) -> &dyn MemoryAccessModel {
        self.memory_access_model.as_ref()
    }

    pub fn snapshot(&self) -> Result<CpuSnapshot> {
        self.cpu.snapshot()
    }

    pub fn get_memory_map(&self) -> Vec<MemoryMapEntry> {
        self.address_space.lock().get_memory_map()
    }

    pub fn load_firmware(&mut self, image: &[u8]) -> Result<()> {
        tracing::info!(board = %self.name, bytes = image.len(), "loading firmware image");
        self.address_space.lock().flash_mut().load_image(image)?;
        self.reset()
    }

    /// Resets region state, the CPU (re-reading the vector table),
    /// clock, and pending interrupts.
    pub fn reset(&mut self) -> Result<()> {
        self.address_space.lock().reset();
        self.cpu.reset()?;
        self.clock.reset();
        self.interrupt_ctrl.reset();
        tracing::info!(board = %self.name, "board reset");
        Ok(())
    }

    /// Advances the board by `cycles` clock ticks. The CPU itself does
    /// not subscribe to the clock for cycle-accurate timing (see
    /// non-goals); clocked peripherals subscribe through the address
    /// space's own `tick`.
    pub fn step(&mut self, cycles: u64) {
        self.clock.tick(cycles, &mut []);
        self.address_space.lock().tick(cycles);
    }

    pub fn read(&mut self, addr: u32, size: u8) -> Result<u32> {
        self.address_space.lock().read(addr, size)
    }

    pub fn write(&mut self, addr: u32, size: u8, value: u32) -> Result<()> {
        self.address_space.lock().write(addr, size, value)
    }

    pub fn read_block(&self, addr: u32, len: u32) -> Result<Vec<u8>> {
        self.address_space.lock().read_block(addr, len)
    }

    pub fn write_block(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.address_space.lock().write_block(addr, bytes)
    }

    /// Bulk memory read for the debug protocol: byte-by-byte through
    /// the address space inside the MMIO window (to preserve register
    /// read side effects), directly from the execution engine
    /// elsewhere (flash/RAM, where the engine holds the live copy).
    pub fn debug_read_mem(&mut self, addr: u32, len: u32) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let in_mmio = self.address_space.lock().mmio_range().contains_point(addr);
        if in_mmio {
            let mut bytes = Vec::with_capacity(len as usize);
            for i in 0..len {
                bytes.push(self.read(addr + i, 1)? as u8);
            }
            Ok(bytes)
        } else {
            self.cpu.read_engine_mem(addr, len)
        }
    }

    /// Bulk memory write for the debug protocol: byte-by-byte through
    /// the address space inside the MMIO window; into flash, programs
    /// `data` at `addr` without disturbing the rest of flash, then
    /// mirrors it into the engine; into RAM, writes the bytes and
    /// mirrors them into the engine. Anything else falls back to a
    /// byte-by-byte address-space write for a clear bounds or alignment
    /// error.
    pub fn debug_write_mem(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len() as u32;
        let (in_mmio, in_flash, in_sram) = {
            let space = self.address_space.lock();
            (
                space.mmio_range().contains_point(addr),
                space.flash().range().contains_range(addr, len),
                space.sram().range().contains_range(addr, len),
            )
        };
        if in_mmio {
            for (i, byte) in data.iter().enumerate() {
                self.write(addr + i as u32, 1, *byte as u32)?;
            }
            return Ok(());
        }
        if in_flash {
            self.write_block(addr, data)?;
            return self.cpu.mirror_engine_mem(addr, data);
        }
        if in_sram {
            self.write_block(addr, data)?;
            return self.cpu.mirror_engine_mem(addr, data);
        }
        for (i, byte) in data.iter().enumerate() {
            self.write(addr + i as u32, 1, *byte as u32)?;
        }
        Ok(())
    }

    pub fn address_space(&self) -> &Arc<Mutex<AddressSpace>> {
        &self.address_space
    }
}

type BoardFactory = Box<dyn Fn(Option<&std::path::Path>) -> Result<Board> + Send + Sync>;

/// Process-wide, populated-once, read-only-thereafter map from board
/// name to a zero-argument factory, mirroring the source tree's board
/// discovery module.
#[derive(Default)]
pub struct BoardRegistry {
    factories: HashMap<String, BoardFactory>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: BoardFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Programming(format!(
                "board '{name}' already registered"
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn create(&self, name: &str, config_path: Option<&std::path::Path>) -> Result<Board> {
        match self.factories.get(name) {
            Some(factory) => factory(config_path),
            None => Err(Error::Configuration(vhsim_target::ConfigError::UnknownBoard {
                name: name.to_string(),
                available: self.list_boards(),
            })),
        }
    }

    pub fn list_boards(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_board_lists_available() {
        let mut registry = BoardRegistry::new();
        registry
            .register(
                "demo",
                Box::new(|_path| {
                    Err(Error::Runtime("not constructed in this test".into()))
                }),
            )
            .unwrap();

        let err = registry.create("bogus", None).unwrap_err();
        match err {
            Error::Configuration(vhsim_target::ConfigError::UnknownBoard { available, .. }) => {
                assert_eq!(available, vec!["demo".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = BoardRegistry::new();
        registry
            .register("demo", Box::new(|_| Err(Error::Runtime("x".into()))))
            .unwrap();
        assert!(registry
            .register("demo", Box::new(|_| Err(Error::Runtime("x".into()))))
            .is_err());
    }
}
