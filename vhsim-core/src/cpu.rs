//! CPU integration: a thin bridge over an ARM Thumb execution engine
//! (`unicorn-engine`), reset-from-vector-table boot, and the MMIO hook
//! that routes trapped accesses back through the address space.

use std::sync::Arc;

use parking_lot::Mutex;
use unicorn_engine::unicorn_const::{Arch, HookType, MemType, Mode, Permission};
use unicorn_engine::{RegisterARM, Unicorn};

use crate::address_space::AddressSpace;
use crate::error::{Error, Result};
use crate::interrupt::{InterruptEvent, InterruptTarget};

const THUMB_BIT: u32 = 0x0100_0000; // T bit in XPSR

/// The sixteen core integer registers plus the banked/derived ones a
/// debugger cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreRegister {
    /// General-purpose register 0-12, SP (13), LR (14), PC (15).
    General(u8),
    Xpsr,
    Msp,
}

/// A read-only view of CPU state, produced on demand for debug
/// observers.
#[derive(Debug, Clone)]
pub struct CpuSnapshot {
    pub registers: [u32; 16],
    pub xpsr: u32,
    pub msp: u32,
    pub negative: bool,
    pub zero: bool,
    pub carry: bool,
    pub overflow: bool,
    pub saturation: bool,
    pub thumb: bool,
}

impl CpuSnapshot {
    fn from_xpsr(registers: [u32; 16], xpsr: u32, msp: u32) -> Self {
        Self {
            registers,
            xpsr,
            msp,
            negative: xpsr & (1 << 31) != 0,
            zero: xpsr & (1 << 30) != 0,
            carry: xpsr & (1 << 29) != 0,
            overflow: xpsr & (1 << 28) != 0,
            saturation: xpsr & (1 << 27) != 0,
            thumb: xpsr & (1 << 24) != 0,
        }
    }
}

/// A memory access forwarded from the engine's MMIO hook, used by the
/// debug session to detect watchpoint hits.
#[derive(Debug, Clone, Copy)]
pub struct TrappedAccess {
    pub address: u32,
    pub size: u8,
    pub is_write: bool,
}

/// Abstraction over the Thumb execution engine so `CortexM`'s
/// reset/step/snapshot logic can be tested without the real Unicorn
/// shared library.
pub trait Engine: Send {
    fn map(&mut self, base: u32, size: u32) -> Result<()>;
    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()>;
    fn read_bytes(&mut self, addr: u32, len: u32) -> Result<Vec<u8>>;
    fn set_reg(&mut self, reg: CoreRegister, value: u32) -> Result<()>;
    fn get_reg(&self, reg: CoreRegister) -> Result<u32>;
    fn install_mmio_hook(
        &mut self,
        begin: u32,
        end: u32,
        address_space: Arc<Mutex<AddressSpace>>,
        trace: Arc<Mutex<Option<TrappedAccess>>>,
        mem_error: Arc<Mutex<Option<Error>>>,
    ) -> Result<()>;
    /// Executes exactly one instruction at the current PC.
    fn run_one(&mut self) -> Result<()>;
}

fn round_up_4k(size: u32) -> u32 {
    size.div_ceil(0x1000) * 0x1000
}

/// Real engine backed by Unicorn's ARM (Cortex-M-compatible Thumb)
/// backend.
pub struct UnicornEngine {
    uc: Unicorn<'static, ()>,
}

impl UnicornEngine {
    pub fn new() -> Result<Self> {
        let uc = Unicorn::new(Arch::ARM, Mode::LITTLE_ENDIAN | Mode::MCLASS)
            .map_err(|e| Error::Runtime(format!("failed to initialize execution engine: {e:?}")))?;
        Ok(Self { uc })
    }
}

impl Engine for UnicornEngine {
    fn map(&mut self, base: u32, size: u32) -> Result<()> {
        self.uc
            .mem_map(base as u64, round_up_4k(size) as usize, Permission::ALL)
            .map_err(|e| Error::Runtime(format!("engine map failed at {base:#010x}: {e:?}")))
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.uc
            .mem_write(addr as u64, bytes)
            .map_err(|e| Error::Runtime(format!("engine write failed at {addr:#010x}: {e:?}")))
    }

    fn read_bytes(&mut self, addr: u32, len: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.uc
            .mem_read(addr as u64, &mut buf)
            .map_err(|e| Error::Runtime(format!("engine read failed at {addr:#010x}: {e:?}")))?;
        Ok(buf)
    }

    fn set_reg(&mut self, reg: CoreRegister, value: u32) -> Result<()> {
        let id = to_unicorn_reg(reg);
        self.uc
            .reg_write(id, value as u64)
            .map_err(|e| Error::Runtime(format!("engine register write failed: {e:?}")))
    }

    fn get_reg(&self, reg: CoreRegister) -> Result<u32> {
        let id = to_unicorn_reg(reg);
        self.uc
            .reg_read(id)
            .map(|v| v as u32)
            .map_err(|e| Error::Runtime(format!("engine register read failed: {e:?}")))
    }

    fn install_mmio_hook(
        &mut self,
        begin: u32,
        end: u32,
        address_space: Arc<Mutex<AddressSpace>>,
        trace: Arc<Mutex<Option<TrappedAccess>>>,
        mem_error: Arc<Mutex<Option<Error>>>,
    ) -> Result<()> {
        self.uc
            .add_mem_hook(
                HookType::MEM_READ | HookType::MEM_WRITE,
                begin as u64,
                end as u64,
                move |uc, mem_type, address, size, value| {
                    let addr = address as u32;
                    let size = size as u8;
                    let mut space = address_space.lock();
                    match mem_type {
                        MemType::READ => match space.read(addr, size) {
                            Ok(observed) => {
                                let bytes = observed.to_le_bytes();
                                let _ = uc.mem_write(address, &bytes[..size as usize]);
                                *trace.lock() = Some(TrappedAccess {
                                    address: addr,
                                    size,
                                    is_write: false,
                                });
                                true
                            }
                            Err(e) => {
                                *mem_error.lock() = Some(e);
                                false
                            }
                        },
                        MemType::WRITE => match space.write(addr, size, value as u32) {
                            Ok(()) => {
                                *trace.lock() = Some(TrappedAccess {
                                    address: addr,
                                    size,
                                    is_write: true,
                                });
                                true
                            }
                            Err(e) => {
                                *mem_error.lock() = Some(e);
                                false
                            }
                        },
                        _ => true,
                    }
                },
            )
            .map_err(|e| Error::Runtime(format!("failed to install MMIO hook: {e:?}")))?;
        Ok(())
    }

    fn run_one(&mut self) -> Result<()> {
        let pc = self.get_reg(CoreRegister::General(15))?;
        self.uc
            .emu_start(pc as u64, 0, 0, 1)
            .map_err(|e| Error::Runtime(format!("engine fault at {pc:#010x}: {e:?}")))
    }
}

fn to_unicorn_reg(reg: CoreRegister) -> RegisterARM {
    match reg {
        CoreRegister::General(0) => RegisterARM::R0,
        CoreRegister::General(1) => RegisterARM::R1,
        CoreRegister::General(2) => RegisterARM::R2,
        CoreRegister::General(3) => RegisterARM::R3,
        CoreRegister::General(4) => RegisterARM::R4,
        CoreRegister::General(5) => RegisterARM::R5,
        CoreRegister::General(6) => RegisterARM::R6,
        CoreRegister::General(7) => RegisterARM::R7,
        CoreRegister::General(8) => RegisterARM::R8,
        CoreRegister::General(9) => RegisterARM::R9,
        CoreRegister::General(10) => RegisterARM::R10,
        CoreRegister::General(11) => RegisterARM::R11,
        CoreRegister::General(12) => RegisterARM::R12,
        CoreRegister::General(13) => RegisterARM::SP,
        CoreRegister::General(14) => RegisterARM::LR,
        CoreRegister::General(15) | CoreRegister::Msp => RegisterARM::PC,
        CoreRegister::Xpsr => RegisterARM::XPSR,
        CoreRegister::General(n) => unreachable!("invalid core register index {n}"),
    }
}

/// Bridges an [`Engine`] to the board's address space: reset from
/// vector table, single-step execution, and snapshot production.
pub struct CortexM<E: Engine> {
    engine: E,
    address_space: Arc<Mutex<AddressSpace>>,
    last_trap: Arc<Mutex<Option<TrappedAccess>>>,
    last_mem_error: Arc<Mutex<Option<Error>>>,
    msp: u32,
    received_interrupts: Arc<Mutex<Vec<InterruptEvent>>>,
}

/// A lightweight handle the interrupt controller can own and call into
/// without taking ownership of the `CortexM` itself, which stays
/// directly owned by `Board`. Breaks the peripheral/controller/CPU
/// reference cycle the same way peripherals only hold a back-reference
/// to the controller, never the reverse.
struct QueueSink(Arc<Mutex<Vec<InterruptEvent>>>);

impl InterruptTarget for QueueSink {
    fn handle_interrupt(&mut self, event: &InterruptEvent) {
        self.0.lock().push(event.clone());
    }
}

impl<E: Engine> CortexM<E> {
    pub fn new(engine: E, address_space: Arc<Mutex<AddressSpace>>) -> Self {
        Self {
            engine,
            address_space,
            last_trap: Arc::new(Mutex::new(None)),
            last_mem_error: Arc::new(Mutex::new(None)),
            msp: 0,
            received_interrupts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A sink handle suitable for [`InterruptController::attach_cpu`]
    /// that forwards events into this CPU's received-interrupt queue
    /// without requiring the controller to own the `CortexM` itself.
    pub fn interrupt_sink(&self) -> Box<dyn InterruptTarget> {
        Box::new(QueueSink(self.received_interrupts.clone()))
    }

    /// Interrupts delivered to this CPU since the last reset, oldest
    /// first.
    pub fn received_interrupts(&self) -> Vec<InterruptEvent> {
        self.received_interrupts.lock().clone()
    }

    pub fn install_mmio_hook(&mut self, begin: u32, end: u32) -> Result<()> {
        self.engine.install_mmio_hook(
            begin,
            end,
            self.address_space.clone(),
            self.last_trap.clone(),
            self.last_mem_error.clone(),
        )
    }

    /// Drains and returns the most recent trapped MMIO access, if any,
    /// for watchpoint evaluation by the debug session.
    pub fn take_last_trap(&self) -> Option<TrappedAccess> {
        self.last_trap.lock().take()
    }

    /// Reads `len` contiguous bytes directly from the execution
    /// engine's memory. Flash and RAM are mapped as plain memory in
    /// the engine (only the MMIO window is hooked), so the engine,
    /// not the address space's region buffers, is authoritative for
    /// their live content once code has started executing.
    pub fn read_engine_mem(&self, addr: u32, len: u32) -> Result<Vec<u8>> {
        self.engine.read_bytes(addr, len)
    }

    /// Mirrors bytes already applied to the address space's flash/RAM
    /// buffer into the execution engine, so the next fetch or load
    /// sees the update without waiting for the next reset.
    pub fn mirror_engine_mem(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.engine.write_bytes(addr, bytes)
    }

    /// Resets the CPU by re-reading the two-word vector table from the
    /// start of flash and mirroring the flash image into the engine.
    pub fn reset(&mut self) -> Result<()> {
        for i in 0..=12u8 {
            self.engine.set_reg(CoreRegister::General(i), 0)?;
        }
        self.engine.set_reg(CoreRegister::Xpsr, THUMB_BIT)?;

        let (flash_base, flash_bytes, sram_range) = {
            let space = self.address_space.lock();
            let flash_range = space.flash().range();
            let bytes = space.flash().read_block(flash_range.base, flash_range.size)?;
            (flash_range.base, bytes.to_vec(), space.sram().range())
        };

        if flash_bytes.len() < 8 {
            return Err(Error::Runtime(
                "flash image too small to contain a vector table".into(),
            ));
        }
        let msp = u32::from_le_bytes(flash_bytes[0..4].try_into().unwrap());
        let reset_vector = u32::from_le_bytes(flash_bytes[4..8].try_into().unwrap());

        self.engine.write_bytes(flash_base, &flash_bytes)?;

        if !sram_range.contains_point(msp) && msp != sram_range.end() {
            return Err(Error::Runtime(format!(
                "invalid boot configuration: MSP {msp:#010x} is outside RAM"
            )));
        }
        if reset_vector & 1 == 0 {
            return Err(Error::Runtime(format!(
                "invalid boot configuration: reset vector {reset_vector:#010x} is missing the Thumb bit"
            )));
        }

        self.msp = msp;
        self.engine.set_reg(CoreRegister::Msp, msp)?;
        self.engine.set_reg(CoreRegister::General(13), msp)?;
        self.engine.set_reg(CoreRegister::General(15), reset_vector)?;
        self.received_interrupts.lock().clear();
        Ok(())
    }

    /// Reads the current PC without executing anything.
    pub fn pc(&self) -> Result<u32> {
        self.engine.get_reg(CoreRegister::General(15))
    }

    /// Executes exactly one instruction, returning the faulting PC on
    /// error. A memory fault raised by the MMIO hook during the
    /// instruction takes priority over a generic engine error, since it
    /// carries the precise address-space failure.
    pub fn step(&mut self) -> Result<()> {
        let pc = self.pc()?;
        let outcome = self.engine.run_one();
        if let Some(err) = self.last_mem_error.lock().take() {
            return Err(err);
        }
        outcome.map_err(|_| {
            Error::Runtime(format!("engine fault executing instruction at {pc:#010x}"))
        })
    }

    pub fn snapshot(&self) -> Result<CpuSnapshot> {
        let mut registers = [0u32; 16];
        for (i, slot) in registers.iter_mut().enumerate() {
            *slot = self.engine.get_reg(CoreRegister::General(i as u8))?;
        }
        let xpsr = self.engine.get_reg(CoreRegister::Xpsr)?;
        Ok(CpuSnapshot::from_xpsr(registers, xpsr, self.msp))
    }

    pub fn read_reg(&self, index: u8) -> Result<u32> {
        if index > 15 {
            return Err(Error::Programming(format!("invalid register index {index}")));
        }
        self.engine.get_reg(CoreRegister::General(index))
    }

    pub fn write_reg(&mut self, index: u8, value: u32) -> Result<()> {
        if index > 15 {
            return Err(Error::Programming(format!("invalid register index {index}")));
        }
        self.engine.set_reg(CoreRegister::General(index), value)
    }
}

impl<E: Engine> InterruptTarget for CortexM<E> {
    fn handle_interrupt(&mut self, event: &InterruptEvent) {
        // Full vector dispatch into the NVIC/vector table is a future
        // extension; for now interrupts are simply queued for
        // inspection.
        self.received_interrupts.lock().push(event.clone());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::region::{BitBandRegion, FlashMemory, MmioWindow, RamMemory};
    use vhsim_target::AddressRange;

    /// A fake engine recording register writes, used to test reset/step
    /// logic without linking the real Unicorn shared library.
    struct FakeEngine {
        regs: [u32; 18], // 0-15 general, 16=xpsr, 17=msp
        fault_after: Option<u32>,
        steps: u32,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                regs: [0; 18],
                fault_after: None,
                steps: 0,
            }
        }

        fn idx(reg: CoreRegister) -> usize {
            match reg {
                CoreRegister::General(n) => n as usize,
                CoreRegister::Xpsr => 16,
                CoreRegister::Msp => 17,
            }
        }
    }

    impl Engine for FakeEngine {
        fn map(&mut self, _base: u32, _size: u32) -> Result<()> {
            Ok(())
        }
        fn write_bytes(&mut self, _addr: u32, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        fn read_bytes(&mut self, _addr: u32, len: u32) -> Result<Vec<u8>> {
            Ok(vec![0u8; len as usize])
        }
        fn set_reg(&mut self, reg: CoreRegister, value: u32) -> Result<()> {
            self.regs[Self::idx(reg)] = value;
            Ok(())
        }
        fn get_reg(&self, reg: CoreRegister) -> Result<u32> {
            Ok(self.regs[Self::idx(reg)])
        }
        fn install_mmio_hook(
            &mut self,
            _begin: u32,
            _end: u32,
            _address_space: Arc<Mutex<AddressSpace>>,
            _trace: Arc<Mutex<Option<TrappedAccess>>>,
            _mem_error: Arc<Mutex<Option<Error>>>,
        ) -> Result<()> {
            Ok(())
        }
        fn run_one(&mut self) -> Result<()> {
            self.steps += 1;
            if Some(self.steps) == self.fault_after {
                return Err(Error::Runtime("simulated fault".into()));
            }
            self.regs[15] += 2;
            Ok(())
        }
    }

    fn sample_space() -> Arc<Mutex<AddressSpace>> {
        let mut flash = FlashMemory::new(AddressRange::new(0x0800_0000, 0x100));
        let mut image = vec![0u8; 0x100];
        image[0..4].copy_from_slice(&0x2000_1000u32.to_le_bytes());
        image[4..8].copy_from_slice(&0x0800_0101u32.to_le_bytes());
        flash.load_image(&image).unwrap();
        let sram = RamMemory::new(AddressRange::new(0x2000_0000, 0x1000), "SRAM");
        let mmio = MmioWindow::new(AddressRange::new(0x4000_0000, 0x1000));
        let bitband: Vec<BitBandRegion> = Vec::new();
        Arc::new(Mutex::new(AddressSpace::new(flash, sram, mmio, bitband)))
    }

    #[test]
    fn reset_reads_vector_table() {
        let space = sample_space();
        let mut cpu = CortexM::new(FakeEngine::new(), space);
        cpu.reset().unwrap();
        assert_eq!(cpu.pc().unwrap(), 0x0800_0101);
        assert_eq!(cpu.read_reg(13).unwrap(), 0x2000_1000);
    }

    #[test]
    fn reset_rejects_non_thumb_vector() {
        let space = sample_space();
        {
            let mut locked = space.lock();
            locked.flash_mut().load_image(&{
                let mut image = vec![0u8; 0x100];
                image[0..4].copy_from_slice(&0x2000_1000u32.to_le_bytes());
                image[4..8].copy_from_slice(&0x0800_0100u32.to_le_bytes()); // LSB clear
                image
            }).unwrap();
        }
        let mut cpu = CortexM::new(FakeEngine::new(), space);
        assert!(cpu.reset().is_err());
    }

    #[test]
    fn step_advances_pc() {
        let space = sample_space();
        let mut cpu = CortexM::new(FakeEngine::new(), space);
        cpu.reset().unwrap();
        let pc0 = cpu.pc().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.pc().unwrap(), pc0 + 2);
    }

    #[test]
    fn step_surfaces_stashed_mmio_fault_over_generic_engine_error() {
        let space = sample_space();
        let mut cpu = CortexM::new(FakeEngine::new(), space);
        cpu.reset().unwrap();
        *cpu.last_mem_error.lock() = Some(Error::access(0x4000_1000, "no peripheral registered"));
        let err = cpu.step().unwrap_err();
        assert!(err.is_target_fault());
        assert!(matches!(err, Error::MemoryAccess { address: 0x4000_1000, .. }));
    }
}
