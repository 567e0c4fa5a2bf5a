//! The common contract every memory-mapped device implements.

use crate::error::Result;
use crate::interrupt::InterruptController;
use std::sync::Arc;

/// A named owner of a size-bounded offset space.
///
/// `offset` is always relative to the peripheral's own base address;
/// the address space (C4) has already subtracted the base before
/// calling in.
pub trait Peripheral: Send {
    fn name(&self) -> &str;

    fn size(&self) -> u32;

    fn read(&mut self, offset: u32, size: u8) -> Result<u32>;

    fn write(&mut self, offset: u32, size: u8, value: u32) -> Result<()>;

    fn reset(&mut self);

    /// Advances the peripheral by `cycles` clock ticks. Peripherals
    /// without clocked behavior can accept the default no-op.
    fn tick(&mut self, _cycles: u64) {}

    /// Installs the interrupt controller this peripheral should notify
    /// when it wants to raise an interrupt. Peripherals that never
    /// raise interrupts can ignore this.
    fn attach_interrupt_controller(&mut self, _controller: Arc<InterruptController>) {}
}
