//! STM32-family 16-bit GPIO port, including the atomic BSRR set/reset
//! register.

use crate::error::{Error, Result};
use crate::peripheral::Peripheral;

pub const MODER: u32 = 0x00;
pub const OTYPER: u32 = 0x04;
pub const OSPEEDR: u32 = 0x08;
pub const PUPDR: u32 = 0x0C;
pub const IDR: u32 = 0x10;
pub const ODR: u32 = 0x14;
pub const BSRR: u32 = 0x18;
pub const LCKR: u32 = 0x1C;
pub const AFRL: u32 = 0x20;
pub const AFRH: u32 = 0x24;

pub const PORT_SIZE: u32 = 0x400;

/// One STM32 GPIO port (A, B, C, ...).
pub struct Stm32Gpio {
    name: String,
    moder: u32,
    otyper: u32,
    ospeedr: u32,
    pupdr: u32,
    odr: u32,
    lckr: u32,
    afrl: u32,
    afrh: u32,
    /// When set, IDR reflects this shadow instead of looping back ODR.
    external_input: Option<u32>,
}

impl Stm32Gpio {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            moder: 0,
            otyper: 0,
            ospeedr: 0,
            pupdr: 0,
            odr: 0,
            lckr: 0,
            afrl: 0,
            afrh: 0,
            external_input: None,
        }
    }

    pub fn odr(&self) -> u32 {
        self.odr
    }

    /// Sets a test/environment-driven input shadow that IDR reads from
    /// instead of looping back ODR.
    pub fn set_external_input(&mut self, value: u16) {
        self.external_input = Some(value as u32);
    }

    pub fn clear_external_input(&mut self) {
        self.external_input = None;
    }

    fn idr_value(&self) -> u32 {
        self.external_input.unwrap_or(self.odr) & 0xFFFF
    }
}

fn mask(size: u8) -> u32 {
    if size >= 4 {
        u32::MAX
    } else {
        (1u32 << (8 * size as u32)) - 1
    }
}

impl Peripheral for Stm32Gpio {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u32 {
        PORT_SIZE
    }

    fn read(&mut self, offset: u32, size: u8) -> Result<u32> {
        let m = mask(size);
        let value = match offset {
            MODER => self.moder,
            OTYPER => self.otyper,
            OSPEEDR => self.ospeedr,
            PUPDR => self.pupdr,
            IDR => self.idr_value(),
            ODR => self.odr,
            BSRR => 0, // write-only
            LCKR => self.lckr,
            AFRL => self.afrl,
            AFRH => self.afrh,
            _ => 0,
        };
        Ok(value & m)
    }

    fn write(&mut self, offset: u32, size: u8, value: u32) -> Result<()> {
        let m = mask(size);
        match offset {
            MODER => self.moder = (self.moder & !m) | (value & m),
            OTYPER => self.otyper = (self.otyper & !m) | (value & m),
            OSPEEDR => self.ospeedr = (self.ospeedr & !m) | (value & m),
            PUPDR => self.pupdr = (self.pupdr & !m) | (value & m),
            IDR => { /* read-only: writes dropped */ }
            ODR => self.odr = ((self.odr & !m) | (value & m)) & 0xFFFF,
            BSRR => {
                if size != 4 {
                    return Err(Error::Programming(
                        "BSRR must be written as a 32-bit word".into(),
                    ));
                }
                let set = value & 0xFFFF;
                let reset = (value >> 16) & 0xFFFF;
                self.odr = (self.odr | set) & !reset & 0xFFFF;
            }
            LCKR => self.lckr = (self.lckr & !m) | (value & m),
            AFRL => self.afrl = (self.afrl & !m) | (value & m),
            AFRH => self.afrh = (self.afrh & !m) | (value & m),
            _ => { /* undefined offsets: silently dropped */ }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.moder = 0;
        self.otyper = 0;
        self.ospeedr = 0;
        self.pupdr = 0;
        self.odr = 0;
        self.lckr = 0;
        self.afrl = 0;
        self.afrh = 0;
        self.external_input = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bsrr_set_and_reset_atomically() {
        let mut gpio = Stm32Gpio::new("GPIOA");
        gpio.write(BSRR, 4, 0x0000_0005).unwrap();
        assert_eq!(gpio.read(ODR, 4).unwrap(), 0x0000_0005);

        gpio.write(BSRR, 4, 0x0004_0000).unwrap();
        assert_eq!(gpio.read(ODR, 4).unwrap(), 0x0000_0001);
    }

    #[test]
    fn bsrr_reset_wins_on_overlap() {
        let mut gpio = Stm32Gpio::new("GPIOA");
        gpio.write(ODR, 4, 0x1).unwrap();
        // bit 0 both set and reset: reset must win.
        gpio.write(BSRR, 4, 0x0001_0001).unwrap();
        assert_eq!(gpio.read(ODR, 4).unwrap(), 0);
    }

    #[test]
    fn idr_loopback_default_reflects_odr() {
        let mut gpio = Stm32Gpio::new("GPIOA");
        gpio.write(ODR, 4, 0x42).unwrap();
        assert_eq!(gpio.read(IDR, 4).unwrap(), 0x42);
    }

    #[test]
    fn idr_uses_external_input_when_set() {
        let mut gpio = Stm32Gpio::new("GPIOA");
        gpio.write(ODR, 4, 0x42).unwrap();
        gpio.set_external_input(0x99);
        assert_eq!(gpio.read(IDR, 4).unwrap(), 0x99);
    }

    #[test]
    fn undefined_offset_reads_zero_writes_noop() {
        let mut gpio = Stm32Gpio::new("GPIOA");
        gpio.write(0x100, 4, 0xFF).unwrap();
        assert_eq!(gpio.read(0x100, 4).unwrap(), 0);
    }
}
