//! STM32F4 Discovery-style board: Cortex-M4, direct-offset GPIO, RCC.

use std::path::Path;
use std::sync::Arc;

use crate::board::{Board, DirectAccessModel};
use crate::error::Result;
use crate::peripheral::Peripheral;
use crate::peripherals::{Stm32Gpio, SysCtl};

const DEFAULT_CONFIG: &str = include_str!("stm32f4.yaml");
const CLOCK_FREQUENCY_HZ: u64 = 16_000_000;

pub(super) fn create(path: Option<&Path>) -> Result<Board> {
    let cfg = super::resolve_config("stm32f4", DEFAULT_CONFIG, path)?;

    if cfg.gpio.kind != vhsim_target::GpioKind::Stm32 {
        return Err(crate::error::Error::Configuration(
            vhsim_target::ConfigError::InvalidSchema(format!(
                "stm32f4 board requires an stm32 gpio config, got {:?}",
                cfg.gpio.kind
            )),
        ));
    }

    let address_space = super::build_address_space(&cfg.memory);
    let engine = super::build_engine()?;

    let gpio_base = cfg
        .gpio
        .ports
        .values()
        .min()
        .copied()
        .unwrap_or(0x4002_0000);
    let access_model = Box::new(DirectAccessModel::new(gpio_base));

    let mut board = Board::new(
        "stm32f4",
        address_space,
        engine,
        CLOCK_FREQUENCY_HZ,
        access_model,
    )?;

    let mut port_names: Vec<&String> = cfg.gpio.ports.keys().collect();
    port_names.sort();
    for port_name in port_names {
        let base = cfg.gpio.ports[port_name];
        let gpio = Stm32Gpio::new(format!("GPIO_{port_name}"));
        board.register_peripheral(base, crate::peripherals::stm32_gpio::PORT_SIZE, Box::new(gpio))?;
    }

    let sysctl = SysCtl::new(&cfg.sysctl, "RCC");
    board.register_peripheral(cfg.sysctl.base, sysctl.size(), Box::new(sysctl))?;

    let interrupt_ctrl = Arc::clone(board.interrupt_ctrl());
    for port_name in cfg.gpio.ports.keys() {
        interrupt_ctrl.subscribe(format!("GPIO_{port_name}"));
    }

    Ok(board)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bundled_default_config_loads() {
        let cfg = super::super::resolve_config("stm32f4", DEFAULT_CONFIG, None)
            .expect("bundled stm32f4 config should parse");
        assert_eq!(cfg.gpio.kind, vhsim_target::GpioKind::Stm32);
        assert!(!cfg.gpio.ports.is_empty());
    }
}
