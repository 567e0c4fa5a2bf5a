//! TM4C123 (Tiva C) LaunchPad-style board: Cortex-M4, masked-DATA GPIO
//! windows, RCGC system control.

use std::path::Path;
use std::sync::Arc;

use crate::board::{Board, BitBandedAccessModel};
use crate::error::Result;
use crate::peripheral::Peripheral;
use crate::peripherals::{SysCtl, Tm4cGpio};

const DEFAULT_CONFIG: &str = include_str!("tm4c123.yaml");
const CLOCK_FREQUENCY_HZ: u64 = 16_000_000;

pub(super) fn create(path: Option<&Path>) -> Result<Board> {
    let cfg = super::resolve_config("tm4c123", DEFAULT_CONFIG, path)?;

    if cfg.gpio.kind != vhsim_target::GpioKind::Tm4c {
        return Err(crate::error::Error::Configuration(
            vhsim_target::ConfigError::InvalidSchema(format!(
                "tm4c123 board requires a tm4c gpio config, got {:?}",
                cfg.gpio.kind
            )),
        ));
    }

    let data_mask = super::pin_data_mask(&cfg)?;

    let address_space = super::build_address_space(&cfg.memory);
    let engine = super::build_engine()?;

    let gpio_base = cfg
        .gpio
        .ports
        .values()
        .min()
        .copied()
        .unwrap_or(0x4000_4000);
    let access_model = Box::new(BitBandedAccessModel::new(gpio_base));

    let mut board = Board::new(
        "tm4c123",
        address_space,
        engine,
        CLOCK_FREQUENCY_HZ,
        access_model,
    )?;

    let mut port_names: Vec<&String> = cfg.gpio.ports.keys().collect();
    port_names.sort();
    for port_name in port_names {
        let base = cfg.gpio.ports[port_name];
        let gpio = Tm4cGpio::new(format!("GPIO_{port_name}"), data_mask);
        board.register_peripheral(base, crate::peripherals::tm4c_gpio::PORT_SIZE, Box::new(gpio))?;
    }

    let sysctl = SysCtl::new(&cfg.sysctl, "SYSCTL");
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
        let cfg = super::super::resolve_config("tm4c123", DEFAULT_CONFIG, None)
            .expect("bundled tm4c123 config should parse");
        assert_eq!(cfg.gpio.kind, vhsim_target::GpioKind::Tm4c);
        assert!(!cfg.gpio.ports.is_empty());
    }
}
