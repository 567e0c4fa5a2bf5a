//! Board configuration schema for the virtual hardware simulator.
//!
//! This crate has no dependency on the emulator engine itself — it only
//! describes the shape of a board's configuration record (memory layout,
//! GPIO wiring, sysctl registers, pin aliases, NVIC table) and how to load
//! one from disk. [`vhsim-core`](https://docs.rs/vhsim-core) consumes
//! [`BoardConfig`] to build a running board.

mod config;
mod error;
mod range;

pub use config::{
    load_config, load_config_from_yaml_str, BoardConfig, GpioConfig, GpioKind, GpioOffsets,
    MemoryConfig, NvicConfig, PinsConfig, SysCtlConfig, UtilConfig,
};
pub use error::ConfigError;
pub use range::AddressRange;
