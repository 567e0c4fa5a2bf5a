//! Board configuration schema and loader.
//!
//! Mirrors the layered record the original Python simulator loaded from a
//! per-board YAML file (`memory` / `util` / `gpio` / `sysctl` / `pins` /
//! `nvic`), but accepts YAML, TOML, or JSON through `figment` and allows
//! environment-variable overrides on top of the file.

use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub flash_base: u32,
    pub flash_size: u32,
    pub sram_base: u32,
    pub sram_size: u32,
    pub periph_base: u32,
    pub periph_size: u32,
    pub bitband_sram_base: u32,
    pub bitband_sram_size: u32,
    pub bitband_periph_base: u32,
    pub bitband_periph_size: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UtilConfig {
    pub mask_32bit: u32,
    pub mask_8bit: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpioOffsets {
    pub data: u32,
    pub dir: u32,
    pub den: u32,
    pub lock: u32,
    pub cr: u32,
    pub icr: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    pub kind: GpioKind,
    pub ports: HashMap<String, u32>,
    pub offsets: GpioOffsets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioKind {
    Stm32,
    Tm4c,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysCtlConfig {
    pub base: u32,
    pub registers: HashMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinsConfig {
    pub pin_masks: HashMap<String, u32>,
    pub leds: HashMap<String, u32>,
    #[serde(default)]
    pub switches: HashMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NvicConfig {
    #[serde(default)]
    pub irq: HashMap<String, u32>,
    #[serde(default = "default_irq_offset")]
    pub irq_offset: u32,
}

fn default_irq_offset() -> u32 {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    pub memory: MemoryConfig,
    pub util: UtilConfig,
    pub gpio: GpioConfig,
    pub sysctl: SysCtlConfig,
    pub pins: PinsConfig,
    #[serde(default)]
    pub nvic: NvicConfig,
}

/// Loads a board configuration from `path`, layering `VHSIM_<BOARD>_`
/// environment variable overrides on top of the file contents.
///
/// The file format is inferred from its extension (`.yaml`/`.yml`,
/// `.toml`, or `.json`); anything else is rejected as a configuration
/// error.
pub fn load_config(board_name: &str, path: &Path) -> Result<BoardConfig, ConfigError> {
    let mut figment = Figment::new();

    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            figment = figment.merge(Yaml::file(path));
        }
        Some("toml") => {
            figment = figment.merge(Toml::file(path));
        }
        Some("json") => {
            figment = figment.merge(Json::file(path));
        }
        other => {
            return Err(ConfigError::InvalidSchema(format!(
                "unsupported config file extension: {other:?}"
            )))
        }
    }

    finish_loading(board_name, figment)
}

/// Loads a board configuration from an in-memory YAML document (used
/// to load each board's bundled default configuration), layering
/// `VHSIM_<BOARD>_` environment variable overrides on top.
pub fn load_config_from_yaml_str(board_name: &str, contents: &str) -> Result<BoardConfig, ConfigError> {
    let figment = Figment::new().merge(Yaml::string(contents));
    finish_loading(board_name, figment)
}

fn finish_loading(board_name: &str, figment: Figment) -> Result<BoardConfig, ConfigError> {
    let env_prefix = format!("VHSIM_{}_", board_name.to_uppercase());
    let figment = figment.merge(Env::prefixed(&env_prefix).split("__"));

    figment
        .extract()
        .map_err(ConfigError::from)
        .and_then(validate)
}

fn validate(cfg: BoardConfig) -> Result<BoardConfig, ConfigError> {
    if cfg.memory.flash_size == 0 {
        return Err(ConfigError::InvalidSchema(
            "memory.flash_size must be non-zero".into(),
        ));
    }
    if cfg.gpio.ports.is_empty() {
        return Err(ConfigError::InvalidSchema(
            "gpio.ports must declare at least one port".into(),
        ));
    }
    Ok(cfg)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn sample_yaml() -> &'static str {
        r#"
memory:
  flash_base: 0x08000000
  flash_size: 0x40000
  sram_base: 0x20000000
  sram_size: 0x20000
  periph_base: 0x40000000
  periph_size: 0x20000
  bitband_sram_base: 0x22000000
  bitband_sram_size: 0x2000000
  bitband_periph_base: 0x42000000
  bitband_periph_size: 0x2000000
util:
  mask_32bit: 0xFFFFFFFF
  mask_8bit: 0xFF
gpio:
  kind: stm32
  ports:
    A: 0x40020000
  offsets:
    data: 0x14
    dir: 0x00
    den: 0x00
    lock: 0x1C
    cr: 0x00
    icr: 0x00
sysctl:
  base: 0x40023800
  registers:
    RCC_AHB1ENR: 0x30
pins:
  pin_masks: {}
  leds: {}
"#
    }

    #[test]
    fn loads_minimal_stm32_config() {
        let dir = std::env::temp_dir().join(format!("vhsim-cfgtest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_yaml().as_bytes()).unwrap();

        let cfg = load_config("stm32f4", &path).expect("config should load");
        assert_eq!(cfg.memory.flash_base, 0x0800_0000);
        assert_eq!(cfg.gpio.kind, GpioKind::Stm32);
        assert_eq!(cfg.gpio.ports["A"], 0x4002_0000);
    }

    #[test]
    fn rejects_missing_gpio_ports() {
        let dir = std::env::temp_dir().join(format!("vhsim-cfgtest2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let bad = sample_yaml().replace("    A: 0x40020000\n", "");
        std::fs::write(&path, bad).unwrap();

        let err = load_config("stm32f4", &path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchema(_)));
    }
}
