//! `vhsim`: constructs a board from its bundled or overridden
//! configuration, loads a firmware image into flash, and serves the
//! debug protocol over TCP until the process is terminated.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vhsim_debug::DebugSession;

/// Launches a virtual hardware board and exposes it over the debug
/// protocol.
#[derive(Parser, Debug)]
#[command(name = "vhsim", version, about)]
struct Cli {
    /// Board family to construct (e.g. "stm32f4", "tm4c123").
    #[arg(long)]
    board: String,

    /// Path to a raw firmware binary loaded into flash at offset 0.
    #[arg(long)]
    firmware: PathBuf,

    /// Debug server bind address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Debug server bind port.
    #[arg(long, default_value_t = 3333)]
    port: u16,

    /// Board configuration file overriding the bundled default
    /// (YAML, TOML, or JSON, inferred from extension).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity: error, warn, info, debug, or trace.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Increase verbosity; repeatable. Overrides `--log-level` upward.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity; repeatable. Overrides `--log-level` downward.
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    quiet: u8,
}

impl Cli {
    fn effective_log_level(&self) -> String {
        const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
        let base = LEVELS
            .iter()
            .position(|l| *l == self.log_level.to_lowercase())
            .unwrap_or(2) as i32;
        let shifted = (base + self.verbose as i32 - self.quiet as i32)
            .clamp(0, LEVELS.len() as i32 - 1) as usize;
        LEVELS[shifted].to_string()
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.effective_log_level());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let registry = vhsim_core::default_registry().context("failed to build board registry")?;
    let mut board = registry
        .create(&cli.board, cli.config.as_deref())
        .with_context(|| format!("failed to construct board '{}'", cli.board))?;

    let image = std::fs::read(&cli.firmware)
        .with_context(|| format!("failed to read firmware image '{}'", cli.firmware.display()))?;
    board
        .load_firmware(&image)
        .context("failed to load firmware image into flash")?;

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address '{}:{}'", cli.host, cli.port))?;

    let session = Arc::new(DebugSession::new(board));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime
        .block_on(vhsim_debug::serve(addr, session))
        .context("debug server exited with an error")?;

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verbosity_shifts_log_level_up_and_down() {
        let mut cli = Cli {
            board: "stm32f4".into(),
            firmware: PathBuf::from("fw.bin"),
            host: "127.0.0.1".into(),
            port: 3333,
            config: None,
            log_level: "info".into(),
            verbose: 0,
            quiet: 0,
        };
        assert_eq!(cli.effective_log_level(), "info");
        cli.verbose = 2;
        assert_eq!(cli.effective_log_level(), "trace");
        cli.verbose = 0;
        cli.quiet = 5;
        assert_eq!(cli.effective_log_level(), "error");
    }
}
