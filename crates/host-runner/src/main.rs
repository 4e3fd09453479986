//! CLI entry point: boots the reference processor and runs the event loop.

mod args;
#[cfg(feature = "window")]
mod window;

use std::env;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use host_core::bus::disk::{DiskController, DiskTable};
use host_core::bus::serial::Serial;
use host_core::{
    BusAdapter, Clock, ConfigError, ExitSignal, HeadlessHost, Host, ReferenceCpu, RomImage,
    Session, SessionConfig, SystemClock,
};
#[cfg(test)]
use tempfile as _;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::args::{parse_args, ParseResult, RunOptions, USAGE_TEXT};

#[derive(Debug, Error)]
enum RunnerError {
    #[error("cannot open disk image {}: {source}", path.display())]
    Disk { path: PathBuf, source: io::Error },
    #[error("invalid session config: {0}")]
    Config(#[from] ConfigError),
    #[cfg(feature = "window")]
    #[error("cannot open window: {0}")]
    Window(#[from] minifb::Error),
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
    {
        eprintln!("warning: logging disabled: {error}");
    }
}

/// Built-in ROM, overlaid with `path` when given. A ROM that cannot be read
/// is logged and the built-in image is kept.
fn load_rom(path: Option<&Path>) -> RomImage {
    let builtin = RomImage::builtin();
    let Some(path) = path else {
        return builtin;
    };

    let mut rom = builtin.clone();
    match File::open(path).and_then(|mut file| rom.overlay(&mut file)) {
        Ok(read) => {
            tracing::info!(path = %path.display(), bytes = read, "using boot ROM");
            rom
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "cannot load boot ROM; using built-in");
            builtin
        }
    }
}

fn drive<H: Host>(
    config: SessionConfig,
    rom: RomImage,
    bus: BusAdapter,
    host: H,
    clock: &mut SystemClock,
) -> Result<ExitSignal, RunnerError> {
    let mut session = Session::new(config, ReferenceCpu::new(rom), bus, host, clock.now_ms())?;
    let exit = session.run_blocking(clock);
    let faults = session.fault_counters();
    tracing::info!(
        ticks = session.timing().tick_count,
        recovered_faults = faults.recovered,
        unrecoverable_faults = faults.unrecoverable,
        "session ended"
    );
    Ok(exit)
}

fn run(options: &RunOptions) -> Result<ExitSignal, RunnerError> {
    let config = SessionConfig {
        debug: options.debug,
        headless: options.headless,
        ..SessionConfig::default()
    };
    config.validate()?;

    let rom = load_rom(options.rom.as_deref());
    let table = DiskTable::open_all(&options.disks)
        .map_err(|(path, source)| RunnerError::Disk { path, source })?;
    let bus = BusAdapter::new(
        Serial::with_writer(Box::new(io::stdout())),
        DiskController::new(table),
    );
    let mut clock = SystemClock::default();

    #[cfg(feature = "window")]
    {
        if !config.headless {
            let host = window::WindowHost::open()?;
            return drive(config, rom, bus, host, &mut clock);
        }
    }

    #[cfg(not(feature = "window"))]
    {
        if !config.headless {
            tracing::warn!("built without the window feature; running headless");
        }
    }

    drive(config, rom, bus, HeadlessHost::default(), &mut clock)
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Run(options)) => {
            init_logging(options.debug);
            match run(&options) {
                Ok(_) => 0,
                Err(error) => {
                    tracing::error!(%error, "startup failed");
                    eprintln!("error: {error}");
                    1
                }
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}
