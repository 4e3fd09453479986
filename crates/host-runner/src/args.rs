//! Command-line parsing.

use std::ffi::OsString;
use std::path::PathBuf;

pub const USAGE_TEXT: &str = "\
Usage: host-runner [options]

Options:
  --disk <path>  Register a disk image (repeatable; indices follow order)
  --rom <path>   Overlay a boot ROM image onto the built-in ROM
  --debug        Log every processor fault and per-tick budget decisions
  --headless     Run without a window; redraws are skipped
  -h, --help     Show this help message

Examples:
  host-runner --disk system.img
  host-runner --headless --rom custom.rom --disk a.img --disk b.img
";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub disks: Vec<PathBuf>,
    pub rom: Option<PathBuf>,
    pub debug: bool,
    pub headless: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    Run(RunOptions),
    Help,
}

#[allow(clippy::while_let_on_iterator)]
pub fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut options = RunOptions::default();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }

        if arg == "--debug" {
            options.debug = true;
            continue;
        }

        if arg == "--headless" {
            options.headless = true;
            continue;
        }

        if arg == "--disk" {
            let path = args
                .next()
                .ok_or_else(|| "no disk image specified".to_string())?;
            options.disks.push(PathBuf::from(path));
            continue;
        }

        if arg == "--rom" {
            let path = args
                .next()
                .ok_or_else(|| "no rom image specified".to_string())?;
            options.rom = Some(PathBuf::from(path));
            continue;
        }

        return Err(format!("unrecognized option: {}", arg.to_string_lossy()));
    }

    Ok(ParseResult::Run(options))
}
