use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use log::{info, warn};

use s4tools::filesystem::Filesystem;
use s4tools::fsck::{self, Options};
use s4tools::volume::VolumeOptions;
use s4tools::{mounted, signal, Error};

/// Exit status after a termination signal
const INTERRUPTED: u8 = 4;
/// Exit status of a filesystem that could not be checked
const FAILED: u8 = 8;

const USAGE: &str = "usage: s4fsck [-y|-n] [-q] [-f] [-D] [-d] [-s|-S[cyl:step]] [-t scratch] filesystem ...";

fn check_one(
    target: &str,
    options: &Options,
    volume_options: &VolumeOptions,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<u8> {
    if mounted::is_mounted(target) {
        if !options.no {
            writeln!(out, "{target} is a mounted file system, ignored")?;
            return Ok(FAILED);
        }
        warn!("{target} is mounted, checking without writes");
    }

    let mut fs = match Filesystem::open(target, options.writable(), volume_options) {
        Err(Error::Open { .. }) if options.writable() => {
            info!("Opening {target} read-only");
            Filesystem::open(target, false, volume_options)
        }
        opened => opened,
    }
    .with_context(|| format!("Can't open {target}"))?;

    match fsck::check(&mut fs, target, options, input, out) {
        Ok(_) => Ok(0),
        Err(Error::Interrupted(signal)) => {
            info!("Signal {signal}, flushing {target}");
            fs.flush().with_context(|| format!("flushing {target}"))?;
            Ok(INTERRUPTED)
        }
        Err(e) => {
            fs.discard();
            writeln!(out, "{e}")?;
            Ok(FAILED)
        }
    }
}

fn main() -> ExitCode {
    let (options, targets) = match Options::parse(std::env::args().skip(1)) {
        Ok(parsed) => parsed,
        Err(e) => {
            println!("{e}");
            return ExitCode::from(FAILED);
        }
    };
    s4tools::init_logging(options.debug);
    if targets.is_empty() {
        println!("{USAGE}");
        return ExitCode::from(FAILED);
    }
    signal::install();

    let volume_options = VolumeOptions::from_env();
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut status = 0;
    for target in &targets {
        let code = match check_one(target, &options, &volume_options, &mut input, &mut out) {
            Ok(code) => code,
            Err(e) => {
                let _ = writeln!(out, "{e:#}");
                FAILED
            }
        };
        if code == INTERRUPTED {
            let _ = out.flush();
            return ExitCode::from(INTERRUPTED);
        }
        status = status.max(code);
    }
    let _ = out.flush();
    ExitCode::from(status)
}
