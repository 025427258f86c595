use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use log::warn;

use s4tools::merge::{Merger, MAX_IMAGES};

const USAGE: &str = "Usage: s4merge infile ... -o outfile";

fn run(args: Vec<String>) -> Result<()> {
    s4tools::init_logging(args.iter().filter(|a| *a == "-d").count() as u32);
    let mut output = None;
    let mut images = Vec::new();
    let mut args = args.into_iter().peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" if args.peek().is_some() => output = args.next(),
            "-d" => {}
            "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ if images.len() >= MAX_IMAGES => warn!("Ignoring '{arg}', at most {MAX_IMAGES} images"),
            _ => {
                let file = File::open(&arg)
                    .with_context(|| format!("opening input '{arg}' for read"))?;
                images.push((arg, BufReader::new(file)));
            }
        }
    }
    let (Some(output), false) = (output, images.is_empty()) else {
        bail!(USAGE);
    };
    let file = File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&output)
        .with_context(|| format!("opening output '{output}' for write"))?;
    let mut writer = BufWriter::new(file);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let report = Merger::new(images)?
        .run(&mut writer, &mut input, &mut out)
        .with_context(|| format!("writing output '{output}'"))?;
    println!("{} sectors written, {} chosen by hand", report.sectors, report.resolved);
    Ok(())
}

fn main() -> ExitCode {
    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
