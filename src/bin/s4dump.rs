use std::io::{self, Write};

use anyhow::{Context, Result};

use s4tools::dump::{hexdump, DEFAULT_BREAKS};

fn dump_file(out: &mut impl Write, path: &str, width: usize, breaks: usize) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("can't open '{path}'"))?;
    hexdump(out, &bytes, width, breaks)?;
    Ok(())
}

fn main() -> Result<()> {
    s4tools::init_logging(0);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut width = 0;
    let mut breaks = DEFAULT_BREAKS;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let value = match arg.as_str() {
            "-w" | "-b" => args.next(),
            _ => None,
        };
        match (arg.as_str(), value) {
            ("-w", Some(value)) => width = value.parse().unwrap_or(0),
            ("-b", Some(value)) => breaks = value.parse().unwrap_or(0),
            ("-h", _) => {
                println!("Usage: s4dump [-w width] [-b breaks] file ...");
                return Ok(());
            }
            _ => {
                if let Err(e) = dump_file(&mut out, &arg, width, breaks) {
                    writeln!(out, "{e:#}")?;
                }
            }
        }
    }
    Ok(())
}
