use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use s4tools::mkfs::{make_filesystem, Params};
use s4tools::structs::{Endian, BLOCK_SIZE, INODES_PER_BLOCK};

fn run(args: Vec<String>) -> Result<()> {
    let mut args = args.as_slice();
    let mut order = Endian::native();
    let flagged = args
        .first()
        .filter(|a| a.starts_with('-'))
        .and_then(|a| Endian::from_flag(a));
    if let Some(flagged) = flagged {
        order = flagged;
        args = &args[1..];
    }
    let [path, sizing, rest @ ..] = args else {
        bail!("usage: s4mkfs [-be|-le] filsys blocks[:inodes] [gap blocks/cyl]");
    };

    let mut device = std::fs::File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("{path}: cannot create"))?;

    let (sectors, inodes) = Params::parse_size(sizing)?;
    let mut params = Params {
        order,
        inodes,
        ..Params::new(sectors)
    };
    if let [gap, cylinder, ..] = rest {
        params.gap = Some(gap.parse().unwrap_or(0));
        params.cylinder = Some(cylinder.parse().unwrap_or(0));
    }

    let sb = make_filesystem(&mut device, &params).context("mkfs: ERROR making filesystem!!!")?;
    println!(
        "Built {}-endian file system",
        if order == Endian::Big { "big" } else { "little" }
    );
    println!("bytes per logical block = {BLOCK_SIZE}");
    println!("total logical blocks    = {}", sb.fsize);
    println!(
        "total inodes            = {}",
        (sb.isize as u32 - 2) * INODES_PER_BLOCK
    );
    println!("freelist gap            = {}", sb.vinfo[0]);
    println!("freelist cylinder size  = {} ", sb.vinfo[1]);
    let bytes = sb.tfree as f64 * BLOCK_SIZE as f64;
    println!(
        "mkfs: Available blocks  = {}  {:.0}k {:.2}M",
        sb.tfree,
        bytes / 1024.0,
        bytes / 1024.0 / 1024.0
    );
    Ok(())
}

fn main() -> ExitCode {
    s4tools::init_logging(0);
    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
