use std::io;

use anyhow::{bail, Context, Result};

use s4tools::explorer::Explorer;
use s4tools::filesystem::Filesystem;
use s4tools::structs::BLOCK_SIZE;
use s4tools::volume::VolumeOptions;

fn main() -> Result<()> {
    s4tools::init_logging(0);
    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: s4fs fsfile");
    };
    println!("Filesystem image {path}");
    let fs = Filesystem::open(&path, false, &VolumeOptions::from_env())
        .with_context(|| format!("Failed as filesystem image {path}"))?;
    println!("Opened OK, FS block size is {BLOCK_SIZE}");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut explorer = Explorer::new(fs);
    explorer.run(&mut stdin.lock(), &mut stdout.lock())?;
    Ok(())
}
