use std::fs::File;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use s4tools::structs::SECTOR_SIZE;
use s4tools::volume::{Volume, VolumeOptions};

const USAGE: &str = "usage: s4import -i fsfile -o volimage [-d]

-i fsfile           filesystem image to import
-o volfile          volume file to modify

-d                  increase debug output";

fn run(args: Vec<String>) -> Result<()> {
    let mut fsfile = None;
    let mut volfile = None;
    let mut debug = 0;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-i" => fsfile = args.next(),
            "-o" => volfile = args.next(),
            "-d" => debug += 1,
            _ => bail!(USAGE),
        }
    }
    s4tools::init_logging(debug);
    let (Some(fsfile), Some(volfile)) = (fsfile, volfile) else {
        bail!(USAGE);
    };

    let mut volume = Volume::open(&volfile, true, &VolumeOptions::from_env())
        .with_context(|| format!("Can't open volume file {volfile}"))?;
    let partition = volume.fs_partition;
    println!("Volume file to update: {volfile}");
    println!("Filesystem image file: {fsfile}");
    println!("using partition {partition}");
    println!("Output volume is {}", if volume.floppy { "floppy" } else { "HD" });

    let mut image = File::open(&fsfile)
        .with_context(|| format!("Can't open filesystem image '{fsfile}' for read"))?;
    let len = image.metadata()?.len();
    let avail = volume.partition_sectors(partition)? as u64;
    if len.div_ceil(SECTOR_SIZE as u64) > avail {
        bail!(
            "Filesytem {}k is too big for the partition of {}k",
            len.div_ceil(1024),
            avail * SECTOR_SIZE as u64 / 1024
        );
    }
    volume
        .import(partition, 0, &mut image)
        .context("Error in import")?;
    volume.flush()?;
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
