use std::fs::File;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use s4tools::filesystem::Filesystem;
use s4tools::volume::{Volume, VolumeOptions};

const USAGE: &str = "usage: s4export -i volfile -o fsfile [-d]";

fn run(args: Vec<String>) -> Result<()> {
    let mut volfile = None;
    let mut fsfile = None;
    let mut debug = 0;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-i" => volfile = args.next(),
            "-o" => fsfile = args.next(),
            "-d" => debug += 1,
            _ => bail!("Unexpected argument or missing value to '{arg}'\n{USAGE}"),
        }
    }
    s4tools::init_logging(debug);
    let (Some(volfile), Some(fsfile)) = (volfile, fsfile) else {
        bail!(USAGE);
    };
    println!("Volume file:   {volfile}");
    println!("FS-image file: {fsfile}");

    let volume = Volume::open(&volfile, false, &VolumeOptions::from_env())
        .with_context(|| format!("opening {volfile}"))?;
    let partition = volume.fs_partition;
    println!("FS is on partition {partition}");
    let fs = Filesystem::from_volume(volume, partition)
        .with_context(|| format!("Can't find filesystem in '{volfile}'"))?;
    let mut volume = fs.into_volume();

    let mut out = File::create(&fsfile).with_context(|| format!("Can't open '{fsfile}' for write"))?;
    let sectors = volume.partition_sectors(partition)?;
    if let Err(e) = volume.export(partition, 0, sectors, &mut out) {
        drop(out);
        let _ = std::fs::remove_file(&fsfile);
        return Err(e).context("Errors exporting filesystem");
    }
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
