use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use s4tools::filesystem::Filesystem;
use s4tools::volume::templates::{steal, template_name};
use s4tools::volume::{home_block_dump, Volume, VolumeOptions};
use s4tools::Error;

#[derive(Debug, Default)]
struct Flags {
    filesystem: bool,
    dump: bool,
    steal: bool,
    debug: u32,
}

fn run(args: Vec<String>) -> Result<()> {
    let mut flags = Flags::default();
    let mut device = None;
    for arg in args {
        match arg.as_str() {
            "-fs" => flags.filesystem = true,
            "-dump" => flags.dump = true,
            "-steal" => flags.steal = true,
            "-d" => flags.debug += 1,
            "-h" => {
                println!("Usage: s4disk [-fs][-dump][-steal] volfile");
                return Ok(());
            }
            _ => device = Some(arg),
        }
    }
    s4tools::init_logging(flags.debug);
    let Some(device) = device else {
        bail!("usage: s4disk devicefile");
    };
    println!("Device file {device}");

    let opened = Volume::open(&device, false, &VolumeOptions::from_env());
    if let Err(Error::BadMagic { .. }) = opened {
        if let Ok(dump) = home_block_dump(&device) {
            println!("Unrecognized volume header:");
            print!("{dump}");
        }
    }
    let mut volume = opened.with_context(|| format!("Problem opening '{device}'"))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    volume.show(&mut out)?;

    if flags.filesystem {
        let partition = volume.fs_partition;
        match Filesystem::from_volume(volume, partition) {
            Ok(fs) => {
                writeln!(out, "{}", fs.superblock)?;
                volume = fs.into_volume();
            }
            Err(e) => {
                writeln!(out, "No filesystem in partition {partition}: {e}")?;
                volume = Volume::open(&device, false, &VolumeOptions::from_env())?;
            }
        }
    }

    if flags.dump {
        volume.dump_sectors(&mut out)?;
    }

    if flags.steal {
        let name = template_name(&volume.header, &volume.partitions, volume.floppy);
        let path = format!("{name}.c");
        let source = steal(&volume.header, &name)?;
        std::fs::write(&path, source).with_context(|| format!("can't open '{path}'"))?;
        writeln!(out, "Wrote {path}")?;
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
