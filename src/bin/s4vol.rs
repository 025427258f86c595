use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use log::warn;

use s4tools::structs::FLOPPY_FS_PARTITION;
use s4tools::volume::builder::{create, install_filesystem, install_loader, BuildPlan, Source};
use s4tools::volume::{Volume, VolumeOptions};

const USAGE: &str = "\nUsage: s4vol -i ivol -o ovol -io modvol
         -f fs -l loader -h heads -c cyls -s seccyl
         -p pagespace -F -3 -bb -nobb -x -d

-i input-volume         opt: copy source
-o output-volume        opt: show info

-io modify-volume       opt: show info

-f fs-image-file        opt: image to import
-l loader-file          opt: loader to import

-h heads                default: 8
-c cylinders            default: 1400
-s sectors-per-track    default: 17
-p paging-space         default: 4M

-bb                     default: invol or nobb
-nobb                   default: invol
-F                      use 5\" floppy defaults

-3                      use 3-1/4\" floppy defaults

-x                      eXpanded volume output
-d ...                  increase debug output
";

fn run(args: Vec<String>) -> Result<()> {
    let plan = match BuildPlan::parse(args) {
        Ok(plan) => plan,
        Err(e) => bail!("{e}\n{USAGE}"),
    };
    s4tools::init_logging(plan.debug);
    if plan.help {
        println!("{USAGE}");
        return Ok(());
    }
    if plan.fs_partition == FLOPPY_FS_PARTITION {
        println!("Floppy! {} cylinders", plan.cylinders);
    }
    if plan.bad_blocks {
        warn!("Bad block remapping is not written, the output uses physical addressing");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let options = VolumeOptions::from_env();
    let mut input = match &plan.input {
        Some(path) => {
            let volume = Volume::open(path, false, &options).with_context(|| {
                format!(
                    "Can't open {} volume '{}'",
                    if plan.in_place() { "in-out" } else { "input" },
                    path.display()
                )
            })?;
            if plan.explain {
                writeln!(out, "\n\nInformation about input volume '{}':", path.display())?;
                volume.show(&mut out)?;
            }
            Some(volume)
        }
        None => None,
    };

    let layout = plan.consider(input.as_ref())?;
    layout.describe(&mut out)?;
    if !layout.fits() {
        bail!("filesystem does not fit the volume");
    }
    let Some(output) = &plan.output else {
        return Ok(());
    };

    let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .open(output)
        .with_context(|| format!("Can't open output file '{}'", output.display()))?;
    let mut volume = create(Box::new(file), output, &layout, &mut out)?;

    if layout.loader_len > 0 {
        let source = match (&plan.loader, input.as_mut()) {
            (Some(path), _) => Some(Source::File(path)),
            (None, Some(volume)) => Some(Source::Volume(volume)),
            (None, None) => None,
        };
        if let Some(source) = source {
            install_loader(&mut volume, source, &mut out).context("installing the loader")?;
        }
    }
    if layout.fs_len > 0 {
        let source = match (&plan.filesystem, input.as_mut()) {
            (Some(path), _) => Some(Source::File(path)),
            (None, Some(volume)) => Some(Source::Volume(volume)),
            (None, None) => None,
        };
        if let Some(source) = source {
            install_filesystem(&mut volume, source, &mut out)
                .context("installing the filesystem")?;
        }
    }

    if plan.explain {
        writeln!(out, "\n\nInformation about output volume '{}':", output.display())?;
        volume.show(&mut out)?;
    }
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
