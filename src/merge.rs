//! Sector by sector merge of several images of the same disk.
//!
//! Sectors on which all images agree are copied through. Where they
//! differ, the operator picks the image to take the sector from.

use std::io::{BufRead, Read, Write};

use log::{debug, info};

use crate::dump::{hexdump, DEFAULT_WIDTH};
use crate::structs::SECTOR_SIZE;
use crate::volume::fill;
use crate::{Error, Result};

/// Images merged at most
pub const MAX_IMAGES: usize = 4;

const HELP: &str = "\
l -- list files
b -- show buffers
q -- quit
";

#[derive(Debug)]
struct Image<R> {
    name: String,
    /// None once the image ran out
    reader: Option<R>,
    buf: [u8; SECTOR_SIZE],
}

/// What a merge did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Sectors written to the output
    pub sectors: u32,
    /// Sectors on which the images disagreed
    pub resolved: u32,
    /// The operator quit before the images ran out
    pub quit: bool,
}

#[derive(Debug)]
pub struct Merger<R: Read> {
    images: Vec<Image<R>>,
}

impl<R: Read> Merger<R> {
    /// Merge `images`, given as name and reader, of which at most [`MAX_IMAGES`]
    pub fn new(images: Vec<(String, R)>) -> Result<Self> {
        if images.len() > MAX_IMAGES {
            return Err(Error::CapacityExceeded { table: "merge image" });
        }
        Ok(Self {
            images: images
                .into_iter()
                .map(|(name, reader)| Image {
                    name,
                    reader: Some(reader),
                    buf: [0; SECTOR_SIZE],
                })
                .collect(),
        })
    }

    /// Write merged sectors to `output` until every image ran out,
    /// asking on `input` whenever images disagree
    pub fn run<W: Write>(
        &mut self,
        output: &mut W,
        input: &mut dyn BufRead,
        out: &mut dyn Write,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        for sector in 0u32.. {
            if self.read_sector(out)? == 0 {
                writeln!(out, "\nHit the end, nothing read")?;
                break;
            }
            let Some(first) = self.images.iter().position(|i| i.reader.is_some()) else {
                break;
            };
            let diffs = self.images[first..]
                .iter()
                .filter(|i| i.reader.is_some() && i.buf != self.images[first].buf)
                .count();
            let chosen = if diffs == 0 {
                first
            } else {
                report.resolved += 1;
                writeln!(out)?;
                match self.resolve(sector, diffs, input, out)? {
                    Some(chosen) => chosen,
                    None => {
                        report.quit = true;
                        break;
                    }
                }
            };
            output.write_all(&self.images[chosen].buf)?;
            report.sectors += 1;
            if report.sectors % 1000 == 0 {
                debug!("Merged {} sectors", report.sectors);
            }
        }
        output.flush()?;
        info!(
            "Merged {} sectors, {} resolved by hand",
            report.sectors, report.resolved
        );
        Ok(report)
    }

    /// Next sector of every open image; returns how many delivered a full one
    fn read_sector(&mut self, out: &mut dyn Write) -> Result<usize> {
        let mut read = 0;
        for image in &mut self.images {
            let Some(reader) = image.reader.as_mut() else {
                continue;
            };
            let got = fill(reader, &mut image.buf)?;
            if got == SECTOR_SIZE {
                read += 1;
            } else {
                writeln!(out, "got {got} from '{}', closing", image.name)?;
                image.reader = None;
            }
        }
        Ok(read)
    }

    /// Ask which image a differing sector comes from. None when the operator quits.
    fn resolve(
        &self,
        sector: u32,
        diffs: usize,
        input: &mut dyn BufRead,
        out: &mut dyn Write,
    ) -> Result<Option<usize>> {
        loop {
            writeln!(out, "{diffs} diffs on block {sector}")?;
            write!(out, "RESOLVE> ")?;
            out.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Err(Error::Aborted("end of input".into()));
            }
            let line = line.trim();
            if let Ok(number) = line.parse::<usize>() {
                match self.images.get(number.wrapping_sub(1)) {
                    Some(image) if image.reader.is_some() => return Ok(Some(number - 1)),
                    _ => writeln!(out, "No open image {number}")?,
                }
                continue;
            }
            match line.chars().next() {
                None => {}
                Some('l') => {
                    for (i, image) in self.images.iter().enumerate() {
                        writeln!(out, "[{}] {}", i + 1, image.name)?;
                    }
                }
                Some('b') => {
                    for (i, image) in self.images.iter().enumerate() {
                        if image.reader.is_none() {
                            continue;
                        }
                        writeln!(out, "\n[{}] {}:", i + 1, image.name)?;
                        let mut text = Vec::new();
                        hexdump(&mut text, &image.buf, DEFAULT_WIDTH, 0)?;
                        out.write_all(&text)?;
                    }
                }
                Some('q') => return Ok(None),
                Some(_) => write!(out, "{HELP}")?,
            }
        }
    }
}
