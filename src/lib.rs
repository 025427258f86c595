//! Tools for 3B1/PC7300 disk volumes and the System V filesystems on them.

pub mod dump;
pub mod error;
pub mod explorer;
pub mod filesystem;
pub mod fsck;
pub mod geometry;
pub mod merge;
pub mod mkfs;
pub mod mounted;
pub mod rle;
pub mod signal;
pub mod structs;
pub mod volume;

pub use error::{Error, Result};

/// Start logging from `RUST_LOG`, raised to debug by one `-d` and to trace by more
pub fn init_logging(debug: u32) {
    let mut builder = env_logger::Builder::from_default_env();
    match debug {
        0 => {}
        1 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    // A second call keeps the first logger
    let _ = builder.try_init();
}
