use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bad magic in {what}: 0x{found:08x}")]
    BadMagic { what: &'static str, found: u32 },

    #[error("cannot seek to offset {offset}: {source}")]
    Seek { offset: u64, source: std::io::Error },

    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: usize, got: usize },

    #[error("short write at offset {offset}: wanted {wanted} bytes, wrote {got}")]
    ShortWrite { offset: u64, wanted: usize, got: usize },

    #[error("{what} {value} out of range")]
    OutOfRange { what: &'static str, value: u64 },

    #[error("structural corruption: {0}")]
    StructuralCorruption(String),

    #[error("{table} table overflow")]
    CapacityExceeded { table: &'static str },

    #[error("stopped after {completed} blocks: {source}")]
    Incomplete {
        completed: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("interrupted by signal {0}")]
    Interrupted(i32),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a failure with the number of blocks already transferred
    pub fn incomplete(completed: u32, source: Error) -> Self {
        Self::Incomplete {
            completed,
            source: Box::new(source),
        }
    }
}
