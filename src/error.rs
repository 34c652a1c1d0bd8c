//! Error taxonomy shared by every layer of the engine.
//!
//! Every fallible operation returns [`Result`]; the CLI is the only place
//! errors are turned into exit codes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskError {
    /// Underlying I/O against the image file failed.
    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A sector write carried the wrong number of bytes.
    #[error("invalid sector size: {0}")]
    SectorSize(usize),

    /// Write attempted through a read-only handle.
    #[error("disk image opened in read-only mode")]
    ReadOnly,

    /// The compressed container uses a codec this tool cannot decode.
    #[error("unsupported container codec: {0}")]
    UnsupportedCodec(String),

    /// Anything else that makes the device or volume unusable.
    #[error("{0}")]
    Disk(String),

    #[error("disk full: need {needed} clusters, only {free} free")]
    DiskFull { needed: usize, free: usize },

    #[error("directory is full")]
    DirectoryFull,

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Structural inconsistency detected while walking the image.
    #[error("corrupted disk: {0}")]
    CorruptedDisk(String),

    #[error("invalid partition index: {index} (valid range: 0-{max})")]
    InvalidPartition { index: isize, max: usize },

    /// The physical disk label or a virtual volume label failed to parse.
    #[error("hard disk label error: {0}")]
    HardDiskLabel(String),
}

pub type Result<T> = std::result::Result<T, DiskError>;
