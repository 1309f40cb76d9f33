#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "ram-disk"))]
extern crate alloc;

pub mod block;
pub mod dir;
pub mod error;
pub mod file;
pub mod format;
pub mod fs;
pub mod path;
pub mod table;
pub mod time;
pub mod volume;

pub use block::{BlockDevice, StorageBlockDevice};
#[cfg(any(test, feature = "ram-disk"))]
pub use block::RamDisk;
pub use dir::{Attributes, DirCursor, DirEntry, DirIter, Directory, ShortName};
pub use error::{FatError, VolumeFault};
pub use file::{FileHandle, OpenMode};
pub use format::{format, FormatOptions};
pub use fs::{FileSystem, MountState};
pub use path::WalkEntry;
pub use table::FatEntry;
pub use time::{Clock, FatTimestamp, FixedClock};
pub use volume::{FatType, Volume};

/// Largest sector size the driver accepts.
pub const MAX_SECTOR_SIZE: usize = 4096;
/// Smallest sector size the driver accepts.
pub const MIN_SECTOR_SIZE: usize = 512;
/// Bound on directory nesting for walks and path resolution.
pub const MAX_DEPTH: usize = 16;
