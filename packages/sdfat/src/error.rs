use core::fmt;

/// Why a boot sector was rejected at mount time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeFault {
    MissingSignature,
    UnsupportedSectorSize(u16),
    SectorSizeMismatch { device: usize, volume: u16 },
    UnsupportedSectorsPerCluster(u8),
    NoReservedSectors,
    NoFats,
    NoTotalSectors,
    NoFatSectors,
    FatTooSmall,
    NoDataClusters,
    NoRootDirectory,
    RootEntriesOnFat32,
    BadRootCluster(u32),
    NoFatPartition,
    /// No FAT width fits the requested size and cluster size.
    NoValidLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatError {
    InvalidVolume(VolumeFault),
    Io { lba: u32 },
    InvalidCluster(u32),
    CorruptChain(u32),
    NotFound,
    DuplicateName,
    DirectoryNotEmpty,
    NoSpace,
    StaleHandle,
    NotMounted,
    InvalidName,
    IsDirectory,
    AccessDenied,
    PathTooDeep,
    FileTooLarge,
}

impl From<VolumeFault> for FatError {
    fn from(value: VolumeFault) -> Self {
        Self::InvalidVolume(value)
    }
}

impl FatError {
    /// Structural damage in the FAT or a directory chain.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::InvalidCluster(_) | Self::CorruptChain(_))
    }
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVolume(fault) => write!(f, "invalid volume ({:?})", fault),
            Self::Io { lba } => write!(f, "i/o error at lba {}", lba),
            Self::InvalidCluster(cluster) => write!(f, "invalid cluster {}", cluster),
            Self::CorruptChain(cluster) => write!(f, "corrupt cluster chain at {}", cluster),
            Self::NotFound => f.write_str("not found"),
            Self::DuplicateName => f.write_str("name already exists"),
            Self::DirectoryNotEmpty => f.write_str("directory not empty"),
            Self::NoSpace => f.write_str("no space left on volume"),
            Self::StaleHandle => f.write_str("stale file handle"),
            Self::NotMounted => f.write_str("volume not mounted"),
            Self::InvalidName => f.write_str("invalid 8.3 name"),
            Self::IsDirectory => f.write_str("is a directory"),
            Self::AccessDenied => f.write_str("access denied"),
            Self::PathTooDeep => f.write_str("path too deep"),
            Self::FileTooLarge => f.write_str("file too large"),
        }
    }
}
