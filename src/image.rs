use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use embedded_storage::{ReadStorage, Storage};
use sdfat::{block::DEFAULT_SECTOR_SIZE, StorageBlockDevice};

/// A disk image file seen through the `embedded-storage` traits, so the
/// console drives it with the same adapter a flash partition would use.
pub struct ImageFile {
    file: File,
    capacity: usize,
}

/// Sector device over an image file.
pub type ImageDevice = StorageBlockDevice<ImageFile>;

impl ImageFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed opening image {}", path.display()))?;
        Self::from_file(file)
    }

    /// Creates (or truncates) an image of `sectors` zeroed sectors.
    pub fn create(path: &Path, sectors: u32) -> Result<Self> {
        if sectors == 0 {
            bail!("image must have at least one sector");
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed creating image {}", path.display()))?;
        file.set_len(sectors as u64 * DEFAULT_SECTOR_SIZE as u64)?;
        Self::from_file(file)
    }

    fn from_file(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        if len > u32::MAX as u64 {
            bail!("image larger than 4 GiB is not addressable");
        }
        Ok(Self {
            file,
            capacity: len as usize,
        })
    }

    pub fn sectors(&self) -> u32 {
        (self.capacity / DEFAULT_SECTOR_SIZE) as u32
    }

    pub fn into_device(self) -> ImageDevice {
        StorageBlockDevice::new(self)
    }
}

impl ReadStorage for ImageFile {
    type Error = ErrorKind;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|err| err.kind())?;
        self.file.read_exact(bytes).map_err(|err| err.kind())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Storage for ImageFile {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|err| err.kind())?;
        self.file.write_all(bytes).map_err(|err| err.kind())?;
        self.file.flush().map_err(|err| err.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdfat::BlockDevice;

    #[test]
    fn sectors_round_trip_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.img");
        let mut device = ImageFile::create(&path, 8).unwrap().into_device();

        let mut sector = [0u8; 512];
        sector[..4].copy_from_slice(b"FAT!");
        device.write_sector(3, &sector).unwrap();
        drop(device);

        let image = ImageFile::open(&path).unwrap();
        assert_eq!(image.sectors(), 8);
        let mut device = image.into_device();
        let mut back = [0u8; 512];
        device.read_sector(3, &mut back).unwrap();
        assert_eq!(&back[..4], b"FAT!");
        assert!(device.read_sector(8, &mut back).is_err());
    }
}
