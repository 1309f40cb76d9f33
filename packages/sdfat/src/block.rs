use core::fmt::Debug;

use embedded_storage::{ReadStorage, Storage};

pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Sector-addressed storage consumed by the filesystem core.
///
/// A write that returns `Ok` must already be durable; the core keeps no
/// write-back cache of its own.
pub trait BlockDevice {
    type Error: Debug;

    fn read_sector(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    fn write_sector(&mut self, lba: u32, buf: &[u8]) -> Result<(), Self::Error>;

    fn sector_size(&self) -> usize {
        DEFAULT_SECTOR_SIZE
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    type Error = T::Error;

    fn read_sector(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read_sector(lba, buf)
    }

    fn write_sector(&mut self, lba: u32, buf: &[u8]) -> Result<(), Self::Error> {
        (**self).write_sector(lba, buf)
    }

    fn sector_size(&self) -> usize {
        (**self).sector_size()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StorageBlockError<E> {
    OutOfRange { lba: u32 },
    Storage(E),
}

/// Exposes byte-addressed `embedded-storage` memory (SPI flash, on-chip
/// flash partitions) as 512-byte sectors.
pub struct StorageBlockDevice<S> {
    storage: S,
    base_offset: u32,
}

impl<S> StorageBlockDevice<S> {
    pub fn new(storage: S) -> Self {
        Self::with_offset(storage, 0)
    }

    pub fn with_offset(storage: S, base_offset: u32) -> Self {
        Self {
            storage,
            base_offset,
        }
    }

    pub fn into_inner(self) -> S {
        self.storage
    }
}

impl<S> StorageBlockDevice<S>
where
    S: ReadStorage,
{
    fn offset_for(&self, lba: u32, len: usize) -> Result<u32, StorageBlockError<S::Error>> {
        let start = (lba as u64) * DEFAULT_SECTOR_SIZE as u64 + self.base_offset as u64;
        let end = start + len as u64;
        if len != DEFAULT_SECTOR_SIZE || end > self.storage.capacity() as u64 {
            return Err(StorageBlockError::OutOfRange { lba });
        }
        u32::try_from(start).map_err(|_| StorageBlockError::OutOfRange { lba })
    }
}

impl<S> BlockDevice for StorageBlockDevice<S>
where
    S: Storage,
    S::Error: Debug,
{
    type Error = StorageBlockError<S::Error>;

    fn read_sector(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let offset = self.offset_for(lba, buf.len())?;
        self.storage
            .read(offset, buf)
            .map_err(StorageBlockError::Storage)
    }

    fn write_sector(&mut self, lba: u32, buf: &[u8]) -> Result<(), Self::Error> {
        let offset = self.offset_for(lba, buf.len())?;
        self.storage
            .write(offset, buf)
            .map_err(StorageBlockError::Storage)
    }
}

#[cfg(any(test, feature = "ram-disk"))]
pub use ram::{RamDisk, RamDiskError};

#[cfg(any(test, feature = "ram-disk"))]
mod ram {
    use alloc::{vec, vec::Vec};

    use super::BlockDevice;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum RamDiskError {
        OutOfRange(u32),
        Injected(u32),
    }

    /// In-memory disk with per-LBA fault injection, for tests and host tools.
    pub struct RamDisk {
        data: Vec<u8>,
        sector_size: usize,
        fail_reads: Vec<u32>,
        fail_writes: Vec<u32>,
        writes: usize,
    }

    impl RamDisk {
        pub fn new(sectors: u32) -> Self {
            Self::with_sector_size(sectors, super::DEFAULT_SECTOR_SIZE)
        }

        pub fn with_sector_size(sectors: u32, sector_size: usize) -> Self {
            Self {
                data: vec![0; sectors as usize * sector_size],
                sector_size,
                fail_reads: Vec::new(),
                fail_writes: Vec::new(),
                writes: 0,
            }
        }

        pub fn from_bytes(data: Vec<u8>, sector_size: usize) -> Self {
            Self {
                data,
                sector_size,
                fail_reads: Vec::new(),
                fail_writes: Vec::new(),
                writes: 0,
            }
        }

        pub fn sectors(&self) -> u32 {
            (self.data.len() / self.sector_size) as u32
        }

        pub fn fail_read_at(&mut self, lba: u32) {
            self.fail_reads.push(lba);
        }

        pub fn fail_write_at(&mut self, lba: u32) {
            self.fail_writes.push(lba);
        }

        pub fn clear_faults(&mut self) {
            self.fail_reads.clear();
            self.fail_writes.clear();
        }

        pub fn write_count(&self) -> usize {
            self.writes
        }

        pub fn sector(&self, lba: u32) -> &[u8] {
            let start = lba as usize * self.sector_size;
            &self.data[start..start + self.sector_size]
        }

        pub fn sector_mut(&mut self, lba: u32) -> &mut [u8] {
            let start = lba as usize * self.sector_size;
            &mut self.data[start..start + self.sector_size]
        }

        pub fn as_bytes(&self) -> &[u8] {
            &self.data
        }

        fn range(&self, lba: u32, len: usize) -> Result<core::ops::Range<usize>, RamDiskError> {
            let start = lba as usize * self.sector_size;
            if len != self.sector_size || start + len > self.data.len() {
                return Err(RamDiskError::OutOfRange(lba));
            }
            Ok(start..start + len)
        }
    }

    impl BlockDevice for RamDisk {
        type Error = RamDiskError;

        fn read_sector(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
            if self.fail_reads.contains(&lba) {
                return Err(RamDiskError::Injected(lba));
            }
            let range = self.range(lba, buf.len())?;
            buf.copy_from_slice(&self.data[range]);
            Ok(())
        }

        fn write_sector(&mut self, lba: u32, buf: &[u8]) -> Result<(), Self::Error> {
            if self.fail_writes.contains(&lba) {
                return Err(RamDiskError::Injected(lba));
            }
            let range = self.range(lba, buf.len())?;
            self.data[range].copy_from_slice(buf);
            self.writes += 1;
            Ok(())
        }

        fn sector_size(&self) -> usize {
            self.sector_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlashArray {
        bytes: [u8; 2048],
    }

    impl ReadStorage for FlashArray {
        type Error = ();

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl Storage for FlashArray {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn storage_adapter_maps_lba_to_byte_offset() {
        let mut dev = StorageBlockDevice::with_offset(FlashArray { bytes: [0; 2048] }, 512);
        let sector = [0xA5u8; 512];
        dev.write_sector(1, &sector).unwrap();

        let flash = dev.into_inner();
        assert!(flash.bytes[1024..1536].iter().all(|&b| b == 0xA5));
        assert!(flash.bytes[..1024].iter().all(|&b| b == 0));
    }

    #[test]
    fn storage_adapter_rejects_sector_past_capacity() {
        let mut dev = StorageBlockDevice::new(FlashArray { bytes: [0; 2048] });
        let mut buf = [0u8; 512];
        assert_eq!(
            dev.read_sector(4, &mut buf),
            Err(StorageBlockError::OutOfRange { lba: 4 })
        );
    }

    #[test]
    fn ram_disk_injects_faults_per_lba() {
        let mut disk = RamDisk::new(8);
        disk.fail_write_at(3);
        let buf = [1u8; 512];
        assert!(disk.write_sector(2, &buf).is_ok());
        assert_eq!(disk.write_sector(3, &buf), Err(RamDiskError::Injected(3)));
        assert_eq!(disk.write_count(), 1);
        disk.clear_faults();
        assert!(disk.write_sector(3, &buf).is_ok());
    }
}
