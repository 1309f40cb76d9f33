use crate::{
    block::BlockDevice,
    error::{FatError, VolumeFault},
    time::{Clock, FixedClock},
    volume::{
        encode_fs_info, fat_partitions, has_boot_signature, looks_like_boot_sector,
        parse_boot_sector, parse_fs_info, FatType, FsInfo, Volume,
    },
    MAX_SECTOR_SIZE, MIN_SECTOR_SIZE,
};

/// Per-mount bookkeeping, mutated only by the FAT table manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MountState {
    /// Where the next allocation scan starts. Advisory only.
    pub next_free: u32,
    /// Free clusters, when known from FSInfo or a full scan.
    pub free_count: Option<u32>,
    /// A FAT copy failed to take a write that the first copy accepted.
    pub fats_diverged: bool,
    /// A chain walk hit an out-of-range, free or cyclic link.
    pub needs_repair: bool,
    pub(crate) fs_info_dirty: bool,
}

impl MountState {
    fn new() -> Self {
        Self {
            next_free: 2,
            free_count: None,
            fats_diverged: false,
            needs_repair: false,
            fs_info_dirty: false,
        }
    }
}

struct Mounted {
    volume: Volume,
    state: MountState,
}

/// One-sector write-through window shared by FAT, directory and partial
/// data accesses.
struct SectorWindow {
    lba: u32,
    valid: bool,
    size: usize,
    buf: [u8; MAX_SECTOR_SIZE],
}

impl SectorWindow {
    const fn new() -> Self {
        Self {
            lba: 0,
            valid: false,
            size: MIN_SECTOR_SIZE,
            buf: [0; MAX_SECTOR_SIZE],
        }
    }

    fn holds(&self, lba: u32) -> bool {
        self.valid && self.lba == lba
    }
}

/// A block device together with the volume mounted on it.
///
/// All filesystem operations are methods on this type; handles and cursors
/// are plain values that carry no borrow of it.
pub struct FileSystem<D, C = FixedClock> {
    device: D,
    clock: C,
    mounted: Option<Mounted>,
    generation: u32,
    window: SectorWindow,
}

impl<D: BlockDevice> FileSystem<D, FixedClock> {
    pub fn new(device: D) -> Self {
        Self::with_clock(device, FixedClock::default())
    }
}

impl<D: BlockDevice, C: Clock> FileSystem<D, C> {
    pub fn with_clock(device: D, clock: C) -> Self {
        Self {
            device,
            clock,
            mounted: None,
            generation: 0,
            window: SectorWindow::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Direct device access. Bypasses the sector window, so it is invalidated.
    pub fn device_mut(&mut self) -> &mut D {
        self.window.valid = false;
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.mounted.as_ref().map(|m| &m.volume)
    }

    pub fn mount_state(&self) -> Option<&MountState> {
        self.mounted.as_ref().map(|m| &m.state)
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) fn now(&self) -> crate::time::FatTimestamp {
        self.clock.now()
    }

    pub(crate) fn mounted_volume(&self) -> Result<Volume, FatError> {
        self.mounted
            .as_ref()
            .map(|m| m.volume)
            .ok_or(FatError::NotMounted)
    }

    pub(crate) fn state_mut(&mut self) -> Result<&mut MountState, FatError> {
        self.mounted
            .as_mut()
            .map(|m| &mut m.state)
            .ok_or(FatError::NotMounted)
    }

    pub(crate) fn flag_repair(&mut self) {
        if let Some(mounted) = self.mounted.as_mut() {
            mounted.state.needs_repair = true;
        }
    }

    /// Reads the boot sector (or the first FAT partition of an MBR) and
    /// brings the volume online. An existing mount is unmounted first.
    pub fn mount(&mut self) -> Result<Volume, FatError> {
        if self.mounted.is_some() {
            if let Err(err) = self.unmount() {
                log::warn!("sdfat: remount flush_error err={:?}", err);
            }
        }

        let sector_size = self.device.sector_size();
        if !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&sector_size)
            || !sector_size.is_power_of_two()
        {
            return Err(VolumeFault::UnsupportedSectorSize(sector_size as u16).into());
        }
        self.window.valid = false;
        self.window.size = sector_size;

        self.load(0)?;
        let volume = if looks_like_boot_sector(self.window()) {
            parse_boot_sector(self.window(), 0, sector_size)?
        } else {
            if !has_boot_signature(self.window()) {
                return Err(VolumeFault::MissingSignature.into());
            }
            let partitions = fat_partitions(self.window());
            let mut result = Err(VolumeFault::NoFatPartition);
            for start in partitions {
                self.load(start)?;
                result = parse_boot_sector(self.window(), start, sector_size);
                if result.is_ok() {
                    break;
                }
            }
            result?
        };

        let mut state = MountState::new();
        if let Some(lba) = volume.fs_info_sector {
            match self.load(lba) {
                Ok(()) => {
                    if let Some(info) = parse_fs_info(self.window()) {
                        state.free_count = info
                            .free_count
                            .filter(|&count| count <= volume.cluster_count);
                        if let Some(next) = info.next_free.filter(|&n| volume.is_data_cluster(n)) {
                            state.next_free = next;
                        }
                    }
                }
                Err(err) => log::warn!("sdfat: fsinfo_read_error err={:?}", err),
            }
        }

        self.generation = self.generation.wrapping_add(1);
        self.mounted = Some(Mounted { volume, state });
        log::info!(
            "sdfat: mount_ok type={:?} clusters={} cluster_bytes={} label={}",
            volume.fat_type,
            volume.cluster_count,
            volume.cluster_size(),
            volume.label_str()
        );
        Ok(volume)
    }

    /// Writes back allocation hints, then drops the mount. Handles from this
    /// mount become stale even when the flush fails.
    pub fn unmount(&mut self) -> Result<(), FatError> {
        if self.mounted.is_none() {
            return Err(FatError::NotMounted);
        }
        let flushed = self.flush();
        self.mounted = None;
        self.generation = self.generation.wrapping_add(1);
        self.window.valid = false;
        match flushed {
            Ok(()) => log::info!("sdfat: unmount_ok"),
            Err(err) => log::warn!("sdfat: unmount flush_error err={:?}", err),
        }
        flushed
    }

    /// Persists the FAT32 FSInfo hints if they changed since mount.
    pub fn flush(&mut self) -> Result<(), FatError> {
        let volume = self.mounted_volume()?;
        let state = *self.state_mut()?;
        if volume.fat_type != FatType::Fat32 || !state.fs_info_dirty {
            return Ok(());
        }
        let Some(lba) = volume.fs_info_sector else {
            return Ok(());
        };
        self.load(lba)?;
        encode_fs_info(
            self.window_mut(),
            FsInfo {
                free_count: state.free_count,
                next_free: Some(state.next_free),
            },
        );
        self.store()?;
        self.state_mut()?.fs_info_dirty = false;
        Ok(())
    }

    pub(crate) fn load(&mut self, lba: u32) -> Result<(), FatError> {
        if self.window.holds(lba) {
            return Ok(());
        }
        self.window.valid = false;
        let size = self.window.size;
        if let Err(err) = self.device.read_sector(lba, &mut self.window.buf[..size]) {
            log::warn!("sdfat: read_error lba={} err={:?}", lba, err);
            return Err(FatError::Io { lba });
        }
        self.window.lba = lba;
        self.window.valid = true;
        Ok(())
    }

    pub(crate) fn window(&self) -> &[u8] {
        &self.window.buf[..self.window.size]
    }

    pub(crate) fn window_mut(&mut self) -> &mut [u8] {
        let size = self.window.size;
        &mut self.window.buf[..size]
    }

    /// Writes the window back to the sector it was loaded from.
    pub(crate) fn store(&mut self) -> Result<(), FatError> {
        let lba = self.window.lba;
        let size = self.window.size;
        if let Err(err) = self.device.write_sector(lba, &self.window.buf[..size]) {
            log::warn!("sdfat: write_error lba={} err={:?}", lba, err);
            self.window.valid = false;
            return Err(FatError::Io { lba });
        }
        Ok(())
    }

    pub(crate) fn read_direct(&mut self, lba: u32, buf: &mut [u8]) -> Result<(), FatError> {
        if self.window.holds(lba) {
            buf.copy_from_slice(self.window());
            return Ok(());
        }
        self.device.read_sector(lba, buf).map_err(|err| {
            log::warn!("sdfat: read_error lba={} err={:?}", lba, err);
            FatError::Io { lba }
        })
    }

    pub(crate) fn write_direct(&mut self, lba: u32, buf: &[u8]) -> Result<(), FatError> {
        if self.window.holds(lba) {
            self.window.valid = false;
        }
        self.device.write_sector(lba, buf).map_err(|err| {
            log::warn!("sdfat: write_error lba={} err={:?}", lba, err);
            FatError::Io { lba }
        })
    }

    pub(crate) fn zero_sectors(&mut self, first_lba: u32, count: u32) -> Result<(), FatError> {
        let zero = [0u8; MAX_SECTOR_SIZE];
        let size = self.window.size;
        for lba in first_lba..first_lba + count {
            self.write_direct(lba, &zero[..size])?;
        }
        Ok(())
    }
}
