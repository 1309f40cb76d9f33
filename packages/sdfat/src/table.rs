use core::num::NonZeroU32;

use crate::{
    block::BlockDevice,
    error::FatError,
    fs::FileSystem,
    time::Clock,
    volume::{FatType, Volume},
};

/// Decoded value of one FAT slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Next(u32),
    Reserved(u32),
    Bad,
    EndOfChain,
}

impl FatEntry {
    pub fn from_raw(raw: u32, fat_type: FatType) -> Self {
        let (reserved_min, bad, eoc_min) = markers(fat_type);
        match raw {
            0 => Self::Free,
            1 => Self::Reserved(1),
            r if r == bad => Self::Bad,
            r if r >= eoc_min => Self::EndOfChain,
            r if r >= reserved_min => Self::Reserved(r),
            r => Self::Next(r),
        }
    }

    pub fn to_raw(self, fat_type: FatType) -> u32 {
        let (_, bad, _) = markers(fat_type);
        match self {
            Self::Free => 0,
            Self::Next(cluster) => cluster,
            Self::Reserved(raw) => raw,
            Self::Bad => bad,
            Self::EndOfChain => match fat_type {
                FatType::Fat12 => 0x0FFF,
                FatType::Fat16 => 0xFFFF,
                FatType::Fat32 => 0x0FFF_FFFF,
            },
        }
    }
}

fn markers(fat_type: FatType) -> (u32, u32, u32) {
    match fat_type {
        FatType::Fat12 => (0x0FF0, 0x0FF7, 0x0FF8),
        FatType::Fat16 => (0xFFF0, 0xFFF7, 0xFFF8),
        FatType::Fat32 => (0x0FFF_FFF0, 0x0FFF_FFF7, 0x0FFF_FFF8),
    }
}

/// Sector (relative to a FAT copy) and byte offset of a cluster's entry.
fn entry_position(volume: &Volume, cluster: u32) -> (u32, usize) {
    let byte = match volume.fat_type {
        FatType::Fat12 => cluster as u64 + cluster as u64 / 2,
        FatType::Fat16 => cluster as u64 * 2,
        FatType::Fat32 => cluster as u64 * 4,
    };
    let sector_size = volume.sector_size() as u64;
    ((byte / sector_size) as u32, (byte % sector_size) as usize)
}

pub(crate) fn clusters_for(bytes: u64, cluster_size: usize) -> u32 {
    bytes.div_ceil(cluster_size as u64) as u32
}

/// Whether a failed `write_entry` had already landed in the first FAT copy,
/// which is the copy every read uses.
pub(crate) fn first_copy_committed(volume: &Volume, err: &FatError) -> bool {
    let later_copies = volume.fat_start + volume.fat_size
        ..volume.fat_start + volume.fat_count as u32 * volume.fat_size;
    matches!(*err, FatError::Io { lba } if later_copies.contains(&lba))
}

/// Claimed-so-far state of an allocation in progress.
struct Run {
    first: Option<u32>,
    last: u32,
    len: u32,
    cursor: u32,
}

impl<D: BlockDevice, C: Clock> FileSystem<D, C> {
    /// Reads the FAT entry of `cluster` from the first FAT copy.
    pub fn read_entry(&mut self, cluster: u32) -> Result<FatEntry, FatError> {
        let volume = self.mounted_volume()?;
        if !volume.is_data_cluster(cluster) {
            return Err(FatError::InvalidCluster(cluster));
        }
        let raw = self.read_raw_entry(&volume, cluster)?;
        Ok(FatEntry::from_raw(raw, volume.fat_type))
    }

    /// Writes `value` into every FAT copy.
    ///
    /// A failure on a later copy keeps the earlier copies' writes and flags
    /// the mount as diverged.
    pub fn write_entry(&mut self, cluster: u32, value: FatEntry) -> Result<(), FatError> {
        let volume = self.mounted_volume()?;
        if !volume.is_data_cluster(cluster) {
            return Err(FatError::InvalidCluster(cluster));
        }
        let raw = value.to_raw(volume.fat_type);

        let mut first_error = None;
        for copy in 0..volume.fat_count as u32 {
            let base = volume.fat_start + copy * volume.fat_size;
            if let Err(err) = self.write_raw_entry(&volume, base, cluster, raw) {
                if copy == 0 {
                    return Err(err);
                }
                log::warn!(
                    "sdfat: fat_copy_diverged copy={} cluster={} err={:?}",
                    copy,
                    cluster,
                    err
                );
                self.state_mut()?.fats_diverged = true;
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Allocates `count` free clusters linked in allocation order.
    ///
    /// The scan starts at the free-cluster cursor and wraps once. The cached
    /// free count is never trusted to refuse a request. On `NoSpace` or any
    /// I/O error every claimed cluster is released again.
    pub fn allocate_chain(&mut self, count: NonZeroU32) -> Result<u32, FatError> {
        let volume = self.mounted_volume()?;
        let wanted = count.get();
        let start = self.state_mut()?.next_free;
        let mut run = Run {
            first: None,
            last: 0,
            len: 0,
            cursor: if volume.is_data_cluster(start) { start } else { 2 },
        };

        let claimed = self.claim_free(&volume, wanted, &mut run);
        let result = match claimed {
            Ok(()) if run.len == wanted => Ok(()),
            Ok(()) => Err(FatError::NoSpace),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            if let Some(first) = run.first {
                self.release_run(first, run.len);
            }
            if err == FatError::NoSpace {
                // The scan saw every cluster, so the count is now exact.
                let state = self.state_mut()?;
                state.free_count = Some(run.len);
            }
            log::debug!("sdfat: alloc_failed wanted={} err={:?}", wanted, err);
            return Err(err);
        }

        let first = run.first.ok_or(FatError::NoSpace)?;
        let state = self.state_mut()?;
        state.next_free = run.cursor;
        // A count read from FSInfo may be stale; drop it rather than go negative.
        state.free_count = state.free_count.and_then(|free| free.checked_sub(wanted));
        state.fs_info_dirty = true;
        log::debug!(
            "sdfat: alloc_ok first={} last={} count={}",
            first,
            run.last,
            wanted
        );
        Ok(first)
    }

    /// Appends `additional` freshly allocated clusters after `last`, which
    /// must currently terminate its chain. Returns the first new cluster.
    pub fn extend_chain(&mut self, last: u32, additional: NonZeroU32) -> Result<u32, FatError> {
        match self.read_entry(last)? {
            FatEntry::EndOfChain => {}
            FatEntry::Free => return Err(FatError::InvalidCluster(last)),
            _ => {
                self.flag_repair();
                return Err(FatError::CorruptChain(last));
            }
        }
        let volume = self.mounted_volume()?;
        let first_new = self.allocate_chain(additional)?;
        if let Err(err) = self.write_entry(last, FatEntry::Next(first_new)) {
            if first_copy_committed(&volume, &err) {
                log::warn!(
                    "sdfat: extend_kept last={} first_new={} err={:?}",
                    last,
                    first_new,
                    err
                );
                return Err(err);
            }
            self.release_run(first_new, additional.get());
            let state = self.state_mut()?;
            state.free_count = state.free_count.map(|free| free + additional.get());
            return Err(err);
        }
        Ok(first_new)
    }

    /// Returns every cluster of the chain starting at `first` to the free
    /// pool. Not atomic: clusters freed before an error stay freed.
    pub fn free_chain(&mut self, first: u32) -> Result<(), FatError> {
        let volume = self.mounted_volume()?;
        if !volume.is_data_cluster(first) {
            return Err(FatError::InvalidCluster(first));
        }

        let mut cluster = first;
        let mut freed = 0u32;
        loop {
            let next = match self.read_entry(cluster)? {
                FatEntry::EndOfChain => None,
                FatEntry::Next(next) if volume.is_data_cluster(next) => Some(next),
                FatEntry::Free if cluster == first => {
                    return Err(FatError::InvalidCluster(first));
                }
                other => {
                    log::warn!(
                        "sdfat: free_chain corrupt cluster={} entry={:?} freed={}",
                        cluster,
                        other,
                        freed
                    );
                    self.flag_repair();
                    return Err(FatError::CorruptChain(cluster));
                }
            };

            self.write_entry(cluster, FatEntry::Free)?;
            freed += 1;
            let state = self.state_mut()?;
            state.free_count = state.free_count.map(|free| free + 1);
            state.fs_info_dirty = true;

            match next {
                None => break,
                Some(next) if freed > volume.cluster_count => {
                    self.flag_repair();
                    return Err(FatError::CorruptChain(next));
                }
                Some(next) => cluster = next,
            }
        }

        log::debug!("sdfat: free_ok first={} count={}", first, freed);
        Ok(())
    }

    /// Successor of `cluster`, or `None` at end of chain.
    pub fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>, FatError> {
        let volume = self.mounted_volume()?;
        match self.read_entry(cluster)? {
            FatEntry::EndOfChain => Ok(None),
            FatEntry::Next(next) if volume.is_data_cluster(next) => Ok(Some(next)),
            _ => {
                self.flag_repair();
                Err(FatError::CorruptChain(cluster))
            }
        }
    }

    /// Number of clusters in a chain, validating every link.
    pub fn chain_length(&mut self, first: u32) -> Result<u32, FatError> {
        let volume = self.mounted_volume()?;
        if !volume.is_data_cluster(first) {
            return Err(FatError::InvalidCluster(first));
        }
        let mut cluster = first;
        let mut len = 1u32;
        while let Some(next) = self.next_cluster(cluster)? {
            if len > volume.cluster_count {
                self.flag_repair();
                return Err(FatError::CorruptChain(next));
            }
            len += 1;
            cluster = next;
        }
        Ok(len)
    }

    /// Cluster at position `index` of the chain starting at `first`.
    pub fn cluster_at(&mut self, first: u32, index: u32) -> Result<u32, FatError> {
        let volume = self.mounted_volume()?;
        if !volume.is_data_cluster(first) {
            return Err(FatError::InvalidCluster(first));
        }
        self.walk_forward(first, index)
    }

    pub(crate) fn walk_forward(&mut self, from: u32, steps: u32) -> Result<u32, FatError> {
        let mut cluster = from;
        for _ in 0..steps {
            cluster = match self.next_cluster(cluster)? {
                Some(next) => next,
                None => {
                    self.flag_repair();
                    return Err(FatError::CorruptChain(cluster));
                }
            };
        }
        Ok(cluster)
    }

    /// Free clusters on the volume; scans the FAT once and caches the result.
    pub fn free_cluster_count(&mut self) -> Result<u32, FatError> {
        let volume = self.mounted_volume()?;
        if let Some(free) = self.state_mut()?.free_count {
            return Ok(free);
        }
        let mut free = 0u32;
        for cluster in 2..=volume.max_cluster() {
            if self.read_raw_entry(&volume, cluster)? == 0 {
                free += 1;
            }
        }
        let state = self.state_mut()?;
        state.free_count = Some(free);
        state.fs_info_dirty = true;
        Ok(free)
    }

    fn claim_free(&mut self, volume: &Volume, wanted: u32, run: &mut Run) -> Result<(), FatError> {
        let max = volume.max_cluster();
        for _ in 0..volume.cluster_count {
            if run.len == wanted {
                break;
            }
            let candidate = run.cursor;
            run.cursor = if candidate >= max { 2 } else { candidate + 1 };

            if self.read_raw_entry(volume, candidate)? != 0 {
                continue;
            }
            match run.first {
                None => run.first = Some(candidate),
                Some(_) => self.write_entry(run.last, FatEntry::Next(candidate))?,
            }
            run.last = candidate;
            self.write_entry(candidate, FatEntry::EndOfChain)?;
            run.len += 1;
        }
        Ok(())
    }

    /// Best-effort release of a chain this mount just built.
    fn release_run(&mut self, first: u32, len: u32) {
        let mut cluster = first;
        for _ in 0..=len {
            let next = match self.read_entry(cluster) {
                Ok(FatEntry::Next(next)) => Some(next),
                _ => None,
            };
            if let Err(err) = self.write_entry(cluster, FatEntry::Free) {
                log::warn!("sdfat: rollback_error cluster={} err={:?}", cluster, err);
            }
            match next {
                Some(next) => cluster = next,
                None => break,
            }
        }
    }

    fn read_raw_entry(&mut self, volume: &Volume, cluster: u32) -> Result<u32, FatError> {
        let (sector, offset) = entry_position(volume, cluster);
        let lba = volume.fat_start + sector;
        self.load(lba)?;
        match volume.fat_type {
            FatType::Fat12 => {
                let lo = self.window()[offset];
                let hi = if offset + 1 < volume.sector_size() {
                    self.window()[offset + 1]
                } else {
                    self.load(lba + 1)?;
                    self.window()[0]
                };
                let pair = u16::from_le_bytes([lo, hi]);
                Ok(if cluster & 1 == 1 {
                    (pair >> 4) as u32
                } else {
                    (pair & 0x0FFF) as u32
                })
            }
            FatType::Fat16 => {
                let window = self.window();
                Ok(u16::from_le_bytes([window[offset], window[offset + 1]]) as u32)
            }
            FatType::Fat32 => {
                let window = self.window();
                let raw = u32::from_le_bytes([
                    window[offset],
                    window[offset + 1],
                    window[offset + 2],
                    window[offset + 3],
                ]);
                Ok(raw & 0x0FFF_FFFF)
            }
        }
    }

    fn write_raw_entry(
        &mut self,
        volume: &Volume,
        fat_base: u32,
        cluster: u32,
        raw: u32,
    ) -> Result<(), FatError> {
        let (sector, offset) = entry_position(volume, cluster);
        let lba = fat_base + sector;
        self.load(lba)?;
        match volume.fat_type {
            FatType::Fat12 => {
                let odd = cluster & 1 == 1;
                let window = self.window_mut();
                window[offset] = if odd {
                    (window[offset] & 0x0F) | ((raw << 4) as u8)
                } else {
                    raw as u8
                };
                let high = |old: u8| {
                    if odd {
                        (raw >> 4) as u8
                    } else {
                        (old & 0xF0) | ((raw >> 8) as u8 & 0x0F)
                    }
                };
                if offset + 1 < volume.sector_size() {
                    window[offset + 1] = high(window[offset + 1]);
                    self.store()
                } else {
                    self.store()?;
                    self.load(lba + 1)?;
                    let window = self.window_mut();
                    window[0] = high(window[0]);
                    self.store()
                }
            }
            FatType::Fat16 => {
                let bytes = (raw as u16).to_le_bytes();
                self.window_mut()[offset..offset + 2].copy_from_slice(&bytes);
                self.store()
            }
            FatType::Fat32 => {
                let window = self.window_mut();
                let old = u32::from_le_bytes([
                    window[offset],
                    window[offset + 1],
                    window[offset + 2],
                    window[offset + 3],
                ]);
                let new = (old & 0xF000_0000) | (raw & 0x0FFF_FFFF);
                window[offset..offset + 4].copy_from_slice(&new.to_le_bytes());
                self.store()
            }
        }
    }
}
