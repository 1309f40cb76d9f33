//! Directory engine: 32-byte slot scanning over the fixed FAT12/16 root
//! region or a directory's cluster chain.

mod entry;

use core::num::NonZeroU32;

pub use entry::{Attributes, DirEntry, ShortName};
pub(crate) use entry::{is_long_name_slot, SlotLocation, SLOT_END, SLOT_FREE};

use crate::{
    block::BlockDevice,
    error::FatError,
    fs::FileSystem,
    table::{first_copy_committed, FatEntry},
    time::Clock,
    volume::{FatType, DIR_ENTRY_SIZE},
};

/// Long names are at most 255 characters, 13 per slot.
const MAX_LFN_SLOTS: usize = 20;
const LFN_LAST_FLAG: u8 = 0x40;

/// A directory, named by its first cluster. `ROOT` maps to the fixed root
/// region on FAT12/16 and to the root cluster on FAT32.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Directory {
    pub first_cluster: u32,
}

impl Directory {
    pub const ROOT: Self = Self { first_cluster: 0 };

    pub fn is_root(&self) -> bool {
        self.first_cluster == 0
    }
}

#[derive(Clone, Copy, Debug)]
enum Region {
    Fixed { start: u32, slots: u32 },
    Chain { first: u32 },
}

#[derive(Clone, Copy, Debug)]
struct ChainPos {
    index: u32,
    cluster: u32,
}

#[derive(Clone, Copy, Debug)]
struct SlotPos {
    lba: u32,
    offset: usize,
}

/// Resumable position in a directory listing. Holds no borrow of the
/// filesystem, so callers can keep several of them alive at once.
#[derive(Clone, Debug)]
pub struct DirCursor {
    dir: Directory,
    slot: u32,
    pos: Option<ChainPos>,
    done: bool,
}

impl DirCursor {
    pub fn new(dir: Directory) -> Self {
        Self {
            dir,
            slot: 0,
            pos: None,
            done: false,
        }
    }

    pub fn directory(&self) -> Directory {
        self.dir
    }

    /// Next active entry, skipping deleted slots, long-name slots and the
    /// volume label.
    pub fn next<D: BlockDevice, C: Clock>(
        &mut self,
        fs: &mut FileSystem<D, C>,
    ) -> Result<Option<DirEntry>, FatError> {
        if self.done {
            return Ok(None);
        }
        let result = self.advance(fs);
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn advance<D: BlockDevice, C: Clock>(
        &mut self,
        fs: &mut FileSystem<D, C>,
    ) -> Result<Option<DirEntry>, FatError> {
        let fat_type = fs.mounted_volume()?.fat_type;
        let region = fs.dir_region(self.dir)?;
        loop {
            let Some(at) = fs.slot_position(region, self.slot, &mut self.pos)? else {
                return Ok(None);
            };
            let raw = fs.read_slot(at)?;
            let index = self.slot;
            self.slot += 1;

            match raw[0] {
                SLOT_END => return Ok(None),
                SLOT_FREE => continue,
                _ => {}
            }
            if is_long_name_slot(raw[11]) || raw[11] & Attributes::VOLUME_ID.bits() != 0 {
                continue;
            }
            let mut entry = DirEntry::decode(&raw, fat_type);
            entry.location = Some(SlotLocation {
                dir: self.dir,
                index,
                lba: at.lba,
                offset: at.offset as u16,
            });
            return Ok(Some(entry));
        }
    }
}

/// Borrowing iterator over a directory's active entries.
pub struct DirIter<'a, D, C> {
    fs: &'a mut FileSystem<D, C>,
    cursor: DirCursor,
}

impl<D: BlockDevice, C: Clock> Iterator for DirIter<'_, D, C> {
    type Item = Result<DirEntry, FatError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next(self.fs).transpose()
    }
}

/// Long-name slots seen immediately before a short entry.
struct LfnRun {
    checksum: u8,
    slots: heapless::Vec<SlotPos, MAX_LFN_SLOTS>,
}

impl LfnRun {
    fn new() -> Self {
        Self {
            checksum: 0,
            slots: heapless::Vec::new(),
        }
    }

    fn consume(&mut self, raw: &[u8; DIR_ENTRY_SIZE], at: SlotPos) {
        if raw[0] & LFN_LAST_FLAG != 0 {
            self.slots.clear();
            self.checksum = raw[13];
        } else if self.slots.is_empty() || raw[13] != self.checksum {
            self.slots.clear();
            return;
        }
        if self.slots.push(at).is_err() {
            self.slots.clear();
        }
    }

    fn take_for(&mut self, name: &ShortName) -> heapless::Vec<SlotPos, MAX_LFN_SLOTS> {
        let slots = core::mem::take(&mut self.slots);
        if !slots.is_empty() && self.checksum == name.checksum() {
            slots
        } else {
            heapless::Vec::new()
        }
    }
}

struct Found {
    entry: DirEntry,
    lfn: heapless::Vec<SlotPos, MAX_LFN_SLOTS>,
}

struct Scan {
    found: Option<Found>,
    first_free: Option<u32>,
    /// Slots visited before the scan stopped.
    slots_seen: u32,
    /// Last cluster reached in a chained directory.
    tail: Option<u32>,
}

impl<D: BlockDevice, C: Clock> FileSystem<D, C> {
    pub fn iterate(&mut self, dir: Directory) -> DirIter<'_, D, C> {
        DirIter {
            fs: self,
            cursor: DirCursor::new(dir),
        }
    }

    pub fn lookup(&mut self, dir: Directory, name: &str) -> Result<DirEntry, FatError> {
        let name = ShortName::parse(name)?;
        self.lookup_name(dir, &name)
    }

    pub(crate) fn lookup_name(
        &mut self,
        dir: Directory,
        name: &ShortName,
    ) -> Result<DirEntry, FatError> {
        self.scan(dir, Some(name))?
            .found
            .map(|found| found.entry)
            .ok_or(FatError::NotFound)
    }

    /// Writes `entry` into the lowest free slot of `dir`, growing a chained
    /// directory by one zeroed cluster when every slot is taken.
    pub fn insert(&mut self, dir: Directory, entry: &DirEntry) -> Result<DirEntry, FatError> {
        if entry.name.is_dot_entry() {
            return Err(FatError::InvalidName);
        }
        let region = self.dir_region(dir)?;
        let scan = self.scan(dir, Some(&entry.name))?;
        if scan.found.is_some() {
            return Err(FatError::DuplicateName);
        }

        let index = match (scan.first_free, region) {
            (Some(index), _) => index,
            (None, Region::Fixed { .. }) => return Err(FatError::NoSpace),
            (None, Region::Chain { first }) => {
                self.grow_directory(scan.tail.unwrap_or(first))?;
                scan.slots_seen
            }
        };

        let Some(at) = self.slot_position(region, index, &mut None)? else {
            return Err(FatError::CorruptChain(dir.first_cluster));
        };
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        entry.encode(&mut raw);
        self.write_slot(at, &raw)?;

        let mut stored = entry.clone();
        stored.location = Some(SlotLocation {
            dir,
            index,
            lba: at.lba,
            offset: at.offset as u16,
        });
        log::debug!(
            "sdfat: dir_insert dir={} slot={} name={}",
            dir.first_cluster,
            index,
            entry.name
        );
        Ok(stored)
    }

    /// Deletes the entry called `name` together with its long-name slots.
    /// The entry's cluster chain is left for the caller to free.
    pub fn remove(&mut self, dir: Directory, name: &str) -> Result<DirEntry, FatError> {
        let name = ShortName::parse(name)?;
        if name.is_dot_entry() {
            return Err(FatError::InvalidName);
        }
        let found = self.scan(dir, Some(&name))?.found.ok_or(FatError::NotFound)?;
        let entry = &found.entry;
        if entry.is_dir() && entry.first_cluster != 0 && !self.is_empty_dir(entry.directory())? {
            return Err(FatError::DirectoryNotEmpty);
        }
        self.erase(&found)?;
        Ok(found.entry)
    }

    /// Renames in place; cluster, size, attributes and timestamps are kept.
    pub fn rename(&mut self, dir: Directory, old: &str, new: &str) -> Result<DirEntry, FatError> {
        let old = ShortName::parse(old)?;
        let new = ShortName::parse(new)?;
        if old.is_dot_entry() || new.is_dot_entry() {
            return Err(FatError::InvalidName);
        }
        if !old.matches(&new) && self.scan(dir, Some(&new))?.found.is_some() {
            return Err(FatError::DuplicateName);
        }
        let found = self.scan(dir, Some(&old))?.found.ok_or(FatError::NotFound)?;
        let Some(loc) = found.entry.location else {
            return Err(FatError::NotFound);
        };

        self.load(loc.lba)?;
        let offset = loc.offset as usize;
        self.window_mut()[offset..offset + 11].copy_from_slice(&new.0);
        self.store()?;
        self.erase_lfn(&found.lfn)?;

        let mut renamed = found.entry;
        renamed.name = new;
        Ok(renamed)
    }

    /// Rewrites an entry's slot with a single sector write.
    pub fn update_entry(&mut self, entry: &DirEntry) -> Result<(), FatError> {
        let Some(loc) = entry.location else {
            return Ok(());
        };
        self.mounted_volume()?;
        self.load(loc.lba)?;
        let offset = loc.offset as usize;
        entry.encode(&mut self.window_mut()[offset..offset + DIR_ENTRY_SIZE]);
        self.store()
    }

    /// True when the directory holds nothing but `.` and `..`.
    pub fn is_empty_dir(&mut self, dir: Directory) -> Result<bool, FatError> {
        let mut cursor = DirCursor::new(dir);
        while let Some(entry) = cursor.next(self)? {
            if !entry.name.is_dot_entry() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Removes the slot an entry was read from, re-scanning for its
    /// long-name slots.
    pub(crate) fn erase_entry(&mut self, entry: &DirEntry) -> Result<(), FatError> {
        let Some(loc) = entry.location else {
            return Err(FatError::NotFound);
        };
        let found = self
            .scan(loc.dir, Some(&entry.name))?
            .found
            .ok_or(FatError::NotFound)?;
        self.erase(&found)
    }

    fn dir_region(&mut self, dir: Directory) -> Result<Region, FatError> {
        let volume = self.mounted_volume()?;
        if dir.is_root() {
            return Ok(match volume.fat_type {
                FatType::Fat32 => Region::Chain {
                    first: volume.root_cluster,
                },
                FatType::Fat12 | FatType::Fat16 => Region::Fixed {
                    start: volume.root_dir_start,
                    slots: volume.root_entry_count as u32,
                },
            });
        }
        if !volume.is_data_cluster(dir.first_cluster) {
            return Err(FatError::InvalidCluster(dir.first_cluster));
        }
        Ok(Region::Chain {
            first: dir.first_cluster,
        })
    }

    /// Sector and byte offset of slot `index`, or `None` past the end of the
    /// region or chain. `pos` caches the chain position between calls.
    fn slot_position(
        &mut self,
        region: Region,
        index: u32,
        pos: &mut Option<ChainPos>,
    ) -> Result<Option<SlotPos>, FatError> {
        let volume = self.mounted_volume()?;
        let per_sector = volume.entries_per_sector();
        match region {
            Region::Fixed { start, slots } => {
                if index >= slots {
                    return Ok(None);
                }
                Ok(Some(SlotPos {
                    lba: start + index / per_sector,
                    offset: (index % per_sector) as usize * DIR_ENTRY_SIZE,
                }))
            }
            Region::Chain { first } => {
                let per_cluster = volume.entries_per_cluster();
                let wanted = index / per_cluster;
                if wanted > volume.cluster_count {
                    self.flag_repair();
                    return Err(FatError::CorruptChain(first));
                }
                let mut at = match *pos {
                    Some(cached) if cached.index <= wanted => cached,
                    _ => ChainPos {
                        index: 0,
                        cluster: first,
                    },
                };
                while at.index < wanted {
                    match self.next_cluster(at.cluster)? {
                        Some(next) => {
                            at = ChainPos {
                                index: at.index + 1,
                                cluster: next,
                            }
                        }
                        None => {
                            *pos = Some(at);
                            return Ok(None);
                        }
                    }
                }
                *pos = Some(at);
                let within = index % per_cluster;
                Ok(Some(SlotPos {
                    lba: volume.cluster_to_lba(at.cluster) + within / per_sector,
                    offset: (within % per_sector) as usize * DIR_ENTRY_SIZE,
                }))
            }
        }
    }

    fn read_slot(&mut self, at: SlotPos) -> Result<[u8; DIR_ENTRY_SIZE], FatError> {
        self.load(at.lba)?;
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw.copy_from_slice(&self.window()[at.offset..at.offset + DIR_ENTRY_SIZE]);
        Ok(raw)
    }

    fn write_slot(&mut self, at: SlotPos, raw: &[u8; DIR_ENTRY_SIZE]) -> Result<(), FatError> {
        self.load(at.lba)?;
        self.window_mut()[at.offset..at.offset + DIR_ENTRY_SIZE].copy_from_slice(raw);
        self.store()
    }

    fn mark_free(&mut self, at: SlotPos) -> Result<(), FatError> {
        self.load(at.lba)?;
        self.window_mut()[at.offset] = SLOT_FREE;
        self.store()
    }

    fn erase(&mut self, found: &Found) -> Result<(), FatError> {
        let Some(loc) = found.entry.location else {
            return Err(FatError::NotFound);
        };
        self.mark_free(SlotPos {
            lba: loc.lba,
            offset: loc.offset as usize,
        })?;
        self.erase_lfn(&found.lfn)?;
        log::debug!(
            "sdfat: dir_remove dir={} slot={} name={} lfn_slots={}",
            loc.dir.first_cluster,
            loc.index,
            found.entry.name,
            found.lfn.len()
        );
        Ok(())
    }

    fn erase_lfn(&mut self, slots: &[SlotPos]) -> Result<(), FatError> {
        for &at in slots {
            self.mark_free(at)?;
        }
        Ok(())
    }

    /// Appends one zeroed cluster to a chained directory.
    fn grow_directory(&mut self, tail: u32) -> Result<(), FatError> {
        let volume = self.mounted_volume()?;
        let one = NonZeroU32::MIN;
        let cluster = self.allocate_chain(one)?;
        let zeroed = self.zero_sectors(
            volume.cluster_to_lba(cluster),
            volume.sectors_per_cluster as u32,
        );
        let linked = zeroed.and_then(|()| self.write_entry(tail, FatEntry::Next(cluster)));
        if let Err(err) = linked {
            if first_copy_committed(&volume, &err) {
                log::warn!(
                    "sdfat: dir_grow kept tail={} cluster={} err={:?}",
                    tail,
                    cluster,
                    err
                );
                return Err(err);
            }
            if let Err(free_err) = self.free_chain(cluster) {
                log::warn!(
                    "sdfat: dir_grow rollback_error cluster={} err={:?}",
                    cluster,
                    free_err
                );
            }
            return Err(err);
        }
        log::debug!("sdfat: dir_grow tail={} cluster={}", tail, cluster);
        Ok(())
    }

    fn scan(&mut self, dir: Directory, target: Option<&ShortName>) -> Result<Scan, FatError> {
        let fat_type = self.mounted_volume()?.fat_type;
        let region = self.dir_region(dir)?;
        let mut pos = None;
        let mut lfn = LfnRun::new();
        let mut scan = Scan {
            found: None,
            first_free: None,
            slots_seen: 0,
            tail: None,
        };

        loop {
            let index = scan.slots_seen;
            let Some(at) = self.slot_position(region, index, &mut pos)? else {
                break;
            };
            let raw = self.read_slot(at)?;
            scan.slots_seen += 1;

            if raw[0] == SLOT_END {
                scan.first_free.get_or_insert(index);
                break;
            }
            if raw[0] == SLOT_FREE {
                scan.first_free.get_or_insert(index);
                lfn.slots.clear();
                continue;
            }
            if is_long_name_slot(raw[11]) {
                lfn.consume(&raw, at);
                continue;
            }
            if raw[11] & Attributes::VOLUME_ID.bits() != 0 {
                lfn.slots.clear();
                continue;
            }

            let mut entry = DirEntry::decode(&raw, fat_type);
            let run = lfn.take_for(&entry.name);
            if target.is_some_and(|name| name.matches(&entry.name)) {
                entry.location = Some(SlotLocation {
                    dir,
                    index,
                    lba: at.lba,
                    offset: at.offset as u16,
                });
                scan.found = Some(Found { entry, lfn: run });
                break;
            }
        }

        scan.tail = pos.map(|at| at.cluster);
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfn_run_requires_matching_checksum() {
        let name = ShortName(*b"LONGNA~1TXT");
        let mut run = LfnRun::new();
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[0] = LFN_LAST_FLAG | 2;
        raw[11] = 0x0F;
        raw[13] = name.checksum();
        run.consume(&raw, SlotPos { lba: 9, offset: 0 });
        raw[0] = 1;
        run.consume(&raw, SlotPos { lba: 9, offset: 32 });
        assert_eq!(run.take_for(&name).len(), 2);

        run.consume(&raw, SlotPos { lba: 9, offset: 64 });
        assert!(run.slots.is_empty(), "orphan continuation slot starts no run");

        raw[0] = LFN_LAST_FLAG | 1;
        raw[13] = name.checksum().wrapping_add(1);
        run.consume(&raw, SlotPos { lba: 9, offset: 96 });
        assert!(run.take_for(&name).is_empty());
    }

    #[test]
    fn root_directory_is_cluster_zero() {
        assert!(Directory::ROOT.is_root());
        assert!(!Directory { first_cluster: 5 }.is_root());
    }
}
