use core::{fmt, num::NonZeroU32};

use crate::{
    block::BlockDevice,
    dir::{DirCursor, DirEntry, Directory, ShortName},
    error::FatError,
    file::{FileHandle, OpenMode},
    fs::FileSystem,
    time::Clock,
    volume::{Volume, DIR_ENTRY_SIZE},
    MAX_DEPTH, MAX_SECTOR_SIZE,
};

/// One entry reported by [`FileSystem::walk`].
#[derive(Debug)]
pub struct WalkEntry<'a> {
    /// Nesting below the walk's starting directory; its children are depth 0.
    pub depth: usize,
    /// Names of the directories between the starting directory and `entry`.
    pub ancestors: &'a [ShortName],
    pub entry: &'a DirEntry,
}

impl WalkEntry<'_> {
    /// Writes `A/B/NAME.EXT`, relative to the walk's starting directory.
    pub fn write_path<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        for ancestor in self.ancestors {
            write!(out, "{}/", ancestor)?;
        }
        write!(out, "{}", self.entry.name)
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(|c| c == '/' || c == '\\')
        .filter(|component| !component.is_empty())
}

impl<D: BlockDevice, C: Clock> FileSystem<D, C> {
    /// Resolves a slash-separated path from the root. The empty path and `/`
    /// resolve to a synthetic root entry.
    pub fn resolve(&mut self, path: &str) -> Result<DirEntry, FatError> {
        let mut current = DirEntry::root();
        let mut depth = 0;
        for component in components(path) {
            current = self.step(current, component, &mut depth)?;
        }
        Ok(current)
    }

    /// Splits `path` into its resolved parent directory and the final
    /// component, which need not exist.
    pub fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(Directory, &'p str), FatError> {
        let mut current = DirEntry::root();
        let mut depth = 0;
        let mut leaf = None;
        for component in components(path) {
            if let Some(previous) = leaf.replace(component) {
                current = self.step(current, previous, &mut depth)?;
            }
        }
        let leaf = leaf.ok_or(FatError::InvalidName)?;
        if !current.is_dir() {
            return Err(FatError::NotFound);
        }
        Ok((current.directory(), leaf))
    }

    pub fn open_path(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, FatError> {
        let (dir, leaf) = self.resolve_parent(path)?;
        self.open(dir, leaf, mode)
    }

    /// Creates a directory with its `.` and `..` entries. The new cluster is
    /// released again if the parent cannot take the entry.
    pub fn create_dir(&mut self, path: &str) -> Result<DirEntry, FatError> {
        let (parent, leaf) = self.resolve_parent(path)?;
        let name = ShortName::parse(leaf)?;
        if name.is_dot_entry() {
            return Err(FatError::InvalidName);
        }
        match self.lookup_name(parent, &name) {
            Ok(_) => return Err(FatError::DuplicateName),
            Err(FatError::NotFound) => {}
            Err(err) => return Err(err),
        }

        let volume = self.mounted_volume()?;
        let cluster = self.allocate_chain(NonZeroU32::MIN)?;
        let now = self.now();
        let created = self
            .init_dir_cluster(&volume, cluster, parent)
            .and_then(|()| self.insert(parent, &DirEntry::new_dir(name, cluster, now)));
        match created {
            Ok(entry) => {
                log::info!("sdfat: mkdir_ok path={} cluster={}", path, cluster);
                Ok(entry)
            }
            Err(err) => {
                if let Err(free_err) = self.free_chain(cluster) {
                    log::warn!(
                        "sdfat: mkdir rollback_error cluster={} err={:?}",
                        cluster,
                        free_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Deletes a file or empty directory and frees its clusters.
    pub fn remove_path(&mut self, path: &str) -> Result<(), FatError> {
        let (parent, leaf) = self.resolve_parent(path)?;
        let entry = self.lookup(parent, leaf)?;
        if entry.is_read_only() {
            return Err(FatError::AccessDenied);
        }
        let removed = self.remove(parent, leaf)?;
        let volume = self.mounted_volume()?;
        if volume.is_data_cluster(removed.first_cluster) {
            self.free_chain(removed.first_cluster)?;
        }
        log::info!("sdfat: rm_ok path={}", path);
        Ok(())
    }

    /// Renames within a directory, or moves between directories. A moved
    /// directory gets its `..` entry repointed.
    pub fn rename_path(&mut self, old: &str, new: &str) -> Result<DirEntry, FatError> {
        let (old_parent, old_leaf) = self.resolve_parent(old)?;
        let (new_parent, new_leaf) = self.resolve_parent(new)?;
        if old_parent == new_parent {
            let renamed = self.rename(old_parent, old_leaf, new_leaf)?;
            log::info!("sdfat: mv_ok old={} new={}", old, new);
            return Ok(renamed);
        }

        let new_name = ShortName::parse(new_leaf)?;
        let entry = self.lookup(old_parent, old_leaf)?;
        if new_name.is_dot_entry() || entry.name.is_dot_entry() {
            return Err(FatError::InvalidName);
        }
        match self.lookup_name(new_parent, &new_name) {
            Ok(_) => return Err(FatError::DuplicateName),
            Err(FatError::NotFound) => {}
            Err(err) => return Err(err),
        }
        if entry.is_dir() && self.is_within(new_parent, entry.first_cluster)? {
            return Err(FatError::AccessDenied);
        }

        let mut moved = entry.clone();
        moved.name = new_name;
        moved.location = None;
        let stored = self.insert(new_parent, &moved)?;
        if let Err(err) = self.erase_entry(&entry) {
            if let Err(undo_err) = self.erase_entry(&stored) {
                log::warn!("sdfat: mv rollback_error err={:?}", undo_err);
            }
            return Err(err);
        }

        let volume = self.mounted_volume()?;
        if stored.is_dir() && volume.is_data_cluster(stored.first_cluster) {
            let mut dotdot = self.lookup_name(stored.directory(), &ShortName::DOTDOT)?;
            dotdot.first_cluster = new_parent.first_cluster;
            self.update_entry(&dotdot)?;
        }
        log::info!("sdfat: mv_ok old={} new={} moved=true", old, new);
        Ok(stored)
    }

    /// Depth-first walk below `path` in directory order, skipping `.` and
    /// `..`. Each directory is reported before its contents. A directory
    /// that points back at one of its ancestors fails with `CorruptChain`.
    pub fn walk<F>(&mut self, path: &str, mut visitor: F) -> Result<(), FatError>
    where
        F: FnMut(&WalkEntry<'_>),
    {
        let start = self.resolve(path)?;
        if !start.is_dir() {
            visitor(&WalkEntry {
                depth: 0,
                ancestors: &[],
                entry: &start,
            });
            return Ok(());
        }

        let volume = self.mounted_volume()?;
        let mut cursors: heapless::Vec<DirCursor, { MAX_DEPTH + 1 }> = heapless::Vec::new();
        let mut names: heapless::Vec<ShortName, MAX_DEPTH> = heapless::Vec::new();
        let mut descent: heapless::Vec<u32, { MAX_DEPTH + 1 }> = heapless::Vec::new();
        let start_dir = start.directory();
        cursors
            .push(DirCursor::new(start_dir))
            .map_err(|_| FatError::PathTooDeep)?;
        descent
            .push(dir_key(&volume, start_dir.first_cluster))
            .map_err(|_| FatError::PathTooDeep)?;

        loop {
            let next = match cursors.last_mut() {
                Some(cursor) => cursor.next(self)?,
                None => break,
            };
            let Some(entry) = next else {
                cursors.pop();
                descent.pop();
                names.pop();
                continue;
            };
            if entry.name.is_dot_entry() {
                continue;
            }

            visitor(&WalkEntry {
                depth: names.len(),
                ancestors: names.as_slice(),
                entry: &entry,
            });
            if !entry.is_dir() {
                continue;
            }

            let key = dir_key(&volume, entry.first_cluster);
            if descent.contains(&key) {
                log::warn!(
                    "sdfat: walk cycle name={} cluster={}",
                    entry.name,
                    entry.first_cluster
                );
                self.flag_repair();
                return Err(FatError::CorruptChain(entry.first_cluster));
            }
            cursors
                .push(DirCursor::new(entry.directory()))
                .map_err(|_| FatError::PathTooDeep)?;
            descent.push(key).map_err(|_| FatError::PathTooDeep)?;
            names.push(entry.name).map_err(|_| FatError::PathTooDeep)?;
        }
        Ok(())
    }

    fn step(
        &mut self,
        current: DirEntry,
        component: &str,
        depth: &mut usize,
    ) -> Result<DirEntry, FatError> {
        if !current.is_dir() {
            return Err(FatError::NotFound);
        }
        match component {
            "." => return Ok(current),
            ".." if current.directory().is_root() => return Ok(current),
            _ => {}
        }
        *depth += 1;
        if *depth > MAX_DEPTH {
            return Err(FatError::PathTooDeep);
        }
        self.lookup(current.directory(), component)
    }

    /// True if `dir` is `cluster` or lies below it.
    fn is_within(&mut self, dir: Directory, cluster: u32) -> Result<bool, FatError> {
        let mut current = dir;
        for _ in 0..=MAX_DEPTH {
            if current.first_cluster == cluster {
                return Ok(true);
            }
            if current.is_root() {
                return Ok(false);
            }
            current = self.lookup_name(current, &ShortName::DOTDOT)?.directory();
        }
        Err(FatError::PathTooDeep)
    }

    fn init_dir_cluster(
        &mut self,
        volume: &Volume,
        cluster: u32,
        parent: Directory,
    ) -> Result<(), FatError> {
        let now = self.now();
        let size = volume.sector_size();
        let mut sector = [0u8; MAX_SECTOR_SIZE];
        DirEntry::new_dir(ShortName::DOT, cluster, now).encode(&mut sector[..DIR_ENTRY_SIZE]);
        DirEntry::new_dir(ShortName::DOTDOT, parent.first_cluster, now)
            .encode(&mut sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);

        let lba = volume.cluster_to_lba(cluster);
        self.write_direct(lba, &sector[..size])?;
        self.zero_sectors(lba + 1, volume.sectors_per_cluster as u32 - 1)
    }
}

/// Identity of a directory for cycle checks; the root is always 0.
fn dir_key(volume: &Volume, first_cluster: u32) -> u32 {
    if first_cluster == volume.root_cluster {
        0
    } else {
        first_cluster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_ignore_repeated_and_mixed_separators() {
        let parts: heapless::Vec<&str, 8> = components("//dir1\\sub//file.txt/").collect();
        assert_eq!(parts.as_slice(), &["dir1", "sub", "file.txt"]);
        assert_eq!(components("/").count(), 0);
        assert_eq!(components("").count(), 0);
    }
}
