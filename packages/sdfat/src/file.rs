use core::num::NonZeroU32;

use crate::{
    block::BlockDevice,
    dir::{Attributes, DirEntry, Directory, ShortName},
    error::FatError,
    fs::FileSystem,
    table::{clusters_for, FatEntry},
    time::Clock,
    volume::Volume,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    /// Creates a new, empty file; fails if the name exists.
    Create,
}

impl OpenMode {
    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::Create)
    }
}

/// Cluster index within the file and the cluster it maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ClusterCursor {
    index: u32,
    cluster: u32,
}

/// An open file. Holds a copy of its directory entry; changes reach the disk
/// on `sync` or `close`.
#[derive(Debug)]
pub struct FileHandle {
    generation: u32,
    entry: DirEntry,
    mode: OpenMode,
    position: u32,
    cursor: Option<ClusterCursor>,
    dirty: bool,
}

impl FileHandle {
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn len(&self) -> u32 {
        self.entry.size
    }

    pub fn is_empty(&self) -> bool {
        self.entry.size == 0
    }

    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl<D: BlockDevice, C: Clock> FileSystem<D, C> {
    pub fn open(
        &mut self,
        dir: Directory,
        name: &str,
        mode: OpenMode,
    ) -> Result<FileHandle, FatError> {
        let entry = match mode {
            OpenMode::Read | OpenMode::Write => {
                let entry = self.lookup(dir, name)?;
                if entry.is_dir() {
                    return Err(FatError::IsDirectory);
                }
                if mode == OpenMode::Write && entry.is_read_only() {
                    return Err(FatError::AccessDenied);
                }
                entry
            }
            OpenMode::Create => {
                let name = ShortName::parse(name)?;
                let fresh = DirEntry::new_file(name, self.now());
                self.insert(dir, &fresh)?
            }
        };
        Ok(self.handle_for(entry, mode))
    }

    pub(crate) fn handle_for(&self, entry: DirEntry, mode: OpenMode) -> FileHandle {
        FileHandle {
            generation: self.generation(),
            entry,
            mode,
            position: 0,
            cursor: None,
            dirty: false,
        }
    }

    /// Reads from the current position. Returns fewer bytes than requested
    /// only at end of file.
    pub fn read(&mut self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize, FatError> {
        let volume = self.check_handle(handle)?;
        let remaining = handle.entry.size.saturating_sub(handle.position) as usize;
        let want = buf.len().min(remaining);
        let cluster_size = volume.cluster_size() as u32;
        let sector_size = volume.sector_size();

        let mut done = 0usize;
        while done < want {
            let pos = handle.position;
            let cluster = self.cluster_for(handle, pos / cluster_size)?;
            let lba = volume.cluster_to_lba(cluster) + (pos % cluster_size) / sector_size as u32;
            let in_sector = pos as usize % sector_size;
            let n = (sector_size - in_sector).min(want - done);

            if n == sector_size {
                self.read_direct(lba, &mut buf[done..done + n])?;
            } else {
                self.load(lba)?;
                buf[done..done + n].copy_from_slice(&self.window()[in_sector..in_sector + n]);
            }
            done += n;
            handle.position += n as u32;
        }
        Ok(done)
    }

    /// Writes at the current position, growing the file as needed. Clusters
    /// are reserved before any data is written; if that fails nothing
    /// changes.
    pub fn write(&mut self, handle: &mut FileHandle, data: &[u8]) -> Result<usize, FatError> {
        let volume = self.check_handle(handle)?;
        if !handle.mode.writable() {
            return Err(FatError::AccessDenied);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let end = handle.position as u64 + data.len() as u64;
        if end > u32::MAX as u64 {
            return Err(FatError::FileTooLarge);
        }
        self.reserve_clusters(handle, &volume, end)?;
        handle.dirty = true;

        let cluster_size = volume.cluster_size() as u32;
        let sector_size = volume.sector_size();
        let mut done = 0usize;
        while done < data.len() {
            let pos = handle.position;
            let cluster = self.cluster_for(handle, pos / cluster_size)?;
            let lba = volume.cluster_to_lba(cluster) + (pos % cluster_size) / sector_size as u32;
            let in_sector = pos as usize % sector_size;
            let n = (sector_size - in_sector).min(data.len() - done);

            if n == sector_size {
                self.write_direct(lba, &data[done..done + n])?;
            } else {
                self.load(lba)?;
                self.window_mut()[in_sector..in_sector + n].copy_from_slice(&data[done..done + n]);
                self.store()?;
            }
            done += n;
            handle.position += n as u32;
            if handle.position > handle.entry.size {
                handle.entry.size = handle.position;
            }
        }
        Ok(done)
    }

    /// Moves the position, clamped to the file length. Returns the new
    /// position.
    pub fn seek(&mut self, handle: &mut FileHandle, position: u32) -> Result<u32, FatError> {
        self.check_handle(handle)?;
        handle.position = position.min(handle.entry.size);
        Ok(handle.position)
    }

    /// Cuts the file at the current position and frees the clusters past it.
    pub fn truncate(&mut self, handle: &mut FileHandle) -> Result<(), FatError> {
        let volume = self.check_handle(handle)?;
        if !handle.mode.writable() {
            return Err(FatError::AccessDenied);
        }
        if handle.position >= handle.entry.size {
            return Ok(());
        }
        let keep = clusters_for(handle.position as u64, volume.cluster_size());
        let first = handle.entry.first_cluster;

        if keep == 0 {
            handle.entry.first_cluster = 0;
            handle.cursor = None;
            if volume.is_data_cluster(first) {
                self.free_chain(first)?;
            }
        } else {
            let last = self.cluster_for(handle, keep - 1)?;
            if let Some(tail) = self.next_cluster(last)? {
                self.write_entry(last, FatEntry::EndOfChain)?;
                self.free_chain(tail)?;
            }
        }
        handle.entry.size = handle.position;
        handle.dirty = true;
        Ok(())
    }

    /// Persists size, first cluster and timestamps without closing.
    pub fn sync(&mut self, handle: &mut FileHandle) -> Result<(), FatError> {
        self.check_handle(handle)?;
        if !handle.dirty {
            return Ok(());
        }
        let now = self.now();
        let mut updated = handle.entry.clone();
        updated.modified = now;
        updated.accessed_date = now.date;
        updated.attributes |= Attributes::ARCHIVE;
        self.update_entry(&updated)?;
        handle.entry = updated;
        handle.dirty = false;
        Ok(())
    }

    pub fn close(&mut self, mut handle: FileHandle) -> Result<(), FatError> {
        self.sync(&mut handle)
    }

    fn check_handle(&self, handle: &FileHandle) -> Result<Volume, FatError> {
        match self.volume() {
            Some(volume) if handle.generation == self.generation() => Ok(*volume),
            _ => Err(FatError::StaleHandle),
        }
    }

    /// Cluster `index` of the file, walking forward from the cached cursor
    /// and restarting at the first cluster only when `index` lies behind it.
    fn cluster_for(&mut self, handle: &mut FileHandle, index: u32) -> Result<u32, FatError> {
        let start = match handle.cursor {
            Some(cursor) if cursor.index <= index => cursor,
            _ => {
                let first = handle.entry.first_cluster;
                if !self.mounted_volume()?.is_data_cluster(first) {
                    self.flag_repair();
                    return Err(FatError::InvalidCluster(first));
                }
                ClusterCursor {
                    index: 0,
                    cluster: first,
                }
            }
        };
        let cluster = self.walk_forward(start.cluster, index - start.index)?;
        handle.cursor = Some(ClusterCursor { index, cluster });
        Ok(cluster)
    }

    /// Makes the chain long enough to hold `end` bytes.
    fn reserve_clusters(
        &mut self,
        handle: &mut FileHandle,
        volume: &Volume,
        end: u64,
    ) -> Result<(), FatError> {
        let needed = clusters_for(end, volume.cluster_size());
        let first = handle.entry.first_cluster;

        if first == 0 {
            let Some(count) = NonZeroU32::new(needed) else {
                return Ok(());
            };
            let first = self.allocate_chain(count)?;
            handle.entry.first_cluster = first;
            handle.cursor = Some(ClusterCursor {
                index: 0,
                cluster: first,
            });
            handle.dirty = true;
            return Ok(());
        }

        let tail = self.chain_tail(handle)?;
        if let Some(extra) = NonZeroU32::new(needed.saturating_sub(tail.index + 1)) {
            self.extend_chain(tail.cluster, extra)?;
        }
        Ok(())
    }

    fn chain_tail(&mut self, handle: &mut FileHandle) -> Result<ClusterCursor, FatError> {
        let volume = self.mounted_volume()?;
        let mut at = match handle.cursor {
            Some(cursor) => cursor,
            None => {
                self.cluster_for(handle, 0)?;
                ClusterCursor {
                    index: 0,
                    cluster: handle.entry.first_cluster,
                }
            }
        };
        while let Some(next) = self.next_cluster(at.cluster)? {
            if at.index >= volume.cluster_count {
                self.flag_repair();
                return Err(FatError::CorruptChain(next));
            }
            at = ClusterCursor {
                index: at.index + 1,
                cluster: next,
            };
        }
        handle.cursor = Some(at);
        Ok(at)
    }
}
