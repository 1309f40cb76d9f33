use crate::{
    error::VolumeFault,
    MAX_SECTOR_SIZE, MIN_SECTOR_SIZE,
};

pub(crate) const BOOT_SIGNATURE_OFFSET: usize = 510;
pub(crate) const DIR_ENTRY_SIZE: usize = 32;
const FAT12_MAX_CLUSTERS: u32 = 4084;
const FAT16_MAX_CLUSTERS: u32 = 65524;
const FSINFO_LEAD_SIG: u32 = 0x4161_5252;
const FSINFO_STRUCT_SIG: u32 = 0x6141_7272;
const FSINFO_TRAIL_SIG: u32 = 0xAA55_0000;
const FSINFO_UNKNOWN: u32 = 0xFFFF_FFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Width is a function of the cluster count alone; the type string in the
    /// boot sector is never consulted.
    pub fn from_cluster_count(clusters: u32) -> Self {
        if clusters <= FAT12_MAX_CLUSTERS {
            Self::Fat12
        } else if clusters <= FAT16_MAX_CLUSTERS {
            Self::Fat16
        } else {
            Self::Fat32
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 32,
        }
    }

    /// Bytes needed to hold `entries` FAT entries.
    pub fn table_bytes(self, entries: u32) -> u64 {
        let entries = entries as u64;
        match self {
            Self::Fat12 => (entries * 3 + 1) / 2,
            Self::Fat16 => entries * 2,
            Self::Fat32 => entries * 4,
        }
    }

    pub fn label(self) -> &'static [u8; 8] {
        match self {
            Self::Fat12 => b"FAT12   ",
            Self::Fat16 => b"FAT16   ",
            Self::Fat32 => b"FAT32   ",
        }
    }
}

/// Geometry of a mounted volume. Immutable for the lifetime of a mount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Volume {
    pub fat_type: FatType,
    pub partition_start: u32,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub fat_size: u32,
    pub fat_start: u32,
    pub root_entry_count: u16,
    pub root_dir_start: u32,
    pub root_dir_sectors: u32,
    pub root_cluster: u32,
    pub data_start: u32,
    pub total_sectors: u32,
    pub cluster_count: u32,
    pub fs_info_sector: Option<u32>,
    pub serial: u32,
    pub label: [u8; 11],
}

impl Volume {
    pub fn sector_size(&self) -> usize {
        self.bytes_per_sector as usize
    }

    pub fn cluster_size(&self) -> usize {
        self.sector_size() * self.sectors_per_cluster as usize
    }

    /// Highest valid cluster index; data clusters are `2..=max_cluster()`.
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        (2..=self.max_cluster()).contains(&cluster)
    }

    pub fn cluster_to_lba(&self, cluster: u32) -> u32 {
        self.data_start + (cluster - 2) * self.sectors_per_cluster as u32
    }

    pub fn entries_per_sector(&self) -> u32 {
        (self.sector_size() / DIR_ENTRY_SIZE) as u32
    }

    pub fn entries_per_cluster(&self) -> u32 {
        (self.cluster_size() / DIR_ENTRY_SIZE) as u32
    }

    pub fn total_bytes(&self) -> u64 {
        self.cluster_count as u64 * self.cluster_size() as u64
    }

    pub fn label_str(&self) -> &str {
        let end = self
            .label
            .iter()
            .rposition(|&b| b != b' ')
            .map(|idx| idx + 1)
            .unwrap_or(0);
        core::str::from_utf8(&self.label[..end]).unwrap_or("")
    }
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= MIN_SECTOR_SIZE
        && sector[BOOT_SIGNATURE_OFFSET] == 0x55
        && sector[BOOT_SIGNATURE_OFFSET + 1] == 0xAA
}

/// A volume boot record starts with a jump instruction; an MBR does not.
pub(crate) fn looks_like_boot_sector(sector: &[u8]) -> bool {
    has_boot_signature(sector) && matches!(sector[0], 0xEB | 0xE9 | 0xE8)
}

/// Start LBAs of FAT-typed primary partitions in an MBR.
pub(crate) fn fat_partitions(sector0: &[u8]) -> heapless::Vec<u32, 4> {
    let mut out = heapless::Vec::new();
    if !has_boot_signature(sector0) {
        return out;
    }
    for i in 0..4 {
        let base = 446 + i * 16;
        let part_type = sector0[base + 4];
        if !matches!(part_type, 0x01 | 0x04 | 0x06 | 0x0B | 0x0C | 0x0E) {
            continue;
        }
        let start = le_u32(sector0, base + 8);
        if start != 0 {
            let _ = out.push(start);
        }
    }
    out
}

pub fn parse_boot_sector(
    boot: &[u8],
    partition_start: u32,
    device_sector_size: usize,
) -> Result<Volume, VolumeFault> {
    if !has_boot_signature(boot) {
        return Err(VolumeFault::MissingSignature);
    }

    let bytes_per_sector = le_u16(boot, 11);
    let bps = bytes_per_sector as usize;
    if !bytes_per_sector.is_power_of_two() || !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&bps) {
        return Err(VolumeFault::UnsupportedSectorSize(bytes_per_sector));
    }
    if bps != device_sector_size {
        return Err(VolumeFault::SectorSizeMismatch {
            device: device_sector_size,
            volume: bytes_per_sector,
        });
    }

    let sectors_per_cluster = boot[13];
    if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
        return Err(VolumeFault::UnsupportedSectorsPerCluster(sectors_per_cluster));
    }

    let reserved_sectors = le_u16(boot, 14);
    if reserved_sectors == 0 {
        return Err(VolumeFault::NoReservedSectors);
    }
    let fat_count = boot[16];
    if fat_count == 0 {
        return Err(VolumeFault::NoFats);
    }

    let root_entry_count = le_u16(boot, 17);
    let total_16 = le_u16(boot, 19) as u32;
    let fat_size_16 = le_u16(boot, 22) as u32;
    let total_32 = le_u32(boot, 32);
    let fat_size_32 = le_u32(boot, 36);

    let total_sectors = if total_16 != 0 { total_16 } else { total_32 };
    if total_sectors == 0 {
        return Err(VolumeFault::NoTotalSectors);
    }
    let fat_size = if fat_size_16 != 0 { fat_size_16 } else { fat_size_32 };
    if fat_size == 0 {
        return Err(VolumeFault::NoFatSectors);
    }

    let root_dir_bytes = root_entry_count as u64 * DIR_ENTRY_SIZE as u64;
    let root_dir_sectors = root_dir_bytes.div_ceil(bps as u64);
    let meta_sectors =
        reserved_sectors as u64 + fat_count as u64 * fat_size as u64 + root_dir_sectors;
    if total_sectors as u64 <= meta_sectors {
        return Err(VolumeFault::NoDataClusters);
    }
    let cluster_count = ((total_sectors as u64 - meta_sectors) / sectors_per_cluster as u64) as u32;
    if cluster_count == 0 {
        return Err(VolumeFault::NoDataClusters);
    }

    let fat_type = FatType::from_cluster_count(cluster_count);
    if (fat_size as u64) * (bps as u64) < fat_type.table_bytes(cluster_count + 2) {
        return Err(VolumeFault::FatTooSmall);
    }

    // Every derived LBA stays below the volume end, so this bounds them all.
    if partition_start.checked_add(total_sectors).is_none() {
        return Err(VolumeFault::NoDataClusters);
    }
    let fat_start = partition_start + reserved_sectors as u32;
    let root_dir_start = fat_start + fat_count as u32 * fat_size;
    let data_start = root_dir_start + root_dir_sectors as u32;

    let (root_cluster, fs_info_sector, ext_base) = match fat_type {
        FatType::Fat32 => {
            if root_entry_count != 0 {
                return Err(VolumeFault::RootEntriesOnFat32);
            }
            let root_cluster = le_u32(boot, 44) & 0x0FFF_FFFF;
            if !(2..=cluster_count + 1).contains(&root_cluster) {
                return Err(VolumeFault::BadRootCluster(root_cluster));
            }
            let fs_info = le_u16(boot, 48);
            let fs_info_sector = if fs_info != 0 && fs_info < reserved_sectors {
                Some(partition_start + fs_info as u32)
            } else {
                None
            };
            (root_cluster, fs_info_sector, 64usize)
        }
        FatType::Fat12 | FatType::Fat16 => {
            if root_entry_count == 0 {
                return Err(VolumeFault::NoRootDirectory);
            }
            (0, None, 36usize)
        }
    };

    let mut label = [b' '; 11];
    let mut serial = 0;
    if boot[ext_base + 2] == 0x29 {
        serial = le_u32(boot, ext_base + 3);
        label.copy_from_slice(&boot[ext_base + 7..ext_base + 18]);
    }

    Ok(Volume {
        fat_type,
        partition_start,
        bytes_per_sector,
        sectors_per_cluster,
        reserved_sectors,
        fat_count,
        fat_size,
        fat_start,
        root_entry_count,
        root_dir_start,
        root_dir_sectors: root_dir_sectors as u32,
        root_cluster,
        data_start,
        total_sectors,
        cluster_count,
        fs_info_sector,
        serial,
        label,
    })
}

/// Advisory allocation hints kept in the FAT32 FSInfo sector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: Option<u32>,
    pub next_free: Option<u32>,
}

pub(crate) fn parse_fs_info(sector: &[u8]) -> Option<FsInfo> {
    if le_u32(sector, 0) != FSINFO_LEAD_SIG
        || le_u32(sector, 484) != FSINFO_STRUCT_SIG
        || le_u32(sector, 508) != FSINFO_TRAIL_SIG
    {
        return None;
    }
    let known = |raw: u32| (raw != FSINFO_UNKNOWN).then_some(raw);
    Some(FsInfo {
        free_count: known(le_u32(sector, 488)),
        next_free: known(le_u32(sector, 492)),
    })
}

pub(crate) fn encode_fs_info(sector: &mut [u8], info: FsInfo) {
    sector[0..4].copy_from_slice(&FSINFO_LEAD_SIG.to_le_bytes());
    sector[484..488].copy_from_slice(&FSINFO_STRUCT_SIG.to_le_bytes());
    sector[488..492].copy_from_slice(&info.free_count.unwrap_or(FSINFO_UNKNOWN).to_le_bytes());
    sector[492..496].copy_from_slice(&info.next_free.unwrap_or(FSINFO_UNKNOWN).to_le_bytes());
    sector[508..512].copy_from_slice(&FSINFO_TRAIL_SIG.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fat16_boot(total_sectors: u16, spc: u8, fat_size: u16) -> [u8; 512] {
        let mut boot = [0u8; 512];
        boot[0] = 0xEB;
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = spc;
        boot[14..16].copy_from_slice(&1u16.to_le_bytes());
        boot[16] = 2;
        boot[17..19].copy_from_slice(&512u16.to_le_bytes());
        boot[19..21].copy_from_slice(&total_sectors.to_le_bytes());
        boot[21] = 0xF8;
        boot[22..24].copy_from_slice(&fat_size.to_le_bytes());
        boot[38] = 0x29;
        boot[39..43].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        boot[43..54].copy_from_slice(b"TESTVOL    ");
        boot[54..62].copy_from_slice(b"FAT32   ");
        boot[510] = 0x55;
        boot[511] = 0xAA;
        boot
    }

    #[test]
    fn width_follows_cluster_count_boundaries() {
        assert_eq!(FatType::from_cluster_count(1), FatType::Fat12);
        assert_eq!(FatType::from_cluster_count(4084), FatType::Fat12);
        assert_eq!(FatType::from_cluster_count(4085), FatType::Fat16);
        assert_eq!(FatType::from_cluster_count(65524), FatType::Fat16);
        assert_eq!(FatType::from_cluster_count(65525), FatType::Fat32);
    }

    #[test]
    fn parses_geometry_and_ignores_type_string() {
        // 1 reserved + 2*32 FAT + 32 root = 97 meta sectors.
        let boot = fat16_boot(8000, 1, 32);
        let volume = parse_boot_sector(&boot, 0, 512).unwrap();
        assert_eq!(volume.cluster_count, 8000 - 97);
        assert_eq!(volume.fat_type, FatType::Fat16);
        assert_eq!(volume.fat_start, 1);
        assert_eq!(volume.root_dir_start, 65);
        assert_eq!(volume.root_dir_sectors, 32);
        assert_eq!(volume.data_start, 97);
        assert_eq!(volume.serial, 0x1234_5678);
        assert_eq!(volume.label_str(), "TESTVOL");
        assert_eq!(volume.cluster_to_lba(2), 97);
    }

    #[test]
    fn small_volume_is_fat12_whatever_it_claims() {
        let boot = fat16_boot(200, 1, 1);
        let volume = parse_boot_sector(&boot, 0, 512).unwrap();
        assert_eq!(volume.fat_type, FatType::Fat12);
        assert_eq!(volume.cluster_count, 200 - 35);
    }

    #[test]
    fn rejects_missing_signature() {
        let mut boot = fat16_boot(8000, 1, 32);
        boot[511] = 0;
        assert_eq!(parse_boot_sector(&boot, 0, 512), Err(VolumeFault::MissingSignature));
    }

    #[test]
    fn rejects_bad_sector_geometry() {
        let mut boot = fat16_boot(8000, 1, 32);
        boot[11..13].copy_from_slice(&768u16.to_le_bytes());
        assert_eq!(
            parse_boot_sector(&boot, 0, 512),
            Err(VolumeFault::UnsupportedSectorSize(768))
        );

        let mut boot = fat16_boot(8000, 1, 32);
        boot[11..13].copy_from_slice(&256u16.to_le_bytes());
        assert_eq!(
            parse_boot_sector(&boot, 0, 512),
            Err(VolumeFault::UnsupportedSectorSize(256))
        );

        let mut boot = fat16_boot(8000, 0, 32);
        boot[13] = 0;
        assert_eq!(
            parse_boot_sector(&boot, 0, 512),
            Err(VolumeFault::UnsupportedSectorsPerCluster(0))
        );

        let boot = fat16_boot(8000, 3, 32);
        assert_eq!(
            parse_boot_sector(&boot, 0, 512),
            Err(VolumeFault::UnsupportedSectorsPerCluster(3))
        );
    }

    #[test]
    fn rejects_fat_that_cannot_address_clusters() {
        let boot = fat16_boot(8000, 1, 2);
        assert_eq!(parse_boot_sector(&boot, 0, 512), Err(VolumeFault::FatTooSmall));
    }

    #[test]
    fn rejects_device_sector_size_mismatch() {
        let boot = fat16_boot(8000, 1, 32);
        assert_eq!(
            parse_boot_sector(&boot, 0, 4096),
            Err(VolumeFault::SectorSizeMismatch {
                device: 4096,
                volume: 512
            })
        );
    }

    #[test]
    fn rejects_volume_running_past_last_lba() {
        let boot = fat16_boot(8000, 1, 32);
        assert_eq!(
            parse_boot_sector(&boot, u32::MAX - 100, 512),
            Err(VolumeFault::NoDataClusters)
        );
        let volume = parse_boot_sector(&boot, u32::MAX - 8000, 512).unwrap();
        assert_eq!(volume.cluster_to_lba(volume.max_cluster()), u32::MAX - 1);
    }

    #[test]
    fn fs_info_roundtrips_unknown_fields() {
        let mut sector = [0u8; 512];
        encode_fs_info(
            &mut sector,
            FsInfo {
                free_count: Some(17),
                next_free: None,
            },
        );
        let info = parse_fs_info(&sector).unwrap();
        assert_eq!(info.free_count, Some(17));
        assert_eq!(info.next_free, None);
        sector[0] = 0;
        assert!(parse_fs_info(&sector).is_none());
    }

    #[test]
    fn finds_fat_partitions_in_mbr() {
        let mut mbr = [0u8; 512];
        mbr[446 + 4] = 0x83;
        mbr[446 + 8..446 + 12].copy_from_slice(&2048u32.to_le_bytes());
        mbr[462 + 4] = 0x0C;
        mbr[462 + 8..462 + 12].copy_from_slice(&63u32.to_le_bytes());
        mbr[510] = 0x55;
        mbr[511] = 0xAA;
        assert!(!looks_like_boot_sector(&mbr));
        assert_eq!(fat_partitions(&mbr).as_slice(), &[63]);
    }
}
