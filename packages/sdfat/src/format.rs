use crate::{
    block::BlockDevice,
    dir::Attributes,
    error::{FatError, VolumeFault},
    volume::{encode_fs_info, parse_boot_sector, FatType, FsInfo, Volume, DIR_ENTRY_SIZE},
    MAX_SECTOR_SIZE, MIN_SECTOR_SIZE,
};

const MEDIA_FIXED: u8 = 0xF8;
const FAT32_RESERVED: u16 = 32;
const FAT32_ROOT_CLUSTER: u32 = 2;
const FAT32_FSINFO: u16 = 1;
const FAT32_BACKUP_BOOT: u16 = 6;
const NO_LABEL: [u8; 11] = *b"NO NAME    ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub fat_count: u8,
    /// Root directory slots on FAT12/16; ignored for FAT32.
    pub root_entries: u16,
    pub label: [u8; 11],
    pub serial: u32,
}

impl FormatOptions {
    pub fn new(total_sectors: u32) -> Self {
        let sectors_per_cluster = match total_sectors {
            0..=65_535 => 1,
            65_536..=1_048_575 => 4,
            _ => 8,
        };
        Self {
            total_sectors,
            sectors_per_cluster,
            fat_count: 2,
            root_entries: 512,
            label: NO_LABEL,
            serial: 0x5344_4641,
        }
    }

    pub fn sectors_per_cluster(mut self, sectors_per_cluster: u8) -> Self {
        self.sectors_per_cluster = sectors_per_cluster;
        self
    }

    /// Upper-cases and pads `label`; characters past 11 are dropped.
    pub fn label(mut self, label: &str) -> Self {
        self.label = [b' '; 11];
        for (dst, byte) in self.label.iter_mut().zip(label.bytes()) {
            *dst = byte.to_ascii_uppercase();
        }
        self
    }

    pub fn serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }
}

#[derive(Clone, Copy, Debug)]
struct Layout {
    fat_type: FatType,
    reserved: u16,
    root_entries: u16,
    root_sectors: u32,
    fat_size: u32,
    clusters: u32,
}

fn plan(options: &FormatOptions, bps: u32) -> Result<Layout, VolumeFault> {
    let spc = options.sectors_per_cluster;
    if spc == 0 || !spc.is_power_of_two() {
        return Err(VolumeFault::UnsupportedSectorsPerCluster(spc));
    }
    if options.fat_count == 0 {
        return Err(VolumeFault::NoFats);
    }
    if options.total_sectors == 0 {
        return Err(VolumeFault::NoTotalSectors);
    }

    let small = size_fats(options, bps, 1, options.root_entries)?;
    if small.fat_type != FatType::Fat32 {
        return Ok(small);
    }
    let large = size_fats(options, bps, FAT32_RESERVED, 0)?;
    if large.fat_type != FatType::Fat32 {
        return Err(VolumeFault::NoValidLayout);
    }
    Ok(large)
}

/// Grows the FAT until it can address every cluster left beside it.
fn size_fats(
    options: &FormatOptions,
    bps: u32,
    reserved: u16,
    root_entries: u16,
) -> Result<Layout, VolumeFault> {
    if root_entries == 0 && reserved != FAT32_RESERVED {
        return Err(VolumeFault::NoRootDirectory);
    }
    let root_sectors = (root_entries as u32 * DIR_ENTRY_SIZE as u32).div_ceil(bps);
    let fixed = reserved as u64 + root_sectors as u64;
    let spc = options.sectors_per_cluster as u64;
    let fats = options.fat_count as u64;

    let mut fat_size = 1u32;
    loop {
        let meta = fixed + fats * fat_size as u64;
        if options.total_sectors as u64 <= meta {
            return Err(VolumeFault::NoDataClusters);
        }
        let clusters = ((options.total_sectors as u64 - meta) / spc) as u32;
        if clusters == 0 {
            return Err(VolumeFault::NoDataClusters);
        }
        let fat_type = FatType::from_cluster_count(clusters);
        let needed = fat_type.table_bytes(clusters + 2).div_ceil(bps as u64) as u32;
        if needed <= fat_size {
            return Ok(Layout {
                fat_type,
                reserved,
                root_entries,
                root_sectors,
                fat_size,
                clusters,
            });
        }
        fat_size = needed;
    }
}

fn boot_sector(options: &FormatOptions, layout: &Layout, bps: u16, out: &mut [u8]) {
    out.fill(0);
    let fat32 = layout.fat_type == FatType::Fat32;
    out[..3].copy_from_slice(if fat32 { &[0xEB, 0x58, 0x90] } else { &[0xEB, 0x3C, 0x90] });
    out[3..11].copy_from_slice(b"SDFAT1.0");
    out[11..13].copy_from_slice(&bps.to_le_bytes());
    out[13] = options.sectors_per_cluster;
    out[14..16].copy_from_slice(&layout.reserved.to_le_bytes());
    out[16] = options.fat_count;
    out[17..19].copy_from_slice(&layout.root_entries.to_le_bytes());
    if !fat32 && options.total_sectors <= u16::MAX as u32 {
        out[19..21].copy_from_slice(&(options.total_sectors as u16).to_le_bytes());
    } else {
        out[32..36].copy_from_slice(&options.total_sectors.to_le_bytes());
    }
    out[21] = MEDIA_FIXED;
    out[24..26].copy_from_slice(&63u16.to_le_bytes());
    out[26..28].copy_from_slice(&255u16.to_le_bytes());

    let ext = if fat32 {
        out[36..40].copy_from_slice(&layout.fat_size.to_le_bytes());
        out[44..48].copy_from_slice(&FAT32_ROOT_CLUSTER.to_le_bytes());
        out[48..50].copy_from_slice(&FAT32_FSINFO.to_le_bytes());
        out[50..52].copy_from_slice(&FAT32_BACKUP_BOOT.to_le_bytes());
        64
    } else {
        out[22..24].copy_from_slice(&(layout.fat_size as u16).to_le_bytes());
        36
    };
    out[ext] = 0x80;
    out[ext + 2] = 0x29;
    out[ext + 3..ext + 7].copy_from_slice(&options.serial.to_le_bytes());
    out[ext + 7..ext + 18].copy_from_slice(&options.label);
    out[ext + 18..ext + 26].copy_from_slice(layout.fat_type.label());
    out[510] = 0x55;
    out[511] = 0xAA;
}

fn put<D: BlockDevice>(device: &mut D, lba: u32, buf: &[u8]) -> Result<(), FatError> {
    device.write_sector(lba, buf).map_err(|err| {
        log::warn!("sdfat: format write_error lba={} err={:?}", lba, err);
        FatError::Io { lba }
    })
}

/// Writes an empty FAT volume covering the first `options.total_sectors`
/// sectors of `device`. The width follows from the resulting cluster count.
pub fn format<D: BlockDevice>(device: &mut D, options: &FormatOptions) -> Result<Volume, FatError> {
    let sector_size = device.sector_size();
    if !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&sector_size)
        || !sector_size.is_power_of_two()
    {
        return Err(VolumeFault::UnsupportedSectorSize(sector_size as u16).into());
    }
    let layout = plan(options, sector_size as u32)?;
    let fat32 = layout.fat_type == FatType::Fat32;
    let fat_start = layout.reserved as u32;
    let root_start = fat_start + options.fat_count as u32 * layout.fat_size;
    let data_start = root_start + layout.root_sectors;
    let spc = options.sectors_per_cluster as u32;

    let mut sector = [0u8; MAX_SECTOR_SIZE];
    let buf = &mut sector[..sector_size];

    buf.fill(0);
    for lba in 1..data_start {
        put(device, lba, buf)?;
    }
    if fat32 {
        for lba in data_start..data_start + spc {
            put(device, lba, buf)?;
        }
    }

    let head: &[u8] = match layout.fat_type {
        FatType::Fat12 => &[MEDIA_FIXED, 0xFF, 0xFF],
        FatType::Fat16 => &[MEDIA_FIXED, 0xFF, 0xFF, 0xFF],
        FatType::Fat32 => &[
            MEDIA_FIXED, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F,
        ],
    };
    buf[..head.len()].copy_from_slice(head);
    for copy in 0..options.fat_count as u32 {
        put(device, fat_start + copy * layout.fat_size, buf)?;
    }

    if options.label != NO_LABEL && options.label != [b' '; 11] {
        buf.fill(0);
        buf[..11].copy_from_slice(&options.label);
        buf[11] = Attributes::VOLUME_ID.bits();
        let label_lba = if fat32 { data_start } else { root_start };
        put(device, label_lba, buf)?;
    }

    if fat32 {
        buf.fill(0);
        encode_fs_info(
            buf,
            FsInfo {
                free_count: Some(layout.clusters - 1),
                next_free: Some(FAT32_ROOT_CLUSTER + 1),
            },
        );
        put(device, FAT32_FSINFO as u32, buf)?;
        put(device, FAT32_BACKUP_BOOT as u32 + FAT32_FSINFO as u32, buf)?;
    }

    boot_sector(options, &layout, sector_size as u16, buf);
    if fat32 {
        put(device, FAT32_BACKUP_BOOT as u32, buf)?;
    }
    put(device, 0, buf)?;

    let volume = parse_boot_sector(buf, 0, sector_size)?;
    log::info!(
        "sdfat: format_ok type={:?} clusters={} fat_sectors={} label={}",
        volume.fat_type,
        volume.cluster_count,
        volume.fat_size,
        volume.label_str()
    );
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_volume_plans_as_fat12() {
        let layout = plan(&FormatOptions::new(99), 512).unwrap();
        assert_eq!(layout.fat_type, FatType::Fat12);
        assert_eq!(layout.clusters, 64);
        assert_eq!(layout.fat_size, 1);
        assert_eq!(layout.root_sectors, 32);
    }

    #[test]
    fn cluster_count_picks_width() {
        let fat16 = plan(&FormatOptions::new(5000), 512).unwrap();
        assert_eq!(fat16.fat_type, FatType::Fat16);
        assert!(fat16.clusters >= 4085);

        let fat32 = plan(&FormatOptions::new(70_000).sectors_per_cluster(1), 512).unwrap();
        assert_eq!(fat32.fat_type, FatType::Fat32);
        assert_eq!(fat32.reserved, FAT32_RESERVED);
        assert_eq!(fat32.root_entries, 0);
    }

    #[test]
    fn rejects_impossible_geometry() {
        assert_eq!(
            plan(&FormatOptions::new(10), 512).unwrap_err(),
            VolumeFault::NoDataClusters
        );
        assert_eq!(
            plan(&FormatOptions::new(5000).sectors_per_cluster(3), 512).unwrap_err(),
            VolumeFault::UnsupportedSectorsPerCluster(3)
        );
    }

    #[test]
    fn label_is_padded_and_upper_cased() {
        let options = FormatOptions::new(99).label("data");
        assert_eq!(&options.label, b"DATA       ");
    }
}
