use core::fmt;

use bitflags::bitflags;

use crate::{
    error::FatError,
    time::FatTimestamp,
    volume::{le_u16, le_u32, FatType, DIR_ENTRY_SIZE},
};

use super::Directory;

pub(crate) const SLOT_FREE: u8 = 0xE5;
pub(crate) const SLOT_END: u8 = 0x00;
/// A leading 0xE5 in a real name is stored as 0x05.
const KANJI_LEAD: u8 = 0x05;
const NAME_SPECIAL: &[u8] = b"$%'-_@~`!(){}^#&";

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = 0x0F;
    }
}

pub(crate) fn is_long_name_slot(attr: u8) -> bool {
    attr & 0x3F == Attributes::LONG_NAME.bits()
}

/// Space-padded 8.3 name as stored on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    pub const DOT: Self = Self(*b".          ");
    pub const DOTDOT: Self = Self(*b"..         ");

    /// Parses `BASE.EXT` (up to 8 + 3 characters), upper-casing ASCII letters.
    pub fn parse(text: &str) -> Result<Self, FatError> {
        match text {
            "." => return Ok(Self::DOT),
            ".." => return Ok(Self::DOTDOT),
            _ => {}
        }
        let bytes = text.as_bytes();
        let (base, ext) = match bytes.iter().rposition(|&b| b == b'.') {
            Some(dot) => (&bytes[..dot], &bytes[dot + 1..]),
            None => (bytes, &[][..]),
        };
        if base.is_empty() || base.len() > 8 || ext.len() > 3 {
            return Err(FatError::InvalidName);
        }
        if bytes.contains(&b'.') && ext.is_empty() {
            return Err(FatError::InvalidName);
        }

        let mut raw = [b' '; 11];
        for (dst, &src) in raw[..8].iter_mut().zip(base) {
            *dst = Self::name_byte(src)?;
        }
        for (dst, &src) in raw[8..].iter_mut().zip(ext) {
            *dst = Self::name_byte(src)?;
        }
        Ok(Self(raw))
    }

    fn name_byte(byte: u8) -> Result<u8, FatError> {
        if byte.is_ascii_alphanumeric() || NAME_SPECIAL.contains(&byte) {
            Ok(byte.to_ascii_uppercase())
        } else {
            Err(FatError::InvalidName)
        }
    }

    pub fn is_dot_entry(&self) -> bool {
        *self == Self::DOT || *self == Self::DOTDOT
    }

    pub fn matches(&self, other: &ShortName) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// `NAME.EXT` with the padding removed.
    pub fn to_text(&self) -> heapless::String<12> {
        let mut out = heapless::String::new();
        let base_end = self.0[..8].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        let ext_end = self.0[8..].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        for (idx, &byte) in self.0[..base_end].iter().enumerate() {
            let byte = if idx == 0 && byte == KANJI_LEAD { SLOT_FREE } else { byte };
            let _ = out.push(if byte.is_ascii() { byte as char } else { '?' });
        }
        if ext_end > 0 {
            let _ = out.push('.');
            for &byte in &self.0[8..8 + ext_end] {
                let _ = out.push(if byte.is_ascii() { byte as char } else { '?' });
            }
        }
        out
    }

    /// Checksum stored in every long-name slot that belongs to this name.
    pub fn checksum(&self) -> u8 {
        self.0
            .iter()
            .fold(0u8, |sum, &byte| sum.rotate_right(1).wrapping_add(byte))
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({})", self.to_text())
    }
}

/// Where an entry was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotLocation {
    pub dir: Directory,
    pub index: u32,
    pub lba: u32,
    pub offset: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: ShortName,
    pub attributes: Attributes,
    pub size: u32,
    pub first_cluster: u32,
    pub created: FatTimestamp,
    pub modified: FatTimestamp,
    pub accessed_date: u16,
    pub(crate) location: Option<SlotLocation>,
}

impl DirEntry {
    pub fn new_file(name: ShortName, now: FatTimestamp) -> Self {
        Self {
            name,
            attributes: Attributes::ARCHIVE,
            size: 0,
            first_cluster: 0,
            created: now,
            modified: now,
            accessed_date: now.date,
            location: None,
        }
    }

    pub fn new_dir(name: ShortName, first_cluster: u32, now: FatTimestamp) -> Self {
        Self {
            attributes: Attributes::DIRECTORY,
            first_cluster,
            ..Self::new_file(name, now)
        }
    }

    /// Synthetic entry for the root directory, which has no slot of its own.
    pub fn root() -> Self {
        Self {
            attributes: Attributes::DIRECTORY,
            ..Self::new_file(ShortName([b' '; 11]), FatTimestamp::default())
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    pub fn is_root(&self) -> bool {
        self.is_dir() && self.location.is_none()
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(Attributes::READ_ONLY)
    }

    /// Slot index within the parent directory, if the entry came from disk.
    pub fn slot_index(&self) -> Option<u32> {
        self.location.map(|loc| loc.index)
    }

    /// Parent directory the entry was read from.
    pub fn parent(&self) -> Option<Directory> {
        self.location.map(|loc| loc.dir)
    }

    /// The directory this entry describes. Only meaningful for directories.
    pub fn directory(&self) -> Directory {
        Directory {
            first_cluster: self.first_cluster,
        }
    }

    pub(crate) fn decode(raw: &[u8], fat_type: FatType) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[..11]);
        let cluster_hi = match fat_type {
            FatType::Fat32 => le_u16(raw, 20) as u32,
            FatType::Fat12 | FatType::Fat16 => 0,
        };
        Self {
            name: ShortName(name),
            attributes: Attributes::from_bits_retain(raw[11]),
            size: le_u32(raw, 28),
            first_cluster: (cluster_hi << 16) | le_u16(raw, 26) as u32,
            created: FatTimestamp {
                date: le_u16(raw, 16),
                time: le_u16(raw, 14),
            },
            modified: FatTimestamp {
                date: le_u16(raw, 24),
                time: le_u16(raw, 22),
            },
            accessed_date: le_u16(raw, 18),
            location: None,
        }
    }

    /// Writes every field into `raw`. Bytes 12 and 13 (case flags and
    /// creation tenths) are left as found.
    pub(crate) fn encode(&self, raw: &mut [u8]) {
        debug_assert!(raw.len() >= DIR_ENTRY_SIZE);
        raw[..11].copy_from_slice(&self.name.0);
        raw[11] = self.attributes.bits();
        raw[14..16].copy_from_slice(&self.created.time.to_le_bytes());
        raw[16..18].copy_from_slice(&self.created.date.to_le_bytes());
        raw[18..20].copy_from_slice(&self.accessed_date.to_le_bytes());
        raw[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        raw[22..24].copy_from_slice(&self.modified.time.to_le_bytes());
        raw[24..26].copy_from_slice(&self.modified.date.to_le_bytes());
        raw[26..28].copy_from_slice(&(self.first_cluster as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&self.size.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_pads_short_names() {
        let name = ShortName::parse("readme.txt").unwrap();
        assert_eq!(&name.0, b"README  TXT");
        assert_eq!(name.to_text().as_str(), "README.TXT");

        let name = ShortName::parse("DIR1").unwrap();
        assert_eq!(&name.0, b"DIR1       ");
        assert_eq!(name.to_text().as_str(), "DIR1");

        assert_eq!(ShortName::parse("..").unwrap(), ShortName::DOTDOT);
        assert!(ShortName::DOT.is_dot_entry());
    }

    #[test]
    fn rejects_names_that_do_not_fit() {
        for bad in ["", "toolongname.txt", "a.text", ".hidden", "a b", "x.", "a.b.c", "ü.txt"] {
            assert_eq!(ShortName::parse(bad), Err(FatError::InvalidName), "{}", bad);
        }
    }

    #[test]
    fn comparison_ignores_case() {
        let upper = ShortName(*b"HELLO   TXT");
        let lower = ShortName(*b"hello   txt");
        assert!(upper.matches(&lower));
        assert!(!upper.matches(&ShortName::DOT));
    }

    #[test]
    fn checksum_matches_reference_value() {
        // Reference value computed for "FOO     BAR" by the rotate-and-add rule.
        let name = ShortName(*b"FOO     BAR");
        let mut sum = 0u8;
        for &b in &name.0 {
            sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b);
        }
        assert_eq!(name.checksum(), sum);
    }

    #[test]
    fn entry_codec_keeps_reserved_bytes() {
        let now = FatTimestamp::new(2024, 1, 2, 3, 4, 6);
        let mut entry = DirEntry::new_file(ShortName::parse("a.bin").unwrap(), now);
        entry.size = 3000;
        entry.first_cluster = 0x0001_0005;

        let mut raw = [0u8; 32];
        raw[12] = 0x18;
        raw[13] = 7;
        entry.encode(&mut raw);
        assert_eq!(raw[12], 0x18);
        assert_eq!(raw[13], 7);

        let back = DirEntry::decode(&raw, FatType::Fat32);
        assert_eq!(back, entry);

        let short = DirEntry::decode(&raw, FatType::Fat16);
        assert_eq!(short.first_cluster, 5);
    }

    #[test]
    fn long_name_detection_masks_upper_bits() {
        assert!(is_long_name_slot(0x0F));
        assert!(is_long_name_slot(0xCF));
        assert!(!is_long_name_slot(0x10));
        assert!(!is_long_name_slot(0x08));
    }
}
