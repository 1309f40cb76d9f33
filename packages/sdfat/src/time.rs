use core::fmt;

/// Packed FAT date/time word pair.
///
/// `date` holds years since 1980 in bits 15..9, month in 8..5 and day in
/// 4..0. `time` holds hours in 15..11, minutes in 10..5 and seconds / 2 in
/// 4..0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FatTimestamp {
    pub date: u16,
    pub time: u16,
}

impl FatTimestamp {
    pub const EPOCH: Self = Self::from_fattime((28 << 25) | (2 << 21) | (1 << 16));

    /// Builds a timestamp, clamping fields into their on-disk ranges.
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let year = year.clamp(1980, 2107) - 1980;
        let month = month.clamp(1, 12) as u16;
        let day = day.clamp(1, 31) as u16;
        let hour = hour.min(23) as u16;
        let minute = minute.min(59) as u16;
        let second = (second.min(59) / 2) as u16;
        Self {
            date: (year << 9) | (month << 5) | day,
            time: (hour << 11) | (minute << 5) | second,
        }
    }

    /// Splits the 32-bit `get_fattime` layout (date in the high half).
    pub const fn from_fattime(raw: u32) -> Self {
        Self {
            date: (raw >> 16) as u16,
            time: raw as u16,
        }
    }

    pub const fn to_fattime(self) -> u32 {
        ((self.date as u32) << 16) | self.time as u32
    }

    pub fn year(self) -> u16 {
        1980 + (self.date >> 9)
    }

    pub fn month(self) -> u8 {
        ((self.date >> 5) & 0x0F) as u8
    }

    pub fn day(self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hour(self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minute(self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    pub fn second(self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }
}

impl fmt::Display for FatTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

/// Source of timestamps for created and modified entries.
pub trait Clock {
    fn now(&self) -> FatTimestamp;
}

/// Boards without an RTC stamp everything with one constant date.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub FatTimestamp);

impl Default for FixedClock {
    fn default() -> Self {
        Self(FatTimestamp::EPOCH)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> FatTimestamp {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_matches_board_constant() {
        let ts = FatTimestamp::EPOCH;
        assert_eq!((ts.year(), ts.month(), ts.day()), (2008, 2, 1));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (0, 0, 0));
    }

    #[test]
    fn new_packs_and_clamps_fields() {
        let ts = FatTimestamp::new(2024, 7, 15, 13, 45, 31);
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 7);
        assert_eq!(ts.day(), 15);
        assert_eq!(ts.hour(), 13);
        assert_eq!(ts.minute(), 45);
        assert_eq!(ts.second(), 30);

        let early = FatTimestamp::new(1970, 0, 0, 0, 0, 0);
        assert_eq!((early.year(), early.month(), early.day()), (1980, 1, 1));
    }

    #[test]
    fn display_is_iso_like() {
        let ts = FatTimestamp::new(2019, 3, 9, 8, 5, 4);
        assert_eq!(std::format!("{}", ts), "2019-03-09 08:05:04");
    }
}
