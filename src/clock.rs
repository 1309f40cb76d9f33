use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use sdfat::{Clock, FatTimestamp};

/// Stamps entries with the host's local wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> FatTimestamp {
        to_fat(Local::now().naive_local())
    }
}

/// FAT keeps two-second resolution and years 1980..=2107; `FatTimestamp`
/// clamps anything outside that.
pub fn to_fat(at: NaiveDateTime) -> FatTimestamp {
    let year = at.year().clamp(0, u16::MAX as i32) as u16;
    FatTimestamp::new(
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn converts_local_time_fields() {
        let at = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(13, 45, 31)
            .unwrap();
        let ts = to_fat(at);
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 5);
        assert_eq!(ts.day(), 17);
        assert_eq!(ts.hour(), 13);
        assert_eq!(ts.minute(), 45);
        assert_eq!(ts.second(), 30);
    }
}
