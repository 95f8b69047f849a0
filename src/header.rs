//! Per-entry header fields: MS-DOS timestamps, unix modes, and the
//! conversion from file-system metadata into both.

use crate::error::{Result, ZipperError};
use std::fs::Metadata;
use std::path::Path;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::time::{SystemTime, UNIX_EPOCH};

/// File type mask in a unix mode
const S_IFMT: u32 = 0o170000;
/// Regular file type bits
const S_IFREG: u32 = 0o100000;

/// Host system recorded in "version made by" when unix attributes are present
const HOST_UNIX: u16 = 3;
/// ZIP specification version 2.0 (DEFLATE)
pub(crate) const VERSION_DEFLATE: u16 = 20;
/// ZIP specification version 4.5 (ZIP64)
pub(crate) const VERSION_ZIP64: u16 = 45;

/// MS-DOS read-only attribute bit
const DOS_READ_ONLY: u32 = 0x01;

/// Unix seconds of 2108-01-01, past anything DOS dates can hold in any zone
const LAST_DOS_INSTANT: u64 = 4_354_819_200;

/// Extended timestamp extra field (UTC modification time)
const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
/// Extended timestamp flag: modification time present
const EXTENDED_TIMESTAMP_MTIME: u8 = 0x01;

/// An MS-DOS date/time pair as stored in ZIP headers
///
/// The format covers 1980-01-01 through 2107-12-31 with two-second
/// resolution. It carries no time zone; like other ZIP tools, system times
/// are written as local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    date: u16,
    time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant
    pub const MIN: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// 2107-12-31 23:59:58, the latest representable instant
    pub const MAX: DosDateTime = DosDateTime {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    /// Build from calendar fields, or `None` if any field is out of range
    pub fn from_parts(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Option<Self> {
        if !(1980..=2107).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return None;
        }
        Some(Self::encode(year, month, day, hour, minute, second))
    }

    /// Convert a wall-clock instant in the local time zone, clamping to the
    /// representable range
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Err(_) => Self::MIN,
            Ok(d) if d.as_secs() >= LAST_DOS_INSTANT => Self::MAX,
            Ok(_) => Self::from_date_time(&DateTime::<Local>::from(time)),
        }
    }

    /// Convert a zoned date-time using its own wall-clock fields
    pub fn from_date_time<Tz: TimeZone>(time: &DateTime<Tz>) -> Self {
        let year = time.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }

        Self::encode(
            year as u16,
            time.month() as u8,
            time.day() as u8,
            time.hour() as u8,
            time.minute() as u8,
            time.second() as u8,
        )
    }

    fn encode(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            date: ((year - 1980) << 9) | ((month as u16) << 5) | day as u16,
            time: ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 / 2),
        }
    }

    /// Raw MS-DOS date field
    pub fn date(&self) -> u16 {
        self.date
    }

    /// Raw MS-DOS time field
    pub fn time(&self) -> u16 {
        self.time
    }

    pub fn year(&self) -> u16 {
        (self.date >> 9) + 1980
    }

    pub fn month(&self) -> u8 {
        ((self.date >> 5) & 0x0f) as u8
    }

    pub fn day(&self) -> u8 {
        (self.date & 0x1f) as u8
    }

    pub fn hour(&self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minute(&self) -> u8 {
        ((self.time >> 5) & 0x3f) as u8
    }

    /// Seconds, always even
    pub fn second(&self) -> u8 {
        ((self.time & 0x1f) * 2) as u8
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::MIN
    }
}

/// Header fields for a new entry
///
/// The compression method is not configurable; every entry is DEFLATE.
///
/// ```
/// use zipper::{DosDateTime, EntryOptions};
///
/// let options = EntryOptions::new()
///     .last_modified(DosDateTime::from_parts(2024, 5, 17, 12, 30, 0).unwrap())
///     .unix_mode(0o644);
/// # let _ = options;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub(crate) last_modified: DosDateTime,
    pub(crate) unix_mtime: Option<u32>,
    pub(crate) unix_mode: Option<u32>,
    pub(crate) size_hint: Option<u64>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the modification timestamp (default 1980-01-01 00:00:00)
    pub fn last_modified(mut self, modified: DosDateTime) -> Self {
        self.last_modified = modified;
        self
    }

    /// Set the modification time from a wall-clock instant
    ///
    /// Fills both the local-time DOS fields and the UTC extended timestamp,
    /// so readers that understand the latter restore the exact instant.
    pub fn modified_at(mut self, time: SystemTime) -> Self {
        self.last_modified = DosDateTime::from_system_time(time);
        self.unix_mtime = time
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| u32::try_from(d.as_secs()).ok());
        self
    }

    /// Set unix permission bits; regular-file type bits are added when absent
    pub fn unix_mode(mut self, mode: u32) -> Self {
        let mode = if mode & S_IFMT == 0 {
            mode | S_IFREG
        } else {
            mode
        };
        self.unix_mode = Some(mode & 0o177_777);
        self
    }

    /// Expected uncompressed size, used to size the compression buffer
    pub fn size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    /// Derive header fields from a source file's metadata
    ///
    /// `path` is only used to label the error when the metadata does not
    /// describe a regular file.
    pub fn from_metadata(metadata: &Metadata, path: &Path) -> Result<Self> {
        if !metadata.is_file() {
            return Err(ZipperError::NotAFile(path.to_path_buf()));
        }

        Ok(Self::new()
            .modified_at(metadata.modified()?)
            .unix_mode(mode_of(metadata))
            .size_hint(metadata.len()))
    }

    pub fn modified(&self) -> DosDateTime {
        self.last_modified
    }

    /// UTC modification time in Unix seconds, when known
    pub fn unix_mtime(&self) -> Option<u32> {
        self.unix_mtime
    }

    pub fn mode(&self) -> Option<u32> {
        self.unix_mode
    }

    /// Extended timestamp extra field, identical in local and central headers
    pub(crate) fn extended_timestamp(&self) -> Option<[u8; 9]> {
        let mtime = self.unix_mtime?;
        let mut field = [0u8; 9];
        field[..2].copy_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
        field[2..4].copy_from_slice(&5u16.to_le_bytes());
        field[4] = EXTENDED_TIMESTAMP_MTIME;
        field[5..].copy_from_slice(&mtime.to_le_bytes());
        Some(field)
    }

    /// "Version made by" field for the central directory
    pub(crate) fn version_made_by(&self, version: u16) -> u16 {
        match self.unix_mode {
            Some(_) => (HOST_UNIX << 8) | version,
            None => version,
        }
    }

    /// External file attributes for the central directory
    pub(crate) fn external_attributes(&self) -> u32 {
        match self.unix_mode {
            Some(mode) => {
                let mut attrs = mode << 16;
                if mode & 0o222 == 0 {
                    attrs |= DOS_READ_ONLY;
                }
                attrs
            }
            None => 0,
        }
    }
}

#[cfg(unix)]
fn mode_of(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        S_IFREG | 0o444
    } else {
        S_IFREG | 0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};
    use std::time::Duration;

    #[test]
    fn test_dos_time_from_known_instant() {
        // 2021-03-04 05:06:08 UTC
        let t = Utc.timestamp_opt(1_614_834_368, 0).unwrap();
        let dos = DosDateTime::from_date_time(&t);
        assert_eq!(dos.date(), 21092);
        assert_eq!(dos.time(), 10436);
        assert_eq!((dos.year(), dos.month(), dos.day()), (2021, 3, 4));
        assert_eq!((dos.hour(), dos.minute(), dos.second()), (5, 6, 8));
    }

    #[test]
    fn test_dos_time_uses_wall_clock_of_offset() {
        // 2021-06-01 12:00:00 UTC
        let instant = 1_622_548_800;

        let new_york = FixedOffset::west_opt(4 * 3600).unwrap();
        let dos = DosDateTime::from_date_time(&new_york.timestamp_opt(instant, 0).unwrap());
        assert_eq!((dos.year(), dos.month(), dos.day()), (2021, 6, 1));
        assert_eq!((dos.hour(), dos.minute()), (8, 0));

        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let dos = DosDateTime::from_date_time(&tokyo.timestamp_opt(instant, 0).unwrap());
        assert_eq!((dos.hour(), dos.minute()), (21, 0));

        // Crossing midnight moves the date too
        let samoa = FixedOffset::east_opt(14 * 3600).unwrap();
        let dos = DosDateTime::from_date_time(&samoa.timestamp_opt(instant, 0).unwrap());
        assert_eq!((dos.month(), dos.day(), dos.hour()), (6, 2, 2));
    }

    #[test]
    fn test_system_time_follows_local_zone() {
        let t = UNIX_EPOCH + Duration::from_secs(1_622_548_800);
        let local = DateTime::<Local>::from(t);
        assert_eq!(
            DosDateTime::from_system_time(t),
            DosDateTime::from_date_time(&local)
        );
    }

    #[test]
    fn test_dos_time_leap_day() {
        // 2024-02-29 23:59:59 UTC
        let t = Utc.timestamp_opt(1_709_251_199, 0).unwrap();
        let dos = DosDateTime::from_date_time(&t);
        assert_eq!((dos.year(), dos.month(), dos.day()), (2024, 2, 29));
        assert_eq!((dos.hour(), dos.minute(), dos.second()), (23, 59, 58));
    }

    #[test]
    fn test_dos_time_clamps() {
        assert_eq!(DosDateTime::from_system_time(UNIX_EPOCH), DosDateTime::MIN);
        let before_epoch = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(DosDateTime::from_system_time(before_epoch), DosDateTime::MIN);
        // 2200-01-01
        let far = UNIX_EPOCH + Duration::from_secs(7_258_118_400);
        assert_eq!(DosDateTime::from_system_time(far), DosDateTime::MAX);
        let far_utc = Utc.timestamp_opt(7_258_118_400, 0).unwrap();
        assert_eq!(DosDateTime::from_date_time(&far_utc), DosDateTime::MAX);
        assert_eq!(DosDateTime::MAX.year(), 2107);
        assert_eq!(DosDateTime::MAX.second(), 58);
    }

    #[test]
    fn test_modified_at_fills_extended_timestamp() {
        let t = UNIX_EPOCH + Duration::from_secs(1_622_548_800);
        let options = EntryOptions::new().modified_at(t);
        assert_eq!(options.unix_mtime(), Some(1_622_548_800));
        assert_eq!(options.modified(), DosDateTime::from_system_time(t));

        let field = options.extended_timestamp().unwrap();
        assert_eq!(&field[..4], &[0x55, 0x54, 5, 0]);
        assert_eq!(field[4], EXTENDED_TIMESTAMP_MTIME);
        assert_eq!(&field[5..], &1_622_548_800u32.to_le_bytes());
    }

    #[test]
    fn test_no_extended_timestamp_without_instant() {
        let modified = DosDateTime::from_parts(2020, 1, 1, 0, 0, 0).unwrap();
        let options = EntryOptions::new().last_modified(modified);
        assert!(options.extended_timestamp().is_none());

        let before_epoch = UNIX_EPOCH - Duration::from_secs(60);
        assert!(EntryOptions::new().modified_at(before_epoch).unix_mtime().is_none());
    }

    #[test]
    fn test_from_parts_validation() {
        assert!(DosDateTime::from_parts(1979, 12, 31, 0, 0, 0).is_none());
        assert!(DosDateTime::from_parts(2020, 13, 1, 0, 0, 0).is_none());
        assert!(DosDateTime::from_parts(2020, 1, 1, 24, 0, 0).is_none());
        let dos = DosDateTime::from_parts(1980, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(dos, DosDateTime::MIN);
    }

    #[test]
    fn test_unix_mode_adds_regular_type() {
        let options = EntryOptions::new().unix_mode(0o644);
        assert_eq!(options.mode(), Some(0o100644));
        assert_eq!(options.external_attributes(), 0o100644 << 16);
        assert_eq!(options.version_made_by(VERSION_DEFLATE), 0x0314);
    }

    #[test]
    fn test_read_only_mode_sets_dos_bit() {
        let options = EntryOptions::new().unix_mode(0o444);
        assert_eq!(options.external_attributes() & DOS_READ_ONLY, DOS_READ_ONLY);
    }

    #[test]
    fn test_default_options_have_no_attributes() {
        let options = EntryOptions::default();
        assert_eq!(options.external_attributes(), 0);
        assert_eq!(options.version_made_by(VERSION_DEFLATE), VERSION_DEFLATE);
        assert_eq!(options.modified(), DosDateTime::MIN);
    }

    #[test]
    fn test_from_metadata_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"twelve bytes").unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        let options = EntryOptions::from_metadata(&metadata, &path).unwrap();
        assert_eq!(options.size_hint, Some(12));
        assert_eq!(options.mode().unwrap() & S_IFMT, S_IFREG);
        assert!(options.modified().year() >= 2020);
        assert!(options.unix_mtime().is_some());
    }

    #[test]
    fn test_from_metadata_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = std::fs::metadata(dir.path()).unwrap();
        let err = EntryOptions::from_metadata(&metadata, dir.path()).unwrap_err();
        assert!(matches!(err, ZipperError::NotAFile(_)));
    }
}
