//! 32-byte FAT directory records.
//!
//! Layout (all integers little-endian):
//!
//! | Offset | Size | Field |
//! | ------ | ---- | ----- |
//! | 0      | 8    | name, space padded |
//! | 8      | 3    | extension, space padded |
//! | 11     | 1    | attributes |
//! | 12     | 2    | reserved |
//! | 14     | 2    | create time |
//! | 16     | 2    | create date |
//! | 18     | 4    | reserved |
//! | 22     | 2    | modify time |
//! | 24     | 2    | modify date |
//! | 26     | 2    | first cluster |
//! | 28     | 4    | file size |
//!
//! A first name byte of `0x00` ends the directory; `0xE5` marks a deleted
//! slot that may be reused.

use chrono::{Datelike, Local, Timelike};
use serde::Serialize;

use crate::{
    read_le_u16, read_le_u32, write_le_u16, write_le_u32, ATTR_ARCHIVE, ATTR_DIRECTORY,
    ATTR_HIDDEN, ATTR_READ_ONLY, ATTR_SYSTEM, ATTR_VOLUME, DIR_ENTRY_DELETED, DIR_ENTRY_END,
    DIR_ENTRY_SIZE,
};
use crate::error::{DiskError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; 8],
    pub ext: [u8; 3],
    pub attributes: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub modify_time: u16,
    pub modify_date: u16,
    pub first_cluster: u16,
    pub file_size: u32,
}

impl DirEntry {
    pub fn new(
        name: [u8; 8],
        ext: [u8; 3],
        attributes: u8,
        first_cluster: u16,
        file_size: u32,
        stamp: DosStamp,
    ) -> Self {
        Self {
            name,
            ext,
            attributes,
            create_time: stamp.time,
            create_date: stamp.date,
            modify_time: stamp.time,
            modify_date: stamp.date,
            first_cluster,
            file_size,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != DIR_ENTRY_SIZE {
            return Err(DiskError::Disk(format!(
                "invalid directory entry size: {}",
                data.len()
            )));
        }
        let mut name = [0u8; 8];
        name.copy_from_slice(&data[0..8]);
        let mut ext = [0u8; 3];
        ext.copy_from_slice(&data[8..11]);
        Ok(Self {
            name,
            ext,
            attributes: data[11],
            create_time: read_le_u16(&data[14..]),
            create_date: read_le_u16(&data[16..]),
            modify_time: read_le_u16(&data[22..]),
            modify_date: read_le_u16(&data[24..]),
            first_cluster: read_le_u16(&data[26..]),
            file_size: read_le_u32(&data[28..]),
        })
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut data = [0u8; DIR_ENTRY_SIZE];
        data[0..8].copy_from_slice(&self.name);
        data[8..11].copy_from_slice(&self.ext);
        data[11] = self.attributes;
        write_le_u16(&mut data[14..], self.create_time);
        write_le_u16(&mut data[16..], self.create_date);
        write_le_u16(&mut data[22..], self.modify_time);
        write_le_u16(&mut data[24..], self.modify_date);
        write_le_u16(&mut data[26..], self.first_cluster);
        write_le_u32(&mut data[28..], self.file_size);
        data
    }

    /// `NAME.EXT`, or just `NAME` when the extension is blank.
    pub fn full_name(&self) -> String {
        let name = trimmed(&self.name);
        let ext = trimmed(&self.ext);
        if ext.is_empty() {
            name
        } else {
            format!("{name}.{ext}")
        }
    }

    pub fn matches(&self, name: &[u8; 8], ext: &[u8; 3]) -> bool {
        self.name == *name && self.ext == *ext
    }

    pub fn is_end(&self) -> bool {
        self.name[0] == DIR_ENTRY_END
    }

    pub fn is_deleted(&self) -> bool {
        self.name[0] == DIR_ENTRY_DELETED
    }

    /// Deleted or never used.
    pub fn is_free(&self) -> bool {
        self.is_end() || self.is_deleted()
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & ATTR_VOLUME != 0
    }

    /// `.` or `..`
    pub fn is_dot_entry(&self) -> bool {
        self.name[0] == b'.'
    }

    /// Attribute summary like `RHSDA`, or `-` when nothing is set.
    pub fn attr_string(&self) -> String {
        let mut out = String::new();
        for (bit, ch) in [
            (ATTR_READ_ONLY, 'R'),
            (ATTR_HIDDEN, 'H'),
            (ATTR_SYSTEM, 'S'),
            (ATTR_DIRECTORY, 'D'),
            (ATTR_ARCHIVE, 'A'),
        ] {
            if self.attributes & bit != 0 {
                out.push(ch);
            }
        }
        if out.is_empty() {
            out.push('-');
        }
        out
    }

    pub fn record(&self) -> FileRecord {
        FileRecord {
            name: self.full_name(),
            size: self.file_size as u64,
            attr: self.attr_string(),
            is_directory: self.is_directory(),
            first_cluster: self.first_cluster as u32,
            user: None,
        }
    }
}

fn trimmed(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// MS-DOS 16-bit date/time pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DosStamp {
    pub date: u16,
    pub time: u16,
}

impl DosStamp {
    /// date = ((year-1980)<<9) | (month<<5) | day
    /// time = (hour<<11) | (minute<<5) | (second/2)
    pub fn encode(year: u16, month: u16, day: u16, hour: u16, minute: u16, second: u16) -> Self {
        Self {
            date: (year.saturating_sub(1980) << 9) | (month << 5) | day,
            time: (hour << 11) | (minute << 5) | (second / 2),
        }
    }

    pub fn now() -> Self {
        let now = Local::now();
        Self::encode(
            now.year().clamp(1980, 2107) as u16,
            now.month() as u16,
            now.day() as u16,
            now.hour() as u16,
            now.minute() as u16,
            now.second() as u16,
        )
    }
}

/// One row of a listing, common to the FAT and CP/M engines.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    pub attr: String,
    pub is_directory: bool,
    #[serde(skip)]
    pub first_cluster: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<u8>,
}
