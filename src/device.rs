//! Block device interface.
//!
//! A block device hands out fixed 512-byte sectors addressed from zero.
//! Reads past the end of the backing store return zero-filled sectors so
//! that short images behave like their full-size counterparts; writes are
//! rejected on read-only handles.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use spin::RwLock;

use crate::error::{DiskError, Result};
use crate::SECTOR_SIZE;

pub trait BlockDevice: Send + Sync {
    /// Read one sector. Short reads are zero-padded to a full sector.
    fn read_sector(&self, sector: usize) -> Result<Vec<u8>>;

    /// Write one sector. `data` must be exactly [`SECTOR_SIZE`] bytes.
    fn write_sector(&self, sector: usize, data: &[u8]) -> Result<()>;

    /// Push any buffered writes down to the backing store.
    fn flush(&self) -> Result<()>;

    /// Size of the addressable byte range.
    fn total_bytes(&self) -> u64;

    fn is_read_only(&self) -> bool;
}

/// Raw image file on the host filesystem.
pub struct FileDevice {
    file: RwLock<File>,
    read_only: bool,
}

impl FileDevice {
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path.as_ref())
            .map_err(|e| DiskError::Disk(format!("cannot open disk image: {e}")))?;
        Ok(Self {
            file: RwLock::new(file),
            read_only,
        })
    }
}

impl BlockDevice for FileDevice {
    fn read_sector(&self, sector: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        // Read as much as the file holds; the tail stays zero.
        let mut filled = 0;
        while filled < SECTOR_SIZE {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(buf)
    }

    fn write_sector(&self, sector: usize, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        if data.len() != SECTOR_SIZE {
            return Err(DiskError::SectorSize(data.len()));
        }
        let mut file = self.file.write();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        file.write_all(data)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if !self.read_only {
            self.file.write().sync_all()?;
        }
        Ok(())
    }

    fn total_bytes(&self) -> u64 {
        self.file.read().metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_past_end_are_zero_filled() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xAAu8; 100]).unwrap();
        tmp.flush().unwrap();

        let dev = FileDevice::open(tmp.path(), true).unwrap();
        let sector = dev.read_sector(0).unwrap();
        assert_eq!(&sector[..100], &[0xAA; 100][..]);
        assert_eq!(&sector[100..], &[0u8; 412][..]);

        let far = dev.read_sector(50).unwrap();
        assert!(far.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_checks_mode_and_size() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let dev = FileDevice::open(tmp.path(), true).unwrap();
        assert!(matches!(
            dev.write_sector(0, &[0u8; SECTOR_SIZE]),
            Err(DiskError::ReadOnly)
        ));

        let dev = FileDevice::open(tmp.path(), false).unwrap();
        assert!(matches!(
            dev.write_sector(0, &[0u8; 10]),
            Err(DiskError::SectorSize(10))
        ));
        dev.write_sector(0, &[0x55u8; SECTOR_SIZE]).unwrap();
        assert_eq!(dev.read_sector(0).unwrap()[0], 0x55);
    }
}
