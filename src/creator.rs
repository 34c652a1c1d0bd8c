//! Blank formatted image creation.
//!
//! A fresh image is a zero-filled file with a boot sector, the seeded FAT
//! copies (media descriptor in entry 0, end-of-chain fill in entry 1) and
//! an optional volume label as the first root directory record.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use log::info;

use crate::error::{DiskError, Result};
use crate::{write_le_u16, ATTR_VOLUME, SECTOR_SIZE};

/// Supported blank formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateFormat {
    VictorSingleSided,
    VictorDoubleSided,
    Ibm360K,
    Ibm720K,
    Ibm1200K,
    Ibm1440K,
}

impl CreateFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "victor-ss" => Some(Self::VictorSingleSided),
            "victor-ds" => Some(Self::VictorDoubleSided),
            "360K" | "360k" => Some(Self::Ibm360K),
            "720K" | "720k" => Some(Self::Ibm720K),
            "1.2M" | "1.2m" => Some(Self::Ibm1200K),
            "1.44M" | "1.44m" => Some(Self::Ibm1440K),
            _ => None,
        }
    }

    pub fn names() -> [&'static str; 6] {
        ["victor-ss", "victor-ds", "360K", "720K", "1.2M", "1.44M"]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::VictorSingleSided => "Victor 9000 single-sided floppy (~600 KB)",
            Self::VictorDoubleSided => "Victor 9000 double-sided floppy (~1.2 MB)",
            Self::Ibm360K => "IBM PC 5.25\" DD floppy (360 KB)",
            Self::Ibm720K => "IBM PC 3.5\" DD floppy (720 KB)",
            Self::Ibm1200K => "IBM PC 5.25\" HD floppy (1.2 MB)",
            Self::Ibm1440K => "IBM PC 3.5\" HD floppy (1.44 MB)",
        }
    }
}

struct VictorParams {
    total_sectors: usize,
    fat_start: usize,
    fat_sectors: usize,
    fat_copies: usize,
    dir_start: usize,
    data_start: usize,
    total_clusters: usize,
    flags: u16,
}

const VICTOR_SINGLE: VictorParams = VictorParams {
    total_sectors: 1224,
    fat_start: 1,
    fat_sectors: 1,
    fat_copies: 2,
    dir_start: 3,
    data_start: 11,
    total_clusters: 1214,
    flags: 0x00,
};

const VICTOR_DOUBLE: VictorParams = VictorParams {
    total_sectors: 2448,
    fat_start: 1,
    fat_sectors: 2,
    fat_copies: 2,
    dir_start: 5,
    data_start: 13,
    total_clusters: 2378,
    flags: 0x01,
};

struct IbmParams {
    total_sectors: usize,
    sectors_per_track: u16,
    heads: u16,
    sectors_per_cluster: u8,
    reserved_sectors: usize,
    fat_copies: usize,
    fat_sectors: usize,
    root_entries: u16,
    media_descriptor: u8,
}

const IBM_360K: IbmParams = IbmParams {
    total_sectors: 720,
    sectors_per_track: 9,
    heads: 2,
    sectors_per_cluster: 2,
    reserved_sectors: 1,
    fat_copies: 2,
    fat_sectors: 2,
    root_entries: 112,
    media_descriptor: 0xFD,
};

const IBM_720K: IbmParams = IbmParams {
    total_sectors: 1440,
    sectors_per_track: 9,
    heads: 2,
    sectors_per_cluster: 2,
    reserved_sectors: 1,
    fat_copies: 2,
    fat_sectors: 3,
    root_entries: 112,
    media_descriptor: 0xF9,
};

const IBM_1200K: IbmParams = IbmParams {
    total_sectors: 2400,
    sectors_per_track: 15,
    heads: 2,
    sectors_per_cluster: 1,
    reserved_sectors: 1,
    fat_copies: 2,
    fat_sectors: 7,
    root_entries: 224,
    media_descriptor: 0xF9,
};

const IBM_1440K: IbmParams = IbmParams {
    total_sectors: 2880,
    sectors_per_track: 18,
    heads: 2,
    sectors_per_cluster: 1,
    reserved_sectors: 1,
    fat_copies: 2,
    fat_sectors: 9,
    root_entries: 224,
    media_descriptor: 0xF0,
};

/// Create a blank formatted image at `path`.
pub fn create_image<P: AsRef<Path>>(
    path: P,
    format: CreateFormat,
    volume_label: Option<&str>,
    force: bool,
) -> Result<()> {
    let path = path.as_ref();
    if path.exists() && !force {
        return Err(DiskError::Disk(format!(
            "file already exists: {} (use force to overwrite)",
            path.display()
        )));
    }

    match format {
        CreateFormat::VictorSingleSided => create_victor(path, &VICTOR_SINGLE, volume_label),
        CreateFormat::VictorDoubleSided => create_victor(path, &VICTOR_DOUBLE, volume_label),
        CreateFormat::Ibm360K => create_ibm(path, &IBM_360K, volume_label),
        CreateFormat::Ibm720K => create_ibm(path, &IBM_720K, volume_label),
        CreateFormat::Ibm1200K => create_ibm(path, &IBM_1200K, volume_label),
        CreateFormat::Ibm1440K => create_ibm(path, &IBM_1440K, volume_label),
    }?;
    info!("created {} as {}", path.display(), format.description());
    Ok(())
}

fn create_victor(path: &Path, params: &VictorParams, volume_label: Option<&str>) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| DiskError::Disk(format!("failed to create disk image: {e}")))?;

    file.write_all(&vec![0u8; params.total_sectors * SECTOR_SIZE])?;

    // Boot sector: sector size at 26, data start at 28, flags at 32,
    // disc type at 34.
    let mut boot = [0u8; SECTOR_SIZE];
    boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    write_le_u16(&mut boot[26..], SECTOR_SIZE as u16);
    write_le_u16(&mut boot[28..], params.data_start as u16);
    write_le_u16(&mut boot[32..], params.flags);
    boot[34] = 0x01;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&boot)?;

    let fat = seeded_fat(params.total_clusters, 0xF8);
    for copy in 0..params.fat_copies {
        let sector = params.fat_start + copy * params.fat_sectors;
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        let len = (params.fat_sectors * SECTOR_SIZE).min(fat.len());
        file.write_all(&fat[..len])?;
    }

    if let Some(label) = volume_label {
        file.seek(SeekFrom::Start((params.dir_start * SECTOR_SIZE) as u64))?;
        file.write_all(&volume_label_entry(label))?;
    }

    file.sync_all()?;
    Ok(())
}

fn create_ibm(path: &Path, params: &IbmParams, volume_label: Option<&str>) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| DiskError::Disk(format!("failed to create disk image: {e}")))?;

    file.write_all(&vec![0u8; params.total_sectors * SECTOR_SIZE])?;

    let root_dir_sectors = (params.root_entries as usize * 32 + SECTOR_SIZE - 1) / SECTOR_SIZE;
    let data_start =
        params.reserved_sectors + params.fat_copies * params.fat_sectors + root_dir_sectors;
    let total_clusters =
        (params.total_sectors - data_start) / params.sectors_per_cluster as usize;

    let mut boot = [0u8; SECTOR_SIZE];
    boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    boot[0x03..0x0B].copy_from_slice(b"MSDOS5.0");
    write_le_u16(&mut boot[0x0B..], SECTOR_SIZE as u16);
    boot[0x0D] = params.sectors_per_cluster;
    write_le_u16(&mut boot[0x0E..], params.reserved_sectors as u16);
    boot[0x10] = params.fat_copies as u8;
    write_le_u16(&mut boot[0x11..], params.root_entries);
    write_le_u16(&mut boot[0x13..], params.total_sectors as u16);
    boot[0x15] = params.media_descriptor;
    write_le_u16(&mut boot[0x16..], params.fat_sectors as u16);
    write_le_u16(&mut boot[0x18..], params.sectors_per_track);
    write_le_u16(&mut boot[0x1A..], params.heads);
    // Extended boot record.
    boot[0x26] = 0x29;
    boot[0x27..0x2B].copy_from_slice(&0x1234_5678u32.to_le_bytes());
    boot[0x2B..0x36].copy_from_slice(b"NO NAME    ");
    boot[0x36..0x3E].copy_from_slice(b"FAT12   ");
    write_le_u16(&mut boot[0x1FE..], 0xAA55);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&boot)?;

    let fat = seeded_fat(total_clusters, params.media_descriptor);
    for copy in 0..params.fat_copies {
        let sector = params.reserved_sectors + copy * params.fat_sectors;
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        let len = (params.fat_sectors * SECTOR_SIZE).min(fat.len());
        file.write_all(&fat[..len])?;
    }

    if let Some(label) = volume_label {
        let root_start = params.reserved_sectors + params.fat_copies * params.fat_sectors;
        file.seek(SeekFrom::Start((root_start * SECTOR_SIZE) as u64))?;
        file.write_all(&volume_label_entry(label))?;
    }

    file.sync_all()?;
    Ok(())
}

/// Empty FAT12 table: entry 0 carries the media descriptor, entry 1 the
/// end-of-chain fill.
fn seeded_fat(total_clusters: usize, media_descriptor: u8) -> Vec<u8> {
    let fat_bytes = ((total_clusters + 2) * 3 + 1) / 2;
    let mut fat = vec![0u8; fat_bytes];
    fat[0] = media_descriptor;
    fat[1] = 0xFF;
    fat[2] = 0xFF;
    fat
}

/// Root directory record holding the volume label.
fn volume_label_entry(label: &str) -> [u8; 32] {
    let mut entry = [0u8; 32];
    let label = label.to_ascii_uppercase();
    let bytes = label.as_bytes();
    for i in 0..11 {
        entry[i] = *bytes.get(i).unwrap_or(&b' ');
    }
    entry[11] = ATTR_VOLUME;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_fat_reserved_entries() {
        let fat = seeded_fat(1214, 0xF8);
        assert_eq!(fat[0], 0xF8);
        assert_eq!(fat[1], 0xFF);
        assert_eq!(fat[2], 0xFF);
        assert!(fat[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn volume_label_record() {
        let entry = volume_label_entry("boot");
        assert_eq!(&entry[0..11], b"BOOT       ");
        assert_eq!(entry[11], ATTR_VOLUME);
    }
}
