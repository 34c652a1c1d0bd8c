//! Victor 9000 CP/M-86 floppy engine.
//!
//! CP/M has no FAT and no subdirectories. The directory is an array of
//! 32-byte extents; each extent names up to eight 2048-byte allocation
//! blocks (16-bit pointers) and up to 128 records of 128 bytes. A file is
//! its extents sorted by logical extent number, where
//! `extent = S2 * 32 + EL`.
//!
//! Extent layout:
//!
//! | Offset | Size | Field |
//! | ------ | ---- | ----- |
//! | 0      | 1    | user number 0-15, 0xE5 when deleted |
//! | 1      | 8    | filename, high bits carry R/S/A flags on bytes 9-11 |
//! | 9      | 3    | extension |
//! | 12     | 1    | EL, low extent |
//! | 13     | 1    | reserved |
//! | 14     | 1    | S2, high extent |
//! | 15     | 1    | record count |
//! | 16     | 16   | eight 16-bit block pointers |
//!
//! On the Victor the directory is interleaved: 18 slots of one sector
//! each, every second sector starting at the detected directory sector.
//! Known directory homes are sectors 76, 94 and 1; detection picks the
//! first whose leading four entries contain at least two plausible ones.
//! The data area (block 0) begins at sector 112 and block pointers run to
//! 556.
//!
//! Deleting never clears blocks. The allocator derives the used-block set
//! from live directory entries each time, so blocks come free the moment
//! no extent points at them.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::device::BlockDevice;
use crate::entry::FileRecord;
use crate::error::{DiskError, Result};
use crate::info::VolumeReport;
use crate::verify::VerifyReport;
use crate::volume::Volume;
use crate::{
    has_wildcards, match_filename, read_le_u16, validate_filename, write_le_u16,
    CPM_BLOCKS_PER_EXTENT, CPM_BLOCK_SIZE, CPM_DATA_START_SECTOR, CPM_DELETED, CPM_DIR_INTERLEAVE,
    CPM_DIR_SECTORS, CPM_DIR_START_SECTOR, CPM_MAX_BLOCKS, CPM_RECORDS_PER_EXTENT,
    CPM_RECORD_SIZE, CPM_SECTORS_PER_BLOCK, DIR_ENTRY_SIZE, ENTRIES_PER_SECTOR, SECTOR_SIZE,
};

/// One 32-byte directory extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpmDirEntry {
    pub user: u8,
    /// Raw filename bytes; the high bits are meaningless here.
    pub name: [u8; 8],
    /// Raw extension bytes; high bits carry the R/S/A attributes.
    pub ext: [u8; 3],
    pub extent_low: u8,
    pub extent_high: u8,
    pub record_count: u8,
    /// Live block pointers, in order. The count is implied by the
    /// record count, up to eight per extent.
    pub blocks: Vec<u16>,
}

impl CpmDirEntry {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != DIR_ENTRY_SIZE {
            return Err(DiskError::Disk(format!(
                "invalid CP/M directory entry size: {}",
                data.len()
            )));
        }
        let mut name = [0u8; 8];
        name.copy_from_slice(&data[1..9]);
        let mut ext = [0u8; 3];
        ext.copy_from_slice(&data[9..12]);

        // Block 0 is a real data block on this layout (the directory
        // lives below the data area), so a zero pointer cannot mean
        // "unused" on its own. The record count says how many of the
        // eight pointer slots are live.
        let record_count = data[15];
        let live = ((record_count as usize * CPM_RECORD_SIZE + CPM_BLOCK_SIZE - 1)
            / CPM_BLOCK_SIZE)
            .min(CPM_BLOCKS_PER_EXTENT);
        let mut blocks = Vec::with_capacity(live);
        for i in 0..live {
            blocks.push(read_le_u16(&data[16 + i * 2..]));
        }
        Ok(Self {
            user: data[0],
            name,
            ext,
            extent_low: data[12],
            extent_high: data[14],
            record_count,
            blocks,
        })
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut data = [0u8; DIR_ENTRY_SIZE];
        data[0] = self.user;
        data[1..9].copy_from_slice(&self.name);
        data[9..12].copy_from_slice(&self.ext);
        data[12] = self.extent_low;
        data[14] = self.extent_high;
        data[15] = self.record_count;
        for (i, &block) in self.blocks.iter().take(CPM_BLOCKS_PER_EXTENT).enumerate() {
            write_le_u16(&mut data[16 + i * 2..], block);
        }
        data
    }

    pub fn is_deleted(&self) -> bool {
        self.user == CPM_DELETED
    }

    /// Logical extent number.
    pub fn extent(&self) -> u16 {
        self.extent_high as u16 * 32 + self.extent_low as u16
    }

    /// Filename with the attribute bits masked off.
    pub fn filename(&self) -> String {
        masked(&self.name)
    }

    pub fn extension(&self) -> String {
        masked(&self.ext)
    }

    pub fn full_name(&self) -> String {
        let ext = self.extension();
        if ext.is_empty() {
            self.filename()
        } else {
            format!("{}.{}", self.filename(), ext)
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.ext[0] & 0x80 != 0
    }

    pub fn is_system(&self) -> bool {
        self.ext[1] & 0x80 != 0
    }

    pub fn is_archive(&self) -> bool {
        self.ext[2] & 0x80 != 0
    }
}

fn masked(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| (b & 0x7F) as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// A file aggregated from its extents.
#[derive(Debug, Clone)]
pub struct CpmFile {
    pub user: u8,
    pub filename: String,
    pub extension: String,
    pub file_size: usize,
    pub extents: Vec<CpmDirEntry>,
}

impl CpmFile {
    pub fn full_name(&self) -> String {
        if self.extension.is_empty() {
            self.filename.clone()
        } else {
            format!("{}.{}", self.filename, self.extension)
        }
    }

    pub fn record(&self) -> FileRecord {
        let first = &self.extents[0];
        let mut attr = String::new();
        if first.is_read_only() {
            attr.push('R');
        }
        if first.is_system() {
            attr.push('S');
        }
        if first.is_archive() {
            attr.push('A');
        }
        if attr.is_empty() {
            attr.push('-');
        }
        FileRecord {
            name: self.full_name(),
            size: self.file_size as u64,
            attr,
            is_directory: false,
            first_cluster: first.blocks.first().copied().unwrap_or(0) as u32,
            user: Some(self.user),
        }
    }
}

pub struct CpmVolume {
    device: Arc<dyn BlockDevice>,
    dir_start_sector: usize,
}

impl CpmVolume {
    /// Open a CP/M floppy, auto-detecting the directory location.
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let dir_start_sector =
            detect_dir_sector(device.as_ref())?.unwrap_or(CPM_DIR_START_SECTOR);
        debug!("CP/M directory at sector {dir_start_sector}");
        Ok(Self {
            device,
            dir_start_sector,
        })
    }

    pub fn dir_start_sector(&self) -> usize {
        self.dir_start_sector
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    fn dir_sectors(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CPM_DIR_SECTORS).map(|i| self.dir_start_sector + i * CPM_DIR_INTERLEAVE)
    }

    fn block_to_sector(block: u16) -> usize {
        CPM_DATA_START_SECTOR + block as usize * CPM_SECTORS_PER_BLOCK
    }

    pub fn read_block(&self, block: u16) -> Result<Vec<u8>> {
        let sector = Self::block_to_sector(block);
        let mut data = Vec::with_capacity(CPM_BLOCK_SIZE);
        for i in 0..CPM_SECTORS_PER_BLOCK {
            data.extend_from_slice(&self.device.read_sector(sector + i)?);
        }
        Ok(data)
    }

    fn write_block(&self, block: u16, data: &[u8]) -> Result<()> {
        if data.len() != CPM_BLOCK_SIZE {
            return Err(DiskError::Disk(format!(
                "block data must be {CPM_BLOCK_SIZE} bytes"
            )));
        }
        let sector = Self::block_to_sector(block);
        for i in 0..CPM_SECTORS_PER_BLOCK {
            let offset = i * SECTOR_SIZE;
            self.device
                .write_sector(sector + i, &data[offset..offset + SECTOR_SIZE])?;
        }
        Ok(())
    }

    /// All live, plausible directory extents.
    pub fn read_directory(&self) -> Result<Vec<CpmDirEntry>> {
        let mut entries = Vec::new();
        for sector in self.dir_sectors() {
            let data = self.device.read_sector(sector)?;
            for chunk in data.chunks_exact(DIR_ENTRY_SIZE) {
                // 0x00 is user 0, not an end marker; only 0xE5 frees a slot.
                if chunk[0] == CPM_DELETED || chunk[0] > 15 {
                    continue;
                }
                let entry = CpmDirEntry::from_bytes(chunk)?;
                if entry.filename().is_empty() {
                    continue;
                }
                let display = format!("{}{}", entry.filename(), entry.extension());
                if !display.chars().all(|c| (' '..='\u{7e}').contains(&c)) {
                    continue;
                }
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Aggregate extents into files, sorted by user then name.
    pub fn list_cpm_files(&self) -> Result<Vec<CpmFile>> {
        let mut groups: BTreeMap<(u8, String, String), Vec<CpmDirEntry>> = BTreeMap::new();
        for entry in self.read_directory()? {
            groups
                .entry((entry.user, entry.filename(), entry.extension()))
                .or_default()
                .push(entry);
        }

        let mut files = Vec::new();
        for ((user, filename, extension), mut extents) in groups {
            extents.sort_by_key(CpmDirEntry::extent);
            // Every extent but the last counts as full.
            let mut size = 0;
            for (i, extent) in extents.iter().enumerate() {
                if i + 1 < extents.len() {
                    size += CPM_RECORDS_PER_EXTENT * CPM_RECORD_SIZE;
                } else {
                    size += extent.record_count as usize * CPM_RECORD_SIZE;
                }
            }
            files.push(CpmFile {
                user,
                filename,
                extension,
                file_size: size,
                extents,
            });
        }
        files.sort_by(|a, b| (a.user, a.full_name()).cmp(&(b.user, b.full_name())));
        Ok(files)
    }

    /// Look a file up by display name, any user area unless given.
    pub fn find_file(&self, filename: &str, user: Option<u8>) -> Result<Option<CpmFile>> {
        if validate_filename(filename).is_err() {
            return Ok(None);
        }
        let wanted = filename.trim().to_ascii_uppercase();
        Ok(self.list_cpm_files()?.into_iter().find(|f| {
            f.full_name().to_ascii_uppercase() == wanted && user.map_or(true, |u| f.user == u)
        }))
    }

    fn used_blocks(&self) -> Result<std::collections::HashSet<u16>> {
        let mut used = std::collections::HashSet::new();
        for entry in self.read_directory()? {
            used.extend(entry.blocks.iter().copied());
        }
        Ok(used)
    }

    /// Allocate blocks scanning upward from 0. Fails without touching the
    /// directory when the disk cannot hold the request.
    fn allocate_blocks(&self, count: usize) -> Result<Vec<u16>> {
        let used = self.used_blocks()?;
        let blocks: Vec<u16> = (0..CPM_MAX_BLOCKS as u16)
            .filter(|b| !used.contains(b))
            .take(count)
            .collect();
        if blocks.len() < count {
            return Err(DiskError::DiskFull {
                needed: count,
                free: blocks.len(),
            });
        }
        Ok(blocks)
    }

    fn find_free_dir_slot(&self) -> Result<(usize, usize)> {
        for sector in self.dir_sectors() {
            let data = self.device.read_sector(sector)?;
            for index in 0..ENTRIES_PER_SECTOR {
                let user = data[index * DIR_ENTRY_SIZE];
                if user == CPM_DELETED || user == 0x00 {
                    // A zero user byte is only free when the whole slot
                    // is blank; user 0 files are real.
                    let slot = &data[index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE];
                    if user == CPM_DELETED || slot[1..12].iter().all(|&b| b == 0) {
                        return Ok((sector, index));
                    }
                }
            }
        }
        Err(DiskError::DirectoryFull)
    }

    fn write_dir_entry(&self, sector: usize, index: usize, entry: &CpmDirEntry) -> Result<()> {
        let mut data = self.device.read_sector(sector)?;
        let offset = index * DIR_ENTRY_SIZE;
        data[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        self.device.write_sector(sector, &data)
    }

    /// Read a file as the ordered concatenation of its extents' blocks,
    /// truncated to the aggregated size.
    pub fn read_cpm_file(&self, filename: &str) -> Result<Vec<u8>> {
        let file = self
            .find_file(filename, None)?
            .ok_or_else(|| DiskError::NotFound(format!("file not found: {filename}")))?;
        let mut data = Vec::with_capacity(file.file_size);
        for extent in &file.extents {
            for &block in &extent.blocks {
                data.extend_from_slice(&self.read_block(block)?);
            }
        }
        data.truncate(file.file_size);
        Ok(data)
    }

    /// Write a file into a user area, deleting any previous file of the
    /// same name first. The final block is padded with 0x1A, the CP/M
    /// end-of-file filler.
    pub fn write_cpm_file(&self, filename: &str, data: &[u8], user: u8) -> Result<()> {
        if self.device.is_read_only() {
            return Err(DiskError::ReadOnly);
        }
        let (name, ext) = validate_filename(filename)?;

        if self.find_file(filename, None)?.is_some() {
            self.delete_cpm_file(filename)?;
        }

        let num_blocks = ((data.len() + CPM_BLOCK_SIZE - 1) / CPM_BLOCK_SIZE).max(1);
        let blocks = self.allocate_blocks(num_blocks)?;
        debug!("writing {} bytes to {filename} in {num_blocks} block(s)", data.len());

        for (i, &block) in blocks.iter().enumerate() {
            let offset = i * CPM_BLOCK_SIZE;
            let mut block_data = vec![0x1Au8; CPM_BLOCK_SIZE];
            if offset < data.len() {
                let end = (offset + CPM_BLOCK_SIZE).min(data.len());
                block_data[..end - offset].copy_from_slice(&data[offset..end]);
            }
            self.write_block(block, &block_data)?;
        }

        // An empty file still gets one extent, with a record count of 0.
        let mut records_remaining = (data.len() + CPM_RECORD_SIZE - 1) / CPM_RECORD_SIZE;
        let mut extent_num = 0u16;
        let mut block_idx = 0;

        while block_idx < blocks.len() {
            let extent_blocks: Vec<u16> = blocks
                [block_idx..(block_idx + CPM_BLOCKS_PER_EXTENT).min(blocks.len())]
                .to_vec();
            let extent_records = records_remaining.min(CPM_RECORDS_PER_EXTENT);

            let entry = CpmDirEntry {
                user,
                name,
                ext,
                extent_low: (extent_num % 32) as u8,
                extent_high: (extent_num / 32) as u8,
                record_count: extent_records as u8,
                blocks: extent_blocks.clone(),
            };
            let (sector, index) = self.find_free_dir_slot()?;
            self.write_dir_entry(sector, index, &entry)?;

            block_idx += extent_blocks.len();
            records_remaining -= extent_records;
            extent_num += 1;
        }

        self.device.flush()
    }

    /// Delete a file by stamping 0xE5 on every one of its extents.
    pub fn delete_cpm_file(&self, filename: &str) -> Result<()> {
        if self.device.is_read_only() {
            return Err(DiskError::ReadOnly);
        }
        let file = self
            .find_file(filename, None)?
            .ok_or_else(|| DiskError::NotFound(format!("file not found: {filename}")))?;

        for target in &file.extents {
            'sectors: for sector in self.dir_sectors() {
                let mut data = self.device.read_sector(sector)?;
                for index in 0..ENTRIES_PER_SECTOR {
                    let offset = index * DIR_ENTRY_SIZE;
                    let chunk = &data[offset..offset + DIR_ENTRY_SIZE];
                    if chunk[0] == CPM_DELETED || chunk[0] > 15 {
                        continue;
                    }
                    let entry = CpmDirEntry::from_bytes(chunk)?;
                    if entry.user == target.user
                        && entry.filename() == target.filename()
                        && entry.extension() == target.extension()
                        && entry.extent() == target.extent()
                    {
                        data[offset] = CPM_DELETED;
                        self.device.write_sector(sector, &data)?;
                        break 'sectors;
                    }
                }
            }
        }
        self.device.flush()
    }
}

/// Count plausible entries in the first four slots of a would-be
/// directory sector.
fn plausible_entries(data: &[u8]) -> usize {
    data.chunks_exact(DIR_ENTRY_SIZE)
        .take(4)
        .filter(|chunk| {
            let user = chunk[0];
            if user > 15 && user != CPM_DELETED {
                return false;
            }
            chunk[1..9].iter().all(|&b| {
                let c = b & 0x7F;
                (0x20..0x7F).contains(&c)
            })
        })
        .count()
}

/// Try the known directory homes and keep the first that looks inhabited.
pub fn detect_dir_sector(device: &dyn BlockDevice) -> Result<Option<usize>> {
    for &sector in &[76usize, 94, 1] {
        if (sector + 1) * SECTOR_SIZE > device.total_bytes() as usize {
            continue;
        }
        let data = device.read_sector(sector)?;
        if plausible_entries(&data) >= 2 {
            return Ok(Some(sector));
        }
    }
    Ok(None)
}

impl Volume for CpmVolume {
    fn type_name(&self) -> &'static str {
        "Victor 9000 CP/M"
    }

    fn is_read_only(&self) -> bool {
        self.device.is_read_only()
    }

    fn list_files(&self, _path: &[String]) -> Result<Vec<FileRecord>> {
        Ok(self.list_cpm_files()?.iter().map(CpmFile::record).collect())
    }

    fn read_file(&self, path: &[String]) -> Result<Vec<u8>> {
        let filename = path
            .last()
            .ok_or_else(|| DiskError::NotFound("no filename specified".into()))?;
        self.read_cpm_file(filename)
    }

    fn write_file(&mut self, path: &[String], data: &[u8]) -> Result<()> {
        let filename = path
            .last()
            .ok_or_else(|| DiskError::InvalidFilename("no filename specified".into()))?;
        self.write_cpm_file(filename, data, 0)
    }

    fn delete_file(&mut self, path: &[String]) -> Result<()> {
        let filename = path
            .last()
            .ok_or_else(|| DiskError::NotFound("no filename specified".into()))?;
        self.delete_cpm_file(filename)
    }

    fn create_directory(&mut self, _path: &[String]) -> Result<()> {
        Err(DiskError::Disk("CP/M disks do not have directories".into()))
    }

    fn delete_directory(&mut self, _path: &[String], _recursive: bool) -> Result<()> {
        Err(DiskError::Disk("CP/M disks do not have directories".into()))
    }

    fn get_attributes(&self, _path: &[String]) -> Result<u8> {
        Err(DiskError::Disk(
            "attributes are not supported on CP/M disks".into(),
        ))
    }

    fn set_attributes(&mut self, _path: &[String], _attributes: u8) -> Result<()> {
        Err(DiskError::Disk(
            "attributes are not supported on CP/M disks".into(),
        ))
    }

    fn rename(&mut self, _path: &[String], _new_name: &str) -> Result<()> {
        Err(DiskError::Disk("rename is not supported on CP/M disks".into()))
    }

    fn find_matching(&self, path: &[String], _recursive: bool) -> Result<Vec<(String, FileRecord)>> {
        let Some(pattern) = path.last() else {
            return Ok(Vec::new());
        };
        let mut results = Vec::new();
        for file in self.list_cpm_files()? {
            let matched = if has_wildcards(pattern) {
                match_filename(pattern, &file.full_name())
            } else {
                file.full_name().eq_ignore_ascii_case(pattern)
            };
            if matched {
                results.push((file.full_name(), file.record()));
            }
        }
        Ok(results)
    }

    fn report(&self) -> Result<VolumeReport> {
        crate::info::cpm_report(self).map(VolumeReport::Cpm)
    }

    fn verify(&self, verbose: bool) -> Result<VerifyReport> {
        crate::verify::verify_cpm(self, verbose)
    }

    fn flush_volume(&mut self) -> Result<()> {
        self.device.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_round_trip_and_el_s2_split() {
        let entry = CpmDirEntry {
            user: 0,
            name: *b"PIP     ",
            ext: *b"COM",
            extent_low: 33 % 32,
            extent_high: 33 / 32,
            record_count: 48,
            blocks: vec![3, 4, 5],
        };
        let parsed = CpmDirEntry::from_bytes(&entry.to_bytes()).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.extent(), 33);
        assert_eq!(parsed.full_name(), "PIP.COM");
    }

    #[test]
    fn attribute_bits_live_in_extension_high_bits() {
        let mut entry = CpmDirEntry {
            user: 2,
            name: *b"SECRET  ",
            ext: *b"TXT",
            extent_low: 0,
            extent_high: 0,
            record_count: 1,
            blocks: vec![1],
        };
        entry.ext[0] |= 0x80;
        entry.ext[1] |= 0x80;
        let parsed = CpmDirEntry::from_bytes(&entry.to_bytes()).unwrap();
        assert!(parsed.is_read_only());
        assert!(parsed.is_system());
        assert!(!parsed.is_archive());
        assert_eq!(parsed.extension(), "TXT");
    }

    #[test]
    fn plausible_entry_counting() {
        let mut sector = vec![0xE5u8; SECTOR_SIZE];
        assert_eq!(plausible_entries(&sector), 4);

        sector.fill(0);
        // Zero user with NUL name bytes is not plausible.
        assert_eq!(plausible_entries(&sector), 0);

        sector[0] = 0;
        sector[1..9].copy_from_slice(b"STAT    ");
        assert_eq!(plausible_entries(&sector), 1);
    }
}
