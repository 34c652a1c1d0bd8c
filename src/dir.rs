//! Directory walking and mutation for FAT12 volumes.
//!
//! A directory is a stream of 32-byte records. The root directory of a
//! Victor volume is a fixed span of sectors; subdirectories are ordinary
//! cluster chains and grow by allocating another cluster. Iteration stops
//! at the first record whose first byte is 0x00; records starting with
//! 0xE5 are reusable holes.
//!
//! Every subdirectory starts with the dot pair: `.` points at the
//! directory itself and `..` at its parent (first cluster 0 when the
//! parent is the root).

use log::debug;

use crate::entry::{DirEntry, DosStamp};
use crate::error::{DiskError, Result};
use crate::volume::{require_writable, DirHandle, Fat12Volume};
use crate::{
    validate_filename, ATTR_DIRECTORY, DIR_ENTRY_DELETED, DIR_ENTRY_SIZE, ENTRIES_PER_SECTOR,
    FAT_EOF_MAX,
};

/// Absolute location of one directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLocation {
    pub sector: usize,
    pub index: usize,
}

impl Fat12Volume {
    /// Sectors making up a directory, in record order.
    pub(crate) fn directory_sectors(&self, dir: DirHandle) -> Result<Vec<usize>> {
        match dir {
            DirHandle::Root => {
                let geo = self.geometry();
                Ok((geo.dir_start..geo.dir_start + geo.dir_sectors).collect())
            }
            DirHandle::Sub(cluster) => {
                let spc = self.geometry().sectors_per_cluster;
                let mut sectors = Vec::new();
                for cluster in self.fat().follow_chain(cluster)? {
                    let first = self.cluster_to_sector(cluster);
                    sectors.extend(first..first + spc);
                }
                Ok(sectors)
            }
        }
    }

    /// Live entries of a directory. Deleted slots and the volume label
    /// are skipped; the scan ends at the end-of-directory sentinel.
    pub fn read_directory(&self, dir: DirHandle) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for sector in self.directory_sectors(dir)? {
            let data = self.read_sector(sector)?;
            for chunk in data.chunks_exact(DIR_ENTRY_SIZE) {
                let entry = DirEntry::from_bytes(chunk)?;
                if entry.is_end() {
                    return Ok(entries);
                }
                if !entry.is_deleted() && !entry.is_volume_label() {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Locate a live entry by on-disk name, returning its slot.
    pub(crate) fn find_slot(
        &self,
        dir: DirHandle,
        name: &[u8; 8],
        ext: &[u8; 3],
    ) -> Result<Option<(SlotLocation, DirEntry)>> {
        for sector in self.directory_sectors(dir)? {
            let data = self.read_sector(sector)?;
            for (index, chunk) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                let entry = DirEntry::from_bytes(chunk)?;
                if entry.is_end() {
                    return Ok(None);
                }
                if !entry.is_deleted() && entry.matches(name, ext) {
                    return Ok(Some((SlotLocation { sector, index }, entry)));
                }
            }
        }
        Ok(None)
    }

    /// Rewrite one record in place.
    pub(crate) fn write_entry(&self, loc: SlotLocation, entry: &DirEntry) -> Result<()> {
        let mut data = self.read_sector(loc.sector)?;
        let offset = loc.index * DIR_ENTRY_SIZE;
        data[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        self.write_sector(loc.sector, &data)
    }

    /// First reusable slot of a directory.
    ///
    /// A fixed-size root that has no free record fails with
    /// `DirectoryFull`. A full subdirectory grows instead: one cluster is
    /// allocated, zero-filled and spliced onto the end of the chain.
    pub(crate) fn find_free_slot(&mut self, dir: DirHandle) -> Result<SlotLocation> {
        for sector in self.directory_sectors(dir)? {
            let data = self.read_sector(sector)?;
            for index in 0..ENTRIES_PER_SECTOR {
                let first_byte = data[index * DIR_ENTRY_SIZE];
                if first_byte == 0x00 || first_byte == DIR_ENTRY_DELETED {
                    return Ok(SlotLocation { sector, index });
                }
            }
        }

        let cluster = match dir {
            DirHandle::Root => return Err(DiskError::DirectoryFull),
            DirHandle::Sub(cluster) => cluster,
        };

        let new_cluster = self
            .fat()
            .find_free()
            .ok_or(DiskError::DiskFull { needed: 1, free: 0 })?;
        debug!("growing directory chain at {cluster} with cluster {new_cluster}");

        self.zero_cluster(new_cluster)?;
        let chain = self.fat().follow_chain(cluster)?;
        let last = chain.last().copied().unwrap_or(cluster);
        self.fat_mut().set(new_cluster, FAT_EOF_MAX)?;
        self.fat_mut().set(last, new_cluster)?;

        Ok(SlotLocation {
            sector: self.cluster_to_sector(new_cluster),
            index: 0,
        })
    }

    /// Stamp a record deleted. Missing names are ignored; the caller has
    /// already freed the entry's chain if it had one.
    pub(crate) fn delete_slot(&self, dir: DirHandle, name: &[u8; 8], ext: &[u8; 3]) -> Result<()> {
        if let Some((loc, _)) = self.find_slot(dir, name, ext)? {
            let mut data = self.read_sector(loc.sector)?;
            data[loc.index * DIR_ENTRY_SIZE] = DIR_ENTRY_DELETED;
            self.write_sector(loc.sector, &data)?;
        }
        Ok(())
    }

    /// Rewrite the attribute byte of an entry. The directory bit is
    /// carried over from the old value no matter what was requested.
    pub(crate) fn update_slot_attributes(
        &self,
        dir: DirHandle,
        name: &[u8; 8],
        ext: &[u8; 3],
        attributes: u8,
    ) -> Result<()> {
        let (loc, entry) = self
            .find_slot(dir, name, ext)?
            .ok_or_else(|| DiskError::NotFound(display_name(name, ext)))?;
        let mut data = self.read_sector(loc.sector)?;
        let offset = loc.index * DIR_ENTRY_SIZE + 11;
        data[offset] = (entry.attributes & ATTR_DIRECTORY) | (attributes & !ATTR_DIRECTORY);
        self.write_sector(loc.sector, &data)
    }

    /// Rewrite the name and extension bytes of an entry in place.
    pub(crate) fn rename_slot(
        &self,
        dir: DirHandle,
        old_name: &[u8; 8],
        old_ext: &[u8; 3],
        new_name: &[u8; 8],
        new_ext: &[u8; 3],
    ) -> Result<()> {
        let (loc, _) = self
            .find_slot(dir, old_name, old_ext)?
            .ok_or_else(|| DiskError::NotFound(display_name(old_name, old_ext)))?;
        let mut data = self.read_sector(loc.sector)?;
        let offset = loc.index * DIR_ENTRY_SIZE;
        data[offset..offset + 8].copy_from_slice(new_name);
        data[offset + 8..offset + 11].copy_from_slice(new_ext);
        self.write_sector(loc.sector, &data)
    }

    /// Create a subdirectory with its dot pair.
    ///
    /// Creating a directory that already exists is a no-op; a file of the
    /// same name is an error.
    pub fn create_directory(&mut self, path: &[String]) -> Result<()> {
        require_writable(self.device())?;
        let Some((dirname, parent_path)) = path.split_last() else {
            return Err(DiskError::InvalidFilename("empty path".into()));
        };
        let (name, ext) = validate_filename(dirname)?;

        let parent = self.resolve_directory(parent_path)?;
        for entry in self.read_directory(parent)? {
            if entry.matches(&name, &ext) {
                if entry.is_directory() {
                    return Ok(());
                }
                return Err(DiskError::Disk(format!(
                    "'{dirname}' already exists as a file"
                )));
            }
        }

        let new_cluster = self
            .fat()
            .find_free()
            .ok_or(DiskError::DiskFull { needed: 1, free: 0 })?;
        self.zero_cluster(new_cluster)?;
        self.fat_mut().set(new_cluster, FAT_EOF_MAX)?;

        let stamp = DosStamp::now();
        let dot = DirEntry::new(*b".       ", *b"   ", ATTR_DIRECTORY, new_cluster, 0, stamp);
        let dotdot = DirEntry::new(
            *b"..      ",
            *b"   ",
            ATTR_DIRECTORY,
            parent.cluster().unwrap_or(0),
            0,
            stamp,
        );

        let first_sector = self.cluster_to_sector(new_cluster);
        let mut data = self.read_sector(first_sector)?;
        data[0..DIR_ENTRY_SIZE].copy_from_slice(&dot.to_bytes());
        data[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot.to_bytes());
        self.write_sector(first_sector, &data)?;

        let record = DirEntry::new(name, ext, ATTR_DIRECTORY, new_cluster, 0, stamp);
        let slot = self.find_free_slot(parent)?;
        self.write_entry(slot, &record)?;

        self.flush()
    }

    /// Remove a subdirectory. A non-empty directory (ignoring the dot
    /// pair) requires `recursive`, which then deletes the whole subtree
    /// before freeing the directory's own chain.
    pub fn delete_directory(&mut self, path: &[String], recursive: bool) -> Result<()> {
        require_writable(self.device())?;
        let Some((dirname, parent_path)) = path.split_last() else {
            return Err(DiskError::InvalidFilename("empty path".into()));
        };
        let (name, ext) = validate_filename(dirname)?;

        let parent = self.resolve_directory(parent_path)?;
        let target = self
            .find_slot(parent, &name, &ext)?
            .map(|(_, entry)| entry)
            .ok_or_else(|| DiskError::NotFound(format!("directory not found: {dirname}")))?;
        if !target.is_directory() {
            return Err(DiskError::Disk(format!("'{dirname}' is not a directory")));
        }

        let children: Vec<DirEntry> = self
            .read_directory(DirHandle::Sub(target.first_cluster))?
            .into_iter()
            .filter(|e| !e.is_dot_entry())
            .collect();

        if !children.is_empty() && !recursive {
            return Err(DiskError::Disk(format!(
                "directory '{dirname}' is not empty"
            )));
        }

        for child in children {
            let mut child_path = path.to_vec();
            child_path.push(child.full_name());
            if child.is_directory() {
                self.delete_directory(&child_path, true)?;
            } else {
                self.delete_file(&child_path)?;
            }
        }

        if target.first_cluster > 0 {
            self.fat_mut().free_chain(target.first_cluster)?;
        }
        self.delete_slot(parent, &name, &ext)?;
        self.flush()
    }
}

pub(crate) fn display_name(name: &[u8; 8], ext: &[u8; 3]) -> String {
    let name: String = name.iter().map(|&b| b as char).collect();
    let ext: String = ext.iter().map(|&b| b as char).collect();
    let (name, ext) = (name.trim_end(), ext.trim_end());
    if ext.is_empty() {
        name.to_string()
    } else {
        format!("{name}.{ext}")
    }
}
