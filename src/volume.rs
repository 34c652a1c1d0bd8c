//! FAT12 volumes and the common volume operation surface.
//!
//! A [`Fat12Volume`] binds a block device to a [`Geometry`] and owns the
//! in-memory FAT shadow. The three FAT12 formats (Victor floppy, IBM PC
//! floppy, Victor hard disk partition) differ only in how the geometry is
//! derived; everything else is shared. On a multi-partition hard disk all
//! partitions hold clones of one `Arc<dyn BlockDevice>` and each keeps its
//! own FAT shadow.
//!
//! [`Volume`] is the trait object surface the CLI dispatches through; the
//! CP/M engine implements it too.

use std::sync::Arc;

use crate::device::BlockDevice;
use crate::entry::{DirEntry, FileRecord};
use crate::error::{DiskError, Result};
use crate::fat::Fat12;
use crate::info::VolumeReport;
use crate::verify::VerifyReport;
use crate::{SECTOR_SIZE, ATTR_VOLUME};

/// Complete FAT12 layout. All sector numbers are absolute within the
/// underlying block device, so partition geometries carry their volume
/// offset baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub fat_start: usize,
    pub fat_sectors: usize,
    pub fat_copies: usize,
    pub dir_start: usize,
    /// Fixed root directory span.
    pub dir_sectors: usize,
    pub data_start: usize,
    pub total_clusters: usize,
    pub sectors_per_cluster: usize,
    pub cluster_size: usize,
}

#[derive(Debug, Clone)]
pub enum VolumeKind {
    VictorFloppy { double_sided: bool },
    IbmFloppy,
    HardDiskPartition { index: usize, name: String },
}

impl VolumeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            VolumeKind::VictorFloppy { .. } => "Victor 9000 Floppy",
            VolumeKind::IbmFloppy => "IBM PC Floppy",
            VolumeKind::HardDiskPartition { .. } => "Victor 9000 Hard Disk Partition",
        }
    }
}

pub struct Fat12Volume {
    device: Arc<dyn BlockDevice>,
    geometry: Geometry,
    fat: Fat12,
    kind: VolumeKind,
}

impl Fat12Volume {
    /// Bind a device to a geometry and load the FAT shadow.
    pub fn new(device: Arc<dyn BlockDevice>, geometry: Geometry, kind: VolumeKind) -> Result<Self> {
        let fat = Fat12::load(
            device.as_ref(),
            geometry.fat_start,
            geometry.fat_sectors,
            geometry.fat_copies,
            geometry.total_clusters,
        )?;
        Ok(Self {
            device,
            geometry,
            fat,
            kind,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn kind(&self) -> &VolumeKind {
        &self.kind
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    pub fn fat(&self) -> &Fat12 {
        &self.fat
    }

    pub fn fat_mut(&mut self) -> &mut Fat12 {
        &mut self.fat
    }

    /// First sector of a data cluster. Data clusters start at 2.
    pub fn cluster_to_sector(&self, cluster: u16) -> usize {
        self.geometry.data_start + (cluster as usize - 2) * self.geometry.sectors_per_cluster
    }

    pub fn read_sector(&self, sector: usize) -> Result<Vec<u8>> {
        self.device.read_sector(sector)
    }

    pub fn write_sector(&self, sector: usize, data: &[u8]) -> Result<()> {
        self.device.write_sector(sector, data)
    }

    /// Concatenated contents of one cluster.
    pub fn read_cluster(&self, cluster: u16) -> Result<Vec<u8>> {
        let first = self.cluster_to_sector(cluster);
        let mut data = Vec::with_capacity(self.geometry.cluster_size);
        for i in 0..self.geometry.sectors_per_cluster {
            data.extend_from_slice(&self.read_sector(first + i)?);
        }
        Ok(data)
    }

    pub fn zero_cluster(&self, cluster: u16) -> Result<()> {
        let first = self.cluster_to_sector(cluster);
        let zeros = [0u8; SECTOR_SIZE];
        for i in 0..self.geometry.sectors_per_cluster {
            self.write_sector(first + i, &zeros)?;
        }
        Ok(())
    }

    /// Root directory volume label, if one was written at format time.
    pub fn volume_label(&self) -> Result<Option<String>> {
        for i in 0..self.geometry.dir_sectors {
            let sector = self.read_sector(self.geometry.dir_start + i)?;
            for chunk in sector.chunks_exact(crate::DIR_ENTRY_SIZE) {
                let entry = DirEntry::from_bytes(chunk)?;
                if entry.is_end() {
                    return Ok(None);
                }
                if !entry.is_free() && entry.attributes & ATTR_VOLUME != 0 {
                    let mut label = String::new();
                    for &b in entry.name.iter().chain(entry.ext.iter()) {
                        label.push(b as char);
                    }
                    return Ok(Some(label.trim_end().to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Persist the FAT shadow (all copies) and flush the device.
    pub fn flush(&mut self) -> Result<()> {
        self.fat.flush(self.device.as_ref())?;
        self.device.flush()
    }
}

impl Drop for Fat12Volume {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Filesystem operations common to every volume type. Paths are lists of
/// already-split components; an empty path means the root directory.
pub trait Volume {
    fn type_name(&self) -> &'static str;
    fn is_read_only(&self) -> bool;

    fn list_files(&self, path: &[String]) -> Result<Vec<FileRecord>>;
    fn read_file(&self, path: &[String]) -> Result<Vec<u8>>;
    fn write_file(&mut self, path: &[String], data: &[u8]) -> Result<()>;
    fn delete_file(&mut self, path: &[String]) -> Result<()>;

    fn create_directory(&mut self, path: &[String]) -> Result<()>;
    fn delete_directory(&mut self, path: &[String], recursive: bool) -> Result<()>;

    fn get_attributes(&self, path: &[String]) -> Result<u8>;
    fn set_attributes(&mut self, path: &[String], attributes: u8) -> Result<()>;
    fn rename(&mut self, path: &[String], new_name: &str) -> Result<()>;

    /// Expand a path whose leaf may contain wildcards into
    /// `(relative_path, record)` pairs.
    fn find_matching(&self, path: &[String], recursive: bool) -> Result<Vec<(String, FileRecord)>>;

    fn report(&self) -> Result<VolumeReport>;
    fn verify(&self, verbose: bool) -> Result<VerifyReport>;

    fn flush_volume(&mut self) -> Result<()>;
}

impl Volume for Fat12Volume {
    fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    fn is_read_only(&self) -> bool {
        self.device.is_read_only()
    }

    fn list_files(&self, path: &[String]) -> Result<Vec<FileRecord>> {
        Ok(self
            .list_entries(path)?
            .iter()
            .map(DirEntry::record)
            .collect())
    }

    fn read_file(&self, path: &[String]) -> Result<Vec<u8>> {
        Fat12Volume::read_file(self, path)
    }

    fn write_file(&mut self, path: &[String], data: &[u8]) -> Result<()> {
        Fat12Volume::write_file(self, path, data)
    }

    fn delete_file(&mut self, path: &[String]) -> Result<()> {
        Fat12Volume::delete_file(self, path)
    }

    fn create_directory(&mut self, path: &[String]) -> Result<()> {
        Fat12Volume::create_directory(self, path)
    }

    fn delete_directory(&mut self, path: &[String], recursive: bool) -> Result<()> {
        Fat12Volume::delete_directory(self, path, recursive)
    }

    fn get_attributes(&self, path: &[String]) -> Result<u8> {
        Ok(self.find_entry(path)?.attributes)
    }

    fn set_attributes(&mut self, path: &[String], attributes: u8) -> Result<()> {
        Fat12Volume::set_attributes(self, path, attributes)
    }

    fn rename(&mut self, path: &[String], new_name: &str) -> Result<()> {
        Fat12Volume::rename_entry(self, path, new_name)
    }

    fn find_matching(&self, path: &[String], recursive: bool) -> Result<Vec<(String, FileRecord)>> {
        Ok(Fat12Volume::find_matching_files(self, path, recursive)?
            .into_iter()
            .map(|(p, e)| (p, e.record()))
            .collect())
    }

    fn report(&self) -> Result<VolumeReport> {
        crate::info::fat12_report(self).map(VolumeReport::Fat12)
    }

    fn verify(&self, verbose: bool) -> Result<VerifyReport> {
        crate::verify::verify_fat12(self, verbose)
    }

    fn flush_volume(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Directory mutations work against either the fixed root span or a
/// subdirectory cluster chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirHandle {
    Root,
    Sub(u16),
}

impl DirHandle {
    pub fn cluster(&self) -> Option<u16> {
        match self {
            DirHandle::Root => None,
            DirHandle::Sub(c) => Some(*c),
        }
    }
}

/// Signal a write attempt before touching anything.
pub(crate) fn require_writable(device: &Arc<dyn BlockDevice>) -> Result<()> {
    if device.is_read_only() {
        return Err(DiskError::ReadOnly);
    }
    Ok(())
}
