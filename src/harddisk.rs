//! Victor 9000 hard disk images.
//!
//! A hard disk is a stack of FAT12 volumes. Sector 0 carries the Physical
//! Disk Label whose virtual volume list names the absolute start sector of
//! each partition; the partition's first sector is its Virtual Volume
//! Label and the FAT copies follow immediately after.
//!
//! The VVL does not record the FAT size. It is discovered by scanning the
//! sectors after the label and classifying each one: FAT sectors open with
//! the 0xF8 media descriptor (or are still zero on a blank volume), while
//! the first directory sector is recognisable by 8.3-shaped name bytes and
//! a legal attribute byte. The first directory-shaped sector at offset `k`
//! inside the volume pins the layout to `fat_sectors = (k - 1) / 2`, two
//! copies assumed. The scan is bounded by an estimate derived from the
//! volume capacity and a hard cap; if nothing directory-shaped turns up,
//! the estimate itself is used.
//!
//! Known weakness, kept deliberately: a FAT whose last sector happens to
//! look directory-shaped will be mis-sized by the scan.
//!
//! All partitions share the one underlying block device; each keeps its
//! own FAT shadow.

use std::sync::Arc;

use log::{debug, warn};

use crate::device::BlockDevice;
use crate::error::{DiskError, Result};
use crate::label::{PhysicalDiskLabel, VirtualVolumeLabel};
use crate::volume::{Fat12Volume, Geometry, VolumeKind};
use crate::{
    sectors_for, DIR_ENTRY_SIZE, ENTRIES_PER_SECTOR, FILENAME_CHARSET, HD_MAX_DIR_ENTRIES,
    HD_SECTORS_PER_CLUSTER, SECTOR_SIZE,
};

/// Upper bound on the FAT-size scan, in sectors.
const FAT_SCAN_CAP: usize = 100;

pub struct HardDisk {
    device: Arc<dyn BlockDevice>,
    label: PhysicalDiskLabel,
    partitions: Vec<Fat12Volume>,
    volume_labels: Vec<VirtualVolumeLabel>,
}

impl HardDisk {
    pub fn open(device: Arc<dyn BlockDevice>) -> Result<Self> {
        // The PDL may spill past sector 0; read two sectors like the
        // label was written.
        let mut label_data = device.read_sector(0)?;
        label_data.extend_from_slice(&device.read_sector(1)?);
        let label = PhysicalDiskLabel::from_bytes(&label_data)?;
        if !label.is_valid() {
            return Err(DiskError::HardDiskLabel(format!(
                "not a Victor hard disk label (type 0x{:04X}, device 0x{:04X})",
                label.label_type, label.device_id
            )));
        }

        let mut disk = Self {
            device,
            label,
            partitions: Vec::new(),
            volume_labels: Vec::new(),
        };
        disk.load_partitions()?;
        Ok(disk)
    }

    fn load_partitions(&mut self) -> Result<()> {
        for (idx, &addr) in self.label.virtual_volume_addresses.iter().enumerate() {
            let sector = self.device.read_sector(addr as usize)?;
            let vvl = VirtualVolumeLabel::from_bytes(&sector, addr)?;
            if !vvl.is_volume() {
                debug!(
                    "skipping volume slot {idx}: label type 0x{:04X} at sector {addr}",
                    vvl.label_type
                );
                continue;
            }
            let geometry = partition_geometry(self.device.as_ref(), &vvl)?;
            let kind = VolumeKind::HardDiskPartition {
                index: self.partitions.len(),
                name: vvl.volume_name.clone(),
            };
            self.partitions
                .push(Fat12Volume::new(Arc::clone(&self.device), geometry, kind)?);
            self.volume_labels.push(vvl);
        }
        Ok(())
    }

    pub fn label(&self) -> &PhysicalDiskLabel {
        &self.label
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn volume_labels(&self) -> &[VirtualVolumeLabel] {
        &self.volume_labels
    }

    fn check_index(&self, index: isize) -> Result<usize> {
        if index < 0 || index as usize >= self.partitions.len() {
            return Err(DiskError::InvalidPartition {
                index,
                max: self.partitions.len().saturating_sub(1),
            });
        }
        Ok(index as usize)
    }

    pub fn partition(&self, index: isize) -> Result<&Fat12Volume> {
        Ok(&self.partitions[self.check_index(index)?])
    }

    pub fn partition_mut(&mut self, index: isize) -> Result<&mut Fat12Volume> {
        let index = self.check_index(index)?;
        Ok(&mut self.partitions[index])
    }

    /// Detach one partition as a standalone volume handle. The device
    /// stays shared with nothing else once the disk handle is dropped.
    pub fn into_partition(mut self, index: isize) -> Result<Fat12Volume> {
        let index = self.check_index(index)?;
        Ok(self.partitions.swap_remove(index))
    }

    pub fn is_read_only(&self) -> bool {
        self.device.is_read_only()
    }

    pub fn flush(&mut self) -> Result<()> {
        for partition in &mut self.partitions {
            partition.flush()?;
        }
        self.device.flush()
    }
}

/// Derive a partition's FAT12 geometry from its volume label.
pub fn partition_geometry(device: &dyn BlockDevice, vvl: &VirtualVolumeLabel) -> Result<Geometry> {
    let sectors_per_cluster = if vvl.allocation_unit != 0 {
        vvl.allocation_unit as usize
    } else {
        HD_SECTORS_PER_CLUSTER
    };
    let dir_entries = if vvl.num_dir_entries != 0 {
        vvl.num_dir_entries as usize
    } else {
        HD_MAX_DIR_ENTRIES
    };
    let dir_sectors = (dir_entries + ENTRIES_PER_SECTOR - 1) / ENTRIES_PER_SECTOR;

    let volume_start = vvl.volume_start_sector as usize;
    let fat_sectors = detect_fat_sectors(device, volume_start, vvl, sectors_per_cluster)?;

    let fat_start = volume_start + 1;
    let dir_start = fat_start + 2 * fat_sectors;
    let data_start = dir_start + dir_sectors;

    let overhead = 1 + 2 * fat_sectors + dir_sectors;
    let data_sectors = (vvl.volume_capacity as usize).saturating_sub(overhead);

    // A 12-bit FAT tops out at cluster 0xFEF, so at most 4078 data
    // clusters are addressable no matter what the label claims.
    let total_clusters = (data_sectors / sectors_per_cluster).min(0xFEF - 1);

    Ok(Geometry {
        fat_start,
        fat_sectors,
        fat_copies: 2,
        dir_start,
        dir_sectors,
        data_start,
        total_clusters,
        sectors_per_cluster,
        cluster_size: sectors_per_cluster * SECTOR_SIZE,
    })
}

/// Estimated FAT size from the cluster count alone: 1.5 bytes per entry.
fn estimated_fat_sectors(vvl: &VirtualVolumeLabel, sectors_per_cluster: usize) -> usize {
    let clusters = vvl.volume_capacity as usize / sectors_per_cluster;
    sectors_for((clusters * 3 + 1) / 2).max(1)
}

/// Find the FAT size by scanning for the first directory-shaped sector.
fn detect_fat_sectors(
    device: &dyn BlockDevice,
    volume_start: usize,
    vvl: &VirtualVolumeLabel,
    sectors_per_cluster: usize,
) -> Result<usize> {
    let estimate = estimated_fat_sectors(vvl, sectors_per_cluster);
    let bound = (2 * estimate + 2).min(FAT_SCAN_CAP);

    for k in 1..=bound {
        let data = device.read_sector(volume_start + k)?;
        if looks_like_directory_sector(&data) {
            let fat_sectors = ((k - 1) / 2).max(1);
            debug!(
                "directory-shaped sector at volume offset {k}, fat_sectors = {fat_sectors} \
                 (estimate was {estimate})"
            );
            return Ok(fat_sectors);
        }
    }

    warn!(
        "no directory-shaped sector within {bound} sectors of volume at {volume_start}; \
         using estimated FAT size {estimate}"
    );
    Ok(estimate)
}

/// Directory-shaped means: not a FAT media descriptor, not blank, a legal
/// attribute byte at offset 11, and 8.3-charset name bytes.
fn looks_like_directory_sector(data: &[u8]) -> bool {
    if data.len() < DIR_ENTRY_SIZE {
        return false;
    }
    let first = data[0];
    if first == 0xF8 || first == 0x00 {
        return false;
    }
    let attr = data[11];
    if attr > 0x3F || attr == 0x0F {
        return false;
    }
    if first == 0xE5 {
        // Deleted entry; the name bytes may be stale garbage.
        return true;
    }
    name_bytes_legal(&data[0..8]) && name_bytes_legal(&data[8..11])
}

fn name_bytes_legal(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| b.is_ascii() && (FILENAME_CHARSET.contains(b as char) || b == b'.'))
}
