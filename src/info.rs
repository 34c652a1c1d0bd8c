//! Capacity and usage reporting.

use serde::Serialize;

use crate::cpm::CpmVolume;
use crate::error::Result;
use crate::harddisk::HardDisk;
use crate::label::DriveAssignment;
use crate::volume::{DirHandle, Fat12Volume};
use crate::{FAT_BAD, FAT_FREE, SECTOR_SIZE};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VolumeReport {
    Fat12(Fat12Stats),
    Cpm(CpmStats),
}

#[derive(Debug, Serialize)]
pub struct Fat12Stats {
    #[serde(rename = "type")]
    pub type_name: String,
    /// Volume name from the VVL, for hard disk partitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub filesystem: &'static str,
    pub readonly: bool,
    pub cluster_size: usize,
    pub sectors_per_cluster: usize,
    pub total_clusters: usize,
    pub free_clusters: usize,
    pub used_clusters: usize,
    pub bad_clusters: usize,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub percent_used: f64,
    pub file_count: usize,
    pub directory_count: usize,
    pub fat_sectors: usize,
    pub fat_copies: usize,
    pub root_dir_sectors: usize,
    pub data_start_sector: usize,
}

#[derive(Debug, Serialize)]
pub struct CpmStats {
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub filesystem: &'static str,
    pub readonly: bool,
    pub file_count: usize,
    pub total_file_size: u64,
}

#[derive(Debug, Serialize)]
pub struct PartitionSummary {
    pub index: usize,
    pub name: String,
    /// In sectors, straight from the volume label.
    pub capacity: u32,
    pub capacity_bytes: u64,
    pub cluster_size: usize,
    pub assignments: Vec<DriveAssignment>,
}

#[derive(Debug, Serialize)]
pub struct HardDiskStats {
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub filesystem: &'static str,
    pub readonly: bool,
    pub partition_count: usize,
    pub total_capacity: u64,
    pub partitions: Vec<Fat12Stats>,
}

/// Gather stats for one FAT12 volume.
pub fn fat12_report(volume: &Fat12Volume) -> Result<Fat12Stats> {
    let geo = volume.geometry();
    let mut free_clusters = 0;
    let mut used_clusters = 0;
    let mut bad_clusters = 0;
    for cluster in 2..(geo.total_clusters + 2) as u16 {
        match volume.fat().get(cluster) {
            FAT_FREE => free_clusters += 1,
            FAT_BAD => bad_clusters += 1,
            _ => used_clusters += 1,
        }
    }

    let (file_count, directory_count) = count_entries(volume, DirHandle::Root);

    let name = match volume.kind() {
        crate::volume::VolumeKind::HardDiskPartition { name, .. } => Some(name.clone()),
        _ => None,
    };

    let cluster_size = geo.cluster_size as u64;
    Ok(Fat12Stats {
        type_name: volume.kind().type_name().to_string(),
        name,
        filesystem: "FAT12",
        readonly: volume.device().is_read_only(),
        cluster_size: geo.cluster_size,
        sectors_per_cluster: geo.sectors_per_cluster,
        total_clusters: geo.total_clusters,
        free_clusters,
        used_clusters,
        bad_clusters,
        total_bytes: geo.total_clusters as u64 * cluster_size,
        free_bytes: free_clusters as u64 * cluster_size,
        used_bytes: used_clusters as u64 * cluster_size,
        percent_used: if geo.total_clusters > 0 {
            (used_clusters as f64 / geo.total_clusters as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        },
        file_count,
        directory_count,
        fat_sectors: geo.fat_sectors,
        fat_copies: geo.fat_copies,
        root_dir_sectors: geo.dir_sectors,
        data_start_sector: geo.data_start,
    })
}

fn count_entries(volume: &Fat12Volume, dir: DirHandle) -> (usize, usize) {
    let mut files = 0;
    let mut dirs = 0;
    // Counting is best-effort; a corrupt subtree just stops contributing.
    if let Ok(entries) = volume.read_directory(dir) {
        for entry in entries {
            if entry.is_dot_entry() {
                continue;
            }
            if entry.is_directory() {
                dirs += 1;
                let (sub_files, sub_dirs) =
                    count_entries(volume, DirHandle::Sub(entry.first_cluster));
                files += sub_files;
                dirs += sub_dirs;
            } else {
                files += 1;
            }
        }
    }
    (files, dirs)
}

pub fn cpm_report(volume: &CpmVolume) -> Result<CpmStats> {
    let files = volume.list_cpm_files()?;
    Ok(CpmStats {
        type_name: "Victor 9000 CP/M",
        filesystem: "CP/M",
        readonly: volume.device().is_read_only(),
        file_count: files.len(),
        total_file_size: files.iter().map(|f| f.file_size as u64).sum(),
    })
}

pub fn harddisk_report(disk: &HardDisk) -> Result<HardDiskStats> {
    let mut partitions = Vec::with_capacity(disk.partition_count());
    let mut total_capacity = 0;
    for idx in 0..disk.partition_count() {
        let stats = fat12_report(disk.partition(idx as isize)?)?;
        total_capacity += stats.total_bytes;
        partitions.push(stats);
    }
    Ok(HardDiskStats {
        type_name: "Victor 9000 Hard Disk",
        filesystem: "FAT12",
        readonly: disk.is_read_only(),
        partition_count: disk.partition_count(),
        total_capacity,
        partitions,
    })
}

pub fn partition_summaries(disk: &HardDisk) -> Vec<PartitionSummary> {
    disk.volume_labels()
        .iter()
        .enumerate()
        .map(|(index, vvl)| PartitionSummary {
            index,
            name: vvl.volume_name.clone(),
            capacity: vvl.volume_capacity,
            capacity_bytes: vvl.volume_capacity as u64 * SECTOR_SIZE as u64,
            cluster_size: if vvl.allocation_unit != 0 {
                vvl.allocation_unit as usize * SECTOR_SIZE
            } else {
                crate::HD_SECTORS_PER_CLUSTER * SECTOR_SIZE
            },
            assignments: vvl.assignments.clone(),
        })
        .collect()
}

/// Human readable size, binary units.
pub fn format_size(size_bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;
    if size_bytes < KB {
        format!("{size_bytes} B")
    } else if size_bytes < MB {
        format!("{:.1} KB", size_bytes as f64 / KB as f64)
    } else if size_bytes < GB {
        format!("{:.1} MB", size_bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", size_bytes as f64 / GB as f64)
    }
}
