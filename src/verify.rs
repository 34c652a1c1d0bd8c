//! Advisory disk verification.
//!
//! Verification never repairs anything and never prevents a disk from
//! being opened; it walks the FAT and the directory tree and reports what
//! it finds: cross-linked clusters (reachable from more than one entry),
//! lost chains (allocated but unreachable), bad-cluster counts, and
//! structural oddities like size/chain mismatches.

use std::collections::HashMap;

use serde::Serialize;

use crate::cpm::CpmVolume;
use crate::entry::DirEntry;
use crate::error::Result;
use crate::harddisk::HardDisk;
use crate::volume::{DirHandle, Fat12Volume};
use crate::{FAT_BAD, FAT_EOF_MIN, FAT_FREE};

#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    pub files_checked: usize,
    pub directories_checked: usize,
    pub clusters_in_use: usize,
    pub lost_clusters: usize,
    pub bad_clusters: usize,
    pub cross_linked_clusters: Vec<u16>,
}

impl VerifyReport {
    fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn add_info(&mut self, message: impl Into<String>) {
        self.info.push(message.into());
    }

    fn absorb(&mut self, other: VerifyReport, prefix: &str, verbose: bool) {
        for error in other.errors {
            self.add_error(format!("{prefix}{error}"));
        }
        for warning in other.warnings {
            self.add_warning(format!("{prefix}{warning}"));
        }
        if verbose {
            for info in other.info {
                self.add_info(format!("  {info}"));
            }
        }
        self.files_checked += other.files_checked;
        self.directories_checked += other.directories_checked;
        self.clusters_in_use += other.clusters_in_use;
        self.lost_clusters += other.lost_clusters;
        self.bad_clusters += other.bad_clusters;
        self.cross_linked_clusters.extend(other.cross_linked_clusters);
    }
}

/// Verify a FAT12 volume or partition.
pub fn verify_fat12(volume: &Fat12Volume, verbose: bool) -> Result<VerifyReport> {
    let mut report = VerifyReport::new();
    let mut usage: HashMap<u16, Vec<String>> = HashMap::new();

    report.add_info("Checking FAT structure...");
    check_reserved_entries(volume, &mut report);

    report.add_info("Checking directory structure...");
    check_directory(volume, DirHandle::Root, "", &mut usage, &mut report);

    for (&cluster, owners) in &usage {
        if owners.len() > 1 {
            report.add_error(format!(
                "Cross-linked cluster {cluster}: used by {}",
                owners.join(", ")
            ));
            report.cross_linked_clusters.push(cluster);
        }
    }
    report.cross_linked_clusters.sort_unstable();

    report.add_info("Checking for lost clusters...");
    find_lost_clusters(volume, &usage, &mut report);

    report.bad_clusters = volume.fat().bad_cluster_count();
    if report.bad_clusters > 0 {
        report.add_warning(format!(
            "Found {} bad cluster(s) marked in FAT",
            report.bad_clusters
        ));
    }

    report.clusters_in_use = usage.len();
    if verbose {
        report.add_info(format!("Files checked: {}", report.files_checked));
        report.add_info(format!(
            "Directories checked: {}",
            report.directories_checked
        ));
        report.add_info(format!("Clusters in use: {}", report.clusters_in_use));
        if report.lost_clusters > 0 {
            report.add_info(format!("Lost clusters: {}", report.lost_clusters));
        }
    }
    Ok(report)
}

/// Entry 0 carries the media descriptor, entry 1 an end-of-chain fill.
fn check_reserved_entries(volume: &Fat12Volume, report: &mut VerifyReport) {
    let entry0 = volume.fat().get(0);
    let entry1 = volume.fat().get(1);
    if entry0 < 0xF00 {
        report.add_warning(format!("FAT entry 0 has unusual value: 0x{entry0:03X}"));
    }
    if entry1 < FAT_EOF_MIN {
        report.add_warning(format!("FAT entry 1 has unusual value: 0x{entry1:03X}"));
    }
}

fn check_directory(
    volume: &Fat12Volume,
    dir: DirHandle,
    path: &str,
    usage: &mut HashMap<u16, Vec<String>>,
    report: &mut VerifyReport,
) {
    let entries = match volume.read_directory(dir) {
        Ok(entries) => entries,
        Err(e) => {
            let shown = if path.is_empty() { "root" } else { path };
            report.add_error(format!("Cannot read directory {shown}: {e}"));
            return;
        }
    };
    report.directories_checked += 1;

    for entry in entries {
        if entry.is_dot_entry() {
            continue;
        }
        let entry_path = if path.is_empty() {
            entry.full_name()
        } else {
            format!("{path}\\{}", entry.full_name())
        };

        if entry.is_directory() {
            check_subdirectory(volume, &entry, &entry_path, usage, report);
        } else {
            check_file(volume, &entry, &entry_path, usage, report);
        }
    }
}

fn check_subdirectory(
    volume: &Fat12Volume,
    entry: &DirEntry,
    path: &str,
    usage: &mut HashMap<u16, Vec<String>>,
    report: &mut VerifyReport,
) {
    if entry.first_cluster < 2 {
        report.add_error(format!(
            "Directory {path} has invalid first cluster: {}",
            entry.first_cluster
        ));
        return;
    }
    if usage.contains_key(&entry.first_cluster) {
        report.add_error(format!(
            "Circular reference: directory {path} points to already-used cluster {}",
            entry.first_cluster
        ));
        return;
    }

    match volume.fat().follow_chain(entry.first_cluster) {
        Ok(chain) => {
            for c in chain {
                usage.entry(c).or_default().push(path.to_string());
            }
        }
        Err(e) => {
            report.add_error(format!("Invalid cluster chain for directory {path}: {e}"));
            return;
        }
    }

    check_directory(
        volume,
        DirHandle::Sub(entry.first_cluster),
        path,
        usage,
        report,
    );
}

fn check_file(
    volume: &Fat12Volume,
    entry: &DirEntry,
    path: &str,
    usage: &mut HashMap<u16, Vec<String>>,
    report: &mut VerifyReport,
) {
    report.files_checked += 1;

    if entry.file_size == 0 {
        if entry.first_cluster != 0 {
            report.add_warning(format!(
                "Empty file {path} has non-zero first cluster: {}",
                entry.first_cluster
            ));
        }
        return;
    }
    if entry.first_cluster < 2 {
        report.add_error(format!(
            "File {path} has invalid first cluster: {}",
            entry.first_cluster
        ));
        return;
    }

    match volume.fat().follow_chain(entry.first_cluster) {
        Ok(chain) => {
            let cluster_size = volume.geometry().cluster_size;
            let expected = (entry.file_size as usize + cluster_size - 1) / cluster_size;
            if chain.len() != expected {
                report.add_warning(format!(
                    "File {path}: size {} bytes suggests {expected} clusters, but chain has {} clusters",
                    entry.file_size,
                    chain.len()
                ));
            }
            for c in chain {
                usage.entry(c).or_default().push(path.to_string());
            }
        }
        Err(e) => {
            report.add_error(format!("Invalid cluster chain for file {path}: {e}"));
        }
    }
}

/// Allocated clusters not reachable from any directory entry.
fn find_lost_clusters(
    volume: &Fat12Volume,
    usage: &HashMap<u16, Vec<String>>,
    report: &mut VerifyReport,
) {
    let mut visited: std::collections::HashSet<u16> = usage.keys().copied().collect();
    let mut lost_chains: Vec<(u16, usize)> = Vec::new();

    for cluster in 2..(volume.fat().total_clusters() + 2) as u16 {
        if visited.contains(&cluster) {
            continue;
        }
        let entry = volume.fat().get(cluster);
        if entry == FAT_FREE || entry == FAT_BAD {
            continue;
        }

        match volume.fat().follow_chain(cluster) {
            Ok(chain) => {
                let mut fresh = 0;
                for c in &chain {
                    if visited.insert(*c) {
                        fresh += 1;
                    }
                }
                report.lost_clusters += fresh;
                if !chain.is_empty() {
                    lost_chains.push((cluster, chain.len()));
                }
            }
            Err(_) => {
                report.lost_clusters += 1;
                visited.insert(cluster);
            }
        }
    }

    if !lost_chains.is_empty() {
        report.add_warning(format!(
            "Found {} lost cluster chain(s) totaling {} clusters",
            lost_chains.len(),
            report.lost_clusters
        ));
        for (start, length) in lost_chains.iter().take(5) {
            report.add_warning(format!(
                "  Lost chain starting at cluster {start}, length {length}"
            ));
        }
        if lost_chains.len() > 5 {
            report.add_warning(format!("  ... and {} more", lost_chains.len() - 5));
        }
    }
}

/// Verify every partition of a hard disk and merge the reports.
pub fn verify_harddisk(disk: &HardDisk, verbose: bool) -> Result<VerifyReport> {
    let mut report = VerifyReport::new();
    report.add_info(format!(
        "Checking hard disk with {} partition(s)...",
        disk.partition_count()
    ));

    for idx in 0..disk.partition_count() {
        let partition = disk.partition(idx as isize)?;
        let name = disk.volume_labels()[idx].volume_name.clone();
        report.add_info(format!("Checking partition {idx}: {name}"));
        let part_report = verify_fat12(partition, verbose)?;
        report.absorb(part_report, &format!("Partition {idx}: "), verbose);
    }
    Ok(report)
}

/// CP/M verification: directory readability and duplicate detection.
pub fn verify_cpm(volume: &CpmVolume, verbose: bool) -> Result<VerifyReport> {
    let mut report = VerifyReport::new();
    report.add_info("Checking CP/M disk structure...");

    match volume.list_cpm_files() {
        Ok(files) => {
            report.files_checked = files.len();
            let mut seen = std::collections::HashSet::new();
            for f in &files {
                let key = format!("{}:{}", f.user, f.full_name());
                if !seen.insert(key.clone()) {
                    report.add_warning(format!("Duplicate file entry: {key}"));
                }
            }
            if verbose {
                report.add_info(format!("Files checked: {}", report.files_checked));
            }
        }
        Err(e) => report.add_error(format!("Error reading CP/M directory: {e}")),
    }
    Ok(report)
}
