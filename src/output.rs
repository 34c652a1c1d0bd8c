//! Text and JSON output rendering.
//!
//! In JSON mode every command emits exactly one single-line object with
//! at least `status` and `message`; errors go to stdout the same way so
//! scripted callers always get parseable output. In text mode errors go
//! to stderr.

use serde::Serialize;
use serde_json::{json, Value};

use crate::entry::FileRecord;
use crate::info::{format_size, CpmStats, Fat12Stats, HardDiskStats, PartitionSummary};
use crate::verify::VerifyReport;

pub struct Formatter {
    json: bool,
}

impl Formatter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn success(&self, message: &str) {
        self.success_with(message, json!({}));
    }

    /// Success line with extra JSON fields merged in.
    pub fn success_with(&self, message: &str, extra: Value) {
        if self.json {
            let mut output = json!({ "status": "success", "message": message });
            merge(&mut output, extra);
            println!("{output}");
        } else {
            println!("{message}");
        }
    }

    pub fn error(&self, message: &str) {
        if self.json {
            println!("{}", json!({ "status": "error", "message": message }));
        } else {
            eprintln!("Error: {message}");
        }
    }

    /// Directory listing for FAT volumes.
    pub fn list_files(&self, records: &[FileRecord], path: &str) {
        if self.json {
            let files: Vec<&FileRecord> = records
                .iter()
                .filter(|r| !r.name.starts_with('.'))
                .collect();
            println!(
                "{}",
                json!({ "status": "success", "path": display_path(path), "files": files })
            );
            return;
        }

        println!("Directory of {}", display_path(path));
        println!();
        let mut total_files = 0;
        let mut total_bytes = 0u64;
        for record in records {
            if record.name.starts_with('.') {
                continue;
            }
            let size_str = if record.is_directory {
                "<DIR>".to_string()
            } else {
                total_bytes += record.size;
                record.size.to_string()
            };
            total_files += 1;
            println!("  {:<12}  {:>10}  {}", record.name, size_str, record.attr);
        }
        println!();
        println!("  {total_files} file(s)  {total_bytes} bytes");
    }

    /// CP/M listing carries a user column.
    pub fn list_cpm_files(&self, records: &[FileRecord], path: &str) {
        if self.json {
            println!(
                "{}",
                json!({ "status": "success", "path": display_path(path), "files": records })
            );
            return;
        }

        println!("Directory of {}", display_path(path));
        println!();
        println!("  {:>4}  {:<12}  {:>10}  Attr", "User", "Name", "Size");
        let mut total_bytes = 0u64;
        for record in records {
            println!(
                "  {:>4}  {:<12}  {:>10}  {}",
                record.user.unwrap_or(0),
                record.name,
                record.size,
                record.attr
            );
            total_bytes += record.size;
        }
        println!();
        println!("  {} file(s)  {total_bytes} bytes", records.len());
    }

    /// Matched (path, record) rows from a recursive find.
    pub fn list_matches(&self, matches: &[(String, FileRecord)], path: &str) {
        if self.json {
            let files: Vec<Value> = matches
                .iter()
                .map(|(rel, r)| {
                    let mut v = serde_json::to_value(r).unwrap_or_default();
                    merge(&mut v, json!({ "path": rel }));
                    v
                })
                .collect();
            println!(
                "{}",
                json!({ "status": "success", "path": display_path(path), "files": files })
            );
            return;
        }

        println!("Directory of {}", display_path(path));
        println!();
        let mut total_files = 0;
        let mut total_bytes = 0u64;
        for (rel, record) in matches {
            let size_str = if record.is_directory {
                "<DIR>".to_string()
            } else {
                total_files += 1;
                total_bytes += record.size;
                record.size.to_string()
            };
            println!("  {rel:<32}  {size_str:>10}  {}", record.attr);
        }
        println!();
        println!("  {total_files} file(s)  {total_bytes} bytes");
    }

    pub fn list_partitions(&self, partitions: &[PartitionSummary], image: &str) {
        if self.json {
            println!(
                "{}",
                json!({ "status": "success", "image": image, "partitions": partitions })
            );
            return;
        }

        println!("Partitions in {image}:");
        println!();
        for p in partitions {
            let name = if p.name.is_empty() {
                format!("Volume {}", p.index)
            } else {
                p.name.clone()
            };
            println!(
                "  {}: {:<16} {:>8}",
                p.index,
                name,
                format_size(p.capacity_bytes)
            );
            let mut hd_index = 0u8;
            for a in &p.assignments {
                if a.device_unit >> 8 == 0xFF {
                    let unit = (a.device_unit & 0xFF) as u8;
                    let letter = if unit < 26 {
                        format!("{}:", (b'A' + unit) as char)
                    } else {
                        format!("Floppy{unit}")
                    };
                    println!("       {letter} -> Volume {}", a.volume_index);
                } else {
                    println!(
                        "       {}: -> Volume {}",
                        (b'C' + hd_index) as char,
                        a.volume_index
                    );
                    hd_index += 1;
                }
            }
        }
        println!();
        println!("  {} partition(s)", partitions.len());
    }

    pub fn fat12_info(&self, stats: &Fat12Stats, verbose: bool) {
        if self.json {
            self.success_with("Disk information", to_value(stats));
            return;
        }
        println!("Disk Type: {}", stats.type_name);
        if let Some(name) = &stats.name {
            if !name.is_empty() {
                println!("Volume Name: {name}");
            }
        }
        println!("Filesystem: {}", stats.filesystem);
        println!(
            "Mode: {}",
            if stats.readonly { "Read-only" } else { "Read-write" }
        );
        println!("Capacity: {}", format_size(stats.total_bytes));
        println!(
            "Used: {} ({:.1}%)",
            format_size(stats.used_bytes),
            stats.percent_used
        );
        println!("Free: {}", format_size(stats.free_bytes));
        println!("Files: {}", stats.file_count);
        println!("Directories: {}", stats.directory_count);

        if verbose {
            println!();
            println!("Technical Details:");
            println!("  Cluster size: {} bytes", stats.cluster_size);
            println!("  Sectors per cluster: {}", stats.sectors_per_cluster);
            println!("  Total clusters: {}", stats.total_clusters);
            println!("  Free clusters: {}", stats.free_clusters);
            println!(
                "  FAT sectors: {} x {} copies",
                stats.fat_sectors, stats.fat_copies
            );
            println!("  Root directory sectors: {}", stats.root_dir_sectors);
            println!("  Data start sector: {}", stats.data_start_sector);
            if stats.bad_clusters > 0 {
                println!("  Bad clusters: {}", stats.bad_clusters);
            }
        }
    }

    pub fn cpm_info(&self, stats: &CpmStats) {
        if self.json {
            self.success_with("Disk information", to_value(stats));
            return;
        }
        println!("Disk Type: {}", stats.type_name);
        println!("Filesystem: {}", stats.filesystem);
        println!(
            "Mode: {}",
            if stats.readonly { "Read-only" } else { "Read-write" }
        );
        println!("Files: {}", stats.file_count);
        println!("Total file size: {}", format_size(stats.total_file_size));
    }

    pub fn harddisk_info(&self, stats: &HardDiskStats) {
        if self.json {
            self.success_with("Disk information", to_value(stats));
            return;
        }
        println!("Disk Type: {}", stats.type_name);
        println!("Filesystem: {}", stats.filesystem);
        println!(
            "Mode: {}",
            if stats.readonly { "Read-only" } else { "Read-write" }
        );
        println!("Partitions: {}", stats.partition_count);
        println!("Total Capacity: {}", format_size(stats.total_capacity));
        println!();
        for (idx, part) in stats.partitions.iter().enumerate() {
            match &part.name {
                Some(name) if !name.is_empty() => println!("  Partition {idx}: {name}"),
                _ => println!("  Partition {idx}:"),
            }
            println!("    Capacity: {}", format_size(part.total_bytes));
            println!(
                "    Free: {} ({:.1}%)",
                format_size(part.free_bytes),
                100.0 - part.percent_used
            );
            println!(
                "    Files: {}, Directories: {}",
                part.file_count, part.directory_count
            );
        }
    }

    pub fn verify_report(&self, report: &VerifyReport) {
        if self.json {
            self.success_with("Verification complete", to_value(report));
            return;
        }

        if report.is_valid {
            println!("Disk verification: PASSED");
        } else {
            println!("Disk verification: FAILED");
        }
        println!();

        if !report.errors.is_empty() {
            println!("Errors ({}):", report.errors.len());
            for error in &report.errors {
                println!("  ERROR: {error}");
            }
            println!();
        }
        if !report.warnings.is_empty() {
            println!("Warnings ({}):", report.warnings.len());
            for warning in &report.warnings {
                println!("  WARNING: {warning}");
            }
            println!();
        }

        println!("Summary:");
        println!("  Files checked: {}", report.files_checked);
        println!("  Directories checked: {}", report.directories_checked);
        println!("  Clusters in use: {}", report.clusters_in_use);
        if report.lost_clusters > 0 {
            println!("  Lost clusters: {}", report.lost_clusters);
        }
        if report.bad_clusters > 0 {
            println!("  Bad clusters: {}", report.bad_clusters);
        }
        if !report.cross_linked_clusters.is_empty() {
            println!(
                "  Cross-linked clusters: {}",
                report.cross_linked_clusters.len()
            );
        }
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "\\".to_string()
    } else {
        path.to_string()
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}

fn merge(base: &mut Value, extra: Value) {
    if let (Value::Object(base_map), Value::Object(extra_map)) = (base, extra) {
        for (k, v) in extra_map {
            base_map.insert(k, v);
        }
    }
}
