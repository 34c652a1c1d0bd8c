//! Hard-disk label parsing, FAT auto-sizing and partition operations
//! against a synthetic Victor hard disk image.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use v9disk::device::FileDevice;
use v9disk::error::DiskError;
use v9disk::harddisk::HardDisk;
use v9disk::image::{detect_image_type, ImageKind};
use v9disk::volume::DirHandle;
use v9disk::{ATTR_ARCHIVE, SECTOR_SIZE};

const VOLUME_START: usize = 16;
const VOLUME_CAPACITY: u32 = 8192;
/// 512 clusters at 16 sectors each -> 771 FAT bytes -> 2 sectors.
const FAT_SECTORS: usize = 2;

fn write_at(file: &mut File, sector: usize, data: &[u8]) {
    file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64)).unwrap();
    file.write_all(data).unwrap();
}

/// Lay out a one-partition hard disk: PDL at sector 0, VVL at the volume
/// start, two seeded FAT copies, and a root directory whose first sector
/// holds one live entry (which is what the FAT-size scan keys on).
fn synthetic_harddisk(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    let total_sectors = VOLUME_START + VOLUME_CAPACITY as usize;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    file.write_all(&vec![0u8; total_sectors * SECTOR_SIZE]).unwrap();

    // Physical disk label.
    let mut pdl = vec![0u8; SECTOR_SIZE];
    pdl[0..2].copy_from_slice(&1u16.to_le_bytes());
    pdl[2..4].copy_from_slice(&1u16.to_le_bytes());
    pdl[4..12].copy_from_slice(b"V9KTEST1");
    pdl[20..22].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
    // No media region lists, one virtual volume.
    pdl[52] = 0;
    pdl[53] = 0;
    pdl[54] = 1;
    pdl[55..59].copy_from_slice(&(VOLUME_START as u32).to_le_bytes());
    write_at(&mut file, 0, &pdl);

    // Virtual volume label.
    let mut vvl = vec![0u8; SECTOR_SIZE];
    vvl[0..2].copy_from_slice(&1u16.to_le_bytes());
    vvl[2..8].copy_from_slice(b"SYSTEM");
    vvl[30..34].copy_from_slice(&VOLUME_CAPACITY.to_le_bytes());
    vvl[38..40].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
    vvl[40..42].copy_from_slice(&16u16.to_le_bytes());
    vvl[42..44].copy_from_slice(&312u16.to_le_bytes());
    write_at(&mut file, VOLUME_START, &vvl);

    // Two FAT copies, seeded with the media descriptor.
    let mut fat_head = vec![0u8; SECTOR_SIZE];
    fat_head[0] = 0xF8;
    fat_head[1] = 0xFF;
    fat_head[2] = 0xFF;
    write_at(&mut file, VOLUME_START + 1, &fat_head);
    write_at(&mut file, VOLUME_START + 1 + FAT_SECTORS, &fat_head);

    // First root directory sector with one live file entry; this is the
    // first directory-shaped sector of the volume.
    let mut dir_sector = vec![0u8; SECTOR_SIZE];
    dir_sector[0..8].copy_from_slice(b"COMMAND ");
    dir_sector[8..11].copy_from_slice(b"COM");
    dir_sector[11] = ATTR_ARCHIVE;
    write_at(&mut file, VOLUME_START + 1 + 2 * FAT_SECTORS, &dir_sector);

    file.sync_all().unwrap();
    path
}

fn open_disk(path: &PathBuf, read_only: bool) -> HardDisk {
    let device = Arc::new(FileDevice::open(path, read_only).unwrap());
    HardDisk::open(device).unwrap()
}

#[test]
fn label_and_partition_discovery() {
    let dir = TempDir::new().unwrap();
    let path = synthetic_harddisk(&dir, "hd.img");
    let disk = open_disk(&path, true);

    assert_eq!(disk.partition_count(), 1);
    assert_eq!(disk.label().serial_number, "V9KTEST1");
    assert_eq!(disk.volume_labels()[0].volume_name, "SYSTEM");
    assert_eq!(disk.volume_labels()[0].volume_capacity, VOLUME_CAPACITY);

    let stats = v9disk::info::fat12_report(disk.partition(0).unwrap()).unwrap();
    assert_eq!(stats.name.as_deref(), Some("SYSTEM"));
    assert_eq!(stats.cluster_size, 8192);
}

#[test]
fn fat_size_derived_from_first_directory_shaped_sector() {
    let dir = TempDir::new().unwrap();
    let path = synthetic_harddisk(&dir, "autosize.img");
    let disk = open_disk(&path, true);

    let geo = *disk.partition(0).unwrap().geometry();
    assert_eq!(geo.fat_sectors, FAT_SECTORS);
    assert_eq!(geo.fat_start, VOLUME_START + 1);
    assert_eq!(geo.dir_start, VOLUME_START + 1 + 2 * FAT_SECTORS);
    // 312 entries -> 20 root directory sectors.
    assert_eq!(geo.dir_sectors, 20);
    assert_eq!(geo.data_start, geo.dir_start + 20);
    assert_eq!(geo.sectors_per_cluster, 16);
    assert_eq!(geo.cluster_size, 8192);

    // Every directory entry parses cleanly with that layout.
    let entries = disk
        .partition(0)
        .unwrap()
        .read_directory(DirHandle::Root)
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].full_name(), "COMMAND.COM");
}

#[test]
fn partition_write_and_read_back() {
    let dir = TempDir::new().unwrap();
    let path = synthetic_harddisk(&dir, "rw.img");
    let mut disk = open_disk(&path, false);

    let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
    {
        let partition = disk.partition_mut(0).unwrap();
        partition
            .write_file(&["DATA.BIN".to_string()], &payload)
            .unwrap();
    }
    disk.flush().unwrap();

    let disk = open_disk(&path, true);
    let partition = disk.partition(0).unwrap();
    assert_eq!(
        partition.read_file(&["DATA.BIN".to_string()]).unwrap(),
        payload
    );

    let names: Vec<String> = partition
        .read_directory(DirHandle::Root)
        .unwrap()
        .iter()
        .map(|e| e.full_name())
        .collect();
    assert!(names.contains(&"COMMAND.COM".to_string()));
    assert!(names.contains(&"DATA.BIN".to_string()));
}

#[test]
fn out_of_range_partition_indices_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = synthetic_harddisk(&dir, "range.img");
    let disk = open_disk(&path, true);

    assert!(matches!(
        disk.partition(-1),
        Err(DiskError::InvalidPartition { index: -1, .. })
    ));
    assert!(matches!(
        disk.partition(9999),
        Err(DiskError::InvalidPartition { index: 9999, .. })
    ));
    assert!(disk.partition(0).is_ok());
}

#[test]
fn detected_as_hard_disk_by_label_despite_small_size() {
    let dir = TempDir::new().unwrap();
    // The fixture is ~4.2 MB, over the size threshold; shrink the check
    // to the label path by probing a truncated copy.
    let path = synthetic_harddisk(&dir, "sized.img");
    assert_eq!(detect_image_type(&path).unwrap(), ImageKind::VictorHardDisk);

    let small = dir.path().join("small.img");
    let data = std::fs::read(&path).unwrap();
    std::fs::write(&small, &data[..1024 * 1024]).unwrap();
    assert_eq!(detect_image_type(&small).unwrap(), ImageKind::VictorHardDisk);
}

#[test]
fn invalid_volume_slots_are_skipped_silently() {
    let dir = TempDir::new().unwrap();
    let path = synthetic_harddisk(&dir, "skip.img");

    // Add a second volume address pointing at a label with a bogus type.
    {
        let mut file = OpenOptions::new().write(true).read(true).open(&path).unwrap();
        let mut pdl = vec![0u8; SECTOR_SIZE];
        pdl[0..2].copy_from_slice(&1u16.to_le_bytes());
        pdl[2..4].copy_from_slice(&1u16.to_le_bytes());
        pdl[52] = 0;
        pdl[53] = 0;
        pdl[54] = 2;
        pdl[55..59].copy_from_slice(&(VOLUME_START as u32).to_le_bytes());
        pdl[59..63].copy_from_slice(&8u32.to_le_bytes());
        write_at(&mut file, 0, &pdl);

        let mut bogus = vec![0u8; SECTOR_SIZE];
        bogus[0..2].copy_from_slice(&0x1234u16.to_le_bytes());
        write_at(&mut file, 8, &bogus);
        file.sync_all().unwrap();
    }

    let disk = open_disk(&path, true);
    assert_eq!(disk.partition_count(), 1);
}
