//! CP/M engine tests against a synthetic Victor CP/M-86 floppy.
//!
//! A freshly formatted CP/M disk fills the directory with 0xE5; the
//! fixture fills the whole image so sector 0 also carries a CP/M-looking
//! first byte for the sniffer.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use v9disk::cpm::CpmVolume;
use v9disk::device::{BlockDevice, FileDevice};
use v9disk::error::DiskError;
use v9disk::{CPM_BLOCK_SIZE, CPM_RECORD_SIZE, CPM_RECORDS_PER_EXTENT, SECTOR_SIZE};

/// ~600 KB image, 0xE5 filled.
fn blank_cpm_image(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, vec![0xE5u8; 1224 * SECTOR_SIZE]).unwrap();
    path
}

fn open_rw(path: &PathBuf) -> CpmVolume {
    let device = Arc::new(FileDevice::open(path, false).unwrap());
    CpmVolume::open(device).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 11 + 3) as u8).collect()
}

#[test]
fn directory_detected_at_sector_76() {
    let dir = TempDir::new().unwrap();
    let path = blank_cpm_image(&dir, "blank.img");
    let volume = open_rw(&path);
    assert_eq!(volume.dir_start_sector(), 76);
    assert!(volume.list_cpm_files().unwrap().is_empty());
}

#[test]
fn round_trip_across_extent_and_block_boundaries() {
    let dir = TempDir::new().unwrap();

    for size in [0usize, 1, 2047, 2048, 2049, 20000] {
        let path = blank_cpm_image(&dir, &format!("rt{size}.img"));
        let volume = open_rw(&path);

        let data = pattern(size);
        volume.write_cpm_file("TEST.BIN", &data, 0).unwrap();

        let files = volume.list_cpm_files().unwrap();
        assert_eq!(files.len(), 1, "size {size}");
        let file = &files[0];
        assert_eq!(file.user, 0);
        assert_eq!(file.full_name(), "TEST.BIN");
        assert_eq!(file.file_size, size.div_ceil(CPM_RECORD_SIZE) * CPM_RECORD_SIZE);

        let records = size.div_ceil(CPM_RECORD_SIZE);
        let expected_extents = records.div_ceil(CPM_RECORDS_PER_EXTENT).max(1);
        assert_eq!(file.extents.len(), expected_extents, "size {size}");

        let last = file.extents.last().unwrap();
        let expected_last_records = if records == 0 {
            0
        } else {
            records - (expected_extents - 1) * CPM_RECORDS_PER_EXTENT
        };
        assert_eq!(last.record_count as usize, expected_last_records, "size {size}");

        let read = volume.read_cpm_file("TEST.BIN").unwrap();
        assert_eq!(&read[..size], &data[..], "size {size}");
        assert_eq!(read.len(), file.file_size);
        // Padding past the payload is the CP/M end-of-file filler.
        assert!(read[size..].iter().all(|&b| b == 0x1A));
    }
}

#[test]
fn twenty_kilobyte_file_spans_two_extents() {
    let dir = TempDir::new().unwrap();
    let path = blank_cpm_image(&dir, "extents.img");
    let volume = open_rw(&path);

    let data = pattern(20000);
    volume.write_cpm_file("BIG.DAT", &data, 0).unwrap();

    let file = volume.find_file("BIG.DAT", Some(0)).unwrap().unwrap();
    assert_eq!(file.extents.len(), 2);
    assert_eq!(file.extents[0].extent(), 0);
    assert_eq!(file.extents[0].record_count as usize, CPM_RECORDS_PER_EXTENT);
    assert_eq!(file.extents[0].blocks.len(), 8);
    assert_eq!(file.extents[1].extent(), 1);
    assert_eq!(file.extents[1].record_count, 29);
    assert_eq!(file.extents[1].blocks.len(), 2);
}

#[test]
fn delete_stamps_every_extent_and_frees_blocks() {
    let dir = TempDir::new().unwrap();
    let path = blank_cpm_image(&dir, "delete.img");
    let volume = open_rw(&path);

    volume.write_cpm_file("DOOMED.BIN", &pattern(20000), 0).unwrap();
    let blocks_used: Vec<u16> = volume
        .find_file("DOOMED.BIN", None)
        .unwrap()
        .unwrap()
        .extents
        .iter()
        .flat_map(|e| e.blocks.clone())
        .collect();
    assert_eq!(blocks_used.len(), 10);

    volume.delete_cpm_file("DOOMED.BIN").unwrap();
    assert!(volume.find_file("DOOMED.BIN", None).unwrap().is_none());
    assert!(volume.list_cpm_files().unwrap().is_empty());

    // Blocks are free again purely because no live extent names them:
    // the next file starts allocating from block 0.
    volume.write_cpm_file("NEXT.BIN", &pattern(100), 0).unwrap();
    let next = volume.find_file("NEXT.BIN", None).unwrap().unwrap();
    assert_eq!(next.extents[0].blocks, vec![0]);
}

#[test]
fn overwrite_replaces_the_directory_entry() {
    let dir = TempDir::new().unwrap();
    let path = blank_cpm_image(&dir, "replace.img");
    let volume = open_rw(&path);

    volume.write_cpm_file("FILE.TXT", &pattern(5000), 0).unwrap();
    volume.write_cpm_file("FILE.TXT", &pattern(100), 0).unwrap();

    let files = volume.list_cpm_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_size, 128);
    assert_eq!(&volume.read_cpm_file("FILE.TXT").unwrap()[..100], &pattern(100)[..]);
}

#[test]
fn data_lands_in_the_data_area() {
    let dir = TempDir::new().unwrap();
    let path = blank_cpm_image(&dir, "layout.img");
    let volume = open_rw(&path);

    let data = pattern(CPM_BLOCK_SIZE);
    volume.write_cpm_file("AT0.BIN", &data, 0).unwrap();

    // Block 0 begins at sector 112.
    let device = FileDevice::open(&path, true).unwrap();
    let first = device.read_sector(112).unwrap();
    assert_eq!(&first[..], &data[..SECTOR_SIZE]);
}

#[test]
fn writes_on_read_only_device_fail() {
    let dir = TempDir::new().unwrap();
    let path = blank_cpm_image(&dir, "ro.img");
    let device = Arc::new(FileDevice::open(&path, true).unwrap());
    let volume = CpmVolume::open(device).unwrap();

    assert!(matches!(
        volume.write_cpm_file("X.TXT", b"x", 0),
        Err(DiskError::ReadOnly)
    ));
}
