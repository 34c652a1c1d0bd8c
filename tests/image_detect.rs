//! Image sniffer and path syntax, end to end.

use std::fs;

use tempfile::TempDir;

use v9disk::creator::{create_image, CreateFormat};
use v9disk::device::FileDevice;
use v9disk::floppy::open_ibm_floppy;
use v9disk::image::{detect_image_type, parse_image_path, ImageKind};
use v9disk::volume::DirHandle;
use v9disk::SECTOR_SIZE;

#[test]
fn blank_ibm_image_is_classified_ibmpc() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dos.img");
    create_image(&path, CreateFormat::Ibm1440K, None, false).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 2880 * 512);
    assert_eq!(detect_image_type(&path).unwrap(), ImageKind::IbmFloppy);

    // The created BPB opens cleanly with the documented 1.44M layout.
    let device = std::sync::Arc::new(FileDevice::open(&path, true).unwrap());
    let volume = open_ibm_floppy(device).unwrap();
    let geo = *volume.geometry();
    assert_eq!(geo.fat_start, 1);
    assert_eq!(geo.fat_sectors, 9);
    assert_eq!(geo.dir_start, 19);
    assert_eq!(geo.data_start, 33);
    assert!(volume.read_directory(DirHandle::Root).unwrap().is_empty());
}

#[test]
fn victor_double_sided_flag_is_classified_victor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("victor.img");
    create_image(&path, CreateFormat::VictorDoubleSided, None, false).unwrap();

    let device = FileDevice::open(&path, true).unwrap();
    let boot = v9disk::device::BlockDevice::read_sector(&device, 0).unwrap();
    assert_eq!(boot[32] & 0x01, 0x01);

    // Both FAT copies carry the media descriptor and end-of-chain fill.
    for fat_start in [1usize, 3] {
        let fat = v9disk::device::BlockDevice::read_sector(&device, fat_start).unwrap();
        assert_eq!(&fat[..3], &[0xF8, 0xFF, 0xFF]);
    }

    assert_eq!(detect_image_type(&path).unwrap(), ImageKind::VictorFloppy);
}

#[test]
fn large_images_are_hard_disks_by_size_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.img");
    fs::write(&path, vec![0u8; 20 * 1024 * 1024]).unwrap();
    assert_eq!(detect_image_type(&path).unwrap(), ImageKind::VictorHardDisk);
}

#[test]
fn cpm_directory_at_sector_76_is_classified_cpm() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cpm.img");
    // Blank CP/M media: 0xE5 fill, ~600 KB.
    fs::write(&path, vec![0xE5u8; 1200 * SECTOR_SIZE]).unwrap();
    assert_eq!(detect_image_type(&path).unwrap(), ImageKind::Cpm);
}

#[test]
fn small_unmarked_images_default_to_victor_floppy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.img");
    fs::write(&path, vec![0xABu8; 700 * SECTOR_SIZE]).unwrap();
    assert_eq!(detect_image_type(&path).unwrap(), ImageKind::VictorFloppy);
}

#[test]
fn image_path_round_trips_the_documented_examples() {
    let parsed = parse_image_path("vichd.img:0:\\DIR\\FILE.TXT").unwrap();
    assert_eq!(
        (parsed.image.as_str(), parsed.partition, parsed.internal.as_deref()),
        ("vichd.img", Some(0), Some("DIR\\FILE.TXT"))
    );

    let parsed = parse_image_path("disk.img:\\FILE.TXT").unwrap();
    assert_eq!(
        (parsed.image.as_str(), parsed.partition, parsed.internal.as_deref()),
        ("disk.img", None, Some("FILE.TXT"))
    );

    let parsed = parse_image_path("hd.img:1:\\DIR\\F.TXT").unwrap();
    assert_eq!(parsed.partition, Some(1));
    assert_eq!(parsed.internal.as_deref(), Some("DIR\\F.TXT"));

    assert!(parse_image_path("not-an-image.txt").is_none());
}
