//! End-to-end tests against freshly formatted Victor floppy images.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use v9disk::creator::{create_image, CreateFormat};
use v9disk::device::{BlockDevice, FileDevice};
use v9disk::error::DiskError;
use v9disk::floppy::open_victor_floppy;
use v9disk::volume::{DirHandle, Fat12Volume};
use v9disk::{
    ATTR_DIRECTORY, ATTR_HIDDEN, ATTR_READ_ONLY, CLUSTER_SIZE, DIR_ENTRY_DELETED, FAT_EOF_MAX,
    FAT_EOF_MIN, FAT_FREE,
};

fn blank_image(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    create_image(&path, CreateFormat::VictorDoubleSided, None, false).unwrap();
    path
}

fn open_rw(path: &PathBuf) -> Fat12Volume {
    let device = Arc::new(FileDevice::open(path, false).unwrap());
    open_victor_floppy(device).unwrap()
}

fn open_ro(path: &PathBuf) -> Fat12Volume {
    let device = Arc::new(FileDevice::open(path, true).unwrap());
    open_victor_floppy(device).unwrap()
}

fn p(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 13) as u8).collect()
}

#[test]
fn write_read_identity_across_cluster_boundaries() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "identity.img");

    for size in [0, 1, CLUSTER_SIZE - 1, CLUSTER_SIZE, CLUSTER_SIZE + 1, 5 * CLUSTER_SIZE + 3] {
        let data = pattern(size);
        {
            let mut volume = open_rw(&path);
            volume.write_file(&p(&["TEST.TXT"]), &data).unwrap();
        }
        // Reopen read-only and compare byte for byte.
        let volume = open_ro(&path);
        assert_eq!(volume.read_file(&p(&["TEST.TXT"])).unwrap(), data, "size {size}");
    }
}

#[test]
fn write_then_reopen_reads_same_content() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "reopen.img");

    {
        let mut volume = open_rw(&path);
        volume
            .write_file(&p(&["TEST.TXT"]), b"Test content")
            .unwrap();
    }

    let volume = open_ro(&path);
    let data = volume.read_file(&p(&["TEST.TXT"])).unwrap();
    assert_eq!(data, b"Test content");
    assert_eq!(data.len(), 12);
}

#[test]
fn overwrite_leaves_free_count_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "overwrite.img");
    let mut volume = open_rw(&path);

    let data = pattern(3 * CLUSTER_SIZE + 17);
    volume.write_file(&p(&["DATA.BIN"]), &data).unwrap();
    let free_after_first = volume.fat().free_cluster_count();

    volume.write_file(&p(&["DATA.BIN"]), &data).unwrap();
    assert_eq!(volume.fat().free_cluster_count(), free_after_first);

    // Still exactly one directory entry.
    let entries = volume.read_directory(DirHandle::Root).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_size as usize, data.len());
}

#[test]
fn delete_frees_chain_and_marks_slot() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "delete.img");
    let mut volume = open_rw(&path);

    volume
        .write_file(&p(&["CONFIG.SYS"]), &pattern(2 * CLUSTER_SIZE))
        .unwrap();
    let entry = volume.find_entry(&p(&["CONFIG.SYS"])).unwrap();
    let chain = volume.fat().follow_chain(entry.first_cluster).unwrap();
    assert_eq!(chain.len(), 2);

    volume.delete_file(&p(&["CONFIG.SYS"])).unwrap();

    for cluster in &chain {
        assert_eq!(volume.fat().get(*cluster), FAT_FREE);
    }
    assert!(volume
        .read_directory(DirHandle::Root)
        .unwrap()
        .iter()
        .all(|e| e.full_name() != "CONFIG.SYS"));

    // The slot itself is stamped deleted, not zeroed.
    let dir_sector = volume.read_sector(volume.geometry().dir_start).unwrap();
    assert_eq!(dir_sector[0], DIR_ENTRY_DELETED);

    assert!(matches!(
        volume.read_file(&p(&["CONFIG.SYS"])),
        Err(DiskError::NotFound(_))
    ));
}

#[test]
fn file_of_cluster_size_plus_one_links_two_clusters() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "twoclusters.img");
    let mut volume = open_rw(&path);

    let data = pattern(CLUSTER_SIZE + 1);
    volume.write_file(&p(&["BIG.BIN"]), &data).unwrap();

    let entry = volume.find_entry(&p(&["BIG.BIN"])).unwrap();
    let chain = volume.fat().follow_chain(entry.first_cluster).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(volume.fat().get(chain[0]), chain[1]);
    let terminator = volume.fat().get(chain[1]);
    assert!((FAT_EOF_MIN..=FAT_EOF_MAX).contains(&terminator));

    assert_eq!(volume.read_file(&p(&["BIG.BIN"])).unwrap(), data);
}

#[test]
fn empty_file_has_no_clusters() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "empty.img");
    let mut volume = open_rw(&path);

    let free_before = volume.fat().free_cluster_count();
    volume.write_file(&p(&["EMPTY.TXT"]), b"").unwrap();
    assert_eq!(volume.fat().free_cluster_count(), free_before);

    let entry = volume.find_entry(&p(&["EMPTY.TXT"])).unwrap();
    assert_eq!(entry.first_cluster, 0);
    assert_eq!(entry.file_size, 0);
    assert!(volume.read_file(&p(&["EMPTY.TXT"])).unwrap().is_empty());
}

#[test]
fn subdirectory_grows_by_exactly_one_cluster() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "grow.img");
    let mut volume = open_rw(&path);

    volume.create_directory(&p(&["SUB"])).unwrap();
    let sub = volume.find_entry(&p(&["SUB"])).unwrap();
    assert_eq!(
        volume.fat().follow_chain(sub.first_cluster).unwrap().len(),
        1
    );

    // 64 records per cluster; the dot pair plus 62 files fill the first
    // cluster, the 63rd file forces growth.
    for i in 0..70 {
        let name = format!("F{i}.TXT");
        volume.write_file(&p(&["SUB", &name]), b"").unwrap();
    }

    let chain = volume.fat().follow_chain(sub.first_cluster).unwrap();
    assert_eq!(chain.len(), 2);

    // Everything is still reachable.
    let entries = volume.read_directory(DirHandle::Sub(sub.first_cluster)).unwrap();
    let files = entries.iter().filter(|e| !e.is_dot_entry()).count();
    assert_eq!(files, 70);
}

#[test]
fn dot_entries_point_at_self_and_parent() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "dots.img");
    let mut volume = open_rw(&path);

    volume.create_directory(&p(&["OUTER"])).unwrap();
    volume.create_directory(&p(&["OUTER", "INNER"])).unwrap();

    let outer = volume.find_entry(&p(&["OUTER"])).unwrap();
    let inner = volume.find_entry(&p(&["OUTER", "INNER"])).unwrap();

    let outer_entries = volume
        .read_directory(DirHandle::Sub(outer.first_cluster))
        .unwrap();
    assert_eq!(outer_entries[0].full_name(), ".");
    assert_eq!(outer_entries[0].first_cluster, outer.first_cluster);
    assert_eq!(outer_entries[1].full_name(), "..");
    assert_eq!(outer_entries[1].first_cluster, 0, "root parent is cluster 0");

    let inner_entries = volume
        .read_directory(DirHandle::Sub(inner.first_cluster))
        .unwrap();
    assert_eq!(inner_entries[0].first_cluster, inner.first_cluster);
    assert_eq!(inner_entries[1].first_cluster, outer.first_cluster);

    assert!(outer_entries[0].is_directory() && outer_entries[1].is_directory());
}

#[test]
fn recursive_delete_frees_every_cluster() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "rmtree.img");
    let mut volume = open_rw(&path);

    let free_baseline = volume.fat().free_cluster_count();

    volume.create_directory(&p(&["TREE"])).unwrap();
    volume.create_directory(&p(&["TREE", "DEEP"])).unwrap();
    volume
        .write_file(&p(&["TREE", "A.BIN"]), &pattern(1000))
        .unwrap();
    volume
        .write_file(&p(&["TREE", "B.BIN"]), &pattern(3000))
        .unwrap();
    volume
        .write_file(&p(&["TREE", "DEEP", "C.BIN"]), &pattern(5000))
        .unwrap();

    // 2 directory clusters + ceil(1000/2048) + ceil(3000/2048) + ceil(5000/2048).
    assert_eq!(volume.fat().free_cluster_count(), free_baseline - 2 - 1 - 2 - 3);

    let err = volume.delete_directory(&p(&["TREE"]), false).unwrap_err();
    assert!(matches!(err, DiskError::Disk(_)));

    volume.delete_directory(&p(&["TREE"]), true).unwrap();
    assert_eq!(volume.fat().free_cluster_count(), free_baseline);
    assert!(volume.read_directory(DirHandle::Root).unwrap().is_empty());
}

#[test]
fn attribute_changes_never_touch_the_directory_bit() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "attrs.img");
    let mut volume = open_rw(&path);

    volume.create_directory(&p(&["SUB"])).unwrap();
    volume
        .set_attributes(&p(&["SUB"]), ATTR_READ_ONLY | ATTR_HIDDEN)
        .unwrap();
    let attrs = volume.find_entry(&p(&["SUB"])).unwrap().attributes;
    assert_eq!(attrs & ATTR_DIRECTORY, ATTR_DIRECTORY);
    assert_eq!(attrs & ATTR_READ_ONLY, ATTR_READ_ONLY);
    assert_eq!(attrs & ATTR_HIDDEN, ATTR_HIDDEN);

    // Clearing everything still leaves the directory a directory.
    volume.set_attributes(&p(&["SUB"]), 0).unwrap();
    let attrs = volume.find_entry(&p(&["SUB"])).unwrap().attributes;
    assert_eq!(attrs, ATTR_DIRECTORY);
}

#[test]
fn rename_refuses_collisions() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "rename.img");
    let mut volume = open_rw(&path);

    volume.write_file(&p(&["ONE.TXT"]), b"one").unwrap();
    volume.write_file(&p(&["TWO.TXT"]), b"two").unwrap();

    assert!(volume.rename_entry(&p(&["ONE.TXT"]), "TWO.TXT").is_err());

    volume.rename_entry(&p(&["ONE.TXT"]), "THREE.TXT").unwrap();
    assert_eq!(volume.read_file(&p(&["THREE.TXT"])).unwrap(), b"one");
    assert!(matches!(
        volume.read_file(&p(&["ONE.TXT"])),
        Err(DiskError::NotFound(_))
    ));
}

#[test]
fn wildcards_match_per_dos_rules() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "wild.img");
    let mut volume = open_rw(&path);

    volume.write_file(&p(&["ALPHA.COM"]), b"a").unwrap();
    volume.write_file(&p(&["BETA.TXT"]), b"b").unwrap();
    volume.write_file(&p(&["NOEXT"]), b"c").unwrap();

    let names = |pattern: &str| -> Vec<String> {
        volume
            .find_matching_files(&p(&[pattern]), false)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    };

    assert_eq!(names("*").len(), 3);
    assert_eq!(names("*.*").len(), 2, "*.* needs a dot");
    assert_eq!(names("*.COM"), vec!["ALPHA.COM"]);
    assert_eq!(names("?ETA.TXT"), vec!["BETA.TXT"]);
    assert!(names("??.COM").is_empty());
}

#[test]
fn recursive_find_emits_backslash_paths() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "walk.img");
    let mut volume = open_rw(&path);

    volume.create_directory(&p(&["DIR"])).unwrap();
    volume.write_file(&p(&["DIR", "LEAF.TXT"]), b"x").unwrap();
    volume.write_file(&p(&["ROOT.TXT"]), b"y").unwrap();

    let matches = volume.find_matching_files(&p(&["*"]), true).unwrap();
    let paths: Vec<&str> = matches.iter().map(|(p, _)| p.as_str()).collect();
    assert!(paths.contains(&"DIR"));
    assert!(paths.contains(&"DIR\\LEAF.TXT"));
    assert!(paths.contains(&"ROOT.TXT"));
}

#[test]
fn read_only_volume_rejects_writes() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "ro.img");
    {
        let mut volume = open_rw(&path);
        volume.write_file(&p(&["KEEP.TXT"]), b"keep").unwrap();
    }

    let mut volume = open_ro(&path);
    assert!(matches!(
        volume.write_file(&p(&["NEW.TXT"]), b"no"),
        Err(DiskError::ReadOnly)
    ));
    assert!(matches!(
        volume.delete_file(&p(&["KEEP.TXT"])),
        Err(DiskError::ReadOnly)
    ));
    assert_eq!(volume.read_file(&p(&["KEEP.TXT"])).unwrap(), b"keep");
}

#[test]
fn mirrored_fat_copies_stay_identical() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "mirror.img");
    {
        let mut volume = open_rw(&path);
        volume
            .write_file(&p(&["MIRROR.BIN"]), &pattern(3 * CLUSTER_SIZE))
            .unwrap();
    }

    let device = FileDevice::open(&path, true).unwrap();
    // Double-sided geometry: FAT copies at sectors 1-2 and 3-4.
    for i in 0..2 {
        assert_eq!(
            device.read_sector(1 + i).unwrap(),
            device.read_sector(3 + i).unwrap(),
            "FAT copy mismatch in sector {i}"
        );
    }
}

#[test]
fn volume_label_is_reported_but_hidden_from_listings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("labeled.img");
    create_image(&path, CreateFormat::VictorDoubleSided, Some("BOOTDISK"), false).unwrap();

    let mut volume = open_rw(&path);
    assert_eq!(volume.volume_label().unwrap().as_deref(), Some("BOOTDISK"));
    assert!(volume.read_directory(DirHandle::Root).unwrap().is_empty());

    // The label occupies the first slot; files land after it and
    // listings still skip it.
    volume.write_file(&p(&["HELLO.TXT"]), b"hi").unwrap();
    let entries = volume.read_directory(DirHandle::Root).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].full_name(), "HELLO.TXT");
}

#[test]
fn fixed_root_directory_fills_up() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "rootfull.img");
    let mut volume = open_rw(&path);

    // 8 root sectors hold 128 records.
    for i in 0..128 {
        let name = format!("F{i}");
        volume.write_file(&p(&[&name]), b"").unwrap();
    }
    assert!(matches!(
        volume.write_file(&p(&["OVERFLOW"]), b""),
        Err(DiskError::DirectoryFull)
    ));
}

#[test]
fn oversized_write_fails_without_touching_the_fat() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "full.img");
    let mut volume = open_rw(&path);

    let free_before = volume.fat().free_cluster_count();
    let err = volume
        .write_file(&p(&["HUGE.BIN"]), &vec![0u8; 2 * 1024 * 1024])
        .unwrap_err();
    assert!(matches!(err, DiskError::DiskFull { .. }));
    assert_eq!(volume.fat().free_cluster_count(), free_before);
    assert!(volume.read_directory(DirHandle::Root).unwrap().is_empty());
}

#[test]
fn missing_path_components_are_not_found() {
    let dir = TempDir::new().unwrap();
    let path = blank_image(&dir, "missing.img");
    let mut volume = open_rw(&path);
    volume.write_file(&p(&["FILE.TXT"]), b"data").unwrap();

    assert!(matches!(
        volume.read_file(&p(&["NOPE.TXT"])),
        Err(DiskError::NotFound(_))
    ));
    assert!(matches!(
        volume.read_file(&p(&["NOPE", "FILE.TXT"])),
        Err(DiskError::NotFound(_))
    ));
    // A file used as an intermediate component is also NotFound.
    assert!(matches!(
        volume.read_file(&p(&["FILE.TXT", "X.TXT"])),
        Err(DiskError::NotFound(_))
    ));
}
