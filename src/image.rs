//! Image dispatch: type sniffing, path syntax, and volume opening.
//!
//! An image reference on the command line has the form
//! `IMAGE[:PARTITION][:\INTERNAL\PATH]` where the image portion ends at a
//! recognised extension (`.img`, `.ima`, `.dsk`), the partition index is
//! decimal, and the internal path may use either slash. Anything without
//! a recognised extension is a host filesystem path.
//!
//! Unknown images are classified in a fixed order: anything over 2 MiB is
//! a hard disk; a valid BPB boot sector means IBM PC; a valid Physical
//! Disk Label means hard disk; a plausible CP/M directory (with a CP/M
//! looking first byte on sector 0) means CP/M; everything else is treated
//! as a Victor floppy.

use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::bpb::BiosParameterBlock;
use crate::chd::{is_chd_file, ChdDevice};
use crate::cpm::{detect_dir_sector, CpmVolume};
use crate::device::{BlockDevice, FileDevice};
use crate::error::Result;
use crate::floppy::{open_ibm_floppy, open_victor_floppy};
use crate::harddisk::HardDisk;
use crate::label::PhysicalDiskLabel;
use crate::read_le_u16;
use crate::volume::Volume;

/// Size above which an image is assumed to be a hard disk.
const HARDDISK_SIZE_THRESHOLD: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    VictorFloppy,
    IbmFloppy,
    VictorHardDisk,
    Cpm,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::VictorFloppy => "floppy-victor",
            ImageKind::IbmFloppy => "ibmpc",
            ImageKind::VictorHardDisk => "harddisk-victor",
            ImageKind::Cpm => "cpm",
        }
    }
}

/// A parsed `IMAGE[:PARTITION][:\PATH]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePath {
    pub image: String,
    pub partition: Option<usize>,
    pub internal: Option<String>,
}

/// Parse an image reference. `None` means the string carries no
/// recognised image extension and should be treated as a host path.
pub fn parse_image_path(spec: &str) -> Option<ImagePath> {
    let lower = spec.to_ascii_lowercase();
    let (idx, ext_len) = [".img", ".ima", ".dsk"]
        .iter()
        .find_map(|ext| lower.find(*ext).map(|i| (i, ext.len())))?;

    let split = idx + ext_len;
    let image = spec[..split].to_string();
    let mut rest = &spec[split..];

    if rest.is_empty() {
        return Some(ImagePath {
            image,
            partition: None,
            internal: None,
        });
    }
    if let Some(stripped) = rest.strip_prefix(':') {
        rest = stripped;
    }
    if rest.is_empty() {
        return Some(ImagePath {
            image,
            partition: None,
            internal: None,
        });
    }

    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let partition: usize = rest[..digits_end].parse().ok()?;
        let after = &rest[digits_end..];

        let internal = if after.is_empty() {
            None
        } else if let Some(after_colon) = after.strip_prefix(':') {
            strip_internal(after_colon)
        } else if after.starts_with(['\\', '/']) {
            strip_internal(after)
        } else {
            // A partition number glued to something else is malformed.
            return None;
        };
        return Some(ImagePath {
            image,
            partition: Some(partition),
            internal,
        });
    }

    Some(ImagePath {
        image,
        partition: None,
        internal: strip_internal(rest),
    })
}

fn strip_internal(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches(['\\', '/']);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Open the byte source behind an image path: a raw file, or the CHD
/// adapter when the container signature is present. CHD images are
/// always read-only.
pub fn open_device<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Arc<dyn BlockDevice>> {
    if is_chd_file(&path) {
        debug!("opening {} through the CHD adapter", path.as_ref().display());
        return Ok(Arc::new(ChdDevice::open(path)?));
    }
    Ok(Arc::new(FileDevice::open(path, read_only)?))
}

/// Classify an already-opened device.
pub fn detect_image_kind(device: &Arc<dyn BlockDevice>) -> Result<ImageKind> {
    if device.total_bytes() > HARDDISK_SIZE_THRESHOLD {
        return Ok(ImageKind::VictorHardDisk);
    }

    let sector0 = device.read_sector(0)?;

    if BiosParameterBlock::probe(&sector0) {
        return Ok(ImageKind::IbmFloppy);
    }

    if read_le_u16(&sector0[0..]) == 0x0001 && read_le_u16(&sector0[2..]) == 0x0001 {
        if let Ok(label) = PhysicalDiskLabel::from_bytes(&sector0) {
            if label.is_valid() {
                return Ok(ImageKind::VictorHardDisk);
            }
        }
    }

    if matches!(sector0[0], 0xFF | 0xE5 | 0x00) && detect_dir_sector(device.as_ref())?.is_some() {
        return Ok(ImageKind::Cpm);
    }

    Ok(ImageKind::VictorFloppy)
}

/// Classify an image file on disk.
pub fn detect_image_type<P: AsRef<Path>>(path: P) -> Result<ImageKind> {
    let device = open_device(path, true)?;
    detect_image_kind(&device)
}

/// Open a path as a filesystem volume, routing by sniffed type.
///
/// For hard disks the partition index defaults to 0; other image kinds
/// ignore it.
pub fn open_volume<P: AsRef<Path>>(
    path: P,
    partition: Option<usize>,
    read_only: bool,
) -> Result<Box<dyn Volume>> {
    let device = open_device(&path, read_only)?;
    let kind = detect_image_kind(&device)?;
    debug!(
        "{} detected as {}",
        path.as_ref().display(),
        kind.as_str()
    );
    match kind {
        ImageKind::VictorFloppy => Ok(Box::new(open_victor_floppy(device)?)),
        ImageKind::IbmFloppy => Ok(Box::new(open_ibm_floppy(device)?)),
        ImageKind::Cpm => Ok(Box::new(CpmVolume::open(device)?)),
        ImageKind::VictorHardDisk => {
            let disk = HardDisk::open(device)?;
            let index = partition.unwrap_or(0) as isize;
            Ok(Box::new(disk.into_partition(index)?))
        }
    }
}

/// Open a hard-disk image as the whole disk (all partitions).
pub fn open_harddisk<P: AsRef<Path>>(path: P, read_only: bool) -> Result<HardDisk> {
    let device = open_device(path, read_only)?;
    HardDisk::open(device)
}
