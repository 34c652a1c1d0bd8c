//! BIOS Parameter Block for IBM PC FAT12 floppies.
//!
//! The BPB sits in the first sector of the volume, after the three jump
//! bytes and the OEM name. It describes the complete layout: reserved
//! region, FAT copies, fixed root directory and data area. The boot sector
//! is validated by the 0xAA55 signature at offset 510 together with field
//! range checks; the FAT layout is then derived arithmetically:
//!
//! ```text
//! fat_start        = reserved_sectors
//! root_dir_start   = fat_start + num_fats * fat_sectors
//! root_dir_sectors = ceil(root_entry_count * 32 / 512)
//! data_start       = root_dir_start + root_dir_sectors
//! total_clusters   = (total_sectors - data_start) / sectors_per_cluster
//! ```

use crate::error::{DiskError, Result};
use crate::volume::Geometry;
use crate::{read_le_u16, read_le_u32, SECTOR_SIZE};

/// Boot signature at offset 510.
pub const BOOT_SIGNATURE: u16 = 0xAA55;

#[derive(Debug, Clone)]
pub struct BiosParameterBlock {
    pub oem_name: String,
    /// Offset 0x0B. Only 512 is supported.
    pub bytes_per_sector: u16,
    /// Offset 0x0D. 1, 2, 4 or 8.
    pub sectors_per_cluster: u8,
    /// Offset 0x0E, usually 1.
    pub reserved_sectors: u16,
    /// Offset 0x10, usually 2.
    pub num_fats: u8,
    /// Offset 0x11. 112 or 224 on floppies.
    pub root_entry_count: u16,
    /// 16-bit count at 0x13, falling back to the 32-bit count at 0x20.
    pub total_sectors: u32,
    /// Offset 0x15. 0xF0 removable, 0xF8 fixed.
    pub media_descriptor: u8,
    /// Offset 0x16, sectors per FAT copy.
    pub fat_sectors: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
}

impl BiosParameterBlock {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SECTOR_SIZE {
            return Err(DiskError::Disk("boot sector too small".into()));
        }

        let boot_sig = read_le_u16(&data[0x1FE..]);
        if boot_sig != BOOT_SIGNATURE {
            return Err(DiskError::Disk(format!(
                "invalid boot signature: 0x{boot_sig:04X}"
            )));
        }

        let bytes_per_sector = read_le_u16(&data[0x0B..]);
        let sectors_per_cluster = data[0x0D];
        let reserved_sectors = read_le_u16(&data[0x0E..]);
        let num_fats = data[0x10];
        let root_entry_count = read_le_u16(&data[0x11..]);
        let total_sectors_16 = read_le_u16(&data[0x13..]);
        let media_descriptor = data[0x15];
        let fat_sectors = read_le_u16(&data[0x16..]);

        let total_sectors = if total_sectors_16 == 0 {
            read_le_u32(&data[0x20..])
        } else {
            total_sectors_16 as u32
        };

        if bytes_per_sector != SECTOR_SIZE as u16 {
            return Err(DiskError::Disk(format!(
                "unsupported bytes per sector: {bytes_per_sector}"
            )));
        }
        if !matches!(sectors_per_cluster, 1 | 2 | 4 | 8) {
            return Err(DiskError::Disk(format!(
                "invalid sectors per cluster: {sectors_per_cluster}"
            )));
        }
        if num_fats == 0 {
            return Err(DiskError::Disk("number of FATs cannot be zero".into()));
        }
        if fat_sectors == 0 {
            return Err(DiskError::Disk("FAT size cannot be zero".into()));
        }

        Ok(Self {
            oem_name: data[0x03..0x0B]
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect::<String>()
                .trim()
                .to_string(),
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            root_entry_count,
            total_sectors,
            media_descriptor,
            fat_sectors,
            sectors_per_track: read_le_u16(&data[0x18..]),
            num_heads: read_le_u16(&data[0x1A..]),
        })
    }

    /// Quick structural check used by the image sniffer: boot signature,
    /// a jump byte, and BPB fields inside floppy-plausible ranges. Unlike
    /// [`from_bytes`](Self::from_bytes) this never allocates or fails.
    pub fn probe(data: &[u8]) -> bool {
        if data.len() < SECTOR_SIZE {
            return false;
        }
        let is_jump = data[0] == 0xEB || data[0] == 0xE9;
        read_le_u16(&data[0x1FE..]) == BOOT_SIGNATURE
            && is_jump
            && read_le_u16(&data[0x0B..]) == SECTOR_SIZE as u16
            && matches!(data[0x0D], 1 | 2 | 4 | 8)
            && read_le_u16(&data[0x0E..]) >= 1
            && matches!(data[0x10], 1 | 2)
            && data[0x15] >= 0xF0
    }

    pub fn root_dir_sectors(&self) -> usize {
        (self.root_entry_count as usize * 32 + SECTOR_SIZE - 1) / SECTOR_SIZE
    }

    pub fn geometry(&self) -> Geometry {
        let fat_start = self.reserved_sectors as usize;
        let dir_start = fat_start + self.num_fats as usize * self.fat_sectors as usize;
        let dir_sectors = self.root_dir_sectors();
        let data_start = dir_start + dir_sectors;
        let data_sectors = (self.total_sectors as usize).saturating_sub(data_start);
        Geometry {
            fat_start,
            fat_sectors: self.fat_sectors as usize,
            fat_copies: self.num_fats as usize,
            dir_start,
            dir_sectors,
            data_start,
            total_clusters: data_sectors / self.sectors_per_cluster as usize,
            sectors_per_cluster: self.sectors_per_cluster as usize,
            cluster_size: self.sectors_per_cluster as usize * SECTOR_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_boot_sector() -> Vec<u8> {
        // 1.44M layout.
        let mut boot = vec![0u8; SECTOR_SIZE];
        boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        boot[0x03..0x0B].copy_from_slice(b"MSDOS5.0");
        boot[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        boot[0x0D] = 1;
        boot[0x0E..0x10].copy_from_slice(&1u16.to_le_bytes());
        boot[0x10] = 2;
        boot[0x11..0x13].copy_from_slice(&224u16.to_le_bytes());
        boot[0x13..0x15].copy_from_slice(&2880u16.to_le_bytes());
        boot[0x15] = 0xF0;
        boot[0x16..0x18].copy_from_slice(&9u16.to_le_bytes());
        boot[0x1FE..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());
        boot
    }

    #[test]
    fn parses_and_derives_layout() {
        let bpb = BiosParameterBlock::from_bytes(&sample_boot_sector()).unwrap();
        assert_eq!(bpb.oem_name, "MSDOS5.0");
        let geo = bpb.geometry();
        assert_eq!(geo.fat_start, 1);
        assert_eq!(geo.dir_start, 19);
        assert_eq!(geo.dir_sectors, 14);
        assert_eq!(geo.data_start, 33);
        assert_eq!(geo.total_clusters, 2847);
        assert_eq!(geo.cluster_size, 512);
    }

    #[test]
    fn probe_rejects_victor_boot_sector() {
        let mut boot = vec![0u8; SECTOR_SIZE];
        boot[26] = 0x00;
        boot[27] = 0x02;
        boot[32] = 0x01;
        assert!(!BiosParameterBlock::probe(&boot));
        assert!(BiosParameterBlock::probe(&sample_boot_sector()));
    }

    #[test]
    fn missing_signature_is_an_error() {
        let mut boot = sample_boot_sector();
        boot[0x1FE] = 0;
        assert!(BiosParameterBlock::from_bytes(&boot).is_err());
    }
}
