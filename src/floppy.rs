//! Floppy image opening.
//!
//! Victor 9000 floppies do not carry a BPB. The boot sector holds a small
//! parameter block instead: sector size at offset 26, data start at 28,
//! a flag word at 32 (bit 0 set on double-sided media) and a disc type
//! byte at 34. Everything else about the layout is implied by the sided
//! flag:
//!
//! | | FAT start | FAT sectors | root | data | clusters |
//! | --- | --- | --- | --- | --- | --- |
//! | single | 1 | 1 | 3 | 11 | 1214 |
//! | double | 1 | 2 | 5 | 13 | 2378 |
//!
//! Both variants keep two FAT copies, 4 sectors per cluster and an 8
//! sector root directory. A non-zero data-start field in the boot sector
//! overrides the default.
//!
//! IBM PC floppies get their whole geometry from the BPB.

use std::sync::Arc;

use crate::bpb::BiosParameterBlock;
use crate::device::BlockDevice;
use crate::error::Result;
use crate::read_le_u16;
use crate::volume::{Fat12Volume, Geometry, VolumeKind};
use crate::{CLUSTER_SIZE, SECTORS_PER_CLUSTER, SECTOR_SIZE};

/// Victor floppy boot sector parameters.
#[derive(Debug, Clone, Copy)]
pub struct VictorBootSector {
    pub sector_size: u16,
    pub double_sided: bool,
    pub disc_type: u8,
    /// Offset 28; zero means "use the default for the sided flag".
    pub data_start: u16,
}

impl VictorBootSector {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut sector_size = read_le_u16(&data[26..]);
        if sector_size != SECTOR_SIZE as u16 {
            sector_size = SECTOR_SIZE as u16;
        }
        Self {
            sector_size,
            double_sided: read_le_u16(&data[32..]) & 0x01 != 0,
            disc_type: data[34],
            data_start: read_le_u16(&data[28..]),
        }
    }

    pub fn geometry(&self) -> Geometry {
        let (fat_sectors, dir_start, default_data_start, total_clusters) = if self.double_sided {
            (2, 5, 13, 2378)
        } else {
            (1, 3, 11, 1214)
        };
        let data_start = if self.data_start != 0 {
            self.data_start as usize
        } else {
            default_data_start
        };
        Geometry {
            fat_start: 1,
            fat_sectors,
            fat_copies: 2,
            dir_start,
            dir_sectors: 8,
            data_start,
            total_clusters,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
            cluster_size: CLUSTER_SIZE,
        }
    }
}

/// Open a Victor 9000 floppy on an already-opened device.
pub fn open_victor_floppy(device: Arc<dyn BlockDevice>) -> Result<Fat12Volume> {
    let boot = device.read_sector(0)?;
    let params = VictorBootSector::from_bytes(&boot);
    Fat12Volume::new(
        device,
        params.geometry(),
        VolumeKind::VictorFloppy {
            double_sided: params.double_sided,
        },
    )
}

/// Open an IBM PC FAT12 floppy on an already-opened device.
pub fn open_ibm_floppy(device: Arc<dyn BlockDevice>) -> Result<Fat12Volume> {
    let boot = device.read_sector(0)?;
    let bpb = BiosParameterBlock::from_bytes(&boot)?;
    Fat12Volume::new(device, bpb.geometry(), VolumeKind::IbmFloppy)
}
