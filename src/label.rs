//! Victor 9000 hard disk labels.
//!
//! A hard disk carries two layers of labels, both little-endian:
//!
//! **Physical Disk Label (PDL)**, sector 0 of the disk:
//!
//! | Offset | Size | Field |
//! | ------ | ---- | ----- |
//! | 0      | 2    | label type (1 on a valid disk) |
//! | 2      | 2    | device id (1 on a valid disk) |
//! | 4      | 16   | ASCII serial number |
//! | 20     | 2    | sector size |
//! | 22     | 4    | IPL disk address |
//! | 26     | 2    | IPL load address |
//! | 28     | 2    | IPL load length |
//! | 30     | 4    | IPL code entry |
//! | 34     | 2    | primary boot volume |
//! | 36     | 16   | controller parameters |
//!
//! Three count-prefixed lists follow: available-media regions (8 bytes
//! each), working-media regions (8 bytes each), then the virtual volume
//! list of 4-byte absolute sector addresses, one per partition.
//!
//! **Virtual Volume Label (VVL)**, first sector of each partition:
//!
//! | Offset | Size | Field |
//! | ------ | ---- | ----- |
//! | 0      | 2    | label type (0, 1, 2 or 0xFFFF) |
//! | 2      | 16   | volume name |
//! | 18     | 12   | IPL fields |
//! | 30     | 4    | volume capacity in sectors |
//! | 34     | 4    | data start |
//! | 38     | 2    | host block size |
//! | 40     | 2    | allocation unit (sectors per cluster) |
//! | 42     | 2    | directory entry count |
//! | 44     | 16   | reserved |
//! | 60     | 1+   | drive assignment count, then 4-byte records |
//!
//! Any other label type means the slot does not hold a volume and is
//! skipped silently during partition discovery.

use crate::error::{DiskError, Result};
use crate::{read_le_u16, read_le_u32};

// Physical disk label offsets.
const PDL_LABEL_TYPE: usize = 0;
const PDL_DEVICE_ID: usize = 2;
const PDL_SERIAL_NUMBER: usize = 4;
const PDL_SECTOR_SIZE: usize = 20;
const PDL_IPL_DISK_ADDR: usize = 22;
const PDL_IPL_LOAD_ADDR: usize = 26;
const PDL_IPL_LOAD_LEN: usize = 28;
const PDL_IPL_CODE_ENTRY: usize = 30;
const PDL_PRIMARY_BOOT_VOL: usize = 34;
const PDL_CONTROLLER_PARAMS: usize = 36;

// Virtual volume label offsets.
const VVL_LABEL_TYPE: usize = 0;
const VVL_VOLUME_NAME: usize = 2;
const VVL_IPL_DISK_ADDR: usize = 18;
const VVL_VOLUME_CAPACITY: usize = 30;
const VVL_DATA_START: usize = 34;
const VVL_HOST_BLOCK_SIZE: usize = 38;
const VVL_ALLOCATION_UNIT: usize = 40;
const VVL_NUM_DIR_ENTRIES: usize = 42;
const VVL_ASSIGNMENT_COUNT: usize = 60;

/// Label types that mark a slot as an actual volume.
pub const VALID_VVL_TYPES: [u16; 4] = [0x0000, 0x0001, 0x0002, 0xFFFF];

#[derive(Debug, Clone)]
pub struct PhysicalDiskLabel {
    pub label_type: u16,
    pub device_id: u16,
    pub serial_number: String,
    pub sector_size: u16,
    pub ipl_disk_address: u32,
    pub ipl_load_address: u16,
    pub ipl_load_length: u16,
    pub ipl_code_entry: u32,
    pub primary_boot_volume: u16,
    pub controller_params: [u8; 16],
    /// Absolute start sector of each virtual volume.
    pub virtual_volume_addresses: Vec<u32>,
}

impl PhysicalDiskLabel {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 512 {
            return Err(DiskError::HardDiskLabel(
                "insufficient data for physical disk label".into(),
            ));
        }

        let mut controller_params = [0u8; 16];
        controller_params.copy_from_slice(&data[PDL_CONTROLLER_PARAMS..PDL_CONTROLLER_PARAMS + 16]);

        // The three variable-length lists follow the controller block.
        let mut offset = PDL_CONTROLLER_PARAMS + 16;
        let avail_regions = data[offset] as usize;
        offset += 1 + avail_regions * 8;
        if offset >= data.len() {
            return Err(DiskError::HardDiskLabel("truncated media region list".into()));
        }
        let work_regions = data[offset] as usize;
        offset += 1 + work_regions * 8;
        if offset >= data.len() {
            return Err(DiskError::HardDiskLabel("truncated media region list".into()));
        }

        let volume_count = data[offset] as usize;
        offset += 1;
        let mut virtual_volume_addresses = Vec::with_capacity(volume_count);
        for _ in 0..volume_count {
            if offset + 4 > data.len() {
                return Err(DiskError::HardDiskLabel("truncated volume list".into()));
            }
            virtual_volume_addresses.push(read_le_u32(&data[offset..]));
            offset += 4;
        }

        Ok(Self {
            label_type: read_le_u16(&data[PDL_LABEL_TYPE..]),
            device_id: read_le_u16(&data[PDL_DEVICE_ID..]),
            serial_number: ascii_field(&data[PDL_SERIAL_NUMBER..PDL_SERIAL_NUMBER + 16]),
            sector_size: read_le_u16(&data[PDL_SECTOR_SIZE..]),
            ipl_disk_address: read_le_u32(&data[PDL_IPL_DISK_ADDR..]),
            ipl_load_address: read_le_u16(&data[PDL_IPL_LOAD_ADDR..]),
            ipl_load_length: read_le_u16(&data[PDL_IPL_LOAD_LEN..]),
            ipl_code_entry: read_le_u32(&data[PDL_IPL_CODE_ENTRY..]),
            primary_boot_volume: read_le_u16(&data[PDL_PRIMARY_BOOT_VOL..]),
            controller_params,
            virtual_volume_addresses,
        })
    }

    /// A valid Victor hard disk has label type 1 and device id 1.
    pub fn is_valid(&self) -> bool {
        self.label_type == 0x0001 && self.device_id == 0x0001
    }
}

/// Drive assignment record from the VVL configuration area.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DriveAssignment {
    /// Physical unit: high byte 0xFF means a floppy (0xFF00 = A:), high
    /// byte 0x00 a hard disk unit.
    pub device_unit: u16,
    /// Index into the PDL virtual volume list.
    pub volume_index: u16,
}

#[derive(Debug, Clone)]
pub struct VirtualVolumeLabel {
    pub label_type: u16,
    pub volume_name: String,
    pub ipl_disk_address: u32,
    pub ipl_load_address: u16,
    pub ipl_load_length: u16,
    pub ipl_code_entry: u32,
    /// Partition size in sectors.
    pub volume_capacity: u32,
    pub data_start: u32,
    pub host_block_size: u16,
    /// Sectors per cluster.
    pub allocation_unit: u16,
    pub num_dir_entries: u16,
    /// Absolute sector this label was read from.
    pub volume_start_sector: u32,
    pub assignments: Vec<DriveAssignment>,
}

impl VirtualVolumeLabel {
    pub fn from_bytes(data: &[u8], volume_start_sector: u32) -> Result<Self> {
        if data.len() < 64 {
            return Err(DiskError::HardDiskLabel(
                "insufficient data for virtual volume label".into(),
            ));
        }

        // Garbage in the configuration area is common; cap at 16 records.
        let mut assignments = Vec::new();
        if data.len() > VVL_ASSIGNMENT_COUNT {
            let count = (data[VVL_ASSIGNMENT_COUNT] as usize).min(16);
            let mut offset = VVL_ASSIGNMENT_COUNT + 1;
            for _ in 0..count {
                if offset + 4 > data.len() {
                    break;
                }
                assignments.push(DriveAssignment {
                    device_unit: read_le_u16(&data[offset..]),
                    volume_index: read_le_u16(&data[offset + 2..]),
                });
                offset += 4;
            }
        }

        Ok(Self {
            label_type: read_le_u16(&data[VVL_LABEL_TYPE..]),
            volume_name: ascii_field(&data[VVL_VOLUME_NAME..VVL_VOLUME_NAME + 16]),
            ipl_disk_address: read_le_u32(&data[VVL_IPL_DISK_ADDR..]),
            ipl_load_address: read_le_u16(&data[VVL_IPL_DISK_ADDR + 4..]),
            ipl_load_length: read_le_u16(&data[VVL_IPL_DISK_ADDR + 6..]),
            ipl_code_entry: read_le_u32(&data[VVL_IPL_DISK_ADDR + 8..]),
            volume_capacity: read_le_u32(&data[VVL_VOLUME_CAPACITY..]),
            data_start: read_le_u32(&data[VVL_DATA_START..]),
            host_block_size: read_le_u16(&data[VVL_HOST_BLOCK_SIZE..]),
            allocation_unit: read_le_u16(&data[VVL_ALLOCATION_UNIT..]),
            num_dir_entries: read_le_u16(&data[VVL_NUM_DIR_ENTRIES..]),
            volume_start_sector,
            assignments,
        })
    }

    pub fn is_volume(&self) -> bool {
        VALID_VVL_TYPES.contains(&self.label_type)
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect::<String>()
        .trim()
        .to_string()
}
