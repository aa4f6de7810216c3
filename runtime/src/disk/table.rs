//! GUID partition table for assembled disks.
//!
//! All GUIDs derive from a fixed disk signature, so assembling the same
//! inputs twice yields byte-identical tables.

use std::collections::BTreeMap;
use std::fs::File;

use gom_core::config::{DiskLayout, SECTOR_SIZE};
use gom_core::error::{MachineError, Result};
use gpt::disk::LogicalBlockSize;
use gpt::mbr::ProtectiveMBR;
use gpt::partition::Partition;
use gpt::partition_types::{self, Type};
use gpt::GptConfig;
use uuid::Uuid;

use super::PartitionTableWriter;

/// Signature mixed into every GUID of the table.
pub const DEFAULT_DISK_SIGNATURE: u32 = 0x2e18_c40c;

/// Common prefix of all partition GUIDs (`60c24cc1-f3f9-427a-8199-...`).
const GUID_PREFIX: u128 = 0x60c24cc1_f3f9_427a_8199_0000_0000_0000;

/// Size of each root slot when the disk has room for two.
const ROOT_SLOT_SIZE: u64 = 500 * 1024 * 1024;

/// Sectors reserved at the end of the disk for the backup GPT.
const BACKUP_GPT_SECTORS: u64 = 33;

/// One entry of the planned table, in sectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPartition {
    pub number: u32,
    pub name: &'static str,
    pub first_lba: u64,
    pub last_lba: u64,
}

/// Writes a protective MBR and a GPT matching a [`DiskLayout`].
#[derive(Debug, Clone)]
pub struct GptPartitioner {
    layout: DiskLayout,
    signature: u32,
}

impl GptPartitioner {
    pub fn new(layout: DiskLayout) -> Self {
        Self::with_signature(layout, DEFAULT_DISK_SIGNATURE)
    }

    pub fn with_signature(layout: DiskLayout, signature: u32) -> Self {
        Self { layout, signature }
    }

    /// GUID of partition `number`; number 0 is the disk itself.
    pub fn guid(&self, number: u32) -> Uuid {
        Uuid::from_u128(GUID_PREFIX | (u128::from(self.signature) << 16) | u128::from(number))
    }

    /// Lay out boot, root and (space permitting) a second root plus perm.
    pub fn plan(&self, capacity: u64) -> Result<Vec<PlannedPartition>> {
        let sectors = capacity / SECTOR_SIZE;
        let boot_first = self.layout.boot_offset / SECTOR_SIZE;
        let root_first = self.layout.root_offset / SECTOR_SIZE;
        let last_usable = sectors
            .checked_sub(BACKUP_GPT_SECTORS + 1)
            .filter(|last| *last > root_first)
            .ok_or_else(|| {
                MachineError::DiskError(format!(
                    "disk of {} bytes leaves no room for a root partition",
                    capacity
                ))
            })?;

        let mut plan = vec![PlannedPartition {
            number: 1,
            name: "boot",
            first_lba: boot_first,
            last_lba: root_first - 1,
        }];

        let slot = ROOT_SLOT_SIZE / SECTOR_SIZE;
        if root_first + 2 * slot <= last_usable {
            plan.push(PlannedPartition {
                number: 2,
                name: "root",
                first_lba: root_first,
                last_lba: root_first + slot - 1,
            });
            plan.push(PlannedPartition {
                number: 3,
                name: "root2",
                first_lba: root_first + slot,
                last_lba: root_first + 2 * slot - 1,
            });
            plan.push(PlannedPartition {
                number: 4,
                name: "perm",
                first_lba: root_first + 2 * slot,
                last_lba: last_usable,
            });
        } else {
            plan.push(PlannedPartition {
                number: 2,
                name: "root",
                first_lba: root_first,
                last_lba: last_usable,
            });
        }

        Ok(plan)
    }

    fn partition_type(number: u32) -> Type {
        match number {
            1 => partition_types::EFI,
            _ => partition_types::LINUX_FS,
        }
    }
}

impl Default for GptPartitioner {
    fn default() -> Self {
        Self::new(DiskLayout::default())
    }
}

fn gpt_err(stage: &str, e: impl std::fmt::Display) -> MachineError {
    MachineError::DiskError(format!("error {} partition table: {}", stage, e))
}

impl PartitionTableWriter for GptPartitioner {
    fn write_table(&self, disk: &mut File, capacity: u64) -> Result<()> {
        let plan = self.plan(capacity)?;

        let sectors = capacity / SECTOR_SIZE;
        let mbr_size = u32::try_from(sectors - 1).unwrap_or(u32::MAX);
        ProtectiveMBR::with_lb_size(mbr_size)
            .overwrite_lba0(disk)
            .map_err(|e| gpt_err("writing protective MBR for", e))?;

        let device = disk
            .try_clone()
            .map_err(|e| gpt_err("opening disk for", e))?;
        let mut gdisk = GptConfig::new()
            .writable(true)
            .initialized(false)
            .logical_block_size(LogicalBlockSize::Lb512)
            .create_from_device(Box::new(device), Some(self.guid(0)))
            .map_err(|e| gpt_err("creating", e))?;

        let partitions: BTreeMap<u32, Partition> = plan
            .iter()
            .map(|p| {
                let partition = Partition {
                    part_type_guid: Self::partition_type(p.number),
                    part_guid: self.guid(p.number),
                    first_lba: p.first_lba,
                    last_lba: p.last_lba,
                    flags: 0,
                    name: p.name.to_string(),
                };
                (p.number, partition)
            })
            .collect();

        gdisk
            .update_partitions(partitions)
            .map_err(|e| gpt_err("populating", e))?;
        gdisk.write().map_err(|e| gpt_err("writing", e))?;

        tracing::debug!(
            partitions = plan.len(),
            disk_guid = %self.guid(0),
            "Wrote GUID partition table"
        );

        Ok(())
    }
}
