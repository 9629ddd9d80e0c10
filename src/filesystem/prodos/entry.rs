/// ProDOS directory entry codec
///
/// Every directory block holds a 4-byte prev/next link followed by 13
/// entries of 39 bytes. Slot 0 of a directory's key block is its header.

use crate::error::{DiskError, Result};
use crate::format::constants::{read_u16, write_u16};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Length of one directory entry
pub const ENTRY_LENGTH: usize = 0x27;
/// Entries per directory block
pub const ENTRIES_PER_BLOCK: usize = 0x0D;
/// Offset of the first entry in a directory block
pub const ENTRY_START: usize = 4;
/// Longest ProDOS name
pub const MAX_NAME_LEN: usize = 15;
/// Largest representable EOF
pub const MAX_EOF: u64 = 0xFF_FFFF;

/// Access byte of an unlocked file
pub const ACCESS_UNLOCKED: u8 = 0xE3;
/// Access byte of a locked file
pub const ACCESS_LOCKED: u8 = 0x21;
/// Access byte written into directory headers
pub const ACCESS_DIRECTORY: u8 = 0xC3;

/// Storage type nibbles
pub mod kind {
    /// Unused slot
    pub const DELETED: u8 = 0x0;
    /// Single data block
    pub const SEEDLING: u8 = 0x1;
    /// Index block
    pub const SAPLING: u8 = 0x2;
    /// Master index block
    pub const TREE: u8 = 0x3;
    /// Pascal area on a ProDOS volume
    pub const PASCAL_AREA: u8 = 0x4;
    /// Data and resource forks
    pub const EXTENDED: u8 = 0x5;
    /// Subdirectory file entry
    pub const SUBDIRECTORY: u8 = 0xD;
    /// Subdirectory header
    pub const SUBDIR_HEADER: u8 = 0xE;
    /// Volume directory header
    pub const VOLUME_HEADER: u8 = 0xF;
}

/// Directory file type
pub const DIRECTORY_TYPE: u8 = 0x0F;

/// Byte `$14` of a subdirectory header
const SUBDIR_MAGIC: u8 = 0x75;

/// Byte offset of `slot` within a directory block
pub fn slot_offset(slot: usize) -> usize {
    ENTRY_START + slot * ENTRY_LENGTH
}

/// File entry (storage types 1-5 and $D)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub storage: u8,
    pub name: String,
    pub file_type: u8,
    pub key_block: u16,
    pub blocks_used: u16,
    pub eof: u32,
    pub created: [u8; 4],
    /// GS/OS stores lowercase flags in the version bytes
    pub case_bits: u16,
    pub access: u8,
    pub aux_type: u16,
    pub modified: [u8; 4],
    pub header_pointer: u16,
}

impl FileEntry {
    /// Decode the entry at `slot`; `None` for an empty slot
    pub fn parse(block: &[u8], slot: usize) -> Option<Self> {
        let e = &block[slot_offset(slot)..slot_offset(slot) + ENTRY_LENGTH];
        let storage = e[0] >> 4;
        if storage == kind::DELETED {
            return None;
        }
        let name_len = (e[0] & 0x0F) as usize;
        Some(Self {
            storage,
            name: decode_name(&e[1..1 + name_len]),
            file_type: e[0x10],
            key_block: read_u16(e, 0x11),
            blocks_used: read_u16(e, 0x13),
            eof: e[0x15] as u32 | (e[0x16] as u32) << 8 | (e[0x17] as u32) << 16,
            created: [e[0x18], e[0x19], e[0x1A], e[0x1B]],
            case_bits: read_u16(e, 0x1C),
            access: e[0x1E],
            aux_type: read_u16(e, 0x1F),
            modified: [e[0x21], e[0x22], e[0x23], e[0x24]],
            header_pointer: read_u16(e, 0x25),
        })
    }

    /// Encode into `slot` of a directory block
    pub fn write(&self, block: &mut [u8], slot: usize) {
        let e = &mut block[slot_offset(slot)..slot_offset(slot) + ENTRY_LENGTH];
        e.fill(0);
        e[0] = self.storage << 4 | self.name.len() as u8;
        e[1..1 + self.name.len()].copy_from_slice(self.name.as_bytes());
        e[0x10] = self.file_type;
        write_u16(e, 0x11, self.key_block);
        write_u16(e, 0x13, self.blocks_used);
        e[0x15..0x18].copy_from_slice(&self.eof.to_le_bytes()[..3]);
        e[0x18..0x1C].copy_from_slice(&self.created);
        write_u16(e, 0x1C, self.case_bits);
        e[0x1E] = self.access;
        write_u16(e, 0x1F, self.aux_type);
        e[0x21..0x25].copy_from_slice(&self.modified);
        write_u16(e, 0x25, self.header_pointer);
    }

    /// Entry refers to a subdirectory
    pub fn is_directory(&self) -> bool {
        self.storage == kind::SUBDIRECTORY
    }

    /// Access byte forbids destroy, rename or write
    pub fn is_locked(&self) -> bool {
        is_locked(self.access)
    }

    /// Name with GS/OS lowercase flags applied
    pub fn display_name(&self) -> String {
        apply_case_bits(&self.name, self.case_bits)
    }
}

/// Volume or subdirectory header (slot 0 of a key block)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirHeader {
    pub storage: u8,
    pub name: String,
    pub created: [u8; 4],
    pub case_bits: u16,
    pub access: u8,
    pub file_count: u16,
    /// Volume: bitmap pointer. Subdirectory: block holding the parent entry
    pub pointer: u16,
    /// Volume: total blocks. Subdirectory: parent entry number and length
    pub extra: u16,
}

impl DirHeader {
    /// Decode the header of a key block
    pub fn parse(block: &[u8]) -> Option<Self> {
        let e = &block[ENTRY_START..ENTRY_START + ENTRY_LENGTH];
        let storage = e[0] >> 4;
        if storage != kind::VOLUME_HEADER && storage != kind::SUBDIR_HEADER {
            return None;
        }
        let name_len = (e[0] & 0x0F) as usize;
        Some(Self {
            storage,
            name: decode_name(&e[1..1 + name_len]),
            created: [e[0x18], e[0x19], e[0x1A], e[0x1B]],
            case_bits: read_u16(e, 0x1C),
            access: e[0x1E],
            file_count: read_u16(e, 0x21),
            pointer: read_u16(e, 0x23),
            extra: read_u16(e, 0x25),
        })
    }

    /// Create a subdirectory header
    pub fn subdirectory(name: &str, parent_block: u32, parent_slot: usize, created: [u8; 4]) -> Self {
        Self {
            storage: kind::SUBDIR_HEADER,
            name: name.to_string(),
            created,
            case_bits: 0,
            access: ACCESS_DIRECTORY,
            file_count: 0,
            pointer: parent_block as u16,
            extra: (parent_slot as u16 + 1) | (ENTRY_LENGTH as u16) << 8,
        }
    }

    /// Encode into slot 0 of a key block
    pub fn write(&self, block: &mut [u8]) {
        let e = &mut block[ENTRY_START..ENTRY_START + ENTRY_LENGTH];
        e.fill(0);
        e[0] = self.storage << 4 | self.name.len() as u8;
        e[1..1 + self.name.len()].copy_from_slice(self.name.as_bytes());
        if self.storage == kind::SUBDIR_HEADER {
            e[0x10] = SUBDIR_MAGIC;
        }
        e[0x18..0x1C].copy_from_slice(&self.created);
        write_u16(e, 0x1C, self.case_bits);
        e[0x1E] = self.access;
        e[0x1F] = ENTRY_LENGTH as u8;
        e[0x20] = ENTRIES_PER_BLOCK as u8;
        write_u16(e, 0x21, self.file_count);
        write_u16(e, 0x23, self.pointer);
        write_u16(e, 0x25, self.extra);
    }

    /// Block holding this subdirectory's entry in its parent
    pub fn parent_block(&self) -> u32 {
        self.pointer as u32
    }

    /// Slot of this subdirectory's entry in its parent block
    pub fn parent_slot(&self) -> usize {
        ((self.extra & 0xFF) as usize).saturating_sub(1)
    }

    /// Point a subdirectory header at a new parent entry
    pub fn set_parent(&mut self, block: u32, slot: usize) {
        self.pointer = block as u16;
        self.extra = (slot as u16 + 1) | (ENTRY_LENGTH as u16) << 8;
    }
}

/// Check whether a block looks like a ProDOS volume directory key block
pub fn is_volume_header(block: &[u8]) -> bool {
    if block.len() < 512 {
        return false;
    }
    let prev = read_u16(block, 0);
    let storage = block[ENTRY_START] >> 4;
    let name_len = (block[ENTRY_START] & 0x0F) as usize;
    prev == 0
        && storage == kind::VOLUME_HEADER
        && name_len > 0
        && block[0x23] as usize == ENTRY_LENGTH
        && block[0x24] as usize == ENTRIES_PER_BLOCK
        && is_valid_name(&block[ENTRY_START + 1..ENTRY_START + 1 + name_len])
}

fn is_valid_name(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes[0].is_ascii_alphabetic()
        && bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'.')
}

fn decode_name(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| (b & 0x7F) as char).collect()
}

fn apply_case_bits(name: &str, bits: u16) -> String {
    if bits & 0x8000 == 0 {
        return name.to_string();
    }
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i < 15 && bits & (0x4000 >> i) != 0 {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect()
}

/// Access byte forbids destroy, rename or write
pub fn is_locked(access: u8) -> bool {
    access & 0xC2 != 0xC2
}

/// Validate a name and return its stored (uppercase) form
pub fn validate_name(name: &str) -> Result<String> {
    let upper = name.to_ascii_uppercase();
    if upper.is_empty() || upper.len() > MAX_NAME_LEN || !is_valid_name(upper.as_bytes()) {
        return Err(DiskError::InvalidName(name.to_string()));
    }
    Ok(upper)
}

/// Decode a 4-byte ProDOS date/time
pub fn decode_datetime(raw: &[u8; 4]) -> Option<NaiveDateTime> {
    let date = u16::from_le_bytes([raw[0], raw[1]]);
    if date == 0 {
        return None;
    }
    let year = (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let year = if year < 40 { 2000 + year } else { 1900 + year };
    let minute = (raw[2] & 0x3F) as u32;
    let hour = (raw[3] & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Encode a ProDOS date/time
pub fn encode_datetime(dt: &NaiveDateTime) -> [u8; 4] {
    let year = (dt.year() % 100) as u16;
    let date = year << 9 | (dt.month() as u16) << 5 | dt.day() as u16;
    let [lo, hi] = date.to_le_bytes();
    [lo, hi, dt.minute() as u8, dt.hour() as u8]
}

/// Current local time as a ProDOS date/time
pub fn now_stamp() -> [u8; 4] {
    encode_datetime(&chrono::Local::now().naive_local())
}
