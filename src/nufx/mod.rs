/// NuFX (ShrinkIt) archive reader
///
/// A NuFX archive is a 48-byte master header followed by records. Each
/// record header carries the file's attributes and a list of 16-byte thread
/// headers; the thread data (filename, data fork, resource fork, disk image
/// or comment) follows the headers in the same order.

pub mod crc;
pub mod lzw;
pub mod squeeze;

use self::crc::crc16;
use crate::error::{DiskError, Result};
use crate::filesystem::{
    DirectoryEntry, EntryLocation, FileSystem, FileSystemInfo, FileSystemType, StorageType,
};
use crate::format::constants::{
    read_u16, read_u32, BLOCK_SIZE, NUFX_MASTER_SIGNATURE, NUFX_RECORD_SIGNATURE,
};
use chrono::{NaiveDate, NaiveDateTime};

/// Length of the master header
pub const MASTER_HEADER_LEN: usize = 48;
/// Length of a thread header
pub const THREAD_HEADER_LEN: usize = 16;
/// Largest expanded thread accepted, the size of the biggest ProDOS volume
pub const MAX_THREAD_LEN: usize = 32 * 1024 * 1024;
/// Output reserved up front; the buffer grows past it as data decodes
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Thread classes
pub mod class {
    /// Comment or other message
    pub const MESSAGE: u16 = 0;
    /// Control thread (directory creation)
    pub const CONTROL: u16 = 1;
    /// File or disk data
    pub const DATA: u16 = 2;
    /// Pathname
    pub const FILENAME: u16 = 3;
}

/// Kinds within the data class
pub mod data_kind {
    /// Data fork
    pub const DATA_FORK: u16 = 0;
    /// Whole disk image
    pub const DISK_IMAGE: u16 = 1;
    /// Resource fork
    pub const RESOURCE_FORK: u16 = 2;
}

/// Thread compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFormat {
    /// Stored as-is
    Uncompressed,
    /// Huffman squeeze
    Squeeze,
    /// ShrinkIt LZW/1
    Lzw1,
    /// ShrinkIt LZW/2
    Lzw2,
    /// Any other format number
    Other(u16),
}

impl ThreadFormat {
    /// Decode a thread format number
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ThreadFormat::Uncompressed,
            1 => ThreadFormat::Squeeze,
            2 => ThreadFormat::Lzw1,
            3 => ThreadFormat::Lzw2,
            other => ThreadFormat::Other(other),
        }
    }

    /// Display name
    pub fn name(&self) -> String {
        match self {
            ThreadFormat::Uncompressed => "uncompressed".to_string(),
            ThreadFormat::Squeeze => "squeeze".to_string(),
            ThreadFormat::Lzw1 => "LZW/1".to_string(),
            ThreadFormat::Lzw2 => "LZW/2".to_string(),
            ThreadFormat::Other(code) => format!("format {}", code),
        }
    }
}

/// LSB-first bit reader over a byte slice
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Read `width` bits, or `None` past the end of the data
    pub(crate) fn read(&mut self, width: u32) -> Option<u32> {
        let mut value = 0u32;
        for i in 0..width {
            let byte = *self.data.get(self.bit_pos / 8)?;
            let bit = (byte >> (self.bit_pos % 8)) & 1;
            value |= (bit as u32) << i;
            self.bit_pos += 1;
        }
        Some(value)
    }

    /// Whole bytes touched so far
    pub(crate) fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }
}

/// Decode an 8-byte NuFX date
pub fn decode_datetime(raw: &[u8]) -> Option<NaiveDateTime> {
    if raw.len() < 8 || raw.iter().all(|&b| b == 0) {
        return None;
    }
    let year = match raw[3] as i32 {
        y if y < 40 => 2000 + y,
        y => 1900 + y,
    };
    NaiveDate::from_ymd_opt(year, raw[5] as u32 + 1, raw[4] as u32 + 1)?
        .and_hms_opt(raw[2] as u32, raw[1] as u32, raw[0] as u32)
}

/// Thread header with the position of its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// Thread class
    pub class: u16,
    /// Compression format
    pub format: ThreadFormat,
    /// Kind within the class
    pub kind: u16,
    /// CRC of the uncompressed data (version 3 records)
    pub crc: u16,
    /// Uncompressed length
    pub eof: u32,
    /// Stored length
    pub comp_eof: u32,
    /// Offset of the stored data in the archive
    pub offset: usize,
}

/// One archive record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Position in the archive
    pub index: usize,
    /// Pathname with `/` separators
    pub name: String,
    /// Record format version
    pub version: u16,
    /// Originating filesystem id
    pub file_sys_id: u16,
    /// ProDOS access bits
    pub access: u32,
    /// ProDOS file type
    pub file_type: u32,
    /// ProDOS aux type (block count for disk images)
    pub extra_type: u32,
    /// Storage type (block size for disk images)
    pub storage_type: u16,
    /// Creation date
    pub created: Option<NaiveDateTime>,
    /// Modification date
    pub modified: Option<NaiveDateTime>,
    /// Date the record was archived
    pub archived: Option<NaiveDateTime>,
    /// Threads in stored order
    pub threads: Vec<Thread>,
}

impl Record {
    fn find(&self, class: u16, kind: u16) -> Option<&Thread> {
        self.threads.iter().find(|t| t.class == class && t.kind == kind)
    }

    /// Data fork or disk image thread
    pub fn data_thread(&self) -> Option<&Thread> {
        self.find(class::DATA, data_kind::DATA_FORK)
            .or_else(|| self.find(class::DATA, data_kind::DISK_IMAGE))
    }

    /// Resource fork thread
    pub fn resource_thread(&self) -> Option<&Thread> {
        self.find(class::DATA, data_kind::RESOURCE_FORK)
    }

    /// Record holds a whole disk image
    pub fn is_disk_image(&self) -> bool {
        self.find(class::DATA, data_kind::DISK_IMAGE).is_some()
    }

    /// Uncompressed length of a data thread
    ///
    /// Old archivers leave a disk image's thread EOF at zero; its size then
    /// comes from the block count and block size.
    fn thread_len(&self, thread: &Thread) -> usize {
        if thread.kind == data_kind::DISK_IMAGE && thread.eof == 0 {
            (self.extra_type as usize).saturating_mul(self.storage_type as usize)
        } else {
            thread.eof as usize
        }
    }

    /// Data fork length in bytes
    pub fn data_len(&self) -> u64 {
        self.data_thread().map_or(0, |t| self.thread_len(t) as u64)
    }

    /// Record is locked against deletion or writing
    pub fn is_locked(&self) -> bool {
        self.access & 0xC2 != 0xC2
    }
}

/// Empty buffer for a thread expanding to `eof` bytes
pub(crate) fn output_buffer(eof: usize, method: &str) -> Result<Vec<u8>> {
    if eof > MAX_THREAD_LEN {
        return Err(DiskError::corrupt_archive(
            format!("{} thread claims {} bytes", method, eof),
            Vec::new(),
        ));
    }
    Ok(Vec::with_capacity(eof.min(INITIAL_CAPACITY)))
}

/// Parsed NuFX archive
#[derive(Debug, Clone)]
pub struct NufxArchive {
    data: Vec<u8>,
    name: String,
    created: Option<NaiveDateTime>,
    modified: Option<NaiveDateTime>,
    version: u16,
    records: Vec<Record>,
}

fn truncated(what: &str) -> DiskError {
    DiskError::corrupt_archive(format!("archive cut short in {}", what), Vec::new())
}

impl NufxArchive {
    /// Parse an archive from its bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < MASTER_HEADER_LEN || !data.starts_with(NUFX_MASTER_SIGNATURE) {
            return Err(DiskError::unrecognized("missing NuFile signature"));
        }
        let stored = read_u16(&data, 6);
        let computed = crc16(0, &data[8..MASTER_HEADER_LEN]);
        if stored != computed {
            tracing::warn!("Master header CRC mismatch: stored {:04X}, computed {:04X}", stored, computed);
        }
        let total = read_u32(&data, 8) as usize;
        let created = decode_datetime(&data[12..20]);
        let modified = decode_datetime(&data[20..28]);
        let version = read_u16(&data, 28);
        let master_eof = read_u32(&data, 38) as usize;
        if master_eof != 0 && master_eof != data.len() {
            tracing::warn!("Master EOF {} differs from archive length {}", master_eof, data.len());
        }

        let mut records = Vec::with_capacity(total.min(4096));
        let mut pos = MASTER_HEADER_LEN;
        for index in 0..total {
            let (record, next) = Self::parse_record(&data, pos, index)?;
            records.push(record);
            pos = next;
        }

        tracing::debug!("NuFX archive v{} with {} records", version, records.len());
        Ok(Self {
            data,
            name: String::new(),
            created,
            modified,
            version,
            records,
        })
    }

    /// Parse one record at `pos`, returning it and the offset of the next
    fn parse_record(data: &[u8], pos: usize, index: usize) -> Result<(Record, usize)> {
        if data.len() < pos + 58 || !data[pos..].starts_with(NUFX_RECORD_SIGNATURE) {
            return Err(truncated(&format!("record {} header", index)));
        }
        let h = &data[pos..];
        let stored_crc = read_u16(h, 4);
        let attrib_count = read_u16(h, 6) as usize;
        let version = read_u16(h, 8);
        let thread_count = read_u32(h, 10) as usize;
        if attrib_count < 58 || data.len() < pos + attrib_count {
            return Err(truncated(&format!("record {} attributes", index)));
        }
        let separator = (read_u16(h, 16) & 0xFF) as u8;
        let name_len = read_u16(h, attrib_count - 2) as usize;
        let name_end = attrib_count + name_len;
        let threads_end = name_end + thread_count * THREAD_HEADER_LEN;
        if data.len() < pos + threads_end {
            return Err(truncated(&format!("record {} thread headers", index)));
        }

        let computed = crc16(0, &h[6..threads_end]);
        if stored_crc != computed {
            tracing::warn!(
                "Record {} header CRC mismatch: stored {:04X}, computed {:04X}",
                index,
                stored_crc,
                computed
            );
        }

        let mut threads = Vec::with_capacity(thread_count);
        let mut offset = pos + threads_end;
        for i in 0..thread_count {
            let t = &h[name_end + i * THREAD_HEADER_LEN..];
            let thread = Thread {
                class: read_u16(t, 0),
                format: ThreadFormat::from_code(read_u16(t, 2)),
                kind: read_u16(t, 4),
                crc: read_u16(t, 6),
                eof: read_u32(t, 8),
                comp_eof: read_u32(t, 12),
                offset,
            };
            offset += thread.comp_eof as usize;
            threads.push(thread);
        }
        if offset > data.len() {
            return Err(truncated(&format!("record {} thread data", index)));
        }

        let raw_name = match threads.iter().find(|t| t.class == class::FILENAME) {
            Some(t) => {
                let len = (t.eof as usize).min(t.comp_eof as usize);
                data[t.offset..t.offset + len].to_vec()
            }
            None => h[attrib_count..name_end].to_vec(),
        };
        let name = raw_name
            .iter()
            .map(|&b| {
                if separator != 0 && b == separator {
                    '/'
                } else {
                    (b & 0x7F) as char
                }
            })
            .collect::<String>();

        let record = Record {
            index,
            name,
            version,
            file_sys_id: read_u16(h, 14),
            access: read_u32(h, 18),
            file_type: read_u32(h, 22),
            extra_type: read_u32(h, 26),
            storage_type: read_u16(h, 30),
            created: decode_datetime(&h[32..40]),
            modified: decode_datetime(&h[40..48]),
            archived: decode_datetime(&h[48..56]),
            threads,
        };
        Ok((record, offset))
    }

    /// Name the archive (shown as the root directory)
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Records in archive order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Master header version
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Archive creation date
    pub fn created(&self) -> Option<NaiveDateTime> {
        self.created
    }

    /// Archive modification date
    pub fn modified(&self) -> Option<NaiveDateTime> {
        self.modified
    }

    /// Length of the archive in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Archive holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decompress a thread, verifying its CRC where the record carries one
    pub fn extract_thread(&self, record: &Record, thread: &Thread) -> Result<Vec<u8>> {
        let stored = &self.data[thread.offset..thread.offset + thread.comp_eof as usize];
        let eof = record.thread_len(thread);
        if eof > MAX_THREAD_LEN {
            return Err(DiskError::corrupt_archive(
                format!("{}: thread claims {} bytes", record.name, eof),
                Vec::new(),
            ));
        }
        let data = match thread.format {
            ThreadFormat::Uncompressed => {
                if stored.len() < eof {
                    return Err(DiskError::corrupt_archive(
                        format!("{}: stored thread shorter than its EOF", record.name),
                        stored.to_vec(),
                    ));
                }
                stored[..eof].to_vec()
            }
            ThreadFormat::Squeeze => squeeze::unsqueeze(stored, eof)?,
            ThreadFormat::Lzw1 => lzw::expand_lzw1(stored, eof)?,
            ThreadFormat::Lzw2 => lzw::expand_lzw2(stored, eof)?,
            ThreadFormat::Other(_) => {
                return Err(DiskError::unsupported(format!(
                    "{} compression in {}",
                    thread.format.name(),
                    record.name
                )));
            }
        };

        if record.version >= 3 {
            let computed = crc16(0xFFFF, &data);
            if computed != thread.crc {
                tracing::warn!(
                    "{}: thread CRC mismatch, stored {:04X}, computed {:04X}",
                    record.name,
                    thread.crc,
                    computed
                );
                return Err(DiskError::corrupt_archive(
                    format!("{}: thread CRC mismatch", record.name),
                    data,
                ));
            }
        }
        Ok(data)
    }

    /// Data fork (or disk image) of a record
    pub fn extract(&self, record: &Record) -> Result<Vec<u8>> {
        match record.data_thread() {
            Some(thread) => self.extract_thread(record, thread),
            None => Ok(Vec::new()),
        }
    }

    /// Resource fork of a record, empty when there is none
    pub fn extract_resource_fork(&self, record: &Record) -> Result<Vec<u8>> {
        match record.resource_thread() {
            Some(thread) => self.extract_thread(record, thread),
            None => Ok(Vec::new()),
        }
    }

    /// Comment attached to a record
    pub fn comment(&self, record: &Record) -> Option<String> {
        let thread = record
            .threads
            .iter()
            .find(|t| t.class == class::MESSAGE && t.kind == 1)?;
        let len = (thread.eof as usize).min(thread.comp_eof as usize);
        let text = &self.data[thread.offset..thread.offset + len];
        Some(text.iter().map(|&b| if b == b'\r' { '\n' } else { (b & 0x7F) as char }).collect())
    }

    fn record_for(&self, entry: &DirectoryEntry) -> Result<&Record> {
        self.records
            .get(entry.first_block as usize)
            .filter(|r| r.name == entry.name)
            .ok_or_else(|| DiskError::FileNotFound(entry.name.clone()))
    }

    fn to_directory_entry(&self, record: &Record) -> DirectoryEntry {
        let stored: u64 = record.threads.iter().map(|t| t.comp_eof as u64).sum();
        DirectoryEntry {
            name: record.name.clone(),
            is_directory: false,
            file_type: record.file_type as u8,
            aux_type: record.extra_type as u16,
            size_bytes: record.data_len(),
            blocks_used: stored.div_ceil(BLOCK_SIZE as u64) as u32,
            storage: StorageType::Archived,
            dos_type: None,
            created_at: record.created,
            modified_at: record.modified,
            first_block: record.index as u32,
            locked: record.is_locked(),
            location: Some(EntryLocation {
                dir_key: 0,
                block: record.index as u32,
                slot: 0,
            }),
        }
    }
}

impl FileSystem for NufxArchive {
    fn fs_type(&self) -> FileSystemType {
        FileSystemType::Nufx
    }

    fn root(&self) -> DirectoryEntry {
        DirectoryEntry {
            name: self.name.clone(),
            is_directory: true,
            file_type: 0x0F,
            aux_type: 0,
            size_bytes: self.data.len() as u64,
            blocks_used: self.records.len() as u32,
            storage: StorageType::Directory,
            dos_type: None,
            created_at: self.created,
            modified_at: self.modified,
            first_block: 0,
            locked: false,
            location: None,
        }
    }

    fn list(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        if !dir.is_directory || dir.location.is_some() {
            return Err(DiskError::NotADirectory(dir.name.clone()));
        }
        Ok(self.records.iter().map(|r| self.to_directory_entry(r)).collect())
    }

    fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        self.extract(self.record_for(entry)?)
    }

    fn read_resource_fork(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        self.extract_resource_fork(self.record_for(entry)?)
    }

    fn info(&self) -> Result<FileSystemInfo> {
        Ok(FileSystemInfo {
            fs_type: FileSystemType::Nufx,
            volume_name: self.name.clone(),
            total_blocks: self.data.len().div_ceil(BLOCK_SIZE) as u32,
            free_blocks: 0,
            block_size: BLOCK_SIZE,
        })
    }

    fn usage(&self) -> Result<Vec<bool>> {
        Ok(vec![true; self.data.len().div_ceil(BLOCK_SIZE)])
    }

    /// Archive pathnames are matched whole
    fn lookup(&self, path: &str) -> Result<DirectoryEntry> {
        let wanted = path.trim_start_matches('/');
        if wanted.is_empty() {
            return Ok(self.root());
        }
        self.records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(wanted))
            .map(|r| self.to_directory_entry(r))
            .ok_or_else(|| DiskError::FileNotFound(path.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::constants::{write_u16, write_u32};

    /// Thread to place in a test record: class, format, kind, eof, stored bytes
    pub(crate) struct TestThread {
        pub class: u16,
        pub format: u16,
        pub kind: u16,
        pub eof: u32,
        pub data: Vec<u8>,
    }

    impl TestThread {
        pub(crate) fn stored(class: u16, kind: u16, data: &[u8]) -> Self {
            Self {
                class,
                format: 0,
                kind,
                eof: data.len() as u32,
                data: data.to_vec(),
            }
        }
    }

    /// Build a version 3 record with a filename thread
    pub(crate) fn record(name: &str, file_type: u32, aux: u32, threads: Vec<TestThread>) -> Vec<u8> {
        let mut all = vec![TestThread::stored(class::FILENAME, 0, name.as_bytes())];
        all.extend(threads);

        let attrib_count = 58usize;
        let mut h = vec![0u8; attrib_count];
        h[0..4].copy_from_slice(NUFX_RECORD_SIGNATURE);
        write_u16(&mut h, 6, attrib_count as u16);
        write_u16(&mut h, 8, 3);
        write_u32(&mut h, 10, all.len() as u32);
        write_u16(&mut h, 14, 1);
        write_u16(&mut h, 16, b'/' as u16);
        write_u32(&mut h, 18, 0xE3);
        write_u32(&mut h, 22, file_type);
        write_u32(&mut h, 26, aux);
        write_u16(&mut h, 30, 1);
        // 4 July 1991 12:30:00
        h[40..46].copy_from_slice(&[0, 30, 12, 91, 3, 6]);

        let mut data: Vec<u8> = Vec::new();
        for t in &all {
            let mut th = vec![0u8; THREAD_HEADER_LEN];
            write_u16(&mut th, 0, t.class);
            write_u16(&mut th, 2, t.format);
            write_u16(&mut th, 4, t.kind);
            let plain_crc = if t.format == 0 { crc16(0xFFFF, &t.data[..t.eof as usize]) } else { 0 };
            write_u16(&mut th, 6, plain_crc);
            write_u32(&mut th, 8, t.eof);
            write_u32(&mut th, 12, t.data.len() as u32);
            h.extend(th);
            data.extend(&t.data);
        }
        let crc = crc16(0, &h[6..]);
        write_u16(&mut h, 4, crc);
        h.extend(data);
        h
    }

    /// Wrap records in a master header
    pub(crate) fn archive(records: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0u8; MASTER_HEADER_LEN];
        out[0..6].copy_from_slice(NUFX_MASTER_SIGNATURE);
        write_u32(&mut out, 8, records.len() as u32);
        write_u16(&mut out, 28, 2);
        for r in records {
            out.extend(r);
        }
        let len = out.len() as u32;
        write_u32(&mut out, 38, len);
        let crc = crc16(0, &out[8..MASTER_HEADER_LEN]);
        write_u16(&mut out, 6, crc);
        out
    }

    #[test]
    fn test_bit_reader() {
        let mut bits = BitReader::new(&[0b1010_1100, 0xFF]);
        assert_eq!(bits.read(3), Some(0b100));
        assert_eq!(bits.read(9), Some(0b1111_1010_1));
        assert_eq!(bits.bytes_consumed(), 2);
        assert_eq!(bits.read(5), None);
    }

    #[test]
    fn test_decode_datetime() {
        let dt = decode_datetime(&[0, 30, 12, 91, 3, 6, 0, 0]).unwrap();
        assert_eq!(dt.to_string(), "1991-07-04 12:30:00");
        assert_eq!(
            decode_datetime(&[0, 0, 0, 5, 0, 0, 0, 0]).map(|d| d.date()),
            NaiveDate::from_ymd_opt(2005, 1, 1)
        );
        assert!(decode_datetime(&[0; 8]).is_none());
    }

    #[test]
    fn test_parse_and_extract() {
        let bytes = archive(&[
            record(
                "DOCS/README",
                0x04,
                0,
                vec![TestThread::stored(class::DATA, data_kind::DATA_FORK, b"Hello from ShrinkIt")],
            ),
            record(
                "ICON",
                0xCA,
                0,
                vec![
                    TestThread::stored(class::DATA, data_kind::DATA_FORK, &[1, 2, 3]),
                    TestThread::stored(class::DATA, data_kind::RESOURCE_FORK, &[9; 40]),
                ],
            ),
        ]);
        let archive = NufxArchive::from_bytes(bytes).unwrap().with_name("TEST.SHK");
        assert_eq!(archive.records().len(), 2);

        let listing = archive.list(&archive.root()).unwrap();
        assert_eq!(listing[0].name, "DOCS/README");
        assert_eq!(listing[0].storage, StorageType::Archived);
        assert_eq!(listing[0].size_bytes, 19);
        assert_eq!(listing[0].modified_at.map(|d| d.to_string()).as_deref(), Some("1991-07-04 12:30:00"));
        assert_eq!(archive.read_file(&listing[0]).unwrap(), b"Hello from ShrinkIt");

        let icon = archive.lookup("icon").unwrap();
        assert_eq!(icon.first_block, 1);
        assert_eq!(archive.read_file(&icon).unwrap(), vec![1, 2, 3]);
        assert_eq!(archive.read_resource_fork(&icon).unwrap(), vec![9; 40]);
        assert!(archive.lookup("/DOCS/README").is_ok());
    }

    #[test]
    fn test_lzw1_thread() {
        let text: Vec<u8> = b"THE QUICK BROWN FOX ".iter().cycle().take(6000).copied().collect();
        let stream = lzw::tests::lzw1_stream(&text);
        let mut thread = TestThread::stored(class::DATA, data_kind::DATA_FORK, &stream);
        thread.format = 2;
        thread.eof = text.len() as u32;
        let mut bytes = archive(&[record("BOOK", 0x04, 0, vec![thread])]);

        // The thread CRC is over the uncompressed data
        let archive_ok = {
            let crc_at = MASTER_HEADER_LEN + 58 + THREAD_HEADER_LEN + 6;
            write_u16(&mut bytes, crc_at, crc16(0xFFFF, &text));
            NufxArchive::from_bytes(bytes).unwrap()
        };
        let entry = archive_ok.lookup("BOOK").unwrap();
        assert_eq!(entry.size_bytes, 6000);
        assert_eq!(archive_ok.read_file(&entry).unwrap(), text);
    }

    #[test]
    fn test_thread_crc_mismatch() {
        let mut bytes = archive(&[record(
            "DATA",
            0x06,
            0,
            vec![TestThread::stored(class::DATA, data_kind::DATA_FORK, b"PAYLOAD")],
        )]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let archive = NufxArchive::from_bytes(bytes).unwrap();
        let entry = archive.lookup("DATA").unwrap();
        match archive.read_file(&entry) {
            Err(DiskError::CorruptArchive { partial, .. }) => assert_eq!(partial, b"PAYLOAE"),
            other => panic!("expected CRC failure, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_format() {
        let mut thread = TestThread::stored(class::DATA, data_kind::DATA_FORK, &[0; 8]);
        thread.format = 5;
        let archive = NufxArchive::from_bytes(archive(&[record("ODD", 0x06, 0, vec![thread])])).unwrap();
        let entry = archive.lookup("ODD").unwrap();
        assert!(matches!(
            archive.read_file(&entry),
            Err(DiskError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_read_only() {
        let mut archive = NufxArchive::from_bytes(archive(&[])).unwrap();
        let root = archive.root();
        assert!(archive.is_empty());
        assert!(matches!(
            archive.create_file(&root, "NEW", 0x04, 0, b""),
            Err(DiskError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_truncated_archive() {
        let bytes = archive(&[record(
            "DATA",
            0x06,
            0,
            vec![TestThread::stored(class::DATA, data_kind::DATA_FORK, &[7; 100])],
        )]);
        let cut = bytes[..bytes.len() - 50].to_vec();
        assert!(matches!(
            NufxArchive::from_bytes(cut),
            Err(DiskError::CorruptArchive { .. })
        ));
        assert!(matches!(
            NufxArchive::from_bytes(b"not an archive at all, just some words here....".to_vec()),
            Err(DiskError::UnrecognizedFormat(_))
        ));
    }

    #[test]
    fn test_oversized_disk_image_thread() {
        // EOF 0 sizes the image from the aux type and storage type
        let thread = TestThread {
            class: class::DATA,
            format: 3,
            kind: data_kind::DISK_IMAGE,
            eof: 0,
            data: vec![0, 0xDB, 0, 0],
        };
        let bytes = archive(&[record("DISK", 0, 0xFFFF_FFFF, vec![thread])]);
        let archive = NufxArchive::from_bytes(bytes).unwrap();
        let entry = archive.lookup("DISK").unwrap();
        assert!(entry.size_bytes > MAX_THREAD_LEN as u64);
        match archive.read_file(&entry) {
            Err(DiskError::CorruptArchive { partial, .. }) => assert!(partial.is_empty()),
            other => panic!("expected CorruptArchive, got {:?}", other.map(|d| d.len())),
        }
    }
}
