/// DOS 3.3 filesystem implementation
///
/// DOS 3.3 addresses 256-byte sectors by track and sector. The Volume Table
/// of Contents (VTOC) at track 17 sector 0 holds the geometry, the catalog
/// head and the free-sector bitmap. The catalog is a fixed chain of sectors
/// holding 7 entries each; every file is a chain of track/sector list
/// sectors naming its data sectors in order.

use crate::error::{DiskError, Result};
use crate::filesystem::{
    DirectoryEntry, DosFileType, EntryLocation, FileSystem, FileSystemInfo, FileSystemType,
    StorageType,
};
use crate::filetypes;
use crate::format::constants::{read_u16, write_u16, SECTORS_PER_TRACK, SECTOR_SIZE};
use crate::image::{BlockSize, BlockStore, ChangeSet, DiskImage, Staging};
use std::collections::HashSet;
use std::ops::Range;

/// Track holding the VTOC and catalog
pub const VTOC_TRACK: u8 = 17;
/// Track/sector pairs in a full TS-list sector
pub const MAX_PAIRS: usize = 122;
/// Longest filename
pub const MAX_NAME_LEN: usize = 30;

const CATALOG_START: usize = 0x0B;
const CATALOG_ENTRY_LEN: usize = 35;
const ENTRIES_PER_SECTOR: usize = 7;
const TSLIST_START: usize = 0x0C;
const BITMAP_START: usize = 0x38;
const DELETED_TRACK: u8 = 0xFF;
const LOCK_BIT: u8 = 0x80;
/// Catalog sectors visited before the chain is declared corrupt
const MAX_CATALOG_SECTORS: usize = 64;

/// Check whether a sector looks like a DOS 3.3 VTOC
pub fn is_vtoc(sector: &[u8]) -> bool {
    if sector.len() < SECTOR_SIZE {
        return false;
    }
    let tracks = sector[0x34];
    (1..=50).contains(&tracks)
        && sector[0x35] as usize == SECTORS_PER_TRACK
        && read_u16(sector, 0x36) as usize == SECTOR_SIZE
        && sector[0x27] as usize == MAX_PAIRS
        && sector[0x01] != 0
        && sector[0x01] < tracks
        && (sector[0x02] as usize) < SECTORS_PER_TRACK
}

/// Logical unit of a track/sector pair
fn unit(track: u8, sector: u8) -> u32 {
    track as u32 * SECTORS_PER_TRACK as u32 + sector as u32
}

fn track_sector(unit: u32) -> (u8, u8) {
    (
        (unit / SECTORS_PER_TRACK as u32) as u8,
        (unit % SECTORS_PER_TRACK as u32) as u8,
    )
}

/// Volume Table of Contents
#[derive(Debug, Clone, PartialEq, Eq)]
struct Vtoc {
    raw: Vec<u8>,
}

impl Vtoc {
    fn parse(sector: Vec<u8>) -> Option<Self> {
        is_vtoc(&sector).then_some(Self { raw: sector })
    }

    fn catalog(&self) -> (u8, u8) {
        (self.raw[0x01], self.raw[0x02])
    }

    fn volume(&self) -> u8 {
        self.raw[0x06]
    }

    fn tracks(&self) -> u8 {
        self.raw[0x34]
    }

    fn bit(track: u8, sector: u8) -> (usize, u8) {
        let base = BITMAP_START + track as usize * 4;
        if sector >= 8 {
            (base, 1 << (sector - 8))
        } else {
            (base + 1, 1 << sector)
        }
    }

    fn is_free(&self, track: u8, sector: u8) -> bool {
        if track >= self.tracks() {
            return false;
        }
        let (offset, mask) = Self::bit(track, sector);
        self.raw[offset] & mask != 0
    }

    fn set_free(&mut self, track: u8, sector: u8) {
        if self.is_free(track, sector) {
            tracing::warn!("Double-free detected for T{}/S{}", track, sector);
        }
        let (offset, mask) = Self::bit(track, sector);
        self.raw[offset] |= mask;
    }

    fn set_used(&mut self, track: u8, sector: u8) {
        let (offset, mask) = Self::bit(track, sector);
        self.raw[offset] &= !mask;
    }

    fn free_count(&self) -> u32 {
        (0..self.tracks())
            .map(|t| {
                (0..SECTORS_PER_TRACK as u8)
                    .filter(|&s| self.is_free(t, s))
                    .count() as u32
            })
            .sum()
    }

    /// Allocate `count` sectors, searching outward from the catalog track
    fn allocate(&mut self, count: usize) -> Result<Vec<u32>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let catalog = self.catalog().0;
        let order = (catalog + 1..self.tracks()).chain((1..catalog).rev());
        let mut found = Vec::with_capacity(count);
        'search: for track in order {
            for sector in (0..SECTORS_PER_TRACK as u8).rev() {
                if self.is_free(track, sector) {
                    found.push((track, sector));
                    if found.len() == count {
                        break 'search;
                    }
                }
            }
        }
        if found.len() < count {
            return Err(DiskError::VolumeFull);
        }

        for &(track, sector) in &found {
            self.set_used(track, sector);
        }
        if let Some(&(last, _)) = found.last() {
            self.raw[0x30] = last;
            self.raw[0x31] = if last > catalog { 0x01 } else { 0xFF };
        }
        tracing::debug!("Allocated {} sectors starting at T{}/S{}", count, found[0].0, found[0].1);
        Ok(found.into_iter().map(|(t, s)| unit(t, s)).collect())
    }
}

/// Live catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct CatalogEntry {
    tsl_track: u8,
    tsl_sector: u8,
    type_byte: u8,
    name: [u8; MAX_NAME_LEN],
    sector_count: u16,
}

impl CatalogEntry {
    fn offset(slot: usize) -> usize {
        CATALOG_START + slot * CATALOG_ENTRY_LEN
    }

    /// Parse a slot; unused and deleted slots give `None`
    fn parse(sector: &[u8], slot: usize) -> Option<Self> {
        let e = &sector[Self::offset(slot)..Self::offset(slot) + CATALOG_ENTRY_LEN];
        if e[0] == 0 || e[0] == DELETED_TRACK {
            return None;
        }
        let mut name = [0u8; MAX_NAME_LEN];
        name.copy_from_slice(&e[3..3 + MAX_NAME_LEN]);
        Some(Self {
            tsl_track: e[0],
            tsl_sector: e[1],
            type_byte: e[2],
            name,
            sector_count: read_u16(e, 0x21),
        })
    }

    fn write(&self, sector: &mut [u8], slot: usize) {
        let e = &mut sector[Self::offset(slot)..Self::offset(slot) + CATALOG_ENTRY_LEN];
        e[0] = self.tsl_track;
        e[1] = self.tsl_sector;
        e[2] = self.type_byte;
        e[3..3 + MAX_NAME_LEN].copy_from_slice(&self.name);
        write_u16(e, 0x21, self.sector_count);
    }

    fn display_name(&self) -> String {
        let text: String = self.name.iter().map(|&b| (b & 0x7F) as char).collect();
        text.trim_end().to_string()
    }

    fn dos_type(&self) -> DosFileType {
        DosFileType::from_code(self.type_byte)
    }

    fn is_locked(&self) -> bool {
        self.type_byte & LOCK_BIT != 0
    }

    fn tsl_unit(&self) -> u32 {
        unit(self.tsl_track, self.tsl_sector)
    }
}

/// Check a DOS 3.3 filename and encode it as padded high ASCII
fn encode_name(name: &str) -> Result<[u8; MAX_NAME_LEN]> {
    let name = name.trim_end();
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| (' '..='~').contains(&c) && c != ',');
    if !valid {
        return Err(DiskError::InvalidName(name.to_string()));
    }
    let mut out = [0xA0u8; MAX_NAME_LEN];
    for (slot, b) in out.iter_mut().zip(name.bytes()) {
        *slot = b | 0x80;
    }
    Ok(out)
}

/// Stored form of a file: the type's header followed by its contents
///
/// Binary files start with the load address and length, BASIC programs with
/// the length. Text ends at the first `$00` and the remaining types have no
/// length record at all, so contents those layouts cannot give back
/// unchanged are refused.
fn encode_contents(dos_type: DosFileType, aux_type: u16, data: &[u8]) -> Result<Vec<u8>> {
    let mut header = match dos_type {
        DosFileType::Binary => vec![0u8; 4],
        DosFileType::Applesoft | DosFileType::Integer => vec![0u8; 2],
        DosFileType::Text => {
            if data.contains(&0) {
                return Err(DiskError::unsupported("DOS 3.3 text file containing $00"));
            }
            Vec::new()
        }
        _ => {
            if data.len() % SECTOR_SIZE != 0 {
                return Err(DiskError::unsupported(format!(
                    "{} bytes in a DOS 3.3 type {} file (whole sectors only)",
                    data.len(),
                    dos_type.letter()
                )));
            }
            Vec::new()
        }
    };
    if !header.is_empty() {
        let len = u16::try_from(data.len()).map_err(|_| DiskError::FileTooLarge(data.len() as u64))?;
        let at = header.len() - 2;
        write_u16(&mut header, at, len);
        if dos_type == DosFileType::Binary {
            write_u16(&mut header, 0, aux_type);
        }
    }
    header.extend_from_slice(data);
    Ok(header)
}

/// Span of the contents within a stored file, and its load address
fn decode_contents(dos_type: DosFileType, raw: &[u8]) -> (Range<usize>, u16) {
    let (start, declared, aux) = match dos_type {
        DosFileType::Binary if raw.len() >= 4 => (4, read_u16(raw, 2) as usize, read_u16(raw, 0)),
        DosFileType::Applesoft | DosFileType::Integer if raw.len() >= 2 => {
            (2, read_u16(raw, 0) as usize, 0)
        }
        DosFileType::Binary | DosFileType::Applesoft | DosFileType::Integer => {
            return (raw.len()..raw.len(), 0)
        }
        DosFileType::Text => {
            return (0..raw.iter().position(|&b| b == 0).unwrap_or(raw.len()), 0)
        }
        _ => return (0..raw.len(), 0),
    };
    if start + declared > raw.len() {
        tracing::warn!("Header declares {} bytes but only {} follow", declared, raw.len() - start);
    }
    (start..(start + declared).min(raw.len()), aux)
}

/// Format a blank DOS 3.3 volume onto a 256-byte sector store
pub fn format(store: &mut BlockStore, volume: u8) -> Result<()> {
    if store.block_size() != BlockSize::Sector256 {
        return Err(DiskError::unsupported("DOS 3.3 on a 512-byte block store"));
    }
    let tracks = store.block_count() as usize / SECTORS_PER_TRACK;
    if tracks <= VTOC_TRACK as usize || tracks > 50 {
        return Err(DiskError::unsupported(format!("DOS 3.3 volume with {} tracks", tracks)));
    }

    let mut vtoc = vec![0u8; SECTOR_SIZE];
    vtoc[0x00] = 0x04;
    vtoc[0x01] = VTOC_TRACK;
    vtoc[0x02] = (SECTORS_PER_TRACK - 1) as u8;
    vtoc[0x03] = 0x03;
    vtoc[0x06] = volume;
    vtoc[0x27] = MAX_PAIRS as u8;
    vtoc[0x30] = VTOC_TRACK + 1;
    vtoc[0x31] = 0x01;
    vtoc[0x34] = tracks as u8;
    vtoc[0x35] = SECTORS_PER_TRACK as u8;
    write_u16(&mut vtoc, 0x36, SECTOR_SIZE as u16);
    // Everything free except the boot track and the catalog track
    for track in 1..tracks {
        if track != VTOC_TRACK as usize {
            vtoc[BITMAP_START + track * 4] = 0xFF;
            vtoc[BITMAP_START + track * 4 + 1] = 0xFF;
        }
    }

    let mut staging = store.staging();
    staging.write(unit(VTOC_TRACK, 0), vtoc)?;
    for sector in 1..SECTORS_PER_TRACK as u8 {
        let mut buf = vec![0u8; SECTOR_SIZE];
        if sector > 1 {
            buf[0x01] = VTOC_TRACK;
            buf[0x02] = sector - 1;
        }
        staging.write(unit(VTOC_TRACK, sector), buf)?;
    }
    let changes = staging.finish();
    store.apply(changes)?;
    tracing::debug!("Formatted DOS 3.3 volume {} with {} tracks", volume, tracks);
    Ok(())
}

/// One mutating operation: staged sectors plus the working VTOC
struct Session<'a> {
    staging: Staging<'a>,
    vtoc: Vtoc,
}

impl<'a> Session<'a> {
    fn read(&self, unit: u32) -> Result<Vec<u8>> {
        self.staging.read(unit)
    }

    fn write(&mut self, unit: u32, data: Vec<u8>) -> Result<()> {
        self.staging.write(unit, data)
    }

    fn free(&mut self, unit: u32) {
        let (track, sector) = track_sector(unit);
        self.vtoc.set_free(track, sector);
    }

    fn finish(mut self) -> Result<ChangeSet> {
        let vtoc_unit = unit(VTOC_TRACK, 0);
        if self.staging.read(vtoc_unit)? != self.vtoc.raw {
            self.staging.write(vtoc_unit, self.vtoc.raw.clone())?;
        }
        Ok(self.staging.finish())
    }
}

/// DOS 3.3 volume bound to a sector store
#[derive(Debug, Clone)]
pub struct Dos33FileSystem {
    store: BlockStore,
    volume: u8,
    tracks: u8,
    catalog: u32,
}

impl Dos33FileSystem {
    /// Mount a DOS 3.3 volume from an image
    pub fn open(image: DiskImage) -> Result<Self> {
        let store = BlockStore::new(image, BlockSize::Sector256);
        let vtoc_unit = unit(VTOC_TRACK, 0);
        if store.block_count() <= vtoc_unit {
            return Err(DiskError::UnrecognizedFilesystem);
        }
        let vtoc = Vtoc::parse(store.read_block(vtoc_unit)?).ok_or(DiskError::UnrecognizedFilesystem)?;
        let tracks = vtoc.tracks();
        if unit(tracks, 0) > store.block_count() {
            return Err(DiskError::corrupt(format!(
                "VTOC claims {} tracks but image holds {} sectors",
                tracks,
                store.block_count()
            )));
        }
        let (track, sector) = vtoc.catalog();

        tracing::debug!("Mounted DOS 3.3 volume {} ({} tracks)", vtoc.volume(), tracks);
        Ok(Self {
            store,
            volume: vtoc.volume(),
            tracks,
            catalog: unit(track, sector),
        })
    }

    /// Volume number from the VTOC
    pub fn volume_number(&self) -> u8 {
        self.volume
    }

    /// Tracks on the volume
    pub fn tracks(&self) -> u8 {
        self.tracks
    }

    /// Borrow the sector store
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut BlockStore {
        &mut self.store
    }

    /// Give back the image
    pub fn into_image(self) -> DiskImage {
        self.store.into_image()
    }

    fn total_sectors(&self) -> u32 {
        unit(self.tracks, 0)
    }

    fn session(&self) -> Result<Session<'_>> {
        let staging = self.store.staging();
        let vtoc = Vtoc::parse(staging.read(unit(VTOC_TRACK, 0))?)
            .ok_or_else(|| DiskError::corrupt("VTOC no longer valid"))?;
        Ok(Session { staging, vtoc })
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<()> {
        self.store.apply(changes)
    }

    /// Unit of a track/sector pair read from disk, checked against the geometry
    fn checked_unit(&self, track: u8, sector: u8) -> Result<u32> {
        if track >= self.tracks || sector as usize >= SECTORS_PER_TRACK {
            return Err(DiskError::corrupt(format!(
                "T{}/S{} lies outside the volume",
                track, sector
            )));
        }
        Ok(unit(track, sector))
    }

    fn check_root(&self, dir: &DirectoryEntry) -> Result<()> {
        if !dir.is_directory {
            return Err(DiskError::NotADirectory(dir.name.clone()));
        }
        if dir.first_block != self.catalog {
            return Err(DiskError::FileNotFound(dir.name.clone()));
        }
        Ok(())
    }

    /// Catalog sectors in chain order
    fn catalog_sectors(&self, staging: &Staging<'_>) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        let mut next = Some(self.catalog);
        while let Some(current) = next {
            if out.contains(&current) || out.len() >= MAX_CATALOG_SECTORS {
                return Err(DiskError::corrupt(format!(
                    "catalog chain loops at sector {}",
                    current
                )));
            }
            out.push(current);
            let sector = staging.read(current)?;
            next = match sector[0x01] {
                0 => None,
                track => Some(self.checked_unit(track, sector[0x02])?),
            };
        }
        Ok(out)
    }

    fn entries(&self, staging: &Staging<'_>) -> Result<Vec<(EntryLocation, CatalogEntry)>> {
        let mut out = Vec::new();
        for block in self.catalog_sectors(staging)? {
            let sector = staging.read(block)?;
            for slot in 0..ENTRIES_PER_SECTOR {
                if let Some(ce) = CatalogEntry::parse(&sector, slot) {
                    let loc = EntryLocation {
                        dir_key: self.catalog,
                        block,
                        slot: slot as u16,
                    };
                    out.push((loc, ce));
                }
            }
        }
        Ok(out)
    }

    /// Re-read the catalog slot an entry handle points at
    fn locate(&self, staging: &Staging<'_>, entry: &DirectoryEntry) -> Result<(EntryLocation, CatalogEntry)> {
        let loc = entry
            .location
            .ok_or_else(|| DiskError::FileNotFound(entry.name.clone()))?;
        if loc.block >= self.total_sectors() || loc.slot as usize >= ENTRIES_PER_SECTOR {
            return Err(DiskError::FileNotFound(entry.name.clone()));
        }
        let sector = staging.read(loc.block)?;
        match CatalogEntry::parse(&sector, loc.slot as usize) {
            Some(ce) if ce.display_name() == entry.name && ce.tsl_unit() == entry.first_block => Ok((loc, ce)),
            _ => Err(DiskError::FileNotFound(entry.name.clone())),
        }
    }

    fn check_unique(&self, staging: &Staging<'_>, name: &str, except: Option<EntryLocation>) -> Result<()> {
        let clash = self
            .entries(staging)?
            .into_iter()
            .any(|(loc, ce)| Some(loc) != except && ce.display_name().eq_ignore_ascii_case(name));
        if clash {
            return Err(DiskError::NameCollision(name.to_string()));
        }
        Ok(())
    }

    fn free_slot(&self, staging: &Staging<'_>) -> Result<EntryLocation> {
        for block in self.catalog_sectors(staging)? {
            let sector = staging.read(block)?;
            for slot in 0..ENTRIES_PER_SECTOR {
                let first = sector[CatalogEntry::offset(slot)];
                if first == 0 || first == DELETED_TRACK {
                    return Ok(EntryLocation {
                        dir_key: self.catalog,
                        block,
                        slot: slot as u16,
                    });
                }
            }
        }
        Err(DiskError::DirectoryFull)
    }

    fn write_entry(s: &mut Session<'_>, loc: EntryLocation, ce: &CatalogEntry) -> Result<()> {
        let mut sector = s.read(loc.block)?;
        ce.write(&mut sector, loc.slot as usize);
        s.write(loc.block, sector)
    }

    /// TS-list sectors of a file in chain order
    fn ts_lists(&self, staging: &Staging<'_>, first: u32) -> Result<Vec<(u32, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first);
        while let Some(current) = next {
            if !visited.insert(current) {
                return Err(DiskError::corrupt(format!(
                    "TS-list chain loops at sector {}",
                    current
                )));
            }
            let sector = staging.read(current)?;
            next = match sector[0x01] {
                0 => None,
                track => Some(self.checked_unit(track, sector[0x02])?),
            };
            out.push((current, sector));
        }
        Ok(out)
    }

    /// Data sectors named by a TS-list chain; `None` marks a sparse hole
    fn data_sectors(&self, lists: &[(u32, Vec<u8>)]) -> Result<Vec<Option<u32>>> {
        let mut out = Vec::new();
        for (_, list) in lists {
            for pair in list[TSLIST_START..TSLIST_START + MAX_PAIRS * 2].chunks(2) {
                out.push(match pair[0] {
                    0 => None,
                    track => Some(self.checked_unit(track, pair[1])?),
                });
            }
        }
        while out.last() == Some(&None) {
            out.pop();
        }
        Ok(out)
    }

    fn read_sectors(staging: &Staging<'_>, sectors: &[Option<u32>]) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(sectors.len() * SECTOR_SIZE);
        for sector in sectors {
            match sector {
                Some(n) => data.extend(staging.read(*n)?),
                None => data.extend([0u8; SECTOR_SIZE]),
            }
        }
        Ok(data)
    }

    fn read_raw(&self, staging: &Staging<'_>, ce: &CatalogEntry) -> Result<Vec<u8>> {
        let first = self.checked_unit(ce.tsl_track, ce.tsl_sector)?;
        let lists = self.ts_lists(staging, first)?;
        Self::read_sectors(staging, &self.data_sectors(&lists)?)
    }

    /// File contents with the type header stripped, and the load address
    fn contents(&self, staging: &Staging<'_>, ce: &CatalogEntry) -> Result<(Vec<u8>, u16)> {
        let mut raw = self.read_raw(staging, ce)?;
        let (span, aux_type) = decode_contents(ce.dos_type(), &raw);
        raw.truncate(span.end);
        raw.drain(..span.start);
        Ok((raw, aux_type))
    }

    fn free_chain(&self, s: &mut Session<'_>, ce: &CatalogEntry) -> Result<()> {
        let first = self.checked_unit(ce.tsl_track, ce.tsl_sector)?;
        let lists = self.ts_lists(&s.staging, first)?;
        for n in self.data_sectors(&lists)?.into_iter().flatten() {
            s.free(n);
        }
        for (n, _) in lists {
            s.free(n);
        }
        Ok(())
    }

    /// Allocate and write a TS-list chain holding `data`
    ///
    /// Returns the first TS-list sector and the total sectors used.
    fn write_chain(s: &mut Session<'_>, data: &[u8]) -> Result<(u32, u16)> {
        let sectors: Vec<&[u8]> = data.chunks(SECTOR_SIZE).collect();
        let empty: [&[u8]; 0] = [];
        let groups: Vec<&[&[u8]]> = if sectors.is_empty() {
            vec![&empty[..]]
        } else {
            sectors.chunks(MAX_PAIRS).collect()
        };
        let total = groups.len() + sectors.len();
        if total > u16::MAX as usize {
            return Err(DiskError::FileTooLarge(data.len() as u64));
        }
        let mut units = s.vtoc.allocate(total)?.into_iter();

        let mut lists = Vec::with_capacity(groups.len());
        for (i, group) in groups.iter().enumerate() {
            let list_unit = units.next().ok_or(DiskError::VolumeFull)?;
            let mut list = vec![0u8; SECTOR_SIZE];
            write_u16(&mut list, 0x05, (i * MAX_PAIRS) as u16);
            for (j, chunk) in group.iter().enumerate() {
                let data_unit = units.next().ok_or(DiskError::VolumeFull)?;
                let mut buf = vec![0u8; SECTOR_SIZE];
                buf[..chunk.len()].copy_from_slice(chunk);
                s.write(data_unit, buf)?;
                let (track, sector) = track_sector(data_unit);
                list[TSLIST_START + j * 2] = track;
                list[TSLIST_START + j * 2 + 1] = sector;
            }
            lists.push((list_unit, list));
        }
        for i in 1..lists.len() {
            let (track, sector) = track_sector(lists[i].0);
            lists[i - 1].1[0x01] = track;
            lists[i - 1].1[0x02] = sector;
        }
        let first = lists[0].0;
        for (n, list) in lists {
            s.write(n, list)?;
        }
        Ok((first, total as u16))
    }

    fn to_directory_entry(&self, staging: &Staging<'_>, loc: EntryLocation, ce: &CatalogEntry) -> DirectoryEntry {
        let dos = ce.dos_type();
        let (size_bytes, aux_type) = match self.contents(staging, ce) {
            Ok((data, aux_type)) => (data.len() as u64, aux_type),
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", ce.display_name(), e);
                (0, 0)
            }
        };
        DirectoryEntry {
            name: ce.display_name(),
            is_directory: false,
            file_type: filetypes::prodos_type_for_dos(dos),
            aux_type,
            size_bytes,
            blocks_used: ce.sector_count as u32,
            storage: StorageType::TrackSectorList,
            dos_type: Some(dos),
            created_at: None,
            modified_at: None,
            first_block: ce.tsl_unit(),
            locked: ce.is_locked(),
            location: Some(loc),
        }
    }

    fn refresh(&self, loc: EntryLocation) -> Result<DirectoryEntry> {
        let staging = self.store.staging();
        let sector = staging.read(loc.block)?;
        let ce = CatalogEntry::parse(&sector, loc.slot as usize)
            .ok_or_else(|| DiskError::corrupt("entry vanished after commit"))?;
        Ok(self.to_directory_entry(&staging, loc, &ce))
    }

    /// Create a file with a native DOS 3.3 type
    ///
    /// `aux_type` is the load address of a Binary file and is ignored for
    /// the other types.
    pub fn create_typed(
        &mut self,
        name: &str,
        dos_type: DosFileType,
        aux_type: u16,
        data: &[u8],
    ) -> Result<DirectoryEntry> {
        let encoded = encode_name(name)?;
        let stored = encode_contents(dos_type, aux_type, data)?;
        let mut s = self.session()?;
        self.check_unique(&s.staging, name.trim_end(), None)?;
        let loc = self.free_slot(&s.staging)?;
        let (first, count) = Self::write_chain(&mut s, &stored)?;
        let (tsl_track, tsl_sector) = track_sector(first);
        let ce = CatalogEntry {
            tsl_track,
            tsl_sector,
            type_byte: dos_type.code(),
            name: encoded,
            sector_count: count,
        };
        Self::write_entry(&mut s, loc, &ce)?;

        let changes = s.finish()?;
        self.commit(changes)?;
        tracing::debug!("Created {} ({} bytes, {} sectors)", ce.display_name(), data.len(), count);
        self.refresh(loc)
    }

    /// Rewrite the native DOS 3.3 type of a file, keeping its load address
    pub fn set_dos_type(&mut self, entry: &DirectoryEntry, dos_type: DosFileType) -> Result<DirectoryEntry> {
        self.retype(entry, dos_type, None)
    }

    /// Change the type byte and re-encode the header in the sectors the
    /// file already owns
    ///
    /// Bytes past the new layout are zeroed. Fails without touching the
    /// volume when the re-encoded file does not fit those sectors or would
    /// read back differently.
    fn retype(
        &mut self,
        entry: &DirectoryEntry,
        dos_type: DosFileType,
        aux_type: Option<u16>,
    ) -> Result<DirectoryEntry> {
        let mut s = self.session()?;
        let (loc, mut ce) = self.locate(&s.staging, entry)?;
        if ce.is_locked() {
            return Err(DiskError::FileLocked(ce.display_name()));
        }
        let first = self.checked_unit(ce.tsl_track, ce.tsl_sector)?;
        let lists = self.ts_lists(&s.staging, first)?;
        let sectors = self.data_sectors(&lists)?;
        let raw = Self::read_sectors(&s.staging, &sectors)?;
        let (span, old_aux) = decode_contents(ce.dos_type(), &raw);
        let aux_type = aux_type.unwrap_or(old_aux);

        let unchanged = dos_type == ce.dos_type() && (dos_type != DosFileType::Binary || aux_type == old_aux);
        if !unchanged {
            let contents = &raw[span];
            let mut stored = encode_contents(dos_type, aux_type, contents)?;
            let fits = stored.len() <= raw.len() && !sectors.contains(&None);
            stored.resize(raw.len(), 0);
            if !fits || &stored[decode_contents(dos_type, &stored).0] != contents {
                return Err(DiskError::unsupported(format!(
                    "retyping {} as {} changes its length",
                    ce.display_name(),
                    dos_type.letter()
                )));
            }
            for (n, chunk) in sectors.iter().flatten().zip(stored.chunks(SECTOR_SIZE)) {
                s.write(*n, chunk.to_vec())?;
            }
        }
        ce.type_byte = dos_type.code();
        Self::write_entry(&mut s, loc, &ce)?;
        let changes = s.finish()?;
        self.commit(changes)?;
        tracing::debug!("Retyped {} as {} (${:04X})", ce.display_name(), dos_type.letter(), aux_type);
        self.refresh(loc)
    }
}

impl FileSystem for Dos33FileSystem {
    fn fs_type(&self) -> FileSystemType {
        FileSystemType::Dos33
    }

    fn root(&self) -> DirectoryEntry {
        DirectoryEntry {
            name: format!("DISK VOLUME {:03}", self.volume),
            is_directory: true,
            file_type: 0x0F,
            aux_type: 0,
            size_bytes: 0,
            blocks_used: 0,
            storage: StorageType::Directory,
            dos_type: None,
            created_at: None,
            modified_at: None,
            first_block: self.catalog,
            locked: false,
            location: None,
        }
    }

    fn list(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        self.check_root(dir)?;
        let staging = self.store.staging();
        Ok(self
            .entries(&staging)?
            .iter()
            .map(|(loc, ce)| self.to_directory_entry(&staging, *loc, ce))
            .collect())
    }

    fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        let staging = self.store.staging();
        let (_, ce) = self.locate(&staging, entry)?;
        Ok(self.contents(&staging, &ce)?.0)
    }

    fn info(&self) -> Result<FileSystemInfo> {
        let s = self.session()?;
        Ok(FileSystemInfo {
            fs_type: FileSystemType::Dos33,
            volume_name: self.root().name,
            total_blocks: self.total_sectors(),
            free_blocks: s.vtoc.free_count(),
            block_size: SECTOR_SIZE,
        })
    }

    fn usage(&self) -> Result<Vec<bool>> {
        let s = self.session()?;
        Ok((0..self.total_sectors())
            .map(|n| {
                let (track, sector) = track_sector(n);
                !s.vtoc.is_free(track, sector)
            })
            .collect())
    }

    fn create_file(
        &mut self,
        dir: &DirectoryEntry,
        name: &str,
        file_type: u8,
        aux_type: u16,
        data: &[u8],
    ) -> Result<DirectoryEntry> {
        self.check_root(dir)?;
        let dos_type = filetypes::dos_type_for_prodos(file_type).ok_or_else(|| {
            DiskError::unsupported(format!(
                "file type {} on DOS 3.3",
                filetypes::type_name(file_type)
            ))
        })?;
        self.create_typed(name, dos_type, aux_type, data)
    }

    fn write_file(&mut self, entry: &DirectoryEntry, data: &[u8]) -> Result<DirectoryEntry> {
        let mut s = self.session()?;
        let (loc, mut ce) = self.locate(&s.staging, entry)?;
        if ce.is_locked() {
            return Err(DiskError::FileLocked(ce.display_name()));
        }
        let (_, aux_type) = self.contents(&s.staging, &ce)?;
        let stored = encode_contents(ce.dos_type(), aux_type, data)?;
        self.free_chain(&mut s, &ce)?;
        let (first, count) = Self::write_chain(&mut s, &stored)?;
        let (tsl_track, tsl_sector) = track_sector(first);
        ce.tsl_track = tsl_track;
        ce.tsl_sector = tsl_sector;
        ce.sector_count = count;
        Self::write_entry(&mut s, loc, &ce)?;

        let changes = s.finish()?;
        self.commit(changes)?;
        self.refresh(loc)
    }

    fn delete(&mut self, entry: &DirectoryEntry, _recursive: bool) -> Result<()> {
        let mut s = self.session()?;
        let (loc, ce) = self.locate(&s.staging, entry)?;
        if ce.is_locked() {
            return Err(DiskError::FileLocked(ce.display_name()));
        }
        self.free_chain(&mut s, &ce)?;

        let mut sector = s.read(loc.block)?;
        let start = CatalogEntry::offset(loc.slot as usize);
        sector[start + 3 + MAX_NAME_LEN - 1] = ce.tsl_track;
        sector[start] = DELETED_TRACK;
        s.write(loc.block, sector)?;

        let changes = s.finish()?;
        self.commit(changes)?;
        tracing::debug!("Deleted {}", ce.display_name());
        Ok(())
    }

    fn rename(&mut self, entry: &DirectoryEntry, new_name: &str) -> Result<DirectoryEntry> {
        if entry.location.is_none() {
            return Err(DiskError::unsupported("renaming a DOS 3.3 volume"));
        }
        let encoded = encode_name(new_name)?;
        let mut s = self.session()?;
        let (loc, mut ce) = self.locate(&s.staging, entry)?;
        if ce.is_locked() {
            return Err(DiskError::FileLocked(ce.display_name()));
        }
        self.check_unique(&s.staging, new_name.trim_end(), Some(loc))?;
        ce.name = encoded;
        Self::write_entry(&mut s, loc, &ce)?;
        let changes = s.finish()?;
        self.commit(changes)?;
        self.refresh(loc)
    }

    fn change_type(&mut self, entry: &DirectoryEntry, file_type: u8, aux_type: u16) -> Result<DirectoryEntry> {
        let dos_type = filetypes::dos_type_for_prodos(file_type).ok_or_else(|| {
            DiskError::unsupported(format!(
                "file type {} on DOS 3.3",
                filetypes::type_name(file_type)
            ))
        })?;
        self.retype(entry, dos_type, Some(aux_type))
    }

    fn set_locked(&mut self, entry: &DirectoryEntry, locked: bool) -> Result<DirectoryEntry> {
        let mut s = self.session()?;
        let (loc, mut ce) = self.locate(&s.staging, entry)?;
        if locked {
            ce.type_byte |= LOCK_BIT;
        } else {
            ce.type_byte &= !LOCK_BIT;
        }
        Self::write_entry(&mut s, loc, &ce)?;
        let changes = s.finish()?;
        self.commit(changes)?;
        self.refresh(loc)
    }
}
