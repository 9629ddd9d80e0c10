/// Disk image containers and the block store

/// Builder for blank formatted images
pub mod builder;
/// DOS / ProDOS sector skew
pub mod interleave;
/// Addressable block view and staged writes
pub mod store;

pub use builder::DiskImageBuilder;
pub use store::{BlockSize, BlockStore, ChangeSet, Staging};

use crate::error::{DiskError, Result};
use crate::filesystem::{dos33, pascal, prodos};
use crate::format::constants::*;
use crate::format::{detect_container, ContainerKind, ImageSpec, SectorOrder, TwoImgHeader};
use std::path::Path;

/// Apple II disk image: payload bytes plus their container framing
#[derive(Debug, Clone)]
pub struct DiskImage {
    /// Container framing
    pub(crate) kind: ContainerKind,
    /// Order of the payload's sectors
    pub(crate) order: SectorOrder,
    /// 2IMG header and trailing chunks, kept for saving
    pub(crate) header: Option<TwoImgHeader>,
    /// Payload without any header
    pub(crate) data: Vec<u8>,
    /// Has the image been modified?
    pub(crate) changed: bool,
    /// Original filename if loaded from disk
    pub(crate) filename: Option<String>,
}

impl DiskImage {
    /// Open an image file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::io::reader::read_image(path)
    }

    /// Parse an image from its file bytes
    ///
    /// `extension` is the file extension hint used to pick the sector order of
    /// headerless images. Generic `.dsk` payloads are probed for a DOS 3.3 VTOC,
    /// then for a ProDOS or Pascal volume header under each order.
    pub fn from_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self> {
        let kind = detect_container(&bytes, extension)?;

        let (order, header, data) = match kind {
            ContainerKind::TwoImg => {
                let (header, data) = TwoImgHeader::parse(&bytes)?;
                let order = header.order();
                validate_payload(&data, order)?;
                (order, Some(header), data)
            }
            ContainerKind::GenericDsk => (probe_order(&bytes), None, bytes),
            _ => {
                let order = kind.fixed_order().unwrap_or(SectorOrder::Prodos);
                (order, None, bytes)
            }
        };

        tracing::debug!("{} in {:?} order, {} bytes", kind.name(), order, data.len());

        Ok(Self {
            kind,
            order,
            header,
            data,
            changed: false,
            filename: None,
        })
    }

    /// Create a new blank formatted image
    pub fn create(spec: ImageSpec) -> Result<Self> {
        DiskImageBuilder::new().spec(spec).build()
    }

    /// Create a new builder for constructing images
    pub fn builder() -> DiskImageBuilder {
        DiskImageBuilder::new()
    }

    /// Get the container framing
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Get the payload's sector order
    pub fn order(&self) -> SectorOrder {
        self.order
    }

    /// Get the 2IMG header, if any
    pub fn header(&self) -> Option<&TwoImgHeader> {
        self.header.as_ref()
    }

    /// 2IMG comment as text
    pub fn comment(&self) -> Option<String> {
        self.header
            .as_ref()
            .filter(|h| !h.comment.is_empty())
            .map(|h| String::from_utf8_lossy(&h.comment).into_owned())
    }

    /// Get the original filename if loaded from disk
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        self.changed = true;
        &mut self.data
    }

    /// Number of 256-byte sectors in the payload
    pub fn sector_count(&self) -> u32 {
        (self.data.len() / SECTOR_SIZE) as u32
    }

    /// Number of 512-byte blocks in the payload
    pub fn block_count(&self) -> u32 {
        (self.data.len() / BLOCK_SIZE) as u32
    }

    /// Get the total capacity of the image in bytes
    pub fn total_capacity(&self) -> usize {
        self.data.len()
    }

    /// Check if the image has been modified
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Mark the image as unchanged
    pub fn mark_unchanged(&mut self) {
        self.changed = false;
    }

    /// Serialize the image with its container framing
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.header {
            Some(header) => header.to_bytes(&self.data),
            None => self.data.clone(),
        }
    }

    /// Save the image to a file
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        crate::io::writer::write_image(self, path)?;
        self.changed = false;
        Ok(())
    }
}

fn validate_payload(data: &[u8], order: SectorOrder) -> Result<()> {
    let unit = match order {
        SectorOrder::Dos => TRACK_SIZE,
        SectorOrder::Prodos => BLOCK_SIZE,
    };
    if data.is_empty() || data.len() % unit != 0 {
        return Err(DiskError::unrecognized(format!(
            "payload length {} does not fit {:?} order",
            data.len(),
            order
        )));
    }
    Ok(())
}

fn raw_block(data: &[u8], order: SectorOrder, block: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(BLOCK_SIZE);
    for offset in interleave::prodos_block_offsets(order, block) {
        out.extend_from_slice(data.get(offset..offset + SECTOR_SIZE)?);
    }
    Some(out)
}

/// Resolve the sector order of a headerless payload by looking for filesystem signatures
fn probe_order(data: &[u8]) -> SectorOrder {
    let vtoc = interleave::dos_sector_offset(SectorOrder::Dos, 17, 0);
    if let Some(sector) = data.get(vtoc..vtoc + SECTOR_SIZE) {
        if dos33::is_vtoc(sector) {
            return SectorOrder::Dos;
        }
    }
    for order in [SectorOrder::Prodos, SectorOrder::Dos] {
        if let Some(block) = raw_block(data, order, 2) {
            if prodos::is_volume_header(&block) || pascal::is_volume_header(&block) {
                tracing::debug!("Volume header found at block 2 in {:?} order", order);
                return order;
            }
        }
    }
    SectorOrder::Dos
}
