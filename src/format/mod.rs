/// Container formats, detection and image presets

/// Format constants
pub mod constants;
/// Image presets
pub mod spec;
/// 2IMG header codec
pub mod twoimg;

pub use constants::*;
pub use spec::ImageSpec;
pub use twoimg::{TwoImgFormat, TwoImgHeader};

use crate::error::{DiskError, Result};
use crate::filesystem::FileSystemType;

/// Container framing of an image file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Headerless DOS-order sector dump (.do)
    DosOrder,
    /// Headerless ProDOS-order block dump (.po)
    ProdosOrder,
    /// 2IMG tagged image (.2mg)
    TwoImg,
    /// Headerless hard-disk volume (.hdv)
    Hdv,
    /// Headerless dump of unknown order (.dsk), resolved by probing
    GenericDsk,
}

impl ContainerKind {
    /// Get a human-readable name for this container
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::DosOrder => "DOS-order image",
            ContainerKind::ProdosOrder => "ProDOS-order image",
            ContainerKind::TwoImg => "2IMG image",
            ContainerKind::Hdv => "Hard-disk volume",
            ContainerKind::GenericDsk => "Generic DSK image",
        }
    }

    /// Usual file extension
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::DosOrder => "do",
            ContainerKind::ProdosOrder => "po",
            ContainerKind::TwoImg => "2mg",
            ContainerKind::Hdv => "hdv",
            ContainerKind::GenericDsk => "dsk",
        }
    }

    /// Fixed sector order, if the container implies one
    pub fn fixed_order(&self) -> Option<SectorOrder> {
        match self {
            ContainerKind::DosOrder => Some(SectorOrder::Dos),
            ContainerKind::ProdosOrder | ContainerKind::Hdv => Some(SectorOrder::Prodos),
            ContainerKind::TwoImg | ContainerKind::GenericDsk => None,
        }
    }

    /// Filesystem most commonly found in this container
    pub fn default_filesystem(&self) -> FileSystemType {
        match self {
            ContainerKind::DosOrder | ContainerKind::GenericDsk => FileSystemType::Dos33,
            _ => FileSystemType::ProDos,
        }
    }
}

/// Order in which a headerless payload stores 256-byte sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorOrder {
    /// Track-major, DOS 3.3 logical sector order
    Dos,
    /// Linear ProDOS block order
    Prodos,
}

/// Archive formats read by the NuFX reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// NuFX / ShrinkIt archive (.shk, .sdk)
    Nufx,
    /// Binary II envelope (.bny, .bxy)
    Binary2,
}

/// Detect an archive from its leading bytes
pub fn detect_archive(data: &[u8]) -> Option<ArchiveKind> {
    if data.starts_with(NUFX_MASTER_SIGNATURE) {
        Some(ArchiveKind::Nufx)
    } else if data.len() >= BINARY2_BLOCK_SIZE
        && data.starts_with(BINARY2_SIGNATURE)
        && data[0x12] == BINARY2_ID_BYTE
    {
        Some(ArchiveKind::Binary2)
    } else {
        None
    }
}

/// Detect the container framing of an image file
///
/// `extension` is the file extension hint (without the dot). Detection looks
/// at the 2IMG magic, archive signatures and the payload length; it never
/// inspects filesystem structures, which is left to [`crate::image::DiskImage`].
pub fn detect_container(data: &[u8], extension: Option<&str>) -> Result<ContainerKind> {
    if data.starts_with(TWOIMG_MAGIC) {
        return Ok(ContainerKind::TwoImg);
    }
    if let Some(kind) = detect_archive(data) {
        return Err(DiskError::unrecognized(format!(
            "{:?} archive is not a disk image",
            kind
        )));
    }
    if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
        return Err(DiskError::unrecognized(format!(
            "length {} is not a whole number of sectors",
            data.len()
        )));
    }
    if data.len() / BLOCK_SIZE > MAX_IMAGE_BLOCKS {
        return Err(DiskError::unrecognized(format!(
            "length {} exceeds the largest supported volume",
            data.len()
        )));
    }

    let ext = extension.map(|e| e.to_ascii_lowercase());
    let whole_tracks = data.len() % TRACK_SIZE == 0;
    let whole_blocks = data.len() % BLOCK_SIZE == 0;
    let tracks = data.len() / TRACK_SIZE;

    let kind = match ext.as_deref() {
        Some("do") if whole_tracks => ContainerKind::DosOrder,
        Some("po") if whole_blocks => ContainerKind::ProdosOrder,
        Some("hdv") if whole_blocks => ContainerKind::Hdv,
        Some("do") | Some("po") | Some("hdv") => {
            return Err(DiskError::unrecognized(format!(
                "length {} does not fit a .{} image",
                data.len(),
                ext.as_deref().unwrap_or_default()
            )))
        }
        _ if whole_tracks && tracks <= DOS_MAX_TRACKS => ContainerKind::GenericDsk,
        _ if whole_blocks => ContainerKind::ProdosOrder,
        _ => {
            return Err(DiskError::unrecognized(format!(
                "cannot determine sector order for length {}",
                data.len()
            )))
        }
    };

    tracing::debug!("Detected {} ({} bytes)", kind.name(), data.len());
    Ok(kind)
}
