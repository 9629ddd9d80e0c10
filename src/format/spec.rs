/// Image presets for creating blank volumes

use crate::filesystem::FileSystemType;
use crate::format::constants::*;
use crate::format::ContainerKind;

/// Description of a blank image to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Container framing to write
    pub container: ContainerKind,
    /// Filesystem to format
    pub filesystem: FileSystemType,
    /// Size in 512-byte blocks
    pub blocks: u32,
    /// ProDOS volume name
    pub volume_name: String,
    /// DOS 3.3 volume number
    pub volume_number: u8,
}

impl ImageSpec {
    /// Create a new image specification
    pub fn new(container: ContainerKind, filesystem: FileSystemType, blocks: u32) -> Self {
        Self {
            container,
            filesystem,
            blocks,
            volume_name: "BLANK".to_string(),
            volume_number: 254,
        }
    }

    /// 140K 5.25" ProDOS floppy
    pub fn prodos_140k() -> Self {
        Self::new(ContainerKind::ProdosOrder, FileSystemType::ProDos, FLOPPY_140K_BLOCKS)
    }

    /// 800K 3.5" ProDOS floppy in a 2IMG container
    pub fn prodos_800k() -> Self {
        Self::new(ContainerKind::TwoImg, FileSystemType::ProDos, FLOPPY_800K_BLOCKS)
    }

    /// 32MB ProDOS hard-disk volume
    pub fn prodos_hdv() -> Self {
        Self::new(ContainerKind::Hdv, FileSystemType::ProDos, MAX_PRODOS_BLOCKS)
    }

    /// 140K 5.25" DOS 3.3 floppy
    pub fn dos33_140k() -> Self {
        Self::new(ContainerKind::DosOrder, FileSystemType::Dos33, FLOPPY_140K_BLOCKS)
    }

    /// Look up a preset by name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "prodos" | "prodos140" | "prodos_140k" => Some(Self::prodos_140k()),
            "prodos800" | "prodos_800k" => Some(Self::prodos_800k()),
            "hdv" | "prodos_hdv" => Some(Self::prodos_hdv()),
            "dos" | "dos33" | "dos33_140k" => Some(Self::dos33_140k()),
            _ => None,
        }
    }

    /// Names accepted by [`ImageSpec::from_name`]
    pub fn preset_names() -> &'static [&'static str] {
        &["prodos140", "prodos800", "hdv", "dos33"]
    }

    /// Total capacity in bytes
    pub fn total_capacity(&self) -> usize {
        self.blocks as usize * BLOCK_SIZE
    }
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self::prodos_140k()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(ImageSpec::prodos_140k().total_capacity(), FLOPPY_140K_SIZE);
        assert_eq!(ImageSpec::prodos_800k().total_capacity(), 819_200);
        assert_eq!(ImageSpec::dos33_140k().filesystem, FileSystemType::Dos33);
        assert_eq!(ImageSpec::prodos_hdv().container, ContainerKind::Hdv);
    }

    #[test]
    fn test_from_name() {
        for name in ImageSpec::preset_names() {
            assert!(ImageSpec::from_name(name).is_some(), "{}", name);
        }
        assert_eq!(ImageSpec::from_name("DOS33"), Some(ImageSpec::dos33_140k()));
        assert!(ImageSpec::from_name("cpm").is_none());
    }
}
