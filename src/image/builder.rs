/// Builder for blank formatted images

use crate::error::{DiskError, Result};
use crate::filesystem::{dos33, prodos, FileSystemType};
use crate::format::constants::*;
use crate::format::{ContainerKind, ImageSpec, SectorOrder, TwoImgFormat, TwoImgHeader};
use crate::image::{BlockSize, BlockStore, DiskImage};

/// Builder for constructing formatted images
pub struct DiskImageBuilder {
    spec: ImageSpec,
    comment: Option<String>,
}

impl DiskImageBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            spec: ImageSpec::default(),
            comment: None,
        }
    }

    /// Set the image specification
    pub fn spec(mut self, spec: ImageSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Set the container framing
    pub fn container(mut self, container: ContainerKind) -> Self {
        self.spec.container = container;
        self
    }

    /// Set the filesystem to format
    pub fn filesystem(mut self, filesystem: FileSystemType) -> Self {
        self.spec.filesystem = filesystem;
        self
    }

    /// Set the size in 512-byte blocks
    pub fn blocks(mut self, blocks: u32) -> Self {
        self.spec.blocks = blocks;
        self
    }

    /// Set the ProDOS volume name
    pub fn volume_name(mut self, name: &str) -> Self {
        self.spec.volume_name = name.to_string();
        self
    }

    /// Set the DOS 3.3 volume number
    pub fn volume_number(mut self, number: u8) -> Self {
        self.spec.volume_number = number;
        self
    }

    /// Set the 2IMG comment
    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// Build the image with the specified configuration
    pub fn build(self) -> Result<DiskImage> {
        let spec = self.spec;
        let order = match (spec.container, spec.filesystem) {
            (ContainerKind::DosOrder, _) => SectorOrder::Dos,
            (ContainerKind::TwoImg | ContainerKind::GenericDsk, FileSystemType::Dos33) => {
                SectorOrder::Dos
            }
            _ => SectorOrder::Prodos,
        };

        if spec.blocks == 0 || spec.blocks as usize > MAX_IMAGE_BLOCKS {
            return Err(DiskError::unsupported(format!(
                "image of {} blocks",
                spec.blocks
            )));
        }
        if order == SectorOrder::Dos && spec.blocks as usize % BLOCKS_PER_TRACK != 0 {
            return Err(DiskError::unsupported(format!(
                "DOS-order image of {} blocks (not whole tracks)",
                spec.blocks
            )));
        }

        let header = match spec.container {
            ContainerKind::TwoImg => {
                let format = match order {
                    SectorOrder::Dos => TwoImgFormat::DosOrder,
                    SectorOrder::Prodos => TwoImgFormat::ProdosOrder,
                };
                let mut header = TwoImgHeader::new(format, spec.blocks);
                if spec.filesystem == FileSystemType::Dos33 {
                    header.flags = TWOIMG_FLAG_VOLUME_VALID | spec.volume_number as u32;
                }
                if let Some(comment) = &self.comment {
                    header.comment = comment.as_bytes().to_vec();
                }
                Some(header)
            }
            _ => None,
        };

        let image = DiskImage {
            kind: spec.container,
            order,
            header,
            data: vec![0u8; spec.blocks as usize * BLOCK_SIZE],
            changed: true,
            filename: None,
        };

        let mut image = match spec.filesystem {
            FileSystemType::ProDos => {
                let mut store = BlockStore::new(image, BlockSize::Block512);
                prodos::format(&mut store, &spec.volume_name)?;
                store.into_image()
            }
            FileSystemType::Dos33 => {
                let mut store = BlockStore::new(image, BlockSize::Sector256);
                dos33::format(&mut store, spec.volume_number)?;
                store.into_image()
            }
            other => {
                return Err(DiskError::unsupported(format!("formatting {}", other)));
            }
        };

        // Newly created image is considered changed
        image.changed = true;
        Ok(image)
    }
}

impl Default for DiskImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let image = DiskImageBuilder::new().build().unwrap();

        assert_eq!(image.kind(), ContainerKind::ProdosOrder);
        assert_eq!(image.order(), SectorOrder::Prodos);
        assert_eq!(image.total_capacity(), FLOPPY_140K_SIZE);
    }

    #[test]
    fn test_builder_custom() {
        let image = DiskImageBuilder::new()
            .container(ContainerKind::Hdv)
            .blocks(4096)
            .volume_name("hard1")
            .build()
            .unwrap();

        assert_eq!(image.kind(), ContainerKind::Hdv);
        assert_eq!(image.block_count(), 4096);
    }

    #[test]
    fn test_builder_dos_twoimg_sets_volume() {
        let image = DiskImageBuilder::new()
            .spec(ImageSpec::dos33_140k())
            .container(ContainerKind::TwoImg)
            .volume_number(100)
            .build()
            .unwrap();

        assert_eq!(image.order(), SectorOrder::Dos);
        assert_eq!(image.header().and_then(|h| h.volume_number()), Some(100));
    }

    #[test]
    fn test_builder_rejects_bad_sizes() {
        assert!(DiskImageBuilder::new().blocks(0).build().is_err());
        assert!(DiskImageBuilder::new()
            .spec(ImageSpec::dos33_140k())
            .blocks(281)
            .build()
            .is_err());
        assert!(DiskImageBuilder::new()
            .filesystem(FileSystemType::Pascal)
            .build()
            .is_err());
    }
}
