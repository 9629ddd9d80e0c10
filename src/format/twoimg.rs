/// 2IMG tagged container header
///
/// A 2IMG file is a 64-byte little-endian header followed by the raw image
/// data, an optional comment and an optional creator-specific chunk.

use crate::error::{DiskError, Result};
use crate::format::constants::*;
use crate::format::SectorOrder;

/// Image format field of a 2IMG header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoImgFormat {
    /// DOS 3.3 sector order
    DosOrder,
    /// ProDOS block order
    ProdosOrder,
    /// Nibblized track data
    Nibble,
}

impl TwoImgFormat {
    /// Parse the 32-bit format field
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(TwoImgFormat::DosOrder),
            1 => Some(TwoImgFormat::ProdosOrder),
            2 => Some(TwoImgFormat::Nibble),
            _ => None,
        }
    }

    /// Numeric code stored in the header
    pub fn code(&self) -> u32 {
        match self {
            TwoImgFormat::DosOrder => 0,
            TwoImgFormat::ProdosOrder => 1,
            TwoImgFormat::Nibble => 2,
        }
    }
}

/// Parsed 2IMG header plus the chunks that trail the image data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoImgHeader {
    /// Four-character creator tag
    pub creator: [u8; 4],
    /// Header version
    pub version: u16,
    /// Image data order
    pub format: TwoImgFormat,
    /// Raw flags word
    pub flags: u32,
    /// ProDOS block count (0 for DOS-order images in some writers)
    pub blocks: u32,
    /// Comment chunk
    pub comment: Vec<u8>,
    /// Creator-specific chunk
    pub creator_data: Vec<u8>,
}

impl TwoImgHeader {
    /// Create a header for a new image of `blocks` 512-byte blocks
    pub fn new(format: TwoImgFormat, blocks: u32) -> Self {
        let mut creator = [0u8; 4];
        creator.copy_from_slice(TWOIMG_CREATOR);
        Self {
            creator,
            version: TWOIMG_VERSION,
            format,
            flags: 0,
            blocks,
            comment: Vec::new(),
            creator_data: Vec::new(),
        }
    }

    /// Parse a complete 2IMG file, returning the header and the image data
    pub fn parse(file: &[u8]) -> Result<(Self, Vec<u8>)> {
        if file.len() < TWOIMG_HEADER_SIZE || !file.starts_with(TWOIMG_MAGIC) {
            return Err(DiskError::unrecognized("missing 2IMG header"));
        }

        let header_len = read_u16(file, TWOIMG_HEADER_LEN_OFFSET) as usize;
        let format_code = read_u32(file, TWOIMG_FORMAT_OFFSET);
        let format = TwoImgFormat::from_code(format_code).ok_or_else(|| {
            DiskError::unrecognized(format!("2IMG image format {} unknown", format_code))
        })?;
        if format == TwoImgFormat::Nibble {
            return Err(DiskError::unrecognized("2IMG nibble images are not supported"));
        }

        let blocks = read_u32(file, TWOIMG_BLOCKS_OFFSET);
        let mut data_offset = read_u32(file, TWOIMG_DATA_OFFSET_OFFSET) as usize;
        let mut data_len = read_u32(file, TWOIMG_DATA_LEN_OFFSET) as usize;
        if data_offset == 0 {
            data_offset = header_len.max(TWOIMG_HEADER_SIZE);
        }
        // Some writers leave the data length zero for ProDOS images
        if data_len == 0 && format == TwoImgFormat::ProdosOrder {
            data_len = blocks as usize * BLOCK_SIZE;
        }
        let data_end = data_offset
            .checked_add(data_len)
            .filter(|&end| end <= file.len())
            .ok_or_else(|| DiskError::unrecognized("2IMG data runs past end of file"))?;

        let comment = Self::chunk(
            file,
            read_u32(file, TWOIMG_COMMENT_OFFSET_OFFSET),
            read_u32(file, TWOIMG_COMMENT_LEN_OFFSET),
        );
        let creator_data = Self::chunk(
            file,
            read_u32(file, TWOIMG_CREATOR_DATA_OFFSET_OFFSET),
            read_u32(file, TWOIMG_CREATOR_DATA_LEN_OFFSET),
        );

        let mut creator = [0u8; 4];
        creator.copy_from_slice(&file[TWOIMG_CREATOR_OFFSET..TWOIMG_CREATOR_OFFSET + 4]);

        let header = Self {
            creator,
            version: read_u16(file, TWOIMG_VERSION_OFFSET),
            format,
            flags: read_u32(file, TWOIMG_FLAGS_OFFSET),
            blocks,
            comment,
            creator_data,
        };

        Ok((header, file[data_offset..data_end].to_vec()))
    }

    fn chunk(file: &[u8], offset: u32, len: u32) -> Vec<u8> {
        let (offset, len) = (offset as usize, len as usize);
        if offset == 0 || len == 0 || offset + len > file.len() {
            return Vec::new();
        }
        file[offset..offset + len].to_vec()
    }

    /// Sector order of the image data
    pub fn order(&self) -> SectorOrder {
        match self.format {
            TwoImgFormat::DosOrder => SectorOrder::Dos,
            _ => SectorOrder::Prodos,
        }
    }

    /// Image is flagged write protected
    pub fn is_locked(&self) -> bool {
        self.flags & TWOIMG_FLAG_LOCKED != 0
    }

    /// DOS volume number, if the header carries one
    pub fn volume_number(&self) -> Option<u8> {
        if self.flags & TWOIMG_FLAG_VOLUME_VALID != 0 {
            Some((self.flags & 0xFF) as u8)
        } else {
            None
        }
    }

    /// Serialize header, image data and trailing chunks
    pub fn to_bytes(&self, data: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; TWOIMG_HEADER_SIZE];
        out[..4].copy_from_slice(TWOIMG_MAGIC);
        out[TWOIMG_CREATOR_OFFSET..TWOIMG_CREATOR_OFFSET + 4].copy_from_slice(&self.creator);
        write_u16(&mut out, TWOIMG_HEADER_LEN_OFFSET, TWOIMG_HEADER_SIZE as u16);
        write_u16(&mut out, TWOIMG_VERSION_OFFSET, self.version);
        write_u32(&mut out, TWOIMG_FORMAT_OFFSET, self.format.code());
        write_u32(&mut out, TWOIMG_FLAGS_OFFSET, self.flags);
        let blocks = match self.format {
            TwoImgFormat::ProdosOrder => (data.len() / BLOCK_SIZE) as u32,
            _ => self.blocks,
        };
        write_u32(&mut out, TWOIMG_BLOCKS_OFFSET, blocks);
        write_u32(&mut out, TWOIMG_DATA_OFFSET_OFFSET, TWOIMG_HEADER_SIZE as u32);
        write_u32(&mut out, TWOIMG_DATA_LEN_OFFSET, data.len() as u32);

        let mut next = TWOIMG_HEADER_SIZE + data.len();
        if !self.comment.is_empty() {
            write_u32(&mut out, TWOIMG_COMMENT_OFFSET_OFFSET, next as u32);
            write_u32(&mut out, TWOIMG_COMMENT_LEN_OFFSET, self.comment.len() as u32);
            next += self.comment.len();
        }
        if !self.creator_data.is_empty() {
            write_u32(&mut out, TWOIMG_CREATOR_DATA_OFFSET_OFFSET, next as u32);
            write_u32(&mut out, TWOIMG_CREATOR_DATA_LEN_OFFSET, self.creator_data.len() as u32);
        }

        out.extend_from_slice(data);
        out.extend_from_slice(&self.comment);
        out.extend_from_slice(&self.creator_data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip_keeps_comment() {
        let mut header = TwoImgHeader::new(TwoImgFormat::ProdosOrder, 4);
        header.comment = b"test volume".to_vec();
        let data = vec![0x5Au8; 4 * BLOCK_SIZE];

        let file = header.to_bytes(&data);
        assert_eq!(&file[..4], b"2IMG");
        assert_eq!(file.len(), TWOIMG_HEADER_SIZE + data.len() + 11);

        let (parsed, payload) = TwoImgHeader::parse(&file).unwrap();
        assert_eq!(payload, data);
        assert_eq!(parsed.blocks, 4);
        assert_eq!(parsed.comment, b"test volume");
        assert_eq!(parsed.order(), SectorOrder::Prodos);
    }

    #[test]
    fn test_dos_order_and_volume_flag() {
        let mut header = TwoImgHeader::new(TwoImgFormat::DosOrder, 0);
        header.flags = TWOIMG_FLAG_VOLUME_VALID | 254 | TWOIMG_FLAG_LOCKED;
        let file = header.to_bytes(&vec![0u8; 1024]);

        let (parsed, _) = TwoImgHeader::parse(&file).unwrap();
        assert_eq!(parsed.order(), SectorOrder::Dos);
        assert_eq!(parsed.volume_number(), Some(254));
        assert!(parsed.is_locked());
    }

    #[test]
    fn test_nibble_rejected() {
        let header = TwoImgHeader::new(TwoImgFormat::Nibble, 0);
        let file = header.to_bytes(&vec![0u8; 512]);
        assert!(matches!(
            TwoImgHeader::parse(&file),
            Err(DiskError::UnrecognizedFormat(_))
        ));
    }

    #[test]
    fn test_truncated_data_rejected() {
        let header = TwoImgHeader::new(TwoImgFormat::ProdosOrder, 8);
        let mut file = header.to_bytes(&vec![0u8; 8 * BLOCK_SIZE]);
        file.truncate(TWOIMG_HEADER_SIZE + 100);
        assert!(TwoImgHeader::parse(&file).is_err());
    }
}
