/// Apple II container magic bytes and geometry constants

/// DOS 3.3 sector size
pub const SECTOR_SIZE: usize = 256;

/// ProDOS / Pascal block size
pub const BLOCK_SIZE: usize = 512;

/// Sectors per track on a 16-sector 5.25" disk
pub const SECTORS_PER_TRACK: usize = 16;

/// Bytes per 16-sector track
pub const TRACK_SIZE: usize = SECTORS_PER_TRACK * SECTOR_SIZE;

/// ProDOS blocks per 16-sector track
pub const BLOCKS_PER_TRACK: usize = TRACK_SIZE / BLOCK_SIZE;

/// Standard 5.25" track count
pub const FLOPPY_525_TRACKS: usize = 35;

/// Size of a 140K 5.25" image
pub const FLOPPY_140K_SIZE: usize = FLOPPY_525_TRACKS * TRACK_SIZE;

/// Blocks on a 140K 5.25" disk
pub const FLOPPY_140K_BLOCKS: u32 = 280;

/// Blocks on an 800K 3.5" disk
pub const FLOPPY_800K_BLOCKS: u32 = 1600;

/// Largest track count a DOS 3.3 VTOC bitmap can describe
pub const DOS_MAX_TRACKS: usize = 50;

/// Largest ProDOS volume (32MB)
pub const MAX_PRODOS_BLOCKS: u32 = 65535;

/// Largest headerless image accepted
pub const MAX_IMAGE_BLOCKS: usize = 65536;

/// 2IMG header magic
pub const TWOIMG_MAGIC: &[u8] = b"2IMG";

/// Creator tag written into 2IMG headers we create
pub const TWOIMG_CREATOR: &[u8] = b"A2DK";

/// Size of the fixed 2IMG header
pub const TWOIMG_HEADER_SIZE: usize = 64;

/// 2IMG header version we write
pub const TWOIMG_VERSION: u16 = 1;

/// 2IMG flag: image is write protected
pub const TWOIMG_FLAG_LOCKED: u32 = 0x8000_0000;

/// 2IMG flag: low byte holds a DOS volume number
pub const TWOIMG_FLAG_VOLUME_VALID: u32 = 0x0000_0100;

/// Offset of the creator tag in a 2IMG header
pub const TWOIMG_CREATOR_OFFSET: usize = 0x04;

/// Offset of header length in a 2IMG header
pub const TWOIMG_HEADER_LEN_OFFSET: usize = 0x08;

/// Offset of version in a 2IMG header
pub const TWOIMG_VERSION_OFFSET: usize = 0x0A;

/// Offset of image format in a 2IMG header
pub const TWOIMG_FORMAT_OFFSET: usize = 0x0C;

/// Offset of flags in a 2IMG header
pub const TWOIMG_FLAGS_OFFSET: usize = 0x10;

/// Offset of ProDOS block count in a 2IMG header
pub const TWOIMG_BLOCKS_OFFSET: usize = 0x14;

/// Offset of data offset in a 2IMG header
pub const TWOIMG_DATA_OFFSET_OFFSET: usize = 0x18;

/// Offset of data length in a 2IMG header
pub const TWOIMG_DATA_LEN_OFFSET: usize = 0x1C;

/// Offset of comment offset in a 2IMG header
pub const TWOIMG_COMMENT_OFFSET_OFFSET: usize = 0x20;

/// Offset of comment length in a 2IMG header
pub const TWOIMG_COMMENT_LEN_OFFSET: usize = 0x24;

/// Offset of creator data offset in a 2IMG header
pub const TWOIMG_CREATOR_DATA_OFFSET_OFFSET: usize = 0x28;

/// Offset of creator data length in a 2IMG header
pub const TWOIMG_CREATOR_DATA_LEN_OFFSET: usize = 0x2C;

/// NuFX master header signature ("NuFile" with alternating high bits)
pub const NUFX_MASTER_SIGNATURE: &[u8] = &[0x4E, 0xF5, 0x46, 0xE9, 0x6C, 0xE5];

/// NuFX record header signature ("NuFX" with alternating high bits)
pub const NUFX_RECORD_SIGNATURE: &[u8] = &[0x4E, 0xF5, 0x46, 0xD8];

/// Binary II header signature bytes at offset 0
pub const BINARY2_SIGNATURE: &[u8] = &[0x0A, 0x47, 0x4C];

/// Binary II header ID byte at offset 0x12
pub const BINARY2_ID_BYTE: u8 = 0x02;

/// Binary II header and padding unit
pub const BINARY2_BLOCK_SIZE: usize = 128;

/// Read a little-endian u16 at `offset`
#[inline]
pub fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read a little-endian u32 at `offset`
#[inline]
pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Write a little-endian u16 at `offset`
#[inline]
pub fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write a little-endian u32 at `offset`
#[inline]
pub fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        assert_eq!(FLOPPY_140K_SIZE, 143_360);
        assert_eq!(FLOPPY_140K_SIZE / BLOCK_SIZE, FLOPPY_140K_BLOCKS as usize);
        assert_eq!(BLOCKS_PER_TRACK, 8);
    }

    #[test]
    fn test_le_helpers() {
        let mut buf = [0u8; 8];
        write_u16(&mut buf, 1, 0x1234);
        write_u32(&mut buf, 3, 0xDEADBEEF);
        assert_eq!(buf[1], 0x34);
        assert_eq!(buf[2], 0x12);
        assert_eq!(read_u16(&buf, 1), 0x1234);
        assert_eq!(read_u32(&buf, 3), 0xDEADBEEF);
    }
}
