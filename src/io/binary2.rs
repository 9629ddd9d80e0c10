/// Binary II envelope reader
///
/// Binary II wraps each file in a 128-byte header followed by the file data
/// padded to a multiple of 128 bytes. `.bxy` and `.bny` files are usually a
/// single NuFX archive wrapped this way.

use crate::error::{DiskError, Result};
use crate::format::constants::*;

/// Header of one Binary II entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary2Header {
    /// ProDOS access bits
    pub access: u8,
    /// ProDOS file type
    pub file_type: u8,
    /// ProDOS aux type
    pub aux_type: u16,
    /// Length of the file data
    pub eof: u32,
    /// Filename or partial pathname
    pub name: String,
    /// Entries following this one
    pub files_to_follow: u8,
}

impl Binary2Header {
    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BINARY2_BLOCK_SIZE
            || !data.starts_with(BINARY2_SIGNATURE)
            || data[0x12] != BINARY2_ID_BYTE
        {
            return Err(DiskError::unrecognized("missing Binary II signature"));
        }
        let eof = data[0x14] as u32
            | (data[0x15] as u32) << 8
            | (data[0x16] as u32) << 16
            | (data[0x74] as u32) << 24;
        let name_len = (data[0x17] as usize).min(64);
        let name = data[0x18..0x18 + name_len]
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .collect();
        Ok(Self {
            access: data[0x03],
            file_type: data[0x04],
            aux_type: read_u16(data, 0x05),
            eof,
            name,
            files_to_follow: data[0x7F],
        })
    }
}

/// Unwrap the first entry of a Binary II file
///
/// Data without a Binary II header is returned unchanged.
pub fn strip_envelope(data: Vec<u8>) -> Result<Vec<u8>> {
    if !data.starts_with(BINARY2_SIGNATURE) {
        return Ok(data);
    }
    let header = Binary2Header::parse(&data)?;
    let end = BINARY2_BLOCK_SIZE + header.eof as usize;
    if end > data.len() {
        return Err(DiskError::corrupt_archive(
            format!("Binary II entry {} runs past the end of the file", header.name),
            data[BINARY2_BLOCK_SIZE.min(data.len())..].to_vec(),
        ));
    }
    if header.files_to_follow > 0 {
        tracing::warn!(
            "Binary II file holds {} more entries after {}; only the first is read",
            header.files_to_follow,
            header.name
        );
    }
    tracing::debug!("Stripped Binary II envelope from {} ({} bytes)", header.name, header.eof);
    Ok(data[BINARY2_BLOCK_SIZE..end].to_vec())
}
