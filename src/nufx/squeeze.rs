/// Huffman "squeeze" decompression
///
/// The stream starts with a node count and that many pairs of signed
/// 16-bit children. A negative child `-(v + 1)` is a leaf for value `v`;
/// value 256 marks the end of data. Bits are read least significant first,
/// 0 taking the left child. The decoded bytes are then run-length expanded
/// with `$90`: `$90 n` repeats the previous byte `n - 1` more times and
/// `$90 00` is a literal `$90`.

use super::{output_buffer, BitReader};
use crate::error::{DiskError, Result};
use crate::format::constants::read_u16;

const RLE_MARKER: u8 = 0x90;
const END_OF_DATA: i16 = 256;
/// Nodes in a complete tree over 257 symbols
const MAX_NODES: usize = 256;

/// Undo the `$90` run-length pass, one byte at a time
struct RunExpander {
    last: u8,
    pending_count: bool,
}

impl RunExpander {
    fn push(&mut self, byte: u8, out: &mut Vec<u8>) {
        if self.pending_count {
            self.pending_count = false;
            if byte == 0 {
                out.push(RLE_MARKER);
                self.last = RLE_MARKER;
            } else {
                let last = self.last;
                out.extend(std::iter::repeat(last).take(byte as usize - 1));
            }
        } else if byte == RLE_MARKER {
            self.pending_count = true;
        } else {
            out.push(byte);
            self.last = byte;
        }
    }
}

/// Decompress a squeezed thread to `eof` bytes
pub fn unsqueeze(input: &[u8], eof: usize) -> Result<Vec<u8>> {
    if input.len() < 2 {
        return Err(DiskError::corrupt_archive("squeeze header cut short", Vec::new()));
    }
    let count = read_u16(input, 0) as usize;
    if count > MAX_NODES || input.len() < 2 + count * 4 {
        return Err(DiskError::corrupt_archive(
            format!("squeeze tree of {} nodes", count),
            Vec::new(),
        ));
    }
    let nodes: Vec<[i16; 2]> = (0..count)
        .map(|i| {
            let at = 2 + i * 4;
            [read_u16(input, at) as i16, read_u16(input, at + 2) as i16]
        })
        .collect();

    let mut out = output_buffer(eof, "squeezed")?;
    let mut runs = RunExpander {
        last: 0,
        pending_count: false,
    };
    if nodes.is_empty() {
        return Ok(out);
    }

    let mut bits = BitReader::new(&input[2 + count * 4..]);
    while out.len() < eof {
        let mut node: i16 = 0;
        while node >= 0 {
            let Some(bit) = bits.read(1) else {
                out.truncate(eof);
                return Err(DiskError::corrupt_archive("squeezed data cut short", out));
            };
            let Some(children) = nodes.get(node as usize) else {
                return Err(DiskError::corrupt_archive(
                    format!("squeeze node {} outside tree", node),
                    out,
                ));
            };
            node = children[bit as usize];
        }
        let value = -(node + 1);
        if value == END_OF_DATA {
            break;
        }
        runs.push(value as u8, &mut out);
    }

    if out.len() < eof {
        tracing::warn!("Squeezed thread ended after {} of {} bytes", out.len(), eof);
        return Err(DiskError::corrupt_archive(
            format!("squeezed data ended after {} of {} bytes", out.len(), eof),
            out,
        ));
    }
    out.truncate(eof);
    Ok(out)
}
