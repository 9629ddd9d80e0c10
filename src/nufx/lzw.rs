/// ShrinkIt LZW/1 and LZW/2 decompression
///
/// Both formats split the input into 4096-byte chunks. Each chunk is run
/// length encoded, then optionally LZW compressed with 9 to 12 bit codes
/// packed least significant bit first. LZW/1 restarts the code table for
/// every chunk and carries a CRC of the expanded chunks; LZW/2 keeps the
/// table across chunks until a clear code or a stored chunk resets it.

use super::crc::crc16;
use super::{output_buffer, BitReader};
use crate::error::{DiskError, Result};
use crate::format::constants::read_u16;

/// Uncompressed size of one chunk
pub const CHUNK_SIZE: usize = 4096;
/// LZW/2 table reset code
const CLEAR_CODE: u16 = 0x100;
/// First code assigned to a table string
const FIRST_CODE: u16 = 0x101;
const TABLE_SIZE: usize = 4096;

/// Code width while the table's next free slot is `entry`
pub(crate) fn code_width(entry: u16) -> u32 {
    match (entry + 1) >> 8 {
        0 | 1 => 9,
        2 | 3 => 10,
        4..=7 => 11,
        _ => 12,
    }
}

/// Expand ShrinkIt run-length encoding to exactly one chunk
///
/// A run is `delim, byte, count - 1`.
pub(crate) fn unrle(input: &[u8], delim: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(CHUNK_SIZE);
    let mut i = 0;
    while i < input.len() && out.len() < CHUNK_SIZE {
        if input[i] == delim {
            if i + 2 >= input.len() {
                return Err(DiskError::corrupt_archive("run-length sequence cut short", out));
            }
            let (byte, count) = (input[i + 1], input[i + 2] as usize + 1);
            out.extend(std::iter::repeat(byte).take(count));
            i += 3;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    if out.len() != CHUNK_SIZE {
        return Err(DiskError::corrupt_archive(
            format!("run-length chunk expanded to {} bytes", out.len()),
            out,
        ));
    }
    Ok(out)
}

/// Code table and decoder state
struct Decoder {
    prefix: Vec<u16>,
    suffix: Vec<u8>,
    entry: u16,
    prev: Option<u16>,
}

impl Decoder {
    fn new() -> Self {
        let mut decoder = Self {
            prefix: vec![0; TABLE_SIZE],
            suffix: vec![0; TABLE_SIZE],
            entry: FIRST_CODE,
            prev: None,
        };
        for code in 0..256 {
            decoder.suffix[code] = code as u8;
        }
        decoder
    }

    fn reset(&mut self) {
        self.entry = FIRST_CODE;
        self.prev = None;
    }

    /// String for a code already in the table
    fn expand(&self, code: u16) -> Vec<u8> {
        let mut stack = Vec::new();
        let mut current = code;
        while current >= FIRST_CODE {
            stack.push(self.suffix[current as usize]);
            current = self.prefix[current as usize];
        }
        stack.push(current as u8);
        stack.reverse();
        stack
    }

    /// Decode codes until `len` bytes have been produced
    fn decode(&mut self, bits: &mut BitReader<'_>, len: usize, allow_clear: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let width = code_width(self.entry);
            let Some(code) = bits.read(width) else {
                return Err(DiskError::corrupt_archive("LZW stream cut short", out));
            };
            let code = code as u16;
            if allow_clear && code == CLEAR_CODE {
                self.reset();
                continue;
            }

            let Some(prev) = self.prev else {
                if code > 0xFF {
                    return Err(DiskError::corrupt_archive(
                        format!("LZW stream starts with code ${:03X}", code),
                        out,
                    ));
                }
                out.push(code as u8);
                self.prev = Some(code);
                continue;
            };

            let string = if code < self.entry && code != CLEAR_CODE {
                self.expand(code)
            } else if code == self.entry {
                let mut s = self.expand(prev);
                s.push(s[0]);
                s
            } else {
                return Err(DiskError::corrupt_archive(
                    format!("LZW code ${:03X} beyond table end ${:03X}", code, self.entry),
                    out,
                ));
            };

            if (self.entry as usize) < TABLE_SIZE {
                self.prefix[self.entry as usize] = prev;
                self.suffix[self.entry as usize] = string[0];
                self.entry += 1;
            }
            out.extend_from_slice(&string);
            self.prev = Some(code);
        }
        // The final string of a chunk may overrun it
        out.truncate(len);
        Ok(out)
    }
}

/// Finish a chunk: undo the run-length pass unless it was skipped
fn finish_chunk(rle: Vec<u8>, rle_len: usize, delim: u8) -> Result<Vec<u8>> {
    if rle_len == CHUNK_SIZE {
        Ok(rle)
    } else {
        unrle(&rle, delim)
    }
}

/// Decompress an LZW/1 thread to `eof` bytes
pub fn expand_lzw1(input: &[u8], eof: usize) -> Result<Vec<u8>> {
    if input.len() < 4 {
        return Err(DiskError::corrupt_archive("LZW/1 header cut short", Vec::new()));
    }
    let stored_crc = read_u16(input, 0);
    let delim = input[3];
    let mut pos = 4;
    let mut crc = 0u16;
    let mut out = output_buffer(eof, "LZW/1")?;
    let mut decoder = Decoder::new();

    while out.len() < eof {
        if pos + 3 > input.len() {
            out.truncate(eof);
            return Err(DiskError::corrupt_archive("LZW/1 chunk header cut short", out));
        }
        let rle_len = read_u16(input, pos) as usize;
        let compressed = input[pos + 2] != 0;
        pos += 3;
        if rle_len > CHUNK_SIZE {
            return Err(DiskError::corrupt_archive(format!("LZW/1 chunk of {} bytes", rle_len), out));
        }

        let rle = if compressed {
            decoder.reset();
            let mut bits = BitReader::new(&input[pos..]);
            let decoded = decoder.decode(&mut bits, rle_len, false);
            pos += bits.bytes_consumed();
            match decoded {
                Ok(data) => data,
                Err(DiskError::CorruptArchive { message, partial }) => {
                    out.extend(partial);
                    out.truncate(eof);
                    return Err(DiskError::corrupt_archive(message, out));
                }
                Err(err) => return Err(err),
            }
        } else {
            if pos + rle_len > input.len() {
                out.extend_from_slice(&input[pos..]);
                out.truncate(eof);
                return Err(DiskError::corrupt_archive("LZW/1 stored chunk cut short", out));
            }
            pos += rle_len;
            input[pos - rle_len..pos].to_vec()
        };

        let chunk = finish_chunk(rle, rle_len, delim)?;
        crc = crc16(crc, &chunk);
        out.extend(chunk);
    }
    out.truncate(eof);

    if crc != stored_crc {
        tracing::warn!("LZW/1 CRC mismatch: stored {:04X}, computed {:04X}", stored_crc, crc);
        return Err(DiskError::corrupt_archive(
            format!("LZW/1 data CRC mismatch (stored {:04X}, computed {:04X})", stored_crc, crc),
            out,
        ));
    }
    Ok(out)
}

/// Decompress an LZW/2 thread to `eof` bytes
pub fn expand_lzw2(input: &[u8], eof: usize) -> Result<Vec<u8>> {
    if input.len() < 2 {
        return Err(DiskError::corrupt_archive("LZW/2 header cut short", Vec::new()));
    }
    let delim = input[1];
    let mut pos = 2;
    let mut out = output_buffer(eof, "LZW/2")?;
    let mut decoder = Decoder::new();

    while out.len() < eof {
        if pos + 2 > input.len() {
            out.truncate(eof);
            return Err(DiskError::corrupt_archive("LZW/2 chunk header cut short", out));
        }
        let word = read_u16(input, pos);
        let rle_len = (word & 0x1FFF) as usize;
        let compressed = word & 0x8000 != 0;
        if rle_len > CHUNK_SIZE {
            return Err(DiskError::corrupt_archive(format!("LZW/2 chunk of {} bytes", rle_len), out));
        }

        let rle = if compressed {
            if pos + 4 > input.len() {
                return Err(DiskError::corrupt_archive("LZW/2 chunk header cut short", out));
            }
            let chunk_len = read_u16(input, pos + 2) as usize;
            let end = pos + chunk_len;
            if chunk_len < 4 || end > input.len() {
                return Err(DiskError::corrupt_archive(
                    format!("LZW/2 chunk length {} runs past the thread", chunk_len),
                    out,
                ));
            }
            let mut bits = BitReader::new(&input[pos + 4..end]);
            let decoded = decoder.decode(&mut bits, rle_len, true);
            pos = end;
            match decoded {
                Ok(data) => data,
                Err(DiskError::CorruptArchive { message, partial }) => {
                    out.extend(partial);
                    out.truncate(eof);
                    return Err(DiskError::corrupt_archive(message, out));
                }
                Err(err) => return Err(err),
            }
        } else {
            decoder.reset();
            pos += 2;
            if pos + rle_len > input.len() {
                out.extend_from_slice(&input[pos..]);
                out.truncate(eof);
                return Err(DiskError::corrupt_archive("LZW/2 stored chunk cut short", out));
            }
            pos += rle_len;
            input[pos - rle_len..pos].to_vec()
        };

        out.extend(finish_chunk(rle, rle_len, delim)?);
    }
    out.truncate(eof);
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::constants::write_u16;
    use std::collections::HashMap;

    /// LSB-first bit packer
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        acc: u32,
        count: u32,
    }

    impl BitWriter {
        pub(crate) fn write(&mut self, value: u32, width: u32) {
            self.acc |= value << self.count;
            self.count += width;
            while self.count >= 8 {
                self.bytes.push(self.acc as u8);
                self.acc >>= 8;
                self.count -= 8;
            }
        }

        pub(crate) fn finish(mut self) -> Vec<u8> {
            if self.count > 0 {
                self.bytes.push(self.acc as u8);
            }
            self.bytes
        }
    }

    /// Reference LZW encoder, fresh table per call
    pub(crate) fn lzw_encode(data: &[u8]) -> Vec<u8> {
        let mut dict: HashMap<Vec<u8>, u16> = (0..=255u16).map(|c| (vec![c as u8], c)).collect();
        let mut next = FIRST_CODE;
        let mut writer = BitWriter::default();
        let mut emitted = 0u32;
        let mut w: Vec<u8> = Vec::new();
        let emit = |writer: &mut BitWriter, code: u16, emitted: &mut u32| {
            let entry = if *emitted == 0 { FIRST_CODE } else { (FIRST_CODE as u32 + *emitted - 1).min(0x1000) as u16 };
            writer.write(code as u32, code_width(entry));
            *emitted += 1;
        };
        for &c in data {
            let mut wc = w.clone();
            wc.push(c);
            if dict.contains_key(&wc) {
                w = wc;
            } else {
                emit(&mut writer, dict[&w], &mut emitted);
                if (next as usize) < TABLE_SIZE {
                    dict.insert(wc, next);
                    next += 1;
                }
                w = vec![c];
            }
        }
        if !w.is_empty() {
            emit(&mut writer, dict[&w], &mut emitted);
        }
        writer.finish()
    }

    /// Build an LZW/1 stream from whole chunks, skipping the RLE pass
    pub(crate) fn lzw1_stream(data: &[u8]) -> Vec<u8> {
        let mut chunks = Vec::new();
        let mut crc = 0u16;
        for chunk in data.chunks(CHUNK_SIZE) {
            let mut padded = chunk.to_vec();
            padded.resize(CHUNK_SIZE, 0);
            crc = crc16(crc, &padded);
            let mut header = vec![0u8; 3];
            write_u16(&mut header, 0, CHUNK_SIZE as u16);
            header[2] = 1;
            chunks.extend(header);
            chunks.extend(lzw_encode(&padded));
        }
        let mut out = vec![0u8, 0, 0xFE, 0xDB];
        write_u16(&mut out, 0, crc);
        out.extend(chunks);
        out
    }

    #[test]
    fn test_code_width() {
        assert_eq!(code_width(0x101), 9);
        assert_eq!(code_width(0x1FE), 9);
        assert_eq!(code_width(0x1FF), 10);
        assert_eq!(code_width(0x3FF), 11);
        assert_eq!(code_width(0x7FF), 12);
        assert_eq!(code_width(0x1000), 12);
    }

    #[test]
    fn test_unrle() {
        let mut input = vec![0xDB, 0x41, 0x09, 0xDB, 0xDB, 0x00];
        input.extend(vec![0x20; CHUNK_SIZE - 11]);
        let out = unrle(&input, 0xDB).unwrap();
        assert_eq!(&out[..10], &[0x41; 10]);
        assert_eq!(out[10], 0xDB);
        assert_eq!(out.len(), CHUNK_SIZE);

        assert!(matches!(
            unrle(&[1, 2, 3], 0xDB),
            Err(DiskError::CorruptArchive { .. })
        ));
    }

    #[test]
    fn test_lzw1_round_trip() {
        let text: Vec<u8> = b"TOBEORNOTTOBEORTOBEORNOT#".iter().cycle().take(5000).copied().collect();
        let stream = lzw1_stream(&text);
        assert!(stream.len() < text.len());
        assert_eq!(expand_lzw1(&stream, text.len()).unwrap(), text);
    }

    #[test]
    fn test_lzw1_kwkwk() {
        let data = vec![0x61u8; 100];
        let stream = lzw1_stream(&data);
        assert_eq!(expand_lzw1(&stream, 100).unwrap(), data);
    }

    #[test]
    fn test_lzw1_bad_crc_keeps_data() {
        let data: Vec<u8> = (0..300).map(|i| (i % 7) as u8).collect();
        let mut stream = lzw1_stream(&data);
        stream[0] ^= 0xFF;
        match expand_lzw1(&stream, data.len()) {
            Err(DiskError::CorruptArchive { partial, .. }) => assert_eq!(partial, data),
            other => panic!("expected CRC failure, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_lzw2_stored_and_compressed() {
        let first: Vec<u8> = b"ABABABABAB".iter().cycle().take(CHUNK_SIZE).copied().collect();
        let second = vec![0x55u8; CHUNK_SIZE];

        let mut stream = vec![0xFE, 0xDB];
        // Stored chunk: low 13 bits carry the length, high bit clear
        let mut header = vec![0u8; 2];
        write_u16(&mut header, 0, CHUNK_SIZE as u16);
        stream.extend(header);
        stream.extend(&first);
        // Compressed chunk: flag, length, then total chunk length
        let codes = lzw_encode(&second);
        let mut header = vec![0u8; 4];
        write_u16(&mut header, 0, 0x8000 | CHUNK_SIZE as u16);
        write_u16(&mut header, 2, (codes.len() + 4) as u16);
        stream.extend(header);
        stream.extend(codes);

        let out = expand_lzw2(&stream, 2 * CHUNK_SIZE - 10).unwrap();
        assert_eq!(&out[..CHUNK_SIZE], &first[..]);
        assert_eq!(&out[CHUNK_SIZE..], &second[..CHUNK_SIZE - 10]);
    }

    #[test]
    fn test_truncated_stream() {
        let data = vec![0x42u8; 2000];
        let stream = lzw1_stream(&data);
        let cut = &stream[..stream.len() / 2];
        assert!(matches!(
            expand_lzw1(cut, data.len()),
            Err(DiskError::CorruptArchive { .. })
        ));
    }

    #[test]
    fn test_oversized_eof() {
        let huge = [
            expand_lzw1(&[0, 0, 0, 0xDB, 0, 0, 0], usize::MAX),
            expand_lzw2(&[0, 0xDB, 0, 0], usize::MAX),
            expand_lzw2(&[0, 0xDB, 0, 0], crate::nufx::MAX_THREAD_LEN + 1),
        ];
        for result in huge {
            assert!(matches!(result, Err(DiskError::CorruptArchive { .. })));
        }
    }
}
