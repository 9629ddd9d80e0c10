/// CRC-16/XMODEM as used by NuFX and Binary II
///
/// Polynomial 0x1021, most significant bit first, no final xor. The seed
/// varies: record and thread headers start from 0, version 3 thread data
/// from 0xFFFF.

const CRC16_POLY: u16 = 0x1021;

/// Lookup table built at compile time
const CRC16_TABLE: [u16; 256] = generate_table();

const fn generate_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a CRC over `data`
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    data.iter().fold(seed, |crc, &b| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ b) as usize]
    })
}
