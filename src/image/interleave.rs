/// Sector skew between DOS 3.3 and ProDOS order
///
/// A DOS-order payload stores each track's sectors in DOS logical order and a
/// ProDOS-order payload stores them in ProDOS logical order. The table maps a
/// sector number in one order to its position in the other; it is its own
/// inverse.

use crate::format::constants::*;
use crate::format::SectorOrder;

/// Sector skew table (self-inverse)
pub const SKEW: [usize; SECTORS_PER_TRACK] = [0, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 15];

/// Byte offset of DOS sector `sector` on `track` within a payload of `order`
pub fn dos_sector_offset(order: SectorOrder, track: usize, sector: usize) -> usize {
    let slot = match order {
        SectorOrder::Dos => sector,
        SectorOrder::Prodos => SKEW[sector],
    };
    track * TRACK_SIZE + slot * SECTOR_SIZE
}

/// Byte offsets of the two 256-byte halves of ProDOS block `block`
pub fn prodos_block_offsets(order: SectorOrder, block: usize) -> [usize; 2] {
    match order {
        SectorOrder::Prodos => [block * BLOCK_SIZE, block * BLOCK_SIZE + SECTOR_SIZE],
        SectorOrder::Dos => {
            let track = block / BLOCKS_PER_TRACK;
            let first = (block % BLOCKS_PER_TRACK) * 2;
            [
                track * TRACK_SIZE + SKEW[first] * SECTOR_SIZE,
                track * TRACK_SIZE + SKEW[first + 1] * SECTOR_SIZE,
            ]
        }
    }
}

/// Reorder a whole payload from one sector order to the other
pub fn convert(data: &[u8], from: SectorOrder, to: SectorOrder) -> Vec<u8> {
    if from == to || data.len() % TRACK_SIZE != 0 {
        return data.to_vec();
    }
    let mut out = vec![0u8; data.len()];
    for track in 0..data.len() / TRACK_SIZE {
        for sector in 0..SECTORS_PER_TRACK {
            let src = dos_sector_offset(from, track, sector);
            let dst = dos_sector_offset(to, track, sector);
            out[dst..dst + SECTOR_SIZE].copy_from_slice(&data[src..src + SECTOR_SIZE]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_is_self_inverse() {
        for s in 0..SECTORS_PER_TRACK {
            assert_eq!(SKEW[SKEW[s]], s);
        }
    }

    #[test]
    fn test_block_two_in_dos_order() {
        // Block 2 is ProDOS sectors 4 and 5 of track 0, i.e. DOS sectors 11 and 10
        assert_eq!(
            prodos_block_offsets(SectorOrder::Dos, 2),
            [11 * SECTOR_SIZE, 10 * SECTOR_SIZE]
        );
        assert_eq!(prodos_block_offsets(SectorOrder::Prodos, 2), [1024, 1280]);
    }

    #[test]
    fn test_vtoc_sector_is_not_skewed() {
        assert_eq!(
            dos_sector_offset(SectorOrder::Dos, 17, 0),
            dos_sector_offset(SectorOrder::Prodos, 17, 0)
        );
        assert_eq!(dos_sector_offset(SectorOrder::Prodos, 0, 1), 14 * SECTOR_SIZE);
    }

    #[test]
    fn test_convert_round_trip() {
        let data: Vec<u8> = (0..TRACK_SIZE * 2).map(|i| (i / SECTOR_SIZE) as u8).collect();
        let po = convert(&data, SectorOrder::Dos, SectorOrder::Prodos);
        assert_ne!(po, data);
        assert_eq!(convert(&po, SectorOrder::Prodos, SectorOrder::Dos), data);
    }
}
