//! Property-based tests for the filesystem engines
//!
//! Uses proptest to check round trips and allocation invariants across random file sets

use a2disk::*;
use proptest::prelude::*;

fn mount(spec: ImageSpec) -> Volume {
    Volume::open(DiskImage::create(spec).unwrap()).unwrap()
}

fn free_count(volume: &Volume) -> usize {
    volume.usage().unwrap().iter().filter(|used| !**used).count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_prodos_round_trip(data in prop::collection::vec(any::<u8>(), 0..40_000)) {
        let mut vol = mount(ImageSpec::prodos_140k());
        let root = vol.root();
        let entry = vol.create_file(&root, "BLOB", 0x06, 0, &data).unwrap();
        prop_assert_eq!(vol.read_file(&entry).unwrap(), data);
    }

    #[test]
    fn prop_dos33_binary_round_trip(
        data in prop::collection::vec(any::<u8>(), 0..20_000),
        address in any::<u16>()
    ) {
        let mut vol = mount(ImageSpec::dos33_140k());
        let root = vol.root();
        let entry = vol.create_file(&root, "BLOB", 0x06, address, &data).unwrap();
        prop_assert_eq!(entry.aux_type, address);
        prop_assert_eq!(entry.size_bytes, data.len() as u64);
        prop_assert_eq!(vol.read_file(&entry).unwrap(), data);

        let retyped = vol.change_type(&entry, 0x06, address ^ 0x8000).unwrap();
        prop_assert_eq!(retyped.size_bytes, entry.size_bytes);
        prop_assert_eq!(retyped.first_block, entry.first_block);
    }

    #[test]
    fn prop_delete_restores_free_map(
        sizes in prop::collection::vec(0usize..12_000, 1..8),
        dos in any::<bool>()
    ) {
        let mut vol = mount(if dos { ImageSpec::dos33_140k() } else { ImageSpec::prodos_140k() });
        let root = vol.root();
        let before = vol.usage().unwrap();

        let mut created = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            let entry = vol
                .create_file(&root, &format!("F{}", i), 0x06, 0, &vec![i as u8; *size])
                .unwrap();
            created.push(entry);
        }
        prop_assert!(free_count(&vol) < before.iter().filter(|u| !**u).count());

        for entry in &created {
            vol.delete(entry, false).unwrap();
            let names: Vec<String> = vol.list(&root).unwrap().into_iter().map(|e| e.name).collect();
            prop_assert!(!names.contains(&entry.name));
        }
        prop_assert_eq!(vol.usage().unwrap(), before);
    }

    #[test]
    fn prop_usage_matches_info(sizes in prop::collection::vec(1usize..30_000, 1..5)) {
        let mut vol = mount(ImageSpec::prodos_800k());
        let root = vol.root();
        for (i, size) in sizes.iter().enumerate() {
            vol.create_file(&root, &format!("F{}", i), 0x06, 0, &vec![0xEE; *size]).unwrap();
        }
        prop_assert_eq!(free_count(&vol) as u32, vol.info().unwrap().free_blocks);
    }

    #[test]
    fn prop_rewrite_keeps_only_new_data(
        first in prop::collection::vec(any::<u8>(), 0..30_000),
        second in prop::collection::vec(any::<u8>(), 0..30_000)
    ) {
        let mut vol = mount(ImageSpec::prodos_140k());
        let root = vol.root();
        let free_before = free_count(&vol);
        let entry = vol.create_file(&root, "DATA", 0x06, 0, &first).unwrap();
        let entry = vol.write_file(&entry, &second).unwrap();
        prop_assert_eq!(vol.read_file(&entry).unwrap(), second);
        prop_assert_eq!(free_count(&vol), free_before - entry.blocks_used as usize);
    }
}
