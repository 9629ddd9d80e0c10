/// Integration tests for a2disk

use a2disk::format::constants::*;
use a2disk::image::BlockSize;
use a2disk::nufx::crc::crc16;
use a2disk::*;

fn prodos_volume(spec: ImageSpec) -> Volume {
    let image = DiskImage::create(spec).expect("Failed to create image");
    Volume::open(image).expect("Failed to mount volume")
}

fn free_units(volume: &Volume) -> u32 {
    volume.info().expect("Failed to get info").free_blocks
}

#[test]
fn test_prodos_round_trip_sizes() {
    // empty, one block, seedling limit, first sapling, sapling limit, tree
    for size in [0usize, 1, 512, 513, 256 * 512, 256 * 512 + 1] {
        let mut vol = prodos_volume(ImageSpec::prodos_800k());
        let root = vol.root();
        let data: Vec<u8> = (0..size).map(|i| (i * 7 % 251) as u8).collect();
        let entry = vol
            .create_file(&root, "DATA", 0x06, 0x2000, &[])
            .expect("Failed to create file");
        let entry = vol.write_file(&entry, &data).expect("Failed to write file");
        assert_eq!(entry.size_bytes, size as u64);
        assert_eq!(vol.read_file(&entry).expect("Failed to read file"), data, "size {}", size);
    }
}

#[test]
fn test_prodos_storage_types() {
    let mut vol = prodos_volume(ImageSpec::prodos_800k());
    let root = vol.root();
    let seed = vol.create_file(&root, "SEED", 0x06, 0, &[1; 512]).unwrap();
    let sap = vol.create_file(&root, "SAP", 0x06, 0, &[2; 513]).unwrap();
    let tree = vol
        .create_file(&root, "TREE", 0x06, 0, &vec![3; 256 * 512 + 1])
        .unwrap();
    assert_eq!(seed.storage, StorageType::Seedling);
    assert_eq!(sap.storage, StorageType::Sapling);
    assert_eq!(tree.storage, StorageType::Tree);
    assert_eq!(seed.blocks_used, 1);
    assert_eq!(sap.blocks_used, 3);
    // 257 data blocks, 2 index blocks and the master index
    assert_eq!(tree.blocks_used, 260);
}

#[test]
fn test_delete_frees_every_block() {
    let mut vol = prodos_volume(ImageSpec::prodos_800k());
    let root = vol.root();
    let before = vol.usage().unwrap();
    let dir = vol.create_directory(&root, "WORK").unwrap();
    let file = vol
        .create_file(&dir, "BIG", 0x06, 0, &vec![0xAA; 200_000])
        .unwrap();
    assert!(free_units(&vol) < before.iter().filter(|u| !**u).count() as u32);

    vol.delete(&file, false).unwrap();
    let dir = vol.lookup("WORK").unwrap();
    assert!(vol.list(&dir).unwrap().is_empty());
    vol.delete(&dir, false).unwrap();

    assert!(vol.list(&root).unwrap().iter().all(|e| e.name != "WORK"));
    assert_eq!(vol.usage().unwrap(), before);
}

#[test]
fn test_recursive_delete() {
    let mut vol = prodos_volume(ImageSpec::prodos_140k());
    let root = vol.root();
    let before = vol.usage().unwrap();
    let outer = vol.create_directory(&root, "OUTER").unwrap();
    let inner = vol.create_directory(&outer, "INNER").unwrap();
    vol.create_file(&inner, "A", 0x04, 0, b"text").unwrap();

    let outer = vol.lookup("OUTER").unwrap();
    assert!(matches!(
        vol.delete(&outer, false),
        Err(DiskError::DirectoryNotEmpty(_))
    ));
    vol.delete(&outer, true).unwrap();
    assert_eq!(vol.usage().unwrap(), before);
}

#[test]
fn test_change_type_keeps_file() {
    let mut vol = prodos_volume(ImageSpec::prodos_140k());
    let root = vol.root();
    let data = vec![0x60; 3000];
    let file = vol.create_file(&root, "CODE", 0x06, 0x0800, &data).unwrap();
    let usage = vol.usage().unwrap();

    let changed = vol.change_type(&file, 0xFF, 0x2000).unwrap();
    assert_eq!(changed.file_type, 0xFF);
    assert_eq!(changed.aux_type, 0x2000);
    assert_eq!(changed.name, file.name);
    assert_eq!(changed.size_bytes, file.size_bytes);
    assert_eq!(changed.first_block, file.first_block);
    assert_eq!(changed.storage, file.storage);
    assert_eq!(vol.usage().unwrap(), usage);
    assert_eq!(vol.read_file(&changed).unwrap(), data);
}

#[test]
fn test_rename_collisions() {
    let mut vol = prodos_volume(ImageSpec::prodos_140k());
    let root = vol.root();
    let a = vol.create_file(&root, "ALPHA", 0x04, 0, b"a").unwrap();
    vol.create_file(&root, "BETA", 0x04, 0, b"b").unwrap();
    let sub = vol.create_directory(&root, "SUB").unwrap();
    let other = vol.create_file(&sub, "GAMMA", 0x04, 0, b"g").unwrap();

    assert!(matches!(
        vol.rename(&a, "BETA"),
        Err(DiskError::NameCollision(_))
    ));
    assert!(matches!(
        vol.rename(&a, "beta"),
        Err(DiskError::NameCollision(_))
    ));
    let renamed = vol.rename(&other, "BETA").unwrap();
    assert_eq!(renamed.name, "BETA");
    assert_eq!(vol.lookup("SUB/BETA").unwrap().size_bytes, 1);
    assert_eq!(vol.lookup("BETA").unwrap().size_bytes, 1);
}

#[test]
fn test_move_into_own_subtree_fails() {
    let mut vol = prodos_volume(ImageSpec::prodos_140k());
    let root = vol.root();
    let outer = vol.create_directory(&root, "OUTER").unwrap();
    let inner = vol.create_directory(&outer, "INNER").unwrap();
    let outer = vol.lookup("OUTER").unwrap();

    assert!(matches!(
        vol.move_entry(&outer, &inner),
        Err(DiskError::InvalidMove(_))
    ));
    let file = vol.create_file(&root, "F", 0x04, 0, b"moved").unwrap();
    let moved = vol.move_entry(&file, &inner).unwrap();
    assert_eq!(vol.read_file(&moved).unwrap(), b"moved");
    assert!(vol.lookup("OUTER/INNER/F").is_ok());
    assert!(vol.lookup("F").is_err());
}

#[test]
fn test_prodos_volume_full_leaves_volume_unchanged() {
    let mut vol = prodos_volume(ImageSpec::prodos_140k());
    let root = vol.root();
    let chunk = vec![0x55; 20 * 1024];
    let mut i = 0;
    loop {
        match vol.create_file(&root, &format!("FILL{}", i), 0x06, 0, &chunk) {
            Ok(_) => i += 1,
            Err(DiskError::VolumeFull) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let bytes = vol.image().unwrap().data().to_vec();
    let listing = vol.list(&root).unwrap();
    assert!(matches!(
        vol.create_file(&root, "MORE", 0x06, 0, &chunk),
        Err(DiskError::VolumeFull)
    ));
    assert_eq!(vol.image().unwrap().data(), bytes.as_slice());
    assert_eq!(vol.list(&root).unwrap(), listing);
}

#[test]
fn test_dos33_scenario() {
    let mut vol = Volume::open(DiskImage::create(ImageSpec::dos33_140k()).unwrap()).unwrap();
    let root = vol.root();
    let before = vol.usage().unwrap();
    let free_before = free_units(&vol);
    // Tracks 0 and 17 are reserved
    assert_eq!(free_before, 33 * 16);
    assert!(before[17 * 16]);

    let small = vol.create_file(&root, "SMALL", 0x04, 0, &[b'A' | 0x80; 100]).unwrap();
    assert_eq!(free_units(&vol), free_before - 2);
    assert_eq!(small.dos_type, Some(DosFileType::Text));

    let text = vol.create_file(&root, "NOTES", 0x04, 0, &[b'B' | 0x80; 300]).unwrap();
    assert_eq!(free_units(&vol), free_before - 5);
    assert_eq!(text.blocks_used, 3);
    assert_eq!(vol.read_file(&text).unwrap(), vec![b'B' | 0x80; 300]);

    vol.delete(&text, false).unwrap();
    vol.delete(&small, false).unwrap();
    assert_eq!(vol.usage().unwrap(), before);
    assert!(vol.list(&root).unwrap().is_empty());
}

#[test]
fn test_dos33_binary_keeps_contents_and_load_address() {
    let mut vol = Volume::open(DiskImage::create(ImageSpec::dos33_140k()).unwrap()).unwrap();
    let root = vol.root();
    let data = [0xAB; 300];
    let entry = vol.create_file(&root, "PROG", 0x06, 0x2000, &data).unwrap();
    assert_eq!(entry.aux_type, 0x2000);
    assert_eq!(entry.size_bytes, 300);
    assert_eq!(vol.read_file(&entry).unwrap(), data);

    let retyped = vol.change_type(&entry, 0x06, 0x4000).unwrap();
    assert_eq!(retyped.aux_type, 0x4000);
    assert_eq!(retyped.size_bytes, entry.size_bytes);
    assert_eq!(retyped.first_block, entry.first_block);
    assert_eq!(retyped.name, entry.name);
    assert_eq!(vol.read_file(&retyped).unwrap(), data);

    let text = vol.create_file(&root, "NOTES", 0x04, 0, &[b'T' | 0x80; 300]).unwrap();
    let listed = vol.lookup("NOTES").unwrap();
    assert_eq!(listed.size_bytes, vol.read_file(&text).unwrap().len() as u64);
    let as_binary = vol.change_type(&listed, 0x06, 0).unwrap();
    assert_eq!(as_binary.size_bytes, listed.size_bytes);
    assert_eq!(as_binary.blocks_used, listed.blocks_used);
    assert_eq!(vol.read_file(&as_binary).unwrap(), vec![b'T' | 0x80; 300]);
}

#[test]
fn test_dos33_volume_full_leaves_volume_unchanged() {
    let mut vol = Volume::open(DiskImage::create(ImageSpec::dos33_140k()).unwrap()).unwrap();
    let root = vol.root();
    let bytes = vol.image().unwrap().data().to_vec();
    assert!(matches!(
        vol.create_file(&root, "HUGE", 0x04, 0, &vec![0xC1; 140 * 1024]),
        Err(DiskError::VolumeFull)
    ));
    assert_eq!(vol.image().unwrap().data(), bytes.as_slice());
}

#[test]
fn test_interleave_do_and_po_agree() {
    let mut vol = prodos_volume(ImageSpec::prodos_140k());
    let root = vol.root();
    let payload: Vec<u8> = (0..20_000).map(|i| (i % 256) as u8).collect();
    vol.create_file(&root, "PATTERN", 0x06, 0, &payload).unwrap();
    let po = vol.into_image().unwrap();

    // Lay the same logical sectors out in DOS order
    let sectors = BlockStore::new(po.clone(), BlockSize::Sector256);
    let mut do_bytes = vec![0u8; FLOPPY_140K_SIZE];
    for n in 0..sectors.block_count() {
        let at = n as usize * SECTOR_SIZE;
        do_bytes[at..at + SECTOR_SIZE].copy_from_slice(&sectors.read_block(n).unwrap());
    }
    // Block 2 lives in DOS sectors 11 and 10 of track 0
    assert_eq!(&do_bytes[11 * SECTOR_SIZE..12 * SECTOR_SIZE], &po.data()[1024..1280]);
    assert_eq!(&do_bytes[10 * SECTOR_SIZE..11 * SECTOR_SIZE], &po.data()[1280..1536]);

    let dos_order = DiskImage::from_bytes(do_bytes, Some("do")).unwrap();
    assert_eq!(dos_order.order(), SectorOrder::Dos);
    let a = BlockStore::new(po, BlockSize::Block512);
    let b = BlockStore::new(dos_order.clone(), BlockSize::Block512);
    for n in 0..a.block_count() {
        assert_eq!(a.read_block(n).unwrap(), b.read_block(n).unwrap(), "block {}", n);
    }

    let vol = Volume::open(dos_order).unwrap();
    let file = vol.lookup("PATTERN").unwrap();
    assert_eq!(vol.read_file(&file).unwrap(), payload);
}

#[test]
fn test_save_and_reopen_containers() {
    let dir = tempfile::tempdir().unwrap();
    for (spec, name) in [
        (ImageSpec::prodos_140k(), "disk.po"),
        (ImageSpec::prodos_800k(), "disk.2mg"),
        (ImageSpec::dos33_140k(), "disk.do"),
    ] {
        let path = dir.path().join(name);
        let mut vol = Volume::open(DiskImage::create(spec).unwrap()).unwrap();
        let root = vol.root();
        vol.create_file(&root, "KEEP", 0x04, 0, b"persisted").unwrap();
        vol.save(&path).unwrap();

        let vol = Volume::open_path(&path).unwrap();
        let entry = vol.lookup("KEEP").unwrap();
        assert_eq!(vol.read_file(&entry).unwrap(), b"persisted", "{}", name);
    }
}

#[test]
fn test_unrecognized_inputs() {
    assert!(matches!(
        DiskImage::from_bytes(vec![0; 1000], None),
        Err(DiskError::UnrecognizedFormat(_))
    ));
    let blank = DiskImage::from_bytes(vec![0; FLOPPY_140K_SIZE], Some("do")).unwrap();
    assert!(matches!(
        Volume::open(blank),
        Err(DiskError::UnrecognizedFilesystem)
    ));
}

/// Build a one-record NuFX archive with a stored data fork
fn shrinkit_archive(name: &str, data: &[u8], corrupt: bool) -> Vec<u8> {
    let attrib_count = 58usize;
    let mut record = vec![0u8; attrib_count];
    record[0..4].copy_from_slice(NUFX_RECORD_SIGNATURE);
    write_u16(&mut record, 6, attrib_count as u16);
    write_u16(&mut record, 8, 3);
    write_u32(&mut record, 10, 2);
    write_u16(&mut record, 16, b'/' as u16);
    write_u32(&mut record, 22, 0x04);

    let mut payload = data.to_vec();
    let threads = [(3u16, 0u16, name.as_bytes().to_vec()), (2, 0, data.to_vec())];
    for (class, kind, bytes) in &threads {
        let mut th = vec![0u8; 16];
        write_u16(&mut th, 0, *class);
        write_u16(&mut th, 4, *kind);
        write_u16(&mut th, 6, crc16(0xFFFF, bytes));
        write_u32(&mut th, 8, bytes.len() as u32);
        write_u32(&mut th, 12, bytes.len() as u32);
        record.extend(th);
    }
    let crc = crc16(0, &record[6..]);
    write_u16(&mut record, 4, crc);
    record.extend(name.as_bytes());
    if corrupt {
        payload[0] ^= 0xFF;
    }
    record.extend(&payload);

    let mut out = vec![0u8; 48];
    out[0..6].copy_from_slice(NUFX_MASTER_SIGNATURE);
    write_u32(&mut out, 8, 1);
    write_u16(&mut out, 28, 2);
    out.extend(record);
    let len = out.len() as u32;
    write_u32(&mut out, 38, len);
    let crc = crc16(0, &out[8..48]);
    write_u16(&mut out, 6, crc);
    out
}

#[test]
fn test_nufx_open_and_extract() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stuff.shk");
    std::fs::write(&path, shrinkit_archive("DOCS/README", b"Hello, Apple II", false)).unwrap();

    let vol = Volume::open_path(&path).unwrap();
    assert_eq!(vol.fs_type(), FileSystemType::Nufx);
    let entry = vol.lookup("DOCS/README").unwrap();
    assert_eq!(entry.storage, StorageType::Archived);
    assert_eq!(vol.read_file(&entry).unwrap(), b"Hello, Apple II");
}

#[test]
fn test_nufx_corrupt_crc_returns_partial_data() {
    let bytes = shrinkit_archive("README", b"Hello, Apple II", true);
    let archive = NufxArchive::from_bytes(bytes).unwrap();
    let record = &archive.records()[0];
    match archive.extract(record) {
        Err(err @ DiskError::CorruptArchive { .. }) => {
            let partial = err.partial_data().unwrap();
            assert_eq!(partial.len(), 15);
            assert_eq!(&partial[1..], b"ello, Apple II");
        }
        other => panic!("expected CorruptArchive, got {:?}", other),
    }
}
