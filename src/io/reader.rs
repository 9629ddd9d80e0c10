/// Image and archive file reader

use crate::error::Result;
use crate::format::{detect_archive, ArchiveKind};
use crate::image::DiskImage;
use crate::io::binary2::strip_envelope;
use crate::nufx::NufxArchive;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ARCHIVE_EXTENSIONS: &[&str] = &["shk", "sdk", "bxy", "bny"];

/// Read an image file from disk
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<DiskImage> {
    let path = path.as_ref();
    let bytes = read_all(path)?;
    let mut image = DiskImage::from_bytes(bytes, extension(path))?;
    image.filename = file_name(path);
    tracing::info!(
        "Opened {} as {} ({} blocks)",
        path.display(),
        image.kind().name(),
        image.block_count()
    );
    Ok(image)
}

/// Read a NuFX archive, unwrapping a Binary II envelope if present
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<NufxArchive> {
    let path = path.as_ref();
    let mut bytes = read_all(path)?;
    if detect_archive(&bytes) == Some(ArchiveKind::Binary2) {
        bytes = strip_envelope(bytes)?;
    }
    let archive = NufxArchive::from_bytes(bytes)?;
    let name = file_name(path).unwrap_or_default();
    tracing::info!("Opened archive {} ({} records)", path.display(), archive.len());
    Ok(archive.with_name(&name))
}

/// Check whether a file is an archive rather than a disk image
///
/// Looks at the extension first, then at the leading signature bytes.
pub fn is_archive_file<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    let by_extension = extension(path)
        .map(|e| ARCHIVE_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
        .unwrap_or(false);
    if by_extension {
        return true;
    }

    let mut head = [0u8; 128];
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..]) {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    detect_archive(&head[..filled]).is_some()
}

fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ImageSpec;
    use crate::io::binary2::tests::wrap;
    use crate::nufx::tests::{archive, record, TestThread};
    use crate::nufx::{class, data_kind};
    use std::io::Write;

    #[test]
    fn test_read_image_sets_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.po");
        let image = DiskImage::create(ImageSpec::prodos_140k()).unwrap();
        File::create(&path)
            .unwrap()
            .write_all(&image.to_bytes())
            .unwrap();

        let loaded = read_image(&path).unwrap();
        assert_eq!(loaded.filename(), Some("blank.po"));
        assert_eq!(loaded.block_count(), 280);
    }

    #[test]
    fn test_read_archive_through_binary2() {
        let dir = tempfile::tempdir().unwrap();
        let shk = archive(&[record(
            "HELLO",
            0x04,
            0,
            vec![TestThread::stored(class::DATA, data_kind::DATA_FORK, b"HI")],
        )]);
        let path = dir.path().join("hello.bxy");
        File::create(&path)
            .unwrap()
            .write_all(&wrap("HELLO.SHK", &shk))
            .unwrap();

        assert!(is_archive_file(&path));
        let archive = read_archive(&path).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.extract(&archive.records()[0]).unwrap(), b"HI");
    }

    #[test]
    fn test_is_archive_by_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noext");
        File::create(&path)
            .unwrap()
            .write_all(&archive(&[]))
            .unwrap();
        assert!(is_archive_file(&path));
        assert!(!is_archive_file(dir.path().join("missing.po")));
    }
}
