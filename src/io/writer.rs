/// Image file writer

use crate::error::Result;
use crate::image::DiskImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write an image file to disk with its container framing
pub fn write_image<P: AsRef<Path>>(image: &DiskImage, path: P) -> Result<()> {
    let path = path.as_ref();
    let bytes = image.to_bytes();
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.flush()?;
    tracing::info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ImageSpec;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.2mg");
        let mut image = DiskImage::builder()
            .spec(ImageSpec::prodos_800k())
            .volume_name("WORK")
            .comment("scratch disk")
            .build()
            .unwrap();
        image.save(&path).unwrap();
        assert!(!image.is_changed());

        let loaded = DiskImage::open(&path).unwrap();
        assert_eq!(loaded.to_bytes(), image.to_bytes());
        assert_eq!(loaded.comment().as_deref(), Some("scratch disk"));
    }
}
