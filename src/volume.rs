/// Volume facade: filesystem detection and a single API over every engine

use crate::error::{DiskError, Result};
use crate::filesystem::{
    DirectoryEntry, Dos33FileSystem, FileSystem, FileSystemInfo, FileSystemType, PascalFileSystem,
    ProDosFileSystem,
};
use crate::image::{BlockStore, DiskImage};
use crate::io::{is_archive_file, read_archive};
use crate::nufx::NufxArchive;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::path::Path;
use std::sync::Arc;

/// A mounted volume bound to the engine that recognised it
pub enum Volume {
    /// ProDOS volume
    ProDos(ProDosFileSystem),
    /// DOS 3.3 volume
    Dos33(Dos33FileSystem),
    /// UCSD Pascal volume
    Pascal(PascalFileSystem),
    /// NuFX archive (read only)
    Archive(NufxArchive),
}

impl Volume {
    /// Detect the filesystem on an image and mount it
    ///
    /// Engines are tried in the order ProDOS, DOS 3.3, UCSD Pascal. An engine
    /// that finds its signature but then hits a damaged structure stops the
    /// probe with that error. An image carrying both a ProDOS volume header
    /// and a valid DOS 3.3 VTOC is ambiguous and gives
    /// `UnrecognizedFilesystem`.
    pub fn open(image: DiskImage) -> Result<Self> {
        let prodos = match ProDosFileSystem::open(image.clone()) {
            Ok(fs) => Some(fs),
            Err(DiskError::UnrecognizedFilesystem) => None,
            Err(err) => return Err(err),
        };
        match (prodos, Dos33FileSystem::open(image.clone())) {
            (Some(_), Ok(_)) => {
                tracing::warn!("Image holds both a ProDOS volume and a DOS 3.3 VTOC");
                Err(DiskError::UnrecognizedFilesystem)
            }
            (Some(fs), Err(_)) => Ok(Volume::ProDos(fs)),
            (None, Ok(fs)) => Ok(Volume::Dos33(fs)),
            (None, Err(DiskError::UnrecognizedFilesystem)) => {
                Ok(Volume::Pascal(PascalFileSystem::open(image)?))
            }
            (None, Err(err)) => Err(err),
        }
    }

    /// Open a host file, either a disk image or a NuFX archive
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if is_archive_file(path) {
            return Ok(Volume::Archive(read_archive(path)?));
        }
        let volume = Self::open(DiskImage::open(path)?)?;
        tracing::info!("Mounted {} volume from {}", volume.fs_type(), path.display());
        Ok(volume)
    }

    /// Wrap an already parsed archive
    pub fn from_archive(archive: NufxArchive) -> Self {
        Volume::Archive(archive)
    }

    /// Underlying block store, if the volume lives on a disk image
    pub fn store(&self) -> Option<&BlockStore> {
        match self {
            Volume::ProDos(fs) => Some(fs.store()),
            Volume::Dos33(fs) => Some(fs.store()),
            Volume::Pascal(fs) => Some(fs.store()),
            Volume::Archive(_) => None,
        }
    }

    fn store_mut(&mut self) -> Option<&mut BlockStore> {
        match self {
            Volume::ProDos(fs) => Some(fs.store_mut()),
            Volume::Dos33(fs) => Some(fs.store_mut()),
            Volume::Pascal(fs) => Some(fs.store_mut()),
            Volume::Archive(_) => None,
        }
    }

    /// Underlying disk image, if any
    pub fn image(&self) -> Option<&DiskImage> {
        self.store().map(|s| s.image())
    }

    /// Check if the volume has unsaved changes
    pub fn is_changed(&self) -> bool {
        self.image().map(|i| i.is_changed()).unwrap_or(false)
    }

    /// Write the image back to a host file
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let image = self
            .store_mut()
            .map(|s| s.image_mut())
            .ok_or_else(|| DiskError::unsupported("saving a NuFX archive"))?;
        image.save(path)
    }

    /// Give back the disk image, or `None` for an archive
    pub fn into_image(self) -> Option<DiskImage> {
        match self {
            Volume::ProDos(fs) => Some(fs.into_image()),
            Volume::Dos33(fs) => Some(fs.into_image()),
            Volume::Pascal(fs) => Some(fs.into_image()),
            Volume::Archive(_) => None,
        }
    }

    fn engine(&self) -> &dyn FileSystem {
        match self {
            Volume::ProDos(fs) => fs,
            Volume::Dos33(fs) => fs,
            Volume::Pascal(fs) => fs,
            Volume::Archive(archive) => archive,
        }
    }

    fn engine_mut(&mut self) -> &mut dyn FileSystem {
        match self {
            Volume::ProDos(fs) => fs,
            Volume::Dos33(fs) => fs,
            Volume::Pascal(fs) => fs,
            Volume::Archive(archive) => archive,
        }
    }
}

impl FileSystem for Volume {
    fn fs_type(&self) -> FileSystemType {
        self.engine().fs_type()
    }

    fn root(&self) -> DirectoryEntry {
        self.engine().root()
    }

    fn list(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        self.engine().list(dir)
    }

    fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        self.engine().read_file(entry)
    }

    fn read_resource_fork(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        self.engine().read_resource_fork(entry)
    }

    fn info(&self) -> Result<FileSystemInfo> {
        self.engine().info()
    }

    fn usage(&self) -> Result<Vec<bool>> {
        self.engine().usage()
    }

    fn lookup(&self, path: &str) -> Result<DirectoryEntry> {
        self.engine().lookup(path)
    }

    fn create_file(
        &mut self,
        dir: &DirectoryEntry,
        name: &str,
        file_type: u8,
        aux_type: u16,
        data: &[u8],
    ) -> Result<DirectoryEntry> {
        self.engine_mut().create_file(dir, name, file_type, aux_type, data)
    }

    fn create_directory(&mut self, dir: &DirectoryEntry, name: &str) -> Result<DirectoryEntry> {
        self.engine_mut().create_directory(dir, name)
    }

    fn write_file(&mut self, entry: &DirectoryEntry, data: &[u8]) -> Result<DirectoryEntry> {
        self.engine_mut().write_file(entry, data)
    }

    fn delete(&mut self, entry: &DirectoryEntry, recursive: bool) -> Result<()> {
        self.engine_mut().delete(entry, recursive)
    }

    fn rename(&mut self, entry: &DirectoryEntry, new_name: &str) -> Result<DirectoryEntry> {
        self.engine_mut().rename(entry, new_name)
    }

    fn move_entry(
        &mut self,
        entry: &DirectoryEntry,
        new_dir: &DirectoryEntry,
    ) -> Result<DirectoryEntry> {
        self.engine_mut().move_entry(entry, new_dir)
    }

    fn change_type(
        &mut self,
        entry: &DirectoryEntry,
        file_type: u8,
        aux_type: u16,
    ) -> Result<DirectoryEntry> {
        self.engine_mut().change_type(entry, file_type, aux_type)
    }

    fn set_locked(&mut self, entry: &DirectoryEntry, locked: bool) -> Result<DirectoryEntry> {
        self.engine_mut().set_locked(entry, locked)
    }
}

/// A volume shared between threads
///
/// Listing and reading take the read lock and may run concurrently;
/// every mutation takes the write lock. Clone is cheap (just clones the Arc).
#[derive(Clone)]
pub struct SharedVolume {
    inner: Arc<RwLock<Volume>>,
}

impl SharedVolume {
    /// Share a mounted volume
    pub fn new(volume: Volume) -> Self {
        Self {
            inner: Arc::new(RwLock::new(volume)),
        }
    }

    /// Take the read lock
    pub fn read(&self) -> RwLockReadGuard<'_, Volume> {
        self.inner.read()
    }

    /// Take the write lock
    pub fn write(&self) -> RwLockWriteGuard<'_, Volume> {
        self.inner.write()
    }

    /// List a directory
    pub fn list(&self, dir: &DirectoryEntry) -> Result<Vec<DirectoryEntry>> {
        self.inner.read().list(dir)
    }

    /// Find an entry by path
    pub fn lookup(&self, path: &str) -> Result<DirectoryEntry> {
        self.inner.read().lookup(path)
    }

    /// Read a file's data
    pub fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        self.inner.read().read_file(entry)
    }

    /// Get filesystem information
    pub fn info(&self) -> Result<FileSystemInfo> {
        self.inner.read().info()
    }

    /// Create a file holding `data`
    pub fn create_file(
        &self,
        dir: &DirectoryEntry,
        name: &str,
        file_type: u8,
        aux_type: u16,
        data: &[u8],
    ) -> Result<DirectoryEntry> {
        self.inner.write().create_file(dir, name, file_type, aux_type, data)
    }

    /// Replace a file's contents
    pub fn write_file(&self, entry: &DirectoryEntry, data: &[u8]) -> Result<DirectoryEntry> {
        self.inner.write().write_file(entry, data)
    }

    /// Delete an entry
    pub fn delete(&self, entry: &DirectoryEntry, recursive: bool) -> Result<()> {
        self.inner.write().delete(entry, recursive)
    }

    /// Unwrap the volume if this is the last handle
    pub fn try_unwrap(self) -> std::result::Result<Volume, Self> {
        Arc::try_unwrap(self.inner)
            .map(RwLock::into_inner)
            .map_err(|inner| Self { inner })
    }
}
