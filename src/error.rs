use thiserror::Error;

/// Result type alias for disk image operations
pub type Result<T> = std::result::Result<T, DiskError>;

/// Errors that can occur when working with Apple II disk images and archives
#[derive(Debug, Error)]
pub enum DiskError {
    /// I/O error occurred while reading or writing a host file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The container framing could not be identified
    #[error("Unrecognized image format: {0}")]
    UnrecognizedFormat(String),

    /// No supported filesystem was found on the image
    #[error("Unrecognized filesystem")]
    UnrecognizedFilesystem,

    /// Block or sector index beyond the volume
    #[error("Block {block} out of range (count: {count})")]
    OutOfRange {
        /// Requested block or sector index
        block: u32,
        /// Number of addressable units
        count: u32,
    },

    /// A buffer handed to the block store has the wrong length
    #[error("Invalid block size: expected {expected} bytes, got {actual}")]
    InvalidBlockSize {
        /// Unit size of the store
        expected: usize,
        /// Length of the buffer supplied
        actual: usize,
    },

    /// Another entry in the same directory already has this name
    #[error("Name already in use: {0}")]
    NameCollision(String),

    /// Name violates the filesystem's naming rules
    #[error("Invalid filename: {0}")]
    InvalidName(String),

    /// Directory still has entries and recursive deletion was not requested
    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Fixed-size directory has no free slot
    #[error("Directory full")]
    DirectoryFull,

    /// Not enough free blocks or sectors
    #[error("Volume full: no free space available")]
    VolumeFull,

    /// File exceeds the largest size the filesystem can represent
    #[error("File too large: {0} bytes")]
    FileTooLarge(u64),

    /// File is locked against modification
    #[error("File locked: {0}")]
    FileLocked(String),

    /// File or directory entry not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Entry used as a directory is a plain file
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Directory move would create a cycle
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// Bound engine or format does not support the operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Archive data failed its CRC check or could not be fully decoded.
    /// `partial` holds whatever bytes were recovered.
    #[error("Corrupt archive: {message}")]
    CorruptArchive {
        /// What went wrong
        message: String,
        /// Best-effort decoded bytes
        partial: Vec<u8>,
    },

    /// An on-disk pointer, count or bitmap entry contradicts itself
    #[error("Corrupt structure: {0}")]
    CorruptStructure(String),
}

impl DiskError {
    /// Create an unrecognized format error
    pub fn unrecognized<S: Into<String>>(message: S) -> Self {
        DiskError::UnrecognizedFormat(message.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        DiskError::UnsupportedOperation(operation.into())
    }

    /// Create a corrupt structure error
    pub fn corrupt<S: Into<String>>(message: S) -> Self {
        DiskError::CorruptStructure(message.into())
    }

    /// Create a corrupt archive error carrying recovered bytes
    pub fn corrupt_archive<S: Into<String>>(message: S, partial: Vec<u8>) -> Self {
        DiskError::CorruptArchive {
            message: message.into(),
            partial,
        }
    }

    /// Bytes recovered from a soft archive failure, if any
    pub fn partial_data(&self) -> Option<&[u8]> {
        match self {
            DiskError::CorruptArchive { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
