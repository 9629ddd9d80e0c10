/// I/O operations for reading and writing image and archive files

/// Binary II envelope handling
pub mod binary2;
/// Reader implementation for image and archive files
pub mod reader;
/// Writer implementation for image files
pub mod writer;

pub use binary2::{strip_envelope, Binary2Header};
pub use reader::{is_archive_file, read_archive, read_image};
pub use writer::write_image;
