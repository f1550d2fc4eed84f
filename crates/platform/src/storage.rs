//! File layer seam
//!
//! Tracks are read through a minimal sequential file layer: mount the
//! volume, open one file by name, read it front to back. Only one file is
//! open at a time.

/// Sequential read-only file access.
pub trait Storage {
    /// Error type
    type Error: core::fmt::Debug;

    /// Mount the volume.
    fn mount(&mut self) -> Result<(), Self::Error>;

    /// Whether a file called `name` exists in the root directory.
    fn exists(&mut self, name: &str) -> Result<bool, Self::Error>;

    /// Open `name` for reading, closing any previously open file.
    fn open(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Read from the open file; a short count means end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Close the open file and release the volume.
    fn unmount(&mut self);
}
