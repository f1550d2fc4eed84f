//! In-memory file layer.

use crate::storage::Storage;

/// Errors from [`MemoryStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStorageError {
    /// Mount refused
    MountFailed,
    /// Operation before mount
    NotMounted,
    /// No file by that name
    NotFound,
    /// Read without an open file
    NoFile,
    /// Injected read failure
    Io,
}

impl core::fmt::Display for MemoryStorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MountFailed => write!(f, "Mount failed"),
            Self::NotMounted => write!(f, "Volume not mounted"),
            Self::NotFound => write!(f, "File not found"),
            Self::NoFile => write!(f, "No file open"),
            Self::Io => write!(f, "Read failed"),
        }
    }
}

impl std::error::Error for MemoryStorageError {}

struct OpenFile {
    index: usize,
    position: usize,
}

/// Named files held in memory behind the [`Storage`] trait.
#[derive(Default)]
pub struct MemoryStorage {
    files: Vec<(String, Vec<u8>)>,
    mounted: bool,
    open: Option<OpenFile>,
    fail_mount: bool,
    fail_read_after: Option<usize>,
    mounts: u32,
    unmounts: u32,
}

impl MemoryStorage {
    /// An empty volume.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    #[must_use]
    pub fn with_file(mut self, name: &str, contents: Vec<u8>) -> Self {
        self.insert(name, contents);
        self
    }

    /// Add or replace a file.
    pub fn insert(&mut self, name: &str, contents: Vec<u8>) {
        match self.files.iter_mut().find(|(n, _)| n == name) {
            Some(file) => file.1 = contents,
            None => self.files.push((name.to_owned(), contents)),
        }
    }

    /// Make every mount attempt fail.
    pub fn set_fail_mount(&mut self, fail: bool) {
        self.fail_mount = fail;
    }

    /// Fail reads once `bytes` of the open file have been delivered.
    pub fn set_fail_read_after(&mut self, bytes: Option<usize>) {
        self.fail_read_after = bytes;
    }

    /// Whether the volume is mounted.
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Number of successful mounts.
    pub fn mounts(&self) -> u32 {
        self.mounts
    }

    /// Number of unmounts.
    pub fn unmounts(&self) -> u32 {
        self.unmounts
    }
}

impl Storage for MemoryStorage {
    type Error = MemoryStorageError;

    fn mount(&mut self) -> Result<(), Self::Error> {
        if self.fail_mount {
            return Err(MemoryStorageError::MountFailed);
        }
        self.mounted = true;
        self.mounts += 1;
        Ok(())
    }

    fn exists(&mut self, name: &str) -> Result<bool, Self::Error> {
        if !self.mounted {
            return Err(MemoryStorageError::NotMounted);
        }
        Ok(self.files.iter().any(|(n, _)| n == name))
    }

    fn open(&mut self, name: &str) -> Result<(), Self::Error> {
        if !self.mounted {
            return Err(MemoryStorageError::NotMounted);
        }
        self.open = None;
        let index = self
            .files
            .iter()
            .position(|(n, _)| n == name)
            .ok_or(MemoryStorageError::NotFound)?;
        self.open = Some(OpenFile { index, position: 0 });
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if !self.mounted {
            return Err(MemoryStorageError::NotMounted);
        }
        let open = self.open.as_mut().ok_or(MemoryStorageError::NoFile)?;
        if self.fail_read_after.is_some_and(|limit| open.position >= limit) {
            return Err(MemoryStorageError::Io);
        }
        let contents = &self.files[open.index].1;
        let remaining = contents.len().saturating_sub(open.position);
        let count = remaining.min(buf.len());
        buf[..count].copy_from_slice(&contents[open.position..open.position + count]);
        open.position += count;
        Ok(count)
    }

    fn unmount(&mut self) {
        self.open = None;
        if self.mounted {
            self.mounted = false;
            self.unmounts += 1;
        }
    }
}
