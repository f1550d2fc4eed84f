//! FAT file layer over the card
//!
//! Implements [`platform::Storage`] with `embedded-sdmmc`: the first volume's
//! root directory, one read-only file open at a time.

use embedded_sdmmc::{
    BlockDevice, Mode, RawDirectory, RawFile, RawVolume, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use platform::Storage;

/// File-layer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatError {
    /// No volume is mounted
    NotMounted,
    /// No file is open
    NoFile,
    /// The card holds no usable FAT volume
    NoVolume,
    /// The named file is not in the root directory
    NotFound,
    /// The card or the FAT layer failed
    Io,
}

impl core::fmt::Display for FatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotMounted => write!(f, "Volume not mounted"),
            Self::NoFile => write!(f, "No file open"),
            Self::NoVolume => write!(f, "No FAT volume on card"),
            Self::NotFound => write!(f, "File not found"),
            Self::Io => write!(f, "File layer I/O error"),
        }
    }
}

fn classify<E: core::fmt::Debug>(err: embedded_sdmmc::Error<E>) -> FatError {
    match err {
        embedded_sdmmc::Error::NotFound => FatError::NotFound,
        embedded_sdmmc::Error::FormatError(_) | embedded_sdmmc::Error::NoSuchVolume => FatError::NoVolume,
        _ => FatError::Io,
    }
}

/// The device has no clock; files are only ever read.
pub struct NoClock;

impl TimeSource for NoClock {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 0,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Root-directory file access on the first FAT volume of `D`.
pub struct FatStorage<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    volumes: VolumeManager<D, T>,
    volume: Option<RawVolume>,
    root: Option<RawDirectory>,
    file: Option<RawFile>,
}

impl<D, T> FatStorage<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    /// File access through `device`; nothing is read until [`Storage::mount`].
    pub fn new(device: D, clock: T) -> Self {
        Self {
            volumes: VolumeManager::new(device, clock),
            volume: None,
            root: None,
            file: None,
        }
    }

    fn root(&self) -> Result<RawDirectory, FatError> {
        self.root.ok_or(FatError::NotMounted)
    }

    fn close_file(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = self.volumes.close_file(file);
        }
    }
}

impl<D, T> Storage for FatStorage<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    type Error = FatError;

    fn mount(&mut self) -> Result<(), FatError> {
        self.unmount();
        let volume = self.volumes.open_raw_volume(VolumeIdx(0)).map_err(classify)?;
        match self.volumes.open_root_dir(volume) {
            Ok(root) => {
                self.volume = Some(volume);
                self.root = Some(root);
                Ok(())
            }
            Err(err) => {
                let _ = self.volumes.close_volume(volume);
                Err(classify(err))
            }
        }
    }

    fn exists(&mut self, name: &str) -> Result<bool, FatError> {
        let root = self.root()?;
        match self.volumes.find_directory_entry(root, name) {
            Ok(_) => Ok(true),
            Err(embedded_sdmmc::Error::NotFound) => Ok(false),
            Err(err) => Err(classify(err)),
        }
    }

    fn open(&mut self, name: &str) -> Result<(), FatError> {
        let root = self.root()?;
        self.close_file();
        let file = self
            .volumes
            .open_file_in_dir(root, name, Mode::ReadOnly)
            .map_err(classify)?;
        self.file = Some(file);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FatError> {
        let file = self.file.ok_or(FatError::NoFile)?;
        let mut filled = 0;
        while let Some(rest) = buf.get_mut(filled..) {
            if rest.is_empty() {
                break;
            }
            let count = match self.volumes.read(file, rest) {
                Ok(count) => count,
                Err(embedded_sdmmc::Error::EndOfFile) => 0,
                Err(err) => return Err(classify(err)),
            };
            if count == 0 {
                break;
            }
            filled = filled.saturating_add(count);
        }
        Ok(filled)
    }

    fn unmount(&mut self) {
        self.close_file();
        if let Some(root) = self.root.take() {
            let _ = self.volumes.close_dir(root);
        }
        if let Some(volume) = self.volume.take() {
            let _ = self.volumes.close_volume(volume);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use embedded_sdmmc::{Block, BlockCount, BlockIdx};

    /// A card full of zeroes: no partition table.
    struct BlankDisk;

    impl BlockDevice for BlankDisk {
        type Error = core::convert::Infallible;

        fn read(&self, blocks: &mut [Block], _start: BlockIdx, _reason: &str) -> Result<(), Self::Error> {
            for block in blocks {
                block.contents.fill(0);
            }
            Ok(())
        }

        fn write(&self, _blocks: &[Block], _start: BlockIdx) -> Result<(), Self::Error> {
            Ok(())
        }

        fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
            Ok(BlockCount(2048))
        }
    }

    #[test]
    fn blank_card_has_no_volume() {
        let mut storage = FatStorage::new(BlankDisk, NoClock);
        assert!(storage.mount().is_err());
        assert_eq!(storage.exists("1.ULV"), Err(FatError::NotMounted));
    }

    #[test]
    fn reads_need_an_open_file() {
        let mut storage = FatStorage::new(BlankDisk, NoClock);
        let mut buf = [0u8; 4];
        assert_eq!(storage.open("1.ULV"), Err(FatError::NotMounted));
        assert_eq!(storage.read(&mut buf), Err(FatError::NoFile));
    }

    #[test]
    fn unmount_without_mount_is_harmless() {
        let mut storage = FatStorage::new(BlankDisk, NoClock);
        storage.unmount();
        storage.unmount();
    }
}
