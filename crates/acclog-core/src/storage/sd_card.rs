use core::fmt::Write;

use embedded_sdmmc::{
    BlockDevice, DirEntry, Mode, RawDirectory, RawFile, RawVolume, SdCardError, TimeSource,
    Timestamp, VolumeIdx, VolumeManager,
};
use log::{debug, info, warn};
use thiserror_no_std::Error;

use super::writer::LogSink;
use crate::settings::Settings;

/// Runtime settings persisted next to the logs
pub const SETTINGS_FILE: &str = "SETTINGS.BIN";

const LOG_PREFIX: &str = "LOG";
const LOG_EXTENSION: &str = "CSV";
/// Highest index that still fits the five digit file name
pub const MAX_LOG_INDEX: u32 = 99_999;

/// 8.3 file name, e.g. `LOG00042.CSV`
pub type LogName = heapless::String<12>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SD card error: {0:?}")]
    Card(embedded_sdmmc::Error<SdCardError>),
    #[error("SD card is not mounted")]
    NotMounted,
    #[error("all log file names are in use")]
    NamesExhausted,
    #[error("no log file is open")]
    NoActiveLog,
    #[error("file is being recorded")]
    FileBusy,
    #[error("not a log file name")]
    InvalidName,
    #[error("settings could not be encoded")]
    Encoding,
}

impl From<embedded_sdmmc::Error<SdCardError>> for StorageError {
    fn from(e: embedded_sdmmc::Error<SdCardError>) -> Self {
        Self::Card(e)
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Card(embedded_sdmmc::Error::NotFound))
    }
}

/// A log file found on the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub name: LogName,
    pub size: u32,
}

/// Time source for a board without an RTC
///
/// Every file is stamped with the same date.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

struct ActiveLog {
    file: RawFile,
    name: LogName,
    bytes: u32,
}

/// Log and settings files in the root directory of the first FAT volume
///
/// The volume and root directory stay open while mounted so that the
/// active log can be appended to without reopening it on every flush.
/// Operations are blocking; the SPI bus belongs to the card alone.
pub struct SdCardStorage<B, T>
where
    B: BlockDevice<Error = SdCardError>,
    T: TimeSource,
{
    volume_mgr: VolumeManager<B, T, 4, 4, 1>,
    volume: Option<RawVolume>,
    root: Option<RawDirectory>,
    active: Option<ActiveLog>,
}

impl<B, T> SdCardStorage<B, T>
where
    B: BlockDevice<Error = SdCardError>,
    T: TimeSource,
{
    /// Create a new SD card storage manager
    pub fn new(card: B, ts: T) -> Self {
        let volume_mgr = VolumeManager::new(card, ts);

        Self {
            volume_mgr,
            volume: None,
            root: None,
            active: None,
        }
    }

    /// Open volume 0 and its root directory
    pub fn mount(&mut self) -> Result<(), StorageError> {
        if self.root.is_some() {
            return Ok(());
        }

        let volume = self.volume_mgr.open_raw_volume(VolumeIdx(0))?;
        let root = match self.volume_mgr.open_root_dir(volume) {
            Ok(root) => root,
            Err(e) => {
                let _ = self.volume_mgr.close_volume(volume);
                return Err(e.into());
            }
        };

        self.volume = Some(volume);
        self.root = Some(root);
        info!("SD card mounted");
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.root.is_some()
    }

    fn root(&self) -> Result<RawDirectory, StorageError> {
        self.root.ok_or(StorageError::NotMounted)
    }

    /// Name of the file currently being recorded
    pub fn active_log(&self) -> Option<&str> {
        self.active.as_ref().map(|log| log.name.as_str())
    }

    fn is_active(&self, name: &str) -> bool {
        self.active_log()
            .is_some_and(|active| active.eq_ignore_ascii_case(name))
    }

    /// Create the next `LOGnnnnn.CSV` and make it the active log
    pub fn begin_log(&mut self) -> Result<LogName, StorageError> {
        if self.active.is_some() {
            warn!("Previous log still open, closing it");
            self.end_log()?;
        }

        let root = self.root()?;
        let mut highest = 0;
        self.volume_mgr.iterate_dir(root, |entry| {
            if let Some(index) = entry_log_index(entry) {
                highest = highest.max(index);
            }
        })?;

        let name = log_file_name(highest + 1).ok_or(StorageError::NamesExhausted)?;
        let file = self
            .volume_mgr
            .open_file_in_dir(root, name.as_str(), Mode::ReadWriteCreate)?;

        info!("Recording to {}", name);
        self.active = Some(ActiveLog {
            file,
            name: name.clone(),
            bytes: 0,
        });
        Ok(name)
    }

    /// Flush and close the active log, returning its name and size
    pub fn end_log(&mut self) -> Result<LogEntry, StorageError> {
        let log = self.active.take().ok_or(StorageError::NoActiveLog)?;

        let flushed = self.volume_mgr.flush_file(log.file);
        self.volume_mgr.close_file(log.file)?;
        flushed?;

        info!("Closed {} ({} bytes)", log.name, log.bytes);
        Ok(LogEntry {
            name: log.name,
            size: log.bytes,
        })
    }

    /// Collect the log files in the root directory, sorted by name
    ///
    /// Returns how many logs exist, which may exceed what fits in `out`.
    pub fn list_logs<const M: usize>(
        &self,
        out: &mut heapless::Vec<LogEntry, M>,
    ) -> Result<usize, StorageError> {
        let root = self.root()?;
        out.clear();
        let mut found = 0;

        self.volume_mgr.iterate_dir(root, |entry| {
            if entry_log_index(entry).is_none() {
                return;
            }
            found += 1;

            let mut name = LogName::new();
            if write!(name, "{}", entry.name).is_ok() {
                let _ = out.push(LogEntry {
                    name,
                    size: entry.size,
                });
            }
        })?;

        if let Some(active) = &self.active {
            if let Some(entry) = out.iter_mut().find(|e| e.name == active.name) {
                entry.size = active.bytes;
            }
        }

        out.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// Size in bytes of a closed log file
    pub fn log_size(&self, name: &str) -> Result<u32, StorageError> {
        self.check_log_name(name)?;
        let root = self.root()?;

        let file = self
            .volume_mgr
            .open_file_in_dir(root, name, Mode::ReadOnly)?;
        let length = self.volume_mgr.file_length(file);
        self.volume_mgr.close_file(file)?;
        Ok(length?)
    }

    /// Read part of a closed log file starting at `offset`
    ///
    /// Returns the number of bytes placed in `buf`; zero at end of file.
    pub fn read_log(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.check_log_name(name)?;
        let root = self.root()?;

        let file = self
            .volume_mgr
            .open_file_in_dir(root, name, Mode::ReadOnly)?;
        let result = self.read_at(file, offset, buf);
        self.volume_mgr.close_file(file)?;
        result
    }

    fn read_at(&self, file: RawFile, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.volume_mgr.file_seek_from_start(file, offset)?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.volume_mgr.read(file, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub fn delete_log(&mut self, name: &str) -> Result<(), StorageError> {
        self.check_log_name(name)?;
        let root = self.root()?;

        self.volume_mgr.delete_file_in_dir(root, name)?;
        info!("Deleted {}", name);
        Ok(())
    }

    /// Only `LOGnnnnn.CSV` files that are not being recorded may be served
    fn check_log_name(&self, name: &str) -> Result<(), StorageError> {
        if parse_log_index(name).is_none() {
            return Err(StorageError::InvalidName);
        }
        if self.is_active(name) {
            return Err(StorageError::FileBusy);
        }
        Ok(())
    }

    /// Read persisted settings, `None` when none were saved yet
    pub fn load_settings(&self) -> Result<Option<Settings>, StorageError> {
        let root = self.root()?;

        let file = match self
            .volume_mgr
            .open_file_in_dir(root, SETTINGS_FILE, Mode::ReadOnly)
        {
            Ok(file) => file,
            Err(embedded_sdmmc::Error::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buf = [0u8; Settings::MAX_ENCODED_LEN];
        let result = self.read_at(file, 0, &mut buf);
        self.volume_mgr.close_file(file)?;

        let len = result?;
        debug!("Loaded {} bytes of settings", len);
        Ok(Some(Settings::from_bytes(&buf[..len])))
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let root = self.root()?;
        let bytes = settings.to_bytes().map_err(|_| StorageError::Encoding)?;

        let file = self.volume_mgr.open_file_in_dir(
            root,
            SETTINGS_FILE,
            Mode::ReadWriteCreateOrTruncate,
        )?;
        let written = self.volume_mgr.write(file, &bytes);
        self.volume_mgr.close_file(file)?;
        written?;

        debug!("Saved settings ({} bytes)", bytes.len());
        Ok(())
    }
}

impl<B, T> LogSink for SdCardStorage<B, T>
where
    B: BlockDevice<Error = SdCardError>,
    T: TimeSource,
{
    type Error = StorageError;

    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let log = self.active.as_mut().ok_or(StorageError::NoActiveLog)?;
        self.volume_mgr.write(log.file, data)?;
        log.bytes = log.bytes.saturating_add(data.len() as u32);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        let log = self.active.as_ref().ok_or(StorageError::NoActiveLog)?;
        self.volume_mgr.flush_file(log.file)?;
        Ok(())
    }
}

fn entry_log_index(entry: &DirEntry) -> Option<u32> {
    if entry.attributes.is_directory() || entry.attributes.is_volume() {
        return None;
    }
    if !entry.name.extension().eq_ignore_ascii_case(LOG_EXTENSION.as_bytes()) {
        return None;
    }
    let base = core::str::from_utf8(entry.name.base_name()).ok()?;
    parse_log_base(base)
}

/// `LOG00001.CSV` for index 1; `None` outside 1..=99999
pub fn log_file_name(index: u32) -> Option<LogName> {
    if index == 0 || index > MAX_LOG_INDEX {
        return None;
    }
    let mut name = LogName::new();
    write!(name, "{}{:05}.{}", LOG_PREFIX, index, LOG_EXTENSION).ok()?;
    Some(name)
}

/// Inverse of [`log_file_name`], ignoring ASCII case
pub fn parse_log_index(name: &str) -> Option<u32> {
    let (base, extension) = name.split_once('.')?;
    if !extension.eq_ignore_ascii_case(LOG_EXTENSION) {
        return None;
    }
    parse_log_base(base)
}

fn parse_log_base(base: &str) -> Option<u32> {
    if base.len() != LOG_PREFIX.len() + 5 || !base.is_char_boundary(LOG_PREFIX.len()) {
        return None;
    }
    let (prefix, digits) = base.split_at(LOG_PREFIX.len());
    if !prefix.eq_ignore_ascii_case(LOG_PREFIX) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits.parse() {
        Ok(0) | Err(_) => None,
        Ok(index) => Some(index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mma8451::DataRate;
    use core::cell::RefCell;
    use embedded_sdmmc::{Block, BlockCount, BlockIdx};
    use std::vec::Vec;

    const PARTITION_START: u32 = 1;
    /// 8192 one-block clusters minus the metadata keeps this FAT16
    const PARTITION_BLOCKS: u32 = 8192;
    const RESERVED_BLOCKS: u16 = 1;
    const FAT_BLOCKS: u16 = 32;
    const ROOT_ENTRIES: u16 = 512;

    /// Freshly formatted card held in memory
    struct RamCard {
        blocks: RefCell<Vec<Block>>,
    }

    impl RamCard {
        fn formatted() -> Self {
            let mut blocks = std::vec![Block::new(); (PARTITION_START + PARTITION_BLOCKS) as usize];

            let mbr = &mut blocks[0].contents;
            let entry = &mut mbr[446..462];
            entry[4] = 0x06; // FAT16
            entry[8..12].copy_from_slice(&PARTITION_START.to_le_bytes());
            entry[12..16].copy_from_slice(&PARTITION_BLOCKS.to_le_bytes());
            mbr[510..512].copy_from_slice(&[0x55, 0xAA]);

            let boot = &mut blocks[PARTITION_START as usize].contents;
            boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
            boot[3..11].copy_from_slice(b"MSDOS5.0");
            boot[11..13].copy_from_slice(&512u16.to_le_bytes());
            boot[13] = 1;
            boot[14..16].copy_from_slice(&RESERVED_BLOCKS.to_le_bytes());
            boot[16] = 2;
            boot[17..19].copy_from_slice(&ROOT_ENTRIES.to_le_bytes());
            boot[19..21].copy_from_slice(&(PARTITION_BLOCKS as u16).to_le_bytes());
            boot[21] = 0xF8;
            boot[22..24].copy_from_slice(&FAT_BLOCKS.to_le_bytes());
            boot[28..32].copy_from_slice(&PARTITION_START.to_le_bytes());
            boot[38] = 0x29;
            boot[43..54].copy_from_slice(b"ACCLOG     ");
            boot[54..62].copy_from_slice(b"FAT16   ");
            boot[510..512].copy_from_slice(&[0x55, 0xAA]);

            // media descriptor and end-of-chain markers in both FATs
            for fat in 0..2 {
                let first = PARTITION_START + RESERVED_BLOCKS as u32 + fat * FAT_BLOCKS as u32;
                blocks[first as usize].contents[0..4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
            }

            Self {
                blocks: RefCell::new(blocks),
            }
        }
    }

    impl BlockDevice for RamCard {
        type Error = SdCardError;

        fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), SdCardError> {
            let image = self.blocks.borrow();
            for (i, block) in blocks.iter_mut().enumerate() {
                let src = image
                    .get(start_block_idx.0 as usize + i)
                    .ok_or(SdCardError::ReadError)?;
                block.contents = src.contents;
            }
            Ok(())
        }

        fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), SdCardError> {
            let mut image = self.blocks.borrow_mut();
            for (i, block) in blocks.iter().enumerate() {
                let dst = image
                    .get_mut(start_block_idx.0 as usize + i)
                    .ok_or(SdCardError::WriteError)?;
                dst.contents = block.contents;
            }
            Ok(())
        }

        fn num_blocks(&self) -> Result<BlockCount, SdCardError> {
            Ok(BlockCount(self.blocks.borrow().len() as u32))
        }
    }

    fn mounted() -> SdCardStorage<RamCard, FixedTimeSource> {
        let mut storage = SdCardStorage::new(RamCard::formatted(), FixedTimeSource);
        storage.mount().unwrap();
        storage
    }

    /// Record one log containing `data` and close it
    fn record(storage: &mut SdCardStorage<RamCard, FixedTimeSource>, data: &[u8]) -> LogName {
        let name = storage.begin_log().unwrap();
        storage.write(data).unwrap();
        storage.sync().unwrap();
        storage.end_log().unwrap();
        name
    }

    fn listing(storage: &SdCardStorage<RamCard, FixedTimeSource>) -> (Vec<LogEntry>, usize) {
        let mut out = heapless::Vec::<LogEntry, 8>::new();
        let total = storage.list_logs(&mut out).unwrap();
        (out.into_iter().collect(), total)
    }

    #[test]
    fn unmounted_card_refuses_operations() {
        let mut storage = SdCardStorage::new(RamCard::formatted(), FixedTimeSource);
        assert!(!storage.is_mounted());
        assert!(matches!(storage.begin_log(), Err(StorageError::NotMounted)));
        assert!(matches!(storage.load_settings(), Err(StorageError::NotMounted)));
    }

    #[test]
    fn logs_are_numbered_after_the_highest_existing() {
        let mut storage = mounted();
        assert_eq!(record(&mut storage, b"a\n"), "LOG00001.CSV");
        assert_eq!(record(&mut storage, b"b\n"), "LOG00002.CSV");

        storage.delete_log("LOG00001.CSV").unwrap();
        assert_eq!(record(&mut storage, b"c\n"), "LOG00003.CSV");

        let (files, total) = listing(&storage);
        assert_eq!(total, 2);
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["LOG00002.CSV", "LOG00003.CSV"]);
    }

    #[test]
    fn listing_skips_other_files_and_reports_sizes() {
        let mut storage = mounted();
        storage.save_settings(&Settings::DEFAULT).unwrap();
        record(&mut storage, b"timedelta,x,y,z\n0,0.0000,0.0000,9.8066\n");

        let (files, total) = listing(&storage);
        assert_eq!(total, 1);
        assert_eq!(files[0].name, "LOG00001.CSV");
        assert_eq!(files[0].size, 39);
        assert_eq!(storage.log_size("LOG00001.CSV").unwrap(), 39);
    }

    #[test]
    fn listing_is_capped_but_counts_everything() {
        let mut storage = mounted();
        for _ in 0..3 {
            record(&mut storage, b"x\n");
        }

        let mut out = heapless::Vec::<LogEntry, 2>::new();
        assert_eq!(storage.list_logs(&mut out).unwrap(), 3);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn reads_in_chunks() {
        let mut storage = mounted();
        let data: Vec<u8> = (0..1300u32).map(|i| b'a' + (i % 26) as u8).collect();
        let name = record(&mut storage, &data);

        let mut read_back = Vec::new();
        let mut chunk = [0u8; 512];
        let mut offset = 0;
        loop {
            let n = storage.read_log(&name, offset, &mut chunk).unwrap();
            if n == 0 {
                break;
            }
            read_back.extend_from_slice(&chunk[..n]);
            offset += n as u32;
        }
        assert_eq!(read_back, data);

        let n = storage.read_log(&name, 1290, &mut chunk).unwrap();
        assert_eq!(&chunk[..n], &data[1290..]);
    }

    #[test]
    fn active_log_cannot_be_read_or_deleted() {
        let mut storage = mounted();
        let name = storage.begin_log().unwrap();
        storage.write(b"partial").unwrap();
        assert_eq!(storage.active_log(), Some("LOG00001.CSV"));

        let mut buf = [0u8; 16];
        assert!(matches!(storage.read_log(&name, 0, &mut buf), Err(StorageError::FileBusy)));
        assert!(matches!(storage.log_size("log00001.csv"), Err(StorageError::FileBusy)));
        assert!(matches!(storage.delete_log(&name), Err(StorageError::FileBusy)));

        // listed with the bytes written so far
        let (files, _) = listing(&storage);
        assert_eq!(files[0].size, 7);

        let entry = storage.end_log().unwrap();
        assert_eq!(entry.size, 7);
        assert_eq!(storage.active_log(), None);
        storage.delete_log(&name).unwrap();
        assert_eq!(listing(&storage).1, 0);
    }

    #[test]
    fn foreign_names_are_rejected() {
        let storage = mounted();
        let mut buf = [0u8; 4];
        assert!(matches!(
            storage.read_log(SETTINGS_FILE, 0, &mut buf),
            Err(StorageError::InvalidName)
        ));
        assert!(storage.log_size("LOG00042.CSV").unwrap_err().is_not_found());
    }

    #[test]
    fn sink_needs_an_open_log() {
        let mut storage = mounted();
        assert!(matches!(storage.write(b"x"), Err(StorageError::NoActiveLog)));
        assert!(matches!(storage.sync(), Err(StorageError::NoActiveLog)));
        assert!(matches!(storage.end_log(), Err(StorageError::NoActiveLog)));
    }

    #[test]
    fn begin_closes_a_forgotten_log() {
        let mut storage = mounted();
        storage.begin_log().unwrap();
        storage.write(b"first").unwrap();

        assert_eq!(storage.begin_log().unwrap(), "LOG00002.CSV");
        assert_eq!(storage.log_size("LOG00001.CSV").unwrap(), 5);
    }

    #[test]
    fn settings_round_trip() {
        let storage = mounted();
        assert_eq!(storage.load_settings().unwrap(), None);

        let settings = Settings {
            sample_interval_ms: 10,
            data_rate: DataRate::Hz200,
            auto_start: true,
            ..Settings::DEFAULT
        };
        storage.save_settings(&settings).unwrap();
        assert_eq!(storage.load_settings().unwrap(), Some(settings));

        // overwriting truncates the old contents
        storage.save_settings(&Settings::DEFAULT).unwrap();
        assert_eq!(storage.load_settings().unwrap(), Some(Settings::DEFAULT));
    }

    #[test]
    fn corrupt_settings_file_yields_defaults() {
        let storage = mounted();
        let root = storage.root().unwrap();
        let file = storage
            .volume_mgr
            .open_file_in_dir(root, SETTINGS_FILE, Mode::ReadWriteCreateOrTruncate)
            .unwrap();
        storage.volume_mgr.write(file, &[0xFF, 0x13, 0x37]).unwrap();
        storage.volume_mgr.close_file(file).unwrap();

        assert_eq!(storage.load_settings().unwrap(), Some(Settings::DEFAULT));
    }

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(log_file_name(1).unwrap(), "LOG00001.CSV");
        assert_eq!(log_file_name(42).unwrap(), "LOG00042.CSV");
        assert_eq!(log_file_name(MAX_LOG_INDEX).unwrap(), "LOG99999.CSV");
    }

    #[test]
    fn index_bounds() {
        assert!(log_file_name(0).is_none());
        assert!(log_file_name(MAX_LOG_INDEX + 1).is_none());
    }

    #[test]
    fn parses_generated_names() {
        for index in [1, 7, 12_345, MAX_LOG_INDEX] {
            let name = log_file_name(index).unwrap();
            assert_eq!(parse_log_index(&name), Some(index));
        }
        assert_eq!(parse_log_index("log00003.csv"), Some(3));
    }

    #[test]
    fn rejects_other_files() {
        for name in [
            "SETTINGS.BIN",
            "LOG00001.TXT",
            "LOG1.CSV",
            "LOG000001.CSV",
            "LOGABCDE.CSV",
            "LOG00000.CSV",
            "DATA0001.CSV",
            "LOG00001",
            "../LOG00001.CSV",
            "LOG0000é.CSV",
        ] {
            assert_eq!(parse_log_index(name), None, "{name}");
        }
    }

    #[test]
    fn not_found_is_recognised() {
        assert!(StorageError::Card(embedded_sdmmc::Error::NotFound).is_not_found());
        assert!(!StorageError::FileBusy.is_not_found());
    }
}
