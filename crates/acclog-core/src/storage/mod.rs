pub mod sample;
pub mod sd_card;
pub mod writer;

pub use sample::{AccelSample, CSV_HEADER, MAX_LINE_LEN, ParseError, is_header, parse_row};
pub use sd_card::{
    FixedTimeSource, LogEntry, LogName, SETTINGS_FILE, SdCardStorage, StorageError,
    log_file_name, parse_log_index,
};
pub use writer::{CsvBuffer, LogSink, WriterError};

/// Most log files reported by a single directory listing
pub const MAX_LISTED_LOGS: usize = 32;
