//! RAM buffering between the sampler and the SD card
//!
//! Samples are formatted straight into a fixed buffer and written out in
//! large chunks, either when the buffer is nearly full or when the flush
//! interval elapses. A power cut can therefore lose at most one flush
//! interval of data plus whatever the card itself had not committed.

use heapless::Vec;
use thiserror_no_std::Error;

use super::sample::{AccelSample, CSV_HEADER, MAX_LINE_LEN};

/// Destination of buffered log bytes
pub trait LogSink {
    type Error: core::fmt::Debug;

    /// Append `data` to the log
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Make everything written so far durable
    fn sync(&mut self) -> Result<(), Self::Error>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterError {
    #[error("write buffer is full")]
    BufferFull,
    #[error("sample could not be formatted")]
    Format,
}

pub struct CsvBuffer<const N: usize> {
    buf: Vec<u8, N>,
    flush_interval_ms: u64,
    last_flush_ms: u64,
    /// No flush is attempted before this instant after a failed one
    retry_after_ms: u64,
    dropped: u32,
    bytes_flushed: u64,
}

impl<const N: usize> CsvBuffer<N> {
    /// Fill level at which a flush is due regardless of the interval
    pub const HIGH_WATER: usize = N - N / 4;

    pub const fn new(flush_interval_ms: u32) -> Self {
        Self {
            buf: Vec::new(),
            flush_interval_ms: flush_interval_ms as u64,
            last_flush_ms: 0,
            retry_after_ms: 0,
            dropped: 0,
            bytes_flushed: 0,
        }
    }

    /// Begin a new file: drop anything pending and queue the CSV header
    pub fn start(&mut self, now_ms: u64) -> Result<(), WriterError> {
        self.buf.clear();
        self.dropped = 0;
        self.bytes_flushed = 0;
        self.last_flush_ms = now_ms;
        self.retry_after_ms = 0;
        self.buf
            .extend_from_slice(CSV_HEADER.as_bytes())
            .map_err(|_| WriterError::BufferFull)
    }

    /// Queue one record
    pub fn push(&mut self, sample: &AccelSample) -> Result<(), WriterError> {
        let line = sample.to_csv_line().map_err(|_| WriterError::Format)?;
        debug_assert!(line.len() <= MAX_LINE_LEN);

        if self.buf.extend_from_slice(line.as_bytes()).is_err() {
            self.dropped = self.dropped.saturating_add(1);
            return Err(WriterError::BufferFull);
        }
        Ok(())
    }

    pub fn should_flush(&self, now_ms: u64) -> bool {
        if self.buf.is_empty() || now_ms < self.retry_after_ms {
            return false;
        }
        self.buf.len() >= Self::HIGH_WATER || now_ms >= self.next_flush_deadline()
    }

    /// Write every pending byte to `sink` and sync it
    ///
    /// Bytes stay queued if the write fails, and the next attempt waits a
    /// full flush interval even when the buffer is past its high-water mark.
    /// Returns the number of bytes handed to the sink.
    pub fn flush_into<S: LogSink>(&mut self, sink: &mut S, now_ms: u64) -> Result<usize, S::Error> {
        self.last_flush_ms = now_ms;
        if self.buf.is_empty() {
            return Ok(0);
        }

        if let Err(e) = sink.write(&self.buf) {
            self.retry_after_ms = now_ms + self.flush_interval_ms;
            return Err(e);
        }
        self.retry_after_ms = 0;

        let written = self.buf.len();
        self.buf.clear();
        self.bytes_flushed += written as u64;

        sink.sync()?;
        Ok(written)
    }

    /// Instant by which the pending data must be on the card
    pub fn next_flush_deadline(&self) -> u64 {
        self.last_flush_ms + self.flush_interval_ms
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Samples rejected since [`CsvBuffer::start`] because the buffer was full
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn bytes_flushed(&self) -> u64 {
        self.bytes_flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct MemorySink {
        data: Vec<u8>,
        syncs: usize,
        fail_writes: bool,
    }

    impl LogSink for MemorySink {
        type Error = ();

        fn write(&mut self, data: &[u8]) -> Result<(), ()> {
            if self.fail_writes {
                return Err(());
            }
            self.data.extend_from_slice(data);
            Ok(())
        }

        fn sync(&mut self) -> Result<(), ()> {
            self.syncs += 1;
            Ok(())
        }
    }

    fn sample(t: u32) -> AccelSample {
        AccelSample {
            timedelta_ms: t,
            x: 0.0,
            y: 0.0,
            z: 9.8066,
        }
    }

    #[test]
    fn header_written_once_per_file() {
        let mut buffer = CsvBuffer::<256>::new(1000);
        let mut sink = MemorySink::default();

        buffer.start(0).unwrap();
        buffer.push(&sample(0)).unwrap();
        buffer.flush_into(&mut sink, 10).unwrap();
        buffer.push(&sample(20)).unwrap();
        buffer.flush_into(&mut sink, 20).unwrap();

        let text = std::str::from_utf8(&sink.data).unwrap();
        assert_eq!(
            text,
            "timedelta_ms,Xacc,Yacc,Zacc\n0,0.0000,0.0000,9.8066\n20,0.0000,0.0000,9.8066\n"
        );
        assert_eq!(sink.syncs, 2);
        assert_eq!(buffer.bytes_flushed(), text.len() as u64);
    }

    #[test]
    fn flush_due_after_interval() {
        let mut buffer = CsvBuffer::<4096>::new(1000);
        buffer.start(5_000).unwrap();
        buffer.push(&sample(0)).unwrap();

        assert!(!buffer.should_flush(5_999));
        assert!(buffer.should_flush(6_000));
        assert_eq!(buffer.next_flush_deadline(), 6_000);
    }

    #[test]
    fn flush_due_at_high_water() {
        let mut buffer = CsvBuffer::<256>::new(60_000);
        buffer.start(0).unwrap();
        while buffer.pending() < CsvBuffer::<256>::HIGH_WATER {
            buffer.push(&sample(1)).unwrap();
        }
        assert!(buffer.should_flush(1));
    }

    #[test]
    fn nothing_to_flush_when_empty() {
        let mut buffer = CsvBuffer::<256>::new(10);
        let mut sink = MemorySink::default();
        assert!(!buffer.should_flush(1_000));
        assert_eq!(buffer.flush_into(&mut sink, 1_000), Ok(0));
        assert_eq!(sink.syncs, 0);
    }

    #[test]
    fn full_buffer_counts_drops() {
        let mut buffer = CsvBuffer::<64>::new(1000);
        buffer.start(0).unwrap();
        buffer.push(&sample(0)).unwrap();
        assert_eq!(buffer.push(&sample(20)), Err(WriterError::BufferFull));
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn failed_write_keeps_data_for_retry() {
        let mut buffer = CsvBuffer::<256>::new(1000);
        let mut sink = MemorySink {
            fail_writes: true,
            ..Default::default()
        };

        buffer.start(0).unwrap();
        buffer.push(&sample(0)).unwrap();
        let pending = buffer.pending();

        assert!(buffer.flush_into(&mut sink, 1_000).is_err());
        assert_eq!(buffer.pending(), pending);

        sink.fail_writes = false;
        assert_eq!(buffer.flush_into(&mut sink, 1_100), Ok(pending));
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_flush_deadline(), 2_100);
    }

    #[test]
    fn failed_write_backs_off_until_next_interval() {
        let mut buffer = CsvBuffer::<256>::new(1000);
        let mut sink = MemorySink {
            fail_writes: true,
            ..Default::default()
        };

        buffer.start(0).unwrap();
        while buffer.pending() < CsvBuffer::<256>::HIGH_WATER {
            buffer.push(&sample(1)).unwrap();
        }
        assert!(buffer.flush_into(&mut sink, 5_000).is_err());

        assert_eq!(buffer.next_flush_deadline(), 6_000);
        assert!(!buffer.should_flush(5_001));
        assert!(!buffer.should_flush(5_999));
        assert!(buffer.should_flush(6_000));
    }

    #[test]
    fn start_discards_previous_file() {
        let mut buffer = CsvBuffer::<256>::new(1000);
        buffer.start(0).unwrap();
        buffer.push(&sample(0)).unwrap();
        buffer.start(100).unwrap();
        assert_eq!(buffer.pending(), CSV_HEADER.len());
    }
}
