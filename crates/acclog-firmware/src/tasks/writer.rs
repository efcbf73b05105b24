//! SD writer task
//!
//! Drains `SAMPLE_CHANNEL` into a RAM buffer and writes the buffer to the
//! active log file when it runs full or the flush interval elapses.

use acclog_core::app_state::{
    AppError, CONTROL_CHANNEL, Control, LogRecord, SAMPLE_CHANNEL, STATUS,
};
use acclog_core::config::{FILE_FLUSH_MS, WRITE_BUFFER_SIZE};
use acclog_core::storage::{CsvBuffer, WriterError};
use embassy_time::{Instant, with_deadline};
use log::{error, info, warn};

use super::now_ms;
use crate::app_state::StorageMutex;

async fn flush(buffer: &mut CsvBuffer<WRITE_BUFFER_SIZE>, storage: &'static StorageMutex) {
    let mut sd = storage.lock().await;
    match buffer.flush_into(&mut *sd, now_ms()) {
        Ok(0) => {}
        Ok(bytes) => STATUS.update(|s| s.stats.record_flush(bytes)),
        Err(e) => {
            warn!("Log flush failed, keeping {} bytes: {}", buffer.pending(), e);
            STATUS.update(|s| s.stats.write_errors = s.stats.write_errors.saturating_add(1));
        }
    }
}

#[embassy_executor::task]
pub async fn writer_task(storage: &'static StorageMutex) {
    let mut buffer = CsvBuffer::<WRITE_BUFFER_SIZE>::new(FILE_FLUSH_MS);
    let mut open = false;

    loop {
        let deadline = if open && !buffer.is_empty() {
            Instant::from_millis(buffer.next_flush_deadline())
        } else {
            Instant::MAX
        };

        match with_deadline(deadline, SAMPLE_CHANNEL.receive()).await {
            Ok(LogRecord::SessionStart) => {
                let begun = storage.lock().await.begin_log();
                match begun {
                    Ok(name) => {
                        if buffer.start(now_ms()).is_err() {
                            error!("Write buffer cannot hold the CSV header");
                        }
                        STATUS.update(|s| s.active_file = Some(name));
                        open = true;
                    }
                    Err(e) => {
                        let e = AppError::storage(e);
                        error!("Could not create a log file: {}", e);
                        STATUS.update(|s| s.log_open_failed(&e));
                        open = false;
                        if CONTROL_CHANNEL.try_send(Control::Stop).is_err() {
                            warn!("Control queue full, sampler keeps running");
                        }
                    }
                }
            }
            Ok(LogRecord::Sample(sample)) => {
                if !open {
                    // nowhere to write it
                    STATUS.update(|s| s.stats.dropped = s.stats.dropped.saturating_add(1));
                    continue;
                }
                match buffer.push(&sample) {
                    Ok(()) => {}
                    Err(WriterError::BufferFull) => {
                        STATUS.update(|s| s.stats.dropped = s.stats.dropped.saturating_add(1));
                    }
                    Err(WriterError::Format) => warn!("Dropping unformattable sample"),
                }
            }
            Ok(LogRecord::SessionEnd) => {
                if !open {
                    continue;
                }
                flush(&mut buffer, storage).await;
                open = false;

                match storage.lock().await.end_log() {
                    Ok(entry) => info!("Log {} complete, {} bytes", entry.name, entry.size),
                    Err(e) => error!("Closing the log failed: {}", e),
                }
                STATUS.update(|s| s.active_file = None);
            }
            // flush interval elapsed
            Err(_) => {}
        }

        if open && buffer.should_flush(now_ms()) {
            flush(&mut buffer, storage).await;
        }
    }
}
