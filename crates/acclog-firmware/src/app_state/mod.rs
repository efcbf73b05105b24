//! Firmware-specific application state extensions
//!
//! Re-exports the hardware-independent app state from `acclog_core` and
//! adds the ESP32 peripheral setup.

mod hardware;

pub use hardware::*;

// Re-export all shared app state types from acclog-core
pub use acclog_core::app_state::*;
