//! ESP32-specific modules for the accelerometer logger
//!
//! Peripheral setup, WiFi bring-up and the embassy tasks that connect the
//! hardware to the platform-independent logic in `acclog_core`.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod tasks;
pub mod wifi;
pub mod wifi_secrets;
