//! Hardware-independent core library for the ESP32 accelerometer logger
//!
//! This crate holds everything that does not touch ESP32 peripherals: the
//! compile-time configuration table, the MMA8451 register driver, the CSV
//! record format and buffered SD writer, runtime settings, the sampling
//! clock and the protocol logic behind the WiFi services (DHCP, mDNS, HTTP).
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both the
//! ESP32 and desktop hosts (for the analyzer and tests).

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod app_state;
pub mod config;
pub mod mma8451;
pub mod network;
pub mod sampler;
pub mod sensors;
pub mod settings;
pub mod storage;
