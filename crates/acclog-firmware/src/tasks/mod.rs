//! Embassy tasks spawned by `main`

pub mod dhcp;
pub mod http;
pub mod mdns;
pub mod sampler;
pub mod writer;

/// Milliseconds since boot, the time base shared by every task
pub fn now_ms() -> u64 {
    embassy_time::Instant::now().as_millis()
}
