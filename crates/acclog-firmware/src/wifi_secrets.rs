//! Station credentials baked in by `build.rs` from `.env`

use acclog_core::network::StationCredentials;

pub const WIFI_SSID: &str = env!("WIFI_SSID");
pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

/// `None` when the firmware was built without a network to join
pub fn station_credentials() -> Option<StationCredentials<'static>> {
    StationCredentials::new(WIFI_SSID, WIFI_PASSWORD)
}
