//! Protocol logic behind the logger's WiFi services
//!
//! Nothing in here touches sockets: the firmware tasks receive packets and
//! requests, hand them to these functions and send back what they produce.

pub mod dhcp_server;
pub mod http;
pub mod mdns;

use core::net::Ipv4Addr;

use crate::config::AP_ADDRESS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Joined an existing network
    Station,
    /// Hosting our own network
    AccessPoint,
}

impl NetworkMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Station => "station",
            Self::AccessPoint => "access-point",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub mode: NetworkMode,
    pub address: Ipv4Addr,
}

/// Credentials of the network to join, compiled in at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationCredentials<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

impl<'a> StationCredentials<'a> {
    /// `None` when no SSID was configured
    pub fn new(ssid: &'a str, password: &'a str) -> Option<Self> {
        if ssid.is_empty() {
            None
        } else {
            Some(Self { ssid, password })
        }
    }
}

/// Outcome of trying to join the configured network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationAttempt {
    NotConfigured,
    Connected { address: Ipv4Addr },
    TimedOut,
    Failed,
}

impl StationAttempt {
    /// Every outcome other than a connection with an address falls back to
    /// hosting the access point
    pub fn network_info(self) -> NetworkInfo {
        match self {
            Self::Connected { address } => NetworkInfo {
                mode: NetworkMode::Station,
                address,
            },
            Self::NotConfigured | Self::TimedOut | Self::Failed => NetworkInfo {
                mode: NetworkMode::AccessPoint,
                address: AP_ADDRESS,
            },
        }
    }

    pub fn mode(self) -> NetworkMode {
        self.network_info().mode
    }
}

/// Pick the network mode for the given credentials and attempt result
pub fn select_mode(credentials: Option<StationCredentials<'_>>, attempt: StationAttempt) -> NetworkMode {
    match credentials {
        None => NetworkMode::AccessPoint,
        Some(_) => attempt.mode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 23);

    #[test]
    fn empty_ssid_means_no_credentials() {
        assert_eq!(StationCredentials::new("", "secret"), None);
        assert!(StationCredentials::new("home", "").is_some());
    }

    #[test]
    fn no_credentials_hosts_access_point() {
        assert_eq!(
            select_mode(None, StationAttempt::NotConfigured),
            NetworkMode::AccessPoint
        );
        // An address without credentials cannot come from our attempt
        assert_eq!(
            select_mode(None, StationAttempt::Connected { address: HOME }),
            NetworkMode::AccessPoint
        );
    }

    #[test]
    fn failed_attempts_fall_back() {
        let creds = StationCredentials::new("home", "secret");
        assert_eq!(
            select_mode(creds, StationAttempt::TimedOut),
            NetworkMode::AccessPoint
        );
        assert_eq!(
            select_mode(creds, StationAttempt::Failed),
            NetworkMode::AccessPoint
        );
    }

    #[test]
    fn connection_keeps_station_address() {
        let creds = StationCredentials::new("home", "secret");
        assert_eq!(
            select_mode(creds, StationAttempt::Connected { address: HOME }),
            NetworkMode::Station
        );
        assert_eq!(
            StationAttempt::Connected { address: HOME }.network_info().address,
            HOME
        );
        assert_eq!(StationAttempt::TimedOut.network_info().address, AP_ADDRESS);
    }
}
