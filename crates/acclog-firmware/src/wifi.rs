//! WiFi bring-up: join the configured network, or host an access point

use core::str::FromStr;

use acclog_core::config::{
    AP_ADDRESS, AP_PASS, AP_PREFIX_LEN, AP_SSID, MDNS_NAME, WIFI_CONNECT_TIMEOUT_MS,
};
use acclog_core::network::{NetworkInfo, NetworkMode, StationAttempt, StationCredentials, select_mode};
use embassy_executor::Spawner;
use embassy_net::{Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use embassy_time::{Duration, Timer, with_timeout};
use esp_radio::wifi::{
    AccessPointConfig, AuthMethod, ClientConfig, ModeConfig, WifiController, WifiDevice,
    WifiEvent, WifiStaState,
};
use heapless::String;
use log::{error, info, warn};
use static_cell::StaticCell;

use crate::app_state::AppError;
use crate::wifi_secrets::station_credentials;

/// Delay between reconnect attempts in station mode
const RECONNECT_DELAY_MS: u64 = 5000;

static STA_RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
static AP_RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
/// Dropping the controller would stop the access point
static AP_CONTROLLER: StaticCell<WifiController<'static>> = StaticCell::new();

/// Bring up WiFi and return the network stack the services run on
///
/// The station attempt (association plus DHCP) is bounded by
/// `WIFI_CONNECT_TIMEOUT_MS`; on any failure the access point is started.
pub async fn start(
    radio: &'static esp_radio::Controller<'static>,
    wifi: esp_hal::peripherals::WIFI<'static>,
    seed: u64,
    spawner: Spawner,
) -> Result<(Stack<'static>, NetworkInfo), AppError> {
    let (mut controller, interfaces) = esp_radio::wifi::new(radio, wifi, Default::default())
        .map_err(|e| AppError::wifi(format_args!("{:?}", e)))?;

    let credentials = station_credentials();
    let mut station_stack = None;
    let attempt = match credentials {
        None => {
            info!("No station credentials compiled in");
            StationAttempt::NotConfigured
        }
        Some(creds) => {
            let mut dhcp_config = embassy_net::DhcpConfig::default();
            dhcp_config.hostname = String::<32>::from_str(MDNS_NAME).ok();

            let resources = STA_RESOURCES.init(StackResources::new());
            let (stack, runner) = embassy_net::new(
                interfaces.sta,
                embassy_net::Config::dhcpv4(dhcp_config),
                resources,
                seed,
            );
            spawner
                .spawn(net_task(runner))
                .map_err(|_| AppError::wifi("network task spawn failed"))?;
            station_stack = Some(stack);

            join_station(&mut controller, stack, creds).await
        }
    };

    if let (NetworkMode::Station, Some(stack)) = (select_mode(credentials, attempt), station_stack) {
        spawner
            .spawn(connection_task(controller))
            .map_err(|_| AppError::wifi("connection task spawn failed"))?;
        return Ok((stack, attempt.network_info()));
    }

    warn!("Station unavailable ({:?}), starting access point", attempt);

    if matches!(controller.is_started(), Ok(true)) {
        let _ = controller.stop_async().await;
    }

    let ap_config = AccessPointConfig::default()
        .with_ssid(AP_SSID.into())
        .with_password(AP_PASS.into())
        .with_auth_method(AuthMethod::Wpa2Personal);
    controller
        .set_config(&ModeConfig::AccessPoint(ap_config))
        .map_err(|e| AppError::wifi(format_args!("AP config: {:?}", e)))?;
    controller
        .start_async()
        .await
        .map_err(|e| AppError::wifi(format_args!("AP start: {:?}", e)))?;

    let static_config = StaticConfigV4 {
        address: Ipv4Cidr::new(AP_ADDRESS, AP_PREFIX_LEN),
        gateway: Some(AP_ADDRESS),
        dns_servers: Default::default(),
    };
    let resources = AP_RESOURCES.init(StackResources::new());
    let (stack, runner) = embassy_net::new(
        interfaces.ap,
        embassy_net::Config::ipv4_static(static_config),
        resources,
        seed ^ 0xA5A5_A5A5,
    );
    spawner
        .spawn(net_task(runner))
        .map_err(|_| AppError::wifi("network task spawn failed"))?;
    AP_CONTROLLER.init(controller);

    info!("Access point \"{}\" up at {}", AP_SSID, AP_ADDRESS);
    Ok((stack, attempt.network_info()))
}

async fn join_station(
    controller: &mut WifiController<'static>,
    stack: Stack<'static>,
    creds: StationCredentials<'static>,
) -> StationAttempt {
    let client_config = ClientConfig::default()
        .with_ssid(creds.ssid.into())
        .with_password(creds.password.into());
    if let Err(e) = controller.set_config(&ModeConfig::Client(client_config)) {
        error!("Failed to set WiFi config: {:?}", e);
        return StationAttempt::Failed;
    }
    if let Err(e) = controller.start_async().await {
        error!("Failed to start WiFi: {:?}", e);
        return StationAttempt::Failed;
    }

    info!("Connecting to \"{}\"", creds.ssid);
    let timeout = Duration::from_millis(WIFI_CONNECT_TIMEOUT_MS as u64);
    let result = with_timeout(timeout, async {
        controller.connect_async().await?;
        info!("Associated, waiting for an address");
        loop {
            if let Some(config) = stack.config_v4() {
                return Ok(config.address.address());
            }
            Timer::after(Duration::from_millis(200)).await;
        }
    })
    .await;

    match result {
        Ok(Ok(address)) => {
            info!("Got IP: {}", address);
            StationAttempt::Connected { address }
        }
        Ok(Err(e)) => {
            warn!("Failed to connect to WiFi: {:?}", e);
            StationAttempt::Failed
        }
        Err(_) => {
            warn!("WiFi connection timed out");
            let _ = controller.disconnect_async().await;
            StationAttempt::TimedOut
        }
    }
}

/// Keeps the station connected after the initial join
#[embassy_executor::task]
async fn connection_task(mut controller: WifiController<'static>) {
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            // wait until we're no longer connected
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("WiFi disconnected");
            Timer::after(Duration::from_millis(RECONNECT_DELAY_MS)).await
        }

        info!("Reconnecting to WiFi");
        match controller.connect_async().await {
            Ok(()) => info!("WiFi reconnected"),
            Err(e) => {
                warn!("Failed to reconnect: {:?}", e);
                Timer::after(Duration::from_millis(RECONNECT_DELAY_MS)).await
            }
        }
    }
}

#[embassy_executor::task(pool_size = 2)]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
