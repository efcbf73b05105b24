#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use acclog_core::app_state::{AppError, RunState, STATUS};
use acclog_core::config::{self, MMA_DATARATE, MMA_RANGE};
use acclog_core::network::NetworkMode;
use acclog_core::settings::Settings;
use acclog_core::storage::{FixedTimeSource, SdCardStorage};
use acclog_firmware::app_state::{
    AccelSensor, StorageMutex, bring_up_sd_card, create_i2c_bus, init_sd_card,
};
use acclog_firmware::tasks::{dhcp, http, mdns, sampler, writer};
use acclog_firmware::wifi;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static STORAGE: StaticCell<StorageMutex> = StaticCell::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("acclog {} starting", config::VERSION);

    if let Err(e) = config::validate() {
        let e = AppError::from(e);
        error!("Refusing to start: {}", e);
        STATUS.update(|s| s.run_state = RunState::Error);
        loop {
            Timer::after(Duration::from_secs(1)).await;
        }
    }

    // Accelerometer
    let i2c = create_i2c_bus(peripherals.I2C0, peripherals.GPIO21, peripherals.GPIO22);
    let mut sensor = AccelSensor::new(i2c, embassy_time::Delay);
    let sensor_ready = match sensor.init(MMA_RANGE, MMA_DATARATE).await {
        Ok(()) => true,
        Err(e) => {
            error!("Accelerometer unavailable: {}", AppError::from(e));
            false
        }
    };

    // SD card
    let sd_card = init_sd_card(
        peripherals.SPI3,
        peripherals.GPIO18,
        peripherals.GPIO19,
        peripherals.GPIO23,
        peripherals.GPIO5,
    );
    let card_present = bring_up_sd_card(&sd_card);
    let mut storage = SdCardStorage::new(sd_card, FixedTimeSource);
    if card_present {
        if let Err(e) = storage.mount() {
            error!("SD card mount failed: {}", e);
        }
    }
    let sd_ready = storage.is_mounted();

    let settings = match storage.load_settings() {
        Ok(Some(saved)) => {
            info!("Loaded saved settings: {:?}", saved);
            saved
        }
        Ok(None) => Settings::DEFAULT,
        Err(e) => {
            warn!("Using default settings: {}", e);
            Settings::DEFAULT
        }
    };
    if sensor_ready && (settings.range != MMA_RANGE || settings.data_rate != MMA_DATARATE) {
        if let Err(e) = sensor.reconfigure(settings.range, settings.data_rate).await {
            warn!("Saved sensor settings not applied: {}", e);
        }
    }

    let storage: &'static StorageMutex = STORAGE.init(StorageMutex::new(storage));

    STATUS.update(|s| {
        s.sd_ready = sd_ready;
        s.sensor_ready = sensor_ready;
        s.settings = settings;
        s.run_state = RunState::ConnectingStation;
    });

    spawner.must_spawn(writer::writer_task(storage));
    spawner.must_spawn(sampler::sampler_task(sensor, settings));

    // Network
    let radio = RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;

    match wifi::start(radio, peripherals.WIFI, seed, spawner).await {
        Ok((stack, network)) => {
            STATUS.update(|s| {
                s.network = Some(network);
                if !s.recording {
                    s.run_state = match network.mode {
                        NetworkMode::Station => RunState::Station,
                        NetworkMode::AccessPoint => RunState::AccessPoint,
                    };
                }
            });
            info!(
                "Web interface at http://{}/ ({})",
                network.address,
                network.mode.label()
            );

            if network.mode == NetworkMode::AccessPoint {
                spawner.must_spawn(dhcp::dhcp_task(stack));
            }
            spawner.must_spawn(mdns::mdns_task(stack));
            spawner.must_spawn(http::http_task(stack, storage));
        }
        Err(e) => {
            error!("Network unavailable, logging only: {}", e);
            STATUS.update(|s| {
                if !s.recording {
                    s.run_state = RunState::Error;
                }
            });
        }
    }

    loop {
        Timer::after(Duration::from_secs(60)).await;
        let status = STATUS.snapshot();
        info!(
            "{}: {} samples, {} dropped, {} bytes written",
            status.run_state.label(),
            status.stats.samples,
            status.stats.dropped,
            status.stats.bytes_written
        );
    }
}
