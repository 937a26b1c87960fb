//! bubblebridge — ESP-IDF std firmware
//!
//! Thread-based: FreeRTOS threads via `std::thread`. In Normal mode a scan
//! thread runs NimBLE scan cycles and publishes through the MQTT client
//! while a watchdog thread restarts the device if the radio goes quiet.
//! In Config mode an HTTP thread serves the setup page. The button thread
//! runs in both modes with its own NVS handle, so it never waits on the
//! HTTP server.

mod net;
mod nvs;
mod ota;

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use bubblebridge::board::{self, TICK_MS};
use bubblebridge::button::{apply_action, ButtonTracker};
use bubblebridge::config::{BootMode, Config, ConfigKey};
use bubblebridge::http::{HttpServer, Outcome};
use bubblebridge::mqtt::{MqttClient, MqttOptions};
use bubblebridge::protocol::{self, VERSION};
use bubblebridge::scanner::{HeapInfo, ScanOrchestrator};
use bubblebridge::watchdog::Watchdog;

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver, Pull};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::reset::restart;
use esp_idf_svc::hal::task::block_on;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::ota::EspOta;
use esp_idf_svc::sys::{
    esp_app_get_description, esp_timer_get_time, heap_caps_get_info, multi_heap_info_t,
    MALLOC_CAP_DEFAULT,
};

use esp32_nimble::{BLEDevice, BLEScan};

use net::{EspConnector, TcpTransport};
use nvs::NvsStorage;

/// Length of one scan cycle
const SCAN_DURATION_MS: i32 = 1000;

/// NimBLE scan timing, in 0.625 ms units
const SCAN_INTERVAL: u16 = 0x50;
const SCAN_WINDOW: u16 = 0x30;

const HTTP_PORT: u16 = 80;

/// A client that stalls longer than this is dropped
const HTTP_IO_TIMEOUT: Duration = Duration::from_secs(10);

static WATCHDOG: Watchdog = Watchdog::new();

fn millis() -> u32 {
    (unsafe { esp_timer_get_time() } / 1000) as u32
}

fn heap_info() -> HeapInfo {
    let mut info = multi_heap_info_t::default();
    unsafe { heap_caps_get_info(&mut info, MALLOC_CAP_DEFAULT) };
    HeapInfo {
        total_alloc: info.total_allocated_bytes as u32,
        total_free: info.total_free_bytes as u32,
    }
}

/// Identifies the running image: the first bytes of its ELF hash.
fn build_id() -> heapless::String<16> {
    let desc = unsafe { &*esp_app_get_description() };
    protocol::hex(&desc.app_elf_sha256[..8])
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    // ── Config ───────────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut storage = NvsStorage::new(nvs.clone())?;
    let mut config = Config::new();
    if let Err(e) = config.load(&mut storage) {
        log::warn!("Config: load failed, using defaults: {}", e);
    }
    let boot_count = config.record_boot(&mut storage, &build_id()).unwrap_or_else(|e| {
        log::warn!("Config: boot record failed: {}", e);
        config.boot_count()
    });

    let mut mode = config.boot_mode();
    if config.get_str(ConfigKey::WifiSsid).is_empty() {
        mode = BootMode::Config;
    }

    log::info!(
        "bubblebridge v{} starting on {}: boot {} in {:?} mode",
        VERSION,
        board::BOARD_NAME,
        boot_count,
        mode
    );

    // Reaching this point counts as a good boot for rollback purposes
    match EspOta::new() {
        Ok(mut ota) => {
            if let Err(e) = ota.mark_running_slot_valid() {
                log::warn!("OTA: cannot mark slot valid: {}", e);
            }
        }
        Err(e) => log::warn!("OTA: unavailable: {}", e),
    }

    let button_storage = NvsStorage::new(nvs.clone())?;
    let mut wifi = net::start_wifi(peripherals.modem, sys_loop, nvs, &config)?;

    // ── Button thread ────────────────────────────────────────────────

    let button_config = config.clone();
    thread::Builder::new()
        .name("button".into())
        .stack_size(4096)
        .spawn(move || {
            if let Err(e) = button_thread(button_config, button_storage, mode) {
                log::error!("Button thread failed: {}", e);
            }
        })?;

    // ── Mode-specific threads ────────────────────────────────────────

    let mut led = PinDriver::output(unsafe { AnyOutputPin::new(board::LED_PIN as i32) })?;

    match mode {
        BootMode::Config => {
            thread::Builder::new()
                .name("httpd".into())
                .stack_size(20 * 1024)
                .spawn(move || {
                    if let Err(e) = http_thread(config, storage) {
                        log::error!("HTTP thread failed: {}", e);
                    }
                })?;
            log::info!("HTTP server listening on port {}", HTTP_PORT);

            for _ in 0..3 {
                set_led(&mut led, true);
                FreeRtos::delay_ms(100);
                set_led(&mut led, false);
                FreeRtos::delay_ms(300);
            }
        }
        BootMode::Normal => {
            thread::Builder::new()
                .name("watchdog".into())
                .stack_size(2048)
                .spawn(watchdog_thread)?;

            thread::Builder::new()
                .name("blescan".into())
                .stack_size(12 * 1024)
                .spawn(move || scan_thread(config, boot_count))?;
            log::info!("BLE scan thread spawned");

            set_led(&mut led, true);
            FreeRtos::delay_ms(2000);
            set_led(&mut led, false);
        }
    }

    // ── Link supervision ─────────────────────────────────────────────

    loop {
        thread::sleep(Duration::from_secs(10));
        net::keep_connected(&mut wifi);
    }
}

fn set_led(led: &mut PinDriver<'_, AnyOutputPin, Output>, on: bool) {
    let _ = if on == board::LED_ACTIVE_HIGH {
        led.set_high()
    } else {
        led.set_low()
    };
}

// ── Watchdog ─────────────────────────────────────────────────────────

fn watchdog_thread() {
    WATCHDOG.reset();
    while WATCHDOG.tick() {
        FreeRtos::delay_ms(TICK_MS);
    }
    log::error!("Watchdog: no radio activity for {} ms, restarting", bubblebridge::watchdog::WATCHDOG_TIMEOUT_MS);
    restart();
}

// ── Button ───────────────────────────────────────────────────────────

fn button_thread(mut config: Config, mut storage: NvsStorage, running: BootMode) -> anyhow::Result<()> {
    let mut button = PinDriver::input(unsafe { AnyIOPin::new(board::BUTTON_PIN as i32) })?;
    button.set_pull(Pull::Up)?;

    let mut tracker = ButtonTracker::new(millis());
    loop {
        FreeRtos::delay_ms(TICK_MS);
        let Some(action) = tracker.sample(button.is_low(), millis()) else {
            continue;
        };

        // Pick up anything saved since boot
        if let Err(e) = config.load(&mut storage) {
            log::warn!("Button: reloading config failed: {}", e);
        }
        if let Err(e) = apply_action(action, running, &mut config, &mut storage) {
            log::error!("Button: saving config failed: {}", e);
        }
        restart();
    }
}

// ── HTTP (Config mode) ───────────────────────────────────────────────

fn http_thread(mut config: Config, mut storage: NvsStorage) -> anyhow::Result<()> {
    let mut server = Box::new(HttpServer::new(ota::HttpsUpdater::new(&config)));
    let listener = TcpListener::bind(("0.0.0.0", HTTP_PORT))?;

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("HTTP: accept failed: {}", e);
                continue;
            }
        };

        if let Err(e) = stream
            .set_read_timeout(Some(HTTP_IO_TIMEOUT))
            .and_then(|()| stream.set_write_timeout(Some(HTTP_IO_TIMEOUT)))
        {
            log::warn!("HTTP: cannot set socket timeouts: {}", e);
            continue;
        }

        let outcome = server.handle_connection(TcpTransport::new(stream), &mut config, &mut storage);
        if outcome == Outcome::Restart {
            log::info!("HTTP: configuration applied, restarting");
            FreeRtos::delay_ms(500);
            restart();
        }
    }
    Ok(())
}

// ── BLE scan (Normal mode) ───────────────────────────────────────────

fn scan_thread(config: Config, boot_count: u32) {
    let mut mqtt = MqttClient::new(EspConnector, FreeRtos, MqttOptions::from_config(&config));
    let mut scan: ScanOrchestrator<'static> =
        ScanOrchestrator::new(config.get_str(ConfigKey::Hostname), boot_count, &WATCHDOG, millis());
    #[cfg(feature = "stats")]
    scan.enable_stats(bubblebridge::scanner::STATS_INTERVAL_MS);

    let ble_device = BLEDevice::take();
    let mut ble_scan = BLEScan::new();
    // Passive: scan responses would replace the advertisement in the cache
    ble_scan.active_scan(false).interval(SCAN_INTERVAL).window(SCAN_WINDOW);

    loop {
        let result = block_on(ble_scan.start(ble_device, SCAN_DURATION_MS, |device, data| {
            scan.on_advertisement(&device.addr().as_be_bytes(), device.rssi(), data.payload());
            None::<()>
        }));
        if let Err(e) = result {
            log::warn!("BLE: scan failed: {:?}", e);
        }
        scan.end_cycle(&mut mqtt, millis(), heap_info);
    }
}
