use core::convert::TryInto;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::FreeRtos,
    gpio::{Gpio34, Gpio35, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::EspWifi,
};
use log::{debug, info, warn};

use mailbox_common::{
    config::{NetworkConfig, SensorConfig},
    sensor::{average_u16, is_motion, normalize_to_u16, raw16_to_celsius},
    AlarmStateMachine, AnnunciationPattern, Clock, ControlLoop, HttpResponse, HttpTransport,
    LoopTiming, PinIndicators, RemoteSyncClient, RuntimeConfig, SensorReader, SyncError,
};

const NVS_NAMESPACE: &str = "mailbox";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const WIFI_POLL_MS: u64 = 500;
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HTTP_BODY: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;

type SharedAdc = Arc<AdcDriver<'static, ADC1>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    apply_build_defaults(&mut runtime);
    runtime.sanitize();

    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let _wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;

    let adc = Arc::new(AdcDriver::new(adc1).context("failed to initialize ADC1")?);
    let sensors = AdcSensors::new(adc, pins.gpio35, pins.gpio34, runtime.sensor.clone())
        .context("failed to initialize sensor inputs")?;

    let indicators = PinIndicators::new(
        PinDriver::output(pins.gpio14)?,
        PinDriver::output(pins.gpio15)?,
        PinDriver::output(pins.gpio16)?,
    );
    let alarm = AlarmStateMachine::new(indicators, AnnunciationPattern::default());

    let mut button = PinDriver::input(pins.gpio17)?;
    button.set_pull(Pull::Up)?;

    let monitor = &runtime.monitor;
    let transport = EspHttpTransport::new(monitor.backend_base_url());
    let remote = RemoteSyncClient::new(transport, monitor.device_id.clone());

    let mut control = ControlLoop::new(
        monitor,
        sensors,
        remote,
        alarm,
        button,
        FreeRtos,
        UptimeClock::new(),
        LoopTiming::default(),
    );

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    control.start();
    info!("monitor `{}` running", monitor.device_id);

    loop {
        feed_watchdog();
        for event in control.tick() {
            debug!("event: {event:?}");
        }
        control.idle();
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 2048];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

fn apply_build_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.trim().is_empty() {
        runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }
    if runtime.network.wifi_pass.is_empty() {
        runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    }
    if let Some(device_id) = option_env!("MAILBOX_DEVICE_ID") {
        runtime.monitor.device_id = device_id.to_string();
    }
    if let Some(host) = option_env!("MAILBOX_BACKEND_HOST") {
        runtime.monitor.backend_host = host.to_string();
    }
}

/// Associates in station mode and waits for an address. Running out of time
/// is fatal; there is no retry.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    wifi.connect()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let started = Instant::now();
    let timeout = Duration::from_millis(network.connect_timeout_ms);
    while !wifi.is_up()? {
        if started.elapsed() >= timeout {
            bail!(
                "wifi `{}` not connected after {}s",
                network.wifi_ssid,
                timeout.as_secs()
            );
        }
        thread::sleep(Duration::from_millis(WIFI_POLL_MS));
    }

    let ip = wifi.sta_netif().get_ip_info()?.ip;
    info!("wifi connected, ip {ip}");
    Ok(wifi)
}

/// MCP9701 on GPIO35 and the mailbox coil on GPIO34, both on ADC1.
struct AdcSensors {
    temperature: AdcChannelDriver<'static, Gpio35, SharedAdc>,
    coil: AdcChannelDriver<'static, Gpio34, SharedAdc>,
    config: SensorConfig,
    last_temp_c: f32,
}

impl AdcSensors {
    fn new(
        adc: SharedAdc,
        temperature_pin: Gpio35,
        coil_pin: Gpio34,
        config: SensorConfig,
    ) -> anyhow::Result<Self> {
        let channel_config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        Ok(Self {
            temperature: AdcChannelDriver::new(adc.clone(), temperature_pin, &channel_config)?,
            coil: AdcChannelDriver::new(adc, coil_pin, &channel_config)?,
            config,
            last_temp_c: 0.0,
        })
    }
}

impl SensorReader for AdcSensors {
    fn read_temperature_c(&mut self) -> f32 {
        let mut samples = Vec::with_capacity(usize::from(self.config.samples));
        for _ in 0..self.config.samples {
            match self.temperature.read_raw() {
                Ok(raw) => samples.push(normalize_to_u16(raw, self.config.adc_bits)),
                Err(err) => warn!("temperature adc read failed: {err}"),
            }
            FreeRtos::delay_ms(self.config.sample_interval_ms);
        }

        match average_u16(&samples) {
            Some(raw16) => {
                self.last_temp_c = raw16_to_celsius(raw16, &self.config);
            }
            None => warn!("no temperature samples; reusing {:.2} °C", self.last_temp_c),
        }
        self.last_temp_c
    }

    fn read_motion(&mut self) -> bool {
        match self.coil.read_raw() {
            Ok(raw) => is_motion(normalize_to_u16(raw, self.config.adc_bits), &self.config),
            Err(err) => {
                warn!("coil adc read failed: {err}");
                false
            }
        }
    }
}

struct EspHttpTransport {
    base_url: String,
}

impl EspHttpTransport {
    fn new(base_url: String) -> Self {
        Self { base_url }
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
    ) -> anyhow::Result<HttpResponse> {
        let http_conf = HttpClientConfiguration {
            timeout: Some(HTTP_TIMEOUT),
            ..Default::default()
        };
        let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);
        let url = format!("{}{path}", self.base_url);

        let mut response = match body {
            Some(body) => {
                let content_length = body.len().to_string();
                let headers = [
                    ("Content-Type", "application/json"),
                    ("Content-Length", content_length.as_str()),
                ];
                let mut request = client.request(method, &url, &headers)?;
                request.write_all(body).map_err(|e| anyhow!("{e:?}"))?;
                request.flush().map_err(|e| anyhow!("{e:?}"))?;
                request.submit().map_err(|e| anyhow!("{e:?}"))?
            }
            None => client
                .request(method, &url, &[])?
                .submit()
                .map_err(|e| anyhow!("{e:?}"))?,
        };

        let status = response.status();
        let mut body = Vec::new();
        let mut chunk = [0_u8; 512];
        loop {
            let read = response.read(&mut chunk).map_err(|e| anyhow!("{e:?}"))?;
            if read == 0 {
                break;
            }
            if body.len() + read > MAX_HTTP_BODY {
                bail!("response body exceeds {MAX_HTTP_BODY} bytes");
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Ok(HttpResponse { status, body })
    }
}

impl HttpTransport for EspHttpTransport {
    fn get(&mut self, path: &str) -> Result<HttpResponse, SyncError> {
        self.send(Method::Get, path, None)
            .map_err(|err| SyncError::Transport(format!("{err:#}")))
    }

    fn post_json(&mut self, path: &str, body: &[u8]) -> Result<HttpResponse, SyncError> {
        self.send(Method::Post, path, Some(body))
            .map_err(|err| SyncError::Transport(format!("{err:#}")))
    }
}

struct UptimeClock {
    booted: Instant,
}

impl UptimeClock {
    fn new() -> Self {
        Self {
            booted: Instant::now(),
        }
    }
}

impl Clock for UptimeClock {
    fn now_ms(&self) -> u64 {
        self.booted.elapsed().as_millis() as u64
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}
