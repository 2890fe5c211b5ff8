//! Host build of the monitor: simulated sensors, indicator pins that log,
//! and a file-backed acknowledge button. Talks to a real backend over HTTP.

use std::{
    convert::Infallible,
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};
use tracing::{debug, info, warn};

use mailbox_common::{
    AlarmStateMachine, AnnunciationPattern, Clock, ControlLoop, HttpResponse, HttpTransport,
    LoopTiming, PinIndicators, RemoteSyncClient, RuntimeConfig, SensorReader, SyncError,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config()?;
    let monitor = &runtime.monitor;
    info!(
        "monitor `{}` starting against {}",
        monitor.device_id,
        monitor.backend_base_url()
    );

    wait_for_backend(
        &monitor.backend_host,
        monitor.backend_port,
        Duration::from_millis(runtime.network.connect_timeout_ms),
    )?;

    let transport = ReqwestTransport::new(monitor.backend_base_url())?;
    let remote = RemoteSyncClient::new(transport, monitor.device_id.clone());

    let indicators = PinIndicators::new(
        LogPin::new("yellow led"),
        LogPin::new("red led"),
        LogPin::new("buzzer"),
    );
    let alarm = AlarmStateMachine::new(indicators, AnnunciationPattern::default());

    let motion_every = env_parse::<u64>("MAILBOX_SIM_MOTION_EVERY").unwrap_or(500);
    let button_file = std::env::var("MAILBOX_BUTTON_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".mailbox-button"));

    let mut control = ControlLoop::new(
        monitor,
        SimulatedSensors::new(motion_every),
        remote,
        alarm,
        FileButton::new(button_file),
        StdDelay,
        MonotonicClock::new(),
        LoopTiming::default(),
    );

    control.start();
    info!("monitor loop running");

    loop {
        for event in control.tick() {
            info!("event: {event:?}");
        }
        control.idle();
    }
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let mut runtime = match std::env::var("MAILBOX_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            serde_json::from_str::<RuntimeConfig>(&raw)
                .with_context(|| format!("failed to parse config file {path}"))?
        }
        Err(_) => RuntimeConfig::default(),
    };

    let monitor = &mut runtime.monitor;
    if let Ok(device_id) = std::env::var("MAILBOX_DEVICE_ID") {
        monitor.device_id = device_id;
    }
    if let Ok(host) = std::env::var("MAILBOX_BACKEND_HOST") {
        monitor.backend_host = host;
    }
    if let Some(port) = env_parse::<u16>("MAILBOX_BACKEND_PORT") {
        monitor.backend_port = port;
    }
    if let Some(enabled) = env_parse::<bool>("MAILBOX_USE_BACKEND_LIMITS") {
        monitor.use_backend_limits = enabled;
    }

    runtime.sanitize();
    Ok(runtime)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Stand-in for Wi-Fi association: retry a TCP connect until the backend
/// answers or the deadline passes.
fn wait_for_backend(host: &str, port: u16, timeout: Duration) -> anyhow::Result<()> {
    let started = Instant::now();

    loop {
        // Name resolution can fail while the network is still coming up.
        match (host, port).to_socket_addrs() {
            Ok(addrs) => {
                for addr in addrs {
                    if TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_ok() {
                        info!("backend reachable at {addr}");
                        return Ok(());
                    }
                }
            }
            Err(err) => warn!("failed to resolve {host}:{port}: {err}"),
        }

        if started.elapsed() >= timeout {
            return Err(anyhow!(
                "backend {host}:{port} unreachable after {}s",
                timeout.as_secs()
            ));
        }
        thread::sleep(Duration::from_millis(500));
    }
}

struct ReqwestTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl ReqwestTransport {
    fn new(base_url: String) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, base_url })
    }

    fn finish(
        response: reqwest::Result<reqwest::blocking::Response>,
    ) -> Result<HttpResponse, SyncError> {
        let response = response.map_err(|err| SyncError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| SyncError::Transport(err.to_string()))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&mut self, path: &str) -> Result<HttpResponse, SyncError> {
        Self::finish(
            self.client
                .get(format!("{}{path}", self.base_url))
                .send(),
        )
    }

    fn post_json(&mut self, path: &str, body: &[u8]) -> Result<HttpResponse, SyncError> {
        Self::finish(
            self.client
                .post(format!("{}{path}", self.base_url))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec())
                .send(),
        )
    }
}

/// Slow temperature drift across 0..30 °C with a mail drop every
/// `motion_every` reads.
struct SimulatedSensors {
    tick: u64,
    motion_every: u64,
}

impl SimulatedSensors {
    fn new(motion_every: u64) -> Self {
        Self {
            tick: 0,
            motion_every: motion_every.max(1),
        }
    }
}

impl SensorReader for SimulatedSensors {
    fn read_temperature_c(&mut self) -> f32 {
        self.tick = self.tick.wrapping_add(1);
        let phase = (self.tick % 3_000) as f32 / 3_000.0;
        15.0 + 15.0 * (phase * std::f32::consts::TAU).sin()
    }

    fn read_motion(&mut self) -> bool {
        self.tick % self.motion_every == 0
    }
}

struct LogPin {
    name: &'static str,
    high: bool,
}

impl LogPin {
    fn new(name: &'static str) -> Self {
        Self { name, high: false }
    }

    fn set(&mut self, high: bool) {
        if self.high != high {
            debug!("{} {}", self.name, if high { "on" } else { "off" });
        }
        self.high = high;
    }
}

impl ErrorType for LogPin {
    type Error = Infallible;
}

impl OutputPin for LogPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

/// Active-low button: pressed (low) while the marker file exists.
struct FileButton {
    path: PathBuf,
}

impl FileButton {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ErrorType for FileButton {
    type Error = Infallible;
}

impl InputPin for FileButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.path.exists())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.path.exists())
    }
}

struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
