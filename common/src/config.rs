use serde::{Deserialize, Serialize};

use crate::limits::TemperatureLimits;

pub const DEFAULT_TEMP_MIN_C: f64 = 2.0;
pub const DEFAULT_TEMP_MAX_C: f64 = 25.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub device_id: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub default_limits: TemperatureLimits,
    pub use_backend_limits: bool,
    pub limit_refresh_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_id: "mailbox-1".to_string(),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 4000,
            default_limits: TemperatureLimits::default(),
            use_backend_limits: true,
            limit_refresh_interval_ms: 10_000,
        }
    }
}

impl MonitorConfig {
    pub fn backend_base_url(&self) -> String {
        format!("http://{}:{}", self.backend_host, self.backend_port)
    }

    pub fn sanitize(&mut self) {
        // Deserialization bypasses the validating constructor.
        if TemperatureLimits::new(self.default_limits.min(), self.default_limits.max()).is_err() {
            self.default_limits = TemperatureLimits::default();
        }

        // Encoding cannot rescue these, they collapse the request path.
        if matches!(self.device_id.trim(), "" | "." | "..") {
            self.device_id = Self::default().device_id;
        }

        if self.backend_port == 0 {
            self.backend_port = 4000;
        }

        self.limit_refresh_interval_ms = self.limit_refresh_interval_ms.max(1_000);
    }
}

/// MCP9701 temperature sensor and coil threshold parameters. Voltages are in
/// volts; the coil threshold is on the 16-bit normalized scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub adc_bits: u8,
    pub samples: u8,
    pub sample_interval_ms: u32,
    pub vref: f32,
    pub v_0c: f32,
    pub slope_v_per_c: f32,
    pub motion_threshold: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            adc_bits: 12,
            samples: 16,
            sample_interval_ms: 2,
            vref: 3.3,
            v_0c: 0.4,
            slope_v_per_c: 0.01953,
            motion_threshold: 3_000,
        }
    }
}

impl SensorConfig {
    pub fn sanitize(&mut self) {
        self.adc_bits = self.adc_bits.clamp(8, 16);
        self.samples = self.samples.max(1);
        if !self.slope_v_per_c.is_finite() || self.slope_v_per_c <= 0.0 {
            self.slope_v_per_c = Self::default().slope_v_per_c;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            connect_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.monitor.sanitize();
        self.sensor.sanitize();
    }
}

/// Fixed waits of the control loop, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub debounce_ms: u32,
    pub ack_settle_ms: u32,
    pub refresh_settle_ms: u32,
    pub idle_ms: u32,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            debounce_ms: 30,
            ack_settle_ms: 300,
            refresh_settle_ms: 100,
            idle_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnunciationPattern {
    pub repetitions: u8,
    pub on_ms: u32,
    pub off_ms: u32,
}

impl Default for AnnunciationPattern {
    fn default() -> Self {
        Self {
            repetitions: 3,
            on_ms: 500,
            off_ms: 500,
        }
    }
}

impl AnnunciationPattern {
    pub fn total_ms(&self) -> u64 {
        u64::from(self.repetitions) * (u64::from(self.on_ms) + u64::from(self.off_ms))
    }
}
