//! Boundary traits between the monitor logic and the hardware/network glue.
//!
//! Each device backend (`host`, `esp`) provides one implementation of every
//! trait here. Delays and pins come from `embedded-hal` directly.

use crate::limits::{LimitValue, TemperatureLimits};

pub trait SensorReader {
    /// Averaged temperature in °C.
    fn read_temperature_c(&mut self) -> f32;

    /// Whether the coil reading is above the motion threshold.
    fn read_motion(&mut self) -> bool;
}

/// Backend operations as the control loop sees them. None of these fail:
/// implementations swallow transport errors and return the fallback.
pub trait RemoteSync {
    fn fetch_temp_limits(&mut self, fallback: TemperatureLimits) -> (LimitValue, LimitValue);

    fn post_measurement(&mut self, temp_c: f32, motion: bool);

    /// True only for an `ACK_ALARM` command newer than any seen before.
    fn poll_ack(&mut self) -> bool;

    fn send_ack(&mut self);
}

pub trait Indicators {
    fn set_yellow(&mut self, on: bool);

    fn set_red(&mut self, on: bool);

    fn set_buzzer(&mut self, on: bool);
}

/// Monotonic milliseconds since boot.
pub trait Clock {
    fn now_ms(&self) -> u64;
}
