use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{DEFAULT_TEMP_MAX_C, DEFAULT_TEMP_MIN_C};

pub const LIMIT_FLOOR_C: f64 = -50.0;
pub const LIMIT_CEILING_C: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitsError {
    #[error("limit value {0} is not a finite number")]
    Unparsable(String),
    #[error("limits {min}..{max} fall outside -50..100")]
    OutOfRange { min: f64, max: f64 },
    #[error("minimum {min} is not below maximum {max}")]
    NotIncreasing { min: f64, max: f64 },
}

/// Validated temperature band in °C: `-50 <= min < max <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureLimits {
    min: f64,
    max: f64,
}

impl Default for TemperatureLimits {
    fn default() -> Self {
        Self {
            min: DEFAULT_TEMP_MIN_C,
            max: DEFAULT_TEMP_MAX_C,
        }
    }
}

impl TemperatureLimits {
    pub fn new(min: f64, max: f64) -> Result<Self, LimitsError> {
        if !min.is_finite() {
            return Err(LimitsError::Unparsable(min.to_string()));
        }
        if !max.is_finite() {
            return Err(LimitsError::Unparsable(max.to_string()));
        }
        if min < LIMIT_FLOOR_C || max > LIMIT_CEILING_C {
            return Err(LimitsError::OutOfRange { min, max });
        }
        if min >= max {
            return Err(LimitsError::NotIncreasing { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn parse(min: &LimitValue, max: &LimitValue) -> Result<Self, LimitsError> {
        Self::new(min.to_finite()?, max.to_finite()?)
    }

    pub fn validate(min: &LimitValue, max: &LimitValue) -> bool {
        Self::parse(min, max).is_ok()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn contains(&self, temp_c: f32) -> bool {
        let temp_c = f64::from(temp_c);
        self.min <= temp_c && temp_c <= self.max
    }
}

/// A limit as received from the backend, before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitValue {
    Number(f64),
    Text(String),
    Malformed(String),
}

impl LimitValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(number) => number
                .as_f64()
                .map(Self::Number)
                .unwrap_or_else(|| Self::Malformed(number.to_string())),
            Value::String(text) => Self::Text(text.clone()),
            other => Self::Malformed(other.to_string()),
        }
    }

    pub fn to_finite(&self) -> Result<f64, LimitsError> {
        let parsed = match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse::<f64>().ok(),
            Self::Malformed(_) => None,
        };

        parsed
            .filter(|value| value.is_finite())
            .ok_or_else(|| LimitsError::Unparsable(self.to_string()))
    }
}

impl From<f32> for LimitValue {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<f64> for LimitValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for LimitValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl std::fmt::Display for LimitValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Malformed(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated(TemperatureLimits),
    Rejected {
        error: LimitsError,
        kept: TemperatureLimits,
    },
}

/// Owns the thresholds used for alarm decisions and keeps them valid while
/// the backend serves whatever it likes.
#[derive(Debug, Clone)]
pub struct LimitManager {
    current: TemperatureLimits,
    last_good: TemperatureLimits,
    backend_enabled: bool,
    refresh_interval_ms: u64,
    next_refresh_ms: Option<u64>,
}

impl LimitManager {
    pub fn new(defaults: TemperatureLimits, backend_enabled: bool, refresh_interval_ms: u64) -> Self {
        Self {
            current: defaults,
            last_good: defaults,
            backend_enabled,
            refresh_interval_ms,
            next_refresh_ms: None,
        }
    }

    pub fn current(&self) -> TemperatureLimits {
        self.current
    }

    pub fn last_good(&self) -> TemperatureLimits {
        self.last_good
    }

    pub fn backend_enabled(&self) -> bool {
        self.backend_enabled
    }

    /// Fetches candidate limits, offering the current ones as fallback, and
    /// adopts them only if they validate. A rejected update rolls `current`
    /// back to the last good pair.
    pub fn refresh<F>(&mut self, fetch: F) -> RefreshOutcome
    where
        F: FnOnce(TemperatureLimits) -> (LimitValue, LimitValue),
    {
        let (min, max) = fetch(self.current);

        match TemperatureLimits::parse(&min, &max) {
            Ok(limits) => {
                if limits != self.current {
                    info!("limits updated: {:.2}..{:.2} °C", limits.min, limits.max);
                }
                self.current = limits;
                self.last_good = limits;
                RefreshOutcome::Updated(limits)
            }
            Err(error) => {
                warn!(
                    "ignoring invalid limits ({error}); keeping {:.2}..{:.2} °C",
                    self.last_good.min, self.last_good.max
                );
                self.current = self.last_good;
                RefreshOutcome::Rejected {
                    error,
                    kept: self.last_good,
                }
            }
        }
    }

    pub fn is_refresh_due(&self, now_ms: u64) -> bool {
        self.backend_enabled
            && self
                .next_refresh_ms
                .map(|due| now_ms >= due)
                .unwrap_or(true)
    }

    /// Sets the next due time one interval after the previous one. After an
    /// overrun of more than one interval the schedule restarts from `now_ms`.
    pub fn schedule_next(&mut self, now_ms: u64) {
        let next = match self.next_refresh_ms {
            Some(due) => due.saturating_add(self.refresh_interval_ms),
            None => now_ms.saturating_add(self.refresh_interval_ms),
        };

        self.next_refresh_ms = Some(if next <= now_ms {
            now_ms.saturating_add(self.refresh_interval_ms)
        } else {
            next
        });
    }

    pub fn next_refresh_ms(&self) -> Option<u64> {
        self.next_refresh_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limits(min: f64, max: f64) -> TemperatureLimits {
        TemperatureLimits::new(min, max).unwrap()
    }

    #[test]
    fn validates_band_and_ordering() {
        assert!(TemperatureLimits::validate(&2.0.into(), &25.0.into()));
        assert!(!TemperatureLimits::validate(&25.0.into(), &2.0.into()));
        assert!(!TemperatureLimits::validate(&(-60.0).into(), &10.0.into()));
        assert!(!TemperatureLimits::validate(&"x".into(), &10.0.into()));
    }

    #[test]
    fn accepts_band_edges_but_not_equal_bounds() {
        assert!(TemperatureLimits::validate(&(-50.0).into(), &100.0.into()));
        assert!(!TemperatureLimits::validate(&10.0.into(), &10.0.into()));
        assert!(!TemperatureLimits::validate(&0.0.into(), &100.5.into()));
    }

    #[test]
    fn band_edges_hold_at_full_precision() {
        assert!(!TemperatureLimits::validate(&(-50.000001).into(), &10.0.into()));
        assert!(!TemperatureLimits::validate(&0.0.into(), &100.000001.into()));
        assert!(!TemperatureLimits::validate(&"-50.000001".into(), &"10".into()));
        assert!(TemperatureLimits::validate(&24.9999999.into(), &25.0.into()));
        assert!(TemperatureLimits::validate(&"24.9999999".into(), &"25".into()));
    }

    #[test]
    fn close_bounds_keep_their_order() {
        let band = TemperatureLimits::parse(&24.9999999.into(), &25.0.into()).unwrap();

        assert!(band.min() < band.max());
        assert!(band.contains(25.0));
        assert!(!band.contains(24.99));
    }

    #[test]
    fn numeric_strings_parse_but_junk_does_not() {
        assert!(TemperatureLimits::validate(&" 4.5 ".into(), &"20".into()));
        assert!(!TemperatureLimits::validate(&"4,5".into(), &"20".into()));
        assert!(!TemperatureLimits::validate(&"NaN".into(), &"20".into()));
        assert!(!TemperatureLimits::validate(&"inf".into(), &"20".into()));
        assert!(!TemperatureLimits::validate(
            &LimitValue::from_json(&Value::Null),
            &20.0.into()
        ));
    }

    #[test]
    fn parse_reports_the_reason() {
        assert_eq!(
            TemperatureLimits::parse(&30.0.into(), &20.0.into()),
            Err(LimitsError::NotIncreasing {
                min: 30.0,
                max: 20.0
            })
        );
        assert!(matches!(
            TemperatureLimits::parse(&(-60.0).into(), &10.0.into()),
            Err(LimitsError::OutOfRange { .. })
        ));
        assert!(matches!(
            TemperatureLimits::parse(&"x".into(), &10.0.into()),
            Err(LimitsError::Unparsable(_))
        ));
    }

    #[test]
    fn contains_is_inclusive() {
        let band = limits(2.0, 25.0);
        assert!(band.contains(2.0));
        assert!(band.contains(25.0));
        assert!(!band.contains(25.01));
        assert!(!band.contains(1.99));
    }

    #[test]
    fn invalid_refresh_rolls_back_to_last_good() {
        let mut manager = LimitManager::new(limits(2.0, 25.0), true, 10_000);

        let outcome = manager.refresh(|_| (30.0.into(), 20.0.into()));

        assert!(matches!(outcome, RefreshOutcome::Rejected { .. }));
        assert_eq!(manager.current(), limits(2.0, 25.0));
        assert_eq!(manager.last_good(), limits(2.0, 25.0));
    }

    #[test]
    fn valid_refresh_updates_both_pairs() {
        let mut manager = LimitManager::new(limits(2.0, 25.0), true, 10_000);

        let outcome = manager.refresh(|_| ("5".into(), 18.5.into()));

        assert_eq!(outcome, RefreshOutcome::Updated(limits(5.0, 18.5)));
        assert_eq!(manager.current(), limits(5.0, 18.5));
        assert_eq!(manager.last_good(), limits(5.0, 18.5));
    }

    #[test]
    fn bad_update_after_good_one_keeps_the_good_one() {
        let mut manager = LimitManager::new(limits(2.0, 25.0), true, 10_000);
        manager.refresh(|_| (0.0.into(), 30.0.into()));

        manager.refresh(|_| ("oops".into(), 30.0.into()));

        assert_eq!(manager.current(), limits(0.0, 30.0));
    }

    #[test]
    fn fetch_receives_current_limits_as_fallback() {
        let mut manager = LimitManager::new(limits(3.0, 21.0), true, 10_000);
        let mut offered = None;

        manager.refresh(|fallback| {
            offered = Some(fallback);
            (fallback.min().into(), fallback.max().into())
        });

        assert_eq!(offered, Some(limits(3.0, 21.0)));
        assert_eq!(manager.current(), limits(3.0, 21.0));
    }

    #[test]
    fn refresh_is_due_immediately_then_every_interval() {
        let mut manager = LimitManager::new(TemperatureLimits::default(), true, 10_000);
        assert!(manager.is_refresh_due(0));

        manager.schedule_next(0);
        assert!(!manager.is_refresh_due(9_999));
        assert!(manager.is_refresh_due(10_000));

        manager.schedule_next(10_040);
        assert_eq!(manager.next_refresh_ms(), Some(20_000));
    }

    #[test]
    fn schedule_reanchors_after_overrun() {
        let mut manager = LimitManager::new(TemperatureLimits::default(), true, 10_000);
        manager.schedule_next(0);

        // A long alarm annunciation plus slow HTTP calls pushed us far past due.
        manager.schedule_next(35_000);

        assert_eq!(manager.next_refresh_ms(), Some(45_000));
    }

    #[test]
    fn never_due_when_backend_limits_disabled() {
        let manager = LimitManager::new(TemperatureLimits::default(), false, 10_000);
        assert!(!manager.is_refresh_due(0));
        assert!(!manager.is_refresh_due(u64::MAX));
    }
}
