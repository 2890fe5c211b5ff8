use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::limits::TemperatureLimits;

pub const ACK_ALARM_COMMAND: &str = "ACK_ALARM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Inactive,
    ActiveOk,
    ActiveBreach,
}

impl AlarmState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::ActiveOk => "ACTIVE_OK",
            Self::ActiveBreach => "ACTIVE_BREACH",
        }
    }

    pub fn is_active(self) -> bool {
        self != Self::Inactive
    }

    /// Steady-state outputs for this state. The buzzer is only pulsed while
    /// an alarm is being annunciated, never held.
    pub fn indicator_outputs(self) -> IndicatorOutputs {
        match self {
            Self::Inactive => IndicatorOutputs::default(),
            Self::ActiveOk => IndicatorOutputs {
                yellow: true,
                red: false,
                buzzer: false,
            },
            Self::ActiveBreach => IndicatorOutputs {
                yellow: false,
                red: true,
                buzzer: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndicatorOutputs {
    pub yellow: bool,
    pub red: bool,
    pub buzzer: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Triggered(AlarmState),
    AckedByBackend,
    AckedByButton,
    LimitsUpdated(TemperatureLimits),
    LimitsRejected(TemperatureLimits),
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasurementPayload<'a> {
    pub device_id: &'a str,
    pub temperature_c: f32,
    #[serde(rename = "motionAlarm")]
    pub motion_alarm: bool,
}

impl<'a> MeasurementPayload<'a> {
    pub fn new(device_id: &'a str, temperature_c: f32, motion_alarm: bool) -> Self {
        Self {
            device_id,
            temperature_c: round_to_hundredths(temperature_c),
            motion_alarm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

impl CommandRequest {
    pub fn ack_alarm() -> Self {
        Self {
            command: ACK_ALARM_COMMAND.to_string(),
        }
    }
}

/// Latest command as stored by the backend. `ts` is milliseconds since the
/// Unix epoch on the backend's clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Whatever the client queued. Only the string `ACK_ALARM` means
    /// anything to the monitor, but other values still move the cursor.
    #[serde(default)]
    pub command: Option<Value>,
    #[serde(default)]
    pub ts: u64,
}

impl CommandRecord {
    pub fn is_ack(&self) -> bool {
        self.command.as_ref().and_then(Value::as_str) == Some(ACK_ALARM_COMMAND)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsRecord {
    pub min: f64,
    pub max: f64,
    pub ts: u64,
}

pub fn round_to_hundredths(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn measurement_uses_backend_field_names() {
        let payload = MeasurementPayload::new("pico2w-1556a5", 15.4567, true);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "device_id": "pico2w-1556a5",
                "temperature_c": 15.46_f32,
                "motionAlarm": true,
            })
        );
    }

    #[test]
    fn command_record_defaults_missing_fields() {
        let record: CommandRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record.ts, 0);
        assert!(!record.is_ack());

        let record: CommandRecord =
            serde_json::from_str(r#"{"command":"ACK_ALARM","ts":100}"#).unwrap();
        assert!(record.is_ack());
    }

    #[test]
    fn non_string_commands_decode_without_acking() {
        let record: CommandRecord = serde_json::from_str(r#"{"command":42,"ts":500}"#).unwrap();
        assert_eq!(record.command, Some(serde_json::json!(42)));
        assert_eq!(record.ts, 500);
        assert!(!record.is_ack());

        let record: CommandRecord =
            serde_json::from_str(r#"{"command":{"name":"ACK_ALARM"},"ts":501}"#).unwrap();
        assert!(!record.is_ack());
    }

    #[test]
    fn only_active_states_light_an_led() {
        assert_eq!(
            AlarmState::Inactive.indicator_outputs(),
            IndicatorOutputs::default()
        );
        assert!(AlarmState::ActiveOk.indicator_outputs().yellow);
        assert!(AlarmState::ActiveBreach.indicator_outputs().red);
        assert!(!AlarmState::ActiveBreach.indicator_outputs().buzzer);
    }
}
