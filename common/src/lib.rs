pub mod ack;
pub mod alarm;
pub mod api;
pub mod button;
pub mod config;
pub mod control;
pub mod limits;
pub mod ports;
pub mod remote;
pub mod sensor;
pub mod types;

#[cfg(test)]
mod test_support;

pub use ack::AckCursor;
pub use alarm::{AlarmStateMachine, PinIndicators};
pub use api::*;
pub use config::{
    AnnunciationPattern, LoopTiming, MonitorConfig, NetworkConfig, RuntimeConfig, SensorConfig,
};
pub use control::ControlLoop;
pub use limits::{LimitManager, LimitValue, LimitsError, RefreshOutcome, TemperatureLimits};
pub use ports::{Clock, Indicators, RemoteSync, SensorReader};
pub use remote::{HttpResponse, HttpTransport, RemoteSyncClient, SyncError};
pub use types::{
    AlarmState, CommandRecord, CommandRequest, IndicatorOutputs, LimitsRecord, LoopEvent,
    MeasurementPayload, ACK_ALARM_COMMAND,
};
