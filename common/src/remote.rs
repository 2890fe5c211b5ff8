use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::{
    ack::AckCursor,
    api::{commands_path, temp_limits_path, PATH_SENSOR},
    limits::{LimitValue, TemperatureLimits},
    ports::RemoteSync,
    types::{CommandRecord, CommandRequest, MeasurementPayload},
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend answered HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn ok_json<T: DeserializeOwned>(self) -> Result<T, SyncError> {
        if self.status != 200 {
            return Err(SyncError::Status(self.status));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Raw HTTP against the backend. Paths are absolute (`/api/...`); the
/// transport owns the base URL.
pub trait HttpTransport {
    fn get(&mut self, path: &str) -> Result<HttpResponse, SyncError>;

    fn post_json(&mut self, path: &str, body: &[u8]) -> Result<HttpResponse, SyncError>;
}

/// Best-effort backend client. Every failure is logged and replaced by a
/// fallback so the control loop never sees a network error.
#[derive(Debug)]
pub struct RemoteSyncClient<T> {
    transport: T,
    device_id: String,
    cursor: AckCursor,
}

impl<T: HttpTransport> RemoteSyncClient<T> {
    pub fn new(transport: T, device_id: impl Into<String>) -> Self {
        Self {
            transport,
            device_id: device_id.into(),
            cursor: AckCursor::default(),
        }
    }

    pub fn cursor(&self) -> AckCursor {
        self.cursor
    }

    fn try_fetch_limits(&mut self) -> Result<Value, SyncError> {
        self.transport
            .get(&temp_limits_path(&self.device_id))?
            .ok_json()
    }

    fn try_post(&mut self, path: &str, body: Vec<u8>) -> Result<(), SyncError> {
        let response = self.transport.post_json(path, &body)?;
        if !response.is_success() {
            return Err(SyncError::Status(response.status));
        }
        Ok(())
    }

    fn try_poll(&mut self) -> Result<Option<CommandRecord>, SyncError> {
        self.transport.get(&commands_path(&self.device_id))?.ok_json()
    }
}

impl<T: HttpTransport> RemoteSync for RemoteSyncClient<T> {
    fn fetch_temp_limits(&mut self, fallback: TemperatureLimits) -> (LimitValue, LimitValue) {
        let fallback_pair = (fallback.min().into(), fallback.max().into());

        match self.try_fetch_limits() {
            Ok(Value::Object(fields)) => {
                let pick = |key: &str, default: f64| {
                    fields
                        .get(key)
                        .map(LimitValue::from_json)
                        .unwrap_or_else(|| default.into())
                };
                (
                    pick("min", fallback.min()),
                    pick("max", fallback.max()),
                )
            }
            Ok(other) => {
                warn!("temp limits fetch returned non-object: {other}");
                fallback_pair
            }
            Err(err) => {
                warn!("temp limits fetch failed: {err}");
                fallback_pair
            }
        }
    }

    fn post_measurement(&mut self, temp_c: f32, motion: bool) {
        let payload = MeasurementPayload::new(&self.device_id, temp_c, motion);
        let rounded = payload.temperature_c;
        let result = match serde_json::to_vec(&payload) {
            Ok(body) => self.try_post(PATH_SENSOR, body),
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => debug!("measurement posted: {rounded:.2} °C motion={motion}"),
            Err(err) => warn!("measurement post failed: {err}"),
        }
    }

    fn poll_ack(&mut self) -> bool {
        match self.try_poll() {
            Ok(Some(record)) => {
                let ack = self.cursor.observe(&record);
                if ack {
                    info!("backend acknowledged alarm (ts {})", record.ts);
                }
                ack
            }
            Ok(None) => false,
            Err(err) => {
                warn!("command poll failed: {err}");
                false
            }
        }
    }

    fn send_ack(&mut self) {
        let path = commands_path(&self.device_id);
        let result = serde_json::to_vec(&CommandRequest::ack_alarm())
            .map_err(SyncError::from)
            .and_then(|body| self.try_post(&path, body));
        match result {
            Ok(()) => info!("ack sent to backend"),
            Err(err) => warn!("ack send failed: {err}"),
        }
    }
}
