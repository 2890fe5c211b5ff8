use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use mailbox_common::{
    config::{DEFAULT_TEMP_MAX_C, DEFAULT_TEMP_MIN_C},
    limits::{LIMIT_CEILING_C, LIMIT_FLOOR_C},
    CommandRecord, LimitsRecord, PATH_SENSOR, PATH_WS, ROUTE_COMMANDS, ROUTE_TEMP_LIMITS,
};

use crate::store::AppStore;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone)]
pub struct AppState {
    pub store: AppStore,
    pub events: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(store: AppStore) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { store, events }
    }

    fn broadcast(&self, message: Value) {
        // No subscribers is not an error.
        let _ = self.events.send(message.to_string());
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_SENSOR, get(handle_get_sensor).post(handle_post_sensor))
        .route(
            ROUTE_TEMP_LIMITS,
            get(handle_get_limits).post(handle_post_limits),
        )
        .route(
            ROUTE_COMMANDS,
            get(handle_get_command).post(handle_post_command),
        )
        .route(PATH_WS, get(handle_ws))
        .with_state(state)
}

async fn handle_post_sensor(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let item = stamp_measurement(parse_body(&body), &now_iso());

    if let Err(err) = state.store.append_measurement(item.clone()).await {
        warn!("failed to persist measurement: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_failed", None);
    }
    debug!("measurement stored: {item}");

    let mut message = Map::new();
    message.insert("kind".to_string(), json!("measurement"));
    if let Value::Object(fields) = &item {
        message.extend(fields.clone());
    }
    state.broadcast(Value::Object(message));

    Json(json!({ "status": "ok" })).into_response()
}

async fn handle_get_sensor(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let stored = state.store.measurements().await;
    let days = params.get("days").and_then(|value| parse_days(value));
    let device_id = params
        .get("device_id")
        .map(String::as_str)
        .filter(|id| !id.is_empty());

    let out = filter_measurements(stored, device_id, days, Utc::now().timestamp_millis());
    ([(header::CACHE_CONTROL, "no-store")], Json(out))
}

async fn handle_get_limits(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let record = state
        .store
        .limits(&device_id)
        .await
        .unwrap_or_else(|| LimitsRecord {
            min: DEFAULT_TEMP_MIN_C,
            max: DEFAULT_TEMP_MAX_C,
            ts: now_ms(),
        });
    ([(header::CACHE_CONTROL, "no-store")], Json(record))
}

async fn handle_post_limits(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let body = parse_body(&body);
    let min = body.get("min").map_or(f64::NAN, parse_num);
    let max = body.get("max").map_or(f64::NAN, parse_num);

    if let Err(rejection) = check_limits(min, max) {
        return error_response(
            StatusCode::BAD_REQUEST,
            rejection.code(),
            Some(rejection.hint()),
        );
    }

    let record = LimitsRecord {
        min,
        max,
        ts: now_ms(),
    };
    if let Err(err) = state.store.save_limits(&device_id, &record).await {
        warn!("failed to persist limits for {device_id}: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_failed", None);
    }
    info!("limits for {device_id} set to {min}..{max}");

    state.broadcast(json!({
        "kind": "limits_updated",
        "device_id": device_id,
        "min": record.min,
        "max": record.max,
        "ts": record.ts,
    }));

    StatusCode::NO_CONTENT.into_response()
}

async fn handle_post_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let command = parse_body(&body)
        .get("command")
        .filter(|command| is_truthy(command))
        .cloned();
    let record = CommandRecord {
        command,
        ts: now_ms(),
    };

    if let Err(err) = state.store.save_command(&device_id, &record).await {
        warn!("failed to persist command for {device_id}: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_failed", None);
    }
    info!("command {:?} queued for {device_id}", record.command);

    state.broadcast(json!({ "kind": "alarm_ack", "device_id": device_id }));

    Json(json!({ "status": "queued" })).into_response()
}

async fn handle_get_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let record = state.store.command(&device_id).await;
    ([(header::CACHE_CONTROL, "no-store")], Json(record))
}

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events))
}

async fn forward_events(mut socket: WebSocket, mut events: broadcast::Receiver<String>) {
    debug!("websocket client connected");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("websocket client lagged, dropped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("websocket client disconnected");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimitsRejection {
    Invalid,
    OutOfRange,
}

impl LimitsRejection {
    fn code(self) -> &'static str {
        match self {
            Self::Invalid => "invalid_limits",
            Self::OutOfRange => "out_of_range",
        }
    }

    fn hint(self) -> &'static str {
        match self {
            Self::Invalid => "min and max must be numbers with min < max",
            Self::OutOfRange => "limits must stay within -50..100 °C",
        }
    }
}

fn check_limits(min: f64, max: f64) -> Result<(), LimitsRejection> {
    if !min.is_finite() || !max.is_finite() || min >= max {
        return Err(LimitsRejection::Invalid);
    }
    if min < LIMIT_FLOOR_C || max > LIMIT_CEILING_C {
        return Err(LimitsRejection::OutOfRange);
    }
    Ok(())
}

/// Lenient number parsing for limit inputs: JSON numbers as-is, strings
/// trimmed with a decimal comma allowed and trailing junk ignored. Anything
/// else is NaN.
fn parse_num(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => parse_float_prefix(&text.trim().replacen(',', ".", 1)),
        _ => f64::NAN,
    }
}

fn parse_float_prefix(text: &str) -> f64 {
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &text[digits_start..end] == "." {
        return f64::NAN;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        // A bare `e` is trailing junk, not an exponent.
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

/// Falsy command values (null, false, zero, NaN and the empty string) are
/// stored as no command at all.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn parse_days(value: &str) -> Option<i64> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<i64>().ok().filter(|days| *days > 0)
}

fn filter_measurements(
    stored: Vec<Value>,
    device_id: Option<&str>,
    days: Option<i64>,
    now_ms: i64,
) -> Vec<Value> {
    let cutoff = days.map(|days| now_ms.saturating_sub(days.saturating_mul(DAY_MS)));

    stored
        .into_iter()
        .filter(|item| match device_id {
            Some(id) => item.get("device_id").and_then(Value::as_str) == Some(id),
            None => true,
        })
        .filter(|item| match cutoff {
            Some(cutoff) => item
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .is_some_and(|at| at.timestamp_millis() >= cutoff),
            None => true,
        })
        .collect()
}

/// Non-object bodies are stored as an empty object plus the timestamp.
fn stamp_measurement(body: Value, timestamp: &str) -> Value {
    let mut fields = match body {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    fields.insert("timestamp".to_string(), json!(timestamp));
    Value::Object(fields)
}

fn parse_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Object(Map::new()))
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().try_into().unwrap_or(0)
}

fn error_response(
    status: StatusCode,
    error: &str,
    hint: Option<&str>,
) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            hint: hint.map(str::to_string),
        }),
    )
        .into_response()
}
