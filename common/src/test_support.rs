//! Test doubles shared by the unit tests of this crate.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};

use crate::{
    limits::{LimitValue, TemperatureLimits},
    ports::{Clock, Indicators, RemoteSync, SensorReader},
    remote::{HttpResponse, HttpTransport, SyncError},
    types::IndicatorOutputs,
};

/// One timeline shared by a fake clock and a fake delay: sleeping advances
/// the clock.
#[derive(Debug, Clone, Default)]
pub struct FakeTime {
    now_ns: Rc<Cell<u64>>,
}

impl FakeTime {
    pub fn now(&self) -> u64 {
        self.now_ns.get() / 1_000_000
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ns.set(self.now_ns.get() + ms * 1_000_000);
    }

    pub fn delay(&self) -> FakeDelay {
        FakeDelay { time: self.clone() }
    }

    pub fn clock(&self) -> FakeClock {
        FakeClock { time: self.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct FakeDelay {
    time: FakeTime,
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.time.now_ns.set(self.time.now_ns.get() + u64::from(ns));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.time.advance_ms(u64::from(ms));
    }
}

#[derive(Debug, Clone)]
pub struct FakeClock {
    time: FakeTime,
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.time.now()
    }
}

#[derive(Debug, Default)]
pub struct RecordingIndicators {
    outputs: IndicatorOutputs,
    buzzer_pulses: u32,
}

impl RecordingIndicators {
    pub fn outputs(&self) -> IndicatorOutputs {
        self.outputs
    }

    pub fn buzzer_pulses(&self) -> u32 {
        self.buzzer_pulses
    }
}

impl Indicators for RecordingIndicators {
    fn set_yellow(&mut self, on: bool) {
        self.outputs.yellow = on;
    }

    fn set_red(&mut self, on: bool) {
        self.outputs.red = on;
    }

    fn set_buzzer(&mut self, on: bool) {
        if on && !self.outputs.buzzer {
            self.buzzer_pulses += 1;
        }
        self.outputs.buzzer = on;
    }
}

#[derive(Debug, Default)]
pub struct FakePin {
    high: bool,
}

impl FakePin {
    pub fn is_set_high(&self) -> bool {
        self.high
    }
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

/// Active-low button that replays queued levels (`true` = high/released) and
/// reads high once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedButton {
    levels: Rc<RefCell<VecDeque<bool>>>,
}

impl ScriptedButton {
    pub fn push_levels(&self, levels: &[bool]) {
        self.levels.borrow_mut().extend(levels.iter().copied());
    }

    fn next_level(&self) -> bool {
        self.levels.borrow_mut().pop_front().unwrap_or(true)
    }
}

impl ErrorType for ScriptedButton {
    type Error = Infallible;
}

impl InputPin for ScriptedButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.next_level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.next_level())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub temp_c: f32,
    pub motion: bool,
}

/// Replays queued readings, then repeats the last one.
#[derive(Debug, Clone)]
pub struct ScriptedSensors {
    readings: Rc<RefCell<VecDeque<Reading>>>,
    last: Rc<Cell<Reading>>,
}

impl Default for ScriptedSensors {
    fn default() -> Self {
        Self {
            readings: Rc::default(),
            last: Rc::new(Cell::new(Reading {
                temp_c: 15.0,
                motion: false,
            })),
        }
    }
}

impl ScriptedSensors {
    pub fn push(&self, temp_c: f32, motion: bool) {
        self.readings
            .borrow_mut()
            .push_back(Reading { temp_c, motion });
    }

    fn advance(&self) {
        if let Some(next) = self.readings.borrow_mut().pop_front() {
            self.last.set(next);
        }
    }
}

impl SensorReader for ScriptedSensors {
    fn read_temperature_c(&mut self) -> f32 {
        self.advance();
        self.last.get().temp_c
    }

    fn read_motion(&mut self) -> bool {
        self.last.get().motion
    }
}

#[derive(Debug, Default)]
pub struct RemoteLog {
    pub measurements: Vec<(f32, bool)>,
    pub acks_sent: u32,
    pub polls: u32,
    pub fetches: Vec<TemperatureLimits>,
}

/// In-memory backend: queued poll answers and limit responses, plus a log of
/// every call.
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    pub log: Rc<RefCell<RemoteLog>>,
    poll_answers: Rc<RefCell<VecDeque<bool>>>,
    limit_answers: Rc<RefCell<VecDeque<(LimitValue, LimitValue)>>>,
}

impl FakeRemote {
    pub fn queue_poll(&self, answer: bool) {
        self.poll_answers.borrow_mut().push_back(answer);
    }

    pub fn queue_limits(&self, min: impl Into<LimitValue>, max: impl Into<LimitValue>) {
        self.limit_answers
            .borrow_mut()
            .push_back((min.into(), max.into()));
    }
}

impl RemoteSync for FakeRemote {
    fn fetch_temp_limits(&mut self, fallback: TemperatureLimits) -> (LimitValue, LimitValue) {
        self.log.borrow_mut().fetches.push(fallback);
        self.limit_answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| (fallback.min().into(), fallback.max().into()))
    }

    fn post_measurement(&mut self, temp_c: f32, motion: bool) {
        self.log.borrow_mut().measurements.push((temp_c, motion));
    }

    fn poll_ack(&mut self) -> bool {
        self.log.borrow_mut().polls += 1;
        self.poll_answers.borrow_mut().pop_front().unwrap_or(false)
    }

    fn send_ack(&mut self) {
        self.log.borrow_mut().acks_sent += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

/// HTTP transport answering GETs from a queue and recording every request.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    pub requests: Rc<RefCell<Vec<SentRequest>>>,
    responses: Rc<RefCell<VecDeque<Result<HttpResponse, SyncError>>>>,
}

impl FakeTransport {
    pub fn respond(&self, status: u16, body: &str) {
        self.responses.borrow_mut().push_back(Ok(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        }));
    }

    pub fn fail(&self, message: &str) {
        self.responses
            .borrow_mut()
            .push_back(Err(SyncError::Transport(message.to_string())));
    }

    fn next_response(&self) -> Result<HttpResponse, SyncError> {
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(HttpResponse {
                status: 200,
                body: b"{}".to_vec(),
            }))
    }
}

impl HttpTransport for FakeTransport {
    fn get(&mut self, path: &str) -> Result<HttpResponse, SyncError> {
        self.requests.borrow_mut().push(SentRequest {
            method: "GET",
            path: path.to_string(),
            body: None,
        });
        self.next_response()
    }

    fn post_json(&mut self, path: &str, body: &[u8]) -> Result<HttpResponse, SyncError> {
        self.requests.borrow_mut().push(SentRequest {
            method: "POST",
            path: path.to_string(),
            body: serde_json::from_slice(body).ok(),
        });
        self.next_response()
    }
}
