use embedded_hal::{delay::DelayNs, digital::OutputPin};
use log::{debug, info, warn};

use crate::{
    config::AnnunciationPattern,
    ports::Indicators,
    types::{AlarmState, IndicatorOutputs},
};

/// Single owner of the alarm flag and of every indicator output.
#[derive(Debug)]
pub struct AlarmStateMachine<I> {
    state: AlarmState,
    indicators: I,
    pattern: AnnunciationPattern,
}

impl<I: Indicators> AlarmStateMachine<I> {
    pub fn new(indicators: I, pattern: AnnunciationPattern) -> Self {
        let mut machine = Self {
            state: AlarmState::Inactive,
            indicators,
            pattern,
        };
        machine.apply_outputs();
        machine
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn indicators(&self) -> &I {
        &self.indicators
    }

    /// Raises the alarm and blocks while the buzzer pattern plays.
    ///
    /// The caller is expected to check [`is_active`](Self::is_active) first;
    /// triggering an active alarm replays the annunciation.
    pub fn trigger<D: DelayNs>(&mut self, temp_within_bounds: bool, delay: &mut D) {
        if self.is_active() {
            debug!("trigger while already {}", self.state.as_str());
        }

        self.state = if temp_within_bounds {
            AlarmState::ActiveOk
        } else {
            AlarmState::ActiveBreach
        };
        info!("alarm raised: {}", self.state.as_str());
        self.apply_outputs();
        self.annunciate(delay);
    }

    pub fn clear(&mut self) {
        if self.is_active() {
            info!("alarm cleared");
        }
        self.state = AlarmState::Inactive;
        self.apply_outputs();
    }

    fn apply_outputs(&mut self) {
        let IndicatorOutputs {
            yellow,
            red,
            buzzer,
        } = self.state.indicator_outputs();
        self.indicators.set_yellow(yellow);
        self.indicators.set_red(red);
        self.indicators.set_buzzer(buzzer);
    }

    fn annunciate<D: DelayNs>(&mut self, delay: &mut D) {
        for _ in 0..self.pattern.repetitions {
            self.indicators.set_buzzer(true);
            delay.delay_ms(self.pattern.on_ms);
            self.indicators.set_buzzer(false);
            delay.delay_ms(self.pattern.off_ms);
        }
    }
}

/// Drives the two LEDs and the buzzer through plain GPIO outputs.
#[derive(Debug)]
pub struct PinIndicators<Y, R, B> {
    yellow: Y,
    red: R,
    buzzer: B,
}

impl<Y, R, B> PinIndicators<Y, R, B>
where
    Y: OutputPin,
    R: OutputPin,
    B: OutputPin,
{
    pub fn new(yellow: Y, red: R, buzzer: B) -> Self {
        Self {
            yellow,
            red,
            buzzer,
        }
    }
}

fn drive<P: OutputPin>(pin: &mut P, on: bool, name: &str) {
    let result = if on { pin.set_high() } else { pin.set_low() };
    if let Err(err) = result {
        warn!("failed to drive {name} output: {err:?}");
    }
}

impl<Y, R, B> Indicators for PinIndicators<Y, R, B>
where
    Y: OutputPin,
    R: OutputPin,
    B: OutputPin,
{
    fn set_yellow(&mut self, on: bool) {
        drive(&mut self.yellow, on, "yellow led");
    }

    fn set_red(&mut self, on: bool) {
        drive(&mut self.red, on, "red led");
    }

    fn set_buzzer(&mut self, on: bool) {
        drive(&mut self.buzzer, on, "buzzer");
    }
}
