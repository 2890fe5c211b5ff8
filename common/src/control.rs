use embedded_hal::{delay::DelayNs, digital::InputPin};
use log::{debug, info, warn};

use crate::{
    alarm::AlarmStateMachine,
    button::ButtonEdge,
    config::{LoopTiming, MonitorConfig},
    limits::{LimitManager, RefreshOutcome},
    ports::{Clock, Indicators, RemoteSync, SensorReader},
    types::LoopEvent,
};

/// Cooperative single-threaded monitor loop. Every wait inside it blocks.
pub struct ControlLoop<S, R, I, B, D, C> {
    sensors: S,
    remote: R,
    alarm: AlarmStateMachine<I>,
    limits: LimitManager,
    button: B,
    button_edge: ButtonEdge,
    delay: D,
    clock: C,
    timing: LoopTiming,
}

impl<S, R, I, B, D, C> ControlLoop<S, R, I, B, D, C>
where
    S: SensorReader,
    R: RemoteSync,
    I: Indicators,
    B: InputPin,
    D: DelayNs,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &MonitorConfig,
        sensors: S,
        remote: R,
        alarm: AlarmStateMachine<I>,
        button: B,
        delay: D,
        clock: C,
        timing: LoopTiming,
    ) -> Self {
        Self {
            sensors,
            remote,
            alarm,
            limits: LimitManager::new(
                config.default_limits,
                config.use_backend_limits,
                config.limit_refresh_interval_ms,
            ),
            button,
            button_edge: ButtonEdge::default(),
            delay,
            clock,
            timing,
        }
    }

    pub fn alarm(&self) -> &AlarmStateMachine<I> {
        &self.alarm
    }

    pub fn limits(&self) -> &LimitManager {
        &self.limits
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Pulls backend limits once before the first tick, if enabled.
    pub fn start(&mut self) -> Vec<LoopEvent> {
        let defaults = self.limits.current();
        info!(
            "defaults: {:.2}..{:.2} °C, backend limits {}",
            defaults.min(),
            defaults.max(),
            if self.limits.backend_enabled() {
                "enabled"
            } else {
                "disabled"
            }
        );

        let mut events = Vec::new();
        if self.limits.backend_enabled() {
            self.refresh_limits(&mut events);
            self.limits.schedule_next(self.clock.now_ms());
        }
        events
    }

    pub fn tick(&mut self) -> Vec<LoopEvent> {
        let mut events = Vec::new();

        let temp_c = self.sensors.read_temperature_c();
        let motion = self.sensors.read_motion();
        debug!("temp {temp_c:.2} °C motion={motion}");

        self.check_trigger(temp_c, motion, &mut events);
        self.check_backend_ack(&mut events);
        self.check_button_ack(&mut events);
        self.check_limit_refresh(&mut events);

        events
    }

    pub fn idle(&mut self) {
        self.delay.delay_ms(self.timing.idle_ms);
    }

    fn check_trigger(&mut self, temp_c: f32, motion: bool, events: &mut Vec<LoopEvent>) {
        if !motion || self.alarm.is_active() {
            return;
        }

        let limits = self.limits.current();
        let within = limits.contains(temp_c);
        info!(
            "motion at {temp_c:.2} °C, limits {:.2}..{:.2}, within={within}",
            limits.min(),
            limits.max()
        );

        self.remote.post_measurement(temp_c, motion);
        self.alarm.trigger(within, &mut self.delay);
        events.push(LoopEvent::Triggered(self.alarm.state()));
    }

    fn check_backend_ack(&mut self, events: &mut Vec<LoopEvent>) {
        if self.alarm.is_active() && self.remote.poll_ack() {
            info!("alarm acknowledged from backend");
            self.alarm.clear();
            events.push(LoopEvent::AckedByBackend);
        }
    }

    fn check_button_ack(&mut self, events: &mut Vec<LoopEvent>) {
        let high = self.read_button_high();

        if self.alarm.is_active() && self.button_edge.is_falling(high) {
            self.delay.delay_ms(self.timing.debounce_ms);
            if !self.read_button_high() {
                info!("alarm acknowledged with button");
                self.alarm.clear();
                self.remote.send_ack();
                events.push(LoopEvent::AckedByButton);
                self.delay.delay_ms(self.timing.ack_settle_ms);
            }
        }

        self.button_edge.update(high);
    }

    fn check_limit_refresh(&mut self, events: &mut Vec<LoopEvent>) {
        if !self.limits.is_refresh_due(self.clock.now_ms()) {
            return;
        }

        self.refresh_limits(events);
        self.limits.schedule_next(self.clock.now_ms());
        self.delay.delay_ms(self.timing.refresh_settle_ms);
    }

    fn refresh_limits(&mut self, events: &mut Vec<LoopEvent>) {
        let remote = &mut self.remote;
        match self.limits.refresh(|fallback| remote.fetch_temp_limits(fallback)) {
            RefreshOutcome::Updated(limits) => events.push(LoopEvent::LimitsUpdated(limits)),
            RefreshOutcome::Rejected { kept, .. } => events.push(LoopEvent::LimitsRejected(kept)),
        }
    }

    fn read_button_high(&mut self) -> bool {
        self.button.is_high().unwrap_or_else(|err| {
            warn!("button read failed: {err:?}");
            true
        })
    }
}
