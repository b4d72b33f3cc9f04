//! Sample-clock timers and the wall-clock hard timer.

use std::time::{Duration, Instant};

use crate::signal::{SignalBus, SignalId};
use crate::MAX_SIGNALS;

#[derive(Debug, Clone, Copy, Default)]
struct Timer {
    remaining: i64,
    period: i64,
    armed: bool,
}

/// Countdown timers driven by the sample clock. Timer `n` sets soft-signal
/// `n` when it reaches zero.
pub struct TimerBank {
    timers: [Timer; MAX_SIGNALS],
    now: u64,
}

impl TimerBank {
    pub fn new() -> Self {
        Self {
            timers: [Timer::default(); MAX_SIGNALS],
            now: 0,
        }
    }

    /// Ticks elapsed since the bank was created or reset.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Arm a one-shot timer. Any stale signal for `id` is cleared so an old
    /// expiry cannot satisfy a new wait.
    pub fn arm_one_shot(&mut self, bus: &mut SignalBus, id: SignalId, delay_ticks: u64) {
        self.arm(bus, id, delay_ticks, 0);
    }

    /// Arm a timer that reloads with `period_ticks` after each expiry.
    /// A period of 0 behaves like `arm_one_shot`.
    pub fn arm_periodic(
        &mut self,
        bus: &mut SignalBus,
        id: SignalId,
        delay_ticks: u64,
        period_ticks: u64,
    ) {
        self.arm(bus, id, delay_ticks, period_ticks);
    }

    fn arm(&mut self, bus: &mut SignalBus, id: SignalId, delay: u64, period: u64) {
        bus.clear(id);
        self.timers[id.index()] = Timer {
            remaining: delay as i64,
            period: period as i64,
            armed: true,
        };
    }

    pub fn disarm(&mut self, id: SignalId) {
        self.timers[id.index()].armed = false;
    }

    pub fn is_armed(&self, id: SignalId) -> bool {
        self.timers[id.index()].armed
    }

    /// Ticks left before `id` fires, if armed.
    pub fn remaining(&self, id: SignalId) -> Option<u64> {
        let timer = &self.timers[id.index()];
        timer.armed.then(|| timer.remaining.max(0) as u64)
    }

    /// Advance every armed timer by `elapsed_ticks`.
    ///
    /// A timer fires once per reach-zero event even when the step overshoots.
    /// Periodic timers carry the overshoot into the next period so they do not
    /// drift.
    pub fn tick(&mut self, bus: &mut SignalBus, elapsed_ticks: u64) {
        self.now += elapsed_ticks;
        for (index, timer) in self.timers.iter_mut().enumerate() {
            if !timer.armed {
                continue;
            }
            timer.remaining -= elapsed_ticks as i64;
            if timer.remaining > 0 {
                continue;
            }
            bus.set(SignalId::from_index(index));
            if timer.period > 0 {
                while timer.remaining <= 0 {
                    timer.remaining += timer.period;
                }
            } else {
                timer.armed = false;
            }
        }
    }

    pub fn reset(&mut self) {
        self.timers = [Timer::default(); MAX_SIGNALS];
        self.now = 0;
    }
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock deadline for waits that happen before any sample clock runs,
/// such as modem initialisation over a serial line.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardTimer {
    deadline: Option<Instant>,
}

impl HardTimer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    pub fn arm(&mut self, seconds: u64, microseconds: u32) {
        self.arm_from(Instant::now(), seconds, microseconds);
    }

    pub fn arm_from(&mut self, start: Instant, seconds: u64, microseconds: u32) {
        let delay = Duration::from_secs(seconds) + Duration::from_micros(microseconds as u64);
        self.deadline = Some(start + delay);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&self) -> bool {
        self.expired_at(Instant::now())
    }

    /// A disarmed timer never expires.
    pub fn expired_at(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}
