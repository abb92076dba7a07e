//! Idle eye blinks.
//!
//! Produces the eye-closure value the lip-sync synthesizer maps onto the blink
//! shape: every few seconds the eyes close to a random strength for a short
//! hold, then reopen.

use crate::config::BlinkConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct BlinkScheduler<R: Rng = StdRng> {
    config: BlinkConfig,
    rng: R,
    now: f32,
    next_blink_at: f32,
    open_at: f32,
    closure: f32,
}

impl BlinkScheduler<StdRng> {
    pub fn new(config: BlinkConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl Default for BlinkScheduler<StdRng> {
    fn default() -> Self {
        Self::new(BlinkConfig::default())
    }
}

impl<R: Rng> BlinkScheduler<R> {
    pub fn with_rng(config: BlinkConfig, mut rng: R) -> Self {
        let first = sample(&mut rng, config.min_interval, config.max_interval);
        Self { config, rng, now: 0.0, next_blink_at: first, open_at: 0.0, closure: 0.0 }
    }

    pub fn config(&self) -> &BlinkConfig {
        &self.config
    }

    /// Current eye closure, 0 = open.
    pub fn closure(&self) -> f32 {
        self.closure
    }

    /// Seconds until the next blink starts.
    pub fn time_to_next(&self) -> f32 {
        (self.next_blink_at - self.now).max(0.0)
    }

    /// Advances the schedule by `dt` and returns the eye closure for this frame.
    pub fn update(&mut self, dt: f32) -> f32 {
        if !self.config.enabled {
            self.closure = 0.0;
            return 0.0;
        }
        if dt.is_finite() && dt > 0.0 {
            self.now += dt;
        }
        if self.closure > 0.0 && self.now >= self.open_at {
            self.closure = 0.0;
        }
        if self.now >= self.next_blink_at {
            self.closure = sample(&mut self.rng, self.config.min_strength, self.config.max_strength);
            self.open_at = self.now + self.config.hold;
            // The next interval counts from this blink's start, not its end.
            self.next_blink_at = self.now + sample(&mut self.rng, self.config.min_interval, self.config.max_interval);
        }
        self.closure
    }
}

fn sample<R: Rng>(rng: &mut R, min: f32, max: f32) -> f32 {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}
