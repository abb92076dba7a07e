use std::time::{Duration, Instant};

/// Longest step handed to the animation systems; a stalled frame (debugger,
/// window drag) should not fast-forward every clip.
const MAX_FRAME_DELTA: Duration = Duration::from_millis(100);

pub struct FrameClock {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::ZERO }
    }

    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        self.delta = (now - self.last).min(MAX_FRAME_DELTA);
        self.last = now;
        self.delta_seconds()
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
