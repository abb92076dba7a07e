use crate::retarget::ResolvedClip;
use std::sync::Arc;

/// A once-clip counts as finished this close to its last frame.
pub const END_EPSILON: f32 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    Once,
    Repeat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Ramp {
    from: f32,
    to: f32,
    elapsed: f32,
    duration: f32,
}

/// Blend weight with an optional linear ramp toward a target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    weight: f32,
    ramp: Option<Ramp>,
}

impl Envelope {
    pub fn full() -> Self {
        Self { weight: 1.0, ramp: None }
    }

    pub fn silent() -> Self {
        Self { weight: 0.0, ramp: None }
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    pub fn fade_to(&mut self, target: f32, duration: f32) {
        if duration <= 0.0 {
            self.weight = target;
            self.ramp = None;
        } else {
            self.ramp = Some(Ramp { from: self.weight, to: target, elapsed: 0.0, duration });
        }
    }

    pub fn fade_in(&mut self, duration: f32) {
        self.weight = 0.0;
        self.fade_to(1.0, duration);
    }

    pub fn advance(&mut self, dt: f32) {
        let Some(ramp) = self.ramp.as_mut() else {
            return;
        };
        ramp.elapsed += dt;
        let t = (ramp.elapsed / ramp.duration).min(1.0);
        self.weight = ramp.from + (ramp.to - ramp.from) * t;
        if t >= 1.0 {
            self.ramp = None;
        }
    }
}

/// Playback cursor over one clip.
#[derive(Clone, Debug)]
pub struct ClipAction {
    clip: Arc<ResolvedClip>,
    time: f32,
    mode: LoopMode,
    envelope: Envelope,
}

impl ClipAction {
    pub fn new(clip: Arc<ResolvedClip>, mode: LoopMode, start_time: f32) -> Self {
        let mut action = Self { clip, time: 0.0, mode, envelope: Envelope::full() };
        action.set_time(start_time);
        action
    }

    pub fn clip(&self) -> &Arc<ResolvedClip> {
        &self.clip
    }

    pub fn duration(&self) -> f32 {
        self.clip.duration()
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn set_time(&mut self, time: f32) {
        self.time = time.clamp(0.0, self.duration());
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LoopMode) {
        self.mode = mode;
    }

    pub fn weight(&self) -> f32 {
        self.envelope.weight()
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    pub fn remaining(&self) -> f32 {
        (self.duration() - self.time).max(0.0)
    }

    pub fn reached_end(&self) -> bool {
        self.mode == LoopMode::Once && self.time >= self.duration() - END_EPSILON
    }

    pub fn advance(&mut self, dt: f32) {
        self.envelope.advance(dt);
        let duration = self.duration();
        match self.mode {
            LoopMode::Repeat if duration > 0.0 => self.time = (self.time + dt).rem_euclid(duration),
            LoopMode::Repeat => self.time = 0.0,
            LoopMode::Once => self.time = (self.time + dt).min(duration),
        }
    }
}
