use super::action::{ClipAction, Envelope, LoopMode};
use super::PlayerEvent;
use crate::config::PlaybackConfig;
use crate::retarget::ResolvedClip;
use crate::rig::BodyRegion;
use smallvec::SmallVec;
use std::sync::Arc;

/// Maps a cursor position onto a clip of another length, keeping the loop phase.
pub fn normalized_phase(old_time: f32, old_duration: f32, new_duration: f32) -> Option<f32> {
    if old_duration <= 0.0 || new_duration <= 0.0 {
        return None;
    }
    Some(old_time.rem_euclid(old_duration) / old_duration * new_duration)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorSnapshot {
    pub slot: usize,
    pub time: f32,
    /// Effective blend weight, channel cap included.
    pub weight: f32,
    pub active: bool,
}

/// Two once-cursors over the same clip taking turns, crossfading at the seam.
#[derive(Clone, Debug)]
pub(crate) struct SeamlessLoop {
    cursors: [ClipAction; 2],
    active: usize,
    window: f32,
    crossfade: Option<f32>,
    envelope: Envelope,
    splicing: bool,
}

impl SeamlessLoop {
    fn new(clip: Arc<ResolvedClip>, fade: f32, start_time: f32) -> Self {
        let duration = clip.duration();
        let window = fade.min(duration * 0.5).max(0.0);
        let lead = ClipAction::new(Arc::clone(&clip), LoopMode::Once, start_time);
        let mut spare = ClipAction::new(clip, LoopMode::Once, duration);
        *spare.envelope_mut() = Envelope::silent();
        Self { cursors: [lead, spare], active: 0, window, crossfade: None, envelope: Envelope::full(), splicing: true }
    }

    fn lead(&self) -> &ClipAction {
        &self.cursors[self.active]
    }

    fn advance(&mut self, dt: f32) {
        self.envelope.advance(dt);
        for cursor in &mut self.cursors {
            cursor.advance(dt);
        }
        if let Some(elapsed) = self.crossfade.as_mut() {
            *elapsed += dt;
            if *elapsed >= self.window {
                self.crossfade = None;
            }
        }
    }

    /// Starts the idle cursor from zero and hands it the lead once the current
    /// lead is within the seam window of its end.
    fn splice_if_due(&mut self) {
        if !self.splicing || self.crossfade.is_some() || self.lead().remaining() > self.window {
            return;
        }
        let next = 1 - self.active;
        self.cursors[next].set_time(0.0);
        self.cursors[next].envelope_mut().fade_in(self.window);
        self.cursors[self.active].envelope_mut().fade_to(0.0, self.window);
        self.active = next;
        self.crossfade = Some(0.0);
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Binding {
    Single(ClipAction),
    Seamless(SeamlessLoop),
}

impl Binding {
    fn clip(&self) -> &Arc<ResolvedClip> {
        match self {
            Binding::Single(action) => action.clip(),
            Binding::Seamless(pair) => pair.lead().clip(),
        }
    }

    fn time(&self) -> f32 {
        match self {
            Binding::Single(action) => action.time(),
            Binding::Seamless(pair) => pair.lead().time(),
        }
    }

    fn remaining(&self) -> f32 {
        match self {
            Binding::Single(action) => action.remaining(),
            Binding::Seamless(pair) => pair.lead().remaining(),
        }
    }

    fn envelope_weight(&self) -> f32 {
        match self {
            Binding::Single(action) => action.weight(),
            Binding::Seamless(pair) => pair.envelope.weight(),
        }
    }

    fn advance(&mut self, dt: f32) {
        match self {
            Binding::Single(action) => action.advance(dt),
            Binding::Seamless(pair) => pair.advance(dt),
        }
    }

    fn begin_departure(&mut self, fade: f32) {
        match self {
            Binding::Single(action) => {
                action.set_mode(LoopMode::Once);
                action.envelope_mut().fade_to(0.0, fade);
            }
            Binding::Seamless(pair) => {
                pair.splicing = false;
                pair.envelope.fade_to(0.0, fade);
            }
        }
    }

    fn visit(&self, scale: f32, visit: &mut impl FnMut(&ClipAction, f32)) {
        match self {
            Binding::Single(action) => visit(action, action.weight() * scale),
            Binding::Seamless(pair) => {
                let outer = pair.envelope.weight() * scale;
                for cursor in &pair.cursors {
                    visit(cursor, cursor.weight() * outer);
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
struct ActiveBinding {
    binding: Binding,
    completed: bool,
    repeat_fired: bool,
}

impl ActiveBinding {
    fn new(binding: Binding) -> Self {
        Self { binding, completed: false, repeat_fired: false }
    }
}

#[derive(Clone, Debug)]
struct Departing {
    binding: Binding,
    remaining: f32,
}

/// Playback slot for one body region.
#[derive(Clone, Debug)]
pub struct Channel {
    kind: BodyRegion,
    active: Option<ActiveBinding>,
    departing: Vec<Departing>,
}

impl Channel {
    pub(crate) fn new(kind: BodyRegion) -> Self {
        Self { kind, active: None, departing: Vec::new() }
    }

    pub fn kind(&self) -> BodyRegion {
        self.kind
    }

    pub fn active_clip(&self) -> Option<&Arc<ResolvedClip>> {
        self.active.as_ref().map(|active| active.binding.clip())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_seamless(&self) -> bool {
        matches!(self.active.as_ref().map(|active| &active.binding), Some(Binding::Seamless(_)))
    }

    pub fn time(&self) -> Option<f32> {
        self.active.as_ref().map(|active| active.binding.time())
    }

    pub fn envelope_weight(&self) -> f32 {
        self.active.as_ref().map(|active| active.binding.envelope_weight()).unwrap_or(0.0)
    }

    pub fn departing_len(&self) -> usize {
        self.departing.len()
    }

    pub fn cursors(&self, scale: f32) -> SmallVec<[CursorSnapshot; 2]> {
        let mut out = SmallVec::new();
        let Some(active) = self.active.as_ref() else {
            return out;
        };
        match &active.binding {
            Binding::Single(action) => {
                out.push(CursorSnapshot { slot: 0, time: action.time(), weight: action.weight() * scale, active: true })
            }
            Binding::Seamless(pair) => {
                let outer = pair.envelope.weight() * scale;
                for (slot, cursor) in pair.cursors.iter().enumerate() {
                    out.push(CursorSnapshot {
                        slot,
                        time: cursor.time(),
                        weight: cursor.weight() * outer,
                        active: slot == pair.active,
                    });
                }
            }
        }
        out
    }

    /// Force-stops everything on the channel. Returns whether anything was bound.
    pub(crate) fn clear(&mut self) -> bool {
        let had_content = self.active.is_some() || !self.departing.is_empty();
        self.active = None;
        self.departing.clear();
        had_content
    }

    pub(crate) fn play(&mut self, clip: Arc<ResolvedClip>, looping: bool, fade: f32, start_offset: f32) {
        let fresh_start = if clip.duration() > start_offset { start_offset } else { 0.0 };

        if let Some(current) = self.active.as_mut() {
            if current.binding.clip().id == clip.id {
                current.completed = false;
                current.repeat_fired = false;
                if !looping {
                    current.binding = Binding::Single(ClipAction::new(clip, LoopMode::Once, fresh_start));
                    return;
                }
                let phase = current.binding.time();
                if matches!(current.binding, Binding::Single(_)) && clip.is_seamless() {
                    current.binding = Binding::Seamless(SeamlessLoop::new(clip, fade, phase));
                } else if let Binding::Single(action) = &mut current.binding {
                    action.set_mode(LoopMode::Repeat);
                }
                return;
            }
        }

        let previous = self.active.take();
        let mut binding = if looping && clip.is_seamless() {
            let mut pair = SeamlessLoop::new(clip, fade, 0.0);
            pair.envelope.fade_in(fade);
            Binding::Seamless(pair)
        } else {
            let start = match (&previous, looping) {
                (Some(old), true) => normalized_phase(old.binding.time(), old.binding.clip().duration(), clip.duration())
                    .unwrap_or(fresh_start),
                _ => fresh_start,
            };
            let mode = if looping { LoopMode::Repeat } else { LoopMode::Once };
            let mut action = ClipAction::new(clip, mode, start);
            action.envelope_mut().fade_in(fade);
            Binding::Single(action)
        };
        if let Some(old) = previous {
            self.depart(old.binding, fade);
        }
        if let Binding::Seamless(pair) = &mut binding {
            pair.splice_if_due();
        }
        self.active = Some(ActiveBinding::new(binding));
    }

    /// Fades the active binding out without a replacement.
    pub(crate) fn release(&mut self, fade: f32) -> bool {
        let Some(current) = self.active.take() else {
            return false;
        };
        self.depart(current.binding, fade);
        true
    }

    fn depart(&mut self, mut binding: Binding, fade: f32) {
        if fade <= 0.0 {
            return;
        }
        binding.begin_departure(fade);
        self.departing.push(Departing { binding, remaining: fade });
    }

    pub(crate) fn tick(&mut self, dt: f32, config: &PlaybackConfig, events: &mut SmallVec<[PlayerEvent; 4]>) {
        for departing in &mut self.departing {
            departing.binding.advance(dt);
            departing.remaining -= dt;
        }
        self.departing.retain(|departing| departing.remaining > 0.0);

        let Some(current) = self.active.as_mut() else {
            return;
        };
        current.binding.advance(dt);

        let weight = current.binding.envelope_weight();
        let clip = current.binding.clip();
        let duration = clip.duration();
        let mut release = false;
        match &current.binding {
            Binding::Single(action) if action.mode() == LoopMode::Once => {
                if !current.completed && action.reached_end() && weight > config.completion_weight {
                    current.completed = true;
                    events.push(PlayerEvent::Completed { clip: Arc::clone(&clip.id), channel: self.kind });
                    release = !config.freeze_on_finish;
                }
            }
            binding => {
                let threshold = match binding {
                    Binding::Seamless(pair) => config.repeat_window(duration).max(pair.window),
                    Binding::Single(_) => config.repeat_window(duration),
                };
                let remaining = binding.remaining();
                if !current.repeat_fired && weight > config.repeat_weight && remaining > 0.0 && remaining <= threshold {
                    current.repeat_fired = true;
                    events.push(PlayerEvent::AboutToRepeat { clip: Arc::clone(&clip.id), channel: self.kind });
                }
            }
        }

        if let Binding::Seamless(pair) = &mut current.binding {
            pair.splice_if_due();
        }
        if release {
            self.active = None;
            events.push(PlayerEvent::Cleared { channel: self.kind });
        }
    }

    pub(crate) fn visit_cursors(&self, scale: f32, visit: &mut impl FnMut(&ClipAction, f32)) {
        for departing in &self.departing {
            departing.binding.visit(scale, visit);
        }
        if let Some(active) = self.active.as_ref() {
            active.binding.visit(scale, visit);
        }
    }
}
