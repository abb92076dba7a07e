//! Volume-driven mouth shapes.
//!
//! Amplitude is compressed, run through a one-pole attack/release follower and
//! held open briefly after each transient so the mouth does not snap shut
//! inside a vowel. Shape variation comes from upstream viseme ids when present
//! and from a fixed palette cycle otherwise; shape changes are crossfaded.

use crate::config::LipsyncConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Viseme {
    Aa,
    Ih,
    Ou,
    Ee,
    Oh,
}

impl Viseme {
    /// Also the cycling order used without upstream viseme ids.
    pub const ALL: [Viseme; 5] = [Viseme::Aa, Viseme::Ih, Viseme::Ou, Viseme::Ee, Viseme::Oh];

    pub fn index(self) -> usize {
        match self {
            Viseme::Aa => 0,
            Viseme::Ih => 1,
            Viseme::Ou => 2,
            Viseme::Ee => 3,
            Viseme::Oh => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Viseme::Aa => "aa",
            Viseme::Ih => "ih",
            Viseme::Ou => "ou",
            Viseme::Ee => "ee",
            Viseme::Oh => "oh",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aa" | "a" => Some(Viseme::Aa),
            "ih" | "i" => Some(Viseme::Ih),
            "ou" | "u" => Some(Viseme::Ou),
            "ee" | "e" => Some(Viseme::Ee),
            "oh" | "o" => Some(Viseme::Oh),
            _ => None,
        }
    }
}

/// Per-frame input from upstream audio analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LipsyncInput {
    pub volume: f32,
    pub audio_active: bool,
    pub viseme: Option<Viseme>,
    /// 0 = open eyes, 1 = closed.
    pub eye_closure: f32,
    /// Direct puckered-lips weight; replaces the synthesized `ou` shape.
    pub kiss: Option<f32>,
    /// Direct closed-lips weight; replaces the synthesized `ih` shape.
    pub lips_closed: Option<f32>,
    /// Direct jaw-open weight; replaces the synthesized `aa` shape.
    pub jaw: Option<f32>,
}

impl LipsyncInput {
    pub fn speaking(volume: f32) -> Self {
        Self { volume, audio_active: true, ..Self::default() }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_viseme(mut self, viseme: Viseme) -> Self {
        self.viseme = Some(viseme);
        self
    }

    pub fn with_eye_closure(mut self, closure: f32) -> Self {
        self.eye_closure = closure;
        self
    }

    pub fn with_kiss(mut self, weight: f32) -> Self {
        self.kiss = Some(weight);
        self
    }

    pub fn with_lips_closed(mut self, weight: f32) -> Self {
        self.lips_closed = Some(weight);
        self
    }

    pub fn with_jaw(mut self, weight: f32) -> Self {
        self.jaw = Some(weight);
        self
    }

    fn overrides(&self) -> impl Iterator<Item = (Viseme, f32)> {
        [(Viseme::Ou, self.kiss), (Viseme::Ih, self.lips_closed), (Viseme::Aa, self.jaw)]
            .into_iter()
            .filter_map(|(viseme, weight)| weight.map(|weight| (viseme, weight.clamp(0.0, 1.0))))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FaceWeights {
    pub open: f32,
    pub visemes: [f32; 5],
    pub blink: f32,
}

impl FaceWeights {
    pub fn viseme(&self, viseme: Viseme) -> f32 {
        self.visemes[viseme.index()]
    }

    pub fn mouth_weights(&self) -> impl Iterator<Item = f32> + '_ {
        std::iter::once(self.open).chain(self.visemes.iter().copied())
    }

    pub fn is_mouth_closed(&self) -> bool {
        self.mouth_weights().all(|weight| weight == 0.0)
    }
}

/// A shape change in flight. `from_shares` is what was on screen when the
/// change started, as fractions of the mouth opening, so an interrupted fade
/// continues from where it was rather than from a fully formed shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisemeCrossfade {
    pub from: Option<Viseme>,
    pub to: Viseme,
    pub from_shares: [f32; 5],
    pub start: f32,
    pub duration: f32,
}

impl VisemeCrossfade {
    fn progress(&self, now: f32) -> f32 {
        if self.duration <= 0.0 {
            1.0
        } else {
            ((now - self.start) / self.duration).clamp(0.0, 1.0)
        }
    }

    fn shares(&self, now: f32, baseline: f32) -> [f32; 5] {
        let progress = self.progress(now);
        let target = target_shares(self.to, baseline);
        let mut shares = [0.0; 5];
        for (index, share) in shares.iter_mut().enumerate() {
            *share = self.from_shares[index] + (target[index] - self.from_shares[index]) * progress;
        }
        shares
    }
}

fn target_shares(viseme: Viseme, baseline: f32) -> [f32; 5] {
    let mut shares = [baseline; 5];
    shares[viseme.index()] = 1.0;
    shares
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvelopeState {
    pub envelope: f32,
    pub sustain_until: f32,
    pub viseme: Option<Viseme>,
    pub crossfade: Option<VisemeCrossfade>,
}

#[derive(Debug, Clone)]
pub struct VisemeSynthesizer {
    config: LipsyncConfig,
    now: f32,
    state: EnvelopeState,
    last_active: Option<f32>,
    palette_cursor: usize,
    last_switch: f32,
    speaking: bool,
    weights: FaceWeights,
}

impl Default for VisemeSynthesizer {
    fn default() -> Self {
        Self::new(LipsyncConfig::default())
    }
}

impl VisemeSynthesizer {
    pub fn new(config: LipsyncConfig) -> Self {
        Self {
            config,
            now: 0.0,
            state: EnvelopeState::default(),
            last_active: None,
            palette_cursor: 0,
            last_switch: 0.0,
            speaking: false,
            weights: FaceWeights::default(),
        }
    }

    pub fn state(&self) -> &EnvelopeState {
        &self.state
    }

    pub fn weights(&self) -> &FaceWeights {
        &self.weights
    }

    pub fn now(&self) -> f32 {
        self.now
    }

    /// Audio was active within the grace window.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Advances one frame. The returned weights carry any direct mouth
    /// overrides from `input`; [`weights`](Self::weights) stays the synthesized
    /// result so crossfades and decay never start from an overridden shape.
    pub fn update(&mut self, dt: f32, input: &LipsyncInput) -> FaceWeights {
        if dt.is_finite() && dt > 0.0 {
            self.now += dt;
        }
        let cfg = &self.config;
        if input.audio_active || input.volume > cfg.activity_epsilon {
            self.last_active = Some(self.now);
        }
        self.speaking = self.last_active.is_some_and(|at| self.now - at < cfg.grace_window);
        self.weights.blink = input.eye_closure.clamp(0.0, 1.0);

        if self.speaking {
            self.drive(input);
        } else {
            self.decay();
        }
        let mut output = self.weights;
        for (viseme, weight) in input.overrides() {
            output.visemes[viseme.index()] = weight;
        }
        output
    }

    fn drive(&mut self, input: &LipsyncInput) {
        let cfg = &self.config;
        let now = self.now;
        let normalized = (input.volume.max(0.0) * cfg.input_gain).min(1.0).powf(cfg.compression);
        let coefficient = if normalized > self.state.envelope { cfg.attack } else { cfg.release };
        self.state.envelope += (normalized - self.state.envelope) * coefficient;

        if self.state.envelope > cfg.open_threshold {
            self.state.sustain_until = now + cfg.sustain_hold;
        }
        let held = if now < self.state.sustain_until {
            self.state.envelope.max(cfg.sustain_floor)
        } else {
            self.state.envelope
        };
        let open = held.clamp(0.0, 1.0).powf(cfg.open_curve);

        let target = match input.viseme {
            Some(viseme) => Some(viseme),
            None if open > cfg.open_threshold => {
                if self.state.viseme.is_none() || now - self.last_switch >= cfg.viseme_dwell {
                    let next = Viseme::ALL[self.palette_cursor % Viseme::ALL.len()];
                    self.palette_cursor = (self.palette_cursor + 1) % Viseme::ALL.len();
                    self.last_switch = now;
                    Some(next)
                } else {
                    self.state.viseme
                }
            }
            None => self.state.viseme,
        };

        if let Some(to) = target {
            if self.state.viseme != Some(to) {
                self.state.crossfade = Some(VisemeCrossfade {
                    from: self.state.viseme,
                    to,
                    from_shares: self.rendered_shares(),
                    start: now,
                    duration: cfg.viseme_crossfade,
                });
                self.state.viseme = Some(to);
            }
        }

        let baseline = cfg.baseline * open;
        let mut shapes = [baseline; 5];
        if let Some(to) = self.state.viseme {
            let crossfade = self.state.crossfade;
            let shares = match crossfade {
                Some(fade) if fade.progress(now) < 1.0 => fade.shares(now, cfg.baseline),
                _ => {
                    self.state.crossfade = None;
                    target_shares(to, cfg.baseline)
                }
            };
            for (shape, share) in shapes.iter_mut().zip(shares) {
                *shape = (open * share).max(baseline);
            }
        }
        self.weights.open = open;
        self.weights.visemes = shapes;
    }

    /// Shapes of the last frame relative to its opening.
    fn rendered_shares(&self) -> [f32; 5] {
        let open = self.weights.open;
        if open <= f32::EPSILON {
            return [self.config.baseline; 5];
        }
        self.weights.visemes.map(|weight| (weight / open).clamp(0.0, 1.0))
    }

    fn decay(&mut self) {
        let cfg = &self.config;
        let fade = |weight: f32| {
            let next = weight * cfg.silence_decay;
            if next < cfg.snap_to_zero {
                0.0
            } else {
                next
            }
        };
        self.weights.open = fade(self.weights.open);
        for weight in &mut self.weights.visemes {
            *weight = fade(*weight);
        }
        self.state = EnvelopeState::default();
        self.palette_cursor = 0;
        self.last_switch = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viseme_names_accept_short_forms() {
        assert_eq!(Viseme::from_name("AA"), Some(Viseme::Aa));
        assert_eq!(Viseme::from_name("o"), Some(Viseme::Oh));
        assert_eq!(Viseme::from_name("sil"), None);
    }

    #[test]
    fn blink_is_clamped_and_unsmoothed() {
        let mut synth = VisemeSynthesizer::default();
        let weights = synth.update(0.016, &LipsyncInput::silent().with_eye_closure(1.7));
        assert_eq!(weights.blink, 1.0);
        let weights = synth.update(0.016, &LipsyncInput::silent().with_eye_closure(0.3));
        assert_eq!(weights.blink, 0.3);
    }

    #[test]
    fn direct_mouth_values_replace_synthesized_shapes() {
        let mut synth = VisemeSynthesizer::default();
        let speaking = LipsyncInput::speaking(0.5).with_viseme(Viseme::Aa);
        for _ in 0..20 {
            synth.update(0.016, &speaking);
        }
        let weights = synth.update(0.016, &speaking.with_jaw(0.25).with_kiss(1.4).with_lips_closed(0.0));
        assert_eq!(weights.viseme(Viseme::Aa), 0.25);
        assert_eq!(weights.viseme(Viseme::Ou), 1.0);
        assert_eq!(weights.viseme(Viseme::Ih), 0.0);
        assert_eq!(weights.viseme(Viseme::Ee), synth.weights().viseme(Viseme::Ee));
        assert!(synth.weights().viseme(Viseme::Aa) > 0.25, "synthesized state is untouched");

        let weights = synth.update(0.016, &LipsyncInput::silent().with_jaw(0.6));
        assert_eq!(weights.viseme(Viseme::Aa), 0.6);
    }
}
