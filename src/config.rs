use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Frame rate used to convert registry trim frames into seconds.
    #[serde(default = "LoaderConfig::default_frame_rate")]
    pub frame_rate: f32,
    #[serde(default = "LoaderConfig::default_fallback_idle")]
    pub fallback_idle: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "PlaybackConfig::default_transition_duration")]
    pub transition_duration: f32,
    #[serde(default = "PlaybackConfig::default_lower_body_weight_cap")]
    pub lower_body_weight_cap: f32,
    #[serde(default = "PlaybackConfig::default_repeat_threshold")]
    pub repeat_threshold: f32,
    #[serde(default = "PlaybackConfig::default_repeat_fraction")]
    pub repeat_fraction: f32,
    #[serde(default = "PlaybackConfig::default_repeat_floor")]
    pub repeat_floor: f32,
    #[serde(default = "PlaybackConfig::default_freeze_on_finish")]
    pub freeze_on_finish: bool,
    #[serde(default = "PlaybackConfig::default_completion_weight")]
    pub completion_weight: f32,
    #[serde(default = "PlaybackConfig::default_repeat_weight")]
    pub repeat_weight: f32,
    /// Fresh (non phase-synced) starts skip this much of the clip; Mixamo
    /// exports carry a T-pose on frame zero.
    #[serde(default = "PlaybackConfig::default_initial_frame_offset")]
    pub initial_frame_offset: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LipsyncConfig {
    #[serde(default = "LipsyncConfig::default_attack")]
    pub attack: f32,
    #[serde(default = "LipsyncConfig::default_release")]
    pub release: f32,
    #[serde(default = "LipsyncConfig::default_input_gain")]
    pub input_gain: f32,
    #[serde(default = "LipsyncConfig::default_compression")]
    pub compression: f32,
    #[serde(default = "LipsyncConfig::default_open_threshold")]
    pub open_threshold: f32,
    #[serde(default = "LipsyncConfig::default_sustain_hold")]
    pub sustain_hold: f32,
    #[serde(default = "LipsyncConfig::default_sustain_floor")]
    pub sustain_floor: f32,
    #[serde(default = "LipsyncConfig::default_open_curve")]
    pub open_curve: f32,
    #[serde(default = "LipsyncConfig::default_viseme_dwell")]
    pub viseme_dwell: f32,
    #[serde(default = "LipsyncConfig::default_viseme_crossfade")]
    pub viseme_crossfade: f32,
    #[serde(default = "LipsyncConfig::default_baseline")]
    pub baseline: f32,
    #[serde(default = "LipsyncConfig::default_grace_window")]
    pub grace_window: f32,
    #[serde(default = "LipsyncConfig::default_silence_decay")]
    pub silence_decay: f32,
    #[serde(default = "LipsyncConfig::default_activity_epsilon")]
    pub activity_epsilon: f32,
    #[serde(default = "LipsyncConfig::default_snap_to_zero")]
    pub snap_to_zero: f32,
}

/// Idle eye blinks: a random closure held briefly, repeated at random intervals.
#[derive(Debug, Clone, Deserialize)]
pub struct BlinkConfig {
    #[serde(default = "BlinkConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "BlinkConfig::default_min_interval")]
    pub min_interval: f32,
    #[serde(default = "BlinkConfig::default_max_interval")]
    pub max_interval: f32,
    #[serde(default = "BlinkConfig::default_min_strength")]
    pub min_strength: f32,
    #[serde(default = "BlinkConfig::default_max_strength")]
    pub max_strength: f32,
    #[serde(default = "BlinkConfig::default_hold")]
    pub hold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorConfig {
    #[serde(default = "DirectorConfig::default_idle_transition")]
    pub idle_transition: f32,
    #[serde(default = "DirectorConfig::default_idle_rotation_transition")]
    pub idle_rotation_transition: f32,
    #[serde(default = "DirectorConfig::default_greeting_id")]
    pub greeting_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AvatarConfig {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub lipsync: LipsyncConfig,
    #[serde(default)]
    pub blink: BlinkConfig,
    #[serde(default)]
    pub director: DirectorConfig,
}

impl LoaderConfig {
    const fn default_frame_rate() -> f32 {
        30.0
    }

    fn default_fallback_idle() -> String {
        "standingIdle".to_string()
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { frame_rate: Self::default_frame_rate(), fallback_idle: Self::default_fallback_idle() }
    }
}

impl PlaybackConfig {
    const fn default_transition_duration() -> f32 {
        0.5
    }

    const fn default_lower_body_weight_cap() -> f32 {
        0.5
    }

    const fn default_repeat_threshold() -> f32 {
        2.0
    }

    const fn default_repeat_fraction() -> f32 {
        0.2
    }

    const fn default_repeat_floor() -> f32 {
        0.1
    }

    const fn default_freeze_on_finish() -> bool {
        true
    }

    const fn default_completion_weight() -> f32 {
        0.5
    }

    const fn default_repeat_weight() -> f32 {
        0.9
    }

    fn default_initial_frame_offset() -> f32 {
        1.0 / 30.0
    }

    /// Remaining-time threshold below which a loop reports it is about to repeat.
    pub fn repeat_window(&self, clip_duration: f32) -> f32 {
        self.repeat_threshold.min(clip_duration * self.repeat_fraction).max(self.repeat_floor)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            transition_duration: Self::default_transition_duration(),
            lower_body_weight_cap: Self::default_lower_body_weight_cap(),
            repeat_threshold: Self::default_repeat_threshold(),
            repeat_fraction: Self::default_repeat_fraction(),
            repeat_floor: Self::default_repeat_floor(),
            freeze_on_finish: Self::default_freeze_on_finish(),
            completion_weight: Self::default_completion_weight(),
            repeat_weight: Self::default_repeat_weight(),
            initial_frame_offset: Self::default_initial_frame_offset(),
        }
    }
}

impl LipsyncConfig {
    const fn default_attack() -> f32 {
        0.55
    }

    const fn default_release() -> f32 {
        0.12
    }

    const fn default_input_gain() -> f32 {
        3.0
    }

    const fn default_compression() -> f32 {
        0.6
    }

    const fn default_open_threshold() -> f32 {
        0.06
    }

    const fn default_sustain_hold() -> f32 {
        0.12
    }

    const fn default_sustain_floor() -> f32 {
        0.2
    }

    const fn default_open_curve() -> f32 {
        0.8
    }

    const fn default_viseme_dwell() -> f32 {
        0.09
    }

    const fn default_viseme_crossfade() -> f32 {
        0.08
    }

    const fn default_baseline() -> f32 {
        0.05
    }

    const fn default_grace_window() -> f32 {
        0.2
    }

    const fn default_silence_decay() -> f32 {
        0.85
    }

    const fn default_activity_epsilon() -> f32 {
        0.002
    }

    const fn default_snap_to_zero() -> f32 {
        0.01
    }
}

impl Default for LipsyncConfig {
    fn default() -> Self {
        Self {
            attack: Self::default_attack(),
            release: Self::default_release(),
            input_gain: Self::default_input_gain(),
            compression: Self::default_compression(),
            open_threshold: Self::default_open_threshold(),
            sustain_hold: Self::default_sustain_hold(),
            sustain_floor: Self::default_sustain_floor(),
            open_curve: Self::default_open_curve(),
            viseme_dwell: Self::default_viseme_dwell(),
            viseme_crossfade: Self::default_viseme_crossfade(),
            baseline: Self::default_baseline(),
            grace_window: Self::default_grace_window(),
            silence_decay: Self::default_silence_decay(),
            activity_epsilon: Self::default_activity_epsilon(),
            snap_to_zero: Self::default_snap_to_zero(),
        }
    }
}

impl BlinkConfig {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_min_interval() -> f32 {
        2.0
    }

    const fn default_max_interval() -> f32 {
        5.0
    }

    const fn default_min_strength() -> f32 {
        0.5
    }

    const fn default_max_strength() -> f32 {
        1.0
    }

    const fn default_hold() -> f32 {
        0.15
    }
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            min_interval: Self::default_min_interval(),
            max_interval: Self::default_max_interval(),
            min_strength: Self::default_min_strength(),
            max_strength: Self::default_max_strength(),
            hold: Self::default_hold(),
        }
    }
}

impl DirectorConfig {
    const fn default_idle_transition() -> f32 {
        0.6
    }

    const fn default_idle_rotation_transition() -> f32 {
        1.5
    }

    fn default_greeting_id() -> String {
        "greeting".to_string()
    }
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            idle_transition: Self::default_idle_transition(),
            idle_rotation_transition: Self::default_idle_rotation_transition(),
            greeting_id: Self::default_greeting_id(),
        }
    }
}

impl AvatarConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let cfg: AvatarConfig =
            serde_json::from_str(r#"{ "playback": { "transition_duration": 0.25 }, "lipsync": { "attack": 0.7 } }"#)
                .expect("parse config");
        assert_eq!(cfg.playback.transition_duration, 0.25);
        assert_eq!(cfg.playback.lower_body_weight_cap, 0.5);
        assert_eq!(cfg.lipsync.attack, 0.7);
        assert_eq!(cfg.lipsync.release, 0.12);
        assert_eq!(cfg.loader.fallback_idle, "standingIdle");
        assert_eq!(cfg.director.greeting_id, "greeting");
        assert!(cfg.blink.enabled);
        assert_eq!(cfg.blink.hold, 0.15);
    }

    #[test]
    fn repeat_window_is_floored_fraction_of_short_clips() {
        let playback = PlaybackConfig::default();
        assert!((playback.repeat_window(30.0) - 2.0).abs() < 1e-6);
        assert!((playback.repeat_window(2.0) - 0.4).abs() < 1e-6);
        assert!((playback.repeat_window(0.2) - 0.1).abs() < 1e-6);
    }
}
