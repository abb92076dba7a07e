//! Three-channel clip playback with crossfades and seamless loops.
//!
//! The player owns one [`Channel`] per body region. Playing on `full` clears
//! `upper` and `lower`; the partial channels never disturb each other. All
//! cursors advance together in [`AnimationPlayer::tick`], which reports
//! completion and loop-repeat events both as its return value and through
//! registered listeners.

pub mod action;
pub mod channel;
pub mod pose;

pub use action::{ClipAction, Envelope, LoopMode};
pub use channel::{normalized_phase, Channel, CursorSnapshot};
pub use pose::Pose;

use crate::config::PlaybackConfig;
use crate::retarget::ResolvedClip;
use crate::rig::{AvatarSkeleton, BodyRegion};
use pose::PoseBlender;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Started { clip: Arc<str>, channel: BodyRegion },
    Completed { clip: Arc<str>, channel: BodyRegion },
    AboutToRepeat { clip: Arc<str>, channel: BodyRegion },
    Cleared { channel: BodyRegion },
}

impl PlayerEvent {
    pub fn channel(&self) -> BodyRegion {
        match self {
            PlayerEvent::Started { channel, .. }
            | PlayerEvent::Completed { channel, .. }
            | PlayerEvent::AboutToRepeat { channel, .. }
            | PlayerEvent::Cleared { channel } => *channel,
        }
    }
}

pub type PlayerEvents = SmallVec<[PlayerEvent; 4]>;

type Listener = Box<dyn FnMut(&PlayerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    pub looping: bool,
    /// Crossfade length; the configured transition duration when `None`.
    pub fade: Option<f32>,
    /// Target channel; the clip's body region when `None`.
    pub channel: Option<BodyRegion>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self::looping()
    }
}

impl PlayOptions {
    pub fn looping() -> Self {
        Self { looping: true, fade: None, channel: None }
    }

    pub fn once() -> Self {
        Self { looping: false, fade: None, channel: None }
    }

    pub fn with_fade(mut self, fade: f32) -> Self {
        self.fade = Some(fade);
        self
    }

    pub fn on_channel(mut self, channel: BodyRegion) -> Self {
        self.channel = Some(channel);
        self
    }
}

pub struct AnimationPlayer {
    config: PlaybackConfig,
    skeleton: Option<Arc<dyn AvatarSkeleton>>,
    channels: [Channel; 3],
    playing: bool,
    last_channel: BodyRegion,
    pending: PlayerEvents,
    listeners: Vec<Listener>,
}

impl fmt::Debug for AnimationPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationPlayer")
            .field("bound", &self.skeleton.is_some())
            .field("channels", &self.channels)
            .field("playing", &self.playing)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for AnimationPlayer {
    fn default() -> Self {
        Self::new(PlaybackConfig::default())
    }
}

impl AnimationPlayer {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            skeleton: None,
            channels: BodyRegion::ALL.map(Channel::new),
            playing: false,
            last_channel: BodyRegion::Full,
            pending: SmallVec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Binds the avatar. Rebinding keeps whatever is playing.
    pub fn bind_skeleton(&mut self, skeleton: Arc<dyn AvatarSkeleton>) {
        self.skeleton = Some(skeleton);
    }

    pub fn is_bound(&self) -> bool {
        self.skeleton.is_some()
    }

    pub fn on_completed(&mut self, mut listener: impl FnMut(&str, BodyRegion) + Send + Sync + 'static) {
        self.listeners.push(Box::new(move |event| {
            if let PlayerEvent::Completed { clip, channel } = event {
                listener(clip, *channel);
            }
        }));
    }

    pub fn on_about_to_repeat(&mut self, mut listener: impl FnMut(&str, BodyRegion) + Send + Sync + 'static) {
        self.listeners.push(Box::new(move |event| {
            if let PlayerEvent::AboutToRepeat { clip, channel } = event {
                listener(clip, *channel);
            }
        }));
    }

    /// Starts `clip` on its channel. Returns `false` (and changes nothing)
    /// without a clip or before an avatar is bound.
    pub fn play(&mut self, clip: Option<Arc<ResolvedClip>>, options: PlayOptions) -> bool {
        let Some(clip) = clip else {
            debug!("play() called without a clip; ignoring");
            return false;
        };
        if self.skeleton.is_none() {
            debug!(clip = %clip.id, "play() called before an avatar is bound; ignoring");
            return false;
        }
        let channel = options.channel.unwrap_or(clip.region());
        let fade = options.fade.unwrap_or(self.config.transition_duration).max(0.0);

        if channel == BodyRegion::Full {
            for partial in [BodyRegion::Upper, BodyRegion::Lower] {
                if self.channels[partial.index()].clear() {
                    self.pending.push(PlayerEvent::Cleared { channel: partial });
                }
            }
        }
        debug!(clip = %clip.id, %channel, looping = options.looping, fade, "Playing clip");
        let id = Arc::clone(&clip.id);
        self.channels[channel.index()].play(clip, options.looping, fade, self.config.initial_frame_offset);
        self.pending.push(PlayerEvent::Started { clip: id, channel });
        self.playing = true;
        self.last_channel = channel;
        true
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn resume(&mut self) {
        self.playing = true;
    }

    /// Stops and clears every channel.
    pub fn stop(&mut self) {
        self.playing = false;
        for channel in &mut self.channels {
            if channel.clear() {
                self.pending.push(PlayerEvent::Cleared { channel: channel.kind() });
            }
        }
    }

    /// Fades out whatever is bound on `kind`, leaving the channel empty.
    pub fn release_channel(&mut self, kind: BodyRegion, fade: Option<f32>) -> bool {
        let fade = fade.unwrap_or(self.config.transition_duration).max(0.0);
        let released = self.channels[kind.index()].release(fade);
        if released {
            self.pending.push(PlayerEvent::Cleared { channel: kind });
        }
        released
    }

    pub fn is_playing(&self) -> bool {
        self.playing && self.channels.iter().any(Channel::is_active)
    }

    pub fn is_paused(&self) -> bool {
        !self.playing && self.channels.iter().any(Channel::is_active)
    }

    /// Cursor time on the most recently played channel.
    pub fn current_time(&self) -> f32 {
        self.channel_time(self.last_channel).unwrap_or(0.0)
    }

    pub fn channel(&self, kind: BodyRegion) -> &Channel {
        &self.channels[kind.index()]
    }

    pub fn channel_time(&self, kind: BodyRegion) -> Option<f32> {
        self.channel(kind).time()
    }

    pub fn active_clip(&self, kind: BodyRegion) -> Option<&Arc<ResolvedClip>> {
        self.channel(kind).active_clip()
    }

    pub fn active_clip_id(&self, kind: BodyRegion) -> Option<&str> {
        self.active_clip(kind).map(|clip| clip.id.as_ref())
    }

    fn weight_cap(&self, kind: BodyRegion) -> f32 {
        match kind {
            BodyRegion::Lower => self.config.lower_body_weight_cap,
            BodyRegion::Full | BodyRegion::Upper => 1.0,
        }
    }

    /// Effective weight of the channel's active binding, cap included.
    pub fn channel_weight(&self, kind: BodyRegion) -> f32 {
        self.channel(kind).envelope_weight().min(self.weight_cap(kind))
    }

    pub fn cursors(&self, kind: BodyRegion) -> SmallVec<[CursorSnapshot; 2]> {
        let cap = self.weight_cap(kind);
        let mut cursors = self.channel(kind).cursors(1.0);
        for cursor in &mut cursors {
            cursor.weight = cursor.weight.min(cap);
        }
        cursors
    }

    /// Advances every channel by `dt` seconds and returns what happened,
    /// including transitions queued by `play`/`stop` since the last tick.
    pub fn tick(&mut self, dt: f32) -> PlayerEvents {
        let mut events = std::mem::take(&mut self.pending);
        if self.playing && dt.is_finite() && dt > 0.0 {
            for channel in &mut self.channels {
                channel.tick(dt, &self.config, &mut events);
            }
        }
        for event in &events {
            for listener in &mut self.listeners {
                listener(event);
            }
        }
        events
    }

    /// Blends every bound cursor into one pose, filling missing influence
    /// from the avatar's rest pose.
    pub fn sample_pose(&self) -> Pose {
        let mut blender = PoseBlender::default();
        for channel in &self.channels {
            let cap = self.weight_cap(channel.kind());
            channel.visit_cursors(1.0, &mut |action, weight| blender.add_action(action, weight.min(cap)));
        }
        blender.finish(self.skeleton.as_deref())
    }
}
