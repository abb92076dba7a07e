//! Per-avatar orchestration on top of the loader, selectors and player.
//!
//! The director plays the greeting once the avatar is attached, then keeps an
//! idle clip running: a finished one-shot hands over to the next idle, and an
//! idle loop about to repeat is swapped for a different idle so the avatar
//! never visibly cycles the same motion.

use crate::blink::BlinkScheduler;
use crate::config::AvatarConfig;
use crate::expression::{Emotion, ExpressionBlender};
use crate::lipsync::{FaceWeights, LipsyncInput, VisemeSynthesizer};
use crate::loader::{ClipLoader, PreloadReport};
use crate::player::{AnimationPlayer, PlayOptions, PlayerEvent, PlayerEvents, Pose};
use crate::registry::AnimationCategory;
use crate::rig::{AvatarSkeleton, BodyRegion};
use crate::selector::ClipSelector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DirectorNotice {
    ReadyToTalk,
    AnimationEnded { clip: Arc<str> },
    LoopAboutToRepeat { clip: Arc<str> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorPhase {
    Detached,
    Greeting,
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct FrameOutput {
    pub events: PlayerEvents,
    pub face: FaceWeights,
    pub expressions: Vec<(Emotion, f32)>,
    pub pose: Pose,
    pub notices: Vec<DirectorNotice>,
}

pub struct AvatarDirector {
    config: AvatarConfig,
    loader: Arc<ClipLoader>,
    idle: ClipSelector,
    talking: ClipSelector,
    player: AnimationPlayer,
    lipsync: VisemeSynthesizer,
    blink: BlinkScheduler,
    expression: ExpressionBlender,
    phase: DirectorPhase,
    categories: [Option<AnimationCategory>; 3],
    notices: Vec<DirectorNotice>,
}

impl AvatarDirector {
    pub fn new(config: AvatarConfig, loader: Arc<ClipLoader>) -> Self {
        Self::build(config, loader, [StdRng::from_entropy(), StdRng::from_entropy(), StdRng::from_entropy()])
    }

    /// Deterministic clip rotation and blinking for replays and tests.
    pub fn with_seed(config: AvatarConfig, loader: Arc<ClipLoader>, seed: u64) -> Self {
        let rngs = [0, 1, 2].map(|offset| StdRng::seed_from_u64(seed.wrapping_add(offset)));
        Self::build(config, loader, rngs)
    }

    fn build(config: AvatarConfig, loader: Arc<ClipLoader>, rngs: [StdRng; 3]) -> Self {
        let [idle_rng, talking_rng, blink_rng] = rngs;
        let registry = Arc::clone(loader.registry());
        Self {
            idle: ClipSelector::with_rng(Arc::clone(&registry), AnimationCategory::Idle, idle_rng),
            talking: ClipSelector::with_rng(registry, AnimationCategory::Talking, talking_rng),
            player: AnimationPlayer::new(config.playback.clone()),
            lipsync: VisemeSynthesizer::new(config.lipsync.clone()),
            blink: BlinkScheduler::with_rng(config.blink.clone(), blink_rng),
            expression: ExpressionBlender::new(),
            phase: DirectorPhase::Detached,
            categories: [None; 3],
            notices: Vec::new(),
            loader,
            config,
        }
    }

    pub fn phase(&self) -> DirectorPhase {
        self.phase
    }

    pub fn player(&self) -> &AnimationPlayer {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut AnimationPlayer {
        &mut self.player
    }

    pub fn loader(&self) -> &Arc<ClipLoader> {
        &self.loader
    }

    pub fn idle_selector(&self) -> &ClipSelector {
        &self.idle
    }

    pub fn channel_category(&self, channel: BodyRegion) -> Option<AnimationCategory> {
        self.categories[channel.index()]
    }

    /// Attaches the avatar, preloads, and starts the greeting (or idle when
    /// there is no greeting clip).
    pub async fn start(&mut self, skeleton: Arc<dyn AvatarSkeleton>) -> PreloadReport {
        self.loader.attach_skeleton(Arc::clone(&skeleton));
        self.player.bind_skeleton(skeleton);
        let report = self.loader.preload().await;

        let greeting_id = self.config.director.greeting_id.clone();
        let greeting = self.loader.resolve(&greeting_id).await;
        let greeting_category = greeting.as_ref().map(|clip| clip.meta.category);
        if self.player.play(greeting, PlayOptions::once()) {
            info!(clip = %greeting_id, "Playing greeting");
            self.phase = DirectorPhase::Greeting;
            self.categories[BodyRegion::Full.index()] = greeting_category;
        } else {
            debug!("No greeting clip; starting idle directly");
            self.phase = DirectorPhase::Idle;
            self.enter_first_idle().await;
        }
        report
    }

    async fn enter_first_idle(&mut self) {
        let id = self.idle.initial(BodyRegion::Full).unwrap_or_else(|| self.config.loader.fallback_idle.clone());
        if self.play_by_id(&id, Some(true), None).await {
            self.notices.push(DirectorNotice::ReadyToTalk);
        }
    }

    /// Resolves and plays `id`, falling back to the configured idle when the
    /// clip cannot be resolved. Looping defaults to "is an idle clip".
    pub async fn play_by_id(&mut self, id: &str, looping: Option<bool>, fade: Option<f32>) -> bool {
        let mut clip = self.loader.resolve(id).await;
        let fallback = self.config.loader.fallback_idle.clone();
        if clip.is_none() && id != fallback {
            warn!(clip = id, fallback = %fallback, "Animation failed to load; falling back");
            clip = self.loader.resolve(&fallback).await;
        }
        let Some(clip) = clip else {
            return false;
        };
        let category = clip.meta.category;
        let region = clip.region();
        let looping = looping.unwrap_or(category == AnimationCategory::Idle);
        let options = PlayOptions { looping, fade, channel: None };
        if !self.player.play(Some(Arc::clone(&clip)), options) {
            return false;
        }
        if region == BodyRegion::Full {
            self.categories = [None; 3];
        }
        self.categories[region.index()] = Some(category);
        match category {
            AnimationCategory::Idle => self.idle.set_current(region, clip.id.as_ref()),
            AnimationCategory::Talking => self.talking.set_current(region, clip.id.as_ref()),
            AnimationCategory::Gesture | AnimationCategory::Emotion => {}
        }
        true
    }

    pub async fn start_talking(&mut self) -> bool {
        let Some(id) = self.talking.next(BodyRegion::Full) else {
            return false;
        };
        self.play_by_id(&id, Some(true), None).await
    }

    pub async fn stop_talking(&mut self) -> bool {
        self.expression.set_emotion(Emotion::Neutral, 1.0);
        let id = self
            .idle
            .next(BodyRegion::Full)
            .unwrap_or_else(|| self.config.loader.fallback_idle.clone());
        self.play_by_id(&id, Some(true), Some(self.config.director.idle_transition)).await
    }

    pub fn set_emotion(&mut self, emotion: &str, strength: f32) {
        self.expression.set_emotion(Emotion::parse(emotion), strength);
    }

    pub fn blink(&self) -> &BlinkScheduler {
        &self.blink
    }

    /// Advances playback, lip-sync, blinking and expressions. Never waits on
    /// loads. A host-supplied eye closure wins over a weaker scheduled blink.
    pub fn frame(&mut self, dt: f32, input: &LipsyncInput) -> FrameOutput {
        let events = self.player.tick(dt);
        let blink = self.blink.update(dt);
        let face_input = LipsyncInput { eye_closure: input.eye_closure.max(blink), ..*input };
        let face = self.lipsync.update(dt, &face_input);
        self.expression.step();
        FrameOutput {
            events,
            face,
            expressions: self.expression.weights().collect(),
            pose: self.player.sample_pose(),
            notices: Vec::new(),
        }
    }

    /// [`frame`](Self::frame) followed by the reactions to its events.
    pub async fn step(&mut self, dt: f32, input: &LipsyncInput) -> FrameOutput {
        let mut output = self.frame(dt, input);
        self.handle_events(&output.events).await;
        output.notices = std::mem::take(&mut self.notices);
        output
    }

    pub async fn handle_events(&mut self, events: &[PlayerEvent]) {
        for event in events {
            match event {
                PlayerEvent::Completed { clip, channel } => {
                    self.notices.push(DirectorNotice::AnimationEnded { clip: Arc::clone(clip) });
                    self.on_completed(*channel).await;
                }
                PlayerEvent::AboutToRepeat { clip, channel } => {
                    self.on_about_to_repeat(*channel).await;
                    self.notices.push(DirectorNotice::LoopAboutToRepeat { clip: Arc::clone(clip) });
                }
                PlayerEvent::Cleared { channel } => self.categories[channel.index()] = None,
                PlayerEvent::Started { .. } => {}
            }
        }
    }

    async fn on_completed(&mut self, channel: BodyRegion) {
        if channel != BodyRegion::Full {
            self.player.release_channel(channel, None);
            return;
        }
        if self.phase == DirectorPhase::Greeting {
            self.phase = DirectorPhase::Idle;
            self.enter_first_idle().await;
            return;
        }
        let id = self
            .idle
            .next(BodyRegion::Full)
            .or_else(|| self.idle.initial(BodyRegion::Full))
            .unwrap_or_else(|| self.config.loader.fallback_idle.clone());
        let fade = self.config.director.idle_transition;
        self.play_by_id(&id, Some(true), Some(fade)).await;
    }

    async fn on_about_to_repeat(&mut self, channel: BodyRegion) {
        if self.categories[channel.index()] != Some(AnimationCategory::Idle) {
            return;
        }
        let Some(id) = self.idle.next(channel) else {
            return;
        };
        // A lone candidate keeps looping in place.
        if self.player.active_clip_id(channel) == Some(id.as_str()) {
            return;
        }
        let fade = self.config.director.idle_rotation_transition;
        if let Some(clip) = self.loader.resolve(&id).await {
            let options = PlayOptions::looping().with_fade(fade).on_channel(channel);
            if self.player.play(Some(clip), options) {
                debug!(clip = %id, %channel, "Rotated idle");
            }
        }
    }
}
