use crate::blink::BlinkScheduler;
use crate::events::{AvatarEvent, EventBus};
use crate::lipsync::{FaceWeights, LipsyncInput, VisemeSynthesizer};
use crate::player::{AnimationPlayer, PlayerEvent, Pose};
use crate::time::FrameClock;
use bevy_ecs::prelude::*;

// ---------- Resources ----------
#[derive(Resource, Clone, Copy, Default)]
pub struct TimeDelta(pub f32);

// ---------- Components ----------
#[derive(Component)]
pub struct AvatarAnimator {
    pub player: AnimationPlayer,
    /// Pose sampled after the last playback step.
    pub pose: Pose,
}

impl AvatarAnimator {
    pub fn new(player: AnimationPlayer) -> Self {
        Self { player, pose: Pose::default() }
    }
}

/// Latest analysis of the avatar's outgoing audio, written by the host.
#[derive(Component, Clone, Copy, Default)]
pub struct AudioFeed(pub LipsyncInput);

#[derive(Component)]
pub struct FaceDriver {
    pub synth: VisemeSynthesizer,
    pub blink: BlinkScheduler,
    pub weights: FaceWeights,
    was_speaking: bool,
}

impl FaceDriver {
    pub fn new(synth: VisemeSynthesizer) -> Self {
        Self::with_blink(synth, BlinkScheduler::default())
    }

    pub fn with_blink(synth: VisemeSynthesizer, blink: BlinkScheduler) -> Self {
        Self { synth, blink, weights: FaceWeights::default(), was_speaking: false }
    }
}

// ---------- World container ----------
pub struct AvatarWorld {
    pub world: World,
    schedule: Schedule,
    clock: FrameClock,
}

impl Default for AvatarWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl AvatarWorld {
    pub fn new() -> Self {
        let mut world = World::new();
        world.insert_resource(TimeDelta(0.0));
        world.insert_resource(EventBus::default());

        let mut schedule = Schedule::default();
        schedule.add_systems((sys_drive_avatar_playback, sys_drive_lipsync).chain());

        Self { world, schedule, clock: FrameClock::new() }
    }

    pub fn spawn_avatar(&mut self, player: AnimationPlayer, synth: VisemeSynthesizer) -> Entity {
        self.spawn_avatar_with_face(player, FaceDriver::new(synth))
    }

    pub fn spawn_avatar_with_face(&mut self, player: AnimationPlayer, face: FaceDriver) -> Entity {
        self.world.spawn((AvatarAnimator::new(player), AudioFeed::default(), face)).id()
    }

    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.world.despawn(entity)
    }

    /// Runs one frame with an explicit delta.
    pub fn update(&mut self, dt: f32) {
        self.world.resource_mut::<TimeDelta>().0 = dt;
        self.schedule.run(&mut self.world);
    }

    /// Runs one frame timed by the wall clock; returns the delta used.
    pub fn step(&mut self) -> f32 {
        let dt = self.clock.tick();
        self.update(dt);
        dt
    }

    pub fn drain_events(&mut self) -> Vec<AvatarEvent> {
        self.world.resource_mut::<EventBus>().drain()
    }

    pub fn animator(&self, entity: Entity) -> Option<&AvatarAnimator> {
        self.world.get::<AvatarAnimator>(entity)
    }

    pub fn player_mut(&mut self, entity: Entity) -> Option<Mut<'_, AvatarAnimator>> {
        self.world.get_mut::<AvatarAnimator>(entity)
    }

    pub fn set_audio(&mut self, entity: Entity, input: LipsyncInput) -> bool {
        match self.world.get_mut::<AudioFeed>(entity) {
            Some(mut feed) => {
                feed.0 = input;
                true
            }
            None => false,
        }
    }

    pub fn face_weights(&self, entity: Entity) -> Option<FaceWeights> {
        self.world.get::<FaceDriver>(entity).map(|face| face.weights)
    }
}

fn to_avatar_event(entity: Entity, event: PlayerEvent) -> AvatarEvent {
    match event {
        PlayerEvent::Started { clip, channel } => AvatarEvent::ClipStarted { entity, clip, channel },
        PlayerEvent::Completed { clip, channel } => AvatarEvent::ClipCompleted { entity, clip, channel },
        PlayerEvent::AboutToRepeat { clip, channel } => AvatarEvent::LoopAboutToRepeat { entity, clip, channel },
        PlayerEvent::Cleared { channel } => AvatarEvent::ChannelCleared { entity, channel },
    }
}

// ---------- Systems ----------
pub fn sys_drive_avatar_playback(
    dt: Res<TimeDelta>,
    mut events: ResMut<EventBus>,
    mut animators: Query<(Entity, &mut AvatarAnimator)>,
) {
    for (entity, mut animator) in animators.iter_mut() {
        for event in animator.player.tick(dt.0) {
            events.push(to_avatar_event(entity, event));
        }
        let pose = animator.player.sample_pose();
        animator.pose = pose;
    }
}

pub fn sys_drive_lipsync(
    dt: Res<TimeDelta>,
    mut events: ResMut<EventBus>,
    mut faces: Query<(Entity, &AudioFeed, &mut FaceDriver)>,
) {
    for (entity, feed, mut face) in faces.iter_mut() {
        let face = &mut *face;
        let blink = face.blink.update(dt.0);
        let input = LipsyncInput { eye_closure: feed.0.eye_closure.max(blink), ..feed.0 };
        face.weights = face.synth.update(dt.0, &input);
        let speaking = face.synth.is_speaking();
        if speaking != face.was_speaking {
            face.was_speaking = speaking;
            events.push(if speaking {
                AvatarEvent::SpeechStarted { entity }
            } else {
                AvatarEvent::SpeechEnded { entity }
            });
        }
    }
}
