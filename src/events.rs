use crate::rig::BodyRegion;
use bevy_ecs::prelude::{Entity, Resource};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum AvatarEvent {
    ClipStarted { entity: Entity, clip: Arc<str>, channel: BodyRegion },
    ClipCompleted { entity: Entity, clip: Arc<str>, channel: BodyRegion },
    LoopAboutToRepeat { entity: Entity, clip: Arc<str>, channel: BodyRegion },
    ChannelCleared { entity: Entity, channel: BodyRegion },
    SpeechStarted { entity: Entity },
    SpeechEnded { entity: Entity },
}

impl AvatarEvent {
    pub fn entity(&self) -> Entity {
        match self {
            AvatarEvent::ClipStarted { entity, .. }
            | AvatarEvent::ClipCompleted { entity, .. }
            | AvatarEvent::LoopAboutToRepeat { entity, .. }
            | AvatarEvent::ChannelCleared { entity, .. }
            | AvatarEvent::SpeechStarted { entity }
            | AvatarEvent::SpeechEnded { entity } => *entity,
        }
    }
}

impl fmt::Display for AvatarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvatarEvent::ClipStarted { entity, clip, channel } => {
                write!(f, "ClipStarted entity={} clip={} channel={}", entity.index(), clip, channel)
            }
            AvatarEvent::ClipCompleted { entity, clip, channel } => {
                write!(f, "ClipCompleted entity={} clip={} channel={}", entity.index(), clip, channel)
            }
            AvatarEvent::LoopAboutToRepeat { entity, clip, channel } => {
                write!(f, "LoopAboutToRepeat entity={} clip={} channel={}", entity.index(), clip, channel)
            }
            AvatarEvent::ChannelCleared { entity, channel } => {
                write!(f, "ChannelCleared entity={} channel={}", entity.index(), channel)
            }
            AvatarEvent::SpeechStarted { entity } => write!(f, "SpeechStarted entity={}", entity.index()),
            AvatarEvent::SpeechEnded { entity } => write!(f, "SpeechEnded entity={}", entity.index()),
        }
    }
}

#[derive(Default, Resource)]
pub struct EventBus {
    events: Vec<AvatarEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: AvatarEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<AvatarEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
