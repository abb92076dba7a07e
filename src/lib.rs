pub mod assets;
pub mod blink;
pub mod config;
pub mod director;
pub mod ecs;
pub mod events;
pub mod expression;
pub mod lipsync;
pub mod loader;
pub mod player;
pub mod registry;
pub mod retarget;
pub mod rig;
pub mod selector;
pub mod time;

pub use blink::BlinkScheduler;
pub use config::AvatarConfig;
pub use director::{AvatarDirector, FrameOutput};
pub use lipsync::{FaceWeights, LipsyncInput, Viseme, VisemeSynthesizer};
pub use loader::{ClipLoader, LoadingState, PreloadReport};
pub use player::{AnimationPlayer, PlayOptions, PlayerEvent};
pub use registry::{AnimationCategory, AnimationDefinition, AnimationRegistry};
pub use retarget::ResolvedClip;
pub use rig::{AvatarRig, AvatarSkeleton, BodyRegion, HumanBone};
pub use selector::ClipSelector;
