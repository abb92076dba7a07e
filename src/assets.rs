use crate::registry::{AnimationDefinition, AssetFormat};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use glam::{Quat, Vec3};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod skeletal;

/// Clip name Mixamo exports carry for their single take.
const MIXAMO_TAKE_NAME: &str = "mixamo.com";

#[derive(Clone, Copy, Debug)]
pub struct ClipKeyframe<T> {
    pub time: f32,
    pub value: T,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipInterpolation {
    Step,
    Linear,
}

#[derive(Clone, Debug)]
pub struct Vec3Track {
    pub interpolation: ClipInterpolation,
    pub keyframes: Arc<[ClipKeyframe<Vec3>]>,
}

#[derive(Clone, Debug)]
pub struct QuatTrack {
    pub interpolation: ClipInterpolation,
    pub keyframes: Arc<[ClipKeyframe<Quat>]>,
}

impl Vec3Track {
    pub fn new(interpolation: ClipInterpolation, times: &[f32], values: Vec<Vec3>) -> Result<Self> {
        Ok(Self { interpolation, keyframes: build_keyframes(times, values)? })
    }

    pub fn sample(&self, time: f32) -> Option<Vec3> {
        sample_keyframes(&self.keyframes, self.interpolation, time, |a, b, t| a.lerp(b, t))
    }

    pub fn map_values(&self, mut f: impl FnMut(Vec3) -> Vec3) -> Self {
        let frames: Vec<_> =
            self.keyframes.iter().map(|kf| ClipKeyframe { time: kf.time, value: f(kf.value) }).collect();
        Self { interpolation: self.interpolation, keyframes: Arc::from(frames.into_boxed_slice()) }
    }

    pub fn trimmed(&self, start: f32, end: f32) -> Self {
        Self { interpolation: self.interpolation, keyframes: trim_keyframes(&self.keyframes, start, end) }
    }

    pub fn end_time(&self) -> f32 {
        self.keyframes.last().map(|kf| kf.time).unwrap_or(0.0)
    }
}

impl QuatTrack {
    pub fn new(interpolation: ClipInterpolation, times: &[f32], values: Vec<Quat>) -> Result<Self> {
        Ok(Self { interpolation, keyframes: build_keyframes(times, values)? })
    }

    pub fn sample(&self, time: f32) -> Option<Quat> {
        sample_keyframes(&self.keyframes, self.interpolation, time, |a, b, t| a.slerp(b, t))
    }

    pub fn map_values(&self, mut f: impl FnMut(Quat) -> Quat) -> Self {
        let frames: Vec<_> =
            self.keyframes.iter().map(|kf| ClipKeyframe { time: kf.time, value: f(kf.value) }).collect();
        Self { interpolation: self.interpolation, keyframes: Arc::from(frames.into_boxed_slice()) }
    }

    pub fn trimmed(&self, start: f32, end: f32) -> Self {
        Self { interpolation: self.interpolation, keyframes: trim_keyframes(&self.keyframes, start, end) }
    }

    pub fn end_time(&self) -> f32 {
        self.keyframes.last().map(|kf| kf.time).unwrap_or(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackProperty {
    Translation,
    Rotation,
    Scale,
}

impl TrackProperty {
    pub fn label(self) -> &'static str {
        match self {
            TrackProperty::Translation => "position",
            TrackProperty::Rotation => "quaternion",
            TrackProperty::Scale => "scale",
        }
    }
}

#[derive(Clone, Debug)]
pub enum TrackData {
    Translation(Vec3Track),
    Rotation(QuatTrack),
    Scale(Vec3Track),
}

impl TrackData {
    pub fn property(&self) -> TrackProperty {
        match self {
            TrackData::Translation(_) => TrackProperty::Translation,
            TrackData::Rotation(_) => TrackProperty::Rotation,
            TrackData::Scale(_) => TrackProperty::Scale,
        }
    }

    pub fn end_time(&self) -> f32 {
        match self {
            TrackData::Translation(track) | TrackData::Scale(track) => track.end_time(),
            TrackData::Rotation(track) => track.end_time(),
        }
    }

    pub fn trimmed(&self, start: f32, end: f32) -> Self {
        match self {
            TrackData::Translation(track) => TrackData::Translation(track.trimmed(start, end)),
            TrackData::Rotation(track) => TrackData::Rotation(track.trimmed(start, end)),
            TrackData::Scale(track) => TrackData::Scale(track.trimmed(start, end)),
        }
    }
}

/// Keyframes addressed to a scene node by name.
#[derive(Clone, Debug)]
pub struct NodeTrack {
    pub target: Arc<str>,
    pub data: TrackData,
}

impl NodeTrack {
    pub fn describe(&self) -> String {
        format!("{}.{}", self.target, self.data.property().label())
    }
}

/// Rest-pose information for a node of the rig an animation was authored on.
#[derive(Clone, Debug)]
pub struct SourceBone {
    pub name: Arc<str>,
    pub rest_translation: Vec3,
    pub rest_world_rotation: Quat,
    pub parent_world_rotation: Quat,
}

/// An animation exactly as decoded from its file, before retargeting.
#[derive(Clone, Debug)]
pub struct RawAnimation {
    pub name: Arc<str>,
    pub duration: f32,
    pub tracks: Vec<NodeTrack>,
    pub bones: HashMap<Arc<str>, SourceBone>,
}

impl RawAnimation {
    pub fn bone(&self, name: &str) -> Option<&SourceBone> {
        self.bones.get(name)
    }

    /// True when the clip targets the Mixamo rig rather than the avatar's own nodes.
    pub fn is_mixamo_rig(&self) -> bool {
        self.tracks.iter().any(|track| track.target.starts_with("mixamorig"))
    }
}

/// Fetches and decodes raw animation data for a registry entry.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, definition: &AnimationDefinition) -> Result<RawAnimation>;
}

/// Reads animation files below a root directory.
#[derive(Debug, Clone)]
pub struct FileAssetSource {
    root: PathBuf,
}

impl FileAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve_path(&self, asset_path: &str) -> PathBuf {
        self.root.join(asset_path.trim_start_matches('/'))
    }
}

#[async_trait]
impl AssetSource for FileAssetSource {
    async fn fetch(&self, definition: &AnimationDefinition) -> Result<RawAnimation> {
        let path = self.resolve_path(&definition.path);
        if definition.format == AssetFormat::Fbx {
            bail!(
                "'{}' is FBX; only glTF/GLB/VRMA animation files can be decoded (convert with a DCC tool)",
                path.display()
            );
        }
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read animation file {}", path.display()))?;
        let import = skeletal::import_gltf_slice(&bytes)
            .with_context(|| format!("Failed to decode animation file {}", path.display()))?;
        pick_animation(import.animations)
            .ok_or_else(|| anyhow!("'{}' does not contain any animation", path.display()))
    }
}

/// Prefers the Mixamo take when a file carries several animations.
pub fn pick_animation(animations: Vec<RawAnimation>) -> Option<RawAnimation> {
    let mut fallback = None;
    for animation in animations {
        if animation.name.as_ref() == MIXAMO_TAKE_NAME {
            return Some(animation);
        }
        if fallback.is_none() {
            fallback = Some(animation);
        }
    }
    fallback
}

pub(crate) fn build_keyframes<T: Clone>(times: &[f32], values: Vec<T>) -> Result<Arc<[ClipKeyframe<T>]>> {
    if times.len() != values.len() {
        bail!("Animation channel time/value count mismatch ({} vs {})", times.len(), values.len());
    }
    let mut frames: Vec<(usize, ClipKeyframe<T>)> = Vec::with_capacity(times.len());
    for (index, (time, value)) in times.iter().copied().zip(values).enumerate() {
        if !time.is_finite() {
            bail!("Animation channel contains non-finite time value");
        }
        if time < 0.0 {
            bail!("Animation channel time cannot be negative");
        }
        frames.push((index, ClipKeyframe { time, value }));
    }
    frames.sort_by(|a, b| {
        let time_order = a.1.time.partial_cmp(&b.1.time).unwrap_or(Ordering::Equal);
        if time_order == Ordering::Equal {
            a.0.cmp(&b.0)
        } else {
            time_order
        }
    });
    let mut deduped: Vec<ClipKeyframe<T>> = Vec::with_capacity(frames.len());
    for (_, frame) in frames {
        if let Some(last) = deduped.last_mut() {
            if (frame.time - last.time).abs() <= f32::EPSILON {
                *last = frame;
                continue;
            }
        }
        deduped.push(frame);
    }
    Ok(Arc::from(deduped.into_boxed_slice()))
}

fn sample_keyframes<T: Copy>(
    frames: &[ClipKeyframe<T>],
    interpolation: ClipInterpolation,
    time: f32,
    mix: impl Fn(T, T, f32) -> T,
) -> Option<T> {
    let first = frames.first()?;
    let upper = frames.partition_point(|kf| kf.time <= time);
    if upper == 0 {
        return Some(first.value);
    }
    let lower = &frames[upper - 1];
    let Some(next) = frames.get(upper) else {
        return Some(lower.value);
    };
    match interpolation {
        ClipInterpolation::Step => Some(lower.value),
        ClipInterpolation::Linear => {
            let span = next.time - lower.time;
            if span <= f32::EPSILON {
                return Some(next.value);
            }
            let t = ((time - lower.time) / span).clamp(0.0, 1.0);
            Some(mix(lower.value, next.value, t))
        }
    }
}

/// Keeps keys inside `[start, end]` and re-bases them to start at zero. A track
/// with no key in range keeps its first key at time zero.
fn trim_keyframes<T: Copy>(frames: &[ClipKeyframe<T>], start: f32, end: f32) -> Arc<[ClipKeyframe<T>]> {
    let mut kept: Vec<ClipKeyframe<T>> = frames
        .iter()
        .filter(|kf| kf.time >= start && kf.time <= end)
        .map(|kf| ClipKeyframe { time: kf.time - start, value: kf.value })
        .collect();
    if kept.is_empty() {
        if let Some(first) = frames.first() {
            kept.push(ClipKeyframe { time: 0.0, value: first.value });
        }
    }
    Arc::from(kept.into_boxed_slice())
}
