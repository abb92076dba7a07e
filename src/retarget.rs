//! Turns a decoded animation into a clip the avatar can play.
//!
//! Mixamo clips are remapped bone-by-bone onto the humanoid rig: each rotation
//! key is corrected by the source bone's rest pose, hips translation is scaled
//! by the ratio of the two hips heights and legacy rigs get their X/Z axes
//! mirrored. Clips authored against the avatar itself only need their track
//! targets matched to scene nodes. Either way the result is filtered to the
//! definition's body region and trimmed to its frame window.

use crate::assets::{NodeTrack, RawAnimation, TrackData};
use crate::registry::{AnimationCategory, AnimationDefinition};
use crate::rig::{AvatarSkeleton, BodyRegion, HumanBone, NORMALIZED_NODE_PREFIX};
use anyhow::{anyhow, bail, Result};
use glam::{Quat, Vec3};
use std::sync::Arc;
use tracing::{debug, warn};

const MIXAMO_PREFIX: &str = "mixamorig";
const MIXAMO_HIPS: &str = "mixamorigHips";
/// Secondary (spring) bones are addressed by their own names only.
const SECONDARY_BONE_PREFIX: &str = "J_Sec";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimBounds {
    pub start: f32,
    pub end: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipMetadata {
    pub duration: f32,
    pub frame_count: u32,
    pub region: BodyRegion,
    pub category: AnimationCategory,
    pub seamless: bool,
    pub trim: Option<TrimBounds>,
}

/// Playable clip. Immutable once built; shared by every channel that binds it.
#[derive(Debug, Clone)]
pub struct ResolvedClip {
    pub id: Arc<str>,
    pub tracks: Arc<[NodeTrack]>,
    pub meta: ClipMetadata,
}

impl ResolvedClip {
    pub fn new(id: impl Into<Arc<str>>, duration: f32, tracks: Vec<NodeTrack>) -> Self {
        Self {
            id: id.into(),
            tracks: Arc::from(tracks.into_boxed_slice()),
            meta: ClipMetadata {
                duration: duration.max(0.0),
                frame_count: 0,
                region: BodyRegion::Full,
                category: AnimationCategory::default(),
                seamless: false,
                trim: None,
            },
        }
    }

    pub fn with_region(mut self, region: BodyRegion) -> Self {
        self.meta.region = region;
        self
    }

    pub fn with_category(mut self, category: AnimationCategory) -> Self {
        self.meta.category = category;
        self
    }

    pub fn with_seamless(mut self, seamless: bool) -> Self {
        self.meta.seamless = seamless;
        self
    }

    pub fn duration(&self) -> f32 {
        self.meta.duration
    }

    pub fn region(&self) -> BodyRegion {
        self.meta.region
    }

    pub fn is_seamless(&self) -> bool {
        self.meta.seamless
    }
}

/// Maps a Mixamo joint name (`mixamorigLeftArm`, `mixamorig:LeftArm`) to its humanoid bone.
pub fn mixamo_bone(name: &str) -> Option<HumanBone> {
    let joint = name.strip_prefix(MIXAMO_PREFIX)?;
    let joint = joint.strip_prefix(':').unwrap_or(joint);
    let bone = match joint {
        "Hips" => HumanBone::Hips,
        "Spine" => HumanBone::Spine,
        "Spine1" => HumanBone::Chest,
        "Spine2" => HumanBone::UpperChest,
        "Neck" => HumanBone::Neck,
        "Head" => HumanBone::Head,
        "LeftShoulder" => HumanBone::LeftShoulder,
        "LeftArm" => HumanBone::LeftUpperArm,
        "LeftForeArm" => HumanBone::LeftLowerArm,
        "LeftHand" => HumanBone::LeftHand,
        "LeftHandThumb1" => HumanBone::LeftThumbMetacarpal,
        "LeftHandThumb2" => HumanBone::LeftThumbProximal,
        "LeftHandThumb3" => HumanBone::LeftThumbDistal,
        "LeftHandIndex1" => HumanBone::LeftIndexProximal,
        "LeftHandIndex2" => HumanBone::LeftIndexIntermediate,
        "LeftHandIndex3" => HumanBone::LeftIndexDistal,
        "LeftHandMiddle1" => HumanBone::LeftMiddleProximal,
        "LeftHandMiddle2" => HumanBone::LeftMiddleIntermediate,
        "LeftHandMiddle3" => HumanBone::LeftMiddleDistal,
        "LeftHandRing1" => HumanBone::LeftRingProximal,
        "LeftHandRing2" => HumanBone::LeftRingIntermediate,
        "LeftHandRing3" => HumanBone::LeftRingDistal,
        "LeftHandPinky1" => HumanBone::LeftLittleProximal,
        "LeftHandPinky2" => HumanBone::LeftLittleIntermediate,
        "LeftHandPinky3" => HumanBone::LeftLittleDistal,
        "RightShoulder" => HumanBone::RightShoulder,
        "RightArm" => HumanBone::RightUpperArm,
        "RightForeArm" => HumanBone::RightLowerArm,
        "RightHand" => HumanBone::RightHand,
        "RightHandThumb1" => HumanBone::RightThumbMetacarpal,
        "RightHandThumb2" => HumanBone::RightThumbProximal,
        "RightHandThumb3" => HumanBone::RightThumbDistal,
        "RightHandIndex1" => HumanBone::RightIndexProximal,
        "RightHandIndex2" => HumanBone::RightIndexIntermediate,
        "RightHandIndex3" => HumanBone::RightIndexDistal,
        "RightHandMiddle1" => HumanBone::RightMiddleProximal,
        "RightHandMiddle2" => HumanBone::RightMiddleIntermediate,
        "RightHandMiddle3" => HumanBone::RightMiddleDistal,
        "RightHandRing1" => HumanBone::RightRingProximal,
        "RightHandRing2" => HumanBone::RightRingIntermediate,
        "RightHandRing3" => HumanBone::RightRingDistal,
        "RightHandPinky1" => HumanBone::RightLittleProximal,
        "RightHandPinky2" => HumanBone::RightLittleIntermediate,
        "RightHandPinky3" => HumanBone::RightLittleDistal,
        "LeftUpLeg" => HumanBone::LeftUpperLeg,
        "LeftLeg" => HumanBone::LeftLowerLeg,
        "LeftFoot" => HumanBone::LeftFoot,
        "LeftToeBase" => HumanBone::LeftToes,
        "RightUpLeg" => HumanBone::RightUpperLeg,
        "RightLeg" => HumanBone::RightLowerLeg,
        "RightFoot" => HumanBone::RightFoot,
        "RightToeBase" => HumanBone::RightToes,
        _ => return None,
    };
    Some(bone)
}

/// Remaps a Mixamo-rigged animation onto the avatar's normalized humanoid nodes.
pub fn retarget_mixamo(raw: &RawAnimation, skeleton: &dyn AvatarSkeleton) -> Result<Vec<NodeTrack>> {
    let hips = raw
        .bones
        .iter()
        .find(|(name, _)| mixamo_bone(name) == Some(HumanBone::Hips))
        .map(|(_, bone)| bone)
        .ok_or_else(|| anyhow!("source rig has no {MIXAMO_HIPS} node"))?;
    let source_hips_height = hips.rest_translation.y;
    if source_hips_height.abs() <= f32::EPSILON {
        bail!("source hips rest height is zero; cannot scale root motion");
    }
    let position_scale = skeleton.hips_height() / source_hips_height;
    let legacy = skeleton.legacy_axes();

    let mut tracks = Vec::with_capacity(raw.tracks.len());
    let mut skipped: Vec<String> = Vec::new();
    for track in &raw.tracks {
        let mapped = mixamo_bone(&track.target)
            .and_then(|bone| skeleton.bone_node(bone))
            .zip(raw.bone(&track.target));
        let Some((node, source)) = mapped else {
            skipped.push(format!("{} (no humanoid bone mapping)", track.describe()));
            continue;
        };
        if !skeleton.has_node(node) {
            skipped.push(format!("{node}.{} (node not found in scene)", track.data.property().label()));
            continue;
        }

        let parent_rest = source.parent_world_rotation;
        let rest_inverse = source.rest_world_rotation.inverse();
        let data = match &track.data {
            TrackData::Rotation(rotations) => TrackData::Rotation(rotations.map_values(|q| {
                let corrected = (parent_rest * q * rest_inverse).normalize();
                if legacy {
                    mirror_rotation(corrected)
                } else {
                    corrected
                }
            })),
            TrackData::Translation(positions) => TrackData::Translation(positions.map_values(|v| {
                let v = if legacy { mirror_translation(v) } else { v };
                v * position_scale
            })),
            TrackData::Scale(scales) => TrackData::Scale(scales.clone()),
        };
        tracks.push(NodeTrack { target: Arc::from(node), data });
    }

    if !skipped.is_empty() {
        warn!(clip = %raw.name, count = skipped.len(), tracks = ?skipped, "Skipped tracks while retargeting");
    }
    Ok(tracks)
}

fn mirror_rotation(q: Quat) -> Quat {
    Quat::from_xyzw(-q.x, q.y, -q.z, q.w)
}

fn mirror_translation(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, v.y, -v.z)
}

/// Keeps tracks whose target exists in the live scene, trying the normalized
/// node name as a fallback.
pub fn clean_tracks(clip: &str, tracks: &[NodeTrack], skeleton: &dyn AvatarSkeleton) -> Vec<NodeTrack> {
    let mut kept = Vec::with_capacity(tracks.len());
    let mut dropped: Vec<String> = Vec::new();
    for track in tracks {
        if skeleton.has_node(&track.target) {
            kept.push(track.clone());
            continue;
        }
        if track.target.starts_with(SECONDARY_BONE_PREFIX) {
            dropped.push(track.describe());
            continue;
        }
        let normalized = format!("{NORMALIZED_NODE_PREFIX}{}", track.target);
        if skeleton.has_node(&normalized) {
            kept.push(NodeTrack { target: Arc::from(normalized), data: track.data.clone() });
        } else {
            dropped.push(format!("{normalized}.{}", track.data.property().label()));
        }
    }
    if !dropped.is_empty() {
        warn!(clip, count = dropped.len(), tracks = ?dropped, "Removed tracks with no matching scene node");
    }
    kept
}

/// Drops tracks driving bones outside `region`. Non-humanoid nodes only
/// survive in full-body clips.
pub fn filter_region(tracks: Vec<NodeTrack>, region: BodyRegion, skeleton: &dyn AvatarSkeleton) -> Vec<NodeTrack> {
    if region == BodyRegion::Full {
        return tracks;
    }
    tracks
        .into_iter()
        .filter(|track| skeleton.bone_for_node(&track.target).is_some_and(|bone| bone.in_region(region)))
        .collect()
}

/// Full pipeline from decoded file to playable clip.
pub fn build_clip(
    definition: &AnimationDefinition,
    raw: &RawAnimation,
    skeleton: &dyn AvatarSkeleton,
    frame_rate: f32,
) -> Result<ResolvedClip> {
    let tracks = if raw.is_mixamo_rig() {
        retarget_mixamo(raw, skeleton)?
    } else {
        clean_tracks(&definition.id, &raw.tracks, skeleton)
    };

    let region = definition.region();
    let before = tracks.len();
    let mut tracks = filter_region(tracks, region, skeleton);
    if tracks.len() != before {
        debug!(clip = %definition.id, %region, dropped = before - tracks.len(), "Filtered tracks outside body region");
    }
    if tracks.is_empty() {
        bail!("no playable tracks remain for '{}'", definition.id);
    }

    let mut duration = raw.duration;
    let mut trim = None;
    if let Some(range) = definition.trim_range() {
        let start = range.start_time(frame_rate);
        let end = range.end_time(frame_rate, raw.duration);
        if end <= start {
            bail!("trim window for '{}' is empty ({start:.3}s..{end:.3}s)", definition.id);
        }
        tracks = tracks
            .iter()
            .map(|track| NodeTrack { target: Arc::clone(&track.target), data: track.data.trimmed(start, end) })
            .collect();
        duration = end - start;
        trim = Some(TrimBounds { start, end });
    }

    let mut clip = ResolvedClip::new(definition.id.as_str(), duration, tracks)
        .with_region(region)
        .with_category(definition.category)
        .with_seamless(definition.seamless);
    clip.meta.frame_count = (duration * frame_rate).round() as u32;
    clip.meta.trim = trim;
    Ok(clip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixamo_names_map_with_and_without_colon() {
        assert_eq!(mixamo_bone("mixamorigLeftForeArm"), Some(HumanBone::LeftLowerArm));
        assert_eq!(mixamo_bone("mixamorig:Spine2"), Some(HumanBone::UpperChest));
        assert_eq!(mixamo_bone("mixamorigHeadTop_End"), None);
        assert_eq!(mixamo_bone("Hips"), None);
    }

    #[test]
    fn legacy_mirroring_negates_x_and_z() {
        let q = Quat::from_xyzw(0.1, 0.2, 0.3, 0.9);
        let m = mirror_rotation(q);
        assert_eq!((m.x, m.y, m.z, m.w), (-0.1, 0.2, -0.3, 0.9));
        assert_eq!(mirror_translation(Vec3::new(1.0, 2.0, 3.0)), Vec3::new(-1.0, 2.0, -3.0));
    }
}
