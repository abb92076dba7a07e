//! Humanoid bone vocabulary and the avatar skeleton handle.

use crate::assets::skeletal::SceneNode;
use anyhow::{anyhow, Result};
use bitflags::bitflags;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Prefix some runtimes give the normalized copy of each humanoid node.
pub const NORMALIZED_NODE_PREFIX: &str = "Normalized_";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegionMask: u8 {
        const UPPER = 0b01;
        const LOWER = 0b10;
    }
}

/// Body region a clip drives. Doubles as the playback channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyRegion {
    Full,
    Upper,
    Lower,
}

impl BodyRegion {
    pub const ALL: [BodyRegion; 3] = [BodyRegion::Full, BodyRegion::Upper, BodyRegion::Lower];

    pub fn allowed(self) -> RegionMask {
        match self {
            BodyRegion::Full => RegionMask::all(),
            BodyRegion::Upper => RegionMask::UPPER,
            BodyRegion::Lower => RegionMask::LOWER,
        }
    }

    pub fn index(self) -> usize {
        match self {
            BodyRegion::Full => 0,
            BodyRegion::Upper => 1,
            BodyRegion::Lower => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BodyRegion::Full => "full",
            BodyRegion::Upper => "upper",
            BodyRegion::Lower => "lower",
        }
    }
}

impl fmt::Display for BodyRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

macro_rules! human_bones {
    ($($variant:ident => $name:literal, $region:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum HumanBone {
            $($variant,)*
        }

        impl HumanBone {
            pub const ALL: &'static [HumanBone] = &[$(HumanBone::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(HumanBone::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(HumanBone::$variant),)*
                    _ => None,
                }
            }

            pub fn region_mask(self) -> RegionMask {
                match self {
                    $(HumanBone::$variant => RegionMask::$region,)*
                }
            }
        }
    };
}

human_bones! {
    Hips => "hips", LOWER;
    Spine => "spine", UPPER;
    Chest => "chest", UPPER;
    UpperChest => "upperChest", UPPER;
    Neck => "neck", UPPER;
    Head => "head", UPPER;
    LeftEye => "leftEye", UPPER;
    RightEye => "rightEye", UPPER;
    Jaw => "jaw", UPPER;
    LeftUpperLeg => "leftUpperLeg", LOWER;
    LeftLowerLeg => "leftLowerLeg", LOWER;
    LeftFoot => "leftFoot", LOWER;
    LeftToes => "leftToes", LOWER;
    RightUpperLeg => "rightUpperLeg", LOWER;
    RightLowerLeg => "rightLowerLeg", LOWER;
    RightFoot => "rightFoot", LOWER;
    RightToes => "rightToes", LOWER;
    LeftShoulder => "leftShoulder", UPPER;
    LeftUpperArm => "leftUpperArm", UPPER;
    LeftLowerArm => "leftLowerArm", UPPER;
    LeftHand => "leftHand", UPPER;
    RightShoulder => "rightShoulder", UPPER;
    RightUpperArm => "rightUpperArm", UPPER;
    RightLowerArm => "rightLowerArm", UPPER;
    RightHand => "rightHand", UPPER;
    LeftThumbMetacarpal => "leftThumbMetacarpal", UPPER;
    LeftThumbProximal => "leftThumbProximal", UPPER;
    LeftThumbDistal => "leftThumbDistal", UPPER;
    LeftIndexProximal => "leftIndexProximal", UPPER;
    LeftIndexIntermediate => "leftIndexIntermediate", UPPER;
    LeftIndexDistal => "leftIndexDistal", UPPER;
    LeftMiddleProximal => "leftMiddleProximal", UPPER;
    LeftMiddleIntermediate => "leftMiddleIntermediate", UPPER;
    LeftMiddleDistal => "leftMiddleDistal", UPPER;
    LeftRingProximal => "leftRingProximal", UPPER;
    LeftRingIntermediate => "leftRingIntermediate", UPPER;
    LeftRingDistal => "leftRingDistal", UPPER;
    LeftLittleProximal => "leftLittleProximal", UPPER;
    LeftLittleIntermediate => "leftLittleIntermediate", UPPER;
    LeftLittleDistal => "leftLittleDistal", UPPER;
    RightThumbMetacarpal => "rightThumbMetacarpal", UPPER;
    RightThumbProximal => "rightThumbProximal", UPPER;
    RightThumbDistal => "rightThumbDistal", UPPER;
    RightIndexProximal => "rightIndexProximal", UPPER;
    RightIndexIntermediate => "rightIndexIntermediate", UPPER;
    RightIndexDistal => "rightIndexDistal", UPPER;
    RightMiddleProximal => "rightMiddleProximal", UPPER;
    RightMiddleIntermediate => "rightMiddleIntermediate", UPPER;
    RightMiddleDistal => "rightMiddleDistal", UPPER;
    RightRingProximal => "rightRingProximal", UPPER;
    RightRingIntermediate => "rightRingIntermediate", UPPER;
    RightRingDistal => "rightRingDistal", UPPER;
    RightLittleProximal => "rightLittleProximal", UPPER;
    RightLittleIntermediate => "rightLittleIntermediate", UPPER;
    RightLittleDistal => "rightLittleDistal", UPPER;
}

impl HumanBone {
    pub fn in_region(self, region: BodyRegion) -> bool {
        region.allowed().contains(self.region_mask())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE }
    }
}

/// Live avatar skeleton as seen by the loader and the player.
pub trait AvatarSkeleton: Send + Sync {
    /// Scene node carrying the normalized humanoid bone.
    fn bone_node(&self, bone: HumanBone) -> Option<&str>;

    fn bone_for_node(&self, node: &str) -> Option<HumanBone>;

    fn has_node(&self, node: &str) -> bool;

    /// Distance from the scene root to the hips in rest pose.
    fn hips_height(&self) -> f32;

    /// Legacy (VRM 0.x) rigs face the opposite direction: X and Z are mirrored.
    fn legacy_axes(&self) -> bool {
        false
    }

    fn rest_pose(&self, _node: &str) -> Option<NodeTransform> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct AvatarRig {
    nodes: HashMap<Arc<str>, NodeTransform>,
    bones: HashMap<HumanBone, Arc<str>>,
    node_bones: HashMap<Arc<str>, HumanBone>,
    hips_height: f32,
    legacy_axes: bool,
}

impl AvatarRig {
    pub fn builder() -> AvatarRigBuilder {
        AvatarRigBuilder::default()
    }

    /// Builds a rig from an imported scene, recognising humanoid nodes by their
    /// VRM bone name (optionally behind the normalized-node prefix).
    pub fn from_scene(nodes: &[SceneNode], legacy_axes: bool) -> Result<Self> {
        let mut builder = AvatarRigBuilder::default().legacy_axes(legacy_axes);
        let mut hips_height = None;
        for node in nodes {
            let transform = NodeTransform {
                translation: node.rest_translation,
                rotation: node.rest_rotation,
                scale: node.rest_scale,
            };
            builder = builder.node_with_rest(node.name.as_ref(), transform);
            let bare = node.name.strip_prefix(NORMALIZED_NODE_PREFIX).unwrap_or(&node.name);
            if let Some(bone) = HumanBone::from_name(bare) {
                if bone == HumanBone::Hips {
                    hips_height = Some(node.rest_world_translation().y.abs());
                }
                builder = builder.bone(bone, node.name.as_ref());
            }
        }
        let hips_height = hips_height.ok_or_else(|| anyhow!("scene has no humanoid 'hips' node"))?;
        Ok(builder.hips_height(hips_height).build())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }
}

impl AvatarSkeleton for AvatarRig {
    fn bone_node(&self, bone: HumanBone) -> Option<&str> {
        self.bones.get(&bone).map(|name| name.as_ref())
    }

    fn bone_for_node(&self, node: &str) -> Option<HumanBone> {
        self.node_bones.get(node).copied()
    }

    fn has_node(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    fn hips_height(&self) -> f32 {
        self.hips_height
    }

    fn legacy_axes(&self) -> bool {
        self.legacy_axes
    }

    fn rest_pose(&self, node: &str) -> Option<NodeTransform> {
        self.nodes.get(node).copied()
    }
}

#[derive(Debug, Default)]
pub struct AvatarRigBuilder {
    rig: AvatarRig,
}

impl AvatarRigBuilder {
    pub fn node(self, name: &str) -> Self {
        self.node_with_rest(name, NodeTransform::default())
    }

    pub fn node_with_rest(mut self, name: &str, rest: NodeTransform) -> Self {
        self.rig.nodes.insert(Arc::from(name), rest);
        self
    }

    /// Maps `bone` to `node`, adding the node when it is not known yet.
    pub fn bone(mut self, bone: HumanBone, node: &str) -> Self {
        let name: Arc<str> = Arc::from(node);
        self.rig.nodes.entry(Arc::clone(&name)).or_default();
        self.rig.node_bones.insert(Arc::clone(&name), bone);
        self.rig.bones.insert(bone, name);
        self
    }

    /// Maps every humanoid bone to a node named after it.
    pub fn standard_humanoid(mut self) -> Self {
        for bone in HumanBone::ALL {
            self = self.bone(*bone, bone.name());
        }
        self
    }

    pub fn hips_height(mut self, height: f32) -> Self {
        self.rig.hips_height = height;
        self
    }

    pub fn legacy_axes(mut self, legacy: bool) -> Self {
        self.rig.legacy_axes = legacy;
        self
    }

    pub fn build(self) -> AvatarRig {
        self.rig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bone_names_round_trip_through_table() {
        for bone in HumanBone::ALL {
            assert_eq!(HumanBone::from_name(bone.name()), Some(*bone));
        }
        assert_eq!(HumanBone::from_name("tail"), None);
    }

    #[test]
    fn regions_partition_the_skeleton() {
        assert!(HumanBone::Head.in_region(BodyRegion::Upper));
        assert!(!HumanBone::Head.in_region(BodyRegion::Lower));
        assert!(HumanBone::Hips.in_region(BodyRegion::Lower));
        assert!(HumanBone::LeftFoot.in_region(BodyRegion::Full));
        assert!(HumanBone::ALL.iter().all(|bone| bone.in_region(BodyRegion::Full)));
    }

    #[test]
    fn builder_maps_nodes_both_ways() {
        let rig = AvatarRig::builder().bone(HumanBone::Hips, "J_Bip_C_Hips").node("hair").hips_height(0.9).build();
        assert_eq!(rig.bone_node(HumanBone::Hips), Some("J_Bip_C_Hips"));
        assert_eq!(rig.bone_for_node("J_Bip_C_Hips"), Some(HumanBone::Hips));
        assert!(rig.has_node("hair"));
        assert!(!rig.has_node("tail"));
        assert_eq!(rig.node_count(), 2);
    }
}
