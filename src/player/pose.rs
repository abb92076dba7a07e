use super::action::ClipAction;
use crate::assets::TrackData;
use crate::rig::{AvatarSkeleton, NodeTransform};
use glam::{Quat, Vec3};
use std::collections::HashMap;
use std::sync::Arc;

const MIN_CONTRIBUTION: f32 = 1e-4;

/// Blended local transforms for every node some bound clip animates.
#[derive(Debug, Clone, Default)]
pub struct Pose {
    nodes: HashMap<Arc<str>, NodeTransform>,
}

impl Pose {
    pub fn get(&self, node: &str) -> Option<&NodeTransform> {
        self.nodes.get(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &NodeTransform)> {
        self.nodes.iter()
    }
}

struct Accumulator<T> {
    value: Option<T>,
    weight: f32,
}

impl<T: Copy> Default for Accumulator<T> {
    fn default() -> Self {
        Self { value: None, weight: 0.0 }
    }
}

impl<T: Copy> Accumulator<T> {
    fn add(&mut self, value: T, weight: f32, mix: impl Fn(T, T, f32) -> T) {
        self.weight += weight;
        self.value = Some(match self.value {
            None => value,
            Some(current) => mix(current, value, weight / self.weight),
        });
    }

    /// Missing influence is filled from the rest value.
    fn resolve(&self, rest: T, mix: impl Fn(T, T, f32) -> T) -> T {
        match self.value {
            None => rest,
            Some(value) if self.weight < 1.0 => mix(value, rest, 1.0 - self.weight),
            Some(value) => value,
        }
    }
}

#[derive(Default)]
struct NodeAccumulator {
    translation: Accumulator<Vec3>,
    rotation: Accumulator<Quat>,
    scale: Accumulator<Vec3>,
}

#[derive(Default)]
pub(crate) struct PoseBlender {
    nodes: HashMap<Arc<str>, NodeAccumulator>,
}

impl PoseBlender {
    pub(crate) fn add_action(&mut self, action: &ClipAction, weight: f32) {
        if weight < MIN_CONTRIBUTION {
            return;
        }
        let time = action.time();
        for track in action.clip().tracks.iter() {
            let node = self.nodes.entry(Arc::clone(&track.target)).or_default();
            match &track.data {
                TrackData::Translation(values) => {
                    if let Some(value) = values.sample(time) {
                        node.translation.add(value, weight, Vec3::lerp);
                    }
                }
                TrackData::Rotation(values) => {
                    if let Some(value) = values.sample(time) {
                        node.rotation.add(value, weight, Quat::slerp);
                    }
                }
                TrackData::Scale(values) => {
                    if let Some(value) = values.sample(time) {
                        node.scale.add(value, weight, Vec3::lerp);
                    }
                }
            }
        }
    }

    pub(crate) fn finish(self, skeleton: Option<&dyn AvatarSkeleton>) -> Pose {
        let nodes = self
            .nodes
            .into_iter()
            .map(|(name, accum)| {
                let rest = skeleton.and_then(|skeleton| skeleton.rest_pose(&name)).unwrap_or_default();
                let transform = NodeTransform {
                    translation: accum.translation.resolve(rest.translation, Vec3::lerp),
                    rotation: accum.rotation.resolve(rest.rotation, Quat::slerp).normalize(),
                    scale: accum.scale.resolve(rest.scale, Vec3::lerp),
                };
                (name, transform)
            })
            .collect();
        Pose { nodes }
    }
}
