use super::{ClipInterpolation, NodeTrack, QuatTrack, RawAnimation, SourceBone, TrackData, Vec3Track};
use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3};
use gltf::animation::util::{ReadOutputs, Rotations};
use gltf::animation::{Interpolation, Property};
use gltf::Document;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: Arc<str>,
    pub parent: Option<usize>,
    pub rest_translation: Vec3,
    pub rest_rotation: Quat,
    pub rest_scale: Vec3,
    pub rest_world: Mat4,
}

impl SceneNode {
    pub fn rest_world_rotation(&self) -> Quat {
        let (_, rotation, _) = self.rest_world.to_scale_rotation_translation();
        rotation.normalize()
    }

    pub fn rest_world_translation(&self) -> Vec3 {
        self.rest_world.w_axis.truncate()
    }
}

/// Nodes and animations decoded from one glTF / GLB / VRMA document.
pub struct GltfImport {
    pub nodes: Arc<[SceneNode]>,
    pub animations: Vec<RawAnimation>,
}

impl GltfImport {
    pub fn node(&self, name: &str) -> Option<&SceneNode> {
        self.nodes.iter().find(|node| node.name.as_ref() == name)
    }
}

pub fn load_gltf(path: impl AsRef<Path>) -> Result<GltfImport> {
    let path_ref = path.as_ref();
    let (document, buffers, _) =
        gltf::import(path_ref).with_context(|| format!("Failed to import GLTF from {}", path_ref.display()))?;
    build_import(&document, &buffers)
}

pub fn import_gltf_slice(bytes: &[u8]) -> Result<GltfImport> {
    let (document, buffers, _) = gltf::import_slice(bytes).context("Failed to parse GLTF data")?;
    build_import(&document, &buffers)
}

fn build_import(document: &Document, buffers: &[gltf::buffer::Data]) -> Result<GltfImport> {
    let mut node_local: HashMap<usize, Mat4> = HashMap::new();
    let mut parent_of_node: HashMap<usize, usize> = HashMap::new();
    for node in document.nodes() {
        node_local.insert(node.index(), mat4_from_gltf(node.transform().matrix()));
        for child in node.children() {
            parent_of_node.insert(child.index(), node.index());
        }
    }

    let mut world_cache: HashMap<usize, Mat4> = HashMap::new();
    let mut nodes: Vec<SceneNode> = Vec::with_capacity(node_local.len());
    for node in document.nodes() {
        let node_index = node.index();
        let (t, r, s) = node.transform().decomposed();
        let rest_world = compute_world_matrix(node_index, &node_local, &parent_of_node, &mut world_cache);
        let name = node.name().map(|n| n.to_string()).unwrap_or_else(|| format!("node_{node_index}"));
        nodes.push(SceneNode {
            name: Arc::<str>::from(name),
            parent: parent_of_node.get(&node_index).copied(),
            rest_translation: Vec3::from_array(t),
            rest_rotation: Quat::from_xyzw(r[0], r[1], r[2], r[3]).normalize(),
            rest_scale: Vec3::from_array(s),
            rest_world,
        });
    }

    let bones = source_bones(&nodes);
    let mut animations: Vec<RawAnimation> = Vec::new();
    for (anim_index, animation) in document.animations().enumerate() {
        let clip_name: Arc<str> = animation
            .name()
            .map(|n| Arc::<str>::from(n.to_string()))
            .unwrap_or_else(|| Arc::<str>::from(format!("animation_{anim_index}")));

        let mut tracks: Vec<NodeTrack> = Vec::new();
        for channel in animation.channels() {
            let target_node = channel.target().node();
            let Some(target) = nodes.get(target_node.index()).map(|node| Arc::clone(&node.name)) else {
                continue;
            };

            let interpolation = match channel.sampler().interpolation() {
                Interpolation::Linear => ClipInterpolation::Linear,
                Interpolation::Step => ClipInterpolation::Step,
                Interpolation::CubicSpline => {
                    warn!(
                        clip = %clip_name,
                        node = %target,
                        "CubicSpline interpolation is not supported; skipping channel"
                    );
                    continue;
                }
            };

            let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
            let Some(inputs) = reader.read_inputs() else {
                continue;
            };
            let times: Vec<f32> = inputs.collect();
            if times.is_empty() {
                continue;
            }
            let Some(outputs) = reader.read_outputs() else {
                continue;
            };

            let data = match (channel.target().property(), outputs) {
                (Property::Translation, ReadOutputs::Translations(values)) => {
                    let values: Vec<Vec3> = values.map(Vec3::from_array).collect();
                    TrackData::Translation(
                        Vec3Track::new(interpolation, &times, values)
                            .with_context(|| format!("Animation '{clip_name}' translation of '{target}'"))?,
                    )
                }
                (Property::Scale, ReadOutputs::Scales(values)) => {
                    let values: Vec<Vec3> = values.map(Vec3::from_array).collect();
                    TrackData::Scale(
                        Vec3Track::new(interpolation, &times, values)
                            .with_context(|| format!("Animation '{clip_name}' scale of '{target}'"))?,
                    )
                }
                (Property::Rotation, ReadOutputs::Rotations(rotations)) => {
                    let values = convert_rotations(rotations);
                    TrackData::Rotation(
                        QuatTrack::new(interpolation, &times, values)
                            .with_context(|| format!("Animation '{clip_name}' rotation of '{target}'"))?,
                    )
                }
                // Morph weights drive expressions, which come from the lip-sync path instead.
                _ => continue,
            };
            tracks.push(NodeTrack { target, data });
        }

        if tracks.is_empty() {
            continue;
        }
        let duration = tracks.iter().map(|track| track.data.end_time()).fold(0.0_f32, f32::max);
        animations.push(RawAnimation { name: clip_name, duration, tracks, bones: bones.clone() });
    }

    Ok(GltfImport { nodes: Arc::from(nodes.into_boxed_slice()), animations })
}

fn source_bones(nodes: &[SceneNode]) -> HashMap<Arc<str>, SourceBone> {
    nodes
        .iter()
        .map(|node| {
            let parent_world_rotation = node
                .parent
                .and_then(|parent| nodes.get(parent))
                .map(SceneNode::rest_world_rotation)
                .unwrap_or(Quat::IDENTITY);
            let bone = SourceBone {
                name: Arc::clone(&node.name),
                rest_translation: node.rest_translation,
                rest_world_rotation: node.rest_world_rotation(),
                parent_world_rotation,
            };
            (Arc::clone(&node.name), bone)
        })
        .collect()
}

fn convert_rotations(rotations: Rotations) -> Vec<Quat> {
    rotations
        .into_f32()
        .map(|components| {
            let quat = Quat::from_xyzw(components[0], components[1], components[2], components[3]);
            if quat.length_squared() > 0.0 {
                quat.normalize()
            } else {
                Quat::IDENTITY
            }
        })
        .collect()
}

fn mat4_from_gltf(matrix: [[f32; 4]; 4]) -> Mat4 {
    Mat4::from_cols_array_2d(&matrix)
}

fn compute_world_matrix(
    node_index: usize,
    node_local: &HashMap<usize, Mat4>,
    parent_map: &HashMap<usize, usize>,
    cache: &mut HashMap<usize, Mat4>,
) -> Mat4 {
    if let Some(world) = cache.get(&node_index) {
        return *world;
    }
    let local = *node_local.get(&node_index).unwrap_or(&Mat4::IDENTITY);
    let world = if let Some(parent_index) = parent_map.get(&node_index) {
        compute_world_matrix(*parent_index, node_local, parent_map, cache) * local
    } else {
        local
    };
    cache.insert(node_index, world);
    world
}
