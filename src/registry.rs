//! Author-provided animation definitions.
//!
//! The registry is static data: which clips exist, where their files live, what
//! they are for (idle, gesture, emotion, talking) and which body region they
//! drive. It can be read from a JSON file shaped either as a list of
//! definitions or as an object keyed by id.

use crate::rig::BodyRegion;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

const BUILTIN_REGISTRY: &str = include_str!("../assets/animation_registry.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Fbx,
    Vrma,
    Glb,
    Gltf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationCategory {
    Idle,
    #[default]
    Gesture,
    Emotion,
    Talking,
}

impl AnimationCategory {
    pub fn label(self) -> &'static str {
        match self {
            AnimationCategory::Idle => "idle",
            AnimationCategory::Gesture => "gesture",
            AnimationCategory::Emotion => "emotion",
            AnimationCategory::Talking => "talking",
        }
    }

    /// Categories whose clips are meant to repeat until replaced.
    pub fn loops_by_default(self) -> bool {
        matches!(self, AnimationCategory::Idle | AnimationCategory::Talking)
    }
}

/// Inclusive frame window a clip is trimmed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl FrameRange {
    pub fn start_time(&self, fps: f32) -> f32 {
        self.start.map(|frame| frame as f32 / fps).unwrap_or(0.0)
    }

    pub fn end_time(&self, fps: f32, clip_duration: f32) -> f32 {
        self.end.map(|frame| frame as f32 / fps).unwrap_or(clip_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub format: AssetFormat,
    pub path: String,
    #[serde(default)]
    pub category: AnimationCategory,
    #[serde(default, alias = "bodyPart")]
    pub body_region: Option<BodyRegion>,
    #[serde(default)]
    pub start_frame: Option<u32>,
    #[serde(default)]
    pub end_frame: Option<u32>,
    #[serde(default)]
    pub preload: bool,
    #[serde(default)]
    pub seamless: bool,
}

impl AnimationDefinition {
    pub fn new(id: impl Into<String>, format: AssetFormat, path: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            format,
            path: path.into(),
            category: AnimationCategory::default(),
            body_region: None,
            start_frame: None,
            end_frame: None,
            preload: false,
            seamless: false,
        }
    }

    pub fn with_category(mut self, category: AnimationCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_region(mut self, region: BodyRegion) -> Self {
        self.body_region = Some(region);
        self
    }

    pub fn with_frames(mut self, start: Option<u32>, end: Option<u32>) -> Self {
        self.start_frame = start;
        self.end_frame = end;
        self
    }

    pub fn preloaded(mut self) -> Self {
        self.preload = true;
        self
    }

    pub fn seamless(mut self) -> Self {
        self.seamless = true;
        self
    }

    /// Region used for channel routing; untagged clips drive the whole body.
    pub fn region(&self) -> BodyRegion {
        self.body_region.unwrap_or(BodyRegion::Full)
    }

    pub fn trim_range(&self) -> Option<FrameRange> {
        if self.start_frame.is_none() && self.end_frame.is_none() {
            None
        } else {
            Some(FrameRange { start: self.start_frame, end: self.end_frame })
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryFile {
    List(Vec<AnimationDefinition>),
    Keyed(BTreeMap<String, AnimationDefinition>),
}

#[derive(Debug, Clone, Default)]
pub struct AnimationRegistry {
    definitions: Vec<AnimationDefinition>,
    index: HashMap<String, usize>,
}

impl AnimationRegistry {
    pub fn new(definitions: impl IntoIterator<Item = AnimationDefinition>) -> Self {
        let mut registry = Self::default();
        for definition in definitions {
            registry.register(definition);
        }
        registry
    }

    /// The default set shipped in `assets/animation_registry.json`.
    pub fn builtin() -> Result<Self> {
        Self::from_json_slice(BUILTIN_REGISTRY.as_bytes()).context("Failed to parse built-in animation registry")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read animation registry {}", path.display()))?;
        Self::from_json_slice(&bytes)
            .with_context(|| format!("Failed to parse animation registry {}", path.display()))
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let file: RegistryFile = serde_json::from_slice(bytes)?;
        let definitions = match file {
            RegistryFile::List(list) => list,
            RegistryFile::Keyed(map) => map
                .into_iter()
                .map(|(key, mut definition)| {
                    if definition.id.is_empty() {
                        definition.id = key;
                    }
                    definition
                })
                .collect(),
        };
        Ok(Self::new(definitions))
    }

    /// Adds a definition, replacing any earlier one with the same id.
    pub fn register(&mut self, definition: AnimationDefinition) {
        if let Some(&slot) = self.index.get(&definition.id) {
            self.definitions[slot] = definition;
        } else {
            self.index.insert(definition.id.clone(), self.definitions.len());
            self.definitions.push(definition);
        }
    }

    pub fn get(&self, id: &str) -> Option<&AnimationDefinition> {
        self.index.get(id).and_then(|&slot| self.definitions.get(slot))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnimationDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn preload_set(&self) -> impl Iterator<Item = &AnimationDefinition> {
        self.definitions.iter().filter(|definition| definition.preload)
    }

    pub fn by_category(&self, category: AnimationCategory) -> impl Iterator<Item = &AnimationDefinition> {
        self.definitions.iter().filter(move |definition| definition.category == category)
    }

    /// Definitions of `category` routed to `region`, in registration order.
    pub fn candidates(&self, category: AnimationCategory, region: BodyRegion) -> Vec<&AnimationDefinition> {
        self.by_category(category).filter(|definition| definition.region() == region).collect()
    }

    pub fn validate(&self) -> Vec<RegistryIssue> {
        let mut issues = Vec::new();
        for definition in &self.definitions {
            let id = definition.id.as_str();
            if id.is_empty() {
                issues.push(RegistryIssue::new(RegistryIssueSeverity::Error, id, "definition has an empty id"));
            }
            if definition.path.trim().is_empty() {
                issues.push(RegistryIssue::new(RegistryIssueSeverity::Error, id, "asset path is empty"));
            }
            if let (Some(start), Some(end)) = (definition.start_frame, definition.end_frame) {
                if end <= start {
                    issues.push(RegistryIssue::new(
                        RegistryIssueSeverity::Error,
                        id,
                        format!("trim range is empty (startFrame {start} >= endFrame {end})"),
                    ));
                }
            }
            if definition.seamless && !definition.category.loops_by_default() {
                issues.push(RegistryIssue::new(
                    RegistryIssueSeverity::Warning,
                    id,
                    format!("seamless flag on a {} clip has no effect unless it is played looping", definition.category.label()),
                ));
            }
            if definition.format == AssetFormat::Fbx {
                issues.push(RegistryIssue::new(
                    RegistryIssueSeverity::Info,
                    id,
                    "FBX assets need an asset source with an FBX decoder",
                ));
            }
        }
        if self.by_category(AnimationCategory::Idle).next().is_none() {
            issues.push(RegistryIssue::new(
                RegistryIssueSeverity::Error,
                "",
                "registry has no idle animation to fall back to",
            ));
        } else if !self.preload_set().any(|definition| definition.category == AnimationCategory::Idle) {
            issues.push(RegistryIssue::new(
                RegistryIssueSeverity::Warning,
                "",
                "no idle animation is marked for preload; critical readiness can never be reported",
            ));
        }
        issues
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegistryIssueSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for RegistryIssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryIssueSeverity::Info => write!(f, "info"),
            RegistryIssueSeverity::Warning => write!(f, "warning"),
            RegistryIssueSeverity::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegistryIssue {
    pub severity: RegistryIssueSeverity,
    pub id: String,
    pub message: String,
}

impl RegistryIssue {
    fn new(severity: RegistryIssueSeverity, id: &str, message: impl Into<String>) -> Self {
        Self { severity, id: id.to_string(), message: message.into() }
    }
}

impl fmt::Display for RegistryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "[{}] {}", self.severity, self.message)
        } else {
            write!(f, "[{}] {}: {}", self.severity, self.id, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_registry_fills_missing_ids_from_keys() {
        let json = br#"{
            "wave": { "type": "vrma", "path": "anim/wave.vrma", "category": "gesture", "startFrame": 60 },
            "breath": { "id": "breath", "type": "glb", "path": "anim/breath.glb", "category": "idle", "bodyPart": "lower", "preload": true }
        }"#;
        let registry = AnimationRegistry::from_json_slice(json).expect("parse registry");
        assert_eq!(registry.len(), 2);
        let wave = registry.get("wave").expect("wave");
        assert_eq!(wave.format, AssetFormat::Vrma);
        assert_eq!(wave.trim_range(), Some(FrameRange { start: Some(60), end: None }));
        let breath = registry.get("breath").expect("breath");
        assert_eq!(breath.region(), BodyRegion::Lower);
        assert_eq!(registry.candidates(AnimationCategory::Idle, BodyRegion::Lower).len(), 1);
        assert!(registry.candidates(AnimationCategory::Idle, BodyRegion::Full).is_empty());
    }

    #[test]
    fn register_replaces_existing_definition() {
        let mut registry =
            AnimationRegistry::new([AnimationDefinition::new("idle", AssetFormat::Glb, "a.glb")]);
        registry.register(AnimationDefinition::new("idle", AssetFormat::Glb, "b.glb"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("idle").map(|d| d.path.as_str()), Some("b.glb"));
    }

    #[test]
    fn validation_flags_inverted_trim_and_missing_idle() {
        let registry = AnimationRegistry::new([AnimationDefinition::new("nod", AssetFormat::Vrma, "nod.vrma")
            .with_frames(Some(40), Some(10))]);
        let issues = registry.validate();
        assert!(issues.iter().any(|issue| issue.id == "nod" && issue.severity == RegistryIssueSeverity::Error));
        assert!(issues.iter().any(|issue| issue.message.contains("no idle animation")));
    }

    #[test]
    fn builtin_registry_parses_and_has_preloaded_idle() {
        let registry = AnimationRegistry::builtin().expect("builtin registry");
        assert!(registry.contains("standingIdle"));
        assert!(registry
            .preload_set()
            .any(|definition| definition.category == AnimationCategory::Idle));
        assert!(registry
            .validate()
            .iter()
            .all(|issue| issue.severity != RegistryIssueSeverity::Error));
    }

    #[test]
    fn builtin_registry_only_ships_decodable_formats() {
        let registry = AnimationRegistry::builtin().expect("builtin registry");
        let fbx: Vec<&str> =
            registry.iter().filter(|d| d.format == AssetFormat::Fbx).map(|d| d.id.as_str()).collect();
        assert!(fbx.is_empty(), "built-in FBX entries: {fbx:?}");
    }
}
