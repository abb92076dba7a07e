//! Lazy, de-duplicating clip cache.
//!
//! Every registry id gets at most one resolution: the first caller runs the
//! fetch/retarget/trim pipeline inside a [`OnceCell`], and concurrent callers for
//! the same id await that same cell. Failures are cached as `None`; nothing in
//! here returns an error to the caller.

use crate::assets::AssetSource;
use crate::config::LoaderConfig;
use crate::registry::{AnimationCategory, AnimationDefinition, AnimationRegistry};
use crate::retarget::{build_clip, ResolvedClip};
use crate::rig::AvatarSkeleton;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

type ClipSlot = Arc<OnceCell<Option<Arc<ResolvedClip>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
    /// At least one idle clip of the preload set resolved.
    pub critical_ready: bool,
    pub critical_error: Option<String>,
}

pub struct ClipLoader {
    registry: Arc<AnimationRegistry>,
    source: Arc<dyn AssetSource>,
    skeleton: RwLock<Option<Arc<dyn AvatarSkeleton>>>,
    frame_rate: f32,
    slots: Mutex<HashMap<Arc<str>, ClipSlot>>,
    states: Mutex<HashMap<Arc<str>, LoadingState>>,
    preload: Mutex<Option<PreloadReport>>,
}

impl ClipLoader {
    pub fn new(registry: Arc<AnimationRegistry>, source: Arc<dyn AssetSource>, config: &LoaderConfig) -> Self {
        Self {
            registry,
            source,
            skeleton: RwLock::new(None),
            frame_rate: config.frame_rate,
            slots: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            preload: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<AnimationRegistry> {
        &self.registry
    }

    /// Binds the avatar clips are retargeted onto. Clips resolved for a previous
    /// avatar are dropped.
    pub fn attach_skeleton(&self, skeleton: Arc<dyn AvatarSkeleton>) {
        *self.skeleton.write() = Some(skeleton);
        self.slots.lock().clear();
        self.states.lock().clear();
        *self.preload.lock() = None;
    }

    pub fn has_skeleton(&self) -> bool {
        self.skeleton.read().is_some()
    }

    pub fn skeleton(&self) -> Option<Arc<dyn AvatarSkeleton>> {
        self.skeleton.read().clone()
    }

    pub async fn resolve(&self, id: &str) -> Option<Arc<ResolvedClip>> {
        let Some(definition) = self.registry.get(id) else {
            warn!(clip = id, "Animation not found in registry");
            return None;
        };
        let Some(skeleton) = self.skeleton() else {
            warn!(clip = id, "Avatar not attached yet; cannot resolve animation");
            return None;
        };
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(Arc::from(id)).or_default())
        };
        slot.get_or_init(|| self.load_uncached(definition, skeleton, &slot)).await.clone()
    }

    async fn load_uncached(
        &self,
        definition: &AnimationDefinition,
        skeleton: Arc<dyn AvatarSkeleton>,
        slot: &ClipSlot,
    ) -> Option<Arc<ResolvedClip>> {
        let id = definition.id.as_str();
        self.set_state(id, slot, LoadingState::Loading);
        debug!(clip = id, path = %definition.path, format = ?definition.format, "Loading animation");
        let result = match self.source.fetch(definition).await {
            Ok(raw) => build_clip(definition, &raw, skeleton.as_ref(), self.frame_rate),
            Err(err) => Err(err),
        };
        match result {
            Ok(clip) => {
                info!(
                    clip = id,
                    duration = clip.duration(),
                    tracks = clip.tracks.len(),
                    region = %clip.region(),
                    "Animation ready"
                );
                self.set_state(id, slot, LoadingState::Loaded);
                Some(Arc::new(clip))
            }
            Err(err) => {
                error!(clip = id, "Failed to load animation: {err:?}");
                self.set_state(id, slot, LoadingState::Failed);
                None
            }
        }
    }

    /// Records `state` only while `slot` is still the cached entry for `id`; a
    /// load finishing after `unload` or `attach_skeleton` leaves no trace.
    fn set_state(&self, id: &str, slot: &ClipSlot, state: LoadingState) {
        let slots = self.slots.lock();
        if slots.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            self.states.lock().insert(Arc::from(id), state);
        } else {
            debug!(clip = id, ?state, "Dropping state of a superseded load");
        }
    }

    /// Cached clip, without triggering a load.
    pub fn get_loaded(&self, id: &str) -> Option<Arc<ResolvedClip>> {
        let slot = self.slots.lock().get(id).cloned()?;
        slot.get().cloned().flatten()
    }

    pub fn loading_state(&self, id: &str) -> LoadingState {
        self.states.lock().get(id).copied().unwrap_or_default()
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.loading_state(id) == LoadingState::Loading
    }

    /// Forgets a cached clip (or cached failure) so the next resolve fetches again.
    pub fn unload(&self, id: &str) -> bool {
        let removed = self.slots.lock().remove(id).is_some();
        if removed {
            self.states.lock().remove(id);
            debug!(clip = id, "Unloaded animation");
        }
        removed
    }

    /// Resolves every definition flagged for preload concurrently and records
    /// whether the avatar has an idle clip to stand on.
    pub async fn preload(&self) -> PreloadReport {
        let definitions: Vec<&AnimationDefinition> = self.registry.preload_set().collect();
        let results = join_all(
            definitions.iter().map(|definition| async move { (*definition, self.resolve(&definition.id).await) }),
        )
        .await;

        let mut report = PreloadReport::default();
        let mut idle_loaded = 0usize;
        for (definition, clip) in results {
            if clip.is_some() {
                if definition.category == AnimationCategory::Idle {
                    idle_loaded += 1;
                }
                report.loaded.push(definition.id.clone());
            } else {
                report.failed.push(definition.id.clone());
            }
        }
        report.critical_ready = idle_loaded > 0;
        if report.critical_ready {
            info!(loaded = report.loaded.len(), "Critical animations ready");
        } else {
            let message = "CRITICAL: no idle animation could be preloaded".to_string();
            error!("{message}");
            report.critical_error = Some(message);
        }
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Failed to preload animations");
        }
        *self.preload.lock() = Some(report.clone());
        report
    }

    pub fn preload_report(&self) -> Option<PreloadReport> {
        self.preload.lock().clone()
    }

    pub fn preloaded_ids(&self) -> Vec<String> {
        self.preload.lock().as_ref().map(|report| report.loaded.clone()).unwrap_or_default()
    }

    pub fn critical_ready(&self) -> bool {
        self.preload.lock().as_ref().is_some_and(|report| report.critical_ready)
    }

    pub fn critical_error(&self) -> Option<String> {
        self.preload.lock().as_ref().and_then(|report| report.critical_error.clone())
    }
}
