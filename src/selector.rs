use crate::registry::{AnimationCategory, AnimationRegistry};
use crate::rig::BodyRegion;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSlot {
    pub current: Option<String>,
    pub previous: Option<String>,
}

/// Random clip picker for one category, tracked per body region.
///
/// Pure selection: it never loads or plays anything.
pub struct ClipSelector<R: Rng = StdRng> {
    registry: Arc<AnimationRegistry>,
    category: AnimationCategory,
    rng: R,
    slots: [SelectionSlot; 3],
}

impl ClipSelector<StdRng> {
    pub fn new(registry: Arc<AnimationRegistry>, category: AnimationCategory) -> Self {
        Self::with_rng(registry, category, StdRng::from_entropy())
    }

    pub fn idle(registry: Arc<AnimationRegistry>) -> Self {
        Self::new(registry, AnimationCategory::Idle)
    }

    pub fn talking(registry: Arc<AnimationRegistry>) -> Self {
        Self::new(registry, AnimationCategory::Talking)
    }
}

impl<R: Rng> ClipSelector<R> {
    pub fn with_rng(registry: Arc<AnimationRegistry>, category: AnimationCategory, rng: R) -> Self {
        Self { registry, category, rng, slots: Default::default() }
    }

    pub fn category(&self) -> AnimationCategory {
        self.category
    }

    pub fn candidate_ids(&self, region: BodyRegion) -> Vec<String> {
        self.registry.candidates(self.category, region).into_iter().map(|definition| definition.id.clone()).collect()
    }

    /// Picks a clip other than the region's current one whenever an alternative exists.
    pub fn next(&mut self, region: BodyRegion) -> Option<String> {
        let candidates = self.candidate_ids(region);
        let slot = &self.slots[region.index()];
        let pool: Vec<&String> = match slot.current.as_deref() {
            Some(current) if candidates.len() >= 2 => {
                candidates.iter().filter(|id| id.as_str() != current).collect()
            }
            _ => candidates.iter().collect(),
        };
        let chosen = (*pool.choose(&mut self.rng)?).clone();
        let slot = &mut self.slots[region.index()];
        slot.previous = slot.current.replace(chosen.clone());
        Some(chosen)
    }

    /// Uniform pick with no exclusion; used for the first clip of a session.
    pub fn initial(&mut self, region: BodyRegion) -> Option<String> {
        let candidates = self.candidate_ids(region);
        let chosen = candidates.choose(&mut self.rng)?.clone();
        self.slots[region.index()].current = Some(chosen.clone());
        Some(chosen)
    }

    pub fn set_current(&mut self, region: BodyRegion, id: impl Into<String>) {
        let slot = &mut self.slots[region.index()];
        slot.previous = slot.current.replace(id.into());
    }

    pub fn current(&self, region: BodyRegion) -> Option<&str> {
        self.slots[region.index()].current.as_deref()
    }

    pub fn previous(&self, region: BodyRegion) -> Option<&str> {
        self.slots[region.index()].previous.as_deref()
    }

    pub fn cleanup(&mut self) {
        self.slots = Default::default();
    }
}
