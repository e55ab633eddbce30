use std::collections::HashMap;
use std::sync::Arc;

use foundation::FeatureId;
use parking_lot::Mutex;

use crate::category::FlowCategory;
use crate::error::ApplyMiss;

/// Addresses one feature of a loaded vector source.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FeatureRef<'a> {
    pub source: &'a str,
    pub source_layer: &'a str,
    pub id: FeatureId,
}

/// Mutable per-feature attributes pushed in overlay mode.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FeatureState {
    pub flow: f64,
    pub category: FlowCategory,
}

/// Capability surface of the map engine the synchronization engine writes to.
///
/// The engine never depends on a concrete renderer; the source-ready event is
/// delivered separately through `SyncHandle::surface_ready`.
pub trait RenderSurface: Send {
    fn has_source(&self, source: &str) -> bool;

    fn is_source_loaded(&self, source: &str) -> bool;

    /// Replaces the state of one feature. Fails with `ApplyMiss` when the
    /// feature is not part of the currently loaded source.
    fn set_feature_state(
        &mut self,
        feature: &FeatureRef<'_>,
        state: FeatureState,
    ) -> Result<(), ApplyMiss>;
}

impl<S: RenderSurface + ?Sized> RenderSurface for Box<S> {
    fn has_source(&self, source: &str) -> bool {
        (**self).has_source(source)
    }

    fn is_source_loaded(&self, source: &str) -> bool {
        (**self).is_source_loaded(source)
    }

    fn set_feature_state(
        &mut self,
        feature: &FeatureRef<'_>,
        state: FeatureState,
    ) -> Result<(), ApplyMiss> {
        (**self).set_feature_state(feature, state)
    }
}

/// Shared handle: the paint side keeps a clone and reads under the lock.
impl<S: RenderSurface> RenderSurface for Arc<Mutex<S>> {
    fn has_source(&self, source: &str) -> bool {
        self.lock().has_source(source)
    }

    fn is_source_loaded(&self, source: &str) -> bool {
        self.lock().is_source_loaded(source)
    }

    fn set_feature_state(
        &mut self,
        feature: &FeatureRef<'_>,
        state: FeatureState,
    ) -> Result<(), ApplyMiss> {
        self.lock().set_feature_state(feature, state)
    }
}

/// In-memory render surface holding one vector source.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    source_id: String,
    source_layer: String,
    loaded: bool,
    features: HashMap<FeatureId, Option<FeatureState>>,
}

impl MemorySurface {
    pub fn new(source_id: impl Into<String>, source_layer: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_layer: source_layer.into(),
            loaded: false,
            features: HashMap::new(),
        }
    }

    pub fn with_features(mut self, ids: impl IntoIterator<Item = FeatureId>) -> Self {
        self.insert_features(ids);
        self
    }

    pub fn insert_features(&mut self, ids: impl IntoIterator<Item = FeatureId>) {
        for id in ids {
            self.features.entry(id).or_insert(None);
        }
    }

    pub fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.features.contains_key(&id)
    }

    pub fn state(&self, id: FeatureId) -> Option<FeatureState> {
        self.features.get(&id).copied().flatten()
    }

    /// Number of features that have received any state.
    pub fn styled_count(&self) -> usize {
        self.features.values().filter(|s| s.is_some()).count()
    }
}

impl RenderSurface for MemorySurface {
    fn has_source(&self, source: &str) -> bool {
        self.source_id == source
    }

    fn is_source_loaded(&self, source: &str) -> bool {
        self.has_source(source) && self.loaded
    }

    fn set_feature_state(
        &mut self,
        feature: &FeatureRef<'_>,
        state: FeatureState,
    ) -> Result<(), ApplyMiss> {
        let miss = ApplyMiss {
            feature: feature.id,
        };
        if feature.source != self.source_id || feature.source_layer != self.source_layer {
            return Err(miss);
        }
        match self.features.get_mut(&feature.id) {
            Some(slot) => {
                *slot = Some(state);
                Ok(())
            }
            None => Err(miss),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureRef, FeatureState, MemorySurface, RenderSurface};
    use crate::category::FlowCategory;
    use foundation::FeatureId;

    fn state(flow: f64) -> FeatureState {
        FeatureState {
            flow,
            category: FlowCategory::Low,
        }
    }

    #[test]
    fn unknown_feature_is_a_miss() {
        let mut s = MemorySurface::new("rivers", "reaches").with_features([FeatureId(1)]);
        let hit = FeatureRef {
            source: "rivers",
            source_layer: "reaches",
            id: FeatureId(1),
        };
        let miss = FeatureRef {
            id: FeatureId(2),
            ..hit
        };
        assert!(s.set_feature_state(&hit, state(3.0)).is_ok());
        assert_eq!(s.set_feature_state(&miss, state(3.0)).unwrap_err().feature, FeatureId(2));
        assert_eq!(s.state(FeatureId(1)), Some(state(3.0)));
        assert_eq!(s.styled_count(), 1);
    }

    #[test]
    fn wrong_layer_is_a_miss() {
        let mut s = MemorySurface::new("rivers", "reaches").with_features([FeatureId(1)]);
        let other = FeatureRef {
            source: "rivers",
            source_layer: "lakes",
            id: FeatureId(1),
        };
        assert!(s.set_feature_state(&other, state(1.0)).is_err());
        assert_eq!(s.state(FeatureId(1)), None);
    }

    #[test]
    fn loaded_only_after_flag() {
        let mut s = MemorySurface::new("rivers", "reaches");
        assert!(s.has_source("rivers"));
        assert!(!s.is_source_loaded("rivers"));
        s.set_loaded(true);
        assert!(s.is_source_loaded("rivers"));
        assert!(!s.is_source_loaded("roads"));
    }
}
