//! Provider adapters and the registry the router draws candidates from.
//!
//! An adapter owns its own network or model details. The router only sees
//! what it declares: supported tasks, cost class, where it runs, and an
//! ordering priority among peers of the same cost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::billing::CostClass;
use crate::edit::{EditOptions, EditTask, EditedImage, SourceImage};
use crate::error::ProviderError;

/// Where a provider does its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OnDevice,
    Remote,
}

impl ProviderKind {
    /// Tie-break rank among same-cost providers; on-device goes first.
    fn rank(&self) -> u8 {
        match self {
            ProviderKind::OnDevice => 0,
            ProviderKind::Remote => 1,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OnDevice => write!(f, "on_device"),
            ProviderKind::Remote => write!(f, "remote"),
        }
    }
}

/// An image-edit capability. Implementations must be safe to invoke
/// concurrently for distinct requests.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, recorded in results and cache entries.
    fn id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn cost_class(&self) -> CostClass;

    /// Lower sorts first among providers with the same cost and kind.
    fn priority(&self) -> u32 {
        100
    }

    fn supports(&self, task: EditTask) -> bool;

    /// Per-call timeout overriding the router default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn invoke(
        &self,
        image: &SourceImage,
        task: EditTask,
        options: &EditOptions,
    ) -> Result<EditedImage, ProviderError>;
}

/// Registered providers in declaration order.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. A later registration with an existing id replaces it
    /// in place.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        if let Some(slot) = self.providers.iter_mut().find(|p| p.id() == provider.id()) {
            tracing::warn!(provider = %provider.id(), "Replacing provider with duplicate id");
            *slot = provider;
        } else {
            self.providers.push(provider);
        }
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers supporting `task`, cheapest first.
    ///
    /// Order: cost class weight, then on-device before remote, then declared
    /// priority, then registration order. With `pinned` set only that
    /// provider is considered.
    pub fn candidates(&self, task: EditTask, pinned: Option<&str>) -> Vec<Arc<dyn Provider>> {
        let mut ranked: Vec<(usize, &Arc<dyn Provider>)> = self
            .providers
            .iter()
            .enumerate()
            .filter(|(_, p)| pinned.is_none_or(|id| p.id() == id))
            .filter(|(_, p)| p.supports(task))
            .collect();

        ranked.sort_by_key(|(index, p)| (p.cost_class().weight(), p.kind().rank(), p.priority(), *index));
        ranked.into_iter().map(|(_, p)| Arc::clone(p)).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixed {
        id: &'static str,
        kind: ProviderKind,
        class: CostClass,
        priority: u32,
        tasks: &'static [EditTask],
    }

    #[async_trait]
    impl Provider for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn cost_class(&self) -> CostClass {
            self.class
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn supports(&self, task: EditTask) -> bool {
            self.tasks.contains(&task)
        }

        async fn invoke(
            &self,
            _image: &SourceImage,
            _task: EditTask,
            _options: &EditOptions,
        ) -> Result<EditedImage, ProviderError> {
            Ok(EditedImage::new(self.id.as_bytes().to_vec(), "image/png"))
        }
    }

    fn fixed(
        id: &'static str,
        kind: ProviderKind,
        class: CostClass,
        priority: u32,
        tasks: &'static [EditTask],
    ) -> Arc<dyn Provider> {
        Arc::new(Fixed {
            id,
            kind,
            class,
            priority,
            tasks,
        })
    }

    const ALL: &[EditTask] = &EditTask::ALL;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new()
            .with(fixed("cloud-premium", ProviderKind::Remote, CostClass::Premium, 1, ALL))
            .with(fixed("cloud-b", ProviderKind::Remote, CostClass::Budget, 20, ALL))
            .with(fixed("cloud-a", ProviderKind::Remote, CostClass::Budget, 10, ALL))
            .with(fixed("device-budget", ProviderKind::OnDevice, CostClass::Budget, 50, ALL))
            .with(fixed(
                "device-free",
                ProviderKind::OnDevice,
                CostClass::Free,
                100,
                &[EditTask::Enhancement, EditTask::BackgroundRemoval],
            ))
    }

    fn ids(candidates: &[Arc<dyn Provider>]) -> Vec<&str> {
        candidates.iter().map(|p| p.id()).collect()
    }

    #[test]
    fn candidates_sorted_by_cost_then_kind_then_priority() {
        let registry = registry();
        let candidates = registry.candidates(EditTask::Enhancement, None);
        assert_eq!(
            ids(&candidates),
            vec!["device-free", "device-budget", "cloud-a", "cloud-b", "cloud-premium"]
        );
    }

    #[test]
    fn unsupported_providers_are_filtered() {
        let registry = registry();
        let candidates = registry.candidates(EditTask::Artistic, None);
        assert!(!ids(&candidates).contains(&"device-free"));
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn equal_rank_keeps_registration_order() {
        let registry = ProviderRegistry::new()
            .with(fixed("first", ProviderKind::Remote, CostClass::Budget, 5, ALL))
            .with(fixed("second", ProviderKind::Remote, CostClass::Budget, 5, ALL));
        assert_eq!(ids(&registry.candidates(EditTask::Style, None)), vec!["first", "second"]);
    }

    #[test]
    fn pinning_restricts_candidates() {
        let registry = registry();
        let candidates = registry.candidates(EditTask::Cleanup, Some("cloud-b"));
        assert_eq!(ids(&candidates), vec!["cloud-b"]);
        assert!(registry.candidates(EditTask::Cleanup, Some("missing")).is_empty());
    }

    #[test]
    fn duplicate_ids_replace_in_place() {
        let mut registry = registry();
        registry.register(fixed("cloud-b", ProviderKind::Remote, CostClass::Premium, 0, ALL));
        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry.get("cloud-b").map(|p| p.cost_class()),
            Some(CostClass::Premium)
        );
    }
}
