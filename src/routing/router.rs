//! The routing loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use super::decision::{
    AttemptOutcome, AttemptRecord, RouteMetadata, RoutingDecision, RoutingFailure, RoutingResult,
    UpgradeReason,
};
use crate::billing::{CostClass, CreditLedger, Debit, Entitlement, Tier, UsageStats, cost_class_for};
use crate::cache::{CachedResult, ROUTED_PROVIDER, ResultCache};
use crate::edit::{EditOptions, EditRequest, EditTask, classify};
use crate::error::ProviderError;
use crate::providers::{Provider, ProviderRegistry};

/// Router tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Timeout for providers that do not declare their own.
    pub provider_timeout: Duration,
    /// Most provider invocations per request. Skipped candidates do not
    /// count. Zero is treated as one.
    pub max_attempts: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Outcome of affordability and candidate selection.
enum Selection {
    Candidates(Vec<Arc<dyn Provider>>),
    Upgrade(UpgradeReason),
    NoProviders,
}

/// Routes edit requests to providers.
///
/// Constructed with its collaborators; every in-flight request shares the
/// same ledger and cache.
pub struct Router {
    registry: ProviderRegistry,
    ledger: Arc<CreditLedger>,
    cache: Arc<ResultCache>,
    config: RouterConfig,
    requests_routed: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl Router {
    pub fn new(
        registry: ProviderRegistry,
        ledger: Arc<CreditLedger>,
        cache: Arc<ResultCache>,
        config: RouterConfig,
    ) -> Self {
        tracing::debug!(providers = ?registry.ids(), "Router initialized");
        // At least one invocation, or a routable request would report an upgrade.
        let config = RouterConfig {
            max_attempts: config.max_attempts.max(1),
            ..config
        };
        Self {
            registry,
            ledger,
            cache,
            config,
            requests_routed: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    /// Route one request to completion.
    ///
    /// Dropping the returned future while a provider call is in flight
    /// refunds the credit taken for that call.
    pub async fn route(&self, request: EditRequest) -> RoutingResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("route", request_id = %request_id);
        self.route_inner(request, request_id).instrument(span).await
    }

    /// What [`route`](Self::route) would try, without calling providers or
    /// touching credits.
    pub fn plan(&self, request: &EditRequest) -> RoutingDecision {
        let tier = self.ledger.tier();
        let task = classify(request.prompt_text(), request.task);
        match self.select(task, tier, request.provider.as_deref()) {
            Selection::Upgrade(reason) => RoutingDecision::RequiresUpgrade { reason },
            Selection::NoProviders => RoutingDecision::NoProvidersAvailable,
            Selection::Candidates(candidates) => {
                let affordable: Vec<String> = candidates
                    .iter()
                    .filter(|p| self.ledger.available(tier, p.cost_class()).is_none_or(|n| n > 0))
                    .map(|p| p.id().to_string())
                    .collect();
                if affordable.is_empty() {
                    RoutingDecision::RequiresUpgrade {
                        reason: self.upgrade_reason(tier, candidates[0].cost_class()),
                    }
                } else {
                    RoutingDecision::Route {
                        providers: affordable,
                    }
                }
            }
        }
    }

    /// Whether the active tier can afford `task`.
    pub fn can_perform(&self, task: EditTask) -> bool {
        self.ledger.can_perform(task)
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.ledger.usage_stats()
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn requests_routed(&self) -> usize {
        self.requests_routed.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    // --- Private helpers ---

    async fn route_inner(&self, request: EditRequest, request_id: Uuid) -> RoutingResult {
        let started = Instant::now();
        self.requests_routed.fetch_add(1, Ordering::Relaxed);

        let tier = self.ledger.tier();
        let options = shape_options(&request.options, self.ledger.entitlements().for_tier(tier));
        let prompt = request.prompt_text();

        // Cache check runs before classification and never touches credits.
        let key = self.cache.key(
            &request.image,
            prompt,
            request.provider.as_deref().unwrap_or(ROUTED_PROVIDER),
            request.task,
            &options,
        );
        if let Some(entry) = self.cache.get(&key).await {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::info!(provider = %entry.provider_id, "Served from cache");
            return RoutingResult::Success {
                output: entry.artifact,
                provider_id: entry.provider_id,
                elapsed: started.elapsed(),
                metadata: RouteMetadata {
                    request_id,
                    task: None,
                    cost_class: entry.cost_class,
                    cache_hit: true,
                    attempts: Vec::new(),
                },
            };
        }

        let task = classify(prompt, request.task);
        let class = cost_class_for(task, tier);
        tracing::debug!(task = %task, tier = %tier, class = %class, "Classified request");

        let candidates = match self.select(task, tier, request.provider.as_deref()) {
            Selection::Candidates(candidates) => candidates,
            Selection::Upgrade(reason) => {
                tracing::info!(task = %task, reason = %reason, "Upgrade required");
                return RoutingResult::RequiresUpgrade(reason);
            }
            Selection::NoProviders => {
                tracing::warn!(task = %task, "No provider supports task");
                return RoutingResult::Failure(RoutingFailure::NoProvidersAvailable { task });
            }
        };

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut invocations = 0usize;
        let mut last_error: Option<ProviderError> = None;
        let mut first_skipped: Option<CostClass> = None;

        for provider in &candidates {
            if invocations >= self.config.max_attempts {
                tracing::debug!(max_attempts = self.config.max_attempts, "Attempt budget exhausted");
                break;
            }

            let provider_class = provider.cost_class();
            let attempt_started = Instant::now();
            let Some((debit, snapshot)) = self.ledger.try_consume(tier, provider_class) else {
                tracing::debug!(provider = %provider.id(), class = %provider_class, "Skipped: no credit");
                first_skipped.get_or_insert(provider_class);
                attempts.push(AttemptRecord {
                    provider_id: provider.id().to_string(),
                    cost_class: provider_class,
                    outcome: AttemptOutcome::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            };

            // Guard first: cancellation during the write below must refund.
            let guard = DebitGuard::new(Arc::clone(&self.ledger), debit);
            if let Some(snapshot) = snapshot {
                self.ledger.persist(snapshot).await;
            }
            invocations += 1;
            let result = self.invoke(provider.as_ref(), &request, task, &options).await;
            let elapsed = attempt_started.elapsed();

            match result {
                Ok(output) => {
                    guard.commit();
                    tracing::info!(
                        provider = %provider.id(),
                        class = %provider_class,
                        elapsed_ms = elapsed.as_millis() as u64,
                        attempts = invocations,
                        "Edit routed"
                    );
                    attempts.push(AttemptRecord {
                        provider_id: provider.id().to_string(),
                        cost_class: provider_class,
                        outcome: AttemptOutcome::Succeeded,
                        elapsed,
                    });
                    self.cache.set(
                        &key,
                        CachedResult {
                            artifact: output.clone(),
                            provider_id: provider.id().to_string(),
                            cost_class: provider_class,
                            processing_duration: elapsed,
                        },
                    );
                    return RoutingResult::Success {
                        output,
                        provider_id: provider.id().to_string(),
                        elapsed: started.elapsed(),
                        metadata: RouteMetadata {
                            request_id,
                            task: Some(task),
                            cost_class: provider_class,
                            cache_hit: false,
                            attempts,
                        },
                    };
                }
                Err(e) => {
                    guard.refund().await;
                    tracing::warn!(provider = %provider.id(), error = %e, "Provider failed, trying next");
                    attempts.push(AttemptRecord {
                        provider_id: provider.id().to_string(),
                        cost_class: provider_class,
                        outcome: AttemptOutcome::Failed(e.clone()),
                        elapsed,
                    });
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last_error) => {
                tracing::error!(attempts = invocations, error = %last_error, "All providers failed");
                RoutingResult::Failure(RoutingFailure::AllProvidersFailed {
                    last_error,
                    attempts: invocations,
                })
            }
            None => {
                // Every candidate was skipped for lack of credit.
                let reason = self.upgrade_reason(tier, first_skipped.unwrap_or(class));
                tracing::info!(task = %task, reason = %reason, "Upgrade required");
                RoutingResult::RequiresUpgrade(reason)
            }
        }
    }

    /// Affordability gate then candidate selection.
    ///
    /// A free-class candidate always makes the request routable. Otherwise
    /// the policy cost class for the task must have credit left.
    fn select(&self, task: EditTask, tier: Tier, pinned: Option<&str>) -> Selection {
        let candidates = self.registry.candidates(task, pinned);
        let class = cost_class_for(task, tier);
        let has_free = candidates.iter().any(|p| !p.cost_class().is_metered());

        if !has_free && self.ledger.available(tier, class) == Some(0) {
            return Selection::Upgrade(self.upgrade_reason(tier, class));
        }
        if candidates.is_empty() {
            return Selection::NoProviders;
        }
        Selection::Candidates(candidates)
    }

    fn upgrade_reason(&self, tier: Tier, class: CostClass) -> UpgradeReason {
        let remaining = self.ledger.available(tier, class).unwrap_or(0);
        match class {
            CostClass::Premium
                if self.ledger.capacity(tier, class) == Some(0) && self.ledger.addon_balance() == 0 =>
            {
                UpgradeReason::PremiumFeatureRequired {
                    required: 1,
                    remaining,
                }
            }
            CostClass::Premium => UpgradeReason::InsufficientPremiumCredits {
                required: 1,
                remaining,
            },
            _ => UpgradeReason::InsufficientBudgetCredits {
                required: 1,
                remaining,
            },
        }
    }

    async fn invoke(
        &self,
        provider: &dyn Provider,
        request: &EditRequest,
        task: EditTask,
        options: &EditOptions,
    ) -> Result<crate::edit::EditedImage, ProviderError> {
        let timeout = provider.timeout().unwrap_or(self.config.provider_timeout);
        tracing::debug!(provider = %provider.id(), timeout_ms = timeout.as_millis() as u64, "Invoking provider");
        match tokio::time::timeout(timeout, provider.invoke(&request.image, task, options)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("requests_routed", &self.requests_routed())
            .finish()
    }
}

/// Apply the tier's entitlement to requested options: clamp size, force the
/// watermark where required, and set the priority lane.
pub fn shape_options(options: &EditOptions, entitlement: &Entitlement) -> EditOptions {
    EditOptions {
        target_size: options
            .target_size
            .map(|size| size.clamp_to(entitlement.max_resolution)),
        quality: options.quality,
        watermark: options.watermark || !entitlement.watermark_free,
        priority: entitlement.priority,
    }
}

/// Holds a debit while its provider call is in flight. Dropped without
/// `commit` or `refund`, it refunds.
struct DebitGuard {
    ledger: Arc<CreditLedger>,
    debit: Option<Debit>,
}

impl DebitGuard {
    fn new(ledger: Arc<CreditLedger>, debit: Debit) -> Self {
        Self {
            ledger,
            debit: Some(debit),
        }
    }

    fn commit(mut self) {
        self.debit = None;
    }

    async fn refund(mut self) {
        if let Some(debit) = self.debit.take() {
            self.ledger.refund(&debit).await;
        }
    }
}

impl Drop for DebitGuard {
    fn drop(&mut self) {
        if let Some(debit) = self.debit.take() {
            tracing::info!(class = %debit.class, pool = ?debit.pool, "Request cancelled, refunding credit");
            self.ledger.refund_detached(&debit);
        }
    }
}
