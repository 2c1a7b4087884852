//! Monthly credit ledger.
//!
//! Tracks two monthly quotas (budget, premium) plus a non-expiring addon
//! balance of premium credits. All counter mutation happens under one mutex,
//! so two requests can never both see the last credit as available.
//!
//! Every access first reconciles the stored period against the clock. On a
//! new calendar month both monthly counters reset to zero; the addon balance
//! is untouched. No background scheduler is involved.
//!
//! Consumption hands back a [`Debit`] naming the exact pool that was drawn
//! from, and [`CreditLedger::refund`] puts the credit back into that pool.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::store::{LedgerSnapshot, LedgerStore, MemoryLedgerStore};
use super::{CostClass, Entitlement, Entitlements, Tier, cost_class_for};
use crate::clock::Clock;
use crate::edit::EditTask;
use crate::error::LedgerError;

/// The pool a credit was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebitPool {
    /// Free-class work; nothing was drawn.
    Unmetered,
    MonthlyBudget,
    MonthlyPremium,
    Addon,
}

/// Receipt for one consumed credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debit {
    pub tier: Tier,
    pub class: CostClass,
    pub pool: DebitPool,
    /// Period the monthly counters were in when the credit was taken.
    pub period: String,
}

/// Used / remaining / capacity for one quota pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUsage {
    pub used: u32,
    pub remaining: u32,
    pub capacity: u32,
}

/// Point-in-time usage for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub tier: Tier,
    pub period: String,
    pub budget: PoolUsage,
    pub premium: PoolUsage,
    pub addon_premium_balance: u32,
}

struct LedgerState {
    snapshot: LedgerSnapshot,
    tier: Tier,
}

/// Credit ledger shared by every in-flight request.
pub struct CreditLedger {
    state: Mutex<LedgerState>,
    entitlements: Entitlements,
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl CreditLedger {
    /// Create a ledger with fresh counters for the current month.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        entitlements: Entitlements,
        tier: Tier,
    ) -> Self {
        let snapshot = LedgerSnapshot::empty(clock.period());
        Self::from_snapshot(snapshot, store, clock, entitlements, tier)
    }

    /// Create a ledger from the store's last snapshot, or fresh counters if
    /// the store is empty.
    pub async fn open(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        entitlements: Entitlements,
        tier: Tier,
    ) -> Result<Self, LedgerError> {
        let snapshot = match store.load().await? {
            Some(snapshot) => snapshot,
            None => LedgerSnapshot::empty(clock.period()),
        };
        tracing::debug!(
            period = %snapshot.period,
            budget_used = snapshot.budget_used,
            premium_used = snapshot.premium_used,
            addon = snapshot.addon_premium_balance,
            "Opened credit ledger"
        );
        Ok(Self::from_snapshot(snapshot, store, clock, entitlements, tier))
    }

    /// Ledger backed by an in-process store.
    pub fn in_memory(clock: Arc<dyn Clock>, entitlements: Entitlements, tier: Tier) -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()), clock, entitlements, tier)
    }

    fn from_snapshot(
        snapshot: LedgerSnapshot,
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        entitlements: Entitlements,
        tier: Tier,
    ) -> Self {
        Self {
            state: Mutex::new(LedgerState { snapshot, tier }),
            entitlements,
            store,
            clock,
        }
    }

    // --- Inputs from the purchase subsystem ---

    pub fn tier(&self) -> Tier {
        self.lock().tier
    }

    /// Switch the active tier (purchase, restore or expiry).
    pub fn set_tier(&self, tier: Tier) {
        let mut state = self.lock();
        if state.tier != tier {
            tracing::info!(from = %state.tier, to = %tier, "Tier changed");
            state.tier = tier;
        }
    }

    /// The active tier's entitlement.
    pub fn entitlement(&self) -> Entitlement {
        self.entitlements.for_tier(self.tier()).clone()
    }

    pub fn entitlements(&self) -> &Entitlements {
        &self.entitlements
    }

    /// Credit purchased addon premium credits.
    pub async fn grant_addon(&self, credits: u32) {
        let snapshot = {
            let mut state = self.lock();
            self.reconcile(&mut state);
            let snap = &mut state.snapshot;
            snap.addon_premium_balance = snap.addon_premium_balance.saturating_add(credits);
            snap.revision += 1;
            snap.clone()
        };
        tracing::info!(
            credits,
            balance = snapshot.addon_premium_balance,
            "Granted addon credits"
        );
        self.persist(snapshot).await;
    }

    // --- Queries ---

    /// Monthly cap for a tier and class; `None` means unbounded.
    pub fn capacity(&self, tier: Tier, class: CostClass) -> Option<u32> {
        self.entitlements.for_tier(tier).cap(class)
    }

    /// Remaining monthly quota, floored at zero; `None` means unbounded.
    /// Excludes the addon balance.
    pub fn remaining(&self, tier: Tier, class: CostClass) -> Option<u32> {
        let mut state = self.lock();
        self.reconcile(&mut state);
        self.remaining_locked(&state.snapshot, tier, class)
    }

    /// Non-expiring premium credits.
    pub fn addon_balance(&self) -> u32 {
        let mut state = self.lock();
        self.reconcile(&mut state);
        state.snapshot.addon_premium_balance
    }

    /// Everything spendable for a class: monthly remainder plus, for premium,
    /// the addon balance.
    pub fn available(&self, tier: Tier, class: CostClass) -> Option<u32> {
        let mut state = self.lock();
        self.reconcile(&mut state);
        self.available_locked(&state.snapshot, tier, class)
    }

    /// Whether the active tier can afford `task` at its policy cost class.
    pub fn can_perform(&self, task: EditTask) -> bool {
        let tier = self.tier();
        let class = cost_class_for(task, tier);
        self.available(tier, class).is_none_or(|n| n > 0)
    }

    pub fn usage_stats(&self) -> UsageStats {
        let mut state = self.lock();
        self.reconcile(&mut state);
        let tier = state.tier;
        let snap = &state.snapshot;
        let pool = |used: u32, class: CostClass| {
            let capacity = self.capacity(tier, class).unwrap_or(u32::MAX);
            PoolUsage {
                used,
                remaining: capacity.saturating_sub(used),
                capacity,
            }
        };
        UsageStats {
            tier,
            period: snap.period.clone(),
            budget: pool(snap.budget_used, CostClass::Budget),
            premium: pool(snap.premium_used, CostClass::Premium),
            addon_premium_balance: snap.addon_premium_balance,
        }
    }

    /// Copy of the persisted state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut state = self.lock();
        self.reconcile(&mut state);
        state.snapshot.clone()
    }

    // --- Mutation ---

    /// Take one credit of `class` for `tier`.
    ///
    /// Premium draws from the addon balance before the monthly quota, since
    /// addon credits never expire and the monthly quota does. Returns `None`
    /// without side effects when nothing is left.
    pub async fn consume(&self, tier: Tier, class: CostClass) -> Option<Debit> {
        let (debit, snapshot) = self.try_consume(tier, class)?;
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }
        Some(debit)
    }

    /// Take one credit without writing it to the store.
    ///
    /// Returns the debit and, when counters changed, the snapshot the caller
    /// must hand to [`CreditLedger::persist`]. Callers that may be cancelled
    /// mid-write take ownership of the debit before awaiting anything.
    pub fn try_consume(&self, tier: Tier, class: CostClass) -> Option<(Debit, Option<LedgerSnapshot>)> {
        let mut state = self.lock();
        self.reconcile(&mut state);
        let period = state.snapshot.period.clone();

        let pool = match class {
            CostClass::Free => DebitPool::Unmetered,
            CostClass::Budget => {
                if self.remaining_locked(&state.snapshot, tier, class)? == 0 {
                    return None;
                }
                state.snapshot.budget_used += 1;
                DebitPool::MonthlyBudget
            }
            CostClass::Premium => {
                if state.snapshot.addon_premium_balance > 0 {
                    state.snapshot.addon_premium_balance -= 1;
                    DebitPool::Addon
                } else if self.remaining_locked(&state.snapshot, tier, class)? > 0 {
                    state.snapshot.premium_used += 1;
                    DebitPool::MonthlyPremium
                } else {
                    return None;
                }
            }
        };

        let debit = Debit {
            tier,
            class,
            pool,
            period,
        };
        if pool == DebitPool::Unmetered {
            return Some((debit, None));
        }

        state.snapshot.revision += 1;
        tracing::debug!(
            tier = %tier,
            class = %class,
            pool = ?pool,
            "Consumed credit"
        );
        Some((debit, Some(state.snapshot.clone())))
    }

    /// Return a credit to the pool it was taken from.
    pub async fn refund(&self, debit: &Debit) {
        if let Some(snapshot) = self.apply_refund(debit) {
            self.persist(snapshot).await;
        }
    }

    /// Refund without awaiting persistence. Usable from `Drop`: counters are
    /// restored immediately and the write is spawned on the current runtime
    /// when there is one.
    pub fn refund_detached(self: &Arc<Self>, debit: &Debit) {
        let Some(snapshot) = self.apply_refund(debit) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let ledger = Arc::clone(self);
                handle.spawn(async move { ledger.persist(snapshot).await });
            }
            Err(_) => {
                tracing::debug!("No runtime for ledger persistence; next write will carry the refund");
            }
        }
    }

    /// Write the current state to the store.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let snapshot = {
            let mut state = self.lock();
            self.reconcile(&mut state);
            state.snapshot.revision += 1;
            state.snapshot.clone()
        };
        self.store.save(&snapshot).await
    }

    /// Write a snapshot, logging rather than failing the caller.
    pub async fn persist(&self, snapshot: LedgerSnapshot) {
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::warn!(error = %e, revision = snapshot.revision, "Failed to persist ledger");
        }
    }

    // --- Private helpers ---

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset monthly counters when the calendar month has moved on.
    fn reconcile(&self, state: &mut LedgerState) {
        let current = self.clock.period();
        let snap = &mut state.snapshot;
        if snap.period == current {
            return;
        }
        tracing::info!(
            from = %snap.period,
            to = %current,
            budget_used = snap.budget_used,
            premium_used = snap.premium_used,
            "Ledger period rolled over"
        );
        snap.budget_used = 0;
        snap.premium_used = 0;
        snap.period = current;
        snap.revision += 1;
    }

    fn remaining_locked(&self, snap: &LedgerSnapshot, tier: Tier, class: CostClass) -> Option<u32> {
        let cap = self.capacity(tier, class)?;
        let used = match class {
            CostClass::Free => 0,
            CostClass::Budget => snap.budget_used,
            CostClass::Premium => snap.premium_used,
        };
        Some(cap.saturating_sub(used))
    }

    fn available_locked(&self, snap: &LedgerSnapshot, tier: Tier, class: CostClass) -> Option<u32> {
        let remaining = self.remaining_locked(snap, tier, class)?;
        Some(match class {
            CostClass::Premium => remaining.saturating_add(snap.addon_premium_balance),
            _ => remaining,
        })
    }

    fn apply_refund(&self, debit: &Debit) -> Option<LedgerSnapshot> {
        let mut state = self.lock();
        self.reconcile(&mut state);
        let snap = &mut state.snapshot;

        let monthly = matches!(debit.pool, DebitPool::MonthlyBudget | DebitPool::MonthlyPremium);
        if monthly && debit.period != snap.period {
            // Counters were reset since the debit; the credit is already back.
            tracing::debug!(
                debit_period = %debit.period,
                period = %snap.period,
                "Refund for a closed period ignored"
            );
            return None;
        }

        match debit.pool {
            DebitPool::Unmetered => return None,
            DebitPool::MonthlyBudget => {
                if snap.budget_used == 0 {
                    contract_violation(debit);
                    return None;
                }
                snap.budget_used -= 1;
            }
            DebitPool::MonthlyPremium => {
                if snap.premium_used == 0 {
                    contract_violation(debit);
                    return None;
                }
                snap.premium_used -= 1;
            }
            DebitPool::Addon => {
                snap.addon_premium_balance = snap.addon_premium_balance.saturating_add(1);
            }
        }

        snap.revision += 1;
        tracing::debug!(class = %debit.class, pool = ?debit.pool, "Refunded credit");
        Some(snap.clone())
    }
}

/// A refund for a pool that holds nothing to refund means a caller refunded
/// twice or refunded without consuming.
fn contract_violation(debit: &Debit) {
    tracing::error!(
        class = %debit.class,
        pool = ?debit.pool,
        "Ledger refund for a pool that was never debited"
    );
    debug_assert!(false, "refund for a pool that was never debited: {:?}", debit);
}

impl std::fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CreditLedger")
            .field("tier", &state.tier)
            .field("period", &state.snapshot.period)
            .field("budget_used", &state.snapshot.budget_used)
            .field("premium_used", &state.snapshot.premium_used)
            .field("addon", &state.snapshot.addon_premium_balance)
            .finish()
    }
}
