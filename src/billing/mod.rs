//! Subscription tiers, cost classes and the monthly credit ledger.
//!
//! # Pricing model
//!
//! ```text
//! (EditTask, Tier) ──policy──▶ CostClass ──▶ quota pool
//!                                 free     → unmetered
//!                                 budget   → monthly budget quota
//!                                 premium  → addon balance, then monthly premium quota
//! ```
//!
//! Every [`Tier`] has exactly one [`Entitlement`]. Tier changes replace the
//! whole record; entitlements are never edited in place.

pub mod ledger;
pub mod store;

pub use ledger::{CreditLedger, Debit, DebitPool, UsageStats};
pub use store::{JsonLedgerStore, LedgerSnapshot, LedgerStore, MemoryLedgerStore};

use serde::{Deserialize, Serialize};

use crate::edit::EditTask;

/// Subscription level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Pro => write!(f, "pro"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" | "premium" | "paid" => Ok(Self::Pro),
            _ => Err(format!("invalid tier '{}', expected: free, pro", s)),
        }
    }
}

/// Pricing category, ordered by price ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostClass {
    Free,
    Budget,
    Premium,
}

impl CostClass {
    /// Sort weight used when ordering candidates.
    pub fn weight(&self) -> u8 {
        match self {
            CostClass::Free => 0,
            CostClass::Budget => 1,
            CostClass::Premium => 2,
        }
    }

    /// Whether consuming this class draws down a quota.
    pub fn is_metered(&self) -> bool {
        !matches!(self, CostClass::Free)
    }
}

impl std::fmt::Display for CostClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostClass::Free => write!(f, "free"),
            CostClass::Budget => write!(f, "budget"),
            CostClass::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for CostClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "budget" => Ok(Self::Budget),
            "premium" => Ok(Self::Premium),
            _ => Err(format!(
                "invalid cost class '{}', expected: free, budget, premium",
                s
            )),
        }
    }
}

/// Fixed (task, tier) → cost class policy table.
pub fn cost_class_for(task: EditTask, tier: Tier) -> CostClass {
    use EditTask::*;

    match (tier, task) {
        (_, Enhancement | BackgroundRemoval | Cleanup) => CostClass::Budget,
        (Tier::Free, Style) => CostClass::Premium,
        (Tier::Pro, Style) => CostClass::Budget,
        (_, Artistic | Creative | Advanced) => CostClass::Premium,
    }
}

/// Per-tier capacity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Monthly budget-class operations.
    pub budget_quota: u32,
    /// Monthly premium-class operations.
    pub premium_quota: u32,
    /// Longest output edge in pixels.
    pub max_resolution: u32,
    /// Providers may serve this tier from a priority lane.
    pub priority: bool,
    /// Results are delivered without a watermark.
    pub watermark_free: bool,
}

impl Entitlement {
    pub fn free() -> Self {
        Self {
            budget_quota: 50,
            premium_quota: 0,
            max_resolution: 2048,
            priority: false,
            watermark_free: false,
        }
    }

    pub fn pro() -> Self {
        Self {
            budget_quota: 500,
            premium_quota: 100,
            max_resolution: 4096,
            priority: true,
            watermark_free: true,
        }
    }

    /// Monthly cap for a cost class; `None` means unbounded.
    pub fn cap(&self, class: CostClass) -> Option<u32> {
        match class {
            CostClass::Free => None,
            CostClass::Budget => Some(self.budget_quota),
            CostClass::Premium => Some(self.premium_quota),
        }
    }
}

/// One entitlement per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    #[serde(default = "Entitlement::free")]
    pub free: Entitlement,
    #[serde(default = "Entitlement::pro")]
    pub pro: Entitlement,
}

impl Default for Entitlements {
    fn default() -> Self {
        Self {
            free: Entitlement::free(),
            pro: Entitlement::pro(),
        }
    }
}

impl Entitlements {
    pub fn for_tier(&self, tier: Tier) -> &Entitlement {
        match tier {
            Tier::Free => &self.free,
            Tier::Pro => &self.pro,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_classes_are_ordered_by_price() {
        assert!(CostClass::Free < CostClass::Budget);
        assert!(CostClass::Budget < CostClass::Premium);
        assert!(CostClass::Free.weight() < CostClass::Premium.weight());
    }

    #[test]
    fn policy_table_is_total() {
        for task in EditTask::ALL {
            for tier in [Tier::Free, Tier::Pro] {
                // never maps a task to the unmetered class
                assert_ne!(cost_class_for(task, tier), CostClass::Free);
            }
        }
    }

    #[test]
    fn policy_table_pins_known_rows() {
        assert_eq!(cost_class_for(EditTask::Enhancement, Tier::Free), CostClass::Budget);
        assert_eq!(cost_class_for(EditTask::BackgroundRemoval, Tier::Free), CostClass::Budget);
        assert_eq!(cost_class_for(EditTask::Style, Tier::Free), CostClass::Premium);
        assert_eq!(cost_class_for(EditTask::Style, Tier::Pro), CostClass::Budget);
        assert_eq!(cost_class_for(EditTask::Advanced, Tier::Pro), CostClass::Premium);
    }

    #[test]
    fn free_class_is_unbounded() {
        assert_eq!(Entitlement::free().cap(CostClass::Free), None);
        assert_eq!(Entitlement::free().cap(CostClass::Budget), Some(50));
        assert_eq!(Entitlement::free().cap(CostClass::Premium), Some(0));
    }

    #[test]
    fn tier_parses() {
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("gold".parse::<Tier>().is_err());
    }
}
