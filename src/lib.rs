//! IronLens: cost-aware routing of image edits.
//!
//! A request is classified into an [`EditTask`](edit::EditTask), checked
//! against the monthly [`CreditLedger`](billing::CreditLedger), and sent to
//! the cheapest capable [`Provider`](providers::Provider), falling back to
//! the next one on failure. Results are cached by content so repeated work
//! is never billed twice.

pub mod billing;
pub mod cache;
pub mod clock;
pub mod edit;
pub mod error;
pub mod providers;
pub mod routing;
pub mod settings;

pub use billing::{CostClass, CreditLedger, Entitlement, Entitlements, Tier, UsageStats};
pub use cache::{CacheConfig, ResultCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use edit::{EditOptions, EditRequest, EditTask, EditedImage, SourceImage, TargetSize};
pub use error::{Error, ProviderError, Result};
pub use providers::{Provider, ProviderKind, ProviderRegistry};
pub use routing::{Router, RouterConfig, RoutingDecision, RoutingResult, UpgradeReason};
pub use settings::Settings;
