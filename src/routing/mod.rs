//! Cost-aware routing of edit requests.
//!
//! # Flow
//!
//! ```text
//! EditRequest
//!      │
//!      ▼
//! ┌──────────────────┐
//! │   Cache check    │  ← hit: return, no credits, no providers
//! └────────┬─────────┘
//!          │ miss
//!          ▼
//! ┌──────────────────┐
//! │     Classify     │  ← keyword groups, override wins
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Affordability   │  ← RequiresUpgrade(reason)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Candidates    │  ← cheapest first, on-device before remote
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Attempt(i)      │  ← consume, invoke, refund on failure
//! └────────┬─────────┘
//!          ▼
//!   Success | Failure
//! ```
//!
//! A provider failure of any kind (network, timeout, malformed output)
//! refunds the credit and advances to the next distinct provider. Only
//! exhaustion reaches the caller.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ironlens::routing::{Router, RouterConfig};
//!
//! let router = Router::new(registry, ledger, cache, RouterConfig::default());
//! match router.route(EditRequest::new(image).with_prompt("remove the background")).await {
//!     RoutingResult::Success { provider_id, .. } => println!("edited by {provider_id}"),
//!     RoutingResult::RequiresUpgrade(reason) => println!("upgrade: {reason}"),
//!     RoutingResult::Failure(failure) => eprintln!("{failure}"),
//! }
//! ```

mod decision;
mod router;

pub use decision::{
    AttemptOutcome, AttemptRecord, RouteMetadata, RoutingDecision, RoutingFailure, RoutingResult,
    UpgradeReason,
};
pub use router::{Router, RouterConfig, shape_options};
