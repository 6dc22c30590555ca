//! Coordination of two-leg swaps across chains
//!
//! The orchestrator:
//! 1. Accepts swap requests and creates the source escrow
//! 2. Folds escrow events from both chains into each swap record
//! 3. Creates, funds and completes the destination escrow within the timelock margin
//! 4. Falls back to cancellation and refund once a leg can no longer finish

pub mod engine;
pub mod planner;
pub mod registry;
pub mod route;
pub mod scheduler;

#[cfg(test)]
mod scenarios;

pub use engine::{OrchestratorConfig, SwapOrchestrator};
pub use registry::{SwapHandle, SwapRegistry};
pub use route::{RouteAdvisor, RouteContext, RouteRecommendation, RouteResolver, StaticRouteAdvisor};
pub use scheduler::{Backoff, RetryScheduler};
