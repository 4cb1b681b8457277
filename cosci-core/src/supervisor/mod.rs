//! Policy engine: picks the next stage each round.
//!
//! One call to [`Supervisor::decide`] per round:
//! 1. **Cap**: at the iteration cap, terminate without asking the backend
//! 2. **Measure**: base statistics plus derived progress metrics
//! 3. **Decide**: backend decision, validated against the stage schemas, one corrective retry
//! 4. **Check**: precedence between reflect, rank and the rest
//! 5. **Account**: improvement tracking, decision history, iteration counter

pub mod engine;
pub mod metrics;
pub mod precedence;

pub use engine::Supervisor;
pub use metrics::{BaseStatistics, EnhancedMetrics, ResearchPhase};
pub use precedence::{PrecedenceViolation, validate_precedence};
