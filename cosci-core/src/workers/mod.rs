//! Stage workers.
//!
//! Each worker holds a [`Brain`], reads a snapshot of the research state and
//! returns a [`StatePatch`](crate::state::StatePatch). Workers never fail the
//! round: backend and parse failures end up in the patch's `errors`.

pub mod bootstrap;
pub mod evolve;
pub mod generate;
pub mod meta_review;
pub mod observations;
pub mod reflect;

pub use bootstrap::Bootstrapper;
pub use evolve::Evolver;
pub use generate::Generator;
pub use meta_review::MetaReviewer;
pub use observations::{ObservationAggregator, infer_domain_from_goal};
pub use reflect::Reflector;

use crate::brain::Brain;

/// One instance of every stage worker, sharing a backend.
#[derive(Debug, Clone)]
pub struct StageWorkers {
    pub bootstrapper: Bootstrapper,
    pub observations: ObservationAggregator,
    pub generator: Generator,
    pub reflector: Reflector,
    pub evolver: Evolver,
    pub meta_reviewer: MetaReviewer,
}

impl StageWorkers {
    pub fn new(brain: Brain) -> Self {
        Self {
            bootstrapper: Bootstrapper::new(brain.clone()),
            observations: ObservationAggregator::new(brain.clone()),
            generator: Generator::new(brain.clone()),
            reflector: Reflector::new(brain.clone()),
            evolver: Evolver::new(brain.clone()),
            meta_reviewer: MetaReviewer::new(brain),
        }
    }
}

/// Truncate to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
