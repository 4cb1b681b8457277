//! Stage ordering rules: reviews before ranking, ranking before summaries.

use super::metrics::BaseStatistics;
use crate::state::Stage;
use std::fmt;

/// A chosen stage that skips pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecedenceViolation {
    pub chosen: Stage,
    pub suggested: Stage,
    pub pending: usize,
}

impl fmt::Display for PrecedenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.suggested {
            Stage::Reflect => "unreviewed hypotheses",
            _ => "reviewed hypotheses awaiting ranking",
        };
        write!(
            f,
            "Precedence violation: '{}' chosen with {} {}; suggested '{}'",
            self.chosen, self.pending, what, self.suggested
        )
    }
}

/// Check `stage` against the pending work in `stats`.
///
/// Unreviewed hypotheses allow only reflect or terminate. Otherwise, ranked-pending
/// hypotheses allow only rank or terminate. With nothing pending every stage
/// (meta_review included) is allowed.
pub fn validate_precedence(stage: Stage, stats: &BaseStatistics) -> Option<PrecedenceViolation> {
    let (suggested, pending) = if stats.unreviewed_hypotheses > 0 {
        (Stage::Reflect, stats.unreviewed_hypotheses)
    } else if stats.newly_reviewed_hypotheses > 0 {
        (Stage::Rank, stats.newly_reviewed_hypotheses)
    } else {
        return None;
    };
    if stage == suggested || stage == Stage::Terminate {
        None
    } else {
        Some(PrecedenceViolation {
            chosen: stage,
            suggested,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(unreviewed: usize, newly_reviewed: usize) -> BaseStatistics {
        BaseStatistics {
            unreviewed_hypotheses: unreviewed,
            newly_reviewed_hypotheses: newly_reviewed,
            ..Default::default()
        }
    }

    #[test]
    fn test_unreviewed_requires_reflect() {
        let s = stats(2, 1);
        let violation = validate_precedence(Stage::Rank, &s).unwrap();
        assert_eq!(violation.suggested, Stage::Reflect);
        assert!(violation.to_string().contains("2 unreviewed"));
        assert!(validate_precedence(Stage::Reflect, &s).is_none());
        assert!(validate_precedence(Stage::Terminate, &s).is_none());
    }

    #[test]
    fn test_pending_ranking_requires_rank() {
        let s = stats(0, 3);
        assert_eq!(
            validate_precedence(Stage::MetaReview, &s).map(|v| v.suggested),
            Some(Stage::Rank)
        );
        assert_eq!(
            validate_precedence(Stage::Generate, &s).map(|v| v.suggested),
            Some(Stage::Rank)
        );
        assert!(validate_precedence(Stage::Rank, &s).is_none());
    }

    #[test]
    fn test_nothing_pending_allows_everything() {
        let s = stats(0, 0);
        for stage in Stage::ALL {
            assert!(validate_precedence(stage, &s).is_none());
        }
    }
}
