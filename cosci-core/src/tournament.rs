//! Tournament ranking engine.
//!
//! Newly reviewed hypotheses play a handful of pairwise matches judged by the
//! backend. Opponents are drawn from three rating tiers so every target meets
//! strong, average and weak competition; ratings move by Elo with the
//! K-factor scaled by the judge's confidence.

use crate::brain::Brain;
use crate::config::TournamentConfig;
use crate::error::ParseError;
use crate::extract::parse_json_block;
use crate::prompts;
use crate::state::{Hypothesis, HypothesisId, ResearchState, StatePatch};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Which side of a comparison won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    First,
    Second,
}

/// Judge confidence, scaling the K-factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unspecified,
}

impl Confidence {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            "low" => Confidence::Low,
            _ => Confidence::Unspecified,
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            Confidence::High => 1.0,
            Confidence::Medium => 0.66,
            Confidence::Low => 0.33,
            Confidence::Unspecified => 0.5,
        }
    }
}

/// Parsed outcome of one comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchVerdict {
    pub winner: Winner,
    pub confidence: Confidence,
    pub rationale: String,
}

/// Parse a comparison response. `winner` may be `1`/`2` as number or string.
pub fn parse_verdict(text: &str) -> Result<MatchVerdict, ParseError> {
    let block = parse_json_block(text)?;
    let winner = match block.get("winner") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let winner = match winner {
        Some(1) => Winner::First,
        Some(2) => Winner::Second,
        _ => {
            return Err(ParseError::MissingField {
                field: "winner".to_string(),
            });
        }
    };
    let confidence = block
        .get("confidence")
        .and_then(Value::as_str)
        .map(Confidence::from_label)
        .unwrap_or(Confidence::Unspecified);
    let rationale = block
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(MatchVerdict {
        winner,
        confidence,
        rationale,
    })
}

/// Expected score of a player rated `rating` against `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// Elo update for one match. Both new ratings are rounded to whole points.
pub fn elo_update(first: f64, second: f64, winner: Winner, k: f64) -> (f64, f64) {
    let (s1, s2) = match winner {
        Winner::First => (1.0, 0.0),
        Winner::Second => (0.0, 1.0),
    };
    let e1 = expected_score(first, second);
    let e2 = expected_score(second, first);
    (
        (first + k * (s1 - e1)).round(),
        (second + k * (s2 - e2)).round(),
    )
}

/// Pick opponent positions in a pool of `n` opponents sorted by ascending rating.
///
/// One uniform pick from each non-empty tier (top, middle, bottom), then
/// uniform fill-in from the whole pool up to `min(match_count, n)`.
pub fn select_opponents<R: Rng>(
    n: usize,
    match_count: usize,
    allow_duplicates: bool,
    rng: &mut R,
) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let low_end = (n as f64 * 0.33) as usize;
    let mid_end = (n as f64 * 0.66) as usize;
    let tiers = [mid_end..n, low_end..mid_end, 0..low_end];

    let mut picks = Vec::new();
    for tier in tiers {
        if !tier.is_empty() {
            picks.push(rng.gen_range(tier));
        }
    }

    let wanted = match_count.min(n);
    while picks.len() < wanted {
        if allow_duplicates {
            picks.push(rng.gen_range(0..n));
        } else {
            let remaining: Vec<usize> = (0..n).filter(|i| !picks.contains(i)).collect();
            match remaining.choose(rng) {
                Some(&i) => picks.push(i),
                None => break,
            }
        }
    }
    picks
}

/// Runs ranking matches for a set of target hypotheses.
#[derive(Debug, Clone)]
pub struct Tournament {
    brain: Brain,
    config: TournamentConfig,
}

impl Tournament {
    pub fn new(brain: Brain, config: TournamentConfig) -> Self {
        Self { brain, config }
    }

    fn rng(&self, shard_index: usize) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(shard_index as u64)),
            None => StdRng::from_entropy(),
        }
    }

    /// Rank `targets` against the rest of the pool in `state`.
    ///
    /// Returns every hypothesis whose rating or flags changed, with the
    /// re-sort flag set. Unreviewed or unknown targets are skipped.
    pub async fn rank(
        &self,
        state: &ResearchState,
        targets: &[HypothesisId],
        shard_index: usize,
    ) -> StatePatch {
        let mut rng = self.rng(shard_index);
        let mut pool: Vec<Hypothesis> = state.hypotheses.clone();
        let index: HashMap<HypothesisId, usize> = pool
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id.clone(), i))
            .collect();
        let mut touched = BTreeSet::new();
        let mut patch = StatePatch::new();

        for target_id in targets {
            let Some(&target) = index.get(target_id) else {
                warn!(hypothesis_id = %target_id, "Rank target not found");
                patch.push_error(format!("Rank target {} not found", target_id));
                continue;
            };
            if !pool[target].is_reviewed {
                warn!(hypothesis_id = %target_id, "Skipping unreviewed rank target");
                patch.push_error(format!("Rank target {} has not been reviewed", target_id));
                continue;
            }

            let mut opponents: Vec<usize> = (0..pool.len()).filter(|&i| i != target).collect();
            opponents.sort_by(|&a, &b| pool[a].rating.total_cmp(&pool[b].rating));
            let picks = select_opponents(
                opponents.len(),
                self.config.match_count,
                self.config.allow_duplicate_opponents,
                &mut rng,
            );

            for pick in picks {
                let opponent = opponents[pick];
                let criteria = &state.plan_config.evaluation_criteria;
                if let Err(message) = self
                    .play(&mut pool, target, opponent, &state.goal, criteria)
                    .await
                {
                    warn!(hypothesis_id = %target_id, error = %message, "Ranking match failed");
                    patch.push_error(format!("Ranking match error: {}", message));
                    continue;
                }
                touched.insert(opponent);
            }

            pool[target].mark_ranked();
            touched.insert(target);
            info!(
                hypothesis_id = %pool[target].short_id(),
                rating = pool[target].rating,
                shard = shard_index,
                "Hypothesis ranked"
            );
        }

        patch.upserts = touched.into_iter().map(|i| pool[i].clone()).collect();
        patch.sort_by_rating = true;
        patch
    }

    async fn play(
        &self,
        pool: &mut [Hypothesis],
        first: usize,
        second: usize,
        goal: &str,
        criteria: &[String],
    ) -> Result<(), String> {
        let debate = (pool[first].rating - pool[second].rating).abs() < self.config.debate_threshold;
        let prompt = prompts::comparison_prompt(goal, criteria, &pool[first], &pool[second], debate);
        let text = self.brain.invoke(&prompt).await.map_err(|e| e.to_string())?;
        let verdict = parse_verdict(&text).map_err(|e| e.to_string())?;

        let k = self.config.base_k * verdict.confidence.factor();
        let (r1, r2) = elo_update(pool[first].rating, pool[second].rating, verdict.winner, k);
        debug!(
            first = %pool[first].short_id(),
            second = %pool[second].short_id(),
            winner = ?verdict.winner,
            debate,
            k,
            "Match judged"
        );
        pool[first].rating = r1;
        pool[second].rating = r2;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use std::sync::Arc;

    fn reviewed(content: &str, rating: f64) -> Hypothesis {
        let mut h = Hypothesis::new(content);
        h.rating = rating;
        h.is_reviewed = true;
        h
    }

    fn tournament(provider: MockLlmProvider, config: TournamentConfig) -> Tournament {
        Tournament::new(Brain::new(Arc::new(provider), 0.2), config)
    }

    #[test]
    fn test_elo_equal_ratings() {
        assert_eq!(elo_update(1200.0, 1200.0, Winner::First, 32.0), (1216.0, 1184.0));
        assert_eq!(elo_update(1200.0, 1200.0, Winner::Second, 32.0), (1184.0, 1216.0));
    }

    #[test]
    fn test_elo_upset_moves_more() {
        let (underdog, favourite) = elo_update(1000.0, 1400.0, Winner::First, 32.0);
        assert!(underdog - 1000.0 > 16.0);
        assert!(1400.0 - favourite > 16.0);
    }

    #[test]
    fn test_confidence_factors() {
        assert_eq!(Confidence::from_label("HIGH").factor(), 1.0);
        assert_eq!(Confidence::from_label("medium").factor(), 0.66);
        assert_eq!(Confidence::from_label("low").factor(), 0.33);
        assert_eq!(Confidence::from_label("certain").factor(), 0.5);
    }

    #[test]
    fn test_parse_verdict_variants() {
        let v = parse_verdict(r#"{"winner": 2, "confidence": "high", "rationale": "clearer"}"#).unwrap();
        assert_eq!(v.winner, Winner::Second);
        assert_eq!(v.confidence, Confidence::High);

        let v = parse_verdict(r#"Verdict: {"winner": "1"}"#).unwrap();
        assert_eq!(v.winner, Winner::First);
        assert_eq!(v.confidence, Confidence::Unspecified);

        assert!(parse_verdict(r#"{"winner": 3}"#).is_err());
        assert!(parse_verdict("no idea").is_err());
    }

    #[test]
    fn test_select_opponents_tiers_and_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        let picks = select_opponents(9, 3, true, &mut rng);
        assert_eq!(picks.len(), 3);
        assert!((5..9).contains(&picks[0]));
        assert!((2..5).contains(&picks[1]));
        assert!((0..2).contains(&picks[2]));

        assert_eq!(select_opponents(1, 3, true, &mut rng), vec![0]);
        assert!(select_opponents(0, 3, true, &mut rng).is_empty());
    }

    #[test]
    fn test_select_opponents_without_duplicates() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut picks = select_opponents(2, 3, false, &mut rng);
            assert_eq!(picks.len(), 2);
            picks.sort();
            assert_eq!(picks, vec![0, 1]);
        }
    }

    #[tokio::test]
    async fn test_rank_single_hypothesis_has_no_opponents() {
        let provider = MockLlmProvider::new();
        let t = tournament(provider, TournamentConfig::default());
        let mut state = ResearchState::new("goal");
        let h = reviewed("only", 1200.0);
        state.hypotheses.push(h.clone());

        let patch = t.rank(&state, &[h.id.clone()], 0).await;
        assert_eq!(patch.upserts.len(), 1);
        assert!(patch.upserts[0].is_ranked);
        assert_eq!(patch.upserts[0].rating, 1200.0);
        assert!(patch.sort_by_rating);
    }

    #[tokio::test]
    async fn test_rank_updates_both_players() {
        let provider = MockLlmProvider::with_handler(|_| r#"{"winner": 1, "confidence": "high"}"#.into());
        let t = tournament(
            provider,
            TournamentConfig {
                match_count: 1,
                seed: Some(3),
                ..Default::default()
            },
        );
        let mut state = ResearchState::new("goal");
        let target = reviewed("target", 1200.0);
        let opponent = reviewed("opponent", 1200.0);
        state.hypotheses = vec![target.clone(), opponent.clone()];

        let patch = t.rank(&state, &[target.id.clone()], 0).await;
        state.apply(patch);
        assert_eq!(state.hypotheses[0].id, target.id);
        assert_eq!(state.hypotheses[0].rating, 1216.0);
        assert!(state.hypotheses[0].is_ranked);
        assert_eq!(state.hypotheses[1].rating, 1184.0);
        assert!(!state.hypotheses[1].is_ranked);
    }

    #[tokio::test]
    async fn test_failed_match_is_logged_and_skipped() {
        let provider = MockLlmProvider::new();
        provider.queue_error(LlmError::Timeout { timeout_secs: 30 });
        let t = tournament(
            provider,
            TournamentConfig {
                match_count: 1,
                ..Default::default()
            },
        );
        let mut state = ResearchState::new("goal");
        let target = reviewed("target", 1200.0);
        state.hypotheses = vec![target.clone(), reviewed("other", 1200.0)];

        let patch = t.rank(&state, &[target.id.clone()], 0).await;
        assert_eq!(patch.errors.len(), 1);
        assert!(patch.errors[0].starts_with("Ranking match error"));
        let ranked = patch.upserts.iter().find(|h| h.id == target.id).unwrap();
        assert!(ranked.is_ranked);
        assert_eq!(ranked.rating, 1200.0);
    }

    #[tokio::test]
    async fn test_unreviewed_target_is_not_ranked() {
        let t = tournament(MockLlmProvider::new(), TournamentConfig::default());
        let mut state = ResearchState::new("goal");
        let fresh = Hypothesis::new("fresh");
        state.hypotheses = vec![fresh.clone()];
        let patch = t.rank(&state, &[fresh.id.clone()], 0).await;
        assert!(patch.upserts.is_empty());
        assert_eq!(patch.errors.len(), 1);
    }
}
