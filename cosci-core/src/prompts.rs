//! Prompt templates for every backend call.
//!
//! Each template opens with a fixed header line so transcripts (and test
//! doubles) can tell the calls apart.

use crate::decision::{GenerationMode, MetaReviewFocus, ReviewDepth};
use crate::state::{Hypothesis, PlanConfig};
use crate::supervisor::metrics::{BaseStatistics, EnhancedMetrics};
use std::fmt::Write;

pub const SUPERVISOR_HEADER: &str = "You are the supervisor of an iterative hypothesis research loop.";
pub const BOOTSTRAP_HEADER: &str = "Turn the research goal below into a research plan.";
pub const DOMAIN_HEADER: &str = "Classify the research goal into exactly one domain.";
pub const OBSERVATION_HEADER: &str = "Extract factual observations from the literature below.";
pub const GENERATION_HEADER: &str = "Propose one new research hypothesis.";
pub const DEBATE_HEADER: &str = "Simulate a debate between domain experts that ends in one new research hypothesis.";
pub const REFLECTION_HEADER: &str = "Critically review the hypothesis below.";
pub const COMPARISON_HEADER: &str = "Compare the two hypotheses below and pick the stronger one.";
pub const WEAKNESS_HEADER: &str = "Name the single most serious weakness of the hypothesis below.";
pub const REFINE_HEADER: &str = "Rewrite the hypothesis below so that it resolves the stated weakness.";
pub const COMBINE_HEADER: &str = "Merge the two parent hypotheses below into one stronger hypothesis.";
pub const ANALOGY_HEADER: &str = "Use analogical reasoning to propose one new research hypothesis.";
pub const META_REVIEW_HEADER: &str = "Perform a meta-review of all reviews collected so far.";

const HYPOTHESIS_FORMAT: &str = "Format your answer as markdown that starts with a line \
`### Proposed Hypothesis: <short title>` followed by the statement, the rationale \
and a proposed experiment.";

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn plan_section(plan: &PlanConfig) -> String {
    format!(
        "Preferences: {}\nAttributes:\n{}\nConstraints:\n{}\nEvaluation criteria:\n{}",
        if plan.preferences.is_empty() {
            "(none)"
        } else {
            plan.preferences.as_str()
        },
        bullet_list(&plan.attributes),
        bullet_list(&plan.constraints),
        bullet_list(&plan.evaluation_criteria),
    )
}

/// Policy prompt. `hypotheses` should be the current pool (top entries are listed).
pub fn supervisor_prompt(
    goal: &str,
    plan: &PlanConfig,
    stats: &BaseStatistics,
    metrics: &EnhancedMetrics,
    hypotheses: &[Hypothesis],
    review_summary: Option<&str>,
    max_iterations: u32,
) -> String {
    let stats_json = serde_json::to_string_pretty(stats).unwrap_or_default();
    let metrics_json = serde_json::to_string_pretty(metrics).unwrap_or_default();

    let mut pool = String::new();
    for h in hypotheses.iter().take(10) {
        let _ = writeln!(
            pool,
            "- id={} rating={:.0} reviewed={} ranked={} title={}",
            h.id,
            h.rating,
            h.is_reviewed,
            h.is_ranked,
            h.title()
        );
    }
    if pool.is_empty() {
        pool.push_str("- (no hypotheses yet)\n");
    }

    format!(
        "{SUPERVISOR_HEADER}\n\n\
         Research goal: {goal}\n\n\
         {plan}\n\n\
         Iteration {iteration} of at most {max_iterations}.\n\n\
         Statistics:\n{stats_json}\n\n\
         Progress metrics:\n{metrics_json}\n\n\
         Hypothesis pool (highest rated first):\n{pool}\n\
         Latest meta-review:\n{summary}\n\n\
         Choose the next stage. Available stages and their parameters:\n\
         - generate: {{\"quantity\": int, \"focus_area\": str, \"generation_mode\": \"standard\"|\"debate\", \"debate_max_turns\": int}}\n\
         - reflect: {{\"priority_hypothesis_ids\": [id], \"review_depth\": \"standard\"|\"deep\"|\"deep_verification\"}}\n\
         - rank: {{\"newly_reviewed_ids\": [id]}}\n\
         - evolve: {{\"target_hypothesis_ids\": [id], \"strategy\": \"refine\"|\"combine\"|\"analogical\"}}\n\
         - meta_review: {{\"scope\": \"full_history\"|\"last_3_iterations\", \"focus\": \"identify_patterns\"|\"suggest_new_directions\"}}\n\
         - terminate: {{\"reason\": \"breakthrough_achieved\"|\"stagnation_limit\"|\"user_requested\", \"final_hypothesis_id\": id}}\n\n\
         Unreviewed hypotheses must be reflected on before anything else; reviewed but unranked \
         hypotheses must be ranked before generating, evolving or summarizing.\n\n\
         Respond with a single JSON object:\n\
         {{\"next_stage\": \"...\", \"parameters\": {{...}}, \"rationale\": \"...\", \"strategic_context\": {{...}}}}",
        plan = plan_section(plan),
        iteration = stats.iteration_count + 1,
        summary = review_summary.unwrap_or("(none)"),
    )
}

/// Prefix a failed policy prompt with a correction.
pub fn corrective_prompt(error: &str, original: &str) -> String {
    format!(
        "Your previous answer could not be used: {error}.\n\
         Reply with ONLY a JSON object containing \"next_stage\" and a non-empty \
         \"parameters\" object that matches the schema of that stage.\n\n{original}"
    )
}

pub fn bootstrap_prompt(goal: &str) -> String {
    format!(
        "{BOOTSTRAP_HEADER}\n\n\
         Research goal: {goal}\n\n\
         Respond with a JSON object:\n\
         {{\"preferences\": str, \"attributes\": [str], \"constraints\": [str], \"evaluation_criteria\": [str]}}"
    )
}

pub fn domain_prompt(goal: &str, labels: &[&str]) -> String {
    format!(
        "{DOMAIN_HEADER}\n\n\
         Research goal: {goal}\n\n\
         Allowed domains: {}\n\n\
         Respond with a JSON object: {{\"domain\": \"<one allowed domain>\"}}",
        labels.join(", ")
    )
}

pub fn observation_prompt(goal: &str, domain: &str, hypotheses: &[&Hypothesis], literature: &str) -> String {
    let context = hypotheses
        .iter()
        .map(|h| format!("- {}", h.title()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{OBSERVATION_HEADER}\n\n\
         Research goal: {goal}\nDomain: {domain}\n\n\
         Hypotheses under review:\n{context}\n\n\
         Literature:\n{literature}\n\n\
         Respond with a JSON object:\n\
         {{\"observations\": [{{\"statement\": str, \"source\": str, \"relevance\": str}}]}}"
    )
}

/// Inputs of a generation call.
#[derive(Debug, Clone)]
pub struct GenerationPrompt<'a> {
    pub goal: &'a str,
    pub plan: &'a PlanConfig,
    pub focus_area: &'a str,
    pub top_hypotheses: &'a [&'a Hypothesis],
    pub meta_review: Option<String>,
    pub mode: GenerationMode,
    pub debate_turns: u32,
}

pub fn generation_prompt(input: &GenerationPrompt<'_>) -> String {
    let mut context = String::new();
    for h in input.top_hypotheses {
        let _ = writeln!(context, "- {} (rating {:.0})", h.title(), h.rating);
        if let Some(review) = h.latest_review()
            && !review.feedback.summary.is_empty()
        {
            let _ = writeln!(context, "  review: {}", review.feedback.summary);
        }
    }
    if context.is_empty() {
        context.push_str("- (none yet)\n");
    }
    let focus = if input.focus_area.is_empty() {
        "(open)"
    } else {
        input.focus_area
    };
    let rationale = input.meta_review.as_deref().unwrap_or("(no meta-review yet)");

    let opening = match input.mode {
        GenerationMode::Standard => GENERATION_HEADER.to_string(),
        GenerationMode::Debate => format!(
            "{DEBATE_HEADER}\nThe debate lasts at most {} turns; after the last turn the \
             moderator states the single hypothesis the experts converged on.",
            input.debate_turns
        ),
    };

    format!(
        "{opening}\n\n\
         Research goal: {goal}\n\n\
         {plan}\n\n\
         Focus area: {focus}\n\n\
         Strongest existing hypotheses:\n{context}\n\
         Meta-review guidance:\n{rationale}\n\n\
         The new hypothesis must differ from the existing ones. {HYPOTHESIS_FORMAT}",
        goal = input.goal,
        plan = plan_section(input.plan),
    )
}

/// Inputs of a review call.
#[derive(Debug, Clone)]
pub struct ReflectionPrompt<'a> {
    pub goal: &'a str,
    pub plan: &'a PlanConfig,
    pub observations: &'a str,
    pub strategic_context: &'a str,
    pub calibration: &'a str,
    pub depth: ReviewDepth,
}

pub fn reflection_prompt(input: &ReflectionPrompt<'_>, hypothesis: &Hypothesis) -> String {
    let depth_instructions = match input.depth {
        ReviewDepth::Standard => String::new(),
        ReviewDepth::Deep => "Argue both as a proponent and as a skeptic before scoring.\n".to_string(),
        ReviewDepth::DeepVerification => "Argue both as a proponent and as a skeptic before scoring. \
             Then decompose the hypothesis into its core assumptions and verify each one; report \
             them in a \"deep_verification\" object with an \"assumptions\" list.\n"
            .to_string(),
    };
    format!(
        "{REFLECTION_HEADER}\n\n\
         Research goal: {goal}\n\n\
         {plan}\n\n\
         Strategic context: {context}\n\n\
         Observations:\n{observations}\n\n\
         Calibration examples:\n{calibration}\n\n\
         Hypothesis:\n{content}\n\n\
         {depth_instructions}\
         Classify how the hypothesis relates to the observations as one of: missing_piece, \
         already_explained, other_explanations_more_likely, neutral, disproved.\n\n\
         Respond with a JSON object:\n\
         {{\"scores\": {{\"overall\": 1-10, \"novelty\": 1-10, \"validity\": 1-10, \"testability\": 1-10, \"specificity\": 1-10}}, \
         \"strengths\": [str], \"weaknesses\": [str], \"suggestions\": [str], \"summary\": str, \"classification\": str}}",
        goal = input.goal,
        plan = plan_section(input.plan),
        context = input.strategic_context,
        observations = input.observations,
        calibration = input.calibration,
        content = hypothesis.content,
    )
}

pub fn comparison_prompt(goal: &str, criteria: &[String], first: &Hypothesis, second: &Hypothesis, debate: bool) -> String {
    let format_note = if debate {
        "The two are closely rated: hold a short debate, one advocate per hypothesis, before judging.\n\n"
    } else {
        ""
    };
    format!(
        "{COMPARISON_HEADER}\n\n\
         Research goal: {goal}\n\n\
         Evaluation criteria:\n{criteria}\n\n\
         {format_note}\
         Hypothesis 1:\n{a}\n\n\
         Hypothesis 2:\n{b}\n\n\
         Respond with a JSON object:\n\
         {{\"winner\": 1 or 2, \"confidence\": \"high\"|\"medium\"|\"low\", \"rationale\": str}}",
        criteria = bullet_list(criteria),
        a = first.content,
        b = second.content,
    )
}

pub fn weakness_prompt(goal: &str, hypothesis: &Hypothesis) -> String {
    format!(
        "{WEAKNESS_HEADER}\n\n\
         Research goal: {goal}\n\n\
         Hypothesis:\n{}\n\n\
         Answer in at most three sentences.",
        hypothesis.content
    )
}

pub fn refine_prompt(goal: &str, hypothesis: &Hypothesis, weakness: &str) -> String {
    format!(
        "{REFINE_HEADER}\n\n\
         Research goal: {goal}\n\n\
         Weakness:\n{weakness}\n\n\
         Hypothesis:\n{}\n\n\
         {HYPOTHESIS_FORMAT}",
        hypothesis.content
    )
}

pub fn combine_prompt(goal: &str, first: &Hypothesis, second: &Hypothesis) -> String {
    format!(
        "{COMBINE_HEADER}\n\n\
         Research goal: {goal}\n\n\
         Parent A:\n{}\n\n\
         Parent B:\n{}\n\n\
         Keep the strongest mechanism of each parent. {HYPOTHESIS_FORMAT}",
        first.content, second.content
    )
}

pub fn analogical_prompt(goal: &str, inspirations: &[&Hypothesis], avoid: &[&Hypothesis]) -> String {
    let list = |items: &[&Hypothesis]| {
        if items.is_empty() {
            return "- (none)".to_string();
        }
        items
            .iter()
            .map(|h| format!("- {}", h.title()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "{ANALOGY_HEADER}\n\n\
         Research goal: {goal}\n\n\
         Draw on a mechanism from a different field that is analogous to these hypotheses:\n{}\n\n\
         Avoid the directions of these weak hypotheses:\n{}\n\n\
         {HYPOTHESIS_FORMAT}",
        list(inspirations),
        list(avoid)
    )
}

pub fn meta_review_prompt(
    goal: &str,
    plan: &PlanConfig,
    focus: MetaReviewFocus,
    quantitative: &str,
    reviews: &str,
) -> String {
    let focus_line = match focus {
        MetaReviewFocus::IdentifyPatterns => "Focus on recurring strengths and weaknesses across reviews.",
        MetaReviewFocus::SuggestNewDirections => "Focus on unexplored directions the next hypotheses should take.",
    };
    format!(
        "{META_REVIEW_HEADER}\n\n\
         Research goal: {goal}\n\n\
         {plan}\n\n\
         {focus_line}\n\n\
         Quantitative summary:\n{quantitative}\n\n\
         Reviews:\n{reviews}\n\n\
         Respond with a JSON object:\n\
         {{\"recurring_strengths\": [str], \"recurring_weaknesses\": [str], \"new_directions\": [str], \"summary\": str}}",
        plan = plan_section(plan),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_distinct() {
        let headers = [
            SUPERVISOR_HEADER,
            BOOTSTRAP_HEADER,
            DOMAIN_HEADER,
            OBSERVATION_HEADER,
            GENERATION_HEADER,
            DEBATE_HEADER,
            REFLECTION_HEADER,
            COMPARISON_HEADER,
            WEAKNESS_HEADER,
            REFINE_HEADER,
            COMBINE_HEADER,
            ANALOGY_HEADER,
            META_REVIEW_HEADER,
        ];
        for (i, a) in headers.iter().enumerate() {
            for b in &headers[i + 1..] {
                assert!(!a.contains(b) && !b.contains(a), "{a} / {b}");
            }
        }
    }

    #[test]
    fn test_generation_prompt_debate_mentions_turns() {
        let plan = PlanConfig::default();
        let prompt = generation_prompt(&GenerationPrompt {
            goal: "goal",
            plan: &plan,
            focus_area: "",
            top_hypotheses: &[],
            meta_review: None,
            mode: GenerationMode::Debate,
            debate_turns: 4,
        });
        assert!(prompt.starts_with(DEBATE_HEADER));
        assert!(prompt.contains("at most 4 turns"));
        assert!(!prompt.contains(GENERATION_HEADER));
    }

    #[test]
    fn test_comparison_prompt_debate_note() {
        let a = Hypothesis::new("A");
        let b = Hypothesis::new("B");
        assert!(comparison_prompt("g", &[], &a, &b, true).contains("short debate"));
        assert!(!comparison_prompt("g", &[], &a, &b, false).contains("short debate"));
    }

    #[test]
    fn test_supervisor_prompt_lists_pool() {
        let h = Hypothesis::new("### Proposed Hypothesis: Listed title\nbody");
        let prompt = supervisor_prompt(
            "goal",
            &PlanConfig::default(),
            &BaseStatistics::default(),
            &EnhancedMetrics::default(),
            std::slice::from_ref(&h),
            None,
            20,
        );
        assert!(prompt.starts_with(SUPERVISOR_HEADER));
        assert!(prompt.contains("Listed title"));
        assert!(prompt.contains(&h.id));
    }
}
