//! Fitness Scoring
//!
//! Tools compete on observed behavior. The score is a weighted sum of five
//! components, each normalized to [0, 1]:
//!
//!   success rate, token efficiency (code size proxy), latency,
//!   adoption (unique agents, log-scaled), freshness (inactivity decay)
//!
//! Scores are clamped to [0, 1] and rounded to four decimals. A tool whose
//! score falls under the delist threshold after enough real uses is
//! removed from the active registry.

use chrono::Utc;

use crate::config::FitnessConfig;
use crate::models::Tool;

pub struct FitnessScorer {
    config: FitnessConfig,
}

impl FitnessScorer {
    pub fn new(config: FitnessConfig) -> Self {
        Self { config }
    }

    /// Weighted fitness for a tool, in [0, 1], 4-decimal precision.
    pub fn calculate(&self, tool: &Tool) -> f64 {
        let score = self.config.weight_success_rate * success_rate(tool)
            + self.config.weight_token_efficiency * token_efficiency(tool)
            + self.config.weight_latency * latency_score(tool)
            + self.config.weight_adoption * adoption_velocity(tool)
            + self.config.weight_freshness * self.freshness(tool);
        round4(score.clamp(0.0, 1.0))
    }

    /// A low score only delists once the tool has a real usage record.
    pub fn should_delist(&self, tool: &Tool) -> bool {
        self.calculate(tool) < self.config.delist_threshold
            && tool.total_uses >= self.config.delist_min_uses
    }

    fn freshness(&self, tool: &Tool) -> f64 {
        let reference = tool.last_used_at.unwrap_or(tool.created_at);
        let days_inactive = (Utc::now() - reference).num_seconds() as f64 / 86_400.0;
        if days_inactive <= self.config.decay_days {
            return 1.0;
        }
        let excess = days_inactive - self.config.decay_days;
        (-0.05 * excess).exp().max(0.0)
    }
}

/// Neutral 0.5 until the tool has been used.
fn success_rate(tool: &Tool) -> f64 {
    if tool.total_uses == 0 {
        return 0.5;
    }
    tool.successful_uses as f64 / tool.total_uses as f64
}

/// Code size as a proxy for token cost. 100 chars or less scores 1.0,
/// 10000+ scores 0.1, linear in between.
fn token_efficiency(tool: &Tool) -> f64 {
    let len = tool.code.len() as f64;
    if len <= 100.0 {
        1.0
    } else if len >= 10_000.0 {
        0.1
    } else {
        1.0 - 0.9 * (len - 100.0) / 9_900.0
    }
}

/// Banded inverse of mean execution time; 0.5 when unknown.
fn latency_score(tool: &Tool) -> f64 {
    let ms = tool.avg_execution_time_ms;
    if ms <= 0.0 {
        0.5
    } else if ms < 100.0 {
        1.0
    } else if ms < 1_000.0 {
        0.7
    } else if ms < 5_000.0 {
        0.4
    } else {
        0.1
    }
}

/// log2(agents + 1) / log2(100), capped at 1.0.
fn adoption_velocity(tool: &Tool) -> f64 {
    if tool.unique_agents <= 0 {
        return 0.0;
    }
    (((tool.unique_agents + 1) as f64).log2() / 100f64.log2()).min(1.0)
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scorer() -> FitnessScorer {
        FitnessScorer::new(FitnessConfig::default())
    }

    fn tool() -> Tool {
        Tool::new(
            "t".into(),
            "def t(): pass".into(),
            "d".into(),
            "t()".into(),
        )
    }

    #[test]
    fn unused_tool_scores_mid_range() {
        let score = scorer().calculate(&tool());
        // Neutral success, small code, unknown latency, no adoption, fresh:
        // 0.35*0.5 + 0.25*1.0 + 0.20*0.5 + 0.10*0.0 + 0.10*1.0
        assert!((score - 0.625).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped_and_rounded() {
        let mut t = tool();
        t.total_uses = 3;
        t.successful_uses = 1;
        let score = scorer().calculate(&t);
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(score, round4(score));
    }

    #[test]
    fn perfect_heavily_used_tool_scores_high() {
        let mut t = tool();
        t.total_uses = 200;
        t.successful_uses = 200;
        t.unique_agents = 99;
        t.avg_execution_time_ms = 50.0;
        t.last_used_at = Some(Utc::now());
        let score = scorer().calculate(&t);
        assert!(score > 0.95, "score: {score}");
    }

    #[test]
    fn failures_drag_the_score_down() {
        let mut good = tool();
        good.total_uses = 100;
        good.successful_uses = 95;
        let mut bad = good.clone();
        bad.successful_uses = 10;
        assert!(scorer().calculate(&good) > scorer().calculate(&bad));
    }

    #[test]
    fn large_code_is_less_efficient() {
        let mut small = tool();
        small.code = "x".repeat(80);
        let mut large = tool();
        large.code = "x".repeat(12_000);
        assert!(scorer().calculate(&small) > scorer().calculate(&large));
    }

    #[test]
    fn latency_bands() {
        let mut t = tool();
        for (ms, expected) in [(50.0, 1.0), (500.0, 0.7), (3_000.0, 0.4), (9_000.0, 0.1)] {
            t.avg_execution_time_ms = ms;
            assert_eq!(latency_score(&t), expected);
        }
    }

    #[test]
    fn stale_tools_decay() {
        let mut fresh = tool();
        fresh.last_used_at = Some(Utc::now());
        let mut stale = tool();
        stale.created_at = Utc::now() - Duration::days(120);
        stale.last_used_at = Some(Utc::now() - Duration::days(120));
        assert!(scorer().calculate(&fresh) > scorer().calculate(&stale));
    }

    #[test]
    fn delist_requires_both_low_score_and_min_uses() {
        let scorer = scorer();

        let mut failing = tool();
        failing.code = "x".repeat(12_000);
        failing.total_uses = 20;
        failing.successful_uses = 0;
        failing.avg_execution_time_ms = 9_000.0;
        failing.created_at = Utc::now() - Duration::days(120);
        failing.last_used_at = Some(Utc::now() - Duration::days(120));
        assert!(scorer.calculate(&failing) < 0.2);
        assert!(scorer.should_delist(&failing));

        // Same terrible record but too few uses to judge
        let mut new_tool = failing.clone();
        new_tool.total_uses = 2;
        assert!(!scorer.should_delist(&new_tool));

        // Plenty of uses but healthy score
        let mut healthy = tool();
        healthy.total_uses = 50;
        healthy.successful_uses = 48;
        healthy.last_used_at = Some(Utc::now());
        assert!(!scorer.should_delist(&healthy));
    }
}
