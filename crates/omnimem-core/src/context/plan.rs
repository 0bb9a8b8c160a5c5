//! Context-plan resolver - adapts budget and retrieval width to pressure.
//!
//! Profiles describe the workload shape the user asked for; quota modes
//! describe operational pressure. `auto` derives the mode from the prompt
//! size, recent transient failures, and recent context utilization.

use serde::{Deserialize, Serialize};

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextProfile {
    #[default]
    Balanced,
    LowQuota,
    DeepResearch,
    HighThroughput,
}

impl ContextProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextProfile::Balanced => "balanced",
            ContextProfile::LowQuota => "low_quota",
            ContextProfile::DeepResearch => "deep_research",
            ContextProfile::HighThroughput => "high_throughput",
        }
    }

    /// Lenient parse: unknown profiles fall back to balanced.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low_quota" => ContextProfile::LowQuota,
            "deep_research" => ContextProfile::DeepResearch,
            "high_throughput" => ContextProfile::HighThroughput,
            _ => ContextProfile::Balanced,
        }
    }

    fn budget_multiplier(&self) -> f64 {
        match self {
            ContextProfile::Balanced => 1.0,
            ContextProfile::LowQuota => 0.72,
            ContextProfile::DeepResearch => 1.35,
            ContextProfile::HighThroughput => 0.88,
        }
    }

    fn limit_multiplier(&self) -> f64 {
        match self {
            ContextProfile::Balanced => 1.0,
            ContextProfile::LowQuota => 0.75,
            ContextProfile::DeepResearch => 1.40,
            ContextProfile::HighThroughput => 0.90,
        }
    }

    fn prefers_delta(&self) -> bool {
        !matches!(self, ContextProfile::HighThroughput)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaMode {
    #[default]
    Normal,
    Low,
    Critical,
    /// Resolved to one of the above from observed pressure.
    Auto,
}

impl QuotaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaMode::Normal => "normal",
            QuotaMode::Low => "low",
            QuotaMode::Critical => "critical",
            QuotaMode::Auto => "auto",
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low" => QuotaMode::Low,
            "critical" => QuotaMode::Critical,
            "auto" => QuotaMode::Auto,
            _ => QuotaMode::Normal,
        }
    }

    fn budget_multiplier(&self) -> f64 {
        match self {
            QuotaMode::Normal | QuotaMode::Auto => 1.0,
            QuotaMode::Low => 0.82,
            QuotaMode::Critical => 0.62,
        }
    }

    fn limit_multiplier(&self) -> f64 {
        match self {
            QuotaMode::Normal | QuotaMode::Auto => 1.0,
            QuotaMode::Low => 0.86,
            QuotaMode::Critical => 0.72,
        }
    }
}

// ============================================================================
// REQUEST / PLAN
// ============================================================================

#[derive(Debug, Clone)]
pub struct ContextPlanRequest {
    pub profile: ContextProfile,
    pub quota_mode: QuotaMode,
    pub budget_tokens: usize,
    pub retrieve_limit: usize,
    pub prompt_tokens_estimate: usize,
    pub recent_transient_failures: u32,
    pub recent_context_utilization: f64,
}

impl Default for ContextPlanRequest {
    fn default() -> Self {
        Self {
            profile: ContextProfile::Balanced,
            quota_mode: QuotaMode::Normal,
            budget_tokens: 420,
            retrieve_limit: 8,
            prompt_tokens_estimate: 0,
            recent_transient_failures: 0,
            recent_context_utilization: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextPlan {
    pub profile: ContextProfile,
    /// Never `Auto` after resolution.
    pub quota_mode: QuotaMode,
    pub context_budget_tokens: usize,
    pub retrieve_limit: usize,
    pub prefer_delta_context: bool,
    /// A stable prefix improves provider-side prompt-cache hit rates.
    pub stable_prefix: bool,
    pub decision_reason: String,
}

const BUDGET_MIN: usize = 160;
const BUDGET_MAX: usize = 1400;
const LIMIT_MIN: usize = 4;
const LIMIT_MAX: usize = 24;

/// Resolve the effective plan for one turn.
pub fn resolve_context_plan(req: &ContextPlanRequest) -> ContextPlan {
    let profile = req.profile;
    let mut quota = req.quota_mode;
    let mut reason = String::new();

    if quota == QuotaMode::Auto {
        let n = req.prompt_tokens_estimate;
        if n >= 1200 {
            quota = QuotaMode::Critical;
            reason = format!("auto quota: prompt_tokens_estimate={n} >= 1200 -> critical");
        } else if n >= 520 {
            quota = QuotaMode::Low;
            reason = format!("auto quota: prompt_tokens_estimate={n} >= 520 -> low");
        } else {
            quota = QuotaMode::Normal;
            reason = format!("auto quota: prompt_tokens_estimate={n} < 520 -> normal");
        }
        // Keep low-quota profiles conservative even with short prompts.
        if profile == ContextProfile::LowQuota && quota == QuotaMode::Normal {
            quota = QuotaMode::Low;
            reason.push_str("; profile=low_quota enforces at least low");
        }
        let rt = req.recent_transient_failures;
        if rt >= 7 && quota != QuotaMode::Critical {
            quota = QuotaMode::Critical;
            reason.push_str(&format!("; recent transient failures={rt} -> critical"));
        } else if rt >= 3 && quota == QuotaMode::Normal {
            quota = QuotaMode::Low;
            reason.push_str(&format!("; recent transient failures={rt} -> low"));
        }
        let cu = req.recent_context_utilization;
        if cu >= 0.96 && quota != QuotaMode::Critical {
            quota = QuotaMode::Critical;
            reason.push_str(&format!("; recent context utilization={cu:.2} -> critical"));
        } else if cu >= 0.88 && quota == QuotaMode::Normal {
            quota = QuotaMode::Low;
            reason.push_str(&format!("; recent context utilization={cu:.2} -> low"));
        }
    }

    let base_budget = req.budget_tokens.max(120) as f64;
    let base_limit = req.retrieve_limit.max(1) as f64;
    let budget = (base_budget * profile.budget_multiplier() * quota.budget_multiplier())
        .round() as usize;
    let limit = (base_limit * profile.limit_multiplier() * quota.limit_multiplier()).round() as usize;

    ContextPlan {
        profile,
        quota_mode: quota,
        context_budget_tokens: budget.clamp(BUDGET_MIN, BUDGET_MAX),
        retrieve_limit: limit.clamp(LIMIT_MIN, LIMIT_MAX),
        prefer_delta_context: profile.prefers_delta()
            || matches!(quota, QuotaMode::Low | QuotaMode::Critical),
        stable_prefix: true,
        decision_reason: if reason.is_empty() {
            format!(
                "manual quota mode: {}; profile={}",
                quota.as_str(),
                profile.as_str()
            )
        } else {
            reason
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_modes_apply_multipliers() {
        let plan = resolve_context_plan(&ContextPlanRequest {
            profile: ContextProfile::DeepResearch,
            quota_mode: QuotaMode::Normal,
            budget_tokens: 400,
            retrieve_limit: 10,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.context_budget_tokens, 540);
        assert_eq!(plan.retrieve_limit, 14);
        assert!(plan.prefer_delta_context);
        assert!(plan.stable_prefix);
    }

    #[test]
    fn test_auto_mode_escalates_on_large_prompt() {
        let plan = resolve_context_plan(&ContextPlanRequest {
            profile: ContextProfile::Balanced,
            quota_mode: QuotaMode::Auto,
            budget_tokens: 420,
            retrieve_limit: 8,
            prompt_tokens_estimate: 1600,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.quota_mode, QuotaMode::Critical);
        assert!(plan.context_budget_tokens < 420);
        assert!(plan.retrieve_limit < 8);
        assert!(plan.prefer_delta_context);
        assert!(plan.decision_reason.contains("critical"));
    }

    #[test]
    fn test_auto_mode_promotes_on_transient_failures() {
        let plan = resolve_context_plan(&ContextPlanRequest {
            quota_mode: QuotaMode::Auto,
            prompt_tokens_estimate: 100,
            recent_transient_failures: 7,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.quota_mode, QuotaMode::Critical);

        let plan = resolve_context_plan(&ContextPlanRequest {
            quota_mode: QuotaMode::Auto,
            prompt_tokens_estimate: 100,
            recent_transient_failures: 3,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.quota_mode, QuotaMode::Low);
    }

    #[test]
    fn test_auto_mode_promotes_on_utilization() {
        let plan = resolve_context_plan(&ContextPlanRequest {
            quota_mode: QuotaMode::Auto,
            recent_context_utilization: 0.97,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.quota_mode, QuotaMode::Critical);

        let plan = resolve_context_plan(&ContextPlanRequest {
            quota_mode: QuotaMode::Auto,
            recent_context_utilization: 0.90,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.quota_mode, QuotaMode::Low);
    }

    #[test]
    fn test_low_quota_profile_enforces_floor() {
        let plan = resolve_context_plan(&ContextPlanRequest {
            profile: ContextProfile::LowQuota,
            quota_mode: QuotaMode::Auto,
            prompt_tokens_estimate: 10,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.quota_mode, QuotaMode::Low);
        assert!(plan.decision_reason.contains("low_quota"));
    }

    #[test]
    fn test_clamps() {
        let plan = resolve_context_plan(&ContextPlanRequest {
            profile: ContextProfile::LowQuota,
            quota_mode: QuotaMode::Critical,
            budget_tokens: 120,
            retrieve_limit: 1,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.context_budget_tokens, 160);
        assert_eq!(plan.retrieve_limit, 4);

        let plan = resolve_context_plan(&ContextPlanRequest {
            profile: ContextProfile::DeepResearch,
            quota_mode: QuotaMode::Normal,
            budget_tokens: 5000,
            retrieve_limit: 100,
            ..ContextPlanRequest::default()
        });
        assert_eq!(plan.context_budget_tokens, 1400);
        assert_eq!(plan.retrieve_limit, 24);
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(
            ContextProfile::parse_lenient("DEEP_RESEARCH"),
            ContextProfile::DeepResearch
        );
        assert_eq!(ContextProfile::parse_lenient("bogus"), ContextProfile::Balanced);
        assert_eq!(QuotaMode::parse_lenient("AUTO"), QuotaMode::Auto);
        assert_eq!(QuotaMode::parse_lenient(""), QuotaMode::Normal);
    }
}
