//! Context-plan resolution and budgeted composition scenarios.

use omnimem_e2e_tests::{home, write_note};

use omnimem_core::{
    compose_context, estimate_tokens, resolve_context_plan, ComposeRequest, ContextCandidate,
    ContextPlanRequest, ContextProfile, Kind, Layer, QuotaMode,
};

#[test]
fn auto_quota_escalates_on_large_prompt() {
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
}

#[test]
fn plan_feeds_composer_within_budget() {
    let h = home();
    for i in 0..12 {
        write_note(
            &h.store,
            "OM",
            "s-ctx",
            &format!("budgeted memory item number {i}"),
            "body",
        );
    }
    let plan = resolve_context_plan(&ContextPlanRequest {
        profile: ContextProfile::LowQuota,
        quota_mode: QuotaMode::Critical,
        budget_tokens: 420,
        retrieve_limit: 8,
        ..ContextPlanRequest::default()
    });

    let candidates: Vec<ContextCandidate> = h
        .store
        .find_memories("budgeted memory", None, "OM", 20)
        .unwrap()
        .iter()
        .map(ContextCandidate::from)
        .collect();
    let out = compose_context(
        &h.paths().runtime_dir(),
        &ComposeRequest {
            state_key: "plan-e2e".to_string(),
            project_id: "OM".to_string(),
            user_prompt: "what did we decide".to_string(),
            candidates,
            budget_tokens: plan.context_budget_tokens,
            max_memories: plan.retrieve_limit,
            delta_enabled: plan.prefer_delta_context,
            ..ComposeRequest::default()
        },
    )
    .unwrap();
    assert!(out.ok);
    assert!(out.estimated_tokens <= out.budget_tokens);
    assert!(out.selected_count <= plan.retrieve_limit);
}

#[test]
fn delta_dedup_across_turns() {
    let h = home();
    let runtime = h.paths().runtime_dir();
    let candidates = vec![ContextCandidate {
        id: "stable-id-1234".to_string(),
        layer: Layer::Short,
        kind: Kind::Note,
        summary: "the same candidate twice".to_string(),
        updated_at: "2026-08-01T00:00:00Z".to_string(),
    }];
    let req = ComposeRequest {
        state_key: "delta-e2e".to_string(),
        project_id: "OM".to_string(),
        user_prompt: "anything".to_string(),
        candidates,
        ..ComposeRequest::default()
    };

    let first = compose_context(&runtime, &req).unwrap();
    assert_eq!(first.delta_new_count, 1);
    assert_eq!(first.delta_seen_count, 0);

    let second = compose_context(&runtime, &req).unwrap();
    assert_eq!(second.delta_new_count, 0);
    assert_eq!(second.delta_seen_count, 1);
    assert!(second.text.contains("/seen]"));
}

#[test]
fn user_request_block_truncates_but_survives() {
    let h = home();
    let long_prompt = "analyze this incident report ".repeat(120);
    let out = compose_context(
        &h.paths().runtime_dir(),
        &ComposeRequest {
            state_key: "trunc-e2e".to_string(),
            project_id: "OM".to_string(),
            user_prompt: long_prompt.clone(),
            include_user_request: true,
            budget_tokens: 150,
            ..ComposeRequest::default()
        },
    )
    .unwrap();
    assert!(out.text.contains("User request:"));
    assert!(out.text.len() < long_prompt.len());
}

#[test]
fn token_estimate_matches_contract() {
    // Alphanumeric runs plus CJK characters, never zero.
    assert_eq!(estimate_tokens("three plain words"), 3);
    assert_eq!(estimate_tokens("snake_case counts_once"), 2);
    assert_eq!(estimate_tokens("混合 mixed 内容"), 5);
    assert_eq!(estimate_tokens("!!!"), 1);
}
