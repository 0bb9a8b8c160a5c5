//! Retrieval pipeline scenarios: relevance gating, graph expansion after a
//! weave, PPR mode, core-block injection, and the anti-feedback rule.

use omnimem_e2e_tests::{home, signals, write_scored};

use omnimem_core::{
    retrieve, weave_links, CoreBlockInput, EventType, Kind, Layer, RankingMode, RetrieveOptions,
    Scope, Source, WeaveOptions, WriteInput,
};

#[test]
fn relevance_gate_beats_reuse_count() {
    let h = home();
    write_scored(
        &h.store,
        "OM",
        "s1",
        "alpha beta gamma exact match candidate",
        "retrieval ranking test body",
        signals(0.55, 0.50, 0.50, 0, 0.0),
    );
    write_scored(
        &h.store,
        "OM",
        "s1",
        "alpha beta gamma old reused generic note with many unrelated filler terms delta epsilon zeta theta kappa lambda",
        "retrieval ranking test body",
        signals(0.60, 0.60, 0.60, 25, 0.0),
    );

    let out = retrieve(&h.store, "alpha beta gamma", "OM", "", &RetrieveOptions::default())
        .unwrap();
    assert!(out.ok);
    assert!(out.items.len() >= 2);
    assert!(out.items[0].summary.contains("exact match candidate"));
    assert!(out.items[0].score > out.items[1].score);
    assert!(out.items[0].components.lexical_overlap > out.items[1].components.lexical_overlap);
}

#[test]
fn weave_then_graph_expansion_recalls_neighbors() {
    let h = home();
    let seed = write_scored(
        &h.store,
        "OM",
        "s-thread",
        "daemon scheduler design notes",
        "phases are serialized",
        signals(0.7, 0.7, 0.7, 1, 0.2),
    );
    let neighbor = write_scored(
        &h.store,
        "OM",
        "s-thread",
        "retry backoff cap discussion",
        "exponential with a ceiling",
        signals(0.7, 0.7, 0.7, 1, 0.2),
    );

    let weave = weave_links(
        &h.store,
        &WeaveOptions {
            project_id: "OM".to_string(),
            ..WeaveOptions::default()
        },
    )
    .unwrap();
    assert!(weave.edges_written >= 2);

    let out = retrieve(
        &h.store,
        "daemon scheduler",
        "OM",
        "",
        &RetrieveOptions::default(),
    )
    .unwrap();
    let ids: Vec<&str> = out.items.iter().map(|i| i.id.as_str()).collect();
    assert!(ids.contains(&seed.as_str()));
    assert!(ids.contains(&neighbor.as_str()));
    let expanded = out.items.iter().find(|i| i.id == neighbor).unwrap();
    assert!(expanded.expansion.is_some());
}

#[test]
fn ppr_mode_ranks_over_the_woven_graph() {
    let h = home();
    write_scored(
        &h.store,
        "OM",
        "s-r",
        "graph alpha shared",
        "body",
        signals(0.8, 0.8, 0.8, 1, 0.2),
    );
    write_scored(
        &h.store,
        "OM",
        "s-r",
        "graph beta shared",
        "body",
        signals(0.7, 0.7, 0.7, 1, 0.2),
    );
    weave_links(
        &h.store,
        &WeaveOptions {
            project_id: "OM".to_string(),
            ..WeaveOptions::default()
        },
    )
    .unwrap();

    let out = retrieve(
        &h.store,
        "graph shared",
        "OM",
        "",
        &RetrieveOptions {
            ranking_mode: RankingMode::Ppr,
            ..RetrieveOptions::default()
        },
    )
    .unwrap();
    assert_eq!(out.explain.ranking_mode, RankingMode::Ppr);
    assert!(!out.items.is_empty());
}

#[test]
fn core_blocks_inject_ahead_of_ranked_items() {
    let h = home();
    h.store
        .upsert_core_block(CoreBlockInput {
            name: "constraints".to_string(),
            content: "Always include security and rollback notes.".to_string(),
            project_id: "OM".to_string(),
            session_id: "s1".to_string(),
            ..CoreBlockInput::default()
        })
        .unwrap();

    let out = retrieve(
        &h.store,
        "unrelated query",
        "OM",
        "s1",
        &RetrieveOptions {
            include_core_blocks: true,
            core_block_limit: 2,
            max_items: 4,
            ..RetrieveOptions::default()
        },
    )
    .unwrap();
    assert!(out.explain.core_blocks.enabled);
    assert!(out.explain.core_blocks.injected >= 1);
    assert!(out.items[0]
        .why_recalled
        .iter()
        .any(|w| w.starts_with("core-block:")));
}

#[test]
fn retrieve_traces_never_come_back() {
    let h = home();
    write_scored(
        &h.store,
        "OM",
        "s1",
        "findable knowledge about caching",
        "body",
        signals(0.6, 0.6, 0.6, 0, 0.2),
    );
    // A prior retrieval trace mentioning the same tokens.
    h.store
        .write_memory(WriteInput {
            layer: Layer::Instant,
            kind: Kind::Retrieve,
            summary: "Retrieved 3 memories for context about caching".to_string(),
            body: "query: findable knowledge about caching".to_string(),
            source: Source {
                session_id: "s1".to_string(),
                ..Source::default()
            },
            scope: Scope {
                project_id: "OM".to_string(),
                workspace: String::new(),
            },
            event_type: EventType::Retrieve,
            ..WriteInput::default()
        })
        .unwrap();

    let out = retrieve(
        &h.store,
        "findable knowledge caching",
        "OM",
        "",
        &RetrieveOptions::default(),
    )
    .unwrap();
    assert!(!out.items.is_empty());
    assert!(out.items.iter().all(|i| i.kind != Kind::Retrieve));
}

#[test]
fn mmr_selection_scores_are_non_increasing() {
    let h = home();
    for i in 0..10 {
        write_scored(
            &h.store,
            "OM",
            "s1",
            &format!("retrieval tuning note variant {i}"),
            "shared retrieval body",
            signals(0.5 + (i as f64) * 0.04, 0.6, 0.6, i as i64, 0.2),
        );
    }
    let out = retrieve(
        &h.store,
        "retrieval tuning",
        "OM",
        "",
        &RetrieveOptions::default(),
    )
    .unwrap();
    let scores = &out.explain.mmr.selection_scores;
    assert!(scores.len() >= 2);
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1] - 1e-12);
    }
}

#[test]
fn self_check_names_uncovered_tokens() {
    let h = home();
    write_scored(
        &h.store,
        "OM",
        "s1",
        "alpha coverage row",
        "body",
        signals(0.6, 0.6, 0.6, 0, 0.2),
    );
    let out = retrieve(
        &h.store,
        "alpha nonexistenttoken",
        "OM",
        "",
        &RetrieveOptions::default(),
    )
    .unwrap();
    let check = out.explain.self_check.unwrap();
    assert!(check.coverage < 1.0);
    assert!(check
        .missing_tokens
        .contains(&"nonexistenttoken".to_string()));
}
