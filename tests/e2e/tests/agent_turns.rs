//! Agent orchestrator scenarios: drift-driven checkpoint rotation and the
//! write-side artifacts of a turn.

use omnimem_e2e_tests::{home, write_note, ScriptedToolRunner};

use omnimem_core::agent::{load_state, save_state, tokenize_counts, AgentState};
use omnimem_core::{run_turn, Kind, TurnOptions};

#[test]
fn drift_checkpoint_rotates_session_and_clears_topic() {
    let h = home();
    let runtime = h.paths().runtime_dir();

    // Seed a session already talking about "python retrieval".
    let mut state = AgentState::fresh("codex", "OM");
    state.topic_vector = tokenize_counts("python retrieval");
    state.turns = 2;
    state.last_checkpoint_turn = 0;
    let old_session = state.session_id.clone();
    save_state(&runtime, &state).unwrap();

    let out = run_turn(
        &h.store,
        &ScriptedToolRunner {
            answer: "switching topics".to_string(),
        },
        "graph routing drift",
        &TurnOptions {
            project_id: "OM".to_string(),
            drift_threshold: 0.5,
            ..TurnOptions::default()
        },
    )
    .unwrap();

    assert!(out.ok);
    assert!(out.drift >= 0.5);
    assert!(out.switched);
    assert_ne!(out.session_id, old_session);

    let after = load_state(&runtime, "codex", "OM");
    assert!(after.topic_vector.is_empty());
    assert_eq!(after.session_id, out.session_id);

    let checkpoints = h.store.find_memories("checkpoint topic switch", None, "OM", 10).unwrap();
    assert!(checkpoints
        .iter()
        .any(|r| r.envelope.kind == Kind::Checkpoint));
}

#[test]
fn turn_leaves_trace_and_summary_memories() {
    let h = home();
    write_note(&h.store, "OM", "s0", "prior context about retrieval", "body");

    let out = run_turn(
        &h.store,
        &ScriptedToolRunner {
            answer: "here is what I found".to_string(),
        },
        "tell me about retrieval",
        &TurnOptions {
            project_id: "OM".to_string(),
            ..TurnOptions::default()
        },
    )
    .unwrap();
    assert!(out.ok);
    assert_eq!(out.answer, "here is what I found");
    assert!(out.retrieved_count >= 1);
    assert!(!out.switched);

    // The trace is stored but invisible to find (anti-feedback loop).
    let found = h.store.find_memories("Retrieved memories context", None, "OM", 20).unwrap();
    assert!(found.iter().all(|r| r.envelope.kind != Kind::Retrieve));

    let summaries = h.store.find_memories("Auto turn", None, "OM", 20).unwrap();
    assert!(summaries.iter().any(|r| r.envelope.kind == Kind::Summary));
}

#[test]
fn decision_language_lands_in_long_layer() {
    let h = home();
    let out = run_turn(
        &h.store,
        &ScriptedToolRunner {
            answer: "final decision: the rule is to always use WAL mode".to_string(),
        },
        "what journal mode must we use",
        &TurnOptions {
            project_id: "OM".to_string(),
            ..TurnOptions::default()
        },
    )
    .unwrap();
    assert!(out.ok);
    let summaries = h.store.find_memories("journal mode", None, "OM", 20).unwrap();
    let turn = summaries
        .iter()
        .find(|r| r.envelope.summary.starts_with("Auto turn:"))
        .expect("turn summary exists");
    assert_eq!(turn.envelope.layer, omnimem_core::Layer::Long);
}

#[test]
fn second_similar_turn_does_not_checkpoint() {
    let h = home();
    let runner = ScriptedToolRunner {
        answer: "ok".to_string(),
    };
    let opts = TurnOptions {
        project_id: "OM".to_string(),
        ..TurnOptions::default()
    };
    let first = run_turn(&h.store, &runner, "sqlite retrieval tuning", &opts).unwrap();
    assert!(!first.switched);
    // Same topic again: low drift, no rotation.
    let second = run_turn(&h.store, &runner, "sqlite retrieval tuning details", &opts).unwrap();
    assert!(!second.switched);
    assert_eq!(second.session_id, first.session_id);
}
