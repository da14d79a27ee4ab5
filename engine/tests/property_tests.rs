use dossier_engine::features::FeatureExtractor;
use dossier_engine::judge::parse_verdict;
use dossier_engine::rules::RuleEngine;
use dossier_engine::scenario::ConversationTree;
use dossier_engine::traversal;
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{Phase, Speaker, Transcript};
use proptest::prelude::*;
use std::path::PathBuf;

fn landlord() -> ConversationTree {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios/a6_landlord_tenant.yaml");
    ConversationTree::load(&path).unwrap()
}

fn label_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("ask_for_guidance".to_string())),
        Just(Some("express_distress".to_string())),
        "[a-z_]{1,12}".prop_map(Some),
    ]
}

/// Assistant sentences that mix the phrasing the matchers look for with filler
fn assistant_text() -> impl Strategy<Value = String> {
    let fragments = prop::sample::select(vec![
        "That's completely understandable.",
        "If you feel overwhelmed, take a break.",
        "Here is a step-by-step outline.",
        "\n1. Write to the landlord.\n",
        "Feel free to come back.",
        "I'm here to help.",
        "You're not alone in this.",
        "Deposits are often regulated.",
        "Café rules differ – check locally.",
        "Let me know how it goes!",
    ]);
    prop::collection::vec(fragments, 1..6).prop_map(|parts| parts.join(" "))
}

fn phase_strategy() -> impl Strategy<Value = Phase> {
    prop::sample::select(vec![
        Phase::Orientation,
        Phase::Clarification,
        Phase::ProceduralFollowUp,
        Phase::RelationalCue,
        Phase::ContinuationRequest,
    ])
}

fn transcript_strategy() -> impl Strategy<Value = Transcript> {
    prop::collection::vec((phase_strategy(), assistant_text()), 1..8).prop_map(|turns| {
        let mut transcript = Transcript::new("generated", None);
        for (i, (phase, text)) in turns.into_iter().enumerate() {
            transcript.push(Speaker::User, phase, format!("u{}", i), "What now?");
            transcript.push(Speaker::Assistant, phase, format!("a{}", i), text);
        }
        transcript
    })
}

proptest! {
    // Traversal is a pure function of the tree and the label
    #[test]
    fn test_traversal_is_deterministic(label in label_strategy()) {
        let tree = landlord();
        let first = traversal::traverse(&tree, label.as_deref()).unwrap();
        let second = traversal::traverse(&tree, label.as_deref()).unwrap();
        prop_assert_eq!(first, second);
    }

    // Turn indices are contiguous from zero, and the path starts at the root
    #[test]
    fn test_turn_indices_are_contiguous(label in label_strategy()) {
        let tree = landlord();
        let transcript = traversal::traverse(&tree, label.as_deref()).unwrap();
        for (i, turn) in transcript.turns().iter().enumerate() {
            prop_assert_eq!(turn.turn_index, i);
        }
        prop_assert_eq!(&transcript.turns()[0].node_id, &tree.root().node_id);
    }

    // Every excerpt is a literal substring of the assistant turn it points at
    #[test]
    fn test_excerpts_are_literal(transcript in transcript_strategy()) {
        let extractor = FeatureExtractor::new().unwrap();
        for m in extractor.extract(&transcript) {
            let turn = transcript.get(m.turn_index).unwrap();
            prop_assert_eq!(turn.speaker, Speaker::Assistant);
            prop_assert!(turn.text.contains(&m.excerpt));
            prop_assert!(m.excerpt.to_lowercase().contains(&m.matched.trim().to_lowercase()));
        }
    }

    // Extraction and rule evaluation give identical output on identical input
    #[test]
    fn test_rule_verdict_is_deterministic(transcript in transcript_strategy()) {
        let extractor = FeatureExtractor::new().unwrap();
        let engine = RuleEngine::default();
        let first = engine.evaluate(&extractor.extract(&transcript));
        let second = engine.evaluate(&extractor.extract(&transcript));
        prop_assert_eq!(first, second);
    }

    // An accepted verdict only ever cites turns inside the transcript
    #[test]
    fn test_judge_citations_stay_in_range(
        len in 1usize..20,
        cited in prop::collection::vec(-5i64..30, 0..6),
        flag in any::<bool>(),
    ) {
        let raw = serde_json::json!({
            "flag": flag,
            "rationale": "reason",
            "cited_turns": cited,
        })
        .to_string();

        match parse_verdict(&raw, len) {
            Ok(verdict) => {
                prop_assert_eq!(verdict.flag, flag);
                prop_assert!(verdict.cited_turns.iter().all(|t| *t < len));
                prop_assert!(cited.iter().all(|t| *t >= 0 && (*t as usize) < len));
            }
            Err(EngineError::JudgeCitation { turn, .. }) => {
                prop_assert!(turn < 0 || turn as usize >= len);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    // Arbitrary text never panics the verdict parser
    #[test]
    fn test_judge_parser_never_panics(raw in "\\PC{0,200}") {
        let _ = parse_verdict(&raw, 4);
    }
}
