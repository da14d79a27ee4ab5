use dossier_sdk::errors::{DossierErrorExt, EngineError};
use dossier_sdk::types::{Phase, Speaker, Transcript};
use proptest::prelude::*;

// Every error returns a static hint that never echoes the raw payload
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::schema(error_str.clone(), error_str.clone()),
            EngineError::DuplicateNodeId(error_str.clone()),
            EngineError::UnreachableNode(error_str.clone()),
            EngineError::judge_format(error_str.clone(), &error_str),
            EngineError::JudgeUnavailable(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            if error_str.len() > 8 {
                prop_assert!(!hint.contains(error_str.as_str()));
            }
        }
    }
}

// Transcripts built through push are always indexed 0..n and survive JSON
proptest! {
    #[test]
    fn test_transcript_indexing_round_trip(texts in proptest::collection::vec("\\PC{0,40}", 0..12)) {
        let mut transcript = Transcript::new("prop", Some("label".to_string()));
        for (i, text) in texts.iter().enumerate() {
            let speaker = if i % 2 == 0 { Speaker::User } else { Speaker::Assistant };
            transcript.push(speaker, Phase::Clarification, format!("n{}", i), text.clone());
        }

        let indices: Vec<usize> = transcript.turns().iter().map(|t| t.turn_index).collect();
        prop_assert_eq!(indices, (0..texts.len()).collect::<Vec<_>>());

        let json = serde_json::to_string(&transcript).unwrap();
        let parsed: Transcript = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, transcript);
    }
}
