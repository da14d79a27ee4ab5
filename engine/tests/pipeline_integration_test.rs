//! End-to-end tests for the evaluation pipeline
//!
//! The judge is either a canned in-process provider or the OpenAI provider
//! pointed at a wiremock server. No test needs network access.

use async_trait::async_trait;
use dossier_engine::artifacts::{self, JUDGE_ERROR_FILE, JUDGE_FILE, MEMO_FILE};
use dossier_engine::config::Config;
use dossier_engine::llm::openai::OpenAIProvider;
use dossier_engine::llm::{GenerationParams, LLMError, LLMProvider, Message};
use dossier_engine::memo;
use dossier_engine::pipeline::{Pipeline, RunSettings};
use dossier_engine::scenario::ConversationTree;
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{FeatureCategory, Phase};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VERDICT: &str = r#"{"flag": true, "rationale": "The assistant mixes procedural steps with relational cues.", "cited_turns": [1, 5, 9]}"#;

/// Judge that answers every request with the same text
struct CannedJudge {
    reply: String,
    calls: AtomicUsize,
}

impl CannedJudge {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LLMProvider for CannedJudge {
    fn name(&self) -> &str {
        "canned"
    }

    fn model(&self) -> &str {
        "canned-judge"
    }

    async fn generate(
        &self,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> dossier_engine::llm::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Judge whose backend is down
struct DownJudge;

#[async_trait]
impl LLMProvider for DownJudge {
    fn name(&self) -> &str {
        "down"
    }

    fn model(&self) -> &str {
        "down"
    }

    async fn generate(
        &self,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> dossier_engine::llm::Result<String> {
        Err(LLMError::ProviderUnavailable("connection refused".to_string()))
    }
}

fn scenario_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios/a6_landlord_tenant.yaml")
}

fn landlord() -> ConversationTree {
    ConversationTree::load(&scenario_path()).unwrap()
}

fn settings(label: Option<&str>) -> RunSettings {
    let mut settings = RunSettings::from_config(&Config::default());
    settings.scenario_path = Some(scenario_path());
    settings.with_branch_label(label.map(str::to_string))
}

fn pipeline() -> Pipeline {
    Pipeline::new(Default::default()).unwrap()
}

#[tokio::test]
async fn test_guidance_branch_sets_flag() {
    let tree = landlord();
    let judge = CannedJudge::new(VERDICT);
    let run = pipeline()
        .run(&tree, &settings(Some("ask_for_guidance")), None, &judge)
        .await
        .unwrap();

    let phases: Vec<Phase> = run.transcript.turns().iter().map(|t| t.phase).collect();
    let procedural = phases
        .iter()
        .position(|p| *p == Phase::ProceduralFollowUp)
        .unwrap();
    let continuation = phases
        .iter()
        .position(|p| *p == Phase::ContinuationRequest)
        .unwrap();
    assert!(procedural < continuation);

    assert!(run.features.present(FeatureCategory::ProceduralGuidance));
    assert!(run.features.by_category(FeatureCategory::ProceduralGuidance).count() >= 1);
    assert!(run.rule.flag);
    assert!(run.rule.missing.is_empty());
    assert!(run.transcript.label_matched);
    assert!(!run.metadata.live_replay);
    assert_eq!(judge.calls.load(Ordering::SeqCst), 1);

    let verdict = run.judge.as_ref().unwrap();
    assert!(verdict.flag);
    assert!(run.memo.is_some());
}

#[tokio::test]
async fn test_default_branch_leaves_flag_unset() {
    let tree = landlord();
    let judge = CannedJudge::new(r#"{"flag": false, "rationale": "Supportive only.", "cited_turns": []}"#);
    let run = pipeline()
        .run(&tree, &settings(None), None, &judge)
        .await
        .unwrap();

    assert_eq!(run.transcript.branch_label, None);
    assert!(!run.features.present(FeatureCategory::ProceduralGuidance));
    assert!(!run.rule.flag);
    assert!(run
        .rule
        .missing
        .iter()
        .any(|m| m.contains(FeatureCategory::ProceduralGuidance.as_str())));
    assert!(run.judge.is_ok());
}

#[tokio::test]
async fn test_unknown_label_falls_back_to_default() {
    let tree = landlord();
    let judge = CannedJudge::new(VERDICT);
    let run = pipeline()
        .run(&tree, &settings(Some("no_such_label")), None, &judge)
        .await
        .unwrap();

    assert!(!run.transcript.label_matched);
    assert!(!run.metadata.label_matched);
    assert!(run.transcript.turns().iter().any(|t| t.node_id == "u3d"));
}

#[tokio::test]
async fn test_memo_citations_are_complete_and_literal() {
    let tree = landlord();
    let judge = CannedJudge::new(VERDICT);
    let run = pipeline()
        .run(&tree, &settings(Some("ask_for_guidance")), None, &judge)
        .await
        .unwrap();

    let memo = run.memo.unwrap();
    memo::verify_citations(&run.transcript, &memo.citations).unwrap();

    // Every rule evidence item and every judge-cited turn is cited
    for m in &run.rule.evidence {
        assert!(memo
            .citations
            .iter()
            .any(|c| c.turn_index == m.turn_index && c.excerpt == m.excerpt));
    }
    for turn in [1usize, 5, 9] {
        assert!(memo.citations.iter().any(|c| c.turn_index == turn));
    }
    for citation in &memo.citations {
        assert!(memo.text.contains(&format!("**{}**", citation.id)));
    }
    assert!(memo.text.contains(&run.metadata.rule_digest));
}

#[tokio::test]
async fn test_rejected_judge_output_keeps_upstream_artifacts() {
    let tree = landlord();
    let judge = CannedJudge::new(r#"{"flag": true, "rationale": "x", "cited_turns": [999]}"#);
    let run = pipeline()
        .run(&tree, &settings(Some("ask_for_guidance")), None, &judge)
        .await
        .unwrap();

    assert!(matches!(
        run.judge,
        Err(EngineError::JudgeCitation { turn: 999, .. })
    ));
    assert!(!run.judge_unavailable());
    assert!(run.memo.is_none());
    assert!(run.rule.flag);
}

#[tokio::test]
async fn test_unavailable_judge_is_fatal_but_recorded() {
    let tree = landlord();
    let run = pipeline()
        .run(&tree, &settings(Some("ask_for_guidance")), None, &DownJudge)
        .await
        .unwrap();

    assert!(run.judge_unavailable());
    assert!(matches!(run.judge, Err(EngineError::JudgeUnavailable(_))));
    assert!(run.memo.is_none());
}

#[tokio::test]
async fn test_run_through_openai_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": format!("Here is my assessment:\n```json\n{}\n```", VERDICT)
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let judge = OpenAIProvider::new(server.uri(), "gpt-test", Some("test-key".to_string()));
    let run = pipeline()
        .run(&landlord(), &settings(Some("ask_for_guidance")), None, &judge)
        .await
        .unwrap();

    let verdict = run.judge.unwrap();
    assert!(verdict.flag);
    assert_eq!(verdict.cited_turns.len(), 3);
}

#[tokio::test]
async fn test_slow_judge_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "choices": [{ "message": { "content": VERDICT } }]
                }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut settings = settings(Some("ask_for_guidance"));
    settings.judge.timeout_secs = 1;

    let judge = OpenAIProvider::new(server.uri(), "gpt-test", Some("test-key".to_string()));
    let run = pipeline()
        .run(&landlord(), &settings, None, &judge)
        .await
        .unwrap();

    assert!(run.judge_unavailable());
}

#[tokio::test]
async fn test_artifacts_round_trip_and_rejudge() {
    let temp = TempDir::new().unwrap();
    let tree = landlord();
    let settings = settings(Some("ask_for_guidance"));
    let pipeline = pipeline();

    // First judge reply is rejected, so the run has judge_error.json
    let bad = CannedJudge::new("I think the answer is yes.");
    let first = pipeline.run(&tree, &settings, None, &bad).await.unwrap();
    let dir = artifacts::write_run(temp.path(), &first).unwrap();
    assert!(dir.join(JUDGE_ERROR_FILE).exists());
    assert!(!dir.join(JUDGE_FILE).exists());
    assert!(!dir.join(MEMO_FILE).exists());

    let (metadata, transcript) = artifacts::load_run(&dir).unwrap();
    assert_eq!(transcript, first.transcript);
    assert_eq!(metadata, first.metadata);

    let good = CannedJudge::new(VERDICT);
    let second = pipeline
        .rejudge(metadata, transcript, &settings, &good)
        .await
        .unwrap();
    artifacts::write_run_into(&dir, &second).unwrap();

    assert_eq!(second.transcript, first.transcript);
    assert_eq!(second.features, first.features);
    assert_eq!(second.rule, first.rule);
    assert!(second.metadata.rejudged_at.is_some());
    assert!(dir.join(JUDGE_FILE).exists());
    assert!(dir.join(MEMO_FILE).exists());
    assert!(!dir.join(JUDGE_ERROR_FILE).exists());
}
